//! Output formatters for package rankings.
//!
//! - [`table`] for terminals
//! - [`json`] for automation and scripting
//! - [`csv`] for spreadsheet import
//!
//! Rankings arrive already sorted; formatters only cut and render them.

pub mod csv;
pub mod json;
pub mod table;

pub use csv::{CsvOutput, CsvOutputError};
pub use json::JsonOutput;
pub use table::TableOutput;

use std::io::Write;
use thiserror::Error;

use crate::cache::PackageCount;
use crate::cli::OutputFormat;
use crate::resolver::Resolution;

/// Failure to render a report.
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Failed to write output: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] CsvOutputError),
}

/// The first `n` items, or all of them if there are fewer.
#[must_use]
pub fn top_n(items: &[PackageCount], n: usize) -> &[PackageCount] {
    &items[..n.min(items.len())]
}

/// Package name with tabs turned into spaces and outer whitespace removed.
#[must_use]
pub fn clean_name(name: &str) -> String {
    name.replace('\t', " ").trim().to_string()
}

/// Render the top `top` packages of `resolution` in `format`.
///
/// # Errors
///
/// Returns an error if writing fails.
pub fn write_report<W: Write>(
    format: OutputFormat,
    resolution: &Resolution,
    top: usize,
    color: bool,
    writer: W,
) -> Result<(), OutputError> {
    match format {
        OutputFormat::Table => TableOutput::new(top_n(&resolution.items, top))
            .with_color(color)
            .write_to(writer)?,
        OutputFormat::Json => JsonOutput::new(resolution, top).write_to(writer)?,
        OutputFormat::Csv => CsvOutput::new(top_n(&resolution.items, top)).write_to(writer)?,
    }
    Ok(())
}
