//! CSV output formatter for package rankings.
//!
//! # Columns
//!
//! - `rank`: 1-based position in the ranking
//! - `package`: Package name as it appears in the Contents index
//! - `count`: Number of files the package ships
//!
//! # Example
//!
//! ```
//! use pkgstats::cache::PackageCount;
//! use pkgstats::output::csv::CsvOutput;
//!
//! let items = vec![PackageCount::new("libs/libc6", 42)];
//! let csv = CsvOutput::new(&items).to_string().unwrap();
//! assert_eq!(csv, "rank,package,count\n1,libs/libc6,42\n");
//! ```

use std::io;

use serde::Serialize;
use thiserror::Error;

use super::clean_name;
use crate::cache::PackageCount;

/// Errors that can occur during CSV output generation.
#[derive(Debug, Error)]
pub enum CsvOutputError {
    /// I/O error during writing.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Error during CSV serialization.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    rank: usize,
    package: &'a str,
    count: u64,
}

/// CSV output formatter.
pub struct CsvOutput<'a> {
    items: &'a [PackageCount],
}

impl<'a> CsvOutput<'a> {
    /// Format `items`, which should already be cut to the requested length.
    #[must_use]
    pub fn new(items: &'a [PackageCount]) -> Self {
        Self { items }
    }

    /// Write the CSV output to the given writer.
    ///
    /// # Errors
    ///
    /// Returns `CsvOutputError` if writing or serialization fails.
    pub fn write_to<W: io::Write>(&self, writer: W) -> Result<(), CsvOutputError> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        if self.items.is_empty() {
            csv_writer.write_record(["rank", "package", "count"])?;
        }
        for (idx, item) in self.items.iter().enumerate() {
            let name = clean_name(&item.name);
            csv_writer.serialize(CsvRow {
                rank: idx + 1,
                package: &name,
                count: item.count,
            })?;
        }
        csv_writer.flush()?;
        Ok(())
    }

    /// Generate CSV output as a string.
    ///
    /// # Errors
    ///
    /// Returns `CsvOutputError` if serialization fails.
    pub fn to_string(&self) -> Result<String, CsvOutputError> {
        let mut buffer = Vec::new();
        self.write_to(&mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).to_string())
    }
}
