//! Plain-text ranking table for terminals.
//!
//! ```text
//! Rank  Package Name                    Count
//! --------------------------------------------------
//! 1     devel/piglit                    51784
//! 2     science/esys-particle           18015
//! ```

use std::io::{self, Write};
use yansi::Paint;

use super::clean_name;
use crate::cache::PackageCount;

const RANK_WIDTH: usize = 5;
const MIN_NAME_WIDTH: usize = 30;
const RULE_WIDTH: usize = 50;

/// Table formatter.
pub struct TableOutput<'a> {
    items: &'a [PackageCount],
    color: bool,
}

impl<'a> TableOutput<'a> {
    /// Format `items`, which should already be cut to the requested length.
    #[must_use]
    pub fn new(items: &'a [PackageCount]) -> Self {
        Self { items, color: false }
    }

    /// Bold the header row.
    #[must_use]
    pub fn with_color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    /// Write the table.
    ///
    /// # Errors
    ///
    /// Returns any error from `writer`.
    pub fn write_to<W: Write>(&self, mut writer: W) -> io::Result<()> {
        let names: Vec<String> = self.items.iter().map(|item| clean_name(&item.name)).collect();
        let name_width = names
            .iter()
            .map(|name| name.chars().count())
            .max()
            .unwrap_or(0)
            .max(MIN_NAME_WIDTH);

        let header = format!(
            "{:<rank$} {:<name$} {}",
            "Rank",
            "Package Name",
            "Count",
            rank = RANK_WIDTH,
            name = name_width
        );
        if self.color {
            writeln!(writer, "{}", header.bold())?;
        } else {
            writeln!(writer, "{header}")?;
        }
        writeln!(writer, "{}", "-".repeat(RULE_WIDTH.max(header.len())))?;

        for (idx, (item, name)) in self.items.iter().zip(&names).enumerate() {
            writeln!(
                writer,
                "{:<rank$} {:<name$} {}",
                idx + 1,
                name,
                item.count,
                rank = RANK_WIDTH,
                name = name_width
            )?;
        }
        Ok(())
    }
}
