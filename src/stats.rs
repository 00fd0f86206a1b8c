//! Aggregation of Contents index lines into per-package file counts.
//!
//! A Contents index line names a file followed by the comma-separated list of
//! packages shipping it:
//!
//! ```text
//! usr/bin/file1                                   admin/pkg1,utils/pkg2
//! ```

use std::collections::HashMap;

use crate::cache::PackageCount;

/// Lines starting with this token are column headers, not data.
pub const HEADER_PREFIX: &str = "FILE";

/// Running name → count aggregation that remembers first-seen order.
#[derive(Debug, Default, Clone)]
pub struct Tally {
    index: HashMap<String, usize>,
    entries: Vec<PackageCount>,
    lines: u64,
}

impl Tally {
    /// An empty aggregation.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count every package named on `line`.
    ///
    /// Empty lines, header lines, and lines without a whitespace separator
    /// contribute nothing. The package list is the last whitespace-separated
    /// column, so file names containing spaces are handled.
    pub fn process_line(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() || line.starts_with(HEADER_PREFIX) {
            return;
        }
        let Some(idx) = line.rfind(char::is_whitespace) else {
            return;
        };
        self.lines += 1;
        for name in line[idx..].split(',') {
            let name = name.trim();
            if !name.is_empty() {
                self.increment(name);
            }
        }
    }

    fn increment(&mut self, name: &str) {
        match self.index.get(name) {
            Some(&pos) => self.entries[pos].count += 1,
            None => {
                self.index.insert(name.to_string(), self.entries.len());
                self.entries.push(PackageCount::new(name, 1));
            }
        }
    }

    /// Count for one package, if seen.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<u64> {
        self.index.get(name).map(|&pos| self.entries[pos].count)
    }

    /// Number of distinct packages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been counted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of data lines that contributed at least a separator.
    #[must_use]
    pub fn data_lines(&self) -> u64 {
        self.lines
    }

    /// Finish the aggregation: counts descending, ties in first-seen order.
    #[must_use]
    pub fn into_sorted(self) -> Vec<PackageCount> {
        let mut entries = self.entries;
        // sort_by is stable, which keeps insertion order among equal counts
        entries.sort_by(|a, b| b.count.cmp(&a.count));
        entries
    }
}

impl FromIterator<(String, u64)> for Tally {
    fn from_iter<I: IntoIterator<Item = (String, u64)>>(iter: I) -> Self {
        let mut tally = Tally::new();
        for (name, count) in iter {
            match tally.index.get(&name) {
                Some(&pos) => tally.entries[pos].count += count,
                None => {
                    tally.index.insert(name.clone(), tally.entries.len());
                    tally.entries.push(PackageCount::new(name, count));
                }
            }
        }
        tally
    }
}
