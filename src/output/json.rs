//! JSON output formatter for package rankings.
//!
//! # Output Schema
//!
//! ```json
//! {
//!   "dataset": "amd64",
//!   "source": "fresh",
//!   "captured_at": "2024-05-01T12:00:00Z",
//!   "total_packages": 61234,
//!   "packages": [
//!     { "rank": 1, "name": "devel/piglit", "count": 51784 }
//!   ]
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Write;

use super::clean_name;
use crate::resolver::{Resolution, Source};

/// One ranked package.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct JsonPackage {
    pub rank: usize,
    pub name: String,
    pub count: u64,
}

/// Complete JSON report.
#[derive(Debug, Clone, Serialize)]
pub struct JsonOutput {
    /// Architecture the statistics describe.
    pub dataset: String,
    /// Where the statistics came from.
    pub source: Source,
    /// When the statistics were computed.
    pub captured_at: DateTime<Utc>,
    /// Distinct packages in the whole index, not just those listed.
    pub total_packages: usize,
    /// The top of the ranking.
    pub packages: Vec<JsonPackage>,
}

impl JsonOutput {
    /// Build a report listing the first `top` packages of `resolution`.
    #[must_use]
    pub fn new(resolution: &Resolution, top: usize) -> Self {
        let packages = super::top_n(&resolution.items, top)
            .iter()
            .enumerate()
            .map(|(idx, item)| JsonPackage {
                rank: idx + 1,
                name: clean_name(&item.name),
                count: item.count,
            })
            .collect();
        Self {
            dataset: resolution.dataset.clone(),
            source: resolution.source,
            captured_at: resolution.captured_at,
            total_packages: resolution.items.len(),
            packages,
        }
    }

    /// Serialize to compact JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Write pretty JSON followed by a newline.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn write_to<W: Write>(&self, mut writer: W) -> std::io::Result<()> {
        serde_json::to_writer_pretty(&mut writer, self)?;
        writeln!(writer)
    }
}
