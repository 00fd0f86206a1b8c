//! Cache record definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;

/// Current version of the cache file format.
pub const CACHE_FORMAT_VERSION: u32 = 1;

/// One package and the number of files it owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageCount {
    /// Package name as it appears in the Contents index (may carry a section prefix).
    pub name: String,
    /// Number of index lines naming this package.
    pub count: u64,
}

impl PackageCount {
    /// Create a new entry.
    pub fn new(name: impl Into<String>, count: u64) -> Self {
        Self {
            name: name.into(),
            count,
        }
    }
}

/// The persisted statistics for one dataset (one architecture's Contents index).
///
/// Records are never patched in place: every refresh builds a new record and
/// replaces the file wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    /// Format version.
    pub version: u32,
    /// Dataset key, e.g. `amd64`.
    pub dataset: String,
    /// Package counts, sorted by count descending.
    pub items: Vec<PackageCount>,
    /// When the statistics were computed.
    pub captured_at: DateTime<Utc>,
    /// Entity tag reported by the mirror.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub etag: String,
    /// `Last-Modified` value reported by the mirror.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_modified: String,
    /// The exact URL the data came from.
    pub source_url: String,
    /// Hex SHA-256 of the compact JSON encoding of `items`.
    ///
    /// Detects local corruption only; nothing ties it to the remote file.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub checksum: String,
}

impl CacheRecord {
    /// Build a record for freshly computed statistics.
    ///
    /// The checksum is left empty; the store fills it in when saving.
    pub fn new(
        dataset: impl Into<String>,
        items: Vec<PackageCount>,
        etag: impl Into<String>,
        last_modified: impl Into<String>,
        source_url: impl Into<String>,
        captured_at: DateTime<Utc>,
    ) -> Self {
        Self {
            version: CACHE_FORMAT_VERSION,
            dataset: dataset.into(),
            items,
            captured_at,
            etag: etag.into(),
            last_modified: last_modified.into(),
            source_url: source_url.into(),
            checksum: String::new(),
        }
    }

    /// Compute the checksum of the current item list.
    pub fn compute_checksum(&self) -> Result<String, serde_json::Error> {
        let data = serde_json::to_vec(&self.items)?;
        let mut hasher = Sha256::new();
        hasher.update(&data);
        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Age of the record at `now`. Timestamps in the future count as age zero.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.captured_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// Whether the record carries any freshness token worth sending upstream.
    #[must_use]
    pub fn has_validators(&self) -> bool {
        !self.etag.is_empty() || !self.last_modified.is_empty()
    }
}
