//! Durable JSON storage for [`CacheRecord`]s.
//!
//! Writers go through a temporary sibling file that is flushed to disk and then
//! renamed over the target, so readers only ever see a complete record. A file
//! that cannot be parsed or fails validation is deleted on load; an expired
//! file is left alone because it may still serve as a fallback.

use chrono::{DateTime, Utc};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use super::entry::{CacheRecord, CACHE_FORMAT_VERSION};

/// How many times the final rename is attempted.
pub const RENAME_ATTEMPTS: usize = 5;

/// Pause between rename attempts.
pub const RENAME_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Errors from loading or saving a cache record.
#[derive(Debug, Error)]
pub enum CacheError {
    /// No record file exists.
    #[error("no cache file at {}", path.display())]
    NotFound {
        /// Record path.
        path: PathBuf,
    },

    /// The record is valid but older than the TTL. The file is kept on disk.
    #[error("cache expired (age {}s)", age.as_secs())]
    Expired {
        /// Age of the record at load time.
        age: Duration,
        /// The expired record, usable only as a fallback.
        record: Box<CacheRecord>,
    },

    /// The file was unreadable as a record and has been removed.
    #[error("corrupt cache removed ({}): {reason}", path.display())]
    Corrupt {
        /// Record path.
        path: PathBuf,
        /// What failed validation.
        reason: String,
    },

    /// Records without items are never written.
    #[error("refusing to save an empty record for '{dataset}'")]
    EmptyRecord {
        /// Dataset key of the rejected record.
        dataset: String,
    },

    /// An I/O error occurred.
    #[error("cache I/O error for {}: {source}", path.display())]
    Io {
        /// Path involved in the failure.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// Result type for cache store operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Load a record, treating it as expired when older than `ttl`.
///
/// # Errors
///
/// See [`load_as_of`].
pub fn load(path: &Path, ttl: Duration) -> CacheResult<CacheRecord> {
    load_as_of(path, ttl, Utc::now())
}

/// Load a record, measuring its age against `now`.
///
/// # Errors
///
/// - [`CacheError::NotFound`] if the file does not exist.
/// - [`CacheError::Corrupt`] if it is not a valid record; the file is deleted.
/// - [`CacheError::Expired`] if `now - captured_at > ttl`; the file is kept.
/// - [`CacheError::Io`] for any other read failure.
pub fn load_as_of(path: &Path, ttl: Duration, now: DateTime<Utc>) -> CacheResult<CacheRecord> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(CacheError::NotFound {
                path: path.to_path_buf(),
            })
        }
        Err(source) => {
            return Err(CacheError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let record = match parse_record(&data) {
        Ok(record) => record,
        Err(reason) => {
            purge(path);
            return Err(CacheError::Corrupt {
                path: path.to_path_buf(),
                reason,
            });
        }
    };

    let age = record.age(now);
    if age > ttl {
        log::debug!(
            "Cache {} expired: age {}s exceeds ttl {}s",
            path.display(),
            age.as_secs(),
            ttl.as_secs()
        );
        return Err(CacheError::Expired {
            age,
            record: Box::new(record),
        });
    }

    Ok(record)
}

fn parse_record(data: &[u8]) -> Result<CacheRecord, String> {
    let record: CacheRecord =
        serde_json::from_slice(data).map_err(|e| format!("invalid JSON: {e}"))?;

    if record.version != CACHE_FORMAT_VERSION {
        return Err(format!(
            "unsupported format version {} (expected {})",
            record.version, CACHE_FORMAT_VERSION
        ));
    }
    if record.items.is_empty() {
        return Err("record has no items".to_string());
    }
    if !record.checksum.is_empty() {
        let actual = record
            .compute_checksum()
            .map_err(|e| format!("cannot re-serialize items: {e}"))?;
        if actual != record.checksum {
            return Err("checksum mismatch".to_string());
        }
    }
    Ok(record)
}

fn purge(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => log::warn!("Removed corrupt cache file {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("Failed to remove corrupt cache {}: {}", path.display(), e),
    }
}

/// Removes the temporary file on every exit path.
struct TempGuard {
    path: PathBuf,
}

impl Drop for TempGuard {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => log::debug!("Failed to remove temp file {}: {}", self.path.display(), e),
        }
    }
}

/// Persist `record` atomically at `path`.
///
/// The record's checksum is recomputed and stored in `record` before it is
/// written.
///
/// # Errors
///
/// Returns [`CacheError::EmptyRecord`] for a record without items and
/// [`CacheError::Io`] if the temporary file cannot be written or the final
/// rename still fails after [`RENAME_ATTEMPTS`] tries.
pub fn save(path: &Path, record: &mut CacheRecord) -> CacheResult<()> {
    if record.items.is_empty() {
        return Err(CacheError::EmptyRecord {
            dataset: record.dataset.clone(),
        });
    }

    record.checksum = record.compute_checksum().map_err(|e| CacheError::Io {
        path: path.to_path_buf(),
        source: io::Error::new(io::ErrorKind::InvalidData, e),
    })?;

    let json = serde_json::to_vec_pretty(record).map_err(|e| CacheError::Io {
        path: path.to_path_buf(),
        source: io::Error::new(io::ErrorKind::InvalidData, e),
    })?;

    let tmp = temp_path_for(path);
    let _guard = TempGuard { path: tmp.clone() };

    write_and_sync(&tmp, &json).map_err(|source| CacheError::Io {
        path: tmp.clone(),
        source,
    })?;

    let mut last_err = None;
    for attempt in 0..RENAME_ATTEMPTS {
        match fs::rename(&tmp, path) {
            Ok(()) => {
                sync_parent(path);
                log::debug!("Saved cache {}", path.display());
                return Ok(());
            }
            Err(e) => {
                log::debug!(
                    "Rename attempt {} of {} for {} failed: {}",
                    attempt + 1,
                    RENAME_ATTEMPTS,
                    path.display(),
                    e
                );
                last_err = Some(e);
                if attempt + 1 < RENAME_ATTEMPTS {
                    std::thread::sleep(RENAME_RETRY_DELAY);
                }
            }
        }
    }

    Err(CacheError::Io {
        path: path.to_path_buf(),
        source: last_err
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "rename failed")),
    })
}

/// `<name>.<pid>.tmp` next to the target.
fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".{}.tmp", std::process::id()));
    PathBuf::from(name)
}

fn write_and_sync(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

#[cfg(unix)]
fn sync_parent(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Ok(dir) = fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) {}
