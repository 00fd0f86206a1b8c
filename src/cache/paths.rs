//! File naming for cache records and their lock markers.

use std::path::{Path, PathBuf};

/// Paths belonging to one dataset inside the cache directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePaths {
    /// The JSON record, `contents-<key>.json`.
    pub record: PathBuf,
    /// The sibling lock marker, `contents-<key>.json.lock`.
    pub lock: PathBuf,
}

impl CachePaths {
    /// Paths for `key` under `cache_dir`. The key must already be validated.
    #[must_use]
    pub fn for_dataset(cache_dir: &Path, key: &str) -> Self {
        let record = cache_dir.join(format!("contents-{key}.json"));
        let lock = lock_path_for(&record);
        Self { record, lock }
    }
}

/// The lock marker path for a record path.
#[must_use]
pub fn lock_path_for(record: &Path) -> PathBuf {
    let mut name = record.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

/// Check that a dataset key can be embedded in a file name.
///
/// # Errors
///
/// Returns a description of the problem for empty keys and keys with path
/// separators, `..`, whitespace, or control characters.
pub fn validate_dataset_key(key: &str) -> Result<(), String> {
    if key.is_empty() {
        return Err("dataset key cannot be empty".to_string());
    }
    if key.contains("..") {
        return Err(format!("dataset key '{key}' must not contain '..'"));
    }
    if let Some(bad) = key
        .chars()
        .find(|c| matches!(c, '/' | '\\' | ':') || c.is_whitespace() || c.is_control())
    {
        return Err(format!(
            "dataset key '{key}' contains invalid character {bad:?}"
        ));
    }
    Ok(())
}
