//! Local persistence of computed package statistics.
//!
//! One JSON record per dataset (architecture) lives in the cache directory,
//! guarded by a sibling lock marker so concurrent `pkgstats` processes never
//! interleave their load → fetch → save sequences.
//!
//! # Architecture
//!
//! * [`entry`]: The persisted [`CacheRecord`] and its checksum.
//! * [`store`]: Atomic save and TTL-validating load with auto-heal of corrupt files.
//! * [`lock`]: Cross-process exclusive lock with stale-marker cleanup.
//! * [`paths`]: File naming and dataset key validation.
//!
//! # Freshness
//!
//! A record older than the configured TTL loads as [`CacheError::Expired`]
//! and stays on disk; a record that fails to parse or validate is deleted and
//! loads as [`CacheError::Corrupt`].

pub mod entry;
pub mod lock;
pub mod paths;
pub mod store;

pub use entry::{CacheRecord, PackageCount, CACHE_FORMAT_VERSION};
pub use lock::{cleanup_stale, CacheLock, LockError, DEFAULT_LOCK_TIMEOUT, DEFAULT_STALE_AFTER};
pub use paths::{validate_dataset_key, CachePaths};
pub use store::{load, load_as_of, save, CacheError, CacheResult};
