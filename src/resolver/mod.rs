//! Cache-coherent resolution of package statistics.
//!
//! A [`Resolver`] serialises access to one dataset's cache across processes,
//! decides between trusting the cache, revalidating it, and downloading
//! afresh, and falls back to old data when a download fails.

pub mod machine;
pub mod orchestrator;

use std::path::PathBuf;
use thiserror::Error;

use crate::cache::LockError;
use crate::fetch::FetchError;
use crate::signal::Interrupt;

pub use machine::{transition, Action, Event, Phase, Source};
pub use orchestrator::{Resolution, ResolveOptions, Resolver};

/// Failures that leave the caller without any data.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Invalid dataset '{dataset}': {reason}")]
    InvalidDataset { dataset: String, reason: String },

    #[error("Cannot create cache directory {}: {source}", path.display())]
    CacheDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The decision procedure reached a state it has no rule for.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ResolveError {
    /// Whether the run stopped because the user asked it to.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match self {
            ResolveError::Lock(LockError::Interrupted(Interrupt::Cancelled)) => true,
            ResolveError::Fetch(e) => e.is_cancelled(),
            _ => false,
        }
    }
}
