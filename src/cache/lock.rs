//! Cross-process mutual exclusion for one cache record.
//!
//! The lock is an advisory exclusive `flock`/`LockFileEx` on a `.lock` marker
//! file next to the record. Holding the [`CacheLock`] means no other process
//! on this machine is inside the load → fetch → save sequence for the same
//! dataset. Releasing unlocks and deletes the marker.
//!
//! A process that dies while holding the lock releases the OS lock but leaves
//! the marker behind; [`cleanup_stale`] removes markers whose mtime is older
//! than a threshold so leftovers do not accumulate. Because the marker is
//! unlinked on release, a waiter may end up locking a file that no longer has
//! a name; acquisition therefore re-checks that the path still refers to the
//! locked file and starts over otherwise.

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use thiserror::Error;

use crate::signal::{CancelToken, Interrupt};

/// Default time to wait for another process to release the lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Default age after which a leftover marker is considered stale.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(60 * 60);

/// How often a contended lock is retried.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Errors from acquiring the cache lock.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another process held the lock for longer than the timeout.
    #[error("timed out after {}s waiting for cache lock {}", waited.as_secs(), path.display())]
    Timeout {
        /// Marker path.
        path: PathBuf,
        /// How long we waited.
        waited: Duration,
    },

    /// The marker file could not be created or locked.
    #[error("cache lock I/O error for {}: {source}", path.display())]
    Io {
        /// Marker path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The wait was cancelled.
    #[error("interrupted while waiting for cache lock: {0}")]
    Interrupted(Interrupt),
}

/// Exclusive ownership of one dataset's lock marker.
///
/// Dropping the handle releases it; [`CacheLock::release`] does the same
/// explicitly. Release is best-effort and only ever logs.
#[derive(Debug)]
pub struct CacheLock {
    path: PathBuf,
    file: Option<File>,
}

impl CacheLock {
    /// Acquire the lock at `path`.
    ///
    /// Tries once without blocking, then polls until `timeout` elapses. The
    /// wait is abandoned as soon as `cancel` is interrupted.
    ///
    /// # Errors
    ///
    /// [`LockError::Timeout`] if the lock stayed contended, [`LockError::Io`]
    /// if the marker cannot be created or locked, and
    /// [`LockError::Interrupted`] if `cancel` fired while waiting.
    pub fn acquire(path: &Path, timeout: Duration, cancel: &CancelToken) -> Result<Self, LockError> {
        let started = Instant::now();
        let mut announced = false;
        let io_err = |source| LockError::Io {
            path: path.to_path_buf(),
            source,
        };

        loop {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(path)
                .map_err(io_err)?;

            match file.try_lock_exclusive() {
                Ok(()) => {
                    if still_named(&file, path) {
                        let mut lock = Self {
                            path: path.to_path_buf(),
                            file: Some(file),
                        };
                        lock.stamp();
                        log::debug!("Acquired cache lock {}", path.display());
                        return Ok(lock);
                    }
                    // Locked a marker that was unlinked by its previous owner.
                    log::trace!("Lock marker {} was replaced, retrying", path.display());
                    let _ = FileExt::unlock(&file);
                }
                Err(e) if is_contended(&e) => {
                    if !announced {
                        log::info!("Waiting for another process to release {}", path.display());
                        announced = true;
                    }
                }
                Err(e) => return Err(io_err(e)),
            }

            let waited = started.elapsed();
            if waited >= timeout {
                return Err(LockError::Timeout {
                    path: path.to_path_buf(),
                    waited,
                });
            }
            cancel
                .sleep(POLL_INTERVAL.min(timeout - waited))
                .map_err(LockError::Interrupted)?;
        }
    }

    /// Marker path of this lock.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Unlock and delete the marker.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        let Some(file) = self.file.take() else {
            return;
        };
        if cfg!(unix) {
            // Unlink first so a waiter that grabs the old inode notices and retries.
            self.remove_marker();
            unlock(&file, &self.path);
        } else {
            // Open files cannot be deleted here; close the handle first.
            unlock(&file, &self.path);
            drop(file);
            self.remove_marker();
        }
        log::debug!("Released cache lock {}", self.path.display());
    }

    fn remove_marker(&self) {
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Failed to remove lock file {}: {}", self.path.display(), e),
        }
    }

    /// Record our PID in the marker; this also refreshes its mtime so the
    /// marker is not mistaken for a stale leftover while we hold it.
    fn stamp(&mut self) {
        if let Some(file) = self.file.as_mut() {
            let result = file
                .set_len(0)
                .and_then(|()| writeln!(file, "{}", std::process::id()))
                .and_then(|()| file.flush());
            if let Err(e) = result {
                log::debug!("Failed to stamp lock file {}: {}", self.path.display(), e);
            }
        }
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        self.release_inner();
    }
}

fn unlock(file: &File, path: &Path) {
    if let Err(e) = FileExt::unlock(file) {
        log::warn!("Failed to release lock {}: {}", path.display(), e);
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

#[cfg(unix)]
fn still_named(file: &File, path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    match (file.metadata(), fs::metadata(path)) {
        (Ok(held), Ok(named)) => held.dev() == named.dev() && held.ino() == named.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn still_named(_file: &File, path: &Path) -> bool {
    path.exists()
}

/// Remove the marker at `path` if its mtime is older than `stale_after`.
///
/// Returns `true` when a marker was removed. This never grants the lock; it
/// only clears leftovers from crashed processes, and must be followed by
/// [`CacheLock::acquire`].
pub fn cleanup_stale(path: &Path, stale_after: Duration) -> bool {
    let modified = match fs::metadata(path).and_then(|m| m.modified()) {
        Ok(modified) => modified,
        Err(_) => return false,
    };
    let age = SystemTime::now()
        .duration_since(modified)
        .unwrap_or(Duration::ZERO);
    if age <= stale_after {
        return false;
    }

    match fs::remove_file(path) {
        Ok(()) => {
            log::warn!(
                "Removed stale lock file {} (age {}s)",
                path.display(),
                age.as_secs()
            );
            true
        }
        Err(e) => {
            log::debug!("Failed to remove stale lock {}: {}", path.display(), e);
            false
        }
    }
}
