//! Signal handling and cooperative cancellation.
//!
//! Ctrl+C (and SIGTERM/SIGHUP via the `termination` feature) flips a shared
//! `AtomicBool`. Long-running work never observes the signal directly; it is
//! handed a [`CancelToken`] that wraps the flag together with an optional
//! deadline, and polls it at its own suspension points: while waiting for the
//! cache lock, between retry backoffs, and every few lines of the body scan.
//!
//! # Usage
//!
//! ```rust,no_run
//! use pkgstats::signal::install_handler;
//! use std::time::Duration;
//!
//! let handler = install_handler().expect("Failed to install signal handler");
//! let token = handler.token();
//!
//! // A child token that additionally expires after ten minutes.
//! let download = token.with_timeout(Duration::from_secs(600));
//! if download.check().is_err() {
//!     return;
//! }
//! ```
//!
//! # Exit Codes
//!
//! When a signal is received the flag is set, "Interrupted. Cleaning up..." is
//! printed to stderr, and the application exits with code 130 once the
//! in-flight operation has released its lock.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

/// Upper bound on a single uninterrupted sleep inside [`CancelToken::sleep`].
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Why an operation stopped before completing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Interrupt {
    /// The user (or a caller) requested shutdown.
    #[error("operation cancelled")]
    Cancelled,
    /// The token's deadline passed.
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

/// Centralized shutdown handler for graceful application termination.
///
/// `ShutdownHandler` is `Send` and `Sync`; clones share the same flag.
#[derive(Debug, Clone)]
pub struct ShutdownHandler {
    flag: Arc<AtomicBool>,
}

impl ShutdownHandler {
    /// Create a new shutdown handler with the flag initially set to `false`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Check if shutdown has been requested.
    #[must_use]
    pub fn is_shutdown_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Manually request a shutdown.
    pub fn request_shutdown(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Get a clone of the shutdown flag.
    #[must_use]
    pub fn get_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }

    /// A cancellation token without a deadline, tied to this handler's flag.
    #[must_use]
    pub fn token(&self) -> CancelToken {
        CancelToken::from_flag(self.get_flag())
    }

    /// Reset the shutdown flag to `false`.
    ///
    /// This is primarily useful for testing scenarios where you want to
    /// reuse a handler.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

impl Default for ShutdownHandler {
    fn default() -> Self {
        Self::new()
    }
}

/// Cooperative cancellation signal with an optional deadline.
///
/// Cloning is cheap; clones observe the same flag. Child tokens created with
/// [`CancelToken::with_timeout`] share the flag and never extend the parent's
/// deadline.
#[derive(Debug, Clone)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    /// A fresh token that is never cancelled unless [`CancelToken::cancel`] is called.
    #[must_use]
    pub fn new() -> Self {
        Self::from_flag(Arc::new(AtomicBool::new(false)))
    }

    /// Wrap an existing shutdown flag.
    #[must_use]
    pub fn from_flag(flag: Arc<AtomicBool>) -> Self {
        Self {
            flag,
            deadline: None,
        }
    }

    /// Derive a token that also expires after `timeout`.
    ///
    /// A zero timeout means unbounded: the child inherits the parent's
    /// deadline (if any) unchanged.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        if timeout.is_zero() {
            return self.clone();
        }
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        };
        Self {
            flag: Arc::clone(&self.flag),
            deadline: Some(deadline),
        }
    }

    /// Request cancellation of this token and every clone of it.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Whether the deadline (if any) has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// The configured deadline, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left until the deadline. `None` means unbounded.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Fail if the token was cancelled or its deadline passed.
    ///
    /// Cancellation wins over expiry when both hold.
    pub fn check(&self) -> Result<(), Interrupt> {
        if self.is_cancelled() {
            Err(Interrupt::Cancelled)
        } else if self.is_expired() {
            Err(Interrupt::DeadlineExceeded)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration`, waking early if the token is interrupted.
    ///
    /// Returns `Err` as soon as an interruption is observed; a sleep that would
    /// outlast the deadline fails when the deadline is reached rather than
    /// after the full duration.
    pub fn sleep(&self, duration: Duration) -> Result<(), Interrupt> {
        let until = Instant::now() + duration;
        loop {
            self.check()?;
            let now = Instant::now();
            if now >= until {
                return Ok(());
            }
            let mut slice = (until - now).min(SLEEP_SLICE);
            if let Some(left) = self.remaining() {
                slice = slice.min(left.max(Duration::from_millis(1)));
            }
            std::thread::sleep(slice);
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Error type for signal handler installation.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    /// Failed to install the Ctrl+C handler.
    #[error("Failed to install signal handler: {0}")]
    InstallFailed(#[from] ctrlc::Error),
}

static GLOBAL_HANDLER: OnceLock<ShutdownHandler> = OnceLock::new();

/// Install a Ctrl+C handler that sets the shutdown flag on interrupt.
///
/// If a handler is already installed (e.g. in tests), the existing one is
/// reset and returned, so repeated calls to `run_app()` in one process work.
///
/// # Errors
///
/// Never fails in practice: when the ctrlc hook cannot be registered an
/// unhooked handler is returned that still honours `request_shutdown()`.
pub fn install_handler() -> Result<ShutdownHandler, SignalError> {
    if let Some(handler) = GLOBAL_HANDLER.get() {
        handler.reset();
        return Ok(handler.clone());
    }

    let handler = ShutdownHandler::new();
    let flag = handler.get_flag();

    match ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);

        // stderr is line-buffered, so flush explicitly
        let _ = writeln!(std::io::stderr(), "\nInterrupted. Cleaning up...");
        let _ = std::io::stderr().flush();

        log::info!("Shutdown signal received");
    }) {
        Ok(()) => {
            let _ = GLOBAL_HANDLER.set(handler.clone());
            Ok(handler)
        }
        Err(_) => {
            if let Some(handler) = GLOBAL_HANDLER.get() {
                handler.reset();
                Ok(handler.clone())
            } else {
                log::debug!("Ctrl+C handler already registered, using unhooked handler");
                let fallback = ShutdownHandler::new();
                let _ = GLOBAL_HANDLER.set(fallback.clone());
                Ok(fallback)
            }
        }
    }
}
