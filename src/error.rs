//! Structured error handling and exit codes.

use serde::Serialize;

use crate::cache::LockError;
use crate::fetch::FetchError;
use crate::resolver::ResolveError;

/// Exit codes for pkgstats.
///
/// - 0: Success
/// - 1: General error (unexpected failure, HTTP error, no data)
/// - 2: The mirror has no Contents index for the requested architecture
/// - 3: Another process held the cache lock for too long
/// - 130: Interrupted by user (Ctrl+C)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitCode {
    /// Statistics were printed.
    Success = 0,
    /// General error: An unexpected error occurred.
    GeneralError = 1,
    /// The remote index does not exist.
    NotFound = 2,
    /// The cache lock could not be acquired in time.
    LockBusy = 3,
    /// Interrupted: the run was cancelled by the user (Ctrl+C).
    /// Unix convention: 128 + SIGINT (2).
    Interrupted = 130,
}

impl ExitCode {
    /// Get the numeric exit code.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Get the machine-readable code prefix.
    #[must_use]
    pub fn code_prefix(self) -> &'static str {
        match self {
            Self::Success => "PS000",
            Self::GeneralError => "PS001",
            Self::NotFound => "PS002",
            Self::LockBusy => "PS003",
            Self::Interrupted => "PS130",
        }
    }

    /// Pick the exit code for an error surfaced from `run_app`.
    #[must_use]
    pub fn for_error(err: &anyhow::Error) -> Self {
        match err.downcast_ref::<ResolveError>() {
            Some(e) if e.is_cancelled() => Self::Interrupted,
            Some(ResolveError::Lock(LockError::Timeout { .. })) => Self::LockBusy,
            Some(ResolveError::Fetch(FetchError::NotFound { .. })) => Self::NotFound,
            _ => Self::GeneralError,
        }
    }
}

/// Structured error information for JSON output.
#[derive(Debug, Serialize)]
pub struct StructuredError {
    /// The error code (e.g., "PS001")
    pub code: String,
    /// The exit code number
    pub exit_code: i32,
    /// Human-readable error message, including its causes
    pub message: String,
    /// Whether the operation was interrupted
    pub interrupted: bool,
}

impl StructuredError {
    /// Create a new structured error from an anyhow error and an exit code.
    #[must_use]
    pub fn new(err: &anyhow::Error, exit_code: ExitCode) -> Self {
        Self {
            code: exit_code.code_prefix().to_string(),
            exit_code: exit_code.as_i32(),
            message: format!("{err:#}"),
            interrupted: exit_code == ExitCode::Interrupted,
        }
    }
}
