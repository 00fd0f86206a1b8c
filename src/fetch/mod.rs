//! Conditional HTTP retrieval of Debian Contents indices.
//!
//! # Overview
//!
//! - [`transport`] - the `Transport` port and its `reqwest` implementation
//! - [`retry`] - retry budget and exponential backoff
//! - [`body`] - streaming gunzip and line aggregation
//! - [`client`] - the [`Fetcher`] that runs probes and retried fetches
//!
//! # Example
//!
//! ```no_run
//! use pkgstats::fetch::{contents_url, Fetcher, HttpTransport};
//! use pkgstats::signal::CancelToken;
//! use std::sync::Arc;
//!
//! let fetcher = Fetcher::new(Arc::new(HttpTransport::new()?));
//! let url = contents_url("http://deb.debian.org/debian", "stable", "amd64");
//! let outcome = fetcher.fetch_with_retry(&url, None, &CancelToken::new())?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod body;
pub mod client;
pub mod retry;
pub mod transport;

pub use crate::progress::{NoProgress, ProgressSink};
pub use body::{scan_contents, CancellableReader, ProgressReader, CANCEL_CHECK_INTERVAL, MAX_LINE_BYTES};
pub use client::{FetchError, FetchOutcome, FetchedData, Fetcher, ProbeResult};
pub use retry::{BackoffPolicy, RetryPolicy};
pub use transport::{
    ConditionalRequest, HttpTransport, Method, Transport, TransportError, TransportResponse, Validators,
};

/// URL of the Contents index for `arch` in the `main` component of `suite`.
///
/// # Examples
///
/// ```
/// use pkgstats::fetch::contents_url;
///
/// assert_eq!(
///     contents_url("http://ftp.uk.debian.org/debian/", "stable", "amd64"),
///     "http://ftp.uk.debian.org/debian/dists/stable/main/Contents-amd64.gz"
/// );
/// ```
#[must_use]
pub fn contents_url(mirror: &str, suite: &str, arch: &str) -> String {
    format!(
        "{}/dists/{}/main/Contents-{}.gz",
        mirror.trim_end_matches('/'),
        suite,
        arch
    )
}
