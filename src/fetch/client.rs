//! Probe-then-fetch protocol over a [`Transport`].

use bytesize::ByteSize;
use std::sync::Arc;
use thiserror::Error;

use super::body::{scan_contents, CancellableReader, ProgressReader};
use super::retry::{BackoffPolicy, RetryPolicy};
use super::transport::{ConditionalRequest, Method, Transport, TransportError, TransportResponse, Validators};
use crate::cache::PackageCount;
use crate::progress::{NoProgress, ProgressSink};
use crate::signal::{CancelToken, Interrupt};

/// Errors that end a fetch without usable data.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The remote answered 404 or 410.
    #[error("Contents index not found at {url}")]
    NotFound { url: String },

    /// Any other non-success status.
    #[error("Unexpected HTTP status {status} from {url}")]
    HttpStatus { status: u16, url: String },

    /// The remote said "not modified" but there is nothing cached to reuse.
    #[error("Server reported {url} as not modified but no cached copy exists")]
    NotModifiedWithoutCache { url: String },

    /// Every attempt failed below the HTTP layer.
    #[error("Request to {url} failed after {attempts} attempt(s): {source}")]
    Transport {
        url: String,
        attempts: usize,
        #[source]
        source: TransportError,
    },

    /// The body could not be read or decompressed.
    #[error("Failed to read Contents body: {0}")]
    Body(#[source] std::io::Error),

    /// Cancelled or out of time.
    #[error("Fetch interrupted: {0}")]
    Interrupted(#[from] Interrupt),
}

impl FetchError {
    /// Whether the user asked to stop, as opposed to a deadline or failure.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Interrupted(Interrupt::Cancelled))
    }
}

/// Outcome of a metadata-only freshness probe. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeResult {
    /// The remote copy matches the prior tokens.
    Unchanged,
    /// The remote copy differs; carries the tokens it advertised.
    Changed(Validators),
    /// The probe could not decide; carries a short reason for the log.
    Inconclusive(String),
}

/// A freshly downloaded and aggregated index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedData {
    /// Package counts, already sorted.
    pub items: Vec<PackageCount>,
    /// Tokens from the response that delivered `items`.
    pub validators: Validators,
}

/// Result of a full fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Fresh(FetchedData),
    /// The server confirmed the prior copy is still current.
    NotModified,
}

/// Runs probes and retried fetches against one transport.
#[derive(Clone)]
pub struct Fetcher {
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
    progress: Arc<dyn ProgressSink>,
}

impl Fetcher {
    /// A fetcher with the default retry policy and no progress reporting.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            retry: RetryPolicy::default(),
            progress: Arc::new(NoProgress),
        }
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Ask whether `url` still matches `prior` without downloading it.
    ///
    /// A 304, or a success whose tokens equal `prior`, is
    /// [`ProbeResult::Unchanged`]. Other 2xx/3xx responses are
    /// [`ProbeResult::Changed`]. Errors, interruptions and other statuses
    /// are [`ProbeResult::Inconclusive`].
    pub fn probe(&self, url: &str, prior: Option<&Validators>, cancel: &CancelToken) -> ProbeResult {
        if let Err(interrupt) = cancel.check() {
            return ProbeResult::Inconclusive(interrupt.to_string());
        }

        let request = ConditionalRequest {
            method: Method::Head,
            url,
            validators: prior,
            timeout: cancel.remaining(),
        };
        let response = match self.transport.send(&request) {
            Ok(response) => response,
            Err(e) => {
                log::debug!("Probe of {} failed: {}", url, e);
                return ProbeResult::Inconclusive(e.to_string());
            }
        };

        let returned = response.validators();
        match response.status {
            304 => ProbeResult::Unchanged,
            200..=399 if prior.is_some_and(|p| p.matches(&returned)) => ProbeResult::Unchanged,
            200..=399 => ProbeResult::Changed(returned),
            status => {
                log::debug!("Probe of {} returned HTTP {}", url, status);
                ProbeResult::Inconclusive(format!("HTTP {status}"))
            }
        }
    }

    /// Download and aggregate `url`, retrying transport failures.
    ///
    /// Only failures below the HTTP layer are retried; every HTTP status is
    /// final. Backoff waits wake early on cancellation.
    ///
    /// # Errors
    ///
    /// See [`FetchError`].
    pub fn fetch_with_retry(
        &self,
        url: &str,
        prior: Option<&Validators>,
        cancel: &CancelToken,
    ) -> Result<FetchOutcome, FetchError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            cancel.check()?;

            let request = ConditionalRequest {
                method: Method::Get,
                url,
                validators: prior,
                timeout: cancel.remaining(),
            };

            match self.transport.send(&request) {
                Ok(response) => return self.handle_response(url, response, prior, cancel),
                Err(source) => {
                    attempt += 1;
                    // a deadline that fires mid-request surfaces as a transport error
                    cancel.check()?;
                    if attempt >= max_attempts {
                        return Err(FetchError::Transport {
                            url: url.to_string(),
                            attempts: attempt,
                            source,
                        });
                    }
                    let delay = self.retry.delay_for_attempt(attempt - 1);
                    log::warn!(
                        "Download attempt {}/{} failed: {}. Retrying in {:?}",
                        attempt,
                        max_attempts,
                        source,
                        delay
                    );
                    cancel.sleep(delay)?;
                }
            }
        }
    }

    fn handle_response(
        &self,
        url: &str,
        response: TransportResponse,
        prior: Option<&Validators>,
        cancel: &CancelToken,
    ) -> Result<FetchOutcome, FetchError> {
        match response.status {
            200..=299 => self.read_body(response, cancel),
            304 if prior.is_some() => {
                log::info!("Server reports {} unchanged", url);
                Ok(FetchOutcome::NotModified)
            }
            304 => Err(FetchError::NotModifiedWithoutCache {
                url: url.to_string(),
            }),
            404 | 410 => Err(FetchError::NotFound {
                url: url.to_string(),
            }),
            status => Err(FetchError::HttpStatus {
                status,
                url: url.to_string(),
            }),
        }
    }

    fn read_body(&self, response: TransportResponse, cancel: &CancelToken) -> Result<FetchOutcome, FetchError> {
        let validators = response.validators();
        let body = CancellableReader::spawn(response.body, cancel.clone()).map_err(FetchError::Body)?;
        self.progress.on_start(response.content_length);

        let mut reader = ProgressReader::new(body, self.progress.as_ref());
        let scanned = scan_contents(&mut reader, cancel);
        let transferred = reader.transferred();
        self.progress.on_finish(scanned.is_ok());

        let items = scanned?;
        log::info!(
            "Downloaded {} ({} packages)",
            ByteSize::b(transferred),
            items.len()
        );
        Ok(FetchOutcome::Fresh(FetchedData { items, validators }))
    }
}

impl std::fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetcher").field("retry", &self.retry).finish_non_exhaustive()
    }
}
