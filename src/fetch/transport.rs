//! The HTTP seam of the fetcher.
//!
//! [`Transport`] is deliberately tiny: send one conditional request, get back
//! a status, the two freshness headers, and a streaming body. Production code
//! plugs in [`HttpTransport`]; tests plug in scripted fakes.

use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderName, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use std::io::Read;
use std::time::Duration;
use thiserror::Error;

/// Freshness tokens from a previous response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validators {
    /// Entity tag, sent as `If-None-Match`.
    pub etag: String,
    /// Modification time, sent as `If-Modified-Since`.
    pub last_modified: String,
}

impl Validators {
    pub fn new(etag: impl Into<String>, last_modified: impl Into<String>) -> Self {
        Self {
            etag: etag.into(),
            last_modified: last_modified.into(),
        }
    }

    /// Whether neither token is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.etag.is_empty() && self.last_modified.is_empty()
    }

    /// True when both pairs are identical and not both empty.
    #[must_use]
    pub fn matches(&self, other: &Validators) -> bool {
        !self.is_empty() && self == other
    }
}

/// Request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Metadata-only freshness probe.
    Head,
    /// Full retrieval.
    Get,
}

/// One outgoing request.
#[derive(Debug, Clone)]
pub struct ConditionalRequest<'a> {
    pub method: Method,
    pub url: &'a str,
    /// Tokens to send as conditional headers.
    pub validators: Option<&'a Validators>,
    /// Upper bound for the whole exchange, body included.
    pub timeout: Option<Duration>,
}

/// Response head plus a streaming body.
pub struct TransportResponse {
    pub status: u16,
    pub etag: String,
    pub last_modified: String,
    pub content_length: Option<u64>,
    pub body: Box<dyn Read + Send>,
}

impl TransportResponse {
    /// Freshness tokens carried by this response.
    #[must_use]
    pub fn validators(&self) -> Validators {
        Validators::new(self.etag.clone(), self.last_modified.clone())
    }
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("etag", &self.etag)
            .field("last_modified", &self.last_modified)
            .field("content_length", &self.content_length)
            .field("body", &"<stream>")
            .finish()
    }
}

/// A request that produced no HTTP response at all.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection, TLS, timeout, or protocol failure.
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    /// Any other I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Sends conditional requests.
pub trait Transport: Send + Sync {
    /// Perform one request. HTTP error statuses are *responses*, not errors.
    fn send(&self, request: &ConditionalRequest<'_>) -> Result<TransportResponse, TransportError>;
}

/// [`Transport`] backed by a blocking `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Connect timeout for every request.
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Build a client without a whole-request timeout; deadlines are applied
    /// per request from the caller's cancel token so large bodies can stream.
    ///
    /// # Errors
    ///
    /// Fails if the TLS backend cannot be initialized.
    pub fn new() -> Result<Self, TransportError> {
        let client = Client::builder()
            .user_agent(concat!("pkgstats/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Self::CONNECT_TIMEOUT)
            .timeout(None::<Duration>)
            .build()?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: &ConditionalRequest<'_>) -> Result<TransportResponse, TransportError> {
        let mut req = match request.method {
            Method::Head => self.client.head(request.url),
            Method::Get => self.client.get(request.url),
        };
        if let Some(tokens) = request.validators {
            if !tokens.etag.is_empty() {
                req = req.header(IF_NONE_MATCH, tokens.etag.as_str());
            }
            if !tokens.last_modified.is_empty() {
                req = req.header(IF_MODIFIED_SINCE, tokens.last_modified.as_str());
            }
        }
        if let Some(timeout) = request.timeout {
            req = req.timeout(timeout);
        }

        let resp = req.send()?;
        let etag = header_string(&resp, ETAG);
        let last_modified = header_string(&resp, LAST_MODIFIED);
        let content_length = match request.method {
            Method::Head => None,
            Method::Get => resp.content_length(),
        };

        Ok(TransportResponse {
            status: resp.status().as_u16(),
            etag,
            last_modified,
            content_length,
            body: Box::new(resp),
        })
    }
}

fn header_string(resp: &Response, name: HeaderName) -> String {
    resp.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}
