//! Drives [`transition`] against the real cache, lock and fetcher.

use chrono::{DateTime, Utc};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::machine::{transition, Action, Event, Phase, Source};
use super::ResolveError;
use crate::cache::{
    cleanup_stale, load_as_of, save, validate_dataset_key, CacheError, CacheLock, CachePaths, CacheRecord,
    PackageCount, DEFAULT_LOCK_TIMEOUT, DEFAULT_STALE_AFTER,
};
use crate::clock::{Clock, SystemClock};
use crate::fetch::{contents_url, FetchOutcome, FetchedData, Fetcher, ProbeResult, Validators};
use crate::signal::{CancelToken, Interrupt};

/// Debian mirror used when none is configured.
pub const DEFAULT_MIRROR: &str = "http://ftp.uk.debian.org/debian";

/// Suite used when none is configured.
pub const DEFAULT_SUITE: &str = "stable";

/// Knobs for one [`Resolver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Directory holding records and lock markers.
    pub cache_dir: PathBuf,
    /// Records older than this are expired and only used as a fallback.
    pub cache_ttl: Duration,
    /// Records younger than this are served without contacting the mirror.
    pub trust_window: Duration,
    /// Ignore any cached record and download.
    pub force_refresh: bool,
    /// Deadline for probe plus download. Zero means unbounded.
    pub download_timeout: Duration,
    /// How long to wait for another process holding the lock.
    pub lock_timeout: Duration,
    /// Age after which an abandoned lock marker is removed.
    pub lock_stale_after: Duration,
    pub mirror: String,
    pub suite: String,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            cache_dir: std::env::temp_dir().join("pkgstats"),
            cache_ttl: Duration::from_secs(24 * 60 * 60),
            trust_window: Duration::from_secs(60 * 60),
            force_refresh: false,
            download_timeout: Duration::from_secs(10 * 60),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            lock_stale_after: DEFAULT_STALE_AFTER,
            mirror: DEFAULT_MIRROR.to_string(),
            suite: DEFAULT_SUITE.to_string(),
        }
    }
}

impl ResolveOptions {
    #[must_use]
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    #[must_use]
    pub fn with_mirror(mut self, mirror: impl Into<String>) -> Self {
        self.mirror = mirror.into();
        self
    }

    #[must_use]
    pub fn with_force_refresh(mut self, force: bool) -> Self {
        self.force_refresh = force;
        self
    }
}

/// Package statistics handed back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub dataset: String,
    /// Sorted by count descending.
    pub items: Vec<PackageCount>,
    pub source: Source,
    /// When `items` were computed, which predates now for cached sources.
    pub captured_at: DateTime<Utc>,
}

/// Resolves datasets against the local cache and a Debian mirror.
pub struct Resolver {
    options: ResolveOptions,
    fetcher: Fetcher,
    clock: Arc<dyn Clock>,
}

/// Per-call state threaded through the actions.
struct Run<'a> {
    dataset: &'a str,
    paths: CachePaths,
    url: String,
    cancel: &'a CancelToken,
    /// Bounds probe plus download; created on first network use.
    network: Option<CancelToken>,
    lock: Option<CacheLock>,
    /// Loaded record within the TTL.
    current: Option<CacheRecord>,
    /// Expired record kept in case the download fails.
    expired: Option<CacheRecord>,
    fresh: Option<CacheRecord>,
    served: Option<Source>,
    error: Option<ResolveError>,
}

impl Run<'_> {
    fn network_token(&mut self, timeout: Duration) -> CancelToken {
        let cancel = self.cancel;
        self.network
            .get_or_insert_with(|| cancel.with_timeout(timeout))
            .clone()
    }

    fn release(&mut self) {
        if let Some(lock) = self.lock.take() {
            lock.release();
        }
    }

    fn into_resolution(self) -> Result<Resolution, ResolveError> {
        let source = self
            .served
            .ok_or_else(|| ResolveError::Internal("finished without choosing a source".to_string()))?;
        let record = match source {
            Source::TrustedCache | Source::Unchanged => self.current,
            Source::Fresh => self.fresh,
            Source::StaleFallback => self.current.or(self.expired),
        }
        .ok_or_else(|| ResolveError::Internal(format!("no record available for source '{source}'")))?;

        Ok(Resolution {
            dataset: self.dataset.to_string(),
            items: record.items,
            source,
            captured_at: record.captured_at,
        })
    }
}

impl Resolver {
    /// A resolver on the system clock.
    #[must_use]
    pub fn new(options: ResolveOptions, fetcher: Fetcher) -> Self {
        Self {
            options,
            fetcher,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the clock used for cache ages.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn options(&self) -> &ResolveOptions {
        &self.options
    }

    /// The Contents URL for `dataset` under the configured mirror and suite.
    #[must_use]
    pub fn url_for(&self, dataset: &str) -> String {
        contents_url(&self.options.mirror, &self.options.suite, dataset)
    }

    /// Produce package statistics for `dataset` (an architecture name).
    ///
    /// Holds the dataset's cross-process lock for the whole call and
    /// releases it on every path out.
    ///
    /// # Errors
    ///
    /// Fails on an invalid key, an unusable cache directory, lock timeout or
    /// I/O failure, and fetch failures for which no older data exists.
    /// Cancellation is reported even when older data exists.
    pub fn resolve(&self, dataset: &str, cancel: &CancelToken) -> Result<Resolution, ResolveError> {
        validate_dataset_key(dataset).map_err(|reason| ResolveError::InvalidDataset {
            dataset: dataset.to_string(),
            reason,
        })?;
        fs::create_dir_all(&self.options.cache_dir).map_err(|source| ResolveError::CacheDir {
            path: self.options.cache_dir.clone(),
            source,
        })?;

        let mut run = Run {
            dataset,
            paths: CachePaths::for_dataset(&self.options.cache_dir, dataset),
            url: self.url_for(dataset),
            cancel,
            network: None,
            lock: None,
            current: None,
            expired: None,
            fresh: None,
            served: None,
            error: None,
        };

        let mut phase = Phase::Idle;
        let mut event = Event::Begin;
        loop {
            let (next, action) = transition(phase, event);
            log::trace!("{:?} + {:?} -> {:?}, {:?}", phase, event, next, action);
            phase = next;

            event = match action {
                Action::AcquireLock => self.acquire_lock(&mut run),
                Action::LoadCache => self.load_cache(&mut run),
                Action::Probe => self.probe(&mut run),
                Action::Fetch => self.fetch(&mut run),
                Action::Persist => self.persist(&mut run),
                Action::Serve(source) => {
                    run.served = Some(source);
                    Event::Served
                }
                Action::Release => {
                    run.release();
                    return run.into_resolution();
                }
                Action::Abort => {
                    run.release();
                    return Err(run.error.take().unwrap_or_else(|| {
                        ResolveError::Internal(format!("no transition from {phase:?} on {event:?}"))
                    }));
                }
            };
        }
    }

    fn acquire_lock(&self, run: &mut Run<'_>) -> Event {
        cleanup_stale(&run.paths.lock, self.options.lock_stale_after);
        match CacheLock::acquire(&run.paths.lock, self.options.lock_timeout, run.cancel) {
            Ok(lock) => {
                run.lock = Some(lock);
                Event::LockGranted
            }
            Err(e) => {
                run.error = Some(e.into());
                Event::LockDenied
            }
        }
    }

    fn load_cache(&self, run: &mut Run<'_>) -> Event {
        let miss = Event::CacheChecked {
            cached: false,
            trusted: false,
        };
        if self.options.force_refresh {
            log::info!("Force refresh requested, ignoring cached data");
            return miss;
        }

        let now = self.clock.now();
        match load_as_of(&run.paths.record, self.options.cache_ttl, now) {
            Ok(record) => {
                let age = record.age(now);
                let trusted = age < self.options.trust_window;
                log::debug!(
                    "Loaded cache for {} ({} packages, {}s old)",
                    run.dataset,
                    record.items.len(),
                    age.as_secs()
                );
                run.current = Some(record);
                Event::CacheChecked { cached: true, trusted }
            }
            Err(CacheError::Expired { age, record }) => {
                log::info!("Cached data for {} is {}s old, refreshing", run.dataset, age.as_secs());
                run.expired = Some(*record);
                miss
            }
            Err(CacheError::NotFound { .. }) => {
                log::debug!("No cached data for {}", run.dataset);
                miss
            }
            Err(e) => {
                log::warn!("{}", e);
                miss
            }
        }
    }

    fn probe(&self, run: &mut Run<'_>) -> Event {
        let token = run.network_token(self.options.download_timeout);
        let prior = run.current.as_ref().and_then(validators_of);
        match self.fetcher.probe(&run.url, prior.as_ref(), &token) {
            ProbeResult::Unchanged => {
                log::info!("Remote Contents for {} unchanged, using cache", run.dataset);
                Event::ProbeUnchanged
            }
            ProbeResult::Changed(_) => {
                log::info!("Remote Contents for {} changed, downloading", run.dataset);
                Event::ProbeChanged
            }
            ProbeResult::Inconclusive(reason) => {
                log::debug!("Freshness probe inconclusive ({}), downloading", reason);
                Event::ProbeInconclusive
            }
        }
    }

    fn fetch(&self, run: &mut Run<'_>) -> Event {
        let token = run.network_token(self.options.download_timeout);
        let prior = run.current.as_ref().and_then(validators_of);
        log::info!("Downloading {}", run.url);

        match self.fetcher.fetch_with_retry(&run.url, prior.as_ref(), &token) {
            Ok(FetchOutcome::Fresh(FetchedData { items, validators })) => {
                run.fresh = Some(CacheRecord::new(
                    run.dataset,
                    items,
                    validators.etag,
                    validators.last_modified,
                    run.url.clone(),
                    self.clock.now(),
                ));
                Event::FetchSucceeded
            }
            Ok(FetchOutcome::NotModified) => Event::FetchNotModified,
            Err(e) => {
                // only the user's own interrupt is final; a deadline may fall back
                let fallback_allowed = !matches!(run.cancel.check(), Err(Interrupt::Cancelled)) && !e.is_cancelled();
                let stale_available = run.current.is_some() || run.expired.is_some();
                if stale_available && fallback_allowed {
                    log::warn!("Download failed ({}), serving stale data", e);
                }
                run.error = Some(e.into());
                Event::FetchFailed {
                    stale_available,
                    fallback_allowed,
                }
            }
        }
    }

    fn persist(&self, run: &mut Run<'_>) -> Event {
        if let Some(record) = run.fresh.as_mut() {
            match save(&run.paths.record, record) {
                Ok(()) => log::debug!("Saved cache {}", run.paths.record.display()),
                Err(e) => log::warn!("Failed to save cache: {}", e),
            }
        }
        Event::PersistFinished
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("options", &self.options)
            .field("fetcher", &self.fetcher)
            .finish_non_exhaustive()
    }
}

/// Conditional tokens to send for `record`; none when it recorded no tokens.
fn validators_of(record: &CacheRecord) -> Option<Validators> {
    record
        .has_validators()
        .then(|| Validators::new(record.etag.clone(), record.last_modified.clone()))
}
