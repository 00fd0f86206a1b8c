//! The resolve decision procedure as a pure transition table.
//!
//! The orchestrator owns all I/O. It performs the [`Action`] returned by
//! [`transition`], observes what happened, and feeds the result back in as
//! the next [`Event`]:
//!
//! ```text
//! Idle -> LockAcquired -> CacheTrustedFresh                   -> Done
//!                      -> Probing -> Unchanged                -> Done
//!                      -> Probing -> Fetching -> Persisting   -> Done
//!                                             -> FallbackToStale -> Done
//!                                             -> Failed
//! ```

use serde::Serialize;
use std::fmt;

/// Where the served items came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// Cache young enough to skip the network entirely.
    TrustedCache,
    /// Cache confirmed current by the remote.
    Unchanged,
    /// Freshly downloaded.
    Fresh,
    /// Old data served because the download failed.
    StaleFallback,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Source::TrustedCache => "cache",
            Source::Unchanged => "cache (revalidated)",
            Source::Fresh => "download",
            Source::StaleFallback => "stale cache",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    LockAcquired,
    CacheTrustedFresh,
    Probing,
    Unchanged,
    Fetching,
    Persisting,
    FallbackToStale,
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Begin,
    LockGranted,
    LockDenied,
    /// `cached`: a current (non-expired) record was loaded.
    /// `trusted`: it is inside the trust window.
    CacheChecked { cached: bool, trusted: bool },
    ProbeUnchanged,
    ProbeChanged,
    ProbeInconclusive,
    FetchSucceeded,
    FetchNotModified,
    /// `stale_available`: some older record can stand in.
    /// `fallback_allowed`: the failure is one that may be papered over.
    FetchFailed { stale_available: bool, fallback_allowed: bool },
    PersistFinished,
    /// The items chosen by a `Serve` action were handed over.
    Served,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    AcquireLock,
    LoadCache,
    Probe,
    Fetch,
    Persist,
    Serve(Source),
    /// Release the lock and return the result.
    Release,
    /// Release the lock and return the recorded error.
    Abort,
}

/// Advance the machine by one step.
///
/// Any combination not listed is a logic error and lands in
/// [`Phase::Failed`] with [`Action::Abort`].
#[must_use]
pub fn transition(phase: Phase, event: Event) -> (Phase, Action) {
    use Action as A;
    use Event as E;
    use Phase as P;

    match (phase, event) {
        (P::Idle, E::Begin) => (P::Idle, A::AcquireLock),
        (P::Idle, E::LockGranted) => (P::LockAcquired, A::LoadCache),
        (P::Idle, E::LockDenied) => (P::Failed, A::Abort),

        (P::LockAcquired, E::CacheChecked { cached: true, trusted: true }) => {
            (P::CacheTrustedFresh, A::Serve(Source::TrustedCache))
        }
        (P::LockAcquired, E::CacheChecked { cached: true, trusted: false }) => (P::Probing, A::Probe),
        // nothing a probe could confirm
        (P::LockAcquired, E::CacheChecked { cached: false, .. }) => (P::Fetching, A::Fetch),

        (P::Probing, E::ProbeUnchanged) => (P::Unchanged, A::Serve(Source::Unchanged)),
        (P::Probing, E::ProbeChanged | E::ProbeInconclusive) => (P::Fetching, A::Fetch),

        (P::Fetching, E::FetchSucceeded) => (P::Persisting, A::Persist),
        (P::Fetching, E::FetchNotModified) => (P::Unchanged, A::Serve(Source::Unchanged)),
        (
            P::Fetching,
            E::FetchFailed {
                stale_available: true,
                fallback_allowed: true,
            },
        ) => (P::FallbackToStale, A::Serve(Source::StaleFallback)),
        (P::Fetching, E::FetchFailed { .. }) => (P::Failed, A::Abort),

        (P::Persisting, E::PersistFinished) => (P::Persisting, A::Serve(Source::Fresh)),

        (P::CacheTrustedFresh | P::Unchanged | P::FallbackToStale | P::Persisting, E::Served) => {
            (P::Done, A::Release)
        }

        _ => (P::Failed, A::Abort),
    }
}
