use chrono::{Duration as ChronoDuration, Utc};
use pkgstats::cache::{load, PackageCount};
use pkgstats::clock::FixedClock;
use pkgstats::fetch::{FetchError, Fetcher, HttpTransport, RetryPolicy};
use pkgstats::resolver::{ResolveError, ResolveOptions, Resolver, Source};
use pkgstats::signal::CancelToken;
use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::tempdir;

use super::support::{unreachable_mirror, MockMirror, StalledMirror, SAMPLE_CONTENTS};

fn options(cache_dir: &Path, mirror: &str) -> ResolveOptions {
    ResolveOptions::default()
        .with_cache_dir(cache_dir)
        .with_mirror(mirror)
}

fn resolver_with(options: ResolveOptions, clock: Arc<FixedClock>) -> Resolver {
    let fetcher = Fetcher::new(Arc::new(HttpTransport::new().unwrap()))
        .with_retry(RetryPolicy::default().with_base_backoff(Duration::from_millis(10)));
    Resolver::new(options, fetcher).with_clock(clock)
}

fn resolver(cache_dir: &Path, mirror: &str, clock: Arc<FixedClock>) -> Resolver {
    resolver_with(options(cache_dir, mirror), clock)
}

/// Populate the cache from a healthy mirror at the clock's current time.
fn seed_cache(cache_dir: &Path, clock: &Arc<FixedClock>) {
    let mirror = MockMirror::start("\"v1\"", SAMPLE_CONTENTS);
    resolver(cache_dir, &mirror.base, clock.clone())
        .resolve("amd64", &CancelToken::new())
        .unwrap();
}

#[test]
fn test_cache_lifecycle_against_mirror() {
    let dir = tempdir().unwrap();
    let mirror = MockMirror::start("\"v1\"", SAMPLE_CONTENTS);
    let clock = Arc::new(FixedClock::new(Utc::now()));
    let resolver = resolver(dir.path(), &mirror.base, clock.clone());
    let cancel = CancelToken::new();

    // cold start: one GET, no probe
    let first = resolver.resolve("amd64", &cancel).unwrap();
    assert_eq!(first.source, Source::Fresh);
    assert_eq!(first.items[0], PackageCount::new("admin/pkg1", 2));
    assert_eq!((mirror.heads(), mirror.gets()), (0, 1));

    // inside the trust window: no network at all
    clock.advance(ChronoDuration::minutes(30));
    let second = resolver.resolve("amd64", &cancel).unwrap();
    assert_eq!(second.source, Source::TrustedCache);
    assert_eq!(second.items, first.items);
    assert_eq!((mirror.heads(), mirror.gets()), (0, 1));

    // past the trust window, unchanged remote: one HEAD, no GET
    clock.advance(ChronoDuration::hours(2));
    let third = resolver.resolve("amd64", &cancel).unwrap();
    assert_eq!(third.source, Source::Unchanged);
    assert_eq!(third.captured_at, first.captured_at);
    assert_eq!((mirror.heads(), mirror.gets()), (1, 1));

    // remote changed: HEAD then GET, and the new data is persisted
    mirror.publish("\"v2\"", "usr/bin/new admin/newpkg\n");
    let fourth = resolver.resolve("amd64", &cancel).unwrap();
    assert_eq!(fourth.source, Source::Fresh);
    assert_eq!(fourth.items, vec![PackageCount::new("admin/newpkg", 1)]);
    assert_eq!((mirror.heads(), mirror.gets()), (2, 2));

    let on_disk = load(&dir.path().join("contents-amd64.json"), Duration::from_secs(3600)).unwrap();
    assert_eq!(on_disk.etag, "\"v2\"");
    assert_eq!(on_disk.items, fourth.items);
    assert!(!dir.path().join("contents-amd64.json.lock").exists());
}

#[test]
fn test_unreachable_mirror_serves_stale_cache() {
    let dir = tempdir().unwrap();
    let clock = Arc::new(FixedClock::new(Utc::now()));
    seed_cache(dir.path(), &clock);

    clock.advance(ChronoDuration::hours(3));
    let resolution = resolver(dir.path(), &unreachable_mirror(), clock)
        .resolve("amd64", &CancelToken::new())
        .unwrap();
    assert_eq!(resolution.source, Source::StaleFallback);
    assert_eq!(resolution.items.len(), 3);
}

#[test]
fn test_unreachable_mirror_without_cache_fails() {
    let dir = tempdir().unwrap();
    let err = resolver(dir.path(), &unreachable_mirror(), Arc::new(FixedClock::new(Utc::now())))
        .resolve("amd64", &CancelToken::new())
        .unwrap_err();
    assert!(matches!(err, ResolveError::Fetch(FetchError::Transport { .. })));
    assert!(!err.is_cancelled());
}

#[test]
fn test_not_found_writes_nothing() {
    let dir = tempdir().unwrap();
    let mirror = MockMirror::start("\"v1\"", SAMPLE_CONTENTS);
    let err = resolver(dir.path(), &mirror.base, Arc::new(FixedClock::new(Utc::now())))
        .resolve("s390x", &CancelToken::new())
        .unwrap_err();

    assert!(matches!(err, ResolveError::Fetch(FetchError::NotFound { .. })));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_corrupt_cache_is_replaced() {
    let dir = tempdir().unwrap();
    let record = dir.path().join("contents-amd64.json");
    std::fs::write(&record, "garbage").unwrap();
    let mirror = MockMirror::start("\"v1\"", SAMPLE_CONTENTS);

    let resolution = resolver(dir.path(), &mirror.base, Arc::new(FixedClock::new(Utc::now())))
        .resolve("amd64", &CancelToken::new())
        .unwrap();
    assert_eq!(resolution.source, Source::Fresh);
    assert!(load(&record, Duration::from_secs(3600)).is_ok());
}

#[test]
fn test_concurrent_resolvers_download_once() {
    let dir = tempdir().unwrap();
    let mirror = MockMirror::start("\"v1\"", SAMPLE_CONTENTS);

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let cache_dir = dir.path().to_path_buf();
            let base = mirror.base.clone();
            thread::spawn(move || {
                let fetcher = Fetcher::new(Arc::new(HttpTransport::new().unwrap()));
                let options = ResolveOptions::default()
                    .with_cache_dir(cache_dir)
                    .with_mirror(base);
                Resolver::new(options, fetcher).resolve("amd64", &CancelToken::new())
            })
        })
        .collect();

    let mut sources: Vec<Source> = handles
        .into_iter()
        .map(|h| h.join().unwrap().unwrap().source)
        .collect();
    sources.sort_by_key(|s| *s == Source::TrustedCache);

    assert_eq!(sources, vec![Source::Fresh, Source::TrustedCache]);
    assert_eq!(mirror.gets(), 1);
    assert_eq!(mirror.heads(), 0);
}

#[test]
fn test_cancelled_run_releases_lock() {
    let dir = tempdir().unwrap();
    let mirror = MockMirror::start("\"v1\"", SAMPLE_CONTENTS);
    let cancel = CancelToken::new();
    cancel.cancel();

    let err = resolver(dir.path(), &mirror.base, Arc::new(FixedClock::new(Utc::now())))
        .resolve("amd64", &cancel)
        .unwrap_err();
    assert!(err.is_cancelled());
    assert!(!dir.path().join("contents-amd64.json.lock").exists());
    assert_eq!(mirror.gets(), 0);
}

#[test]
fn test_download_deadline_falls_back_to_stale_cache() {
    let dir = tempdir().unwrap();
    let clock = Arc::new(FixedClock::new(Utc::now()));
    seed_cache(dir.path(), &clock);
    clock.advance(ChronoDuration::hours(3));

    let mirror = StalledMirror::start(false);
    let mut opts = options(dir.path(), &mirror.base);
    opts.download_timeout = Duration::from_secs(1);

    let started = Instant::now();
    let resolution = resolver_with(opts, clock)
        .resolve("amd64", &CancelToken::new())
        .unwrap();
    assert_eq!(resolution.source, Source::StaleFallback);
    assert_eq!(resolution.items[0], PackageCount::new("admin/pkg1", 2));
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[test]
fn test_cancel_during_stalled_body_releases_lock() {
    let dir = tempdir().unwrap();
    let mirror = StalledMirror::start(true);
    let mut opts = options(dir.path(), &mirror.base);
    opts.download_timeout = Duration::ZERO;
    let resolver = resolver_with(opts, Arc::new(FixedClock::new(Utc::now())));

    let cancel = CancelToken::new();
    let (tx, rx) = mpsc::channel();
    let worker = {
        let cancel = cancel.clone();
        thread::spawn(move || {
            tx.send(resolver.resolve("amd64", &cancel)).unwrap();
        })
    };

    // the body is stalled, so nothing finishes on its own
    assert!(rx.recv_timeout(Duration::from_millis(500)).is_err());
    cancel.cancel();

    let err = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("resolve did not return after cancellation")
        .unwrap_err();
    assert!(err.is_cancelled());
    assert!(!dir.path().join("contents-amd64.json.lock").exists());
    worker.join().unwrap();
}

#[test]
fn test_unwritable_record_still_serves_download() {
    let dir = tempdir().unwrap();
    let record = dir.path().join("contents-amd64.json");
    std::fs::create_dir(&record).unwrap();
    std::fs::write(record.join("occupant"), "x").unwrap();
    let mirror = MockMirror::start("\"v1\"", SAMPLE_CONTENTS);

    let resolution = resolver(dir.path(), &mirror.base, Arc::new(FixedClock::new(Utc::now())))
        .resolve("amd64", &CancelToken::new())
        .unwrap();
    assert_eq!(resolution.source, Source::Fresh);
    assert_eq!(resolution.items.len(), 3);
    assert_eq!(resolution.items[0], PackageCount::new("admin/pkg1", 2));
    assert!(record.is_dir());
    assert!(!dir.path().join("contents-amd64.json.lock").exists());
}
