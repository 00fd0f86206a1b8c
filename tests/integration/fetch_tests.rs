use pkgstats::cache::PackageCount;
use pkgstats::fetch::{
    FetchError, FetchOutcome, Fetcher, HttpTransport, ProbeResult, RetryPolicy, Validators,
};
use pkgstats::signal::CancelToken;
use std::sync::Arc;
use std::time::Duration;

use super::support::{unreachable_mirror, MockMirror, SAMPLE_CONTENTS};

fn fetcher() -> Fetcher {
    Fetcher::new(Arc::new(HttpTransport::new().unwrap()))
        .with_retry(RetryPolicy::default().with_base_backoff(Duration::from_millis(10)))
}

#[test]
fn test_full_fetch_over_http() {
    let mirror = MockMirror::start("\"v1\"", SAMPLE_CONTENTS);
    let outcome = fetcher()
        .fetch_with_retry(&mirror.url(), None, &CancelToken::new())
        .unwrap();

    let FetchOutcome::Fresh(data) = outcome else {
        panic!("expected fresh data");
    };
    assert_eq!(data.validators.etag, "\"v1\"");
    assert_eq!(
        data.items,
        vec![
            PackageCount::new("admin/pkg1", 2),
            PackageCount::new("utils/pkg2", 1),
            PackageCount::new("doc/pkg3", 1),
        ]
    );
    assert_eq!(mirror.gets(), 1);
}

#[test]
fn test_conditional_get_returns_not_modified() {
    let mirror = MockMirror::start("\"v1\"", SAMPLE_CONTENTS);
    let prior = Validators::new("\"v1\"", "");
    let outcome = fetcher()
        .fetch_with_retry(&mirror.url(), Some(&prior), &CancelToken::new())
        .unwrap();
    assert_eq!(outcome, FetchOutcome::NotModified);
}

#[test]
fn test_probe_sends_if_none_match() {
    let mirror = MockMirror::start("\"v1\"", SAMPLE_CONTENTS);
    let fetcher = fetcher();
    let cancel = CancelToken::new();

    let same = Validators::new("\"v1\"", "");
    assert_eq!(fetcher.probe(&mirror.url(), Some(&same), &cancel), ProbeResult::Unchanged);

    mirror.publish("\"v2\"", SAMPLE_CONTENTS);
    assert_eq!(
        fetcher.probe(&mirror.url(), Some(&same), &cancel),
        ProbeResult::Changed(Validators::new("\"v2\"", ""))
    );
    assert_eq!(mirror.heads(), 2);
    assert_eq!(mirror.gets(), 0);
}

#[test]
fn test_missing_architecture_is_not_found() {
    let mirror = MockMirror::start("\"v1\"", SAMPLE_CONTENTS);
    let url = format!("{}/dists/stable/main/Contents-nosuch.gz", mirror.base);
    let result = fetcher().fetch_with_retry(&url, None, &CancelToken::new());
    assert!(matches!(result, Err(FetchError::NotFound { .. })));
    assert_eq!(mirror.gets(), 1);
}

#[test]
fn test_server_error_is_not_retried() {
    let mirror = MockMirror::start("\"v1\"", SAMPLE_CONTENTS);
    mirror.fail_with(503);
    let result = fetcher().fetch_with_retry(&mirror.url(), None, &CancelToken::new());
    assert!(matches!(result, Err(FetchError::HttpStatus { status: 503, .. })));
    assert_eq!(mirror.gets(), 1);
}

#[test]
fn test_unreachable_mirror_exhausts_retries() {
    let url = format!("{}/dists/stable/main/Contents-amd64.gz", unreachable_mirror());
    let result = fetcher().fetch_with_retry(&url, None, &CancelToken::new());
    assert!(matches!(result, Err(FetchError::Transport { attempts: 3, .. })));
}

#[test]
fn test_probe_of_unreachable_mirror_is_inconclusive() {
    let url = format!("{}/dists/stable/main/Contents-amd64.gz", unreachable_mirror());
    let prior = Validators::new("\"v1\"", "");
    let result = fetcher().probe(&url, Some(&prior), &CancelToken::new());
    assert!(matches!(result, ProbeResult::Inconclusive(_)));
}
