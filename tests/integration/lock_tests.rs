use filetime::{set_file_mtime, FileTime};
use pkgstats::cache::{cleanup_stale, CacheLock, LockError};
use pkgstats::signal::CancelToken;
use std::fs;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant, SystemTime};
use tempfile::tempdir;

#[test]
fn test_second_acquirer_waits_for_release() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("contents-amd64.json.lock");

    let first = CacheLock::acquire(&path, Duration::from_secs(1), &CancelToken::new()).unwrap();

    let (tx, rx) = mpsc::channel();
    let waiter = {
        let path = path.clone();
        thread::spawn(move || {
            let started = Instant::now();
            let lock = CacheLock::acquire(&path, Duration::from_secs(10), &CancelToken::new()).unwrap();
            tx.send(started.elapsed()).unwrap();
            lock.release();
        })
    };

    // still blocked while the first holder keeps the lock
    assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());

    first.release();
    let waited = rx.recv_timeout(Duration::from_secs(5)).expect("waiter never acquired");
    assert!(waited > Duration::ZERO);
    waiter.join().unwrap();
    assert!(!path.exists());
}

#[test]
fn test_timeout_while_held() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("contents-amd64.json.lock");
    let _held = CacheLock::acquire(&path, Duration::from_secs(1), &CancelToken::new()).unwrap();

    let path2 = path.clone();
    let result = thread::spawn(move || CacheLock::acquire(&path2, Duration::from_millis(200), &CancelToken::new()))
        .join()
        .unwrap();
    assert!(matches!(result, Err(LockError::Timeout { .. })));
}

#[test]
fn test_stale_marker_is_cleaned_then_acquired() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("contents-amd64.json.lock");
    fs::write(&path, "12345\n").unwrap();
    let two_hours_ago = SystemTime::now() - Duration::from_secs(2 * 60 * 60);
    set_file_mtime(&path, FileTime::from_system_time(two_hours_ago)).unwrap();

    assert!(cleanup_stale(&path, Duration::from_secs(60 * 60)));
    assert!(!path.exists());

    let lock = CacheLock::acquire(&path, Duration::from_secs(1), &CancelToken::new()).unwrap();
    assert!(path.exists());
    lock.release();
}

#[test]
fn test_fresh_marker_is_not_stale() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("contents-amd64.json.lock");
    fs::write(&path, "12345\n").unwrap();

    assert!(!cleanup_stale(&path, Duration::from_secs(60 * 60)));
    assert!(path.exists());
}

#[test]
fn test_leftover_marker_without_holder_is_reusable() {
    // a crashed holder leaves the marker but not the OS lock
    let dir = tempdir().unwrap();
    let path = dir.path().join("contents-amd64.json.lock");
    fs::write(&path, "99999\n").unwrap();

    let lock = CacheLock::acquire(&path, Duration::from_millis(200), &CancelToken::new()).unwrap();
    let pid = fs::read_to_string(&path).unwrap();
    assert_eq!(pid.trim(), std::process::id().to_string());
    drop(lock);
    assert!(!path.exists());
}

#[test]
fn test_cancel_releases_waiter() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("contents-amd64.json.lock");
    let _held = CacheLock::acquire(&path, Duration::from_secs(1), &CancelToken::new()).unwrap();

    let cancel = CancelToken::new();
    let remote = cancel.clone();
    let path2 = path.clone();
    let waiter = thread::spawn(move || CacheLock::acquire(&path2, Duration::from_secs(30), &cancel));

    thread::sleep(Duration::from_millis(100));
    remote.cancel();
    let result = waiter.join().unwrap();
    assert!(matches!(result, Err(LockError::Interrupted(_))));
}
