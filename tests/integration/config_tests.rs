use figment::providers::{Env, Serialized};
use figment::Figment;
use pkgstats::config::Config;
use std::fs;
use std::path::PathBuf;
use tempfile::tempdir;

#[test]
fn test_config_load_defaults() {
    // Use figment directly without Env to avoid interference from other tests
    let config: Config = Figment::from(Serialized::defaults(Config::default()))
        .extract()
        .unwrap();
    assert_eq!(config.cache_ttl_secs, 24 * 60 * 60);
    assert_eq!(config.trust_window_secs, 60 * 60);
    assert_eq!(config.mirror, "http://ftp.uk.debian.org/debian");
    assert_eq!(config.suite, "stable");
}

#[test]
fn test_config_load_from_env() {
    // A private prefix keeps parallel tests that call Config::load unaffected
    std::env::set_var("PKGSTATS_ENVTEST_CACHE_TTL_SECS", "120");
    std::env::set_var("PKGSTATS_ENVTEST_SUITE", "bookworm");

    let config: Config = Figment::from(Serialized::defaults(Config::default()))
        .merge(Env::prefixed("PKGSTATS_ENVTEST_"))
        .extract()
        .unwrap();

    assert_eq!(config.cache_ttl_secs, 120);
    assert_eq!(config.suite, "bookworm");

    std::env::remove_var("PKGSTATS_ENVTEST_CACHE_TTL_SECS");
    std::env::remove_var("PKGSTATS_ENVTEST_SUITE");
}

#[test]
fn test_config_load_from_toml() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    fs::write(
        &config_path,
        r#"
cache_dir = "/var/cache/pkgstats"
trust_window_secs = 0
mirror = "https://deb.debian.org/debian"
top = 25
"#,
    )
    .unwrap();

    let config = Config::load(Some(&config_path)).unwrap();
    assert_eq!(config.cache_dir, PathBuf::from("/var/cache/pkgstats"));
    assert_eq!(config.trust_window_secs, 0);
    assert_eq!(config.mirror, "https://deb.debian.org/debian");
    assert_eq!(config.top, 25);
    // untouched keys keep their defaults
    assert_eq!(config.cache_ttl_secs, 24 * 60 * 60);
}

#[test]
fn test_explicit_missing_file_is_an_error() {
    let temp_dir = tempdir().unwrap();
    let err = Config::load(Some(&temp_dir.path().join("absent.toml"))).unwrap_err();
    assert!(err.to_string().contains("not found"));
}

#[test]
fn test_invalid_toml_is_an_error() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    fs::write(&config_path, "cache_ttl_secs = \"soon\"\n").unwrap();

    assert!(Config::load(Some(&config_path)).is_err());
}

#[test]
fn test_invalid_values_fail_validation() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    fs::write(&config_path, "mirror = \"file:///srv/mirror\"\n").unwrap();

    let err = Config::load(Some(&config_path)).unwrap_err();
    assert!(err.to_string().contains("mirror"));
}

#[test]
fn test_printed_config_loads_back() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    let original = Config {
        cache_dir: temp_dir.path().join("cache"),
        max_retries: 5,
        ..Config::default()
    };
    fs::write(&config_path, original.to_toml().unwrap()).unwrap();

    let loaded: Config = Config::figment(Some(&config_path)).extract().unwrap();
    assert_eq!(loaded, original);
}
