//! Application configuration management.
//!
//! Settings are layered with `figment`, later layers winning:
//!
//! 1. Built-in defaults
//! 2. A TOML file (`--config PATH`, else `config.toml` in the platform
//!    config directory when it exists)
//! 3. `PKGSTATS_*` environment variables (e.g. `PKGSTATS_CACHE_TTL_SECS=3600`)
//! 4. Command-line flags

use anyhow::{bail, Context, Result};
use directories::{BaseDirs, ProjectDirs};
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::Cli;
use crate::fetch::RetryPolicy;
use crate::resolver::orchestrator::{DEFAULT_MIRROR, DEFAULT_SUITE};
use crate::resolver::ResolveOptions;

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "PKGSTATS_";

/// Effective application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory for cached statistics and lock files.
    pub cache_dir: PathBuf,
    /// Seconds before cached statistics expire.
    pub cache_ttl_secs: u64,
    /// Seconds during which cached statistics are used without a request.
    pub trust_window_secs: u64,
    /// Seconds allowed for probe plus download; 0 disables the deadline.
    pub download_timeout_secs: u64,
    /// Seconds to wait for another process holding the cache lock.
    pub lock_timeout_secs: u64,
    /// Seconds after which an abandoned lock file is removed.
    pub lock_stale_secs: u64,
    /// Download attempts before giving up, including the first.
    pub max_retries: usize,
    /// Debian mirror base URL.
    pub mirror: String,
    /// Distribution suite.
    pub suite: String,
    /// Packages to print.
    pub top: usize,
}

impl Default for Config {
    fn default() -> Self {
        let resolve = ResolveOptions::default();
        Self {
            cache_dir: default_cache_dir(),
            cache_ttl_secs: resolve.cache_ttl.as_secs(),
            trust_window_secs: resolve.trust_window.as_secs(),
            download_timeout_secs: resolve.download_timeout.as_secs(),
            lock_timeout_secs: resolve.lock_timeout.as_secs(),
            lock_stale_secs: resolve.lock_stale_after.as_secs(),
            max_retries: RetryPolicy::default().max_attempts,
            mirror: DEFAULT_MIRROR.to_string(),
            suite: DEFAULT_SUITE.to_string(),
            top: 10,
        }
    }
}

impl Config {
    /// Load defaults, the config file and the environment.
    ///
    /// An explicitly named file must exist; the default file is optional.
    ///
    /// # Errors
    ///
    /// Fails if an explicit file is missing, a layer cannot be parsed, or the
    /// result does not validate.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let file = match explicit {
            Some(path) => {
                if !path.is_file() {
                    bail!("Config file not found: {}", path.display());
                }
                Some(path.to_path_buf())
            }
            None => Self::config_path().filter(|path| path.is_file()),
        };
        if let Some(path) = &file {
            log::debug!("Loading config from {}", path.display());
        }

        let mut config: Config = Self::figment(file.as_deref())
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()
            .context("Invalid configuration")?;
        config.cache_dir = expand_home(&config.cache_dir);
        config.validate()?;
        Ok(config)
    }

    /// Defaults merged with `file`, without the environment layer.
    #[must_use]
    pub fn figment(file: Option<&Path>) -> Figment {
        let figment = Figment::from(Serialized::defaults(Config::default()));
        match file {
            Some(path) => figment.merge(Toml::file(path)),
            None => figment,
        }
    }

    /// Overlay command-line flags.
    ///
    /// # Errors
    ///
    /// Fails if the result does not validate.
    pub fn apply_cli(&mut self, cli: &Cli) -> Result<()> {
        if let Some(dir) = &cli.cache_dir {
            self.cache_dir = expand_home(dir);
        }
        if let Some(ttl) = cli.cache_ttl {
            self.cache_ttl_secs = ttl.as_secs();
        }
        if let Some(window) = cli.trust_window {
            self.trust_window_secs = window.as_secs();
        }
        if let Some(timeout) = cli.download_timeout {
            self.download_timeout_secs = timeout.as_secs();
        }
        if let Some(mirror) = &cli.mirror {
            self.mirror.clone_from(mirror);
        }
        if let Some(suite) = &cli.suite {
            self.suite.clone_from(suite);
        }
        if let Some(top) = cli.top {
            self.top = top;
        }
        self.validate()
    }

    /// Reject values that cannot work.
    ///
    /// # Errors
    ///
    /// Describes the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if !(self.mirror.starts_with("http://") || self.mirror.starts_with("https://")) {
            bail!("mirror must be an http:// or https:// URL, got '{}'", self.mirror);
        }
        if self.suite.is_empty() || self.suite.contains('/') {
            bail!("invalid suite '{}'", self.suite);
        }
        if self.cache_ttl_secs == 0 {
            bail!("cache_ttl_secs must be greater than zero");
        }
        if self.max_retries == 0 {
            bail!("max_retries must be at least 1");
        }
        Ok(())
    }

    /// Options for the resolver.
    #[must_use]
    pub fn resolve_options(&self, force_refresh: bool) -> ResolveOptions {
        ResolveOptions {
            cache_dir: self.cache_dir.clone(),
            cache_ttl: Duration::from_secs(self.cache_ttl_secs),
            trust_window: Duration::from_secs(self.trust_window_secs),
            force_refresh,
            download_timeout: Duration::from_secs(self.download_timeout_secs),
            lock_timeout: Duration::from_secs(self.lock_timeout_secs),
            lock_stale_after: Duration::from_secs(self.lock_stale_secs),
            mirror: self.mirror.clone(),
            suite: self.suite.clone(),
        }
    }

    /// Retry budget for downloads.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default().with_max_attempts(self.max_retries)
    }

    /// The configuration as TOML.
    ///
    /// # Errors
    ///
    /// Fails if a field cannot be represented in TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    /// The default platform-specific configuration path.
    #[must_use]
    pub fn config_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "debian", "pkgstats")
}

fn default_cache_dir() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.cache_dir().to_path_buf())
        .unwrap_or_else(|| std::env::temp_dir().join("pkgstats"))
}

/// Expand a leading `~/` to the home directory.
#[must_use]
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match BaseDirs::new() {
            Some(base) => base.home_dir().join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}
