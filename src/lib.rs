//! pkgstats - Debian package statistics from Contents indices
//!
//! Downloads `Contents-<arch>.gz` from a Debian mirror, counts how many files
//! each package ships, and ranks the packages. Statistics are cached on disk
//! per architecture and revalidated with conditional HTTP requests; a
//! cross-process lock keeps concurrent invocations from racing on the cache.

pub mod cache;
pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod fetch;
pub mod logging;
pub mod output;
pub mod progress;
pub mod resolver;
pub mod signal;
pub mod stats;

use anyhow::{Context, Result};
use std::io::{self, IsTerminal};
use std::sync::Arc;

use crate::cli::Cli;
use crate::config::Config;
use crate::error::ExitCode;
use crate::fetch::{Fetcher, HttpTransport};
use crate::progress::{DownloadProgress, ProgressSink};
use crate::resolver::{Resolver, Source};

/// Run the application for parsed arguments.
///
/// # Errors
///
/// Returns configuration, resolution, and output errors. Resolution errors
/// stay downcastable to [`resolver::ResolveError`] for exit-code mapping.
pub fn run_app(cli: Cli) -> Result<ExitCode> {
    logging::init_logging(cli.verbose, cli.quiet);

    let mut config = Config::load(cli.config.as_deref())?;
    config.apply_cli(&cli)?;

    if cli.print_config {
        print!("{}", config.to_toml()?);
        return Ok(ExitCode::Success);
    }

    let arch = cli
        .arch
        .as_deref()
        .context("An architecture argument is required")?;

    let handler = signal::install_handler()?;
    let cancel = handler.token();

    let hide_progress = cli.quiet || cli.no_progress || !io::stderr().is_terminal();
    let progress: Arc<dyn ProgressSink> = Arc::new(DownloadProgress::new(hide_progress));
    let transport = HttpTransport::new().context("Failed to initialize HTTP client")?;
    let fetcher = Fetcher::new(Arc::new(transport))
        .with_retry(config.retry_policy())
        .with_progress(progress);
    let resolver = Resolver::new(config.resolve_options(cli.force_refresh), fetcher);

    log::debug!("Resolving {} from {}", arch, resolver.url_for(arch));
    let resolution = resolver
        .resolve(arch, &cancel)
        .with_context(|| format!("Failed to get package statistics for '{arch}'"))?;

    if resolution.source == Source::StaleFallback {
        log::warn!(
            "Showing cached statistics from {} because the mirror could not be reached",
            resolution.captured_at.format("%Y-%m-%d %H:%M UTC")
        );
    } else {
        log::debug!(
            "{} packages from {}",
            resolution.items.len(),
            resolution.source
        );
    }

    let stdout = io::stdout();
    let color = !cli.no_color && stdout.is_terminal();
    output::write_report(cli.output, &resolution, config.top, color, stdout.lock())?;

    Ok(ExitCode::Success)
}
