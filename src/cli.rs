//! Command-line interface definitions for pkgstats.
//!
//! # Example
//!
//! ```bash
//! # Top 10 packages by file count for amd64
//! pkgstats amd64
//!
//! # Top 25 for arm64 as JSON, ignoring any cached data
//! pkgstats arm64 -n 25 --output json --force-refresh
//!
//! # Keep cached statistics for a week and trust them for a day
//! pkgstats amd64 --cache-ttl 7d --trust-window 24h
//! ```

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

/// Debian package statistics from the Contents index.
///
/// Downloads `Contents-<ARCH>.gz` from a Debian mirror, counts the files each
/// package ships, and prints the packages owning the most files. Results are
/// cached locally and revalidated with conditional requests.
#[derive(Debug, Parser)]
#[command(name = "pkgstats")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Architecture to analyse (e.g. amd64, arm64, i386)
    #[arg(value_name = "ARCH", required_unless_present = "print_config")]
    pub arch: Option<String>,

    /// Number of packages to show
    #[arg(short = 'n', long, value_name = "N")]
    pub top: Option<usize>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub output: OutputFormat,

    /// Directory for cached statistics
    ///
    /// If not specified, a default platform-specific path is used.
    #[arg(long, value_name = "PATH")]
    pub cache_dir: Option<PathBuf>,

    /// How long cached statistics remain usable (e.g. 24h, 7d)
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub cache_ttl: Option<Duration>,

    /// How long cached statistics are used without asking the mirror (e.g. 1h)
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub trust_window: Option<Duration>,

    /// Deadline for contacting the mirror and downloading (0 for none)
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub download_timeout: Option<Duration>,

    /// Ignore cached statistics and download again
    #[arg(short, long)]
    pub force_refresh: bool,

    /// Debian mirror base URL
    #[arg(long, value_name = "URL")]
    pub mirror: Option<String>,

    /// Distribution suite (e.g. stable, testing, bookworm)
    #[arg(long, value_name = "SUITE")]
    pub suite: Option<String>,

    /// Path to a TOML configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    pub print_config: bool,

    /// Do not draw a download progress bar
    #[arg(long)]
    pub no_progress: bool,

    /// Report errors as JSON on stderr
    #[arg(long)]
    pub json_errors: bool,

    /// Increase verbosity level (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, env = "NO_COLOR")]
    pub no_color: bool,
}

/// Output format for the package ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Aligned table for terminals
    #[default]
    Table,
    /// JSON report for scripting
    Json,
    /// CSV for spreadsheets
    Csv,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Csv => write!(f, "csv"),
        }
    }
}

/// Parse a human-readable duration.
///
/// A bare number is seconds. Otherwise the string is a sequence of
/// `<number><unit>` groups with units `s`, `m`, `h` and `d`.
///
/// # Examples
///
/// ```
/// use pkgstats::cli::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("90").unwrap(), Duration::from_secs(90));
/// assert_eq!(parse_duration("15m").unwrap(), Duration::from_secs(900));
/// assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
/// assert_eq!(parse_duration("7d").unwrap(), Duration::from_secs(604_800));
/// ```
///
/// # Errors
///
/// Returns an error for empty input, a missing number, an unknown unit, or
/// a value that overflows.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("Duration cannot be empty".to_string());
    }
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total: u64 = 0;
    let mut rest = s;
    while !rest.is_empty() {
        let split = rest
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| format!("Missing unit after '{rest}'"))?;
        let (num_str, tail) = rest.split_at(split);
        if num_str.is_empty() {
            return Err(format!("Invalid duration: '{s}'"));
        }
        let num: u64 = num_str
            .parse()
            .map_err(|_| format!("Invalid number: '{num_str}'"))?;

        let mut chars = tail.chars();
        let unit = chars.next().map(|c| c.to_ascii_lowercase());
        let multiplier: u64 = match unit {
            Some('s') => 1,
            Some('m') => 60,
            Some('h') => 3_600,
            Some('d') => 86_400,
            _ => return Err(format!("Unknown duration unit in '{s}' (use s, m, h or d)")),
        };
        total = num
            .checked_mul(multiplier)
            .and_then(|secs| total.checked_add(secs))
            .ok_or_else(|| format!("Duration too large: '{s}'"))?;
        rest = chars.as_str();
    }

    Ok(Duration::from_secs(total))
}
