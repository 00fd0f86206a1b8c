//! Download progress reporting using indicatif.
//!
//! The fetcher reports through the [`ProgressSink`] trait; [`DownloadProgress`]
//! renders it as a terminal bar and [`NoProgress`] discards it. Everything in
//! the fetch path behaves identically whichever sink is plugged in.

use std::sync::Mutex;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Receiver of transfer progress events.
pub trait ProgressSink: Send + Sync {
    /// A body transfer is starting. `total` is the `Content-Length`, if known.
    fn on_start(&self, total: Option<u64>);

    /// `transferred` bytes have been read so far (cumulative).
    fn on_bytes(&self, transferred: u64);

    /// The transfer finished. `success` is false when it was aborted.
    fn on_finish(&self, success: bool);
}

/// A sink that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_start(&self, _total: Option<u64>) {}
    fn on_bytes(&self, _transferred: u64) {}
    fn on_finish(&self, _success: bool) {}
}

/// Progress bar for the Contents download.
///
/// Uses a byte bar with throughput and ETA when the size is known and a
/// spinner with the running byte count otherwise.
pub struct DownloadProgress {
    bar: Mutex<Option<ProgressBar>>,
    hidden: bool,
}

impl DownloadProgress {
    /// Create a reporter. With `hidden` set nothing is ever drawn.
    ///
    /// # Examples
    ///
    /// ```
    /// use pkgstats::progress::{DownloadProgress, ProgressSink};
    ///
    /// let progress = DownloadProgress::new(true);
    /// progress.on_start(Some(1024));
    /// progress.on_bytes(512);
    /// progress.on_finish(true);
    /// ```
    #[must_use]
    pub fn new(hidden: bool) -> Self {
        Self {
            bar: Mutex::new(None),
            hidden,
        }
    }

    fn bar_style() -> ProgressStyle {
        ProgressStyle::with_template(
            "[{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({binary_bytes_per_sec}, ETA: {eta})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█>-")
    }

    fn spinner_style() -> ProgressStyle {
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] {bytes} downloaded ({binary_bytes_per_sec})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
    }
}

impl ProgressSink for DownloadProgress {
    fn on_start(&self, total: Option<u64>) {
        if self.hidden {
            return;
        }
        let pb = match total {
            Some(len) if len > 0 => {
                let pb = ProgressBar::new(len);
                pb.set_style(Self::bar_style());
                pb
            }
            _ => {
                let pb = ProgressBar::new_spinner();
                pb.set_style(Self::spinner_style());
                pb.enable_steady_tick(Duration::from_millis(100));
                pb
            }
        };
        pb.set_draw_target(ProgressDrawTarget::stderr());
        if let Ok(mut slot) = self.bar.lock() {
            *slot = Some(pb);
        }
    }

    fn on_bytes(&self, transferred: u64) {
        if let Ok(slot) = self.bar.lock() {
            if let Some(pb) = slot.as_ref() {
                pb.set_position(transferred);
            }
        }
    }

    fn on_finish(&self, success: bool) {
        if let Ok(mut slot) = self.bar.lock() {
            if let Some(pb) = slot.take() {
                if success {
                    pb.finish_with_message("Download complete");
                } else {
                    pb.abandon();
                }
            }
        }
    }
}
