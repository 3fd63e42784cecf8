//! Progress reporting, ticked once per successfully processed item.

use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicU64, Ordering};

/// Receiver of per-item progress.
pub trait ProgressSink: Send + Sync {
    /// Called once the total is known.
    fn start(&self, total: u64);
    /// One item succeeded.
    fn tick(&self);
    /// The run ended.
    fn finish(&self, message: &str);
}

/// Terminal progress bar.
pub struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    /// Creates a hidden bar that is drawn once [`ProgressSink::start`] is called.
    #[must_use]
    pub fn new() -> Self {
        let bar = ProgressBar::hidden();
        bar.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        Self { bar }
    }
}

impl Default for BarProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for BarProgress {
    fn start(&self, total: u64) {
        self.bar.set_length(total);
        self.bar
            .set_draw_target(indicatif::ProgressDrawTarget::stderr());
    }

    fn tick(&self) {
        self.bar.inc(1);
    }

    fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }
}

/// Discards progress.
#[derive(Debug, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn start(&self, _total: u64) {}
    fn tick(&self) {}
    fn finish(&self, _message: &str) {}
}

/// Counts ticks. Useful for embedding callers and tests.
#[derive(Debug, Default)]
pub struct CountingProgress {
    total: AtomicU64,
    ticks: AtomicU64,
    finished: AtomicU64,
}

impl CountingProgress {
    /// Creates a zeroed counter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total passed to `start`.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }

    /// Number of ticks.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    /// Number of `finish` calls.
    #[must_use]
    pub fn finished(&self) -> u64 {
        self.finished.load(Ordering::SeqCst)
    }
}

impl ProgressSink for CountingProgress {
    fn start(&self, total: u64) {
        self.total.store(total, Ordering::SeqCst);
    }

    fn tick(&self) {
        self.ticks.fetch_add(1, Ordering::SeqCst);
    }

    fn finish(&self, _message: &str) {
        self.finished.fetch_add(1, Ordering::SeqCst);
    }
}
