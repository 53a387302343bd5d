//! Progress reporting for long-running operations
//!
//! Index builds, shuffles, and tour boot-ups can run for minutes on a whole
//! genome. They report through the [`Progress`] trait so the embedding host
//! decides how (and whether) to surface it. The crate ships a silent
//! implementation and one that logs through `tracing`.

use std::time::Instant;

/// Receiver for progress updates from long-running operations
pub trait Progress {
    /// Reports the current completion percentage with an optional message
    fn set_progress(&mut self, percent: u8, message: Option<&str>);

    /// Signals that work is still ongoing without a percentage change
    fn update_elapsed_time(&mut self) {}

    /// Starts a new reporting phase
    fn init_new(&mut self) {}
}

/// Discards every update
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn set_progress(&mut self, _percent: u8, _message: Option<&str>) {}
}

/// Logs percentage changes through `tracing`
#[derive(Debug)]
pub struct LogProgress {
    last_percent: Option<u8>,
    started: Instant,
}

impl Default for LogProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl LogProgress {
    pub fn new() -> Self {
        Self {
            last_percent: None,
            started: Instant::now(),
        }
    }
}

impl Progress for LogProgress {
    fn set_progress(&mut self, percent: u8, message: Option<&str>) {
        if self.last_percent == Some(percent) && message.is_none() {
            return;
        }
        self.last_percent = Some(percent);
        match message {
            Some(message) => tracing::info!(
                percent,
                elapsed_s = self.started.elapsed().as_secs(),
                "{message}"
            ),
            None => tracing::debug!(
                percent,
                elapsed_s = self.started.elapsed().as_secs(),
                "in progress"
            ),
        }
    }

    fn init_new(&mut self) {
        self.last_percent = None;
        self.started = Instant::now();
    }
}
