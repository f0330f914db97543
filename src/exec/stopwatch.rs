//! Accumulated running-time stopwatch
//!
//! Started on Start/Resume, stopped on Pause/Stop, cleared on Reset.
//! Exposed to hooks as the `runtime_millis` registry key.

use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub(crate) struct Stopwatch {
    accumulated: Duration,
    started_at: Option<Instant>,
}

impl Stopwatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self) {
        if self.started_at.is_none() {
            self.started_at = Some(Instant::now());
        }
    }

    pub fn stop(&mut self) {
        if let Some(started) = self.started_at.take() {
            self.accumulated += started.elapsed();
        }
    }

    pub fn reset(&mut self) {
        self.accumulated = Duration::ZERO;
        self.started_at = None;
    }

    pub fn is_running(&self) -> bool {
        self.started_at.is_some()
    }

    /// Monotonic accumulated milliseconds
    pub fn elapsed_millis(&self) -> u64 {
        let running = self
            .started_at
            .map(|started| started.elapsed())
            .unwrap_or(Duration::ZERO);
        (self.accumulated + running).as_millis() as u64
    }
}
