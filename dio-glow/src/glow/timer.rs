use std::fmt::{Display, Formatter};
use std::time::Duration;

use tokio::time::Instant;

/// Measures one contiguous interval of asserted input.
///
/// The timer is owned by the [`Poller`](crate::glow::Poller) only and is never shared. It relies on
/// the tokio clock so tests can drive it with a paused runtime.
#[derive(Clone, Debug, Default)]
pub struct Timer {
    /// Instant the current interval started at (running when set).
    started: Option<Instant>,
}

impl Timer {
    /// Starts the timer. Starting a running timer keeps the original start instant.
    pub fn start(&mut self) {
        if self.started.is_none() {
            self.started = Some(Instant::now());
        }
    }

    /// Stops the timer and returns the elapsed interval, or `None` if it was not running.
    pub fn stop(&mut self) -> Option<Duration> {
        self.started.take().map(|started| started.elapsed())
    }

    /// Forgets the current interval (if any).
    pub fn reset(&mut self) {
        self.started = None;
    }

    /// Indicates if an interval is currently being measured.
    pub fn is_running(&self) -> bool {
        self.started.is_some()
    }

    /// Time elapsed since the timer started (zero when idle).
    pub fn elapsed(&self) -> Duration {
        self.started
            .map(|started| started.elapsed())
            .unwrap_or_default()
    }
}

impl Display for Timer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Timer [running={}, elapsed={}ms]",
            self.is_running(),
            self.elapsed().as_millis()
        )
    }
}
