//! Bounded Exponential Backoff
//!
//! Used for the startup liveness ping against the log. The defaults wait
//! 100ms after the first failure and cap individual waits at one minute; a
//! network hiccup at startup is worth waiting out rather than failing the
//! service, but after ten retries startup gives up.

use std::time::Duration;

/// Backoff schedule for a bounded retry loop.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Maximum number of retries after the initial attempt
    pub max_retries: usize,

    /// Wait after the first failure
    pub initial_backoff: Duration,

    /// Cap on any individual wait
    pub max_backoff: Duration,

    /// Growth factor between waits
    pub multiplier: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// Wait before retry number `attempt` (0-indexed):
    /// `min(initial * multiplier^attempt, max)`.
    pub fn backoff(&self, attempt: usize) -> Duration {
        let millis =
            self.initial_backoff.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        Duration::from_millis(millis as u64).min(self.max_backoff)
    }
}
