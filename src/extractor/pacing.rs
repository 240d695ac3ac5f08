use tokio::time::{Duration, Instant, sleep};

/// Default spacing between two exchange requests.
///
/// Keeps the extractor under the public REST rate limit.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(400);

/// Enforces a minimum wall-clock interval between successive requests.
///
/// The interval is measured from the moment a request *started*,
/// so slow requests eat into the wait instead of adding to it.
#[derive(Debug, Clone, Copy)]
pub struct RateLimiter {
    min_interval: Duration,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self { min_interval }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Time still to wait before the next request may start.
    ///
    /// Never negative: an overdue request gets `Duration::ZERO`.
    pub fn remaining(&self, request_started: Instant) -> Duration {
        self.min_interval.saturating_sub(request_started.elapsed())
    }

    /// Sleeps for `max(0, min_interval - elapsed since request_started)`.
    pub async fn wait(&self, request_started: Instant) {
        let remaining = self.remaining(request_started);
        if !remaining.is_zero() {
            sleep(remaining).await;
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_INTERVAL)
    }
}
