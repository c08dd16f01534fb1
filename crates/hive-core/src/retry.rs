//! Randomized delay policy shared by API retries and readiness polling.

use std::time::Duration;

use rand::Rng;
use tracing::debug;

/// Delay policy for a retry loop.
///
/// Every delay is `base + uniform[0, jitter)`. With `max_attempts = None`
/// the loop retries forever; callers impose their own deadline if needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub jitter: Duration,
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    pub const fn new(base: Duration, jitter: Duration) -> Self {
        Self {
            base,
            jitter,
            max_attempts: None,
        }
    }

    /// Backoff between cloud API retries: `[0, 500ms)`, unbounded.
    pub const fn api() -> Self {
        Self::new(Duration::ZERO, Duration::from_millis(500))
    }

    /// Wait between droplet status polls: `[10s, 20s)`, unbounded.
    pub const fn droplet_poll() -> Self {
        Self::new(Duration::from_secs(10), Duration::from_secs(10))
    }

    /// Wait before each drone liveness probe: `[0, 1s)`, unbounded.
    pub const fn drone_probe() -> Self {
        Self::new(Duration::ZERO, Duration::from_secs(1))
    }

    /// Cap the number of attempts.
    pub const fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sample the next delay.
    pub fn next_delay(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.base;
        }
        let jitter_ms = self.jitter.as_millis() as u64;
        let extra = rand::rng().random_range(0..jitter_ms.max(1));
        self.base + Duration::from_millis(extra)
    }

    /// Sleep for a freshly sampled delay.
    pub async fn sleep(&self) {
        let delay = self.next_delay();
        debug!(delay_ms = delay.as_millis() as u64, "retrying after delay");
        tokio::time::sleep(delay).await;
    }

    /// Whether another attempt is allowed after `attempts` have been made.
    pub fn allows(&self, attempts: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempts < max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::api()
    }
}
