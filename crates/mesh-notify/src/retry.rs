//! Bounded exponential backoff for a single integration.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::Result;

/// Retry policy applied to each integration independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub min_backoff: Duration,
    /// Upper bound of any single delay.
    pub max_backoff: Duration,
    /// Total attempts including the first.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            min_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(10),
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    /// Sets the first retry delay.
    #[must_use]
    pub const fn with_min_backoff(mut self, backoff: Duration) -> Self {
        self.min_backoff = backoff;
        self
    }

    /// Sets the delay cap.
    #[must_use]
    pub const fn with_max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = backoff;
        self
    }

    /// Sets the attempt limit. Zero is treated as one.
    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Delay before attempt number `attempt` (1-based, so the first retry is
    /// attempt 2).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(2).min(16);
        self.min_backoff
            .saturating_mul(1 << exp)
            .min(self.max_backoff)
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt limit is reached. Returns the last error.
    pub async fn run<F, Fut>(&self, target: &str, mut op: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(()) => {
                    if attempt > 1 {
                        debug!(integration = target, attempt, "notify succeeded after retry");
                    }
                    return Ok(());
                }
                Err(e) if !e.retryable() || attempt >= attempts => return Err(e),
                Err(e) => {
                    attempt += 1;
                    let delay = self.backoff(attempt);
                    warn!(
                        integration = target,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "notify attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
