//! Bounded exponential backoff for remote calls.

use std::time::Duration;

use tracing::warn;

use rag_eval_core::{RagError, Result};

/// Retry schedule for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub max_retries: u32,

    /// Delay before the first retry; doubles on each further attempt.
    pub base_delay: Duration,

    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based).
    ///
    /// A server-provided `retry-after` wins over the computed backoff.
    pub fn delay(&self, attempt: u32, error: &RagError) -> Duration {
        if let RagError::RateLimited {
            retry_after_ms: Some(ms),
        } = error
        {
            return Duration::from_millis(*ms).min(self.max_delay);
        }
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op`, retrying transient failures. Other errors return at once.
    pub fn run<T>(&self, what: &str, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let mut attempt = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    let backoff = self.delay(attempt, &e);
                    warn!(
                        attempt,
                        error = %e,
                        "{} failed, retrying in {:?}",
                        what,
                        backoff
                    );
                    std::thread::sleep(backoff);
                }
                Err(e) => return Err(e),
            }
        }
    }
}
