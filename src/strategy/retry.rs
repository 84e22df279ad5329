//! Bounded retries with cancellation-aware backoff.

use crate::config::ExecutionConfig;
use crate::error::{HedgeError, HedgeResult};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Wait between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    /// `base × attempt`
    Linear(Duration),
}

impl Backoff {
    /// Delay after the failed `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed(d) => d,
            Backoff::Linear(base) => base.saturating_mul(attempt),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// At least one attempt is always made.
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// One attempt, no waiting.
    pub fn single() -> Self {
        Self::new(1, Backoff::Fixed(Duration::ZERO))
    }

    /// Linear backoff when fast execution is on, a single attempt otherwise.
    pub fn from_config(config: &ExecutionConfig) -> Self {
        if config.fast_execution {
            Self::new(
                config.max_retry_attempts,
                Backoff::Linear(config.retry_backoff()),
            )
        } else {
            Self::single()
        }
    }

    /// Run `op` until it succeeds, fails permanently or attempts run out.
    ///
    /// `op` receives the 1-based attempt number. Cancelling `token` aborts
    /// the wait between attempts immediately.
    pub async fn run<T, F, Fut>(
        &self,
        token: &CancellationToken,
        operation: &str,
        mut op: F,
    ) -> HedgeResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = HedgeResult<T>>,
    {
        let mut last_error = None;

        for attempt in 1..=self.max_attempts {
            if token.is_cancelled() {
                return Err(HedgeError::Cancelled);
            }

            match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(operation, attempt, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    warn!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "Attempt failed"
                    );
                    last_error = Some(e);

                    if attempt < self.max_attempts {
                        tokio::select! {
                            _ = token.cancelled() => return Err(HedgeError::Cancelled),
                            _ = tokio::time::sleep(self.backoff.delay(attempt)) => {}
                        }
                    }
                }
            }
        }

        match last_error {
            Some(e) => Err(HedgeError::RetriesExhausted {
                attempts: self.max_attempts,
                source: Box::new(e),
            }),
            None => Err(HedgeError::Cancelled),
        }
    }
}
