//! Bounded retry policy with fixed or exponential backoff for transient errors.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use driveup_common::{Error, Result};

/// Delay strategy between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum Backoff {
    /// Same delay before every retry.
    Fixed { delay_ms: u64 },
    /// Delay grows by `multiplier` per retry, capped at `max_ms`.
    Exponential {
        initial_ms: u64,
        multiplier: f64,
        max_ms: u64,
    },
}

/// How many times an operation may run and how long to wait in between.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total number of attempts, the first one included.
    pub max_attempts: u32,
    /// Delay strategy.
    pub backoff: Backoff,
    /// Whether to add jitter to delays.
    pub jitter: bool,
}

impl RetryPolicy {
    /// Create a policy allowing `max_attempts` attempts with default backoff.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Exponential {
                initial_ms: 1_000,
                multiplier: 2.0,
                max_ms: 60_000,
            },
            jitter: true,
        }
    }

    /// Wait the same `delay` before every retry.
    pub fn with_fixed_delay(mut self, delay: Duration) -> Self {
        self.backoff = Backoff::Fixed {
            delay_ms: delay.as_millis() as u64,
        };
        self
    }

    /// Grow the delay exponentially from `initial`, capped at `max`.
    pub fn with_exponential_backoff(mut self, initial: Duration, multiplier: f64, max: Duration) -> Self {
        self.backoff = Backoff::Exponential {
            initial_ms: initial.as_millis() as u64,
            multiplier,
            max_ms: max.as_millis() as u64,
        };
        self
    }

    /// Enable or disable jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Reject policies that cannot run.
    ///
    /// # Errors
    /// - `max_attempts` is zero
    /// - exponential multiplier below 1 or not finite
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::InvalidInput(
                "Retry policy needs at least one attempt".to_string(),
            ));
        }

        if let Backoff::Exponential { multiplier, .. } = self.backoff {
            if !multiplier.is_finite() || multiplier < 1.0 {
                return Err(Error::InvalidInput(format!(
                    "Backoff multiplier must be >= 1, got {}",
                    multiplier
                )));
            }
        }

        Ok(())
    }

    /// Calculate the delay after the `retry`-th failure (0-based).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let base_delay = match self.backoff {
            Backoff::Fixed { delay_ms } => delay_ms as f64,
            Backoff::Exponential {
                initial_ms,
                multiplier,
                max_ms,
            } => (initial_ms as f64 * multiplier.powi(retry as i32)).min(max_ms as f64),
        };

        let final_delay = if self.jitter {
            // Add random jitter of +/- 25%
            let jitter_factor = 0.75 + (rand::random::<f64>() * 0.5);
            base_delay * jitter_factor
        } else {
            base_delay
        };

        Duration::from_millis(final_delay as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Progress reported while an operation is being retried.
#[derive(Debug)]
pub enum RetryEvent<'a> {
    /// Attempt number `attempt` (1-based) is about to start.
    Attempt { attempt: u32 },
    /// Attempt `attempt` failed transiently; waiting `delay` before the next.
    Backoff {
        attempt: u32,
        error: &'a Error,
        delay: Duration,
    },
}

/// Final result of a retried operation.
#[derive(Debug)]
pub struct Attempted<T> {
    /// Result of the last attempt.
    pub result: Result<T>,
    /// Number of attempts made.
    pub attempts: u32,
    /// Whether the last error was transient but no attempts were left.
    pub exhausted: bool,
}

/// Retry executor for running operations under a [`RetryPolicy`].
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    /// Create a new retry executor.
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Execute an operation, reporting every attempt and backoff to `observer`.
    ///
    /// Non-transient errors end the loop immediately.
    pub async fn execute_observed<F, Fut, T, O>(&self, mut operation: F, mut observer: O) -> Attempted<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        O: FnMut(RetryEvent<'_>),
    {
        let mut attempt = 0;

        loop {
            attempt += 1;
            observer(RetryEvent::Attempt { attempt });

            match operation().await {
                Ok(result) => {
                    if attempt > 1 {
                        debug!("Operation succeeded after {} attempts", attempt);
                    }
                    return Attempted {
                        result: Ok(result),
                        attempts: attempt,
                        exhausted: false,
                    };
                }
                Err(err) => {
                    if !err.is_transient() {
                        return Attempted {
                            result: Err(err),
                            attempts: attempt,
                            exhausted: false,
                        };
                    }

                    if attempt >= self.policy.max_attempts {
                        warn!("Operation failed after {} attempts: {}", attempt, err);
                        return Attempted {
                            result: Err(err),
                            attempts: attempt,
                            exhausted: true,
                        };
                    }

                    let delay = self.policy.delay_for_retry(attempt - 1);
                    observer(RetryEvent::Backoff {
                        attempt,
                        error: &err,
                        delay,
                    });

                    sleep(delay).await;
                }
            }
        }
    }
}
