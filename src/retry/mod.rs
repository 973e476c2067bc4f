#[cfg(test)]
mod tests;

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, warn};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);

/// Bounded retry with a fixed delay between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

/// Returned when an operation did not succeed within the policy
#[derive(Debug, Error)]
#[error("gave up after {attempts} attempt(s): {last_error}")]
pub struct Exhausted<E: std::fmt::Display + std::fmt::Debug> {
    pub attempts: u32,
    pub last_error: E,
}

impl Default for RetryPolicy {
    #[inline]
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

impl RetryPolicy {
    #[inline]
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Run `op` until it succeeds, returns a non-retryable error, or the
    /// attempt budget is spent. `op` receives the 1-based attempt number.
    #[inline]
    pub fn run<T, E, F, R>(&self, mut op: F, is_retryable: R) -> Result<T, Exhausted<E>>
    where
        E: std::fmt::Display + std::fmt::Debug,
        F: FnMut(u32) -> Result<T, E>,
        R: Fn(&E) -> bool,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            debug!("Attempt {}/{}", attempt, max_attempts);

            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if !is_retryable(&err) {
                        warn!("Non-retryable error on attempt {}: {}", attempt, err);
                        return Err(Exhausted {
                            attempts: attempt,
                            last_error: err,
                        });
                    }

                    if attempt >= max_attempts {
                        error!("All {} attempts failed: {}", max_attempts, err);
                        return Err(Exhausted {
                            attempts: attempt,
                            last_error: err,
                        });
                    }

                    warn!(
                        "Attempt {}/{} failed: {}, retrying in {:?}",
                        attempt, max_attempts, err, self.backoff
                    );
                    std::thread::sleep(self.backoff);
                    attempt += 1;
                }
            }
        }
    }
}
