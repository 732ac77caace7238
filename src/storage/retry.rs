//! Bounded retry with linear backoff
//!
//! Attempt `i` (1-indexed) is preceded by a sleep of `step * i` for every
//! `i > 1`. With the default policy (3 attempts, 2s step) an operation that
//! keeps failing is tried at t=0, t=4s and t=10s.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Returned (converted into the caller's error type) when the cancellation
/// token fires before or between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "operation cancelled")
    }
}

impl std::error::Error for Cancelled {}

const DEFAULT_ATTEMPTS: u32 = 3;
const DEFAULT_STEP: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_ATTEMPTS, DEFAULT_STEP)
    }
}

impl RetryPolicy {
    /// `attempts` is clamped to at least one.
    pub fn new(attempts: u32, step: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            step,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn step(&self) -> Duration {
        self.step
    }

    /// Run `op` until it succeeds, fails with an error `is_retriable`
    /// rejects, or the attempts are used up.
    ///
    /// The token is checked before every attempt. A cancelled token never
    /// interrupts an attempt that already started.
    pub async fn run<T, E, F, Fut, P>(
        &self,
        cancel: &CancellationToken,
        mut op: F,
        is_retriable: P,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: From<Cancelled> + fmt::Display,
    {
        let mut attempt = 1;
        loop {
            if attempt > 1 {
                // A huge configured step must not overflow into a panic.
                let delay = self.step.saturating_mul(attempt);
                tokio::select! {
                    _ = cancel.cancelled() => {
                        warn!("retry cancelled while waiting for attempt {}", attempt);
                        return Err(Cancelled.into());
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            if cancel.is_cancelled() {
                warn!("retry cancelled before attempt {}", attempt);
                return Err(Cancelled.into());
            }

            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !is_retriable(&err) {
                return Err(err);
            }

            if attempt >= self.attempts {
                warn!("all {} attempts failed, last error: {}", self.attempts, err);
                return Err(err);
            }

            info!("going to retry #{} after error: {}", attempt, err);
            attempt += 1;
        }
    }
}
