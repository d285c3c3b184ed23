//! Reusable exponential backoff policy.
//!
//! One policy value is injected into both the analysis aggregator and the
//! sync coordinator so the rate-limit discipline lives in one place instead
//! of duplicated retry loops.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

/// Exponential backoff configuration.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Total attempts including the first (>= 1).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Multiplier applied to the delay after each retry.
    pub multiplier: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            multiplier: 2.0,
        }
    }
}

impl BackoffPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, multiplier: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            multiplier,
        }
    }

    /// Delay before retry number `retry` (0-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        Duration::from_secs_f64(self.base_delay.as_secs_f64() * self.multiplier.powi(retry as i32))
    }

    /// Run `op`, retrying while `is_retryable` says the error is transient.
    ///
    /// `on_backoff(retry, delay)` is invoked before each sleep, which lets
    /// callers log the schedule and tests assert it. The final error is
    /// returned once attempts are exhausted; non-retryable errors surface
    /// immediately.
    pub async fn run<T, E, Fut, Op, Retryable, OnBackoff>(
        &self,
        is_retryable: Retryable,
        mut on_backoff: OnBackoff,
        mut op: Op,
    ) -> Result<T, E>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        Retryable: Fn(&E) -> bool,
        OnBackoff: FnMut(u32, Duration),
    {
        let attempts = self.max_attempts.max(1);
        let mut retry = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if is_retryable(&err) && retry + 1 < attempts => {
                    let delay = self.delay_for(retry);
                    debug!("transient failure, backing off {:?} (retry {})", delay, retry + 1);
                    on_backoff(retry, delay);
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delay_doubles() {
        let policy = BackoffPolicy::new(5, Duration::from_millis(100), 2.0);
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_then_succeeds() {
        let policy = BackoffPolicy::new(5, Duration::from_millis(100), 2.0);
        let calls = AtomicU32::new(0);
        let mut delays = Vec::new();

        let result: Result<u32, &str> = policy
            .run(
                |_| true,
                |_, delay| delays.push(delay),
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n < 3 {
                            Err("rate limited")
                        } else {
                            Ok(n)
                        }
                    }
                },
            )
            .await;

        assert_eq!(result, Ok(3));
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error() {
        let policy = BackoffPolicy::new(3, Duration::from_millis(10), 2.0);
        let result: Result<(), &str> = policy
            .run(|_| true, |_, _| {}, || async { Err("still limited") })
            .await;
        assert_eq!(result, Err("still limited"));
    }

    #[tokio::test]
    async fn test_non_retryable_surfaces_immediately() {
        let policy = BackoffPolicy::new(5, Duration::from_millis(10), 2.0);
        let calls = AtomicU32::new(0);
        let result: Result<(), &str> = policy
            .run(
                |_| false,
                |_, _| panic!("must not back off"),
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err("fatal") }
                },
            )
            .await;
        assert_eq!(result, Err("fatal"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
