//! Bounded retry with linear backoff.
//!
//! Only errors that classify themselves as retriable are retried. Delays
//! grow by a fixed step from `initial_delay` and are capped at `max_delay`,
//! so the total sleep never exceeds `max_retries * max_delay`.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

/// Errors that know whether another attempt could succeed.
pub trait Retriable {
    fn is_retriable(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub step: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    /// Three retries after 1s, 3s and 5s.
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            step: Duration::from_secs(2),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (zero-based).
    pub fn delay(&self, retry: u32) -> Duration {
        self.initial_delay
            .saturating_add(self.step.saturating_mul(retry))
            .min(self.max_delay)
    }

    /// Upper bound of the time spent sleeping across all retries.
    pub fn max_total_delay(&self) -> Duration {
        (0..self.max_retries).map(|r| self.delay(r)).sum()
    }

    /// Run `op` until it succeeds, fails terminally, or retries run out.
    /// The last error is returned.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retriable + Display,
    {
        let mut retry = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retriable() && retry < self.max_retries => {
                    let delay = self.delay(retry);
                    retry += 1;
                    warn!(
                        error = %e,
                        attempt = retry,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "retriable failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    debug!(error = %e, retriable = e.is_retriable(), "giving up");
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[derive(Debug)]
    struct TestError(bool);

    impl Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "retriable={}", self.0)
        }
    }

    impl Retriable for TestError {
        fn is_retriable(&self) -> bool {
            self.0
        }
    }

    #[test]
    fn default_delays_are_linear_and_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_secs(1));
        assert_eq!(policy.delay(1), Duration::from_secs(3));
        assert_eq!(policy.delay(2), Duration::from_secs(5));
        assert_eq!(policy.delay(10), Duration::from_secs(5));
        assert_eq!(policy.max_total_delay(), Duration::from_secs(9));
    }

    #[test]
    fn delays_never_decrease() {
        let policy = RetryPolicy {
            max_retries: 20,
            initial_delay: Duration::from_millis(100),
            step: Duration::from_millis(250),
            max_delay: Duration::from_secs(2),
        };
        for r in 1..20 {
            assert!(policy.delay(r) >= policy.delay(r - 1));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retriable_error_hits_the_cap() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let started = tokio::time::Instant::now();

        let result: Result<(), TestError> = RetryPolicy::default()
            .run(|| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError(true)) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        assert_eq!(started.elapsed().as_secs(), 9);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_error_is_not_retried() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result: Result<(), TestError> = RetryPolicy::default()
            .run(|| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError(false)) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn success_after_transient_failures() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result = RetryPolicy::default()
            .run(|| {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(TestError(true))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn none_policy_makes_one_attempt() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let _: Result<(), TestError> = RetryPolicy::none()
            .run(|| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError(true)) }
            })
            .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
