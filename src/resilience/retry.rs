//! Exponential-backoff retry policy with jitter.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

/// Classifies an error as retryable or not. Adapter errors implement this
/// directly; see `adapters::AdapterError`.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt numbered `attempt` (0-indexed retry count,
    /// i.e. the delay *after* the first failure is `delay(0)`).
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.exponential_base.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());
        let factor = if self.jitter {
            rand::thread_rng().gen_range(0.75..=1.0)
        } else {
            1.0
        };
        Duration::from_secs_f64(capped * factor)
    }

    /// Run `op`, retrying on retryable errors up to `max_attempts` total
    /// attempts. Returns the first success or the last error seen.
    pub async fn retry<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        E: Retryable,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.max_attempts || !e.is_retryable() {
                        return Err(e);
                    }
                    tokio::time::sleep(self.delay(attempt - 1)).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Err1 {
        retryable: bool,
    }
    impl Retryable for Err1 {
        fn is_retryable(&self) -> bool {
            self.retryable
        }
    }

    #[tokio::test]
    async fn non_retryable_error_fails_after_one_attempt() {
        let policy = RetryPolicy { initial_delay: Duration::from_millis(1), ..Default::default() };
        let mut calls = 0;
        let result: Result<(), Err1> = policy
            .retry(|| {
                calls += 1;
                async { Err(Err1 { retryable: false }) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn retryable_error_exhausts_max_attempts() {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            ..Default::default()
        };
        let mut calls = 0;
        let result: Result<(), Err1> = policy
            .retry(|| {
                calls += 1;
                async { Err(Err1 { retryable: true }) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let policy = RetryPolicy { initial_delay: Duration::from_millis(1), ..Default::default() };
        let mut calls = 0;
        let result = policy
            .retry(|| {
                calls += 1;
                let n = calls;
                async move {
                    if n < 2 {
                        Err(Err1 { retryable: true })
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 2);
    }

    #[test]
    fn delay_is_capped_at_max_delay() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(20),
            exponential_base: 4.0,
            jitter: false,
            ..Default::default()
        };
        assert_eq!(policy.delay(5), Duration::from_secs(20));
    }
}
