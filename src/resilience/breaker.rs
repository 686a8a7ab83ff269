//! Three-state circuit breaker: CLOSED → OPEN → HALF_OPEN → CLOSED.

use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitOpenError(pub String);

impl std::fmt::Display for CircuitOpenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "circuit breaker '{}' is open", self.0)
    }
}
impl std::error::Error for CircuitOpenError {}

struct Inner {
    state: CircuitState,
    failures: u32,
    successes: u32,
    opened_at: Option<Instant>,
}

/// Named circuit breaker; all transitions are serialized under a per-breaker
/// mutex held only for the local state update, never across the wrapped call.
pub struct CircuitBreaker {
    pub name: String,
    failure_threshold: u32,
    success_threshold: u32,
    timeout: Duration,
    inner: Mutex<Inner>,
}

/// Either the wrapped operation's own error, or the breaker failing fast.
pub enum BreakerError<E> {
    Open(CircuitOpenError),
    Inner(E),
}

impl<E: std::fmt::Debug> std::fmt::Debug for BreakerError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerError::Open(e) => write!(f, "{e:?}"),
            BreakerError::Inner(e) => write!(f, "{e:?}"),
        }
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, failure_threshold: u32, success_threshold: u32, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            failure_threshold,
            success_threshold,
            timeout,
            inner: Mutex::new(Inner { state: CircuitState::Closed, failures: 0, successes: 0, opened_at: None }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }

    fn check_state(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == CircuitState::Open {
            if let Some(opened_at) = inner.opened_at {
                if opened_at.elapsed() >= self.timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.successes = 0;
                }
            }
        }
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.failures = 0;
        if inner.state == CircuitState::HalfOpen {
            inner.successes += 1;
            if inner.successes >= self.success_threshold {
                inner.state = CircuitState::Closed;
                inner.successes = 0;
            }
        }
    }

    fn on_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.failures += 1;
        inner.opened_at = Some(Instant::now());
        match inner.state {
            CircuitState::HalfOpen => inner.state = CircuitState::Open,
            CircuitState::Closed if inner.failures >= self.failure_threshold => {
                inner.state = CircuitState::Open;
            }
            _ => {}
        }
    }

    /// Check state, invoke `op` if the circuit admits the call, record the
    /// outcome. Fails fast with `BreakerError::Open` without invoking `op`
    /// while the circuit is OPEN and the timeout has not elapsed.
    pub async fn call<T, E, F, Fut>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.check_state();
        if self.state() == CircuitState::Open {
            return Err(BreakerError::Open(CircuitOpenError(self.name.clone())));
        }

        match op().await {
            Ok(v) => {
                self.on_success();
                Ok(v)
            }
            Err(e) => {
                self.on_failure();
                Err(BreakerError::Inner(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_after_failure_threshold_and_fails_fast() {
        let breaker = CircuitBreaker::new("test", 2, 1, Duration::from_secs(60));
        for _ in 0..2 {
            let result: Result<(), BreakerError<&str>> = breaker.call(|| async { Err("boom") }).await;
            assert!(matches!(result, Err(BreakerError::Inner(_))));
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        let mut invoked = false;
        let result: Result<(), BreakerError<&str>> = breaker
            .call(|| {
                invoked = true;
                async { Ok(()) }
            })
            .await;
        assert!(matches!(result, Err(BreakerError::Open(_))));
        assert!(!invoked);
    }

    #[tokio::test]
    async fn half_open_recovers_to_closed() {
        let breaker = CircuitBreaker::new("test", 1, 1, Duration::from_millis(10));
        let _: Result<(), BreakerError<&str>> = breaker.call(|| async { Err("boom") }).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let result: Result<(), BreakerError<&str>> = breaker.call(|| async { Ok(()) }).await;
        assert!(result.is_ok());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("test", 1, 2, Duration::from_millis(10));
        let _: Result<(), BreakerError<&str>> = breaker.call(|| async { Err("boom") }).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        let _: Result<(), BreakerError<&str>> = breaker.call(|| async { Err("boom") }).await;
        assert_eq!(breaker.state(), CircuitState::Open);
    }
}
