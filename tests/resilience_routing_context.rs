//! Crate-level integration coverage for the resilience primitives (retry,
//! circuit breaker, token bucket), the routing engine, and the context
//! window-fit algorithm, against the testable properties in spec.md §8.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use aigateway::config::RoutingConfig;
use aigateway::context::window_fit;
use aigateway::models::{Message, Role};
use aigateway::resilience::breaker::{BreakerError, CircuitBreaker};
use aigateway::resilience::rate_limit::TokenBucket;
use aigateway::resilience::retry::{Retryable, RetryPolicy};
use aigateway::routing::route;

#[derive(Debug, Clone, Copy)]
struct FlakyError {
    retryable: bool,
}

impl Retryable for FlakyError {
    fn is_retryable(&self) -> bool {
        self.retryable
    }
}

#[tokio::test]
async fn retry_gives_up_after_one_attempt_on_non_retryable_error() {
    let policy = RetryPolicy { max_attempts: 5, ..RetryPolicy::default() };
    let attempts = AtomicU32::new(0);

    let result = policy
        .retry(|| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(FlakyError { retryable: false }) }
        })
        .await;

    assert!(result.is_err());
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn retry_succeeds_within_max_attempts() {
    let policy = RetryPolicy {
        max_attempts: 5,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        ..RetryPolicy::default()
    };
    let attempts = AtomicU32::new(0);

    let result: Result<&str, FlakyError> = policy
        .retry(|| {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(FlakyError { retryable: true })
                } else {
                    Ok("ok")
                }
            }
        })
        .await;

    assert_eq!(result.unwrap(), "ok");
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[derive(Debug)]
struct UpstreamError;

#[tokio::test]
async fn circuit_breaker_fails_fast_without_invoking_the_call() {
    let breaker = CircuitBreaker::new("test-provider", 2, 1, Duration::from_secs(60));
    let calls = AtomicU32::new(0);

    for _ in 0..2 {
        let result = breaker
            .call(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(UpstreamError) }
            })
            .await;
        assert!(matches!(result, Err(BreakerError::Inner(_))));
    }

    // Third call: breaker is open, must not invoke the wrapped op.
    let result = breaker.call(|| async { Ok::<_, UpstreamError>(()) }).await;
    assert!(matches!(result, Err(BreakerError::Open(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn circuit_breaker_recovers_through_half_open() {
    let breaker = CircuitBreaker::new("test-provider-2", 1, 1, Duration::from_millis(20));

    let result = breaker.call(|| async { Err::<(), _>(UpstreamError) }).await;
    assert!(matches!(result, Err(BreakerError::Inner(_))));

    tokio::time::sleep(Duration::from_millis(30)).await;

    // Past the timeout: half-open, the call is actually attempted and succeeds.
    let result = breaker.call(|| async { Ok::<_, UpstreamError>(42) }).await;
    assert_eq!(result.unwrap(), 42);

    // Breaker closed again: a subsequent failure alone does not trip it open
    // (failure_threshold restarts once closed).
}

#[tokio::test]
async fn token_bucket_allows_burst_then_blocks_then_refills() {
    let bucket = TokenBucket::new(3.0, 10.0); // capacity 3, refill 10/s

    assert!(bucket.try_acquire(1.0).await);
    assert!(bucket.try_acquire(1.0).await);
    assert!(bucket.try_acquire(1.0).await);
    assert!(!bucket.try_acquire(1.0).await);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(bucket.try_acquire(1.0).await);
}

#[test]
fn explicit_tool_always_wins_routing() {
    let config = RoutingConfig::default();
    let decision = route("please refactor this function", Some("gpt"), &config);
    assert_eq!(decision.selected_tools, vec!["gpt".to_string()]);
    assert_eq!(decision.reasoning, "explicit");
}

#[test]
fn code_editing_keywords_route_to_the_code_editing_rule_list() {
    let config = RoutingConfig {
        default_tool: "default".into(),
        code_editing: vec!["claude".into(), "gpt".into()],
        research: vec!["gemini".into()],
        general_chat: vec!["gpt".into()],
    };
    let decision = route("can you fix this bug in my function?", None, &config);
    assert_eq!(decision.selected_tools.first(), Some(&"claude".to_string()));
}

#[test]
fn messages_with_no_keyword_match_fall_back_to_general_chat() {
    let config = RoutingConfig {
        default_tool: "default".into(),
        code_editing: vec!["claude".into()],
        research: vec!["gemini".into()],
        general_chat: vec!["gpt".into()],
    };
    let decision = route("good morning, how are you today", None, &config);
    assert_eq!(decision.selected_tools.first(), Some(&"gpt".to_string()));
}

#[test]
fn window_fit_keeps_estimate_under_budget_and_preserves_chronological_order() {
    let mut messages = Vec::new();
    for i in 0..100 {
        messages.push(Message { role: Role::User, content: "x".repeat(10_000), timestamp: i });
    }
    let window = 8192u32;
    let reserved = 1000u32;

    let fitted = window_fit(&messages, window, reserved);

    let estimated: u32 = fitted.iter().map(|m| (m.content.len() / 4) as u32).sum();
    assert!(estimated <= window - reserved);

    // Retained messages must be the most-recent contiguous suffix, in order.
    let timestamps: Vec<i64> = fitted.iter().map(|m| m.timestamp).collect();
    let mut sorted = timestamps.clone();
    sorted.sort();
    assert_eq!(timestamps, sorted);
    if let Some(&first) = timestamps.first() {
        assert_eq!(&messages[first as usize..messages.len()].iter().map(|m| m.timestamp).collect::<Vec<_>>(), &timestamps);
    }
}

#[test]
fn window_fit_always_keeps_system_messages_when_they_fit() {
    let mut messages = vec![Message { role: Role::System, content: "be nice".into(), timestamp: 0 }];
    for i in 1..50 {
        messages.push(Message { role: Role::User, content: "y".repeat(500), timestamp: i });
    }
    let fitted = window_fit(&messages, 2000, 100);
    assert!(fitted.iter().any(|m| m.role == Role::System));
}
