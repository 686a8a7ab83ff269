use std::sync::Arc;

use crate::adapters::AdapterRegistry;
use crate::config::Config;
use crate::resilience::{CircuitBreaker, RateLimitRegistry};
use crate::security::jwt::JwtValidator;
use crate::storage::Storage;

use dashmap::DashMap;

/// Shared application state threaded through every request handler. Mirrors
/// the teacher's plain `AppState` (services + pool + config) rather than the
/// full bean/DI container, since this gateway wires its own router by hand.
#[derive(Clone)]
pub struct AppState {
    pub storage: Storage,
    pub config: Arc<Config>,
    pub jwt: Arc<JwtValidator>,
    pub adapters: Arc<AdapterRegistry>,
    pub request_rate_limiter: RateLimitRegistry,
    /// One breaker per provider, created lazily on first use.
    pub breakers: Arc<DashMap<String, Arc<CircuitBreaker>>>,
    /// One rate limiter per provider, for the orchestrator's upstream gate.
    pub provider_rate_limiter: RateLimitRegistry,
    pub metrics: Arc<crate::routes::metrics::Metrics>,
}

impl AppState {
    pub fn breaker_for(&self, provider: &str) -> Arc<CircuitBreaker> {
        let (failure_threshold, success_threshold, timeout_secs) = match self.config.tools.get(provider) {
            Some(tool) => (tool.circuit_breaker_failure_threshold, tool.circuit_breaker_success_threshold, tool.circuit_breaker_timeout_secs),
            None => (5, 2, 60),
        };
        self.breakers
            .entry(provider.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(provider, failure_threshold, success_threshold, std::time::Duration::from_secs(timeout_secs))))
            .clone()
    }
}
