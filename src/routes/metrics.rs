//! Prometheus metric registry and `/metrics` exposition, grounded on the
//! teacher's `r2e-observability` instrumentation conventions (counters keyed
//! by route/outcome, a single process-wide registry) generalized to this
//! gateway's request/adapter/breaker surface.

use prometheus::{Encoder, HistogramVec, IntCounterVec, IntGaugeVec, Registry, TextEncoder};

pub struct Metrics {
    registry: Registry,
    pub requests_total: IntCounterVec,
    pub request_duration_seconds: HistogramVec,
    pub adapter_calls_total: IntCounterVec,
    pub circuit_breaker_state: IntGaugeVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            prometheus::Opts::new("aigateway_requests_total", "Total HTTP requests by route and status"),
            &["route", "status"],
        )
        .expect("valid metric spec");

        let request_duration_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new("aigateway_request_duration_seconds", "HTTP request latency by route"),
            &["route"],
        )
        .expect("valid metric spec");

        let adapter_calls_total = IntCounterVec::new(
            prometheus::Opts::new("aigateway_adapter_calls_total", "Total adapter invocations by provider and outcome"),
            &["provider", "outcome"],
        )
        .expect("valid metric spec");

        let circuit_breaker_state = IntGaugeVec::new(
            prometheus::Opts::new("aigateway_circuit_breaker_state", "Circuit breaker state (0=closed,1=half_open,2=open) by provider"),
            &["provider"],
        )
        .expect("valid metric spec");

        registry.register(Box::new(requests_total.clone())).expect("register requests_total");
        registry.register(Box::new(request_duration_seconds.clone())).expect("register request_duration_seconds");
        registry.register(Box::new(adapter_calls_total.clone())).expect("register adapter_calls_total");
        registry.register(Box::new(circuit_breaker_state.clone())).expect("register circuit_breaker_state");

        Self { registry, requests_total, request_duration_seconds, adapter_calls_total, circuit_breaker_state }
    }

    pub fn record_request(&self, route: &str, status: u16, duration_secs: f64) {
        self.requests_total.with_label_values(&[route, &status.to_string()]).inc();
        self.request_duration_seconds.with_label_values(&[route]).observe(duration_secs);
    }

    pub fn record_adapter_call(&self, provider: &str, outcome: &str) {
        self.adapter_calls_total.with_label_values(&[provider, outcome]).inc();
    }

    /// Encodes the full registry in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        encoder.encode(&families, &mut buffer).expect("prometheus text encoding never fails on valid metrics");
        String::from_utf8(buffer).expect("prometheus text encoder always emits valid utf-8")
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_registered_metric_names() {
        let metrics = Metrics::new();
        metrics.record_request("/api/v1/chat", 200, 0.05);
        let text = metrics.render();
        assert!(text.contains("aigateway_requests_total"));
    }
}
