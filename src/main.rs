use std::sync::Arc;

use dashmap::DashMap;

use aigateway::adapters::AdapterRegistry;
use aigateway::config::Config;
use aigateway::resilience::RateLimitRegistry;
use aigateway::routes::metrics::Metrics;
use aigateway::security::jwt::JwtValidator;
use aigateway::state::AppState;
use aigateway::storage::Storage;
use aigateway::telemetry;

/// Access tokens expire quickly; refresh tokens last a week. The gateway has
/// no config field for these (see DESIGN.md), so they're fixed constants
/// rather than plumbed through `Config` for a single call site.
const ACCESS_TOKEN_MINUTES: i64 = 15;
const REFRESH_TOKEN_DAYS: i64 = 7;

/// Per-provider upstream gate: conservative enough to protect a typical
/// provider's own rate limit without needing per-provider tuning in config.
const PROVIDER_RATE_CAPACITY: f64 = 5.0;
const PROVIDER_RATE_REFILL_PER_SEC: f64 = 5.0;

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var("AIGATEWAY_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load(&config_path)?;

    telemetry::init(&config.log_level, config.log_format);
    tracing::info!(environment = %config.environment, "starting aigateway");

    let storage = Storage::connect(&config.storage).await?;
    storage.initialize().await?;

    let adapters = Arc::new(AdapterRegistry::from_config(&config));
    tracing::info!(adapter_count = adapters.len(), "provider adapters configured");

    let jwt = Arc::new(JwtValidator::new(&config.jwt_secret_key, ACCESS_TOKEN_MINUTES, REFRESH_TOKEN_DAYS));
    let request_rate_limiter = RateLimitRegistry::new(config.api.rate_limit_per_minute as f64, config.api.rate_limit_per_minute as f64 / 60.0);
    let provider_rate_limiter = RateLimitRegistry::new(PROVIDER_RATE_CAPACITY, PROVIDER_RATE_REFILL_PER_SEC);

    let state = AppState {
        storage,
        config: Arc::new(config),
        jwt,
        adapters,
        request_rate_limiter,
        breakers: Arc::new(DashMap::new()),
        provider_rate_limiter,
        metrics: Arc::new(Metrics::new()),
    };

    let app = aigateway::routes::router(state);

    let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
    tracing::info!(addr = "0.0.0.0:8080", "listening");
    axum::serve(listener, app.into_make_service_with_connect_info::<std::net::SocketAddr>()).await?;

    Ok(())
}
