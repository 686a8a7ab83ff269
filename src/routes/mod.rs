//! Router assembly: every handler wired into a single `axum::Router<AppState>`
//! with the full middleware chain applied outermost-first. Grounded on
//! `api/middleware.py`'s `setup_middleware` ordering and the teacher's
//! convention of building the router in one place and serving it from
//! `main.rs`.

pub mod extractor_helpers;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod websocket;

use axum::http::Method;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

fn cors_layer(state: &AppState) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE, Method::OPTIONS])
        .allow_headers(tower_http::cors::Any);

    if state.config.is_development() && state.config.api.allowed_origins.is_empty() {
        return layer.allow_origin(tower_http::cors::Any);
    }

    let origins: Vec<_> = state
        .config
        .api
        .allowed_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state);

    let api = Router::new()
        .route("/api/v1/chat", post(handlers::chat::chat))
        .route("/api/v1/conversations", get(handlers::chat::list_conversations))
        .route("/api/v1/conversations/{id}", get(handlers::chat::get_conversation).delete(handlers::chat::delete_conversation))
        .route("/api/v1/tools", get(handlers::chat::list_tools))
        .route("/ws/chat", get(websocket::ws_chat));

    let auth = Router::new()
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/refresh", post(handlers::auth::refresh))
        .route("/auth/logout", post(handlers::auth::logout))
        .route("/auth/me", get(handlers::auth::me))
        .route("/auth/users", post(handlers::auth::create_user))
        .route("/auth/users/{id}/api-keys", post(handlers::auth::create_api_key).get(handlers::auth::list_api_keys))
        .route("/auth/users/{id}/api-keys/{key_id}", delete(handlers::auth::revoke_api_key))
        .route("/auth/audit/logs", get(handlers::auth::audit_logs));

    let observability = Router::new()
        .route("/", get(handlers::health::health))
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .route("/live", get(handlers::health::live))
        .route("/metrics", get(handlers::health::metrics));

    Router::new()
        .merge(api)
        .merge(auth)
        .merge(observability)
        .layer(axum::middleware::from_fn(middleware::input_validation))
        .layer(axum::middleware::from_fn_with_state(state.clone(), middleware::csrf))
        .layer(axum::middleware::from_fn_with_state(state.clone(), middleware::rate_limit))
        .layer(axum::middleware::from_fn_with_state(state.clone(), middleware::api_key_gate))
        .layer(axum::middleware::from_fn(middleware::request_logger))
        .layer(axum::middleware::from_fn(middleware::request_id))
        .layer(axum::middleware::from_fn(middleware::security_headers))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
