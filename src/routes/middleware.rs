//! Ingress middleware chain, outermost first: security headers, request-ID,
//! structured request logging, API-key gate, token-bucket rate limit,
//! optional CSRF, input validation. Body-size cap and CORS are installed as
//! `tower_http` layers in `routes::router` instead of here, since `tower_http`
//! already ships exactly those two as drop-in layers.
//!
//! Grounded on `api/middleware.py`'s `SecurityHeadersMiddleware`,
//! `APIKeyMiddleware`, `RateLimitMiddleware`, and `InputValidationMiddleware`,
//! and on `api/csrf.py`'s double-submit-cookie `CSRFProtectionMiddleware`,
//! translated from Starlette's `dispatch(request, call_next)` shape onto
//! `axum::middleware::from_fn_with_state`.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderName, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use rand::Rng;

use crate::state::AppState;

use super::extractor_helpers::{client_identity, public_path};

/// `X-Content-Type-Options`, `X-Frame-Options`, HSTS (HTTPS only), a strict
/// CSP, `X-Request-ID`, and the rest of the header set from spec.md §6.
pub async fn security_headers(req: Request, next: Next) -> Response {
    let is_https = req.uri().scheme_str() == Some("https");
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    headers.insert(HeaderName::from_static("x-content-type-options"), HeaderValue::from_static("nosniff"));
    headers.insert(HeaderName::from_static("x-frame-options"), HeaderValue::from_static("DENY"));
    headers.insert(HeaderName::from_static("x-xss-protection"), HeaderValue::from_static("1; mode=block"));
    headers.insert(HeaderName::from_static("referrer-policy"), HeaderValue::from_static("strict-origin-when-cross-origin"));
    headers.insert(
        HeaderName::from_static("permissions-policy"),
        HeaderValue::from_static("geolocation=(), microphone=(), camera=()"),
    );
    if is_https {
        headers.insert(
            HeaderName::from_static("strict-transport-security"),
            HeaderValue::from_static("max-age=31536000; includeSubDomains; preload"),
        );
    }
    headers.insert(
        HeaderName::from_static("content-security-policy"),
        HeaderValue::from_static(
            "default-src 'self'; script-src 'self'; style-src 'self' 'unsafe-inline'; img-src 'self' data: https:; \
             font-src 'self' data:; connect-src 'self' https:; frame-ancestors 'none'; base-uri 'self'; form-action 'self';",
        ),
    );
    response
}

/// Honors an incoming `X-Request-ID`, else mints a UUIDv4; echoes it back on
/// the response so clients and server logs can correlate.
pub async fn request_id(mut req: Request, next: Next) -> Response {
    let header_name = HeaderName::from_static("x-request-id");
    let id = req
        .headers()
        .get(&header_name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    req.extensions_mut().insert(RequestId(id.clone()));

    let mut response = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(header_name, value);
    }
    response
}

#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Structured access log, one event per request, with method/path/status/latency.
pub async fn request_logger(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let start = std::time::Instant::now();
    let response = next.run(req).await;
    let elapsed = start.elapsed();
    tracing::info!(%method, %path, status = response.status().as_u16(), elapsed_ms = elapsed.as_millis() as u64, "request completed");
    response
}

/// Coarse shared-secret gate for mobile/API clients, skipping health,
/// metrics, and the login/refresh routes (a client cannot present a JWT
/// before it has one). If no API key is configured the gateway runs in
/// development mode and admits every caller, matching `api/middleware.py`.
pub async fn api_key_gate(State(state): State<AppState>, req: Request<Body>, next: Next) -> Response {
    let path = req.uri().path();
    if public_path(path) {
        return next.run(req).await;
    }

    let configured = state.config.valid_api_key.as_deref().or(state.config.mobile_api_key.as_deref());
    let Some(configured) = configured else {
        return next.run(req).await;
    };

    let (parts, body) = req.into_parts();
    let provided = crate::security::extractor::extract_api_key(&parts);
    if provided.as_deref() != Some(configured) {
        return (
            StatusCode::UNAUTHORIZED,
            [(axum::http::header::WWW_AUTHENTICATE, "ApiKey")],
            "invalid or missing API key",
        )
            .into_response();
    }

    next.run(Request::from_parts(parts, body)).await
}

/// Token-bucket rate limit keyed by API-key prefix (preferred) or remote
/// address, at `config.api.rate_limit_per_minute` requests/minute.
pub async fn rate_limit(State(state): State<AppState>, req: Request<Body>, next: Next) -> Response {
    let path = req.uri().path();
    if public_path(path) {
        return next.run(req).await;
    }

    let (parts, body) = req.into_parts();
    let key = client_identity(&parts);
    let limit = state.config.api.rate_limit_per_minute;
    let refill_per_sec = (limit as f64) / 60.0;

    let limiter = &state.request_rate_limiter;
    let allowed = limiter.try_acquire(&key, 1.0).await;
    let remaining = limiter.remaining(&key).await;

    if !allowed {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            [
                ("X-RateLimit-Limit", limit.to_string()),
                ("X-RateLimit-Remaining", "0".to_string()),
                ("Retry-After", "60".to_string()),
            ],
            "rate limit exceeded",
        )
            .into_response();
    }
    let _ = refill_per_sec;

    let mut response = next.run(Request::from_parts(parts, body)).await;
    let headers = response.headers_mut();
    if let Ok(v) = HeaderValue::from_str(&limit.to_string()) {
        headers.insert(HeaderName::from_static("x-ratelimit-limit"), v);
    }
    if let Ok(v) = HeaderValue::from_str(&remaining.to_string()) {
        headers.insert(HeaderName::from_static("x-ratelimit-remaining"), v);
    }
    response
}

const CSRF_COOKIE: &str = "csrf_token";

fn generate_csrf_token() -> String {
    let bytes: [u8; 24] = rand::thread_rng().gen();
    base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, bytes)
}

fn cookie_value<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header.split(';').map(str::trim).find_map(|kv| kv.strip_prefix(name)?.strip_prefix('='))
}

/// Double-submit-cookie CSRF protection for state-changing methods, active
/// only when `config.enable_csrf` is set (per SPEC_FULL.md's resolution of
/// the Open Question on CSRF scope). Safe methods (GET/HEAD/OPTIONS) always
/// pass through and refresh the cookie.
pub async fn csrf(State(state): State<AppState>, req: Request<Body>, next: Next) -> Response {
    if !state.config.enable_csrf {
        return next.run(req).await;
    }

    let safe = matches!(req.method(), &Method::GET | &Method::HEAD | &Method::OPTIONS);
    let cookie_header = req.headers().get(axum::http::header::COOKIE).and_then(|v| v.to_str().ok()).map(str::to_string);
    let cookie_token = cookie_header.as_deref().and_then(|h| cookie_value(h, CSRF_COOKIE)).map(str::to_string);

    if !safe {
        let header_token = req.headers().get("x-csrf-token").and_then(|v| v.to_str().ok()).map(str::to_string);
        match (&header_token, &cookie_token) {
            (Some(h), Some(c)) if h == c => {}
            _ => return (StatusCode::FORBIDDEN, "CSRF token missing or invalid").into_response(),
        }
    }

    let mut response = next.run(req).await;
    let new_token = generate_csrf_token();
    if let Ok(v) = HeaderValue::from_str(&format!("{CSRF_COOKIE}={new_token}; SameSite=Strict; Path=/")) {
        response.headers_mut().append(axum::http::header::SET_COOKIE, v);
    }
    response
}

const MAX_QUERY_PARAM_LEN: usize = 1000;
const SQL_DANGER_PATTERNS: &[&str] = &["--", ";--", "/*", "*/", "xp_", "union select", "drop table"];

fn looks_dangerous(value: &str) -> bool {
    if value.len() > MAX_QUERY_PARAM_LEN {
        return true;
    }
    if value.chars().any(|c| c.is_control() && c != '\t') {
        return true;
    }
    let lower = value.to_lowercase();
    SQL_DANGER_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Rejects requests whose query parameters exceed a length cap, contain
/// control characters, or match an obvious SQL-injection pattern. Request
/// bodies are validated by the handler's own deserialization, not here.
pub async fn input_validation(req: Request<Body>, next: Next) -> Response {
    let path = req.uri().path();
    if public_path(path) {
        return next.run(req).await;
    }

    if let Some(query) = req.uri().query() {
        for pair in query.split('&') {
            let value = pair.split_once('=').map(|(_, v)| v).unwrap_or(pair);
            if looks_dangerous(value) {
                return (StatusCode::BAD_REQUEST, format!("invalid query parameter: {pair}")).into_response();
            }
        }
    }

    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_values_are_dangerous() {
        assert!(looks_dangerous(&"a".repeat(MAX_QUERY_PARAM_LEN + 1)));
    }

    #[test]
    fn sql_comment_markers_are_dangerous() {
        assert!(looks_dangerous("1; DROP TABLE users;--"));
    }

    #[test]
    fn ordinary_values_are_safe() {
        assert!(!looks_dangerous("hello-world_123"));
    }

    #[test]
    fn cookie_value_extracts_named_cookie() {
        assert_eq!(cookie_value("a=1; csrf_token=abc; b=2", CSRF_COOKIE), Some("abc"));
        assert_eq!(cookie_value("a=1", CSRF_COOKIE), None);
    }
}
