//! Small shared helpers for the middleware chain: the public-path allowlist
//! (paths that never require an API key, rate limit, or input validation)
//! and client-identity resolution for keyed rate limiting. Grounded on
//! `api/middleware.py`'s `PUBLIC_PATHS` list and `RateLimitMiddleware`'s
//! `_get_client_id`.

use axum::http::request::Parts;

const PUBLIC_PATHS: &[&str] = &[
    "/",
    "/health",
    "/ready",
    "/live",
    "/metrics",
    "/auth/login",
    "/auth/refresh",
];

/// True if `path` never needs an API key / rate limit / input validation.
pub fn public_path(path: &str) -> bool {
    PUBLIC_PATHS.contains(&path) || path.starts_with("/static")
}

/// Client identity used to key the rate limiter: the first 8 characters of
/// the caller's API key when present, else the remote socket address.
pub fn client_identity(parts: &Parts) -> String {
    if let Some(key) = crate::security::extractor::extract_api_key(parts) {
        return format!("key:{}", key.chars().take(8).collect::<String>());
    }
    if let Some(addr) = parts.extensions.get::<axum::extract::ConnectInfo<std::net::SocketAddr>>() {
        return format!("addr:{}", addr.0.ip());
    }
    "anonymous".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_and_metrics_are_public() {
        assert!(public_path("/health"));
        assert!(public_path("/metrics"));
        assert!(public_path("/auth/login"));
    }

    #[test]
    fn chat_route_is_not_public() {
        assert!(!public_path("/api/v1/chat"));
    }
}
