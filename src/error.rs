use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::resilience::breaker::CircuitOpenError;
use crate::security::SecurityError;
use crate::storage::StorageError;

/// The closed error taxonomy for the gateway, mapped 1:1 onto the HTTP
/// status table of the error-handling design.
#[derive(Debug)]
pub enum GatewayError {
    Validation(String),
    AuthenticationRequired(String),
    InvalidCredential(String),
    PermissionDenied(String),
    NotFound(String),
    Conflict(String),
    PayloadTooLarge,
    RateLimited { retry_after_secs: u64 },
    NoCandidateAdapter(String),
    CircuitOpen(String),
    UpstreamExhausted(String),
    ServiceUnavailable(String),
    Internal(String),
}

impl GatewayError {
    fn status(&self) -> StatusCode {
        match self {
            GatewayError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            GatewayError::AuthenticationRequired(_) => StatusCode::UNAUTHORIZED,
            GatewayError::InvalidCredential(_) => StatusCode::UNAUTHORIZED,
            GatewayError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::Conflict(_) => StatusCode::CONFLICT,
            GatewayError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::NoCandidateAdapter(_) => StatusCode::BAD_REQUEST,
            GatewayError::CircuitOpen(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::UpstreamExhausted(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            GatewayError::Validation(m) => m.clone(),
            GatewayError::AuthenticationRequired(m) => m.clone(),
            GatewayError::InvalidCredential(m) => m.clone(),
            GatewayError::PermissionDenied(m) => m.clone(),
            GatewayError::NotFound(m) => m.clone(),
            GatewayError::Conflict(m) => m.clone(),
            GatewayError::PayloadTooLarge => "payload too large".to_string(),
            GatewayError::RateLimited { .. } => "rate limit exceeded".to_string(),
            GatewayError::NoCandidateAdapter(m) => m.clone(),
            GatewayError::CircuitOpen(m) => m.clone(),
            GatewayError::UpstreamExhausted(m) => m.clone(),
            GatewayError::ServiceUnavailable(m) => m.clone(),
            GatewayError::Internal(m) => m.clone(),
        }
    }
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for GatewayError {}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

fn error_body(message: &str) -> ErrorBody {
    ErrorBody { error: message.to_string(), details: None }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::warn!(error = %self, %status, "request rejected");
        }

        let body = axum::Json(error_body(&self.message()));
        let mut response = (status, body).into_response();
        if let GatewayError::RateLimited { retry_after_secs } = &self {
            response.headers_mut().insert(
                axum::http::header::RETRY_AFTER,
                (*retry_after_secs).into(),
            );
        }
        response
    }
}

impl From<StorageError> for GatewayError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound => GatewayError::NotFound("resource not found".into()),
            StorageError::Conflict(m) => GatewayError::Conflict(m),
            other => GatewayError::Internal(other.to_string()),
        }
    }
}

impl From<SecurityError> for GatewayError {
    fn from(err: SecurityError) -> Self {
        match err {
            SecurityError::MissingCredential => {
                GatewayError::AuthenticationRequired("authentication required".into())
            }
            SecurityError::InvalidCredential(m) => GatewayError::InvalidCredential(m),
            SecurityError::Expired => {
                GatewayError::InvalidCredential("credential expired".into())
            }
            SecurityError::Forbidden(m) => GatewayError::PermissionDenied(m),
            SecurityError::Internal(m) => GatewayError::Internal(m),
        }
    }
}

impl From<CircuitOpenError> for GatewayError {
    fn from(err: CircuitOpenError) -> Self {
        GatewayError::CircuitOpen(format!("circuit '{}' is open", err.0))
    }
}

impl From<crate::adapters::AdapterError> for GatewayError {
    fn from(err: crate::adapters::AdapterError) -> Self {
        use crate::adapters::AdapterError as A;
        match err {
            A::NotConfigured(m) => GatewayError::NoCandidateAdapter(m),
            A::Unavailable(m) => GatewayError::UpstreamExhausted(m),
            A::Timeout => GatewayError::UpstreamExhausted("upstream timeout".into()),
            A::RateLimited => GatewayError::UpstreamExhausted("upstream rate limited".into()),
            A::UpstreamError(m) => GatewayError::UpstreamExhausted(m),
            A::ProtocolError(m) => GatewayError::Validation(m),
            A::Cancelled => GatewayError::Internal("request cancelled".into()),
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_maps_to_422() {
        let err = GatewayError::Validation("bad field".into());
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn rate_limited_maps_to_429() {
        let err = GatewayError::RateLimited { retry_after_secs: 60 };
        assert_eq!(err.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn circuit_open_maps_to_500() {
        let err = GatewayError::CircuitOpen("gpt".into());
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
