//! Login, refresh, logout, and user/API-key management. Grounded on
//! `api/auth_routes.py`'s Pydantic request/response shapes and its
//! `login()` handler sequence (lookup → audit-and-401 on miss → verify
//! password → issue both tokens).

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, GatewayResult};
use crate::models::{AuditEvent, AuditEventType, UserRole};
use crate::security::extractor::AuthenticatedUser;
use crate::security::jwt::TokenType;
use crate::security::{api_key, password, rbac, SecurityError};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
}

fn audit_now(storage: &crate::storage::Storage, event_type: AuditEventType, user_id: Option<&str>, details: serde_json::Value) {
    let storage = storage.clone();
    let user_id = user_id.map(String::from);
    tokio::spawn(async move {
        let event = AuditEvent {
            id: uuid::Uuid::new_v4().to_string(),
            event_type,
            user_id,
            resource_type: Some("user".to_string()),
            resource_id: None,
            ip: None,
            user_agent: None,
            details,
            created_at: chrono::Utc::now().timestamp(),
        };
        let _ = storage.log_audit_event(&event).await;
    });
}

pub async fn login(State(state): State<AppState>, Json(req): Json<LoginRequest>) -> GatewayResult<Json<TokenPair>> {
    let user = state.storage.get_user_by_username(&req.username).await?;
    let Some(user) = user else {
        audit_now(&state.storage, AuditEventType::AuthFailure, None, serde_json::json!({"username": req.username}));
        return Err(GatewayError::InvalidCredential("invalid username or password".to_string()));
    };

    let Some(hash) = &user.password_hash else {
        audit_now(&state.storage, AuditEventType::AuthFailure, Some(&user.id), serde_json::json!({"reason": "no password set"}));
        return Err(GatewayError::InvalidCredential("invalid username or password".to_string()));
    };

    if !password::verify_password(&req.password, hash) {
        audit_now(&state.storage, AuditEventType::AuthFailure, Some(&user.id), serde_json::json!({}));
        return Err(GatewayError::InvalidCredential("invalid username or password".to_string()));
    }

    let access_token = state.jwt.issue(&user.id, &user.username, user.role, TokenType::Access)?;
    let refresh_token = state.jwt.issue(&user.id, &user.username, user.role, TokenType::Refresh)?;
    audit_now(&state.storage, AuditEventType::AuthSuccess, Some(&user.id), serde_json::json!({}));

    Ok(Json(TokenPair { access_token, refresh_token, token_type: "Bearer" }))
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

pub async fn refresh(State(state): State<AppState>, Json(req): Json<RefreshRequest>) -> GatewayResult<Json<TokenPair>> {
    let claims = state.jwt.verify(&req.refresh_token, TokenType::Refresh)?;
    let user = state.storage.get_user_by_id(&claims.user_id).await?.ok_or(SecurityError::InvalidCredential("user no longer exists".into()))?;

    let access_token = state.jwt.issue(&user.id, &user.username, user.role, TokenType::Access)?;
    let refresh_token = state.jwt.issue(&user.id, &user.username, user.role, TokenType::Refresh)?;
    Ok(Json(TokenPair { access_token, refresh_token, token_type: "Bearer" }))
}

pub async fn logout(State(state): State<AppState>, user: AuthenticatedUser) -> GatewayResult<Json<serde_json::Value>> {
    audit_now(&state.storage, AuditEventType::AuthLogout, Some(&user.user_id), serde_json::json!({}));
    Ok(Json(serde_json::json!({"status": "logged out"})))
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user_id: String,
    pub username: String,
    pub role: UserRole,
}

pub async fn me(user: AuthenticatedUser) -> Json<MeResponse> {
    Json(MeResponse { user_id: user.user_id, username: user.username, role: user.role })
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: Option<String>,
    pub password: String,
    #[serde(default = "default_role")]
    pub role: UserRole,
}

fn default_role() -> UserRole {
    UserRole::User
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: String,
    pub username: String,
    pub role: UserRole,
}

/// Admin-only: create a new user account. Enforced by `rbac::has_permission`
/// rather than the route table, since this gateway has one identity type and
/// no separate role-guard middleware layer.
pub async fn create_user(State(state): State<AppState>, actor: AuthenticatedUser, Json(req): Json<CreateUserRequest>) -> GatewayResult<Json<UserResponse>> {
    if !actor.has_permission(rbac::Permission::AdminUsers) {
        return Err(GatewayError::PermissionDenied("admin privileges required".to_string()));
    }
    let hash = password::hash_password(&req.password)?;
    let user = state.storage.create_user(&req.username, req.email.as_deref(), Some(&hash), req.role).await?;
    audit_now(&state.storage, AuditEventType::AdminAction, Some(&actor.user_id), serde_json::json!({"created_user": user.id}));
    Ok(Json(UserResponse { id: user.id, username: user.username, role: user.role }))
}

#[derive(Debug, Deserialize)]
pub struct CreateApiKeyRequest {
    pub name: Option<String>,
    pub expires_at: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ApiKeyResponse {
    pub id: String,
    pub api_key: String,
    pub name: Option<String>,
    pub expires_at: Option<i64>,
}

pub async fn create_api_key(
    State(state): State<AppState>,
    actor: AuthenticatedUser,
    Path(user_id): Path<String>,
    Json(req): Json<CreateApiKeyRequest>,
) -> GatewayResult<Json<ApiKeyResponse>> {
    if !rbac::check_resource_access(actor.role, &actor.user_id, Some(&user_id), rbac::Permission::AdminUsers) {
        return Err(GatewayError::PermissionDenied("cannot manage another user's API keys".to_string()));
    }
    let raw_key = api_key::generate_api_key();
    let hash = api_key::hash_api_key(&raw_key);
    let created = state.storage.create_api_key(&user_id, &hash, req.name.as_deref(), req.expires_at).await?;
    Ok(Json(ApiKeyResponse { id: created.id, api_key: raw_key, name: created.name, expires_at: created.expires_at }))
}

pub async fn list_api_keys(State(state): State<AppState>, actor: AuthenticatedUser, Path(user_id): Path<String>) -> GatewayResult<Json<Vec<ApiKeyResponse>>> {
    if !rbac::check_resource_access(actor.role, &actor.user_id, Some(&user_id), rbac::Permission::AdminUsers) {
        return Err(GatewayError::PermissionDenied("cannot view another user's API keys".to_string()));
    }
    let keys = state.storage.list_api_keys(&user_id).await?;
    Ok(Json(keys.into_iter().map(|k| ApiKeyResponse { id: k.id, api_key: k.redacted_hash(), name: k.name, expires_at: k.expires_at }).collect()))
}

pub async fn revoke_api_key(State(state): State<AppState>, actor: AuthenticatedUser, Path((user_id, key_id)): Path<(String, String)>) -> GatewayResult<Json<serde_json::Value>> {
    if !rbac::check_resource_access(actor.role, &actor.user_id, Some(&user_id), rbac::Permission::AdminUsers) {
        return Err(GatewayError::PermissionDenied("cannot revoke another user's API keys".to_string()));
    }
    state.storage.revoke_api_key(&key_id).await?;
    Ok(Json(serde_json::json!({"status": "revoked"})))
}

#[derive(Debug, Deserialize)]
pub struct AuditLogQuery {
    pub user_id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn audit_logs(State(state): State<AppState>, actor: AuthenticatedUser, axum::extract::Query(query): axum::extract::Query<AuditLogQuery>) -> GatewayResult<Json<Vec<crate::models::AuditEvent>>> {
    if !actor.has_permission(rbac::Permission::AdminManage) {
        return Err(GatewayError::PermissionDenied("admin privileges required".to_string()));
    }
    let limit = query.limit.unwrap_or(100).min(1000);
    let events = state.storage.get_audit_logs(query.user_id.as_deref(), None, limit, query.offset.unwrap_or(0)).await?;
    Ok(Json(events))
}
