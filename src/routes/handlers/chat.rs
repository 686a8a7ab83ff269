//! `POST /api/v1/chat` and conversation read endpoints. Grounded on
//! `api/routes.py`'s `ChatRequest`/`ChatResponse`/`ConversationResponse`
//! models and its `chat()` handler, reduced to a thin call into
//! `orchestrator::chat` now that routing/selection/persistence live there.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::context::ContextManager;
use crate::error::{GatewayError, GatewayResult};
use crate::orchestrator::{self, ChatRequest as OrchestratorRequest};
use crate::security::extractor::{ApiKeyIdentity, AuthenticatedUser};
use crate::security::rbac;
use crate::state::AppState;

fn validate_conversation_id(id: &str) -> GatewayResult<()> {
    if id.is_empty() || id.len() > 128 || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(GatewayError::Validation("conversation_id must match [a-zA-Z0-9_-]+".to_string()));
    }
    Ok(())
}

fn validate_project_id(id: &str) -> GatewayResult<()> {
    if id.contains("..") || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '/') {
        return Err(GatewayError::Validation("project_id contains invalid or path-traversing characters".to_string()));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct ChatPayload {
    pub message: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub tool: Option<String>,
    #[serde(default)]
    pub codebase_context: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub content: String,
    pub tool: String,
    pub conversation_id: String,
}

pub async fn chat(
    State(state): State<AppState>,
    user: Option<AuthenticatedUser>,
    _api_key: Option<ApiKeyIdentity>,
    Json(payload): Json<ChatPayload>,
) -> GatewayResult<Json<ChatResponse>> {
    if payload.message.is_empty() || payload.message.len() > 100_000 {
        return Err(GatewayError::Validation("message must be between 1 and 100000 characters".to_string()));
    }
    if let Some(id) = &payload.conversation_id {
        validate_conversation_id(id)?;
    }
    if let Some(id) = &payload.project_id {
        validate_project_id(id)?;
    }

    let user_id = user.map(|u| u.user_id);
    let request = OrchestratorRequest {
        message: payload.message,
        conversation_id: payload.conversation_id,
        project_id: payload.project_id,
        tool: payload.tool,
        codebase_context: payload.codebase_context,
        user_id,
    };

    let outcome = orchestrator::chat(&state, request).await?;
    Ok(Json(ChatResponse { content: outcome.content, tool: outcome.tool, conversation_id: outcome.conversation_id }))
}

#[derive(Debug, Serialize)]
pub struct ConversationResponse {
    pub conversation_id: String,
    pub project_id: Option<String>,
    pub messages: Vec<crate::models::Message>,
    pub tool_history: Vec<crate::models::ToolInvocation>,
    pub updated_at: i64,
}

pub async fn get_conversation(State(state): State<AppState>, user: Option<AuthenticatedUser>, Path(conversation_id): Path<String>) -> GatewayResult<Json<ConversationResponse>> {
    validate_conversation_id(&conversation_id)?;
    let manager = ContextManager::new(state.storage.clone());
    let context = manager
        .get(&conversation_id)
        .await?
        .ok_or_else(|| GatewayError::NotFound("conversation not found".to_string()))?;

    if let (Some(user), Some(owner)) = (&user, &context.owner_user_id) {
        if !rbac::check_resource_access(user.role, &user.user_id, Some(owner.as_str()), rbac::Permission::ChatRead) {
            return Err(GatewayError::PermissionDenied("not authorized to view this conversation".to_string()));
        }
    }

    Ok(Json(ConversationResponse {
        conversation_id: context.conversation_id,
        project_id: context.project_id,
        messages: context.messages,
        tool_history: context.tool_history,
        updated_at: context.updated_at,
    }))
}

pub async fn delete_conversation(State(state): State<AppState>, user: AuthenticatedUser, Path(conversation_id): Path<String>) -> GatewayResult<Json<serde_json::Value>> {
    validate_conversation_id(&conversation_id)?;
    let manager = ContextManager::new(state.storage.clone());
    let context = manager.get_or_create(Some(&conversation_id), None, None).await?;

    if !rbac::check_resource_access(user.role, &user.user_id, context.owner_user_id.as_deref(), rbac::Permission::ChatDelete) {
        return Err(GatewayError::PermissionDenied("not authorized to delete this conversation".to_string()));
    }

    manager.delete(&conversation_id).await?;
    Ok(Json(serde_json::json!({"status": "deleted"})))
}

#[derive(Debug, Deserialize)]
pub struct ListConversationsQuery {
    pub project_id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn list_conversations(State(state): State<AppState>, _user: AuthenticatedUser, Query(query): Query<ListConversationsQuery>) -> GatewayResult<Json<Vec<ConversationResponse>>> {
    let manager = ContextManager::new(state.storage.clone());
    let limit = query.limit.unwrap_or(50).min(500);
    let contexts = manager.list(query.project_id.as_deref(), limit, query.offset.unwrap_or(0)).await?;
    Ok(Json(
        contexts
            .into_iter()
            .map(|c| ConversationResponse {
                conversation_id: c.conversation_id,
                project_id: c.project_id,
                messages: c.messages,
                tool_history: c.tool_history,
                updated_at: c.updated_at,
            })
            .collect(),
    ))
}

#[derive(Debug, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub capabilities: Vec<crate::models::Capability>,
    pub supports_streaming: bool,
    pub supports_code_context: bool,
}

pub async fn list_tools(State(state): State<AppState>) -> Json<Vec<ToolDescriptor>> {
    Json(
        state
            .adapters
            .descriptors()
            .into_iter()
            .map(|d| ToolDescriptor { name: d.name, capabilities: d.capabilities, supports_streaming: d.supports_streaming, supports_code_context: d.supports_code_context })
            .collect(),
    )
}
