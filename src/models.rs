//! Core data-model types shared across storage, context, routing and the
//! HTTP surface. Mirrors the entities of the data model: conversation
//! context, message, user, API key, audit event, cost record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: i64,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self { role, content: content.into(), timestamp: Utc::now().timestamp() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub tool: String,
    pub request: serde_json::Value,
    pub response: serde_json::Value,
    pub timestamp: i64,
}

/// A single conversation's persisted snapshot: messages, tool-call log, and
/// any opaque codebase attachment supplied by an external indexer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationContext {
    pub conversation_id: String,
    pub project_id: Option<String>,
    pub owner_user_id: Option<String>,
    pub messages: Vec<Message>,
    pub codebase_context: Option<serde_json::Value>,
    pub tool_history: Vec<ToolInvocation>,
    pub updated_at: i64,
}

impl ConversationContext {
    pub fn new(conversation_id: String, project_id: Option<String>, owner_user_id: Option<String>) -> Self {
        Self {
            conversation_id,
            project_id,
            owner_user_id,
            messages: Vec::new(),
            codebase_context: None,
            tool_history: Vec::new(),
            updated_at: Utc::now().timestamp(),
        }
    }

    pub fn new_id() -> String {
        Uuid::new_v4().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    User,
    Readonly,
}

impl std::str::FromStr for UserRole {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(UserRole::Admin),
            "user" => Ok(UserRole::User),
            "readonly" => Ok(UserRole::Readonly),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::User => "user",
            UserRole::Readonly => "readonly",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub role: UserRole,
    #[serde(skip_serializing)]
    pub api_key_hash: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: String,
    pub user_id: String,
    #[serde(skip_serializing)]
    pub key_hash: String,
    pub name: Option<String>,
    pub expires_at: Option<i64>,
    pub created_at: i64,
    pub revoked_at: Option<i64>,
}

impl ApiKey {
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        if self.revoked_at.is_some() {
            return false;
        }
        match self.expires_at {
            Some(exp) => exp > now.timestamp(),
            None => true,
        }
    }

    /// Short, non-secret prefix suitable for display in key-listing endpoints.
    pub fn redacted_hash(&self) -> String {
        self.key_hash.chars().take(8).collect::<String>() + "…"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    AuthSuccess,
    AuthFailure,
    AuthLogout,
    PermissionDenied,
    ResourceAccess,
    ResourceCreate,
    ResourceUpdate,
    ResourceDelete,
    ConfigChange,
    AdminAction,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::AuthSuccess => "auth.success",
            AuditEventType::AuthFailure => "auth.failure",
            AuditEventType::AuthLogout => "auth.logout",
            AuditEventType::PermissionDenied => "permission.denied",
            AuditEventType::ResourceAccess => "resource.access",
            AuditEventType::ResourceCreate => "resource.create",
            AuditEventType::ResourceUpdate => "resource.update",
            AuditEventType::ResourceDelete => "resource.delete",
            AuditEventType::ConfigChange => "config.change",
            AuditEventType::AdminAction => "admin.action",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: String,
    pub event_type: AuditEventType,
    pub user_id: Option<String>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub details: serde_json::Value,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostRecord {
    pub id: String,
    pub tool: String,
    pub model: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    /// USD, fixed-point with 6 decimals, stored as integer micro-dollars.
    pub cost_micros: i64,
    pub conversation_id: Option<String>,
    pub project_id: Option<String>,
    pub created_at: i64,
}

impl CostRecord {
    pub fn cost_usd(&self) -> f64 {
        self.cost_micros as f64 / 1_000_000.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    GeneralChat,
    Streaming,
    CodeContext,
    WebSearch,
    FunctionCalling,
    ImageGen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    pub name: String,
    pub capabilities: Vec<Capability>,
    pub max_context_tokens: u32,
    pub supports_streaming: bool,
    pub supports_code_context: bool,
}
