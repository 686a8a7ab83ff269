//! Provider adapter layer: a uniform polymorphic capability over
//! heterogeneous upstream HTTP APIs, unary and streaming. Grounded on the
//! teacher's `r2e-security::jwt` "one trait, several concrete
//! implementations, registered into a state map" shape, and on the request
//! construction/response parsing conventions of `examples/Wandalen-api_llm`'s
//! per-provider clients (`api/openai/src/chat.rs`, `api/claude`, `api/gemini`)
//! for the wire-format translation, simplified to the single chat-completion
//! shape this gateway needs.

pub mod claude;
pub mod gemini;
pub mod openai;
pub mod registry;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::models::{CapabilityDescriptor, Message};
use crate::resilience::retry::Retryable;

pub use registry::AdapterRegistry;

#[derive(Debug, Clone)]
pub enum AdapterError {
    NotConfigured(String),
    Unavailable(String),
    Timeout,
    RateLimited,
    UpstreamError(String),
    ProtocolError(String),
    Cancelled,
}

impl std::fmt::Display for AdapterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdapterError::NotConfigured(m) => write!(f, "adapter not configured: {m}"),
            AdapterError::Unavailable(m) => write!(f, "adapter unavailable: {m}"),
            AdapterError::Timeout => write!(f, "upstream timeout"),
            AdapterError::RateLimited => write!(f, "upstream rate limited"),
            AdapterError::UpstreamError(m) => write!(f, "upstream error: {m}"),
            AdapterError::ProtocolError(m) => write!(f, "protocol error: {m}"),
            AdapterError::Cancelled => write!(f, "request cancelled"),
        }
    }
}
impl std::error::Error for AdapterError {}

impl Retryable for AdapterError {
    fn is_retryable(&self) -> bool {
        matches!(self, AdapterError::Timeout | AdapterError::RateLimited | AdapterError::UpstreamError(_))
    }
}

impl From<reqwest::Error> for AdapterError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AdapterError::Timeout
        } else if let Some(status) = err.status() {
            if status.as_u16() == 429 {
                AdapterError::RateLimited
            } else if status.is_server_error() {
                AdapterError::UpstreamError(err.to_string())
            } else {
                AdapterError::ProtocolError(err.to_string())
            }
        } else {
            AdapterError::UpstreamError(err.to_string())
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub model: String,
    pub usage: Usage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub citations: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterResponse {
    pub content: String,
    pub tool: String,
    pub metadata: ResponseMetadata,
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String, AdapterError>> + Send>>;

pub const UNARY_TIMEOUT_SECS: u64 = 60;
pub const STREAMING_TIMEOUT_SECS: u64 = 120;
pub const HEALTH_PROBE_TIMEOUT_SECS: u64 = 2;

/// Uniform capability every concrete provider adapter implements: unary
/// chat, streaming chat, availability probe, capability descriptor.
#[async_trait]
pub trait Adapter: Send + Sync {
    fn name(&self) -> &str;
    fn capabilities(&self) -> &CapabilityDescriptor;
    async fn is_available(&self) -> bool;
    async fn chat(&self, messages: &[Message], codebase_context: Option<&serde_json::Value>) -> Result<AdapterResponse, AdapterError>;
    async fn stream_chat(&self, messages: &[Message], codebase_context: Option<&serde_json::Value>) -> Result<ChunkStream, AdapterError>;
}

/// Assembles a synthetic system message from an opaque codebase-context map,
/// for adapters whose capability descriptor advertises `supports_code_context`.
pub fn codebase_context_message(codebase_context: &serde_json::Value) -> Message {
    let summary = serde_json::to_string_pretty(codebase_context).unwrap_or_else(|_| codebase_context.to_string());
    Message::new(
        crate::models::Role::System,
        format!("The following codebase context has been attached to this conversation:\n{summary}"),
    )
}
