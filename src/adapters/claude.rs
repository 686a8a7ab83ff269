//! Anthropic Messages-API adapter. System messages are hoisted into the
//! top-level `system` field per the upstream wire format (unlike OpenAI's
//! flat message list), and streaming is consumed as
//! `content_block_delta`/`message_stop` SSE events.

use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use super::{
    codebase_context_message, Adapter, AdapterError, AdapterResponse, ChunkStream, ResponseMetadata, Usage,
    HEALTH_PROBE_TIMEOUT_SECS, STREAMING_TIMEOUT_SECS, UNARY_TIMEOUT_SECS,
};
use crate::models::{CapabilityDescriptor, Message, Role};

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    stream: bool,
}

#[derive(Deserialize)]
struct ContentBlock {
    text: String,
}
#[derive(Deserialize)]
struct MessagesUsage {
    input_tokens: u32,
    output_tokens: u32,
}
#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: MessagesUsage,
    model: String,
}

#[derive(Deserialize)]
struct DeltaPayload {
    text: Option<String>,
}
#[derive(Deserialize)]
struct StreamEvent {
    #[serde(rename = "type")]
    event_type: String,
    delta: Option<DeltaPayload>,
}

pub struct ClaudeAdapter {
    name: String,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
    http: reqwest::Client,
    capabilities: CapabilityDescriptor,
}

impl ClaudeAdapter {
    pub fn new(name: impl Into<String>, api_key: String, model: String, base_url: Option<String>) -> Self {
        let name = name.into();
        let capabilities = CapabilityDescriptor {
            name: name.clone(),
            capabilities: vec![
                crate::models::Capability::GeneralChat,
                crate::models::Capability::Streaming,
                crate::models::Capability::CodeContext,
            ],
            max_context_tokens: 200_000,
            supports_streaming: true,
            supports_code_context: true,
        };
        Self {
            name,
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.anthropic.com/v1".to_string()),
            model,
            max_tokens: 4096,
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(STREAMING_TIMEOUT_SECS))
                .build()
                .expect("reqwest client builds"),
            capabilities,
        }
    }

    fn split_system_and_turns(&self, messages: &[Message], codebase_context: Option<&serde_json::Value>) -> (Option<String>, Vec<WireMessage>) {
        let mut system_parts = Vec::new();
        if let Some(ctx) = codebase_context {
            system_parts.push(codebase_context_message(ctx).content);
        }
        let mut turns = Vec::with_capacity(messages.len());
        for m in messages {
            match m.role {
                Role::System => system_parts.push(m.content.clone()),
                Role::User => turns.push(WireMessage { role: "user", content: m.content.clone() }),
                Role::Assistant => turns.push(WireMessage { role: "assistant", content: m.content.clone() }),
            }
        }
        let system = if system_parts.is_empty() { None } else { Some(system_parts.join("\n\n")) };
        (system, turns)
    }

    fn request_builder(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .post(format!("{}/{}", self.base_url, path))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
    }
}

#[async_trait]
impl Adapter for ClaudeAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &CapabilityDescriptor {
        &self.capabilities
    }

    async fn is_available(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn chat(&self, messages: &[Message], codebase_context: Option<&serde_json::Value>) -> Result<AdapterResponse, AdapterError> {
        if self.api_key.is_empty() {
            return Err(AdapterError::NotConfigured(format!("{} has no api key configured", self.name)));
        }
        let (system, turns) = self.split_system_and_turns(messages, codebase_context);
        let body = MessagesRequest { model: self.model.clone(), max_tokens: self.max_tokens, messages: turns, system, stream: false };
        let response = self.request_builder("messages").timeout(Duration::from_secs(UNARY_TIMEOUT_SECS)).json(&body).send().await?;

        if !response.status().is_success() {
            return Err(classify_status(response.status()));
        }

        let parsed: MessagesResponse = response.json().await.map_err(|e| AdapterError::ProtocolError(e.to_string()))?;
        let content = parsed.content.into_iter().map(|b| b.text).collect::<Vec<_>>().join("");
        Ok(AdapterResponse {
            content,
            tool: self.name.clone(),
            metadata: ResponseMetadata {
                model: parsed.model,
                usage: Usage { input_tokens: parsed.usage.input_tokens, output_tokens: Some(parsed.usage.output_tokens) },
                citations: None,
            },
        })
    }

    async fn stream_chat(&self, messages: &[Message], codebase_context: Option<&serde_json::Value>) -> Result<ChunkStream, AdapterError> {
        if self.api_key.is_empty() {
            return Err(AdapterError::NotConfigured(format!("{} has no api key configured", self.name)));
        }
        let (system, turns) = self.split_system_and_turns(messages, codebase_context);
        let body = MessagesRequest { model: self.model.clone(), max_tokens: self.max_tokens, messages: turns, system, stream: true };
        let response = self.request_builder("messages").timeout(Duration::from_secs(STREAMING_TIMEOUT_SECS)).json(&body).send().await?;

        if !response.status().is_success() {
            return Err(classify_status(response.status()));
        }

        let events = response.bytes_stream().eventsource();
        let stream = events.filter_map(|event| async move {
            match event {
                Ok(ev) if ev.data.is_empty() => None,
                Ok(ev) => match serde_json::from_str::<StreamEvent>(&ev.data) {
                    Ok(parsed) if parsed.event_type == "content_block_delta" => {
                        parsed.delta.and_then(|d| d.text).filter(|t| !t.is_empty()).map(Ok)
                    }
                    Ok(_) => None,
                    Err(e) => Some(Err(AdapterError::ProtocolError(format!("malformed SSE event: {e}")))),
                },
                Err(e) => Some(Err(AdapterError::UpstreamError(format!("stream error: {e}")))),
            }
        });
        Ok(Box::pin(stream))
    }
}

fn classify_status(status: reqwest::StatusCode) -> AdapterError {
    if status.as_u16() == 429 {
        AdapterError::RateLimited
    } else if status.is_server_error() {
        AdapterError::UpstreamError(format!("upstream status {status}"))
    } else {
        AdapterError::ProtocolError(format!("upstream status {status}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_messages_are_hoisted_out_of_the_turn_list() {
        let adapter = ClaudeAdapter::new("claude", "key".into(), "claude-3".into(), None);
        let messages = vec![Message::new(Role::System, "be terse"), Message::new(Role::User, "hi")];
        let (system, turns) = adapter.split_system_and_turns(&messages, None);
        assert_eq!(system.as_deref(), Some("be terse"));
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].role, "user");
    }

    #[tokio::test]
    async fn unavailable_without_api_key() {
        let adapter = ClaudeAdapter::new("claude", String::new(), "claude-3".into(), None);
        assert!(!adapter.is_available().await);
    }
}
