//! OpenAI-compatible chat-completions adapter. Wire shapes follow the
//! `chat/completions` endpoint documented by `examples/Wandalen-api_llm`'s
//! `api/openai` client, trimmed to the single request/response shape this
//! gateway needs (model, messages, streamed deltas via SSE).

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

fn role_str(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "system",
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}
#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}
#[derive(Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}
#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
    model: String,
}

#[derive(Deserialize)]
struct StreamDelta {
    content: Option<String>,
}
#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}
#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

pub struct OpenAiAdapter {
    name: String,
    api_key: String,
    base_url: String,
    model: String,
    http: reqwest::Client,
    capabilities: CapabilityDescriptor,
}

impl OpenAiAdapter {
    pub fn new(name: impl Into<String>, api_key: String, model: String, base_url: Option<String>) -> Self {
        let name = name.into();
        let capabilities = CapabilityDescriptor {
            name: name.clone(),
            capabilities: vec![
                crate::models::Capability::GeneralChat,
                crate::models::Capability::Streaming,
                crate::models::Capability::CodeContext,
                crate::models::Capability::FunctionCalling,
            ],
            max_context_tokens: 128_000,
            supports_streaming: true,
            supports_code_context: true,
        };
        Self {
            name,
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            model,
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(STREAMING_TIMEOUT_SECS))
                .build()
                .expect("reqwest client builds"),
            capabilities,
        }
    }

    fn wire_messages(&self, messages: &[Message], codebase_context: Option<&serde_json::Value>) -> Vec<WireMessage> {
        let mut out: Vec<WireMessage> = Vec::with_capacity(messages.len() + 1);
        if let Some(ctx) = codebase_context {
            let synthetic = codebase_context_message(ctx);
            out.push(WireMessage { role: role_str(synthetic.role), content: synthetic.content });
        }
        out.extend(messages.iter().map(|m| WireMessage { role: role_str(m.role), content: m.content.clone() }));
        out
    }
}

#[async_trait]
impl Adapter for OpenAiAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &CapabilityDescriptor {
        &self.capabilities
    }

    async fn is_available(&self) -> bool {
        if self.api_key.is_empty() {
            return false;
        }
        self.http
            .get(format!("{}/models", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_secs(HEALTH_PROBE_TIMEOUT_SECS))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    async fn chat(&self, messages: &[Message], codebase_context: Option<&serde_json::Value>) -> Result<AdapterResponse, AdapterError> {
        if self.api_key.is_empty() {
            return Err(AdapterError::NotConfigured(format!("{} has no api key configured", self.name)));
        }
        let body = ChatRequest { model: self.model.clone(), messages: self.wire_messages(messages, codebase_context), stream: false };
        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_secs(UNARY_TIMEOUT_SECS))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(classify_status(response.status()));
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| AdapterError::ProtocolError(e.to_string()))?;
        let content = parsed.choices.into_iter().next().map(|c| c.message.content).unwrap_or_default();
        let usage = parsed.usage.map(|u| Usage { input_tokens: u.prompt_tokens, output_tokens: Some(u.completion_tokens) }).unwrap_or_default();
        Ok(AdapterResponse {
            content,
            tool: self.name.clone(),
            metadata: ResponseMetadata { model: parsed.model, usage, citations: None },
        })
    }

    async fn stream_chat(&self, messages: &[Message], codebase_context: Option<&serde_json::Value>) -> Result<ChunkStream, AdapterError> {
        if self.api_key.is_empty() {
            return Err(AdapterError::NotConfigured(format!("{} has no api key configured", self.name)));
        }
        let body = ChatRequest { model: self.model.clone(), messages: self.wire_messages(messages, codebase_context), stream: true };
        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_secs(STREAMING_TIMEOUT_SECS))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(classify_status(response.status()));
        }

        let events = response.bytes_stream().eventsource();
        let stream = events.filter_map(|event| async move {
            match event {
                Ok(ev) if ev.data == "[DONE]" => None,
                Ok(ev) if ev.data.is_empty() => None,
                Ok(ev) => match serde_json::from_str::<StreamChunk>(&ev.data) {
                    Ok(chunk) => {
                        let text = chunk.choices.into_iter().next().and_then(|c| c.delta.content).unwrap_or_default();
                        if text.is_empty() {
                            None
                        } else {
                            Some(Ok(text))
                        }
                    }
                    Err(e) => Some(Err(AdapterError::ProtocolError(format!("malformed SSE chunk: {e}")))),
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
    fn capabilities_advertise_code_context_and_streaming() {
        let adapter = OpenAiAdapter::new("gpt", "key".into(), "gpt-4o".into(), None);
        assert!(adapter.capabilities().supports_code_context);
        assert!(adapter.capabilities().supports_streaming);
    }

    #[tokio::test]
    async fn unavailable_without_api_key() {
        let adapter = OpenAiAdapter::new("gpt", String::new(), "gpt-4o".into(), None);
        assert!(!adapter.is_available().await);
    }

    #[tokio::test]
    async fn chat_without_key_is_not_configured() {
        let adapter = OpenAiAdapter::new("gpt", String::new(), "gpt-4o".into(), None);
        let result = adapter.chat(&[Message::new(Role::User, "hi")], None).await;
        assert!(matches!(result, Err(AdapterError::NotConfigured(_))));
    }
}
