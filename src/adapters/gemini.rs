//! Gemini `generateContent`/`streamGenerateContent` adapter. The API key is
//! carried as a query parameter rather than a bearer header; system messages
//! fold into a leading user turn since this adapter targets the plain
//! `generateContent` surface rather than `systemInstruction`-aware models
//! uniformly across Gemini versions.

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
struct Part {
    text: String,
}
#[derive(Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}
#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Deserialize)]
struct RespPart {
    text: String,
}
#[derive(Deserialize)]
struct RespContent {
    parts: Vec<RespPart>,
}
#[derive(Deserialize)]
struct Candidate {
    content: RespContent,
}
#[derive(Deserialize)]
struct UsageMetadata {
    #[serde(rename = "promptTokenCount")]
    prompt_token_count: u32,
    #[serde(rename = "candidatesTokenCount")]
    candidates_token_count: Option<u32>,
}
#[derive(Deserialize)]
struct GenerateResponse {
    candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
}

pub struct GeminiAdapter {
    name: String,
    api_key: String,
    base_url: String,
    model: String,
    http: reqwest::Client,
    capabilities: CapabilityDescriptor,
}

impl GeminiAdapter {
    pub fn new(name: impl Into<String>, api_key: String, model: String, base_url: Option<String>) -> Self {
        let name = name.into();
        let capabilities = CapabilityDescriptor {
            name: name.clone(),
            capabilities: vec![crate::models::Capability::GeneralChat, crate::models::Capability::Streaming, crate::models::Capability::WebSearch],
            max_context_tokens: 1_000_000,
            supports_streaming: true,
            supports_code_context: false,
        };
        Self {
            name,
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string()),
            model,
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(STREAMING_TIMEOUT_SECS))
                .build()
                .expect("reqwest client builds"),
            capabilities,
        }
    }

    fn contents(&self, messages: &[Message], codebase_context: Option<&serde_json::Value>) -> Vec<Content> {
        let mut contents = Vec::with_capacity(messages.len() + 1);
        if let Some(ctx) = codebase_context {
            contents.push(Content { role: "user", parts: vec![Part { text: codebase_context_message(ctx).content }] });
        }
        for m in messages {
            let role = match m.role {
                Role::Assistant => "model",
                _ => "user",
            };
            contents.push(Content { role, parts: vec![Part { text: m.content.clone() }] });
        }
        contents
    }
}

#[async_trait]
impl Adapter for GeminiAdapter {
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
            .get(format!("{}/models?key={}", self.base_url, self.api_key))
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
        let body = GenerateRequest { contents: self.contents(messages, codebase_context) };
        let url = format!("{}/models/{}:generateContent?key={}", self.base_url, self.model, self.api_key);
        let response = self.http.post(url).timeout(Duration::from_secs(UNARY_TIMEOUT_SECS)).json(&body).send().await?;

        if !response.status().is_success() {
            return Err(classify_status(response.status()));
        }

        let parsed: GenerateResponse = response.json().await.map_err(|e| AdapterError::ProtocolError(e.to_string()))?;
        let content = parsed
            .candidates
            .into_iter()
            .next()
            .map(|c| c.content.parts.into_iter().map(|p| p.text).collect::<Vec<_>>().join(""))
            .unwrap_or_default();
        let usage = parsed
            .usage_metadata
            .map(|u| Usage { input_tokens: u.prompt_token_count, output_tokens: u.candidates_token_count })
            .unwrap_or_default();
        Ok(AdapterResponse { content, tool: self.name.clone(), metadata: ResponseMetadata { model: self.model.clone(), usage, citations: None } })
    }

    async fn stream_chat(&self, messages: &[Message], codebase_context: Option<&serde_json::Value>) -> Result<ChunkStream, AdapterError> {
        if self.api_key.is_empty() {
            return Err(AdapterError::NotConfigured(format!("{} has no api key configured", self.name)));
        }
        let body = GenerateRequest { contents: self.contents(messages, codebase_context) };
        let url = format!("{}/models/{}:streamGenerateContent?alt=sse&key={}", self.base_url, self.model, self.api_key);
        let response = self.http.post(url).timeout(Duration::from_secs(STREAMING_TIMEOUT_SECS)).json(&body).send().await?;

        if !response.status().is_success() {
            return Err(classify_status(response.status()));
        }

        let events = response.bytes_stream().eventsource();
        let stream = events.filter_map(|event| async move {
            match event {
                Ok(ev) if ev.data.is_empty() => None,
                Ok(ev) => match serde_json::from_str::<GenerateResponse>(&ev.data) {
                    Ok(chunk) => {
                        let text = chunk
                            .candidates
                            .into_iter()
                            .next()
                            .map(|c| c.content.parts.into_iter().map(|p| p.text).collect::<Vec<_>>().join(""))
                            .unwrap_or_default();
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
    fn assistant_role_maps_to_model() {
        let adapter = GeminiAdapter::new("gemini", "key".into(), "gemini-1.5-pro".into(), None);
        let messages = vec![Message::new(Role::Assistant, "hi")];
        let contents = adapter.contents(&messages, None);
        assert_eq!(contents[0].role, "model");
    }

    #[tokio::test]
    async fn unavailable_without_api_key() {
        let adapter = GeminiAdapter::new("gemini", String::new(), "gemini-1.5-pro".into(), None);
        assert!(!adapter.is_available().await);
    }
}
