//! Orchestrator: the per-request composition of routing, adapter selection,
//! resilience, context persistence, cost accounting and audit emission.
//! Grounded on `api/routes.py::chat` and `api/websocket.py::handle_websocket_chat`,
//! which both call through the same router → adapter → context sequence —
//! this module is the single place that sequence lives, so the HTTP and
//! WebSocket handlers stay thin per spec.md §4.K.

use std::sync::Arc;

use futures::StreamExt;

use crate::adapters::{AdapterError, AdapterResponse, ChunkStream};
use crate::context::{estimate_message_tokens, ContextManager};
use crate::cost::{CostTracker, PricingTable};
use crate::error::{GatewayError, GatewayResult};
use crate::models::{AuditEvent, AuditEventType, ConversationContext, Message, Role};
use crate::resilience::breaker::BreakerError;
use crate::resilience::RetryPolicy;
use crate::routing::{route, RoutingDecision};
use crate::state::AppState;
use crate::storage::Storage;

/// Number of most-recent stored messages carried forward into each adapter
/// call, ahead of the new user turn, per spec.md §4.K step 4.
const HISTORY_WINDOW: usize = 10;

pub struct ChatRequest {
    pub message: String,
    pub conversation_id: Option<String>,
    pub project_id: Option<String>,
    pub tool: Option<String>,
    pub codebase_context: Option<serde_json::Value>,
    pub user_id: Option<String>,
}

pub struct ChatOutcome {
    pub content: String,
    pub tool: String,
    pub conversation_id: String,
    pub metadata: crate::adapters::ResponseMetadata,
}

fn audit(storage: &Storage, event_type: AuditEventType, user_id: Option<&str>, resource_id: Option<&str>, details: serde_json::Value) {
    let storage = storage.clone();
    let user_id = user_id.map(String::from);
    let resource_id = resource_id.map(String::from);
    tokio::spawn(async move {
        let event = AuditEvent {
            id: uuid::Uuid::new_v4().to_string(),
            event_type,
            user_id,
            resource_type: Some("conversation".to_string()),
            resource_id,
            ip: None,
            user_agent: None,
            details,
            created_at: chrono::Utc::now().timestamp(),
        };
        tracing::info!(event_type = event.event_type.as_str(), resource_id = ?event.resource_id, "audit event");
        if let Err(err) = storage.log_audit_event(&event).await {
            tracing::warn!(error = %err, "failed to persist audit event");
        }
    });
}

/// Steps 1-4 of the orchestrator sequence: route, pick a candidate, load or
/// allocate the context, and build the adapter's message window.
async fn prepare(state: &AppState, request: &ChatRequest) -> GatewayResult<(RoutingDecision, String, ConversationContext, Vec<Message>)> {
    let decision = route(&request.message, request.tool.as_deref(), &state.config.routing);

    let selected = state
        .adapters
        .first_available_candidate(&decision.selected_tools)
        .ok_or_else(|| GatewayError::NoCandidateAdapter(format!("no configured adapter among: {:?}", decision.selected_tools)))?
        .to_string();

    let context_manager = ContextManager::new(state.storage.clone());
    let context = context_manager
        .get_or_create(request.conversation_id.as_deref(), request.project_id.as_deref(), request.user_id.as_deref())
        .await?;

    let mut window: Vec<Message> = context.messages.iter().rev().take(HISTORY_WINDOW).rev().cloned().collect();
    window.push(Message::new(Role::User, request.message.clone()));

    Ok((decision, selected, context, window))
}

/// An adapter call that failed because the breaker short-circuited it,
/// distinct from a failure the adapter itself raised, so audit records can
/// carry the `circuit_open` marker spec.md §8 scenario 3 expects instead of
/// folding it into a generic upstream-error detail.
enum GuardedError {
    CircuitOpen,
    Adapter(AdapterError),
}

/// Invoke an adapter through the provider's rate limiter, circuit breaker,
/// and retry policy, in that order, per spec.md §4.K step 5.
async fn call_guarded<T, F, Fut>(state: &AppState, provider: &str, op: F) -> Result<T, GuardedError>
where
    F: Fn() -> Fut + Clone,
    Fut: std::future::Future<Output = Result<T, AdapterError>>,
{
    state.provider_rate_limiter.acquire(provider, 1.0).await;
    let breaker = state.breaker_for(provider);
    let policy = RetryPolicy::default();

    let result = breaker
        .call(|| {
            let policy = policy;
            let op = op.clone();
            async move { policy.retry(|| op()).await }
        })
        .await;

    match result {
        Ok(v) => Ok(v),
        Err(BreakerError::Open(_)) => Err(GuardedError::CircuitOpen),
        Err(BreakerError::Inner(e)) => Err(GuardedError::Adapter(e)),
    }
}

async fn record_success(
    state: &AppState,
    context_manager: &ContextManager,
    mut context: ConversationContext,
    user_message: &str,
    response: &AdapterResponse,
    user_id: Option<&str>,
) {
    let cost_tracker = CostTracker::new(state.storage.clone());
    let pricing = PricingTable::default();

    if let Err(err) = context_manager.add_message(&mut context, Role::User, user_message).await {
        tracing::warn!(error = %err, "failed to persist user message");
    }
    if let Err(err) = context_manager.add_message(&mut context, Role::Assistant, &response.content).await {
        tracing::warn!(error = %err, "failed to persist assistant message");
    }
    if let Err(err) = context_manager
        .add_tool_call(&mut context, &response.tool, serde_json::json!({"message": user_message}), serde_json::json!({"content": response.content}))
        .await
    {
        tracing::warn!(error = %err, "failed to persist tool-call record");
    }

    let output_tokens = response.metadata.usage.output_tokens.unwrap_or_else(|| estimate_message_tokens(std::slice::from_ref(&Message::new(Role::Assistant, response.content.clone()))));
    let cost_micros = pricing.cost_micros(&response.metadata.model, response.metadata.usage.input_tokens, output_tokens);
    if let Err(err) = cost_tracker
        .record(&response.tool, &response.metadata.model, response.metadata.usage.input_tokens, output_tokens, cost_micros, Some(&context.conversation_id), context.project_id.as_deref())
        .await
    {
        tracing::warn!(error = %err, "failed to record cost");
    }

    audit(&state.storage, AuditEventType::ResourceAccess, user_id, Some(&context.conversation_id), serde_json::json!({"tool": response.tool}));
}

/// Unary chat: the full §4.K sequence with a single round-trip response.
pub async fn chat(state: &AppState, request: ChatRequest) -> GatewayResult<ChatOutcome> {
    let (_decision, selected, context, window) = prepare(state, &request).await?;
    let adapter = state.adapters.get(&selected).expect("candidate was just confirmed present in the registry");

    let codebase_context = request.codebase_context.clone().or_else(|| context.codebase_context.clone());
    let provider = selected.clone();
    let result = call_guarded(state, &provider, {
        let adapter = adapter.clone();
        let window = window.clone();
        let codebase_context = codebase_context.clone();
        move || {
            let adapter = adapter.clone();
            let window = window.clone();
            let codebase_context = codebase_context.clone();
            async move { adapter.chat(&window, codebase_context.as_ref()).await }
        }
    })
    .await;

    match result {
        Ok(response) => {
            let context_manager = ContextManager::new(state.storage.clone());
            record_success(state, &context_manager, context.clone(), &request.message, &response, request.user_id.as_deref()).await;
            Ok(ChatOutcome { content: response.content.clone(), tool: response.tool.clone(), conversation_id: context.conversation_id, metadata: response.metadata })
        }
        Err(GuardedError::CircuitOpen) => {
            audit(&state.storage, AuditEventType::ResourceAccess, request.user_id.as_deref(), Some(&context.conversation_id), serde_json::json!({"circuit_open": true, "provider": provider, "failed": true}));
            Err(GatewayError::CircuitOpen(format!("circuit '{provider}' is open")))
        }
        Err(GuardedError::Adapter(err)) => {
            audit(&state.storage, AuditEventType::ResourceAccess, request.user_id.as_deref(), Some(&context.conversation_id), serde_json::json!({"error": err.to_string(), "failed": true}));
            Err(GatewayError::from(err))
        }
    }
}

/// Streaming chat: identical routing/selection/resilience sequence, but
/// returns a lazy chunk stream instead of waiting for full completion. The
/// caller (HTTP SSE handler or WebSocket loop) is responsible for draining
/// it and is the one that decides what to persist once draining completes;
/// see `finalize_stream`.
pub async fn stream_chat(state: &AppState, request: ChatRequest) -> GatewayResult<(String, ConversationContext, Vec<Message>, ChunkStream)> {
    let (_decision, selected, context, window) = prepare(state, &request).await?;
    let adapter = state.adapters.get(&selected).expect("candidate was just confirmed present in the registry");
    let codebase_context = request.codebase_context.clone().or_else(|| context.codebase_context.clone());

    state.provider_rate_limiter.acquire(&selected, 1.0).await;
    let breaker = state.breaker_for(&selected);
    let result = breaker.call(|| adapter.stream_chat(&window, codebase_context.as_ref())).await;

    match result {
        Ok(stream) => Ok((selected, context, window, stream)),
        Err(BreakerError::Open(e)) => Err(GatewayError::from(crate::resilience::breaker::CircuitOpenError(e.0))),
        Err(BreakerError::Inner(e)) => Err(GatewayError::from(e)),
    }
}

/// Drains a streaming chunk stream into a single string, persists the
/// exchange exactly as the unary path does, and returns the joined content.
/// Any chunk-stream error means no partial context write happens, per
/// spec.md §4.K step 7.
pub async fn finalize_stream(
    state: &AppState,
    tool: &str,
    context: ConversationContext,
    user_message: &str,
    user_id: Option<&str>,
    mut stream: ChunkStream,
) -> GatewayResult<String> {
    let mut content = String::new();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(piece) => content.push_str(&piece),
            Err(err) => {
                audit(&state.storage, AuditEventType::ResourceAccess, user_id, Some(&context.conversation_id), serde_json::json!({"error": err.to_string(), "failed": true}));
                return Err(GatewayError::from(err));
            }
        }
    }

    persist_collected(state, tool, context, user_message, user_id, content).await
}

/// Persists an already-collected streaming response. Split out from
/// `finalize_stream` for callers (the WebSocket loop, an HTTP SSE handler)
/// that must forward chunks to the client as they arrive and therefore drain
/// the stream themselves instead of handing it to this module.
pub async fn persist_collected(
    state: &AppState,
    tool: &str,
    context: ConversationContext,
    user_message: &str,
    user_id: Option<&str>,
    content: String,
) -> GatewayResult<String> {
    let response = AdapterResponse {
        content: content.clone(),
        tool: tool.to_string(),
        metadata: crate::adapters::ResponseMetadata { model: tool.to_string(), usage: crate::adapters::Usage::default(), citations: None },
    };
    let context_manager = ContextManager::new(state.storage.clone());
    record_success(state, &context_manager, context, user_message, &response, user_id).await;
    Ok(content)
}

pub fn breaker_arc(state: &AppState, provider: &str) -> Arc<crate::resilience::CircuitBreaker> {
    state.breaker_for(provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_window_is_ten() {
        assert_eq!(HISTORY_WINDOW, 10);
    }
}
