//! Full-duplex chat over `/ws/chat`, grounded on
//! `api/websocket.py::handle_websocket_chat` and its `WebSocketManager`.
//! The frame-based auth handshake here is deliberately separate from the
//! HTTP middleware's API-key gate: a socket authenticates once per
//! connection with an explicit `auth` frame rather than a header, since
//! browsers cannot set arbitrary headers on a WebSocket upgrade.

use axum::extract::ws::{Message as WsMessage, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};

use crate::orchestrator::{self, ChatRequest};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    Auth { api_key: String },
    Chat {
        message: String,
        #[serde(default)]
        conversation_id: Option<String>,
        #[serde(default)]
        project_id: Option<String>,
        #[serde(default)]
        tool: Option<String>,
        #[serde(default)]
        codebase_context: Option<serde_json::Value>,
    },
    Ping,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerFrame<'a> {
    AuthSuccess,
    Start { tool: &'a str },
    Chunk { content: String },
    End,
    Pong,
    Error { message: String },
}

pub async fn ws_chat(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn send_frame(socket: &mut WebSocket, frame: ServerFrame<'_>) -> bool {
    let Ok(text) = serde_json::to_string(&frame) else { return false };
    socket.send(WsMessage::Text(text.into())).await.is_ok()
}

/// Per-connection loop: dispatch `auth`/`chat`/`ping` frames until the socket
/// closes or a send fails. A server-configured API key gates `chat` frames
/// until a matching `auth` frame arrives; with no key configured, every
/// connection is implicitly authenticated, matching the HTTP gate's
/// development-mode fallback.
async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let required_key = state.config.mobile_api_key.clone().or_else(|| state.config.valid_api_key.clone());
    let mut authenticated = required_key.is_none();

    while let Some(Ok(message)) = socket.recv().await {
        let text = match message {
            WsMessage::Text(t) => t.to_string(),
            WsMessage::Close(_) => break,
            _ => continue,
        };

        let frame: ClientFrame = match serde_json::from_str(&text) {
            Ok(f) => f,
            Err(err) => {
                if !send_frame(&mut socket, ServerFrame::Error { message: format!("invalid frame: {err}") }).await {
                    break;
                }
                continue;
            }
        };

        match frame {
            ClientFrame::Auth { api_key } => {
                if required_key.as_deref() == Some(api_key.as_str()) {
                    authenticated = true;
                    if !send_frame(&mut socket, ServerFrame::AuthSuccess).await {
                        break;
                    }
                } else {
                    let _ = send_frame(&mut socket, ServerFrame::Error { message: "Invalid API key".to_string() }).await;
                    break;
                }
            }
            ClientFrame::Ping => {
                if !send_frame(&mut socket, ServerFrame::Pong).await {
                    break;
                }
            }
            ClientFrame::Chat { message, conversation_id, project_id, tool, codebase_context } => {
                if !authenticated {
                    if !send_frame(&mut socket, ServerFrame::Error { message: "Authentication required".to_string() }).await {
                        break;
                    }
                    continue;
                }
                if !handle_chat_frame(&mut socket, &state, message, conversation_id, project_id, tool, codebase_context).await {
                    break;
                }
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_chat_frame(
    socket: &mut WebSocket,
    state: &AppState,
    message: String,
    conversation_id: Option<String>,
    project_id: Option<String>,
    tool: Option<String>,
    codebase_context: Option<serde_json::Value>,
) -> bool {
    let request = ChatRequest { message: message.clone(), conversation_id, project_id, tool, codebase_context, user_id: None };

    let (provider, context, _window, stream) = match orchestrator::stream_chat(state, request).await {
        Ok(parts) => parts,
        Err(err) => return send_frame(socket, ServerFrame::Error { message: err.to_string() }).await,
    };

    if !send_frame(socket, ServerFrame::Start { tool: &provider }).await {
        return false;
    }

    let mut stream = stream;
    let mut collected = String::new();
    let mut failed = None;
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(piece) => {
                collected.push_str(&piece);
                if !send_frame(socket, ServerFrame::Chunk { content: piece }).await {
                    return false;
                }
            }
            Err(err) => {
                failed = Some(err);
                break;
            }
        }
    }

    if let Some(err) = failed {
        return send_frame(socket, ServerFrame::Error { message: err.to_string() }).await;
    }

    if let Err(err) = orchestrator::persist_collected(state, &provider, context, &message, None, collected).await {
        return send_frame(socket, ServerFrame::Error { message: err.to_string() }).await;
    }

    send_frame(socket, ServerFrame::End).await
}
