use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Path, Query, State};
use axum::response::IntoResponse;
use consoul_audit::CorrelationId;
use consoul_core::tools::approval::WebsocketApprovalCoordinator;
use consoul_core::{ApprovalCoordinator, PermissionPolicy, ToolFilter};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::sync::mpsc;

use crate::conversation::{ConversationEvent, SendMessageRequest};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
enum ClientMessage {
    Message {
        message: String,
        model: Option<String>,
        system_prompt: Option<String>,
        tool_filter: Option<ToolFilter>,
        permission_policy: Option<PermissionPolicy>,
    },
    ToolApproval { id: String, approved: bool },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
enum ServerMessage {
    Delta { text: String },
    ToolCallRequested { id: String, name: String, arguments: serde_json::Value },
    ToolResult { id: String, name: String, result: String, is_error: bool },
    Done { input_tokens: u32, output_tokens: u32, message: String },
    Error { kind: String, message: String },
}

/// `GET /ws/chat/{session_id}` (§4.9). Two cooperating tasks share one
/// outgoing queue of at most 1000 pending frames: a processor that drives
/// `ConversationService::send_message` turn by turn and feeds both its
/// streamed events and any tool-approval prompts into the queue, and a
/// forwarder that drains the queue onto the socket with a 5s per-frame
/// write timeout. A write that can't complete in time means the client is
/// gone; the forwarder closes with code 1008 and cancels any approval still
/// waiting on a reply so the processor's `request_approval` call resolves
/// (denied) instead of hanging forever.
pub async fn chat_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    ConnectInfo(_addr): ConnectInfo<SocketAddr>,
    Query(query): Query<WsAuthQuery>,
) -> impl IntoResponse {
    if !crate::auth::check_ws(&state.api_keys, query.api_key.as_deref()) {
        return axum::http::StatusCode::UNAUTHORIZED.into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state, session_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, session_id: String) {
    state.websocket_connected();
    let (mut sink, mut stream) = socket.split();

    // Single outgoing queue: approval prompts and conversation events both
    // land here so ordering on the wire matches the order they were
    // produced, rather than racing two independent channels.
    let (out_tx, mut out_rx) = mpsc::channel::<serde_json::Value>(1000);

    let approval_tx = out_tx.clone();
    let coordinator = Arc::new(
        WebsocketApprovalCoordinator::new(move |value| {
            approval_tx.try_send(value).map_err(|e| anyhow::anyhow!(e.to_string()))
        })
        .with_timeout(Duration::from_secs(state.config.approval_timeout_secs)),
    );

    let forwarder_coordinator = coordinator.clone();
    let forwarder = tokio::spawn(async move {
        while let Some(value) = out_rx.recv().await {
            let text = serde_json::to_string(&value).unwrap_or_default();
            let sent = tokio::time::timeout(Duration::from_secs(5), sink.send(WsMessage::Text(text.into()))).await;
            if sent.is_err() || sent.unwrap().is_err() {
                let _ = sink.send(WsMessage::Close(Some(axum::extract::ws::CloseFrame {
                    code: 1008,
                    reason: "backpressure timeout".into(),
                }))).await;
                forwarder_coordinator.cancel_all();
                break;
            }
        }
    });

    while let Some(Ok(msg)) = stream.next().await {
        let WsMessage::Text(text) = msg else {
            if matches!(msg, WsMessage::Close(_)) {
                break;
            }
            continue;
        };

        let Ok(client_msg) = serde_json::from_str::<ClientMessage>(&text) else {
            let _ = out_tx
                .send(serde_json::to_value(ServerMessage::Error {
                    kind: "invalid_message".to_string(),
                    message: "could not parse client message".to_string(),
                }).unwrap())
                .await;
            continue;
        };

        match client_msg {
            ClientMessage::ToolApproval { id, approved } => {
                coordinator.handle_approval(&id, approved);
            }
            ClientMessage::Message { message, model, system_prompt, tool_filter, permission_policy } => {
                let (events_tx, mut events_rx) = mpsc::channel(1000);
                let request = SendMessageRequest {
                    session_id: session_id.clone(),
                    message,
                    model,
                    system_prompt,
                    tool_filter,
                    permission_policy,
                };
                let correlation_id = CorrelationId::generate();
                let conversation = state.conversation.clone();
                let turn_coordinator: Arc<dyn ApprovalCoordinator> = coordinator.clone();
                let processor = tokio::spawn(async move {
                    conversation.send_message(request, turn_coordinator, &correlation_id, events_tx).await
                });

                // Routed onto its own task so the outer loop falls straight back
                // to `stream.next()` instead of blocking here until the turn
                // finishes — otherwise a `ToolApproval` frame sent mid-turn would
                // sit unread and `coordinator.handle_approval` would never run.
                let forward_tx = out_tx.clone();
                let webhook_dispatcher = state.webhook_dispatcher.clone();
                let session_id_for_turn = session_id.clone();
                tokio::spawn(async move {
                    while let Some(event) = events_rx.recv().await {
                        if let ConversationEvent::Done { usage, .. } = &event {
                            let dispatcher = webhook_dispatcher.clone();
                            let payload = serde_json::json!({
                                "session_id": session_id_for_turn,
                                "input_tokens": usage.input_tokens,
                                "output_tokens": usage.output_tokens,
                            });
                            tokio::spawn(async move { dispatcher.dispatch("message.completed", payload).await });
                        }
                        let server_msg = match event {
                            ConversationEvent::Delta { text } => ServerMessage::Delta { text },
                            ConversationEvent::ToolCallRequested { id, name, arguments } => {
                                ServerMessage::ToolCallRequested { id, name, arguments }
                            }
                            ConversationEvent::ToolResult { id, name, result, is_error } => {
                                ServerMessage::ToolResult { id, name, result, is_error }
                            }
                            ConversationEvent::Done { usage, message, model: _ } => ServerMessage::Done {
                                input_tokens: usage.input_tokens,
                                output_tokens: usage.output_tokens,
                                message,
                            },
                            ConversationEvent::Error { kind, message } => ServerMessage::Error { kind, message },
                        };
                        if forward_tx.send(serde_json::to_value(server_msg).unwrap_or_default()).await.is_err() {
                            break;
                        }
                    }

                    if let Ok(Err(e)) = processor.await {
                        let _ = forward_tx
                            .send(serde_json::to_value(ServerMessage::Error {
                                kind: "conversation_error".to_string(),
                                message: e.to_string(),
                            }).unwrap())
                            .await;
                    }
                });
            }
        }
    }

    coordinator.cancel_all();
    drop(out_tx);
    let _ = forwarder.await;
    state.websocket_disconnected();
}
