use std::sync::Arc;
use std::time::Instant;

use axum::extract::{ConnectInfo, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use consoul_audit::{iso8601_now, CorrelationId};
use consoul_core::tools::approval::DenyAllCoordinator;
use consoul_core::{ApprovalCoordinator, PermissionPolicy, TokenUsage, ToolFilter};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::sync::mpsc;

use crate::conversation::{ConversationEvent, SendMessageRequest};
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub session_id: String,
    pub message: String,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub tool_filter: Option<ToolFilter>,
    pub permission_policy: Option<PermissionPolicy>,
}

#[derive(Debug, Serialize)]
pub struct ToolCallSummary {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
    pub result: Option<String>,
    pub is_error: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct ChatUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
    pub estimated_cost: f64,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub session_id: String,
    pub response: String,
    pub model: String,
    pub usage: ChatUsage,
    pub tool_calls: Vec<ToolCallSummary>,
    pub correlation_id: String,
    pub timestamp: String,
}

/// USD per million tokens, mirroring the SDK's `ModelPricing` (input/output
/// price per MTok) convention; unrecognized models price at zero rather than
/// guessing.
fn estimated_cost(model: &str, usage: &TokenUsage) -> f64 {
    let (input_price, output_price) = if model.starts_with("gpt-4o") {
        (2.50, 10.00)
    } else if model.starts_with("gpt-4") {
        (30.00, 60.00)
    } else if model.starts_with("gpt-3.5") {
        (0.50, 1.50)
    } else if model.starts_with("claude") {
        (3.00, 15.00)
    } else if model.starts_with("gemini") {
        (1.25, 5.00)
    } else {
        (0.0, 0.0)
    };
    (usage.input_tokens as f64 * input_price + usage.output_tokens as f64 * output_price) / 1_000_000.0
}

#[derive(Debug, Deserialize)]
pub struct ApiKeyQuery {
    pub api_key: Option<String>,
}

/// `POST /chat` — one full turn, buffered rather than streamed (§6). There is
/// no human on the other end of an HTTP request, so any tool call that would
/// need a live approval prompt is denied outright via `DenyAllCoordinator`
/// rather than left hanging.
pub async fn chat(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<ApiKeyQuery>,
    Json(request): Json<ChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if !crate::auth::check_http(&state.api_keys, &headers, query.api_key.as_deref()) {
        return Err(ApiError::Auth);
    }

    let rate_key = query.api_key.clone().unwrap_or_else(|| addr.ip().to_string());
    if let Err(retry_after) = state.rate_limiter.check(&format!("/chat:{rate_key}")) {
        return Err(ApiError::RateLimited { retry_after_secs: retry_after.as_secs().max(1) });
    }

    let correlation_id = headers
        .get("X-Correlation-ID")
        .and_then(|v| v.to_str().ok())
        .map(CorrelationId::from_header)
        .unwrap_or_else(CorrelationId::generate);

    let start = Instant::now();
    let (tx, mut rx) = mpsc::channel(1000);
    let coordinator: Arc<dyn ApprovalCoordinator> = Arc::new(DenyAllCoordinator);

    let conversation = state.conversation.clone();
    let send_request = SendMessageRequest {
        session_id: request.session_id.clone(),
        message: request.message,
        model: request.model,
        system_prompt: request.system_prompt,
        tool_filter: request.tool_filter,
        permission_policy: request.permission_policy,
    };
    let cid_for_task = correlation_id.clone();
    let handle = tokio::spawn(async move {
        conversation.send_message(send_request, coordinator, &cid_for_task, tx).await
    });

    let mut message = String::new();
    let mut model = String::new();
    let mut usage = TokenUsage { input_tokens: 0, output_tokens: 0 };
    let mut tool_calls: Vec<ToolCallSummary> = Vec::new();

    while let Some(event) = rx.recv().await {
        match event {
            ConversationEvent::Delta { text } => message.push_str(&text),
            ConversationEvent::ToolCallRequested { id, name, arguments } => {
                tool_calls.push(ToolCallSummary { id, name, arguments, result: None, is_error: None });
            }
            ConversationEvent::ToolResult { id, result, is_error, .. } => {
                if let Some(call) = tool_calls.iter_mut().find(|c| c.id == id) {
                    call.result = Some(result);
                    call.is_error = Some(is_error);
                }
            }
            ConversationEvent::Done { usage: u, message: m, model: mo } => {
                usage = u;
                message = m;
                model = mo;
            }
            ConversationEvent::Error { .. } => {}
        }
    }

    match handle.await {
        Ok(Ok(())) => {
            state.metrics.record_request("/chat", "POST", 200, start.elapsed().as_secs_f64(), "n/a");
            let dispatcher = state.webhook_dispatcher.clone();
            let payload = serde_json::json!({
                "session_id": request.session_id,
                "message": message,
                "usage": usage,
            });
            tokio::spawn(async move { dispatcher.dispatch("message.completed", payload).await });
            let cost = estimated_cost(&model, &usage);
            Ok(Json(ChatResponse {
                session_id: request.session_id,
                response: message,
                model,
                usage: ChatUsage {
                    input_tokens: usage.input_tokens,
                    output_tokens: usage.output_tokens,
                    total_tokens: usage.input_tokens + usage.output_tokens,
                    estimated_cost: cost,
                },
                tool_calls,
                correlation_id: correlation_id.as_str().to_string(),
                timestamp: iso8601_now(),
            }))
        }
        Ok(Err(e)) => {
            state.metrics.record_error("/chat", "conversation_error");
            let dispatcher = state.webhook_dispatcher.clone();
            let payload = serde_json::json!({ "session_id": request.session_id, "error": e.to_string() });
            tokio::spawn(async move { dispatcher.dispatch("message.failed", payload).await });
            Err(ApiError::from(e))
        }
        Err(_) => {
            state.metrics.record_error("/chat", "internal");
            Err(ApiError::Internal("conversation task panicked".to_string()))
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub active_websockets: usize,
    pub providers: Vec<ProviderHealth>,
}

#[derive(Debug, Serialize)]
pub struct ProviderHealth {
    pub name: String,
    pub state: &'static str,
}

/// `GET /health` — liveness plus a snapshot of every circuit breaker's state
/// (§6), so an operator can tell "the process is up" from "the process is up
/// but every provider is tripped".
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let providers = state
        .conversation
        .provider_health()
        .into_iter()
        .map(|(name, breaker_state)| ProviderHealth {
            name,
            state: match breaker_state {
                0 => "closed",
                1 => "open",
                _ => "half_open",
            },
        })
        .collect();

    Json(HealthResponse {
        status: "ok",
        active_websockets: state.active_websocket_count(),
        providers,
    })
}
