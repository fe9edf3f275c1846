use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::{http::StatusCode, Json};
use consoul_audit::iso8601_now;
use consoul_core::session::now_secs;
use consoul_store::{DeliveryRecord, DeliveryStatus, Webhook, WebhookStore};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateWebhookRequest {
    pub url: String,
    pub events: Vec<String>,
    pub secret: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateWebhookRequest {
    pub url: Option<String>,
    pub events: Option<Vec<String>>,
    pub enabled: Option<bool>,
}

pub async fn create_webhook(
    State(state): State<AppState>,
    Json(request): Json<CreateWebhookRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if request.url.is_empty() {
        return Err(ApiError::Validation("url must not be empty".to_string()));
    }
    let webhook = Webhook::new(request.url, request.events, request.secret);
    let created = state
        .webhooks
        .create(webhook)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn list_webhooks(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let webhooks = state.webhooks.list().await.map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(webhooks))
}

pub async fn get_webhook(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let webhook = state
        .webhooks
        .get(&id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or_else(|| ApiError::NotFound(format!("webhook '{id}'")))?;
    Ok(Json(webhook))
}

pub async fn update_webhook(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateWebhookRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut webhook = state
        .webhooks
        .get(&id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or_else(|| ApiError::NotFound(format!("webhook '{id}'")))?;

    if let Some(url) = request.url {
        webhook.url = url;
    }
    if let Some(events) = request.events {
        webhook.events = events;
    }
    if let Some(enabled) = request.enabled {
        webhook.enabled = enabled;
        if enabled {
            webhook.consecutive_failures = 0;
        }
    }

    let updated = state
        .webhooks
        .update(webhook)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(updated))
}

pub async fn delete_webhook(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.webhooks.delete(&id).await.map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    event_id: String,
    event_type: &'a str,
    timestamp: String,
    data: serde_json::Value,
}

/// Delivers one event to every enabled webhook subscribed to it, retrying
/// each with exponential backoff and auto-disabling a webhook once it
/// crosses `webhook_max_consecutive_failures` (§6). Runs off the request
/// path — callers fire-and-forget via `tokio::spawn`.
pub struct WebhookDispatcher {
    client: reqwest::Client,
    store: Arc<dyn WebhookStore>,
    max_consecutive_failures: u32,
    max_retries: usize,
    base_delay: Duration,
}

impl WebhookDispatcher {
    pub fn new(store: Arc<dyn WebhookStore>, max_consecutive_failures: u32, max_retries: usize, base_delay: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            store,
            max_consecutive_failures,
            max_retries,
            base_delay,
        }
    }

    pub async fn dispatch(&self, event_type: &str, data: serde_json::Value) {
        let webhooks = match self.store.list().await {
            Ok(all) => all,
            Err(_) => return,
        };

        for webhook in webhooks.into_iter().filter(|w| w.enabled && w.events.iter().any(|e| e == event_type)) {
            self.deliver_one(webhook, event_type, data.clone()).await;
        }
    }

    async fn deliver_one(&self, mut webhook: Webhook, event_type: &str, data: serde_json::Value) {
        let payload = WebhookPayload {
            event_id: format!("evt_{}", uuid::Uuid::new_v4().simple()),
            event_type,
            timestamp: iso8601_now(),
            data,
        };
        let body = match serde_json::to_vec(&payload) {
            Ok(b) => b,
            Err(_) => return,
        };
        let signature = match webhook.sign(&body) {
            Ok(s) => s,
            Err(_) => return,
        };

        let mut record = DeliveryRecord::new(webhook.id.clone(), event_type, now_secs());
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            record.attempts = attempt as u32 + 1;
            let result = self
                .client
                .post(&webhook.url)
                .header("X-Consoul-Signature", &signature)
                .header("Content-Type", "application/json")
                .body(body.clone())
                .send()
                .await;

            match result {
                Ok(resp) if resp.status().is_success() => {
                    record.status = DeliveryStatus::Success;
                    webhook.consecutive_failures = 0;
                    last_error = None;
                    break;
                }
                Ok(resp) => {
                    last_error = Some(format!("http {}", resp.status()));
                }
                Err(e) => {
                    last_error = Some(e.to_string());
                }
            }

            if attempt < self.max_retries {
                tokio::time::sleep(self.base_delay * 2u32.pow(attempt as u32)).await;
            }
        }

        if let Some(error) = last_error {
            record.status = DeliveryStatus::Failed;
            record.last_error = Some(error);
            webhook.consecutive_failures += 1;
            if webhook.consecutive_failures >= self.max_consecutive_failures {
                webhook.enabled = false;
            }
        }

        let _ = self.store.record_delivery(record).await;
        let _ = self.store.update(webhook).await;
    }
}
