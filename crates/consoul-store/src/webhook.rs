use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum WebhookStoreError {
    #[error("webhook {0} not found")]
    NotFound(String),
    #[error("signing error: {0}")]
    Signing(String),
}

/// An HTTP delivery destination subscribed to typed events (§3, §6).
/// `consecutive_failures` drives auto-disable once it reaches the
/// configured threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Webhook {
    pub id: String,
    pub url: String,
    pub events: Vec<String>,
    pub secret: String,
    pub enabled: bool,
    pub metadata: HashMap<String, String>,
    pub consecutive_failures: u32,
}

impl Webhook {
    pub fn new(url: impl Into<String>, events: Vec<String>, secret: impl Into<String>) -> Self {
        Self {
            id: format!("wh_{}", uuid::Uuid::new_v4().simple()),
            url: url.into(),
            events,
            secret: secret.into(),
            enabled: true,
            metadata: HashMap::new(),
            consecutive_failures: 0,
        }
    }

    /// `X-Consoul-Signature: sha256=<hex HMAC of body with secret>` (§6).
    pub fn sign(&self, body: &[u8]) -> Result<String, WebhookStoreError> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| WebhookStoreError::Signing(e.to_string()))?;
        mac.update(body);
        Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub id: String,
    pub webhook_id: String,
    pub event_id: String,
    pub event_type: String,
    pub status: DeliveryStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: i64,
}

impl DeliveryRecord {
    pub fn new(webhook_id: impl Into<String>, event_type: impl Into<String>, created_at: i64) -> Self {
        Self {
            id: format!("del_{}", uuid::Uuid::new_v4().simple()),
            webhook_id: webhook_id.into(),
            event_id: format!("evt_{}", uuid::Uuid::new_v4().simple()),
            event_type: event_type.into(),
            status: DeliveryStatus::Pending,
            attempts: 0,
            last_error: None,
            created_at,
        }
    }
}

/// CRUD for webhook registrations plus per-webhook delivery history (§6).
/// Deliveries are appended, never mutated in place once recorded, except
/// for `record_delivery` itself which overwrites the entry by id on retry.
#[async_trait]
pub trait WebhookStore: Send + Sync {
    async fn create(&self, webhook: Webhook) -> Result<Webhook, WebhookStoreError>;
    async fn get(&self, id: &str) -> Result<Option<Webhook>, WebhookStoreError>;
    async fn list(&self) -> Result<Vec<Webhook>, WebhookStoreError>;
    async fn update(&self, webhook: Webhook) -> Result<Webhook, WebhookStoreError>;
    async fn delete(&self, id: &str) -> Result<(), WebhookStoreError>;
    async fn record_delivery(&self, record: DeliveryRecord) -> Result<(), WebhookStoreError>;
    async fn deliveries_for(&self, webhook_id: &str) -> Result<Vec<DeliveryRecord>, WebhookStoreError>;
}

/// In-memory reference implementation. `consoul-server` may swap in a Redis-
/// backed one under the same trait for multi-instance deployments without
/// changing the webhook CRUD/delivery call sites.
#[derive(Default)]
pub struct MemoryWebhookStore {
    webhooks: RwLock<HashMap<String, Webhook>>,
    deliveries: RwLock<HashMap<String, Vec<DeliveryRecord>>>,
}

impl MemoryWebhookStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl WebhookStore for MemoryWebhookStore {
    async fn create(&self, webhook: Webhook) -> Result<Webhook, WebhookStoreError> {
        self.webhooks.write().await.insert(webhook.id.clone(), webhook.clone());
        Ok(webhook)
    }

    async fn get(&self, id: &str) -> Result<Option<Webhook>, WebhookStoreError> {
        Ok(self.webhooks.read().await.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<Webhook>, WebhookStoreError> {
        let mut all: Vec<Webhook> = self.webhooks.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }

    async fn update(&self, webhook: Webhook) -> Result<Webhook, WebhookStoreError> {
        let mut webhooks = self.webhooks.write().await;
        if !webhooks.contains_key(&webhook.id) {
            return Err(WebhookStoreError::NotFound(webhook.id));
        }
        webhooks.insert(webhook.id.clone(), webhook.clone());
        Ok(webhook)
    }

    async fn delete(&self, id: &str) -> Result<(), WebhookStoreError> {
        self.webhooks.write().await.remove(id);
        self.deliveries.write().await.remove(id);
        Ok(())
    }

    async fn record_delivery(&self, record: DeliveryRecord) -> Result<(), WebhookStoreError> {
        let mut deliveries = self.deliveries.write().await;
        deliveries.entry(record.webhook_id.clone()).or_default().push(record);
        Ok(())
    }

    async fn deliveries_for(&self, webhook_id: &str) -> Result<Vec<DeliveryRecord>, WebhookStoreError> {
        Ok(self.deliveries.read().await.get(webhook_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_hex_hmac_sha256_with_prefix() {
        let webhook = Webhook::new("https://example.com/hook", vec!["result".into()], "s3cret");
        let sig = webhook.sign(b"{}").unwrap();
        assert!(sig.starts_with("sha256="));
        assert_eq!(sig.len(), "sha256=".len() + 64);
    }

    #[test]
    fn ids_carry_the_expected_prefixes() {
        let webhook = Webhook::new("https://example.com", vec![], "s");
        assert!(webhook.id.starts_with("wh_"));
        let record = DeliveryRecord::new(webhook.id, "result", 0);
        assert!(record.id.starts_with("del_"));
        assert!(record.event_id.starts_with("evt_"));
    }

    #[tokio::test]
    async fn crud_round_trips() {
        let store = MemoryWebhookStore::new();
        let webhook = store.create(Webhook::new("https://example.com", vec!["result".into()], "s")).await.unwrap();
        assert!(store.get(&webhook.id).await.unwrap().is_some());

        let mut updated = webhook.clone();
        updated.enabled = false;
        store.update(updated.clone()).await.unwrap();
        assert!(!store.get(&webhook.id).await.unwrap().unwrap().enabled);

        store.delete(&webhook.id).await.unwrap();
        assert!(store.get(&webhook.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn deliveries_accumulate_per_webhook() {
        let store = MemoryWebhookStore::new();
        let webhook = store.create(Webhook::new("https://example.com", vec![], "s")).await.unwrap();
        store.record_delivery(DeliveryRecord::new(webhook.id.clone(), "result", 0)).await.unwrap();
        store.record_delivery(DeliveryRecord::new(webhook.id.clone(), "result", 1)).await.unwrap();
        assert_eq!(store.deliveries_for(&webhook.id).await.unwrap().len(), 2);
    }
}
