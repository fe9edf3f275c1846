use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use consoul_audit::{AuditSink, MetricsCollector};
use consoul_core::{ConsoulConfig, ToolRegistry};
use consoul_store::{SessionStore, WebhookStore};
use tokio::sync::RwLock;

use crate::conversation::ConversationService;
use crate::rate_limit::RateLimiter;
use crate::webhooks::WebhookDispatcher;

/// Everything the HTTP/WS handlers share, built once at startup and cloned
/// (as `Arc`s) into every request (§5).
#[derive(Clone)]
pub struct AppState {
    pub conversation: Arc<ConversationService>,
    pub store: Arc<dyn SessionStore>,
    pub tools: Arc<RwLock<ToolRegistry>>,
    pub webhooks: Arc<dyn WebhookStore>,
    pub webhook_dispatcher: Arc<WebhookDispatcher>,
    pub config: Arc<ConsoulConfig>,
    pub metrics: Arc<MetricsCollector>,
    pub audit: Arc<dyn AuditSink>,
    pub rate_limiter: Arc<RateLimiter>,
    pub api_keys: Arc<Vec<String>>,
    pub active_websockets: Arc<AtomicUsize>,
}

impl AppState {
    pub fn active_websocket_count(&self) -> usize {
        self.active_websockets.load(Ordering::SeqCst)
    }

    pub fn websocket_connected(&self) {
        self.active_websockets.fetch_add(1, Ordering::SeqCst);
    }

    pub fn websocket_disconnected(&self) {
        self.active_websockets.fetch_sub(1, Ordering::SeqCst);
    }
}
