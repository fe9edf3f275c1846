pub mod lock;
pub mod session_store;
pub mod webhook;

pub use lock::{SessionLockGuard, SessionLockManager};
pub use session_store::{
    FileSessionStore, HookedSessionStore, MemorySessionStore, RedisSessionStore, ResilientSessionStore,
    SessionStore, SessionStoreError, SessionStoreMode, SessionStoreObserver,
};
pub use webhook::{
    DeliveryRecord, DeliveryStatus, MemoryWebhookStore, Webhook, WebhookStore, WebhookStoreError,
};
