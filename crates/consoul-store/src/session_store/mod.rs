pub mod file;
pub mod hooked;
pub mod memory;
pub mod redis;
pub mod resilient;

pub use file::FileSessionStore;
pub use hooked::HookedSessionStore;
pub use memory::MemorySessionStore;
pub use redis::RedisSessionStore;
pub use resilient::{ResilientSessionStore, SessionStoreMode, SessionStoreObserver};

use async_trait::async_trait;
use consoul_core::Session;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionStoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("redis error: {0}")]
    Redis(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("session hook rejected the save: {0}")]
    HookRejected(String),
}

/// One contract, three backends (§4.1): `save` is an atomic overwrite-or-
/// create; `load` returns `None` for missing or expired sessions; entries
/// from `list_sessions` are most-recent first.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn save(&self, session: &Session) -> Result<(), SessionStoreError>;
    async fn load(&self, session_id: &str) -> Result<Option<Session>, SessionStoreError>;
    async fn delete(&self, session_id: &str) -> Result<(), SessionStoreError>;
    /// `limit == 0` returns `[]`; `offset` beyond the available count
    /// returns `[]`; pagination is stable across calls that don't mutate
    /// the underlying set.
    async fn list_sessions(
        &self,
        namespace: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<String>, SessionStoreError>;
}

/// `updated_at`, falling back to `created_at`, then `0` — the single "last
/// active" signal every backend sorts `list_sessions` by (§9 resolved open
/// question).
pub(crate) fn recency(session: &Session) -> i64 {
    if session.updated_at > 0 {
        session.updated_at
    } else if session.created_at > 0 {
        session.created_at
    } else {
        0
    }
}

pub(crate) fn paginate(mut ids: Vec<String>, limit: usize, offset: usize) -> Vec<String> {
    if limit == 0 {
        return Vec::new();
    }
    if offset >= ids.len() {
        return Vec::new();
    }
    let end = (offset + limit).min(ids.len());
    ids.drain(0..offset);
    ids.truncate(end - offset);
    ids
}
