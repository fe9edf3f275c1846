use super::{paginate, recency, SessionStore, SessionStoreError};
use async_trait::async_trait;
use consoul_core::Session;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

/// `prefix:session:<sid>` holds the JSON-encoded state; `prefix:sessions:index`
/// is a sorted set (`score = updated_at`, falling back to `created_at`, then
/// `0`) used for both recency ordering and namespace scans (§4.1, §6).
pub struct RedisSessionStore {
    manager: ConnectionManager,
    prefix: String,
}

impl From<::redis::RedisError> for SessionStoreError {
    fn from(e: ::redis::RedisError) -> Self {
        SessionStoreError::Redis(e.to_string())
    }
}

impl RedisSessionStore {
    pub async fn connect(url: &str, prefix: impl Into<String>) -> Result<Self, SessionStoreError> {
        let client = ::redis::Client::open(url).map_err(|e| SessionStoreError::Redis(e.to_string()))?;
        let manager = client.get_connection_manager().await?;
        Ok(Self {
            manager,
            prefix: prefix.into(),
        })
    }

    fn session_key(&self, sid: &str) -> String {
        format!("{}session:{}", self.prefix, sid)
    }

    fn index_key(&self) -> String {
        format!("{}sessions:index", self.prefix)
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn save(&self, session: &Session) -> Result<(), SessionStoreError> {
        let mut conn = self.manager.clone();
        let body = serde_json::to_string(session)?;
        conn.set::<_, _, ()>(self.session_key(&session.session_id), body).await?;
        conn.zadd::<_, _, _, ()>(self.index_key(), &session.session_id, recency(session)).await?;
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<Session>, SessionStoreError> {
        let mut conn = self.manager.clone();
        let body: Option<String> = conn.get(self.session_key(session_id)).await?;
        match body {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, session_id: &str) -> Result<(), SessionStoreError> {
        let mut conn = self.manager.clone();
        conn.del::<_, ()>(self.session_key(session_id)).await?;
        conn.zrem::<_, _, ()>(self.index_key(), session_id).await?;
        Ok(())
    }

    async fn list_sessions(
        &self,
        namespace: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<String>, SessionStoreError> {
        let mut conn = self.manager.clone();
        // ZREVRANGE fetches the whole set in one round trip; the backing
        // cursor-based SCAN (when the index grows large enough to need one)
        // must finish before we filter and paginate, never returning a
        // partial page from mid-scan.
        let all: Vec<String> = conn.zrevrange(self.index_key(), 0, -1).await?;
        let filtered: Vec<String> = match namespace {
            Some(ns) => all.into_iter().filter(|sid| sid.starts_with(ns)).collect(),
            None => all,
        };
        Ok(paginate(filtered, limit, offset))
    }
}
