use super::{paginate, recency, SessionStore, SessionStoreError};
use async_trait::async_trait;
use consoul_core::Session;
use dashmap::DashMap;
use std::time::{Duration, Instant};

struct Entry {
    session: Session,
    inserted_at: Instant,
}

/// In-process `sid -> (state, created_at)` map with an optional TTL (§4.1).
/// Expired entries are filtered on both `load` and `list_sessions`, never
/// eagerly swept.
pub struct MemorySessionStore {
    entries: DashMap<String, Entry>,
    ttl: Option<Duration>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            ttl: None,
        }
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl: Some(ttl),
        }
    }

    fn is_expired(&self, entry: &Entry) -> bool {
        self.ttl.is_some_and(|ttl| entry.inserted_at.elapsed() > ttl)
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn save(&self, session: &Session) -> Result<(), SessionStoreError> {
        self.entries.insert(
            session.session_id.clone(),
            Entry {
                session: session.clone(),
                inserted_at: Instant::now(),
            },
        );
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<Session>, SessionStoreError> {
        let Some(entry) = self.entries.get(session_id) else {
            return Ok(None);
        };
        if self.is_expired(&entry) {
            drop(entry);
            self.entries.remove(session_id);
            return Ok(None);
        }
        Ok(Some(entry.session.clone()))
    }

    async fn delete(&self, session_id: &str) -> Result<(), SessionStoreError> {
        self.entries.remove(session_id);
        Ok(())
    }

    async fn list_sessions(
        &self,
        namespace: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<String>, SessionStoreError> {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|e| self.is_expired(e.value()))
            .map(|e| e.key().clone())
            .collect();
        for sid in expired {
            self.entries.remove(&sid);
        }

        let mut ids: Vec<(String, i64)> = self
            .entries
            .iter()
            .filter(|e| match namespace {
                Some(ns) => e.key().starts_with(ns),
                None => true,
            })
            .map(|e| (e.key().clone(), recency(&e.value().session)))
            .collect();
        ids.sort_by(|a, b| b.1.cmp(&a.1));
        let ids: Vec<String> = ids.into_iter().map(|(id, _)| id).collect();
        Ok(paginate(ids, limit, offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use consoul_core::SessionConfig;

    fn session(id: &str, updated_at: i64) -> Session {
        let mut s = Session::new(id, "gpt-4o", SessionConfig::default());
        s.updated_at = updated_at;
        s
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let store = MemorySessionStore::new();
        let s = session("s1", 10);
        store.save(&s).await.unwrap();
        let loaded = store.load("s1").await.unwrap().unwrap();
        assert_eq!(loaded.session_id, "s1");
    }

    #[tokio::test]
    async fn load_missing_returns_none() {
        let store = MemorySessionStore::new();
        assert!(store.load("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_sessions_sorts_by_recency_descending() {
        let store = MemorySessionStore::new();
        store.save(&session("old", 1)).await.unwrap();
        store.save(&session("new", 100)).await.unwrap();
        let ids = store.list_sessions(None, 10, 0).await.unwrap();
        assert_eq!(ids, vec!["new".to_string(), "old".to_string()]);
    }

    #[tokio::test]
    async fn limit_zero_returns_empty() {
        let store = MemorySessionStore::new();
        store.save(&session("s1", 1)).await.unwrap();
        assert!(store.list_sessions(None, 0, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn offset_beyond_count_returns_empty() {
        let store = MemorySessionStore::new();
        store.save(&session("s1", 1)).await.unwrap();
        assert!(store.list_sessions(None, 10, 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn expired_entries_are_filtered_on_load_and_list() {
        let store = MemorySessionStore::with_ttl(Duration::from_millis(1));
        store.save(&session("s1", 1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(store.load("s1").await.unwrap().is_none());
        assert!(store.list_sessions(None, 10, 0).await.unwrap().is_empty());
    }
}
