use super::{paginate, recency, SessionStore, SessionStoreError};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use consoul_core::Session;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

/// One JSON file per session (§4.1, §6). The filename is a URL-safe base64
/// encoding of `session_id` — collision-proof and immune to path traversal,
/// since the base64 alphabet contains neither `/` nor `.`. The original ID
/// is also carried inside the file (`Session::session_id`) so `list_sessions`
/// never needs to trust the filename round-trip.
pub struct FileSessionStore {
    dir: PathBuf,
    ttl: Option<Duration>,
}

impl FileSessionStore {
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self, SessionStoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir, ttl: None })
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        let name = URL_SAFE_NO_PAD.encode(session_id.as_bytes());
        self.dir.join(format!("{name}.json"))
    }

    async fn is_expired(&self, path: &std::path::Path) -> bool {
        let Some(ttl) = self.ttl else { return false };
        let Ok(meta) = tokio::fs::metadata(path).await else {
            return false;
        };
        let Ok(modified) = meta.modified() else {
            return false;
        };
        SystemTime::now().duration_since(modified).map(|age| age > ttl).unwrap_or(false)
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn save(&self, session: &Session) -> Result<(), SessionStoreError> {
        let path = self.path_for(&session.session_id);
        let tmp_path = self.dir.join(format!(".{}.tmp-{}", path.file_name().unwrap().to_string_lossy(), uuid::Uuid::new_v4()));
        let body = serde_json::to_vec_pretty(session)?;
        tokio::fs::write(&tmp_path, body).await?;
        tokio::fs::rename(&tmp_path, &path).await?;
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<Session>, SessionStoreError> {
        let path = self.path_for(session_id);
        if self.is_expired(&path).await {
            let _ = tokio::fs::remove_file(&path).await;
            return Ok(None);
        }
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SessionStoreError::Io(e)),
        }
    }

    async fn delete(&self, session_id: &str) -> Result<(), SessionStoreError> {
        let path = self.path_for(session_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SessionStoreError::Io(e)),
        }
    }

    async fn list_sessions(
        &self,
        namespace: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<String>, SessionStoreError> {
        let mut read_dir = tokio::fs::read_dir(&self.dir).await?;
        let mut ids: Vec<(String, i64)> = Vec::new();

        while let Some(entry) = read_dir.next_entry().await? {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.ends_with(".json") || name.starts_with('.') {
                continue;
            }
            if self.is_expired(&path).await {
                let _ = tokio::fs::remove_file(&path).await;
                continue;
            }
            let Ok(bytes) = tokio::fs::read(&path).await else {
                continue;
            };
            let Ok(session) = serde_json::from_slice::<Session>(&bytes) else {
                continue;
            };
            if let Some(ns) = namespace {
                if !session.session_id.starts_with(ns) {
                    continue;
                }
            }
            ids.push((session.session_id.clone(), recency(&session)));
        }

        ids.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        let ids: Vec<String> = ids.into_iter().map(|(id, _)| id).collect();
        Ok(paginate(ids, limit, offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use consoul_core::SessionConfig;
    use tempfile::tempdir;

    fn session(id: &str, updated_at: i64) -> Session {
        let mut s = Session::new(id, "gpt-4o", SessionConfig::default());
        s.updated_at = updated_at;
        s
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let store = FileSessionStore::new(dir.path()).await.unwrap();
        store.save(&session("s1", 1)).await.unwrap();
        let loaded = store.load("s1").await.unwrap().unwrap();
        assert_eq!(loaded.session_id, "s1");
    }

    #[tokio::test]
    async fn filename_never_leaks_raw_session_id() {
        let dir = tempdir().unwrap();
        let store = FileSessionStore::new(dir.path()).await.unwrap();
        store.save(&session("../../etc/passwd", 1)).await.unwrap();
        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        let mut found_traversal = false;
        while let Some(e) = entries.next_entry().await.unwrap() {
            let name = e.file_name().to_string_lossy().to_string();
            if name.contains("..") {
                found_traversal = true;
            }
        }
        assert!(!found_traversal);
        assert!(store.load("../../etc/passwd").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn list_sessions_sorts_by_recency_descending() {
        let dir = tempdir().unwrap();
        let store = FileSessionStore::new(dir.path()).await.unwrap();
        store.save(&session("old", 1)).await.unwrap();
        store.save(&session("new", 100)).await.unwrap();
        let ids = store.list_sessions(None, 10, 0).await.unwrap();
        assert_eq!(ids, vec!["new".to_string(), "old".to_string()]);
    }

    #[tokio::test]
    async fn delete_missing_is_a_no_op() {
        let dir = tempdir().unwrap();
        let store = FileSessionStore::new(dir.path()).await.unwrap();
        store.delete("never-existed").await.unwrap();
    }
}
