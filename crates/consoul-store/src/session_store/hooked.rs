use super::{SessionStore, SessionStoreError};
use async_trait::async_trait;
use consoul_audit::SessionHooks;
use consoul_core::Session;
use std::sync::Arc;

/// Wraps any `SessionStore` with the `on_before_save` / `on_after_load` /
/// `on_after_save` hook protocol (§9 design note, §4.10 supplement). Hooks
/// operate on the session's JSON projection so audit/redaction/validation
/// logic stays decoupled from the `Session` type itself, mirroring the
/// donor's `HookedSessionStore` over duck-typed dict state.
pub struct HookedSessionStore<S> {
    inner: S,
    hooks: Arc<dyn SessionHooks>,
}

impl<S: SessionStore> HookedSessionStore<S> {
    pub fn new(inner: S, hooks: Arc<dyn SessionHooks>) -> Self {
        Self { inner, hooks }
    }
}

#[async_trait]
impl<S: SessionStore> SessionStore for HookedSessionStore<S> {
    async fn save(&self, session: &Session) -> Result<(), SessionStoreError> {
        let value = serde_json::to_value(session)?;
        let value = self
            .hooks
            .on_before_save(&session.session_id, value)
            .await
            .map_err(|e| SessionStoreError::HookRejected(e.0))?;
        let session: Session = serde_json::from_value(value)?;
        self.inner.save(&session).await?;
        let after = serde_json::to_value(&session)?;
        self.hooks.on_after_save(&session.session_id, &after).await;
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<Session>, SessionStoreError> {
        let loaded = self.inner.load(session_id).await?;
        let value = match loaded {
            Some(session) => Some(serde_json::to_value(session)?),
            None => None,
        };
        let value = self.hooks.on_after_load(session_id, value).await;
        match value {
            Some(v) => Ok(Some(serde_json::from_value(v)?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, session_id: &str) -> Result<(), SessionStoreError> {
        self.inner.delete(session_id).await
    }

    async fn list_sessions(
        &self,
        namespace: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<String>, SessionStoreError> {
        self.inner.list_sessions(namespace, limit, offset).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session_store::memory::MemorySessionStore;
    use consoul_audit::hooks::{RedactionHook, ValidationHook};
    use consoul_audit::{CompositeHooks, RedactionConfig, Redactor};
    use consoul_core::SessionConfig;

    #[tokio::test]
    async fn redaction_hook_strips_config_secrets_before_persisting() {
        let mut session = Session::new("s1", "gpt-4o", SessionConfig::default());
        session.config.system_prompt = Some("be helpful".to_string());
        let hooks: Arc<dyn SessionHooks> =
            Arc::new(RedactionHook::new(Redactor::new(RedactionConfig::default())));
        let store = HookedSessionStore::new(MemorySessionStore::new(), hooks);
        store.save(&session).await.unwrap();
        let loaded = store.load("s1").await.unwrap().unwrap();
        assert_eq!(loaded.session_id, "s1");
    }

    #[tokio::test]
    async fn validation_hook_rejects_invalid_state_before_it_reaches_inner_store() {
        let hooks: Arc<dyn SessionHooks> = Arc::new(CompositeHooks::new(vec![Arc::new(ValidationHook {
            max_messages: Some(0),
            ..ValidationHook::default()
        })]));
        let mut session = Session::new("s1", "gpt-4o", SessionConfig::default());
        session.append(consoul_core::Message::user("hi"));
        let store = HookedSessionStore::new(MemorySessionStore::new(), hooks);
        let err = store.save(&session).await.unwrap_err();
        assert!(matches!(err, SessionStoreError::HookRejected(_)));
        assert!(store.load("s1").await.unwrap().is_none());
    }
}
