use crate::correlation::CorrelationId;
use crate::event::{AuditEvent, AuditEventType};
use crate::redaction::Redactor;
use crate::sink::AuditSink;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("session state validation failed: {0}")]
pub struct ValidationError(pub String);

/// Explicit interface for the duck-typed `on_before_save` / `on_after_load`
/// / `on_after_save` hook protocol from the donor SDK (§9 design note,
/// §4.10 supplement). Implementations compose decoratively around a
/// `SessionStore` via `CompositeHooks` — `consoul-store`'s hooked store
/// wrapper calls these at the corresponding points without needing to know
/// which concrete hooks are installed.
#[async_trait]
pub trait SessionHooks: Send + Sync {
    /// Runs before a state is persisted. May transform the state (e.g.
    /// redact it) or reject it outright (e.g. fail validation).
    async fn on_before_save(&self, _session_id: &str, state: Value) -> Result<Value, ValidationError> {
        Ok(state)
    }

    /// Runs after a state is loaded, `None` if nothing was stored.
    async fn on_after_load(&self, _session_id: &str, state: Option<Value>) -> Option<Value> {
        state
    }

    /// Runs after a save has committed; cannot alter or reject anything.
    async fn on_after_save(&self, _session_id: &str, _state: &Value) {}
}

/// Runs a fixed list of hooks in order. `on_before_save` threads the state
/// through each hook and stops at the first rejection; `on_after_load`
/// threads the optional state through each hook in turn; `on_after_save`
/// fires every hook unconditionally.
pub struct CompositeHooks {
    hooks: Vec<Arc<dyn SessionHooks>>,
}

impl CompositeHooks {
    pub fn new(hooks: Vec<Arc<dyn SessionHooks>>) -> Self {
        Self { hooks }
    }
}

#[async_trait]
impl SessionHooks for CompositeHooks {
    async fn on_before_save(&self, session_id: &str, mut state: Value) -> Result<Value, ValidationError> {
        for hook in &self.hooks {
            state = hook.on_before_save(session_id, state).await?;
        }
        Ok(state)
    }

    async fn on_after_load(&self, session_id: &str, mut state: Option<Value>) -> Option<Value> {
        for hook in &self.hooks {
            state = hook.on_after_load(session_id, state).await;
        }
        state
    }

    async fn on_after_save(&self, session_id: &str, state: &Value) {
        for hook in &self.hooks {
            hook.on_after_save(session_id, state).await;
        }
    }
}

/// Rejects a save that would violate the `Session` invariants of §3 before
/// it reaches the store — mirrors `validation_hook.py`.
pub struct ValidationHook {
    pub required_fields: HashSet<String>,
    pub max_messages: Option<usize>,
    pub max_message_length: Option<usize>,
    pub allowed_roles: HashSet<String>,
}

impl Default for ValidationHook {
    fn default() -> Self {
        Self {
            required_fields: ["session_id", "messages"].into_iter().map(String::from).collect(),
            max_messages: None,
            max_message_length: None,
            allowed_roles: HashSet::new(),
        }
    }
}

#[async_trait]
impl SessionHooks for ValidationHook {
    async fn on_before_save(&self, _session_id: &str, state: Value) -> Result<Value, ValidationError> {
        let Value::Object(obj) = &state else {
            return Err(ValidationError("state must be a JSON object".to_string()));
        };
        for field in &self.required_fields {
            if !obj.contains_key(field) {
                return Err(ValidationError(format!("missing required field '{field}'")));
            }
        }
        let messages = obj.get("messages").and_then(Value::as_array);
        let Some(messages) = messages else {
            return Err(ValidationError("messages must be a list".to_string()));
        };
        if let Some(max) = self.max_messages {
            if messages.len() > max {
                return Err(ValidationError(format!("too many messages: {} > {max}", messages.len())));
            }
        }
        for (i, m) in messages.iter().enumerate() {
            let Some(msg) = m.as_object() else {
                return Err(ValidationError(format!("message {i} must be an object")));
            };
            if !self.allowed_roles.is_empty() {
                let role = msg.get("role").and_then(Value::as_str).unwrap_or("");
                if !self.allowed_roles.contains(role) {
                    return Err(ValidationError(format!("invalid role '{role}' in message {i}")));
                }
            }
            if let Some(max_len) = self.max_message_length {
                if let Some(content) = msg.get("content").and_then(Value::as_str) {
                    if content.len() > max_len {
                        return Err(ValidationError(format!(
                            "message {i} content too long: {} > {max_len}",
                            content.len()
                        )));
                    }
                }
            }
        }
        Ok(state)
    }
}

/// Redacts PII from session state before it's persisted — mirrors
/// `redaction_hook.py`. One-way: `on_after_load` is a pass-through since
/// there is nothing to un-redact.
pub struct RedactionHook {
    redactor: Redactor,
}

impl RedactionHook {
    pub fn new(redactor: Redactor) -> Self {
        Self { redactor }
    }
}

#[async_trait]
impl SessionHooks for RedactionHook {
    async fn on_before_save(&self, _session_id: &str, state: Value) -> Result<Value, ValidationError> {
        Ok(self.redactor.redact_value(&state))
    }
}

/// Emits an audit event on load and save — mirrors `audit_hook.py`, routed
/// through the same `AuditSink` the rest of C9 uses rather than a bare
/// Python logger.
pub struct AuditHook {
    sink: Arc<dyn AuditSink>,
}

impl AuditHook {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    fn message_count(state: &Value) -> Option<u64> {
        state.get("messages").and_then(Value::as_array).map(|m| m.len() as u64)
    }
}

#[async_trait]
impl SessionHooks for AuditHook {
    async fn on_after_load(&self, session_id: &str, state: Option<Value>) -> Option<Value> {
        let cid = CorrelationId::generate();
        let mut event = AuditEvent::new(AuditEventType::Request, &cid).with_session(session_id);
        event = event.with_result(serde_json::json!({ "found": state.is_some() }));
        let _ = self.sink.emit(&event).await;
        state
    }

    async fn on_after_save(&self, session_id: &str, state: &Value) {
        let cid = CorrelationId::generate();
        let mut event = AuditEvent::new(AuditEventType::Result, &cid).with_session(session_id);
        if let Some(count) = Self::message_count(state) {
            event = event.with_result(serde_json::json!({ "message_count": count }));
        }
        let _ = self.sink.emit(&event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redaction::RedactionConfig;
    use crate::sink::FileSink;
    use serde_json::json;

    #[tokio::test]
    async fn validation_hook_rejects_missing_required_field() {
        let hook = ValidationHook::default();
        let err = hook.on_before_save("s1", json!({ "session_id": "s1" })).await.unwrap_err();
        assert!(err.0.contains("messages"));
    }

    #[tokio::test]
    async fn validation_hook_rejects_too_many_messages() {
        let hook = ValidationHook { max_messages: Some(1), ..ValidationHook::default() };
        let state = json!({ "session_id": "s1", "messages": [{"role": "user", "content": "a"}, {"role": "user", "content": "b"}] });
        assert!(hook.on_before_save("s1", state).await.is_err());
    }

    #[tokio::test]
    async fn redaction_hook_strips_secrets_before_save() {
        let hook = RedactionHook::new(Redactor::new(RedactionConfig::default()));
        let state = json!({ "session_id": "s1", "messages": [], "api_key": "sekrit" });
        let out = hook.on_before_save("s1", state).await.unwrap();
        assert_eq!(out["api_key"], json!("[REDACTED]"));
    }

    #[tokio::test]
    async fn composite_hooks_runs_validation_then_redaction_in_order() {
        let composite = CompositeHooks::new(vec![
            Arc::new(ValidationHook::default()),
            Arc::new(RedactionHook::new(Redactor::new(RedactionConfig::default()))),
        ]);
        let state = json!({ "session_id": "s1", "messages": [], "token": "abc" });
        let out = composite.on_before_save("s1", state).await.unwrap();
        assert_eq!(out["token"], json!("[REDACTED]"));
    }

    #[tokio::test]
    async fn composite_hooks_stops_at_first_validation_failure() {
        let composite = CompositeHooks::new(vec![Arc::new(ValidationHook::default())]);
        let state = json!({ "session_id": "s1" });
        assert!(composite.on_before_save("s1", state).await.is_err());
    }

    #[tokio::test]
    async fn audit_hook_emits_on_load_and_save() {
        let dir = tempfile::tempdir().unwrap();
        let sink: Arc<dyn AuditSink> = Arc::new(FileSink::new(dir.path().join("audit.jsonl")));
        let hook = AuditHook::new(sink);
        hook.on_after_load("s1", Some(json!({"messages": []}))).await;
        hook.on_after_save("s1", &json!({"messages": [{"role": "user", "content": "hi"}]})).await;

        let contents = tokio::fs::read_to_string(dir.path().join("audit.jsonl")).await.unwrap();
        assert_eq!(contents.lines().count(), 2);
    }
}
