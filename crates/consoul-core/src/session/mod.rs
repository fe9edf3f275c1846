pub mod trim;

use crate::providers::{Message, Role};
use crate::tools::{PermissionPolicy, ToolFilter};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

pub use trim::{trim_keep_last, Summarizer, TrimConfig, TrimError};

pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Free-form per-session settings a caller sets at creation time (§3:
/// "config: free-form small mapping: tools_enabled, system prompt, etc.").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default = "default_true")]
    pub tools_enabled: bool,
    #[serde(default)]
    pub tool_filter: ToolFilter,
    #[serde(default)]
    pub permission_policy: PermissionPolicy,
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
}

fn default_true() -> bool {
    true
}

fn default_max_messages() -> usize {
    500
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            system_prompt: None,
            tools_enabled: true,
            tool_filter: ToolFilter::default(),
            permission_policy: PermissionPolicy::default(),
            max_messages: default_max_messages(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session_id must be 1..=128 characters, got {0}")]
    InvalidSessionId(usize),
    #[error("updated_at ({updated_at}) is before created_at ({created_at})")]
    UpdatedBeforeCreated { created_at: i64, updated_at: i64 },
    #[error("message count {0} exceeds max_messages {1}")]
    TooManyMessages(usize, usize),
    #[error("a system message may only appear at index 0")]
    MisplacedSystemMessage,
}

/// A durable conversation keyed by `session_id` (§3). Mutated only by the
/// holder of the matching `SessionLock` (`consoul-store::lock`); every
/// mutation goes through `Session::append` / `Session::touch` so the
/// invariants below can't be violated by construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub model: String,
    pub temperature: f32,
    pub messages: Vec<Message>,
    pub created_at: i64,
    pub updated_at: i64,
    pub config: SessionConfig,
}

impl Session {
    pub fn new(session_id: impl Into<String>, model: impl Into<String>, config: SessionConfig) -> Self {
        let now = now_secs();
        let mut messages = Vec::new();
        if let Some(prompt) = &config.system_prompt {
            messages.push(Message::system(prompt.clone()));
        }
        Self {
            session_id: session_id.into(),
            model: model.into(),
            temperature: 1.0,
            messages,
            created_at: now,
            updated_at: now,
            config,
        }
    }

    /// Appends a message and bumps `updated_at`. Callers are responsible
    /// for calling `trim` afterwards so `max_messages` stays satisfied —
    /// `append` itself never drops history, matching §4.7 step 4's ordering
    /// (append, then trim).
    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
        self.updated_at = now_secs();
    }

    pub fn touch(&mut self) {
        self.updated_at = now_secs();
    }

    /// Validates the invariants from §3: session id length, monotonic
    /// timestamps, message-count bound, and "system only at index 0".
    pub fn validate(&self) -> Result<(), SessionError> {
        let len = self.session_id.chars().count();
        if len == 0 || len > 128 {
            return Err(SessionError::InvalidSessionId(len));
        }
        if self.updated_at < self.created_at {
            return Err(SessionError::UpdatedBeforeCreated {
                created_at: self.created_at,
                updated_at: self.updated_at,
            });
        }
        if self.messages.len() > self.config.max_messages {
            return Err(SessionError::TooManyMessages(self.messages.len(), self.config.max_messages));
        }
        for (i, m) in self.messages.iter().enumerate() {
            if i != 0 && matches!(m.role, Role::System) {
                return Err(SessionError::MisplacedSystemMessage);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_seeds_system_prompt_at_index_zero() {
        let config = SessionConfig {
            system_prompt: Some("be helpful".to_string()),
            ..Default::default()
        };
        let session = Session::new("s1", "gpt-4o", config);
        assert!(matches!(session.messages[0].role, Role::System));
        assert!(session.validate().is_ok());
    }

    #[test]
    fn rejects_session_id_out_of_range() {
        let mut session = Session::new("", "gpt-4o", SessionConfig::default());
        session.session_id = "".to_string();
        assert_eq!(session.validate(), Err(SessionError::InvalidSessionId(0)));
    }

    #[test]
    fn rejects_updated_before_created() {
        let mut session = Session::new("s1", "gpt-4o", SessionConfig::default());
        session.updated_at = session.created_at - 1;
        assert!(session.validate().is_err());
    }

    #[test]
    fn rejects_system_message_outside_index_zero() {
        let mut session = Session::new("s1", "gpt-4o", SessionConfig::default());
        session.append(Message::user("hi"));
        session.messages.push(Message::system("late system message"));
        assert_eq!(session.validate(), Err(SessionError::MisplacedSystemMessage));
    }

    #[test]
    fn append_bumps_updated_at_without_dropping_history() {
        let mut session = Session::new("s1", "gpt-4o", SessionConfig::default());
        session.append(Message::user("hi"));
        assert_eq!(session.messages.len(), 1);
        assert!(session.updated_at >= session.created_at);
    }
}
