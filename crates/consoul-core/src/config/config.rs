use crate::tools::policy::PermissionPolicy;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A named custom model entry pointing at an OpenAI-compatible endpoint.
///
/// Example in `~/.consoul/config.json` or `.consoul.json`:
/// ```json
/// {
///   "custom_models": [
///     {
///       "name": "llama3.2-local",
///       "provider": "ollama",
///       "base_url": "http://localhost:11434/v1",
///       "api_key": "",
///       "model": "llama3.2"
///     }
///   ]
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomModelEntry {
    /// Display name shown to API consumers.
    pub name: String,
    /// Provider type: `"openai"` | `"anthropic"` | `"gemini"` | `"ollama"`.
    #[serde(default = "default_entry_provider")]
    pub provider: String,
    /// Base URL for the API endpoint (OpenAI-compatible servers, Ollama, vLLM, etc.).
    pub base_url: String,
    /// API key — may be empty for local servers that don't require auth.
    #[serde(default)]
    pub api_key: String,
    /// Model identifier sent in the request (e.g. `"llama3.2"`, `"mistral"`).
    pub model: String,
}

fn default_entry_provider() -> String {
    "openai".to_string()
}

/// Redis-first with an in-memory/file fallback (§4.1). `Memory` is for tests
/// and single-process SDK usage; `File` is for single-node deployments
/// without Redis; `Redis` is the multi-tenant production default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStoreKind {
    Memory,
    File,
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoulConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,

    #[serde(default = "default_store_kind")]
    pub session_store: SessionStoreKind,
    /// Used when `session_store == File`.
    #[serde(default = "default_file_store_path")]
    pub file_store_path: PathBuf,
    /// Used when `session_store == Redis`.
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    /// Seconds between reconnect attempts while Redis is unreachable; the
    /// store degrades to an in-memory cache in the meantime (§4.1).
    #[serde(default = "default_redis_reconnect_interval_secs")]
    pub redis_reconnect_interval_secs: u64,

    /// Hard context budget for trimming (§4.8), in model tokens.
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,
    /// Tokens reserved for the model's own response; trimming keeps history
    /// under `max_context_tokens - reserve_tokens`.
    #[serde(default = "default_reserve_tokens")]
    pub reserve_tokens: usize,
    /// Above this many retained tokens, summarize instead of dropping
    /// history outright. `None` disables summarization.
    #[serde(default)]
    pub summarize_threshold_tokens: Option<usize>,

    #[serde(default)]
    pub custom_models: Vec<CustomModelEntry>,

    /// How many times to retry a failed LLM API call before giving up.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    /// Base delay in milliseconds for exponential backoff between retries.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Consecutive provider failures before a circuit breaker trips open.
    #[serde(default = "default_circuit_failure_threshold")]
    pub circuit_failure_threshold: u32,
    /// Seconds a tripped circuit stays open before allowing a probe request.
    #[serde(default = "default_circuit_cool_down_secs")]
    pub circuit_cool_down_secs: u64,

    #[serde(default)]
    pub default_permission_policy: PermissionPolicy,
    /// Seconds to wait for a human approval response before denying (§4.5).
    #[serde(default = "default_approval_timeout_secs")]
    pub approval_timeout_secs: u64,

    #[serde(default = "default_audit_log_path")]
    pub audit_log_path: Option<PathBuf>,

    #[serde(default = "default_webhook_max_failures")]
    pub webhook_max_consecutive_failures: u32,
}

fn default_model() -> String {
    std::env::var("CONSOUL_MODEL").unwrap_or_else(|_| "gpt-4o".to_string())
}

fn default_base_url() -> String {
    std::env::var("CONSOUL_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".to_string())
}

fn default_max_turns() -> usize {
    50
}

fn default_store_kind() -> SessionStoreKind {
    if std::env::var("CONSOUL_REDIS_URL").is_ok() {
        SessionStoreKind::Redis
    } else {
        SessionStoreKind::Memory
    }
}

fn default_file_store_path() -> PathBuf {
    ConsoulConfig::resolve_path("sessions")
}

fn default_redis_url() -> String {
    std::env::var("CONSOUL_REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

fn default_redis_reconnect_interval_secs() -> u64 {
    5
}

fn default_max_context_tokens() -> usize {
    128_000
}

fn default_reserve_tokens() -> usize {
    4_096
}

fn default_max_retries() -> usize {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_circuit_failure_threshold() -> u32 {
    5
}

fn default_circuit_cool_down_secs() -> u64 {
    30
}

fn default_approval_timeout_secs() -> u64 {
    60
}

fn default_audit_log_path() -> Option<PathBuf> {
    None
}

fn default_webhook_max_failures() -> u32 {
    5
}

impl Default for ConsoulConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            base_url: default_base_url(),
            api_key: std::env::var("CONSOUL_API_KEY")
                .or_else(|_| std::env::var("OPENAI_API_KEY"))
                .unwrap_or_default(),
            max_turns: default_max_turns(),
            session_store: default_store_kind(),
            file_store_path: default_file_store_path(),
            redis_url: default_redis_url(),
            redis_reconnect_interval_secs: default_redis_reconnect_interval_secs(),
            max_context_tokens: default_max_context_tokens(),
            reserve_tokens: default_reserve_tokens(),
            summarize_threshold_tokens: None,
            custom_models: Vec::new(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            circuit_failure_threshold: default_circuit_failure_threshold(),
            circuit_cool_down_secs: default_circuit_cool_down_secs(),
            default_permission_policy: PermissionPolicy::default(),
            approval_timeout_secs: default_approval_timeout_secs(),
            audit_log_path: default_audit_log_path(),
            webhook_max_consecutive_failures: default_webhook_max_failures(),
        }
    }
}

impl ConsoulConfig {
    /// Loads `~/.consoul/config.json`, then overlays a `.consoul.json` in the
    /// current directory if present, then fills any still-empty API key from
    /// the environment. Mirrors krabs-core's layered `KrabsConfig::load`.
    pub fn load() -> Result<Self> {
        let config_path = Self::resolve_path("config.json");

        let mut config = if config_path.exists() {
            let data = std::fs::read_to_string(&config_path)?;
            serde_json::from_str::<ConsoulConfig>(&data)?
        } else {
            ConsoulConfig::default()
        };

        if config.api_key.is_empty() {
            config.api_key = std::env::var("CONSOUL_API_KEY")
                .or_else(|_| std::env::var("OPENAI_API_KEY"))
                .unwrap_or_default();
        }

        let local_path = std::env::current_dir()
            .ok()
            .map(|d| d.join(".consoul.json"))
            .filter(|p| p.exists());

        if let Some(local) = local_path {
            let data = std::fs::read_to_string(local)?;
            let override_val: serde_json::Value = serde_json::from_str(&data)?;
            let mut base = serde_json::to_value(&config)?;
            if let (Some(base_obj), Some(over_obj)) = (base.as_object_mut(), override_val.as_object()) {
                for (k, v) in over_obj {
                    base_obj.insert(k.clone(), v.clone());
                }
            }
            config = serde_json::from_value(base)?;
        }

        Ok(config)
    }

    pub fn resolve_path(relative: &str) -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".consoul")
            .join(relative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_internally_consistent() {
        let config = ConsoulConfig::default();
        assert!(config.reserve_tokens < config.max_context_tokens);
        assert_eq!(config.default_permission_policy, PermissionPolicy::Balanced);
    }
}
