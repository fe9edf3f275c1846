use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use consoul_core::{
    AnthropicProvider, CircuitBreaker, ConsoulConfig, CustomModelEntry, GeminiProvider,
    LlmProvider, OllamaProvider, OpenAiProvider,
};

use crate::conversation::{ConversationError, ProviderResolver};

/// One `CircuitBreaker`-wrapped provider per builtin family, plus one per
/// `custom_models` entry (§4.1, §4.6). `resolve` tries an exact custom-model
/// match first, then routes by a model-name prefix heuristic.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<CircuitBreaker>>,
    custom_models: HashMap<String, String>,
}

impl ProviderRegistry {
    pub fn from_config(config: &ConsoulConfig) -> Self {
        let mut providers = HashMap::new();
        let threshold = config.circuit_failure_threshold;
        let cool_down = Duration::from_secs(config.circuit_cool_down_secs);

        let wrap = |name: &str, inner: Arc<dyn LlmProvider>| {
            Arc::new(CircuitBreaker::new(name.to_string(), inner, threshold, cool_down))
        };

        providers.insert(
            "openai".to_string(),
            wrap(
                "openai",
                Arc::new(OpenAiProvider::new(config.base_url.clone(), config.api_key.clone(), config.model.clone())),
            ),
        );
        providers.insert(
            "anthropic".to_string(),
            wrap(
                "anthropic",
                Arc::new(AnthropicProvider::new(
                    "https://api.anthropic.com/v1".to_string(),
                    config.api_key.clone(),
                    config.model.clone(),
                )),
            ),
        );
        providers.insert(
            "ollama".to_string(),
            wrap("ollama", Arc::new(OllamaProvider::new("http://localhost:11434".to_string(), config.model.clone()))),
        );
        providers.insert(
            "gemini".to_string(),
            wrap("gemini", Arc::new(GeminiProvider::new(config.api_key.clone(), config.model.clone()))),
        );

        let mut custom_models = HashMap::new();
        for entry in &config.custom_models {
            let key = format!("custom:{}", entry.name);
            providers.insert(key.clone(), wrap(&key, Self::build_custom(entry)));
            custom_models.insert(entry.name.clone(), key);
        }

        Self { providers, custom_models }
    }

    fn build_custom(entry: &CustomModelEntry) -> Arc<dyn LlmProvider> {
        match entry.provider.as_str() {
            "anthropic" => Arc::new(AnthropicProvider::new(entry.base_url.clone(), entry.api_key.clone(), entry.model.clone())),
            "gemini" => Arc::new(GeminiProvider::new(entry.api_key.clone(), entry.model.clone())),
            "ollama" => Arc::new(OllamaProvider::new(entry.base_url.clone(), entry.model.clone())),
            _ => Arc::new(OpenAiProvider::new(entry.base_url.clone(), entry.api_key.clone(), entry.model.clone())),
        }
    }

    /// Prefix heuristic for builtin routing when a model isn't one of the
    /// configured `custom_models` entries (§3: model is an opaque string the
    /// caller picks; the registry still has to know which HTTP API to hit).
    fn route_builtin(model: &str) -> &'static str {
        let lower = model.to_lowercase();
        if lower.starts_with("claude") {
            "anthropic"
        } else if lower.starts_with("gemini") {
            "gemini"
        } else if lower.starts_with("llama") || lower.starts_with("mistral") || lower.starts_with("qwen") {
            "ollama"
        } else {
            "openai"
        }
    }

    /// Current breaker state/metrics for every provider, keyed by the name
    /// used in the `consoul_circuit_breaker_*` metric labels — consumed by
    /// the `/health` handler.
    pub fn breakers(&self) -> impl Iterator<Item = &Arc<CircuitBreaker>> {
        self.providers.values()
    }
}

impl ProviderResolver for ProviderRegistry {
    fn resolve(&self, model: &str) -> Result<Arc<dyn LlmProvider>, ConversationError> {
        let key = match self.custom_models.get(model) {
            Some(key) => key.clone(),
            None => Self::route_builtin(model).to_string(),
        };
        self.providers
            .get(&key)
            .cloned()
            .map(|breaker| breaker as Arc<dyn LlmProvider>)
            .ok_or_else(|| ConversationError::UnknownModel(model.to_string()))
    }

    fn breaker_states(&self) -> Vec<(String, u8)> {
        let mut states: Vec<(String, u8)> = self
            .providers
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.state() as u8))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }
}
