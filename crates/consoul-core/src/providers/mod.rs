pub mod anthropic;
pub mod circuit_breaker;
pub mod gemini;
pub mod model_registry;
pub mod ollama;
pub mod openai;
pub mod provider;

pub use anthropic::AnthropicProvider;
pub use circuit_breaker::{BreakerMetrics, BreakerState, CircuitBreaker, CircuitOpenError};
pub use gemini::GeminiProvider;
pub use model_registry::{ModelInfo, ModelRegistry};
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;
pub use provider::{
    LlmProvider, LlmResponse, Message, ProviderErrorKind, Role, StreamChunk, TokenUsage, ToolCall,
};
