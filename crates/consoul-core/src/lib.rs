pub mod config;
pub mod providers;
pub mod session;
pub mod tools;

pub use config::{ConsoulConfig, CustomModelEntry, SessionStoreKind};
pub use providers::{
    AnthropicProvider, BreakerMetrics, BreakerState, CircuitBreaker, CircuitOpenError,
    GeminiProvider, LlmProvider, LlmResponse, Message, ModelInfo, ModelRegistry, OllamaProvider,
    OpenAiProvider, ProviderErrorKind, Role, StreamChunk, TokenUsage, ToolCall,
};
pub use session::{
    trim_keep_last, Session, SessionConfig, SessionError, Summarizer, TrimConfig, TrimError,
};
pub use tools::{
    needs_approval, ApprovalCoordinator, ApprovalDecision, ApprovalVerdict, CommandAnalyzer,
    CommandRisk, PermissionPolicy, RiskLevel, Tool, ToolCategory, ToolDef, ToolFilter,
    ToolRegistration, ToolRegistry, ToolRequest, ToolResult, WhitelistError, WhitelistManager,
};
pub use tools::bash::BashTool;
pub use tools::glob::{GlobTool, GrepTool};
pub use tools::read::ReadTool;
pub use tools::web_fetch::WebFetchTool;
pub use tools::write::WriteTool;
