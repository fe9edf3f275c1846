//! Minimal in-process usage of the conversation runtime, without going
//! through the HTTP/WebSocket adapters.
//!
//! Requires OPENAI_API_KEY (or CONSOUL_API_KEY) to be set, or a
//! ~/.consoul/config.json.

use consoul_audit::sink::StdoutSink;
use consoul_audit::{AuditSink, MetricsCollector};
use consoul_core::{
    BashTool, CommandAnalyzer, ConsoulConfig, GlobTool, GrepTool, ReadTool, RiskLevel,
    ToolCategory, ToolRegistration, ToolRegistry, WriteTool,
};
use consoul_server::conversation::{ConversationService, SendMessageRequest};
use consoul_server::provider_registry::ProviderRegistry;
use consoul_store::{MemorySessionStore, ResilientSessionStore, SessionLockManager, SessionStore};
use consoul_core::tools::approval::AutoApproveCoordinator;
use std::sync::Arc;
use tokio::sync::RwLock;

fn build_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(ToolRegistration::new(Arc::new(ReadTool), RiskLevel::Safe).with_categories([ToolCategory::FileEdit]));
    registry.register(ToolRegistration::new(Arc::new(GlobTool), RiskLevel::Safe).with_categories([ToolCategory::Search]));
    registry.register(ToolRegistration::new(Arc::new(GrepTool), RiskLevel::Safe).with_categories([ToolCategory::Search]));
    registry.register(ToolRegistration::new(Arc::new(WriteTool), RiskLevel::Caution).with_categories([ToolCategory::FileEdit]));
    registry.register(ToolRegistration::new(Arc::new(BashTool), RiskLevel::Dangerous).with_categories([ToolCategory::Shell]));
    registry
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ConsoulConfig::load()?;

    let store: Arc<dyn SessionStore> = Arc::new(ResilientSessionStore::memory_only(Arc::new(MemorySessionStore::new())));
    let audit: Arc<dyn AuditSink> = Arc::new(StdoutSink);
    let metrics = Arc::new(MetricsCollector::new());

    let conversation = ConversationService::new(
        store,
        Arc::new(SessionLockManager::new()),
        Arc::new(RwLock::new(build_registry())),
        Arc::new(CommandAnalyzer::new()),
        None,
        Arc::new(ProviderRegistry::from_config(&config)),
        audit,
        metrics,
        config,
        None,
    );

    let coordinator = Arc::new(AutoApproveCoordinator);
    let (events_tx, mut events_rx) = tokio::sync::mpsc::channel(256);
    let correlation_id = consoul_audit::CorrelationId::generate();

    let request = SendMessageRequest {
        session_id: "demo-session".to_string(),
        message: "List all .rs files in the current directory and summarise what each one does.".to_string(),
        model: None,
        system_prompt: None,
        tool_filter: None,
        permission_policy: None,
    };

    let handle = tokio::spawn(async move { conversation.send_message(request, coordinator, &correlation_id, events_tx).await });

    while let Some(event) = events_rx.recv().await {
        println!("{event:?}");
    }

    handle.await??;
    Ok(())
}
