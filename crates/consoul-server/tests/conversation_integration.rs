use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use consoul_audit::sink::StdoutSink;
use consoul_audit::{AuditSink, CorrelationId, MetricsCollector};
use consoul_core::tools::approval::AutoApproveCoordinator;
use consoul_core::{
    CircuitBreaker, ConsoulConfig, LlmProvider, Message, PermissionPolicy, RiskLevel, StreamChunk,
    TokenUsage, ToolCategory, ToolDef, ToolRegistration, ToolRegistry, ToolResult,
};
use consoul_server::conversation::{ConversationError, ConversationService, ProviderResolver, SendMessageRequest};
use consoul_store::{MemorySessionStore, ResilientSessionStore, SessionLockManager, SessionStore};
use tokio::sync::{mpsc, RwLock};

struct ScriptedProvider {
    chunks: Vec<StreamChunk>,
    delay: Duration,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    fn new(chunks: Vec<StreamChunk>) -> Self {
        Self { chunks, delay: Duration::ZERO, calls: AtomicUsize::new(0) }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn complete(&self, _messages: &[Message], _tools: &[ToolDef]) -> anyhow::Result<consoul_core::LlmResponse> {
        unimplemented!("tests only exercise stream_complete")
    }

    async fn stream_complete(&self, _messages: &[Message], _tools: &[ToolDef], tx: mpsc::Sender<StreamChunk>) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.delay > Duration::ZERO {
            tokio::time::sleep(self.delay).await;
        }
        for chunk in &self.chunks {
            tx.send(chunk.clone()).await.ok();
        }
        Ok(())
    }
}

struct FailingProvider {
    calls: AtomicUsize,
}

#[async_trait]
impl LlmProvider for FailingProvider {
    async fn complete(&self, _messages: &[Message], _tools: &[ToolDef]) -> anyhow::Result<consoul_core::LlmResponse> {
        unimplemented!("tests only exercise stream_complete")
    }

    async fn stream_complete(&self, _messages: &[Message], _tools: &[ToolDef], _tx: mpsc::Sender<StreamChunk>) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("simulated provider outage")
    }
}

struct SingleProviderResolver {
    provider: Arc<dyn LlmProvider>,
}

impl ProviderResolver for SingleProviderResolver {
    fn resolve(&self, _model: &str) -> Result<Arc<dyn LlmProvider>, ConversationError> {
        Ok(self.provider.clone())
    }
}

struct CountingTool {
    calls: Arc<AtomicBool>,
}

#[async_trait]
impl consoul_core::Tool for CountingTool {
    fn name(&self) -> &str {
        "dangerous_op"
    }
    fn description(&self) -> &str {
        "a deliberately dangerous test tool"
    }
    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({})
    }
    async fn call(&self, _args: serde_json::Value) -> anyhow::Result<ToolResult> {
        self.calls.store(true, Ordering::SeqCst);
        Ok(ToolResult::ok("done"))
    }
}

fn build_service(provider: Arc<dyn LlmProvider>, tools: ToolRegistry) -> (Arc<dyn SessionStore>, ConversationService) {
    let store: Arc<dyn SessionStore> = Arc::new(ResilientSessionStore::memory_only(Arc::new(MemorySessionStore::new())));
    let audit: Arc<dyn AuditSink> = Arc::new(StdoutSink);
    let metrics = Arc::new(MetricsCollector::new());
    let service = ConversationService::new(
        store.clone(),
        Arc::new(SessionLockManager::new()),
        Arc::new(RwLock::new(tools)),
        Arc::new(consoul_core::CommandAnalyzer::new()),
        None,
        Arc::new(SingleProviderResolver { provider }),
        audit,
        metrics,
        ConsoulConfig::default(),
        None,
    );
    (store, service)
}

async fn drain(mut rx: mpsc::Receiver<consoul_server::conversation::ConversationEvent>) -> Vec<consoul_server::conversation::ConversationEvent> {
    let mut out = Vec::new();
    while let Some(e) = rx.recv().await {
        out.push(e);
    }
    out
}

#[tokio::test]
async fn single_turn_without_tool_calls_persists_assistant_reply() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        StreamChunk::Delta { text: "hi ".to_string() },
        StreamChunk::Delta { text: "there".to_string() },
        StreamChunk::Done { usage: TokenUsage { input_tokens: 10, output_tokens: 2 } },
    ]));
    let (store, service) = build_service(provider, ToolRegistry::new());

    let (tx, rx) = mpsc::channel(64);
    let request = SendMessageRequest {
        session_id: "s1".to_string(),
        message: "hello".to_string(),
        model: None,
        system_prompt: None,
        tool_filter: None,
        permission_policy: None,
    };
    let cid = CorrelationId::generate();
    service.send_message(request, Arc::new(AutoApproveCoordinator), &cid, tx).await.unwrap();

    let events = drain(rx).await;
    let done = events.iter().find_map(|e| match e {
        consoul_server::conversation::ConversationEvent::Done { message, usage, .. } => Some((message.clone(), usage.clone())),
        _ => None,
    });
    let (message, usage) = done.expect("expected a Done event");
    assert_eq!(message, "hi there");
    assert_eq!(usage.output_tokens, 2);

    let session = store.load("s1").await.unwrap().expect("session should be persisted");
    assert_eq!(session.messages.len(), 2);
    assert_eq!(session.messages[1].content, "hi there");
}

#[tokio::test]
async fn dangerous_tool_call_is_denied_under_strict_policy_without_running_it() {
    let call = consoul_core::ToolCall { id: "call_1".to_string(), name: "dangerous_op".to_string(), args: serde_json::json!({}), thought_signature: None };
    let provider = Arc::new(ScriptedProvider::new(vec![
        StreamChunk::ToolCallReady { call },
        StreamChunk::Done { usage: TokenUsage { input_tokens: 5, output_tokens: 1 } },
    ]));

    let was_called = Arc::new(AtomicBool::new(false));
    let mut tools = ToolRegistry::new();
    tools.register(
        ToolRegistration::new(Arc::new(CountingTool { calls: was_called.clone() }), RiskLevel::Dangerous)
            .with_categories([ToolCategory::Other]),
    );

    let (_store, service) = build_service(provider, tools);

    let (tx, rx) = mpsc::channel(64);
    let request = SendMessageRequest {
        session_id: "s2".to_string(),
        message: "do the dangerous thing".to_string(),
        model: None,
        system_prompt: None,
        tool_filter: None,
        permission_policy: Some(PermissionPolicy::Strict),
    };
    let cid = CorrelationId::generate();
    service.send_message(request, Arc::new(AutoApproveCoordinator), &cid, tx).await.unwrap();

    let events = drain(rx).await;
    let denied = events.iter().any(|e| matches!(e,
        consoul_server::conversation::ConversationEvent::ToolResult { is_error: true, result, .. } if result.contains("denied") || result.contains("Strict")
    ));
    assert!(denied, "expected a denied ToolResult event, got {events:?}");
    assert!(!was_called.load(Ordering::SeqCst), "tool must not run once denied");
}

#[tokio::test]
async fn concurrent_calls_on_the_same_session_serialize_through_the_lock() {
    let provider = Arc::new(
        ScriptedProvider::new(vec![
            StreamChunk::Delta { text: "ack".to_string() },
            StreamChunk::Done { usage: TokenUsage { input_tokens: 1, output_tokens: 1 } },
        ])
        .with_delay(Duration::from_millis(30)),
    );
    let (store, service) = build_service(provider, ToolRegistry::new());
    let service = Arc::new(service);

    let mut handles = Vec::new();
    for i in 0..5 {
        let service = service.clone();
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(drain(rx));
        let request = SendMessageRequest {
            session_id: "shared".to_string(),
            message: format!("turn {i}"),
            model: None,
            system_prompt: None,
            tool_filter: None,
            permission_policy: None,
        };
        let cid = CorrelationId::generate();
        handles.push(tokio::spawn(async move {
            service.send_message(request, Arc::new(AutoApproveCoordinator), &cid, tx).await
        }));
    }

    for h in handles {
        h.await.unwrap().unwrap();
    }

    let session = store.load("shared").await.unwrap().expect("session should exist");
    assert_eq!(session.messages.len(), 10, "each of the 5 turns should append exactly one user + one assistant message");
}

#[tokio::test]
async fn tripped_circuit_breaker_is_rejected_without_reaching_the_provider_again() {
    let failing = Arc::new(FailingProvider { calls: AtomicUsize::new(0) });
    let breaker: Arc<dyn LlmProvider> = Arc::new(CircuitBreaker::new(
        "test-provider",
        failing.clone(),
        1,
        Duration::from_secs(3600),
    ));
    let (store, service) = build_service(breaker, ToolRegistry::new());

    let make_request = |session_id: &str| SendMessageRequest {
        session_id: session_id.to_string(),
        message: "hello".to_string(),
        model: None,
        system_prompt: None,
        tool_filter: None,
        permission_policy: None,
    };

    let (tx1, rx1) = mpsc::channel(64);
    let err1 = service
        .send_message(make_request("s1"), Arc::new(AutoApproveCoordinator), &CorrelationId::generate(), tx1)
        .await
        .unwrap_err();
    drop(drain(rx1).await);
    assert!(matches!(err1, ConversationError::Provider(_)));
    assert_eq!(failing.calls.load(Ordering::SeqCst), 1, "breaker should have let the first call reach the provider");

    let (tx2, rx2) = mpsc::channel(64);
    let err2 = service
        .send_message(make_request("s2"), Arc::new(AutoApproveCoordinator), &CorrelationId::generate(), tx2)
        .await
        .unwrap_err();
    drop(drain(rx2).await);
    assert!(matches!(err2, ConversationError::CircuitOpen(ref provider) if provider == "test-provider"), "got {err2:?}");
    assert_eq!(
        failing.calls.load(Ordering::SeqCst),
        1,
        "an open breaker must reject the second call before it ever reaches the provider"
    );

    let session = store.load("s2").await.unwrap().expect("the user turn is persisted even though the provider call failed");
    assert_eq!(session.messages.len(), 1, "no assistant reply was produced, so only the user message is on record");
}
