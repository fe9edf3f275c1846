use std::sync::Arc;
use std::time::Instant;

use consoul_audit::{AuditEvent, AuditEventType, AuditSink, CorrelationId, MetricsCollector};
use consoul_core::{
    needs_approval, ApprovalCoordinator, ApprovalDecision, CircuitOpenError, CommandAnalyzer,
    ConsoulConfig, LlmProvider, Message, PermissionPolicy, ProviderErrorKind, Role, Session,
    SessionConfig, StreamChunk, Summarizer, TokenUsage, ToolCall, ToolFilter, ToolRegistry,
    ToolRequest, TrimConfig, WhitelistManager,
};
use consoul_store::{SessionLockManager, SessionStore, SessionStoreError};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};

/// Resolves a model name to a ready-to-call provider (usually circuit-breaker
/// wrapped). Kept as a trait, rather than a concrete `ProviderRegistry`
/// dependency, so the conversation service doesn't need to know how providers
/// are constructed.
pub trait ProviderResolver: Send + Sync {
    fn resolve(&self, model: &str) -> Result<Arc<dyn LlmProvider>, ConversationError>;

    /// `(provider_name, breaker_state)` for every provider this resolver
    /// knows about, where state is the `consoul_circuit_breaker_state` gauge
    /// encoding (0=closed, 1=open, 2=half-open). Used by `/health`.
    fn breaker_states(&self) -> Vec<(String, u8)> {
        Vec::new()
    }
}

#[derive(Debug, Error)]
pub enum ConversationError {
    #[error("{0}")]
    Validation(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("provider error: {0}")]
    Provider(String),
    #[error("circuit open for provider '{0}'")]
    CircuitOpen(String),
    #[error("token limit exceeded: {0}")]
    TokenLimit(String),
    #[error("unknown model '{0}'")]
    UnknownModel(String),
}

impl From<SessionStoreError> for ConversationError {
    fn from(e: SessionStoreError) -> Self {
        ConversationError::Storage(e.to_string())
    }
}

/// One turn's input (§4.7 step 1-3). `model`/`system_prompt` only take effect
/// when the session doesn't already exist; an existing session's model is
/// immutable for its lifetime.
#[derive(Debug, Clone)]
pub struct SendMessageRequest {
    pub session_id: String,
    pub message: String,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub tool_filter: Option<ToolFilter>,
    pub permission_policy: Option<PermissionPolicy>,
}

/// Streamed out of `send_message` to either the HTTP handler (which buffers
/// them into one response) or the WebSocket forwarder (which writes them to
/// the socket as they arrive).
#[derive(Debug, Clone)]
pub enum ConversationEvent {
    Delta { text: String },
    ToolCallRequested { id: String, name: String, arguments: serde_json::Value },
    ToolResult { id: String, name: String, result: String, is_error: bool },
    Done { usage: TokenUsage, message: String, model: String },
    Error { kind: String, message: String },
}

/// THE core of this crate: loads a session under its lock, appends the user
/// turn, drives the provider's stream (resolving tool calls against the
/// approval pipeline as they come up) until the model stops requesting tools,
/// then trims/persists the result (§4.7).
pub struct ConversationService {
    store: Arc<dyn SessionStore>,
    locks: Arc<SessionLockManager>,
    tools: Arc<RwLock<ToolRegistry>>,
    analyzer: Arc<CommandAnalyzer>,
    whitelist: Option<Arc<WhitelistManager>>,
    providers: Arc<dyn ProviderResolver>,
    audit: Arc<dyn AuditSink>,
    metrics: Arc<MetricsCollector>,
    config: ConsoulConfig,
    summarizer: Option<Arc<dyn Summarizer>>,
}

/// Naive 4-chars-per-token estimator, used only to decide what to trim —
/// never sent to a provider or shown to a user.
fn estimate_tokens(message: &Message) -> usize {
    (message.content.len() / 4).max(1)
}

impl ConversationService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn SessionStore>,
        locks: Arc<SessionLockManager>,
        tools: Arc<RwLock<ToolRegistry>>,
        analyzer: Arc<CommandAnalyzer>,
        whitelist: Option<Arc<WhitelistManager>>,
        providers: Arc<dyn ProviderResolver>,
        audit: Arc<dyn AuditSink>,
        metrics: Arc<MetricsCollector>,
        config: ConsoulConfig,
        summarizer: Option<Arc<dyn Summarizer>>,
    ) -> Self {
        Self { store, locks, tools, analyzer, whitelist, providers, audit, metrics, config, summarizer }
    }

    /// Snapshot of every provider's circuit breaker state, for `/health`.
    pub fn provider_health(&self) -> Vec<(String, u8)> {
        self.providers.breaker_states()
    }

    pub async fn send_message(
        &self,
        request: SendMessageRequest,
        coordinator: Arc<dyn ApprovalCoordinator>,
        correlation_id: &CorrelationId,
        events: mpsc::Sender<ConversationEvent>,
    ) -> Result<(), ConversationError> {
        let start = Instant::now();

        if request.message.trim().is_empty() {
            return Err(ConversationError::Validation("message must not be empty".to_string()));
        }
        if request.session_id.is_empty() || request.session_id.chars().count() > 128 {
            return Err(ConversationError::Validation(
                "session_id must be 1..=128 characters".to_string(),
            ));
        }

        // §4.2: the whole load -> mutate -> save critical section runs under
        // one per-session lock so concurrent turns on the same session
        // serialize instead of racing each other's history.
        let _guard = self.locks.acquire(request.session_id.clone()).await;

        let loaded = self.store.load(&request.session_id).await?;
        let mut session = match loaded {
            Some(session) => session,
            None => {
                let model = request.model.clone().unwrap_or_else(|| self.config.model.clone());
                let mut config = SessionConfig {
                    system_prompt: request.system_prompt.clone(),
                    permission_policy: request.permission_policy.unwrap_or(self.config.default_permission_policy),
                    ..SessionConfig::default()
                };
                if let Some(filter) = request.tool_filter.clone() {
                    config.tool_filter = filter;
                }
                Session::new(request.session_id.clone(), model, config)
            }
        };

        let _ = self
            .audit
            .emit(&AuditEvent::new(AuditEventType::Request, correlation_id).with_session(session.session_id.clone()))
            .await;

        session.append(Message::user(request.message.clone()));

        let provider = self.providers.resolve(&session.model)?;

        let trim_cfg = TrimConfig {
            context_window: self.config.max_context_tokens,
            reserve_tokens: self.config.reserve_tokens,
            summarize_threshold: self.config.summarize_threshold_tokens,
            keep_recent: 10,
        };
        // The trimmed/summarized view becomes the new canonical history: the
        // next turn's trim pass is then idempotent over what was actually
        // persisted, rather than re-trimming an ever-growing log each time.
        let trimmed = consoul_core::session::trim::trim_and_summarize(
            &session.messages,
            &trim_cfg,
            estimate_tokens,
            self.summarizer.as_deref(),
        )
        .await
        .map_err(|e| ConversationError::TokenLimit(e.to_string()))?;
        session.messages = trimmed;

        let mut final_text = String::new();
        let mut final_tool_calls: Vec<ToolCall> = Vec::new();
        let mut usage = TokenUsage { input_tokens: 0, output_tokens: 0 };

        // §4.7 step 6: loop while the model keeps requesting tool calls;
        // each iteration appends the assistant turn and any tool results
        // before asking the provider to continue.
        loop {
            let tool_defs = {
                let registry = self.tools.read().await;
                let filter = session.config.tool_filter.clone();
                if session.config.tools_enabled {
                    registry.tool_defs(&filter)
                } else {
                    Vec::new()
                }
            };

            let (tx, mut rx) = mpsc::channel(256);
            let stream_result = provider.stream_complete(&session.messages, &tool_defs, tx).await;

            let mut round_text = String::new();
            let mut round_calls: Vec<ToolCall> = Vec::new();
            let mut round_error: Option<(ProviderErrorKind, String)> = None;

            while let Some(chunk) = rx.recv().await {
                match chunk {
                    StreamChunk::Delta { text } => {
                        round_text.push_str(&text);
                        let _ = events.send(ConversationEvent::Delta { text }).await;
                    }
                    StreamChunk::ToolCallReady { call } => {
                        let _ = events
                            .send(ConversationEvent::ToolCallRequested {
                                id: call.id.clone(),
                                name: call.name.clone(),
                                arguments: call.args.clone(),
                            })
                            .await;
                        round_calls.push(call);
                    }
                    StreamChunk::Done { usage: u } => {
                        usage.input_tokens += u.input_tokens;
                        usage.output_tokens += u.output_tokens;
                    }
                    StreamChunk::Error { kind, message, partial_text } => {
                        if let Some(partial) = partial_text {
                            round_text.push_str(&partial);
                        }
                        round_error = Some((kind, message));
                        break;
                    }
                }
            }

            if let Err(e) = stream_result {
                if let Some(open) = e.downcast_ref::<CircuitOpenError>() {
                    let provider = open.provider.clone();
                    self.persist_partial(&mut session, &final_text, &round_text).await;
                    self.record_error(correlation_id, &session.session_id, "circuit_open");
                    return Err(ConversationError::CircuitOpen(provider));
                }
                self.persist_partial(&mut session, &final_text, &round_text).await;
                self.record_error(correlation_id, &session.session_id, "provider_error");
                return Err(ConversationError::Provider(e.to_string()));
            }

            if let Some((kind, message)) = round_error {
                self.persist_partial(&mut session, &final_text, &round_text).await;
                self.record_error(correlation_id, &session.session_id, "provider_error");
                let _ = events.send(ConversationEvent::Error { kind: format!("{kind:?}"), message: message.clone() }).await;
                if kind == ProviderErrorKind::TokenLimit {
                    return Err(ConversationError::TokenLimit(message));
                }
                return Err(ConversationError::Provider(message));
            }

            final_text.push_str(&round_text);

            if round_calls.is_empty() {
                session.append(Message::assistant(round_text));
                break;
            }

            session.append(Message::assistant_tool_calls(round_calls.clone()));
            final_tool_calls.extend(round_calls.iter().cloned());

            for call in &round_calls {
                let tool_outcome = self.run_tool_call(&session, coordinator.as_ref(), call, correlation_id).await;
                let (result_text, is_error) = match tool_outcome {
                    Ok(text) => (text, false),
                    Err(text) => (text, true),
                };
                let _ = events
                    .send(ConversationEvent::ToolResult {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        result: result_text.clone(),
                        is_error,
                    })
                    .await;
                session.append(Message::tool_result(result_text, call.id.clone(), call.name.clone()));
            }
        }

        // §4.7 step 9: defensive truncation on top of the trim pass above —
        // `max_messages` is a hard backstop, not the primary trimming path.
        if session.messages.len() > session.config.max_messages {
            let overflow = session.messages.len() - session.config.max_messages;
            let has_system = session.messages.first().is_some_and(|m| matches!(m.role, Role::System));
            let start = if has_system { 1 } else { 0 };
            session.messages.drain(start..start + overflow);
        }

        session.touch();
        session
            .validate()
            .map_err(|e| ConversationError::Validation(e.to_string()))?;
        self.store.save(&session).await?;

        self.metrics.record_tokens(
            usage.input_tokens as u64,
            usage.output_tokens as u64,
            &session.model,
            &session.session_id,
        );
        self.metrics.record_request(
            "/chat",
            "POST",
            200,
            start.elapsed().as_secs_f64(),
            &session.model,
        );
        let _ = self
            .audit
            .emit(
                &AuditEvent::new(AuditEventType::Result, correlation_id)
                    .with_session(session.session_id.clone())
                    .with_result(serde_json::json!({
                        "input_tokens": usage.input_tokens,
                        "output_tokens": usage.output_tokens,
                        "tool_calls": final_tool_calls.len(),
                    }))
                    .with_duration_ms(start.elapsed().as_millis() as u64),
            )
            .await;

        let _ = events
            .send(ConversationEvent::Done { usage, message: final_text, model: session.model.clone() })
            .await;
        Ok(())
    }

    /// Persists whatever text had already streamed before an abrupt stream
    /// error or disconnect, so a retried turn doesn't lose it (§4.7 step 7e).
    async fn persist_partial(&self, session: &mut Session, prior_text: &str, round_text: &str) {
        let mut combined = prior_text.to_string();
        combined.push_str(round_text);
        if !combined.is_empty() {
            session.append(Message::assistant(combined));
        }
        session.touch();
        if session.validate().is_ok() {
            let _ = self.store.save(session).await;
        }
    }

    fn record_error(&self, correlation_id: &CorrelationId, session_id: &str, error_type: &str) {
        self.metrics.record_error("/chat", error_type);
        let audit = self.audit.clone();
        let event = AuditEvent::new(AuditEventType::Error, correlation_id)
            .with_session(session_id.to_string())
            .with_result(serde_json::json!({ "error_type": error_type }));
        tokio::spawn(async move {
            let _ = audit.emit(&event).await;
        });
    }

    /// Runs the approval pipeline for one tool call and, if approved,
    /// executes it (§4.3-§4.5). Returns the text to append as the tool's
    /// result message either way — a denial is itself a valid tool result the
    /// model sees and can react to.
    async fn run_tool_call(
        &self,
        session: &Session,
        coordinator: &dyn ApprovalCoordinator,
        call: &ToolCall,
        correlation_id: &CorrelationId,
    ) -> Result<String, String> {
        let registry = self.tools.read().await;
        let verdict = needs_approval(
            &registry,
            session.config.permission_policy,
            self.whitelist.as_deref(),
            &session.config.tool_filter,
            &self.analyzer,
            &call.name,
            &call.args,
        );

        let _ = self
            .audit
            .emit(
                &AuditEvent::new(AuditEventType::Approval, correlation_id)
                    .with_session(session.session_id.clone())
                    .with_tool(call.name.clone(), call.args.clone())
                    .with_result(serde_json::json!({ "decision": format!("{:?}", verdict.decision), "reason": verdict.reason })),
            )
            .await;

        if verdict.is_denied() {
            self.metrics.record_tool_execution(&call.name, false);
            return Err(format!("denied: {}", verdict.reason));
        }

        if verdict.decision == ApprovalDecision::Prompt {
            let approved = coordinator
                .request_approval(ToolRequest {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    arguments: call.args.clone(),
                    risk_level: verdict.effective_risk,
                })
                .await;
            if !approved {
                self.metrics.record_tool_execution(&call.name, false);
                return Err("denied by approval coordinator".to_string());
            }
        }

        let Some(tool) = registry.get(&call.name) else {
            self.metrics.record_tool_execution(&call.name, false);
            return Err(format!("unknown tool '{}'", call.name));
        };
        drop(registry);

        let start = Instant::now();
        let outcome = tool.call(call.args.clone()).await;
        let success = outcome.as_ref().is_ok_and(|r| !r.is_error);
        self.metrics.record_tool_execution(&call.name, success);
        let _ = self
            .audit
            .emit(
                &AuditEvent::new(AuditEventType::Execution, correlation_id)
                    .with_session(session.session_id.clone())
                    .with_tool(call.name.clone(), call.args.clone())
                    .with_duration_ms(start.elapsed().as_millis() as u64),
            )
            .await;

        match outcome {
            Ok(result) if !result.is_error => Ok(result.content),
            Ok(result) => Err(result.content),
            Err(e) => Err(e.to_string()),
        }
    }
}

