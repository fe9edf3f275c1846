use std::net::SocketAddr;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use consoul_audit::hooks::RedactionHook;
use consoul_audit::sink::CompositeSink;
use consoul_audit::{AuditHook, AuditSink, CompositeHooks, MetricsCollector, RedactionConfig, Redactor, SinkMode, ValidationHook};
use consoul_core::{
    BashTool, CommandAnalyzer, ConsoulConfig, GlobTool, GrepTool, ReadTool, RiskLevel,
    SessionStoreKind, ToolCategory, ToolRegistration, ToolRegistry, WebFetchTool, WhitelistManager,
    WriteTool,
};
use consoul_server::conversation::ConversationService;
use consoul_server::provider_registry::ProviderRegistry;
use consoul_server::rate_limit::RateLimiter;
use consoul_server::state::AppState;
use consoul_server::webhooks::WebhookDispatcher;
use consoul_server::{build_router, metrics_http};
use consoul_store::{
    FileSessionStore, HookedSessionStore, MemorySessionStore, MemoryWebhookStore,
    RedisSessionStore, ResilientSessionStore, SessionLockManager, SessionStore,
    SessionStoreObserver,
};
use tokio::sync::RwLock;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "consoul-server", about = "Server-side conversation runtime (§6)")]
struct Cli {
    /// Address the chat/webhook API listens on.
    #[arg(long, default_value = "0.0.0.0:8080", env = "CONSOUL_BIND_ADDR")]
    bind: SocketAddr,

    /// Address the `/metrics` scrape endpoint listens on.
    #[arg(long, default_value = "0.0.0.0:9090", env = "CONSOUL_METRICS_BIND_ADDR")]
    metrics_bind: SocketAddr,

    /// Comma-separated API keys accepted via `X-API-Key` / `?api_key=`. Empty
    /// disables authentication entirely.
    #[arg(long, value_delimiter = ',', env = "CONSOUL_API_KEYS")]
    api_keys: Vec<String>,

    /// Requests admitted per rate-limit window, per (endpoint, identity).
    #[arg(long, default_value_t = 60, env = "CONSOUL_RATE_LIMIT")]
    rate_limit: u32,

    /// Rate-limit window length in seconds.
    #[arg(long, default_value_t = 60, env = "CONSOUL_RATE_LIMIT_WINDOW_SECS")]
    rate_limit_window_secs: u64,
}

/// Drives the `consoul_redis_degraded` gauge and `consoul_redis_recovered_total`
/// counter off `ResilientSessionStore`'s mode transitions (§9).
struct MetricsStoreObserver {
    metrics: Arc<MetricsCollector>,
}

impl SessionStoreObserver for MetricsStoreObserver {
    fn on_degraded(&self) {
        self.metrics.set_redis_degraded(true);
    }

    fn on_recovered(&self) {
        self.metrics.set_redis_degraded(false);
        self.metrics.record_redis_recovered();
    }
}

fn session_hooks(audit: Arc<dyn AuditSink>) -> Arc<dyn consoul_audit::SessionHooks> {
    Arc::new(CompositeHooks::new(vec![
        Arc::new(ValidationHook::default()),
        Arc::new(RedactionHook::new(Redactor::new(RedactionConfig::default()))),
        Arc::new(AuditHook::new(audit)),
    ]))
}

fn register_builtin_tools(registry: &mut ToolRegistry) {
    registry.register(
        ToolRegistration::new(Arc::new(ReadTool), RiskLevel::Safe).with_categories([ToolCategory::FileEdit]),
    );
    registry.register(
        ToolRegistration::new(Arc::new(GlobTool), RiskLevel::Safe).with_categories([ToolCategory::Search]),
    );
    registry.register(
        ToolRegistration::new(Arc::new(GrepTool), RiskLevel::Safe).with_categories([ToolCategory::Search]),
    );
    registry.register(
        ToolRegistration::new(Arc::new(WriteTool), RiskLevel::Caution).with_categories([ToolCategory::FileEdit]),
    );
    registry.register(
        ToolRegistration::new(Arc::new(WebFetchTool::new()), RiskLevel::Caution)
            .with_categories([ToolCategory::Web, ToolCategory::Network]),
    );
    registry.register(
        ToolRegistration::new(Arc::new(BashTool), RiskLevel::Dangerous).with_categories([ToolCategory::Shell]),
    );
}

/// Builds the session store per `config.session_store`, wrapping whichever
/// backend in the validation/redaction/audit hook chain before handing it to
/// `ResilientSessionStore` for the Redis-primary/memory-fallback gateway
/// (§4.1). `Memory` and `File` deployments pin the mode permanently rather
/// than pay for a fallback they'll never use.
async fn build_session_store(
    config: &ConsoulConfig,
    audit: Arc<dyn AuditSink>,
    observer: Arc<dyn SessionStoreObserver>,
) -> Result<Arc<dyn SessionStore>> {
    let hooks = session_hooks(audit);

    let store: Arc<dyn SessionStore> = match config.session_store {
        SessionStoreKind::Memory => {
            let hooked = HookedSessionStore::new(MemorySessionStore::new(), hooks);
            Arc::new(ResilientSessionStore::memory_only(Arc::new(hooked)))
        }
        SessionStoreKind::File => {
            let file_store = FileSessionStore::new(&config.file_store_path).await?;
            let hooked = HookedSessionStore::new(file_store, hooks);
            Arc::new(ResilientSessionStore::memory_only(Arc::new(hooked)))
        }
        SessionStoreKind::Redis => {
            let fallback: Arc<dyn SessionStore> = Arc::new(HookedSessionStore::new(MemorySessionStore::new(), hooks.clone()));
            match RedisSessionStore::connect(&config.redis_url, "consoul").await {
                Ok(redis) => {
                    let primary: Arc<dyn SessionStore> = Arc::new(HookedSessionStore::new(redis, hooks));
                    Arc::new(ResilientSessionStore::new(
                        primary,
                        Some(fallback),
                        Duration::from_secs(config.redis_reconnect_interval_secs),
                        observer,
                    ))
                }
                Err(e) => {
                    tracing::warn!(error = %e, "redis unreachable at startup, starting degraded on the memory fallback");
                    Arc::new(ResilientSessionStore::new(
                        fallback.clone(),
                        Some(fallback),
                        Duration::from_secs(config.redis_reconnect_interval_secs),
                        observer,
                    ))
                }
            }
        }
    };
    Ok(store)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("consoul_server=info".parse()?))
        .init();

    let cli = Cli::parse();
    let config = ConsoulConfig::load()?;

    info!(model = %config.model, session_store = ?config.session_store, "starting consoul-server");

    let metrics = Arc::new(MetricsCollector::new());

    let sink_mode = if config.audit_log_path.is_some() { SinkMode::Both } else { SinkMode::Stdout };
    let audit: Arc<dyn AuditSink> = Arc::new(CompositeSink::from_mode(sink_mode, config.audit_log_path.clone()));

    let observer: Arc<dyn SessionStoreObserver> = Arc::new(MetricsStoreObserver { metrics: metrics.clone() });
    let store = build_session_store(&config, audit.clone(), observer).await?;

    let mut tool_registry = ToolRegistry::new();
    register_builtin_tools(&mut tool_registry);
    let tools = Arc::new(RwLock::new(tool_registry));

    let locks = Arc::new(SessionLockManager::new());
    let analyzer = Arc::new(CommandAnalyzer::new());
    let whitelist = Some(Arc::new(WhitelistManager::new()));

    let providers = Arc::new(ProviderRegistry::from_config(&config));

    let conversation = Arc::new(ConversationService::new(
        store.clone(),
        locks,
        tools.clone(),
        analyzer,
        whitelist,
        providers,
        audit.clone(),
        metrics.clone(),
        config.clone(),
        None,
    ));

    let webhooks = Arc::new(MemoryWebhookStore::new());
    let webhook_dispatcher = Arc::new(WebhookDispatcher::new(
        webhooks.clone(),
        config.webhook_max_consecutive_failures,
        3,
        Duration::from_millis(500),
    ));

    let state = AppState {
        conversation,
        store,
        tools,
        webhooks,
        webhook_dispatcher,
        config: Arc::new(config),
        metrics: metrics.clone(),
        audit,
        rate_limiter: Arc::new(RateLimiter::new(cli.rate_limit, Duration::from_secs(cli.rate_limit_window_secs))),
        api_keys: Arc::new(cli.api_keys),
        active_websockets: Arc::new(AtomicUsize::new(0)),
    };

    let app = build_router(state).into_make_service_with_connect_info::<SocketAddr>();
    let metrics_app = metrics_http::metrics_router(metrics);

    let chat_listener = tokio::net::TcpListener::bind(cli.bind).await?;
    let metrics_listener = tokio::net::TcpListener::bind(cli.metrics_bind).await?;

    info!(bind = %cli.bind, metrics_bind = %cli.metrics_bind, "listening");

    tokio::try_join!(
        async { axum::serve(chat_listener, app).await.map_err(anyhow::Error::from) },
        async { axum::serve(metrics_listener, metrics_app).await.map_err(anyhow::Error::from) },
    )?;

    Ok(())
}
