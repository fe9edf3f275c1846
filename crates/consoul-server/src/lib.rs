pub mod auth;
pub mod conversation;
pub mod error;
pub mod http;
pub mod metrics_http;
pub mod provider_registry;
pub mod rate_limit;
pub mod state;
pub mod webhooks;
pub mod ws;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use state::AppState;

/// The main chat server's router: `/chat`, `/ws/chat/{session_id}`,
/// `/health`, and the webhook CRUD surface (§6). Metrics are served from a
/// separate router/port via `metrics_http::metrics_router`.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/chat", post(http::chat))
        .route("/ws/chat/{session_id}", get(ws::chat_ws))
        .route("/health", get(http::health))
        .route("/webhooks", post(webhooks::create_webhook).get(webhooks::list_webhooks))
        .route(
            "/webhooks/{id}",
            get(webhooks::get_webhook).patch(webhooks::update_webhook).delete(webhooks::delete_webhook),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
