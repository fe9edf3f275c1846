use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;

use consoul_audit::MetricsCollector;

/// A deliberately separate listener from the chat server (§6) — scrapers
/// shouldn't share a port with user traffic, and an operator can firewall it
/// off independently.
pub fn metrics_router(metrics: Arc<MetricsCollector>) -> Router {
    Router::new().route("/metrics", get(serve_metrics)).with_state(metrics)
}

async fn serve_metrics(State(metrics): State<Arc<MetricsCollector>>) -> impl IntoResponse {
    (
        [("Content-Type", "text/plain; version=0.0.4")],
        metrics.encode(),
    )
}
