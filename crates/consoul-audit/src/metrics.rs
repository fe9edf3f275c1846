use prometheus::{CounterVec, Encoder, GaugeVec, HistogramVec, Opts, Registry, TextEncoder};

/// Stable histogram buckets for request latency, taken from the donor's
/// `observability/metrics.py` (§0, §4.11).
const LATENCY_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

/// The `consoul_*` instrument family from §4.11. Construction never panics:
/// if the `prometheus` registry fails to build (e.g. a duplicate metric
/// name was already registered in-process), every `record_*` call becomes a
/// no-op rather than crashing the caller (§4.11: "If the metrics library is
/// absent, the collector degrades to no-ops without affecting correctness").
pub struct MetricsCollector {
    registry: Registry,
    inner: Option<Instruments>,
}

struct Instruments {
    request_total: CounterVec,
    request_latency: HistogramVec,
    token_usage_total: CounterVec,
    active_sessions: GaugeVec,
    tool_executions_total: CounterVec,
    errors_total: CounterVec,
    redis_degraded: GaugeVec,
    redis_recovered_total: CounterVec,
    circuit_breaker_state: GaugeVec,
    circuit_breaker_trips_total: CounterVec,
    circuit_breaker_rejections_total: CounterVec,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::with_registry(Registry::new())
    }

    pub fn with_registry(registry: Registry) -> Self {
        match Self::build(&registry) {
            Ok(inner) => Self { registry, inner: Some(inner) },
            Err(e) => {
                tracing::warn!(error = %e, "metrics registry construction failed; degrading to no-op");
                Self { registry, inner: None }
            }
        }
    }

    fn build(registry: &Registry) -> prometheus::Result<Instruments> {
        let request_total = CounterVec::new(
            Opts::new("consoul_request_total", "Total request count"),
            &["endpoint", "method", "status", "model"],
        )?;
        let request_latency = HistogramVec::new(
            prometheus::HistogramOpts::new("consoul_request_latency_seconds", "Request latency in seconds")
                .buckets(LATENCY_BUCKETS.to_vec()),
            &["endpoint", "method"],
        )?;
        let token_usage_total = CounterVec::new(
            Opts::new("consoul_token_usage_total", "Token usage count"),
            &["direction", "model", "session_id"],
        )?;
        let active_sessions = GaugeVec::new(Opts::new("consoul_active_sessions", "Number of active sessions"), &[])?;
        let tool_executions_total = CounterVec::new(
            Opts::new("consoul_tool_executions_total", "Tool execution count"),
            &["tool_name", "status"],
        )?;
        let errors_total =
            CounterVec::new(Opts::new("consoul_errors_total", "Error count"), &["endpoint", "error_type"])?;
        let redis_degraded = GaugeVec::new(
            Opts::new("consoul_redis_degraded", "Whether Redis is in degraded mode (1=degraded, 0=healthy)"),
            &[],
        )?;
        let redis_recovered_total = CounterVec::new(
            Opts::new("consoul_redis_recovered_total", "Total number of Redis connection recoveries"),
            &[],
        )?;
        let circuit_breaker_state = GaugeVec::new(
            Opts::new("consoul_circuit_breaker_state", "Circuit breaker state (0=closed, 1=open, 2=half-open)"),
            &["provider"],
        )?;
        let circuit_breaker_trips_total = CounterVec::new(
            Opts::new("consoul_circuit_breaker_trips_total", "Circuit breaker trip count"),
            &["provider"],
        )?;
        let circuit_breaker_rejections_total = CounterVec::new(
            Opts::new("consoul_circuit_breaker_rejections_total", "Requests rejected by an open breaker"),
            &["provider"],
        )?;

        registry.register(Box::new(request_total.clone()))?;
        registry.register(Box::new(request_latency.clone()))?;
        registry.register(Box::new(token_usage_total.clone()))?;
        registry.register(Box::new(active_sessions.clone()))?;
        registry.register(Box::new(tool_executions_total.clone()))?;
        registry.register(Box::new(errors_total.clone()))?;
        registry.register(Box::new(redis_degraded.clone()))?;
        registry.register(Box::new(redis_recovered_total.clone()))?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;
        registry.register(Box::new(circuit_breaker_trips_total.clone()))?;
        registry.register(Box::new(circuit_breaker_rejections_total.clone()))?;

        Ok(Instruments {
            request_total,
            request_latency,
            token_usage_total,
            active_sessions,
            tool_executions_total,
            errors_total,
            redis_degraded,
            redis_recovered_total,
            circuit_breaker_state,
            circuit_breaker_trips_total,
            circuit_breaker_rejections_total,
        })
    }

    pub fn record_request(&self, endpoint: &str, method: &str, status: u16, latency_secs: f64, model: &str) {
        let Some(i) = &self.inner else { return };
        i.request_total.with_label_values(&[endpoint, method, &status.to_string(), model]).inc();
        i.request_latency.with_label_values(&[endpoint, method]).observe(latency_secs);
    }

    pub fn record_tokens(&self, input_tokens: u64, output_tokens: u64, model: &str, session_id: &str) {
        let Some(i) = &self.inner else { return };
        i.token_usage_total.with_label_values(&["input", model, session_id]).inc_by(input_tokens as f64);
        i.token_usage_total.with_label_values(&["output", model, session_id]).inc_by(output_tokens as f64);
    }

    pub fn set_active_sessions(&self, count: i64) {
        let Some(i) = &self.inner else { return };
        i.active_sessions.with_label_values(&[]).set(count as f64);
    }

    pub fn record_tool_execution(&self, tool_name: &str, success: bool) {
        let Some(i) = &self.inner else { return };
        let status = if success { "success" } else { "failure" };
        i.tool_executions_total.with_label_values(&[tool_name, status]).inc();
    }

    pub fn record_error(&self, endpoint: &str, error_type: &str) {
        let Some(i) = &self.inner else { return };
        i.errors_total.with_label_values(&[endpoint, error_type]).inc();
    }

    pub fn set_redis_degraded(&self, degraded: bool) {
        let Some(i) = &self.inner else { return };
        i.redis_degraded.with_label_values(&[]).set(if degraded { 1.0 } else { 0.0 });
    }

    pub fn record_redis_recovered(&self) {
        let Some(i) = &self.inner else { return };
        i.redis_recovered_total.with_label_values(&[]).inc();
    }

    pub fn set_circuit_breaker_state(&self, provider: &str, state: u8) {
        let Some(i) = &self.inner else { return };
        i.circuit_breaker_state.with_label_values(&[provider]).set(state as f64);
    }

    pub fn record_circuit_breaker_trip(&self, provider: &str) {
        let Some(i) = &self.inner else { return };
        i.circuit_breaker_trips_total.with_label_values(&[provider]).inc();
    }

    pub fn record_circuit_breaker_rejection(&self, provider: &str) {
        let Some(i) = &self.inner else { return };
        i.circuit_breaker_rejections_total.with_label_values(&[provider]).inc();
    }

    /// Whether the registry built successfully. `consoul-server`'s `/health`
    /// handler and tests use this; correctness of the rest of the system
    /// never depends on it (§4.11).
    pub fn enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Renders the Prometheus text exposition format for the `/metrics`
    /// listener (§6, a separate port from the chat server).
    pub fn encode(&self) -> Vec<u8> {
        let families = self.registry.gather();
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let _ = encoder.encode(&families, &mut buf);
        buf
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_without_panicking_and_encodes_text_format() {
        let metrics = MetricsCollector::new();
        assert!(metrics.enabled());
        metrics.record_request("/chat", "POST", 200, 0.25, "gpt-4o");
        metrics.record_tokens(10, 20, "gpt-4o", "s1");
        metrics.set_active_sessions(3);
        metrics.record_tool_execution("bash", true);
        metrics.record_error("/chat", "validation");
        metrics.set_redis_degraded(true);
        metrics.record_redis_recovered();
        metrics.set_circuit_breaker_state("openai", 1);
        metrics.record_circuit_breaker_trip("openai");
        metrics.record_circuit_breaker_rejection("openai");

        let text = String::from_utf8(metrics.encode()).unwrap();
        assert!(text.contains("consoul_request_total"));
        assert!(text.contains("consoul_circuit_breaker_state"));
    }

    #[test]
    fn duplicate_registration_degrades_to_noop_not_panic() {
        let registry = Registry::new();
        let _first = MetricsCollector::with_registry(registry.clone());
        let second = MetricsCollector::with_registry(registry);
        assert!(!second.enabled());
        // Must not panic even though the instruments are absent.
        second.record_request("/chat", "POST", 200, 0.1, "gpt-4o");
    }
}
