use super::provider::{LlmProvider, LlmResponse, Message, ProviderErrorKind, StreamChunk};
use crate::tools::tool::ToolDef;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::mpsc;

/// Three-state breaker per §4.6. Numeric values match the
/// `consoul_circuit_breaker_state` gauge contract (0/1/2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BreakerState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl From<u8> for BreakerState {
    fn from(v: u8) -> Self {
        match v {
            1 => BreakerState::Open,
            2 => BreakerState::HalfOpen,
            _ => BreakerState::Closed,
        }
    }
}

#[derive(Debug, Error)]
#[error("circuit breaker for provider '{provider}' is open")]
pub struct CircuitOpenError {
    pub provider: String,
}

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// Counters a caller can snapshot for the `consoul_circuit_breaker_*`
/// metrics family without taking a lock.
#[derive(Debug, Default)]
pub struct BreakerMetrics {
    pub trips_total: AtomicU64,
    pub rejections_total: AtomicU64,
}

/// Wraps a single provider with the CLOSED/OPEN/HALF_OPEN state machine of
/// §4.6. Breakers are keyed by provider name by the caller (typically one
/// `CircuitBreaker` per `Arc<dyn LlmProvider>` held in a provider registry).
pub struct CircuitBreaker {
    provider_name: String,
    inner: Arc<dyn LlmProvider>,
    failure_threshold: u32,
    cool_down: Duration,
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    opened_at: AtomicU64,
    /// HALF_OPEN allows exactly one probe in flight; this guards that.
    probe_in_flight: AtomicU8,
    pub metrics: BreakerMetrics,
}

impl CircuitBreaker {
    pub fn new(
        provider_name: impl Into<String>,
        inner: Arc<dyn LlmProvider>,
        failure_threshold: u32,
        cool_down: Duration,
    ) -> Self {
        Self {
            provider_name: provider_name.into(),
            inner,
            failure_threshold,
            cool_down,
            state: AtomicU8::new(BreakerState::Closed as u8),
            consecutive_failures: AtomicU32::new(0),
            opened_at: AtomicU64::new(0),
            probe_in_flight: AtomicU8::new(0),
            metrics: BreakerMetrics::default(),
        }
    }

    pub fn provider_name(&self) -> &str {
        &self.provider_name
    }

    pub fn state(&self) -> BreakerState {
        BreakerState::from(self.state.load(Ordering::SeqCst))
    }

    /// Transitions OPEN → HALF_OPEN once the cool-down has elapsed. Called
    /// before every call attempt.
    fn maybe_half_open(&self) {
        if self.state() == BreakerState::Open {
            let opened_at = self.opened_at.load(Ordering::SeqCst);
            if now_secs().saturating_sub(opened_at) >= self.cool_down.as_secs() {
                self.state.store(BreakerState::HalfOpen as u8, Ordering::SeqCst);
            }
        }
    }

    /// Returns `Err(CircuitOpenError)` without touching the inner provider
    /// when the breaker is OPEN, or when HALF_OPEN already has a probe in
    /// flight (§4.6: "allow a single probe call").
    fn admit(&self) -> Result<bool, CircuitOpenError> {
        self.maybe_half_open();
        match self.state() {
            BreakerState::Closed => Ok(false),
            BreakerState::Open => {
                self.metrics.rejections_total.fetch_add(1, Ordering::SeqCst);
                Err(CircuitOpenError {
                    provider: self.provider_name.clone(),
                })
            }
            BreakerState::HalfOpen => {
                if self
                    .probe_in_flight
                    .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    Ok(true)
                } else {
                    self.metrics.rejections_total.fetch_add(1, Ordering::SeqCst);
                    Err(CircuitOpenError {
                        provider: self.provider_name.clone(),
                    })
                }
            }
        }
    }

    fn record_success(&self, was_probe: bool) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        self.state.store(BreakerState::Closed as u8, Ordering::SeqCst);
        if was_probe {
            self.probe_in_flight.store(0, Ordering::SeqCst);
        }
    }

    fn record_failure(&self, was_probe: bool, counts: bool) {
        if was_probe {
            self.probe_in_flight.store(0, Ordering::SeqCst);
        }
        if !counts {
            return;
        }
        if was_probe {
            self.trip();
            return;
        }
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= self.failure_threshold {
            self.trip();
        }
    }

    fn trip(&self) {
        self.state.store(BreakerState::Open as u8, Ordering::SeqCst);
        self.opened_at.store(now_secs(), Ordering::SeqCst);
        self.metrics.trips_total.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl LlmProvider for CircuitBreaker {
    async fn complete(&self, messages: &[Message], tools: &[ToolDef]) -> Result<LlmResponse> {
        let was_probe = self.admit().map_err(anyhow::Error::from)?;
        match self.inner.complete(messages, tools).await {
            Ok(resp) => {
                self.record_success(was_probe);
                Ok(resp)
            }
            Err(e) => {
                self.record_failure(was_probe, true);
                Err(e)
            }
        }
    }

    async fn stream_complete(
        &self,
        messages: &[Message],
        tools: &[ToolDef],
        tx: mpsc::Sender<StreamChunk>,
    ) -> Result<()> {
        let was_probe = self.admit().map_err(anyhow::Error::from)?;

        // Tap the stream so a `StreamChunk::Error` (transport/rate-limit)
        // is counted as a breaker failure even though `stream_complete`
        // itself returns `Ok`. Token-limit and auth errors from the inner
        // provider never count (§4.6).
        let (inner_tx, mut inner_rx) = mpsc::channel(256);
        let result = self.inner.stream_complete(messages, tools, inner_tx).await;

        let mut saw_counting_failure = false;
        let mut saw_success = false;
        while let Some(chunk) = inner_rx.recv().await {
            if let StreamChunk::Error { kind, .. } = &chunk {
                if kind.counts_as_breaker_failure() {
                    saw_counting_failure = true;
                }
            }
            if matches!(chunk, StreamChunk::Done { .. }) {
                saw_success = true;
            }
            if tx.send(chunk).await.is_err() {
                break;
            }
        }

        match &result {
            Err(_) => self.record_failure(was_probe, true),
            Ok(()) if saw_counting_failure => self.record_failure(was_probe, true),
            Ok(()) if saw_success => self.record_success(was_probe),
            Ok(()) => {
                if was_probe {
                    self.probe_in_flight.store(0, Ordering::SeqCst);
                }
            }
        }

        result
    }

    fn supports_tools(&self) -> bool {
        self.inner.supports_tools()
    }

    fn supports_vision(&self) -> bool {
        self.inner.supports_vision()
    }

    fn context_window(&self) -> Option<usize> {
        self.inner.context_window()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::provider::{Role, TokenUsage};
    use std::sync::atomic::AtomicUsize;

    struct FlakyProvider {
        fail_times: AtomicUsize,
    }

    #[async_trait]
    impl LlmProvider for FlakyProvider {
        async fn complete(&self, _messages: &[Message], _tools: &[ToolDef]) -> Result<LlmResponse> {
            if self.fail_times.load(Ordering::SeqCst) > 0 {
                self.fail_times.fetch_sub(1, Ordering::SeqCst);
                anyhow::bail!("simulated failure")
            } else {
                Ok(LlmResponse::Message {
                    content: "ok".to_string(),
                    usage: TokenUsage { input_tokens: 1, output_tokens: 1 },
                })
            }
        }

        async fn stream_complete(
            &self,
            _messages: &[Message],
            _tools: &[ToolDef],
            _tx: mpsc::Sender<StreamChunk>,
        ) -> Result<()> {
            unimplemented!()
        }
    }

    fn msg() -> Vec<Message> {
        vec![Message {
            role: Role::User,
            content: "hi".to_string(),
            tool_call_id: None,
            tool_name: None,
            tool_calls: None,
        }]
    }

    #[tokio::test]
    async fn trips_after_threshold_consecutive_failures() {
        let inner = Arc::new(FlakyProvider { fail_times: AtomicUsize::new(10) });
        let breaker = CircuitBreaker::new("test", inner, 3, Duration::from_secs(30));

        for _ in 0..3 {
            assert!(breaker.complete(&msg(), &[]).await.is_err());
        }
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn open_breaker_rejects_without_calling_inner() {
        let inner = Arc::new(FlakyProvider { fail_times: AtomicUsize::new(10) });
        let breaker = CircuitBreaker::new("test", inner, 1, Duration::from_secs(30));

        assert!(breaker.complete(&msg(), &[]).await.is_err());
        assert_eq!(breaker.state(), BreakerState::Open);

        let before = breaker.metrics.rejections_total.load(Ordering::SeqCst);
        let result = breaker.complete(&msg(), &[]).await;
        assert!(result.is_err());
        assert_eq!(
            breaker.metrics.rejections_total.load(Ordering::SeqCst),
            before + 1
        );
    }

    #[tokio::test]
    async fn half_open_probe_recovers_to_closed() {
        let inner = Arc::new(FlakyProvider { fail_times: AtomicUsize::new(1) });
        let breaker = CircuitBreaker::new("test", inner, 1, Duration::from_millis(10));

        assert!(breaker.complete(&msg(), &[]).await.is_err());
        assert_eq!(breaker.state(), BreakerState::Open);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(breaker.complete(&msg(), &[]).await.is_ok());
        assert_eq!(breaker.state(), BreakerState::Closed);
    }
}
