use super::{SessionStore, SessionStoreError};
use async_trait::async_trait;
use consoul_core::Session;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionStoreMode {
    Redis = 0,
    Memory = 1,
    Degraded = 2,
}

impl From<u8> for SessionStoreMode {
    fn from(v: u8) -> Self {
        match v {
            0 => SessionStoreMode::Redis,
            1 => SessionStoreMode::Memory,
            _ => SessionStoreMode::Degraded,
        }
    }
}

/// Notified on mode transitions so the caller can drive
/// `consoul_redis_degraded` / `consoul_redis_recovered_total` without this
/// crate depending on the metrics stack directly.
pub trait SessionStoreObserver: Send + Sync {
    fn on_degraded(&self) {}
    fn on_recovered(&self) {}
}

struct NoopObserver;
impl SessionStoreObserver for NoopObserver {}

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// Wraps a primary store (Redis) with an optional in-memory fallback
/// (§4.1). On primary failure the gateway switches to `degraded`, serves
/// from the fallback, and retries the primary no more often than every
/// `reconnect_interval`. Constructing with `memory_only` pins the mode to
/// `Memory` permanently — used when no Redis backend is configured at all.
pub struct ResilientSessionStore {
    primary: Arc<dyn SessionStore>,
    fallback: Option<Arc<dyn SessionStore>>,
    reconnect_interval: Duration,
    mode: AtomicU8,
    last_failure: AtomicU64,
    pinned: bool,
    observer: Arc<dyn SessionStoreObserver>,
}

impl ResilientSessionStore {
    pub fn new(
        primary: Arc<dyn SessionStore>,
        fallback: Option<Arc<dyn SessionStore>>,
        reconnect_interval: Duration,
        observer: Arc<dyn SessionStoreObserver>,
    ) -> Self {
        Self {
            primary,
            fallback,
            reconnect_interval,
            mode: AtomicU8::new(SessionStoreMode::Redis as u8),
            last_failure: AtomicU64::new(0),
            pinned: false,
            observer,
        }
    }

    pub fn memory_only(store: Arc<dyn SessionStore>) -> Self {
        Self {
            primary: store,
            fallback: None,
            reconnect_interval: Duration::from_secs(u64::MAX),
            mode: AtomicU8::new(SessionStoreMode::Memory as u8),
            last_failure: AtomicU64::new(0),
            pinned: true,
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn mode(&self) -> SessionStoreMode {
        self.mode.load(Ordering::SeqCst).into()
    }

    fn mark_degraded(&self) {
        if self.pinned {
            return;
        }
        let was_redis = self.mode.swap(SessionStoreMode::Degraded as u8, Ordering::SeqCst) == SessionStoreMode::Redis as u8;
        self.last_failure.store(now_secs(), Ordering::SeqCst);
        if was_redis {
            self.observer.on_degraded();
        }
    }

    fn mark_recovered(&self) {
        if self.pinned {
            return;
        }
        let was_degraded = self.mode.swap(SessionStoreMode::Redis as u8, Ordering::SeqCst) == SessionStoreMode::Degraded as u8;
        if was_degraded {
            self.observer.on_recovered();
        }
    }

    fn should_retry_primary(&self) -> bool {
        if self.pinned || self.mode() != SessionStoreMode::Degraded {
            return true;
        }
        let last = self.last_failure.load(Ordering::SeqCst);
        now_secs().saturating_sub(last) >= self.reconnect_interval.as_secs()
    }
}

macro_rules! dispatch {
    ($self:expr, $op:ident($($arg:expr),*)) => {{
        if $self.should_retry_primary() {
            match $self.primary.$op($($arg),*).await {
                Ok(v) => {
                    $self.mark_recovered();
                    return Ok(v);
                }
                Err(e) => {
                    $self.mark_degraded();
                    if $self.fallback.is_none() {
                        return Err(e);
                    }
                }
            }
        }
        match &$self.fallback {
            Some(fallback) => fallback.$op($($arg),*).await,
            None => Err(SessionStoreError::Unavailable("primary store unavailable and no fallback configured".into())),
        }
    }};
}

#[async_trait]
impl SessionStore for ResilientSessionStore {
    async fn save(&self, session: &Session) -> Result<(), SessionStoreError> {
        dispatch!(self, save(session))
    }

    async fn load(&self, session_id: &str) -> Result<Option<Session>, SessionStoreError> {
        dispatch!(self, load(session_id))
    }

    async fn delete(&self, session_id: &str) -> Result<(), SessionStoreError> {
        dispatch!(self, delete(session_id))
    }

    async fn list_sessions(
        &self,
        namespace: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<String>, SessionStoreError> {
        dispatch!(self, list_sessions(namespace, limit, offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session_store::memory::MemorySessionStore;
    use async_trait::async_trait;
    use consoul_core::SessionConfig;
    use std::sync::atomic::AtomicUsize;

    struct AlwaysFails;

    #[async_trait]
    impl SessionStore for AlwaysFails {
        async fn save(&self, _session: &Session) -> Result<(), SessionStoreError> {
            Err(SessionStoreError::Redis("down".into()))
        }
        async fn load(&self, _session_id: &str) -> Result<Option<Session>, SessionStoreError> {
            Err(SessionStoreError::Redis("down".into()))
        }
        async fn delete(&self, _session_id: &str) -> Result<(), SessionStoreError> {
            Err(SessionStoreError::Redis("down".into()))
        }
        async fn list_sessions(
            &self,
            _namespace: Option<&str>,
            _limit: usize,
            _offset: usize,
        ) -> Result<Vec<String>, SessionStoreError> {
            Err(SessionStoreError::Redis("down".into()))
        }
    }

    #[derive(Default)]
    struct CountingObserver {
        degraded: AtomicUsize,
        recovered: AtomicUsize,
    }

    impl SessionStoreObserver for CountingObserver {
        fn on_degraded(&self) {
            self.degraded.fetch_add(1, Ordering::SeqCst);
        }
        fn on_recovered(&self) {
            self.recovered.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn falls_back_to_memory_on_primary_failure() {
        let observer = Arc::new(CountingObserver::default());
        let store = ResilientSessionStore::new(
            Arc::new(AlwaysFails),
            Some(Arc::new(MemorySessionStore::new())),
            Duration::from_secs(30),
            observer.clone(),
        );
        let session = Session::new("s1", "gpt-4o", SessionConfig::default());
        store.save(&session).await.unwrap();
        assert_eq!(store.mode(), SessionStoreMode::Degraded);
        assert_eq!(observer.degraded.load(Ordering::SeqCst), 1);

        let loaded = store.load("s1").await.unwrap().unwrap();
        assert_eq!(loaded.session_id, "s1");
    }

    #[tokio::test]
    async fn no_fallback_surfaces_typed_error() {
        let store = ResilientSessionStore::new(
            Arc::new(AlwaysFails),
            None,
            Duration::from_secs(30),
            Arc::new(NoopObserver),
        );
        let session = Session::new("s1", "gpt-4o", SessionConfig::default());
        assert!(store.save(&session).await.is_err());
    }

    #[tokio::test]
    async fn memory_only_mode_never_reports_degraded() {
        let observer_calls = Arc::new(CountingObserver::default());
        let _unused = observer_calls.clone();
        let store = ResilientSessionStore::memory_only(Arc::new(MemorySessionStore::new()));
        let session = Session::new("s1", "gpt-4o", SessionConfig::default());
        store.save(&session).await.unwrap();
        assert_eq!(store.mode(), SessionStoreMode::Memory);
    }
}
