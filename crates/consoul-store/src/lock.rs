use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-`session_id` exclusive access (§4.2). A session's load→process→save
/// critical section must run under a single acquisition so that two
/// concurrent messages to the same session serialize, while unrelated
/// sessions progress independently on the fast path.
#[derive(Clone, Default)]
pub struct SessionLockManager {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

/// Holds the per-session mutex guard for the caller's critical section.
/// Dropping it releases the mutex and, if no other task is waiting on this
/// `session_id`, removes the map entry so idle sessions don't leak memory.
pub struct SessionLockGuard {
    session_id: String,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for SessionLockGuard {
    fn drop(&mut self) {
        // Two strong refs means only the map and this about-to-drop clone
        // reference the mutex; safe to remove without racing a new waiter,
        // since a new `acquire` would need the map entry to clone from.
        self.locks.remove_if(&self.session_id, |_, v| Arc::strong_count(v) <= 2);
    }
}

impl SessionLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the exclusive lock for `session_id`, waiting if another task
    /// already holds it. Concurrent `acquire` calls for distinct session IDs
    /// never contend with each other.
    pub async fn acquire(&self, session_id: impl Into<String>) -> SessionLockGuard {
        let session_id = session_id.into();
        let mutex = self
            .locks
            .entry(session_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;
        SessionLockGuard {
            session_id,
            locks: self.locks.clone(),
            _guard: guard,
        }
    }

    /// Number of session IDs with an outstanding or contended lock entry.
    /// Exposed for tests and health diagnostics, not part of the locking
    /// contract itself.
    pub fn active_count(&self) -> usize {
        self.locks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_session_id_serializes() {
        let manager = SessionLockManager::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let max_concurrent = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let manager = manager.clone();
            let counter = counter.clone();
            let max_concurrent = max_concurrent.clone();
            handles.push(tokio::spawn(async move {
                let _guard = manager.acquire("s1").await;
                let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
                max_concurrent.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                counter.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(max_concurrent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_session_ids_run_in_parallel() {
        let manager = SessionLockManager::new();
        let started = Arc::new(tokio::sync::Barrier::new(2));

        let m1 = manager.clone();
        let s1 = started.clone();
        let h1 = tokio::spawn(async move {
            let _guard = m1.acquire("a").await;
            s1.wait().await;
        });
        let m2 = manager.clone();
        let s2 = started.clone();
        let h2 = tokio::spawn(async move {
            let _guard = m2.acquire("b").await;
            s2.wait().await;
        });

        tokio::time::timeout(Duration::from_secs(1), async {
            h1.await.unwrap();
            h2.await.unwrap();
        })
        .await
        .expect("distinct session locks must not block each other");
    }

    #[tokio::test]
    async fn releasing_cleans_up_idle_entries() {
        let manager = SessionLockManager::new();
        {
            let _guard = manager.acquire("temp").await;
            assert_eq!(manager.active_count(), 1);
        }
        assert_eq!(manager.active_count(), 0);
    }
}
