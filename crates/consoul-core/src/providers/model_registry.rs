use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Capability/limits entry for one model, as discovered from a provider's
/// model-listing endpoint (§4.6: "discovered via an external model registry
/// cached on disk with TTL and retry-on-failure back-off").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub context_window: usize,
    pub supports_tools: bool,
    pub supports_vision: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    fetched_at: u64,
    models: HashMap<String, ModelInfo>,
}

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// Disk-cached model registry. `refresh_with` fetches fresh data through a
/// caller-supplied closure (the HTTP call itself is provider-specific and
/// lives in `consoul-server`), persists it, and backs off on failure so a
/// flaky provider listing endpoint doesn't get hammered every lookup.
pub struct ModelRegistry {
    cache_path: PathBuf,
    ttl: Duration,
    retry_backoff: Duration,
    last_failure: std::sync::Mutex<Option<SystemTime>>,
}

impl ModelRegistry {
    pub fn new(cache_path: PathBuf, ttl: Duration, retry_backoff: Duration) -> Self {
        Self {
            cache_path,
            ttl,
            retry_backoff,
            last_failure: std::sync::Mutex::new(None),
        }
    }

    fn read_cache(&self) -> Option<CacheFile> {
        let data = std::fs::read_to_string(&self.cache_path).ok()?;
        serde_json::from_str(&data).ok()
    }

    fn write_cache(&self, cache: &CacheFile) {
        if let Some(parent) = self.cache_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Ok(data) = serde_json::to_string_pretty(cache) {
            let _ = std::fs::write(&self.cache_path, data);
        }
    }

    fn is_fresh(&self, cache: &CacheFile) -> bool {
        now_secs().saturating_sub(cache.fetched_at) < self.ttl.as_secs()
    }

    fn backed_off(&self) -> bool {
        match *self.last_failure.lock().unwrap() {
            Some(t) => t.elapsed().map(|d| d < self.retry_backoff).unwrap_or(false),
            None => false,
        }
    }

    /// Looks up `model`, refreshing the whole registry via `fetch` if the
    /// on-disk cache is missing, stale, and not currently in a failure
    /// back-off window. Returns `None` if nothing is known about `model`.
    pub async fn lookup<F, Fut>(&self, model: &str, fetch: F) -> Option<ModelInfo>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<HashMap<String, ModelInfo>>>,
    {
        let mut cache = self.read_cache().unwrap_or_default();

        if (!self.is_fresh(&cache) || cache.models.is_empty()) && !self.backed_off() {
            match fetch().await {
                Ok(models) => {
                    cache = CacheFile { fetched_at: now_secs(), models };
                    self.write_cache(&cache);
                    *self.last_failure.lock().unwrap() = None;
                }
                Err(_) => {
                    *self.last_failure.lock().unwrap() = Some(SystemTime::now());
                }
            }
        }

        cache.models.get(model).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn caches_fetched_models_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::new(
            dir.path().join("models.json"),
            Duration::from_secs(3600),
            Duration::from_secs(60),
        );

        let info = registry
            .lookup("gpt-4o", || async {
                let mut m = HashMap::new();
                m.insert(
                    "gpt-4o".to_string(),
                    ModelInfo { context_window: 128_000, supports_tools: true, supports_vision: true },
                );
                Ok(m)
            })
            .await;
        assert_eq!(info.unwrap().context_window, 128_000);
        assert!(dir.path().join("models.json").exists());
    }

    #[tokio::test]
    async fn stale_lookup_does_not_refetch_within_ttl() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::new(
            dir.path().join("models.json"),
            Duration::from_secs(3600),
            Duration::from_secs(60),
        );
        registry
            .lookup("m", || async {
                let mut m = HashMap::new();
                m.insert("m".to_string(), ModelInfo { context_window: 10, supports_tools: false, supports_vision: false });
                Ok(m)
            })
            .await;

        let info = registry
            .lookup("m", || async { anyhow::bail!("should not be called") })
            .await;
        assert_eq!(info.unwrap().context_window, 10);
    }

    #[tokio::test]
    async fn unknown_model_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::new(
            dir.path().join("models.json"),
            Duration::from_secs(3600),
            Duration::from_secs(60),
        );
        let info = registry
            .lookup("missing", || async { Ok(HashMap::new()) })
            .await;
        assert!(info.is_none());
    }
}
