use dashmap::DashMap;
use std::time::{Duration, Instant};

struct Window {
    count: u32,
    window_started: Instant,
}

/// Fixed-window limiter keyed by `(endpoint, identity)` — identity is the API
/// key if authenticated, else the caller's remote address (§7: 429 with
/// `Retry-After`).
pub struct RateLimiter {
    windows: DashMap<String, Window>,
    limit: u32,
    period: Duration,
}

impl RateLimiter {
    pub fn new(limit: u32, period: Duration) -> Self {
        Self { windows: DashMap::new(), limit, period }
    }

    /// `Ok(())` if the call is admitted; `Err(retry_after)` otherwise.
    pub fn check(&self, key: &str) -> Result<(), Duration> {
        let now = Instant::now();
        let mut entry = self.windows.entry(key.to_string()).or_insert_with(|| Window { count: 0, window_started: now });

        if now.duration_since(entry.window_started) >= self.period {
            entry.count = 0;
            entry.window_started = now;
        }

        if entry.count >= self.limit {
            let retry_after = self.period.saturating_sub(now.duration_since(entry.window_started));
            return Err(retry_after);
        }

        entry.count += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_the_limit_then_rejects() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        assert!(limiter.check("k").is_ok());
        assert!(limiter.check("k").is_ok());
        assert!(limiter.check("k").is_err());
    }

    #[test]
    fn distinct_keys_have_independent_windows() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.check("a").is_ok());
        assert!(limiter.check("b").is_ok());
    }

    #[test]
    fn window_resets_after_the_period_elapses() {
        let limiter = RateLimiter::new(1, Duration::from_millis(20));
        assert!(limiter.check("k").is_ok());
        assert!(limiter.check("k").is_err());
        std::thread::sleep(Duration::from_millis(30));
        assert!(limiter.check("k").is_ok());
    }
}
