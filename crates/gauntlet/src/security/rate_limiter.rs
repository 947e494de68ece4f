//! Per-key sliding-window rate limiting with optional Redis backing.
//!
//! When Redis is configured it is the canonical window (sorted-set drop /
//! card / add / expire in one atomic pipeline) so multiple instances share
//! state. On any Redis failure the limiter falls back to local buckets and
//! keeps serving; callers are never blocked by cache outages.

use dashmap::DashMap;
use redis::aio::ConnectionManager;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use gauntlet_common::constants::redis_keys::RATELIMIT_PREFIX;

/// One key's accepted-request timestamps
struct Bucket {
    timestamps: Vec<Instant>,
    window: Duration,
    last_seen: Instant,
}

pub struct RateLimiter {
    redis: Option<ConnectionManager>,
    buckets: DashMap<String, Bucket>,
    /// Set after the first Redis failure so the fallback is logged once
    degraded: AtomicBool,
}

impl RateLimiter {
    pub fn new(redis: Option<ConnectionManager>) -> Self {
        Self {
            redis,
            buckets: DashMap::new(),
            degraded: AtomicBool::new(false),
        }
    }

    /// Check and consume one slot for `key`. Strict: within any window the
    /// number of allowed requests never exceeds `limit`.
    pub async fn allow(&self, key: &str, limit: u32, window: Duration) -> bool {
        if let Some(conn) = &self.redis {
            match self.check_redis(conn.clone(), key, limit, window).await {
                Ok(allowed) => return allowed,
                Err(e) => {
                    if !self.degraded.swap(true, Ordering::Relaxed) {
                        tracing::warn!(error = %e, "Rate limiter falling back to local state");
                    }
                }
            }
        }

        self.check_local(key, limit, window)
    }

    async fn check_redis(
        &self,
        mut conn: ConnectionManager,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> Result<bool, redis::RedisError> {
        let key = format!("{RATELIMIT_PREFIX}{key}");
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let now_ms = now.as_millis() as u64;
        let cutoff_ms = now_ms.saturating_sub(window.as_millis() as u64);

        let (_, count, _, _): (u64, u64, u64, bool) = redis::pipe()
            .atomic()
            .zrembyscore(&key, 0, cutoff_ms)
            .zcard(&key)
            .zadd(&key, now.as_nanos() as u64, now_ms)
            .expire(&key, window.as_secs() as i64)
            .query_async(&mut conn)
            .await?;

        Ok(count < u64::from(limit))
    }

    /// Sliding window over a per-bucket timestamp slice. The slice is
    /// trimmed and appended under the bucket's own lock, so concurrent
    /// callers never observe a partially trimmed window.
    fn check_local(&self, key: &str, limit: u32, window: Duration) -> bool {
        let now = Instant::now();
        let mut bucket = self.buckets.entry(key.to_string()).or_insert_with(|| Bucket {
            timestamps: Vec::with_capacity(limit as usize),
            window,
            last_seen: now,
        });

        bucket.last_seen = now;
        bucket.window = window;
        bucket
            .timestamps
            .retain(|t| now.duration_since(*t) < window);

        if bucket.timestamps.len() < limit as usize {
            bucket.timestamps.push(now);
            true
        } else {
            false
        }
    }

    /// Evict buckets idle for longer than twice their window
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let before = self.buckets.len();
        self.buckets
            .retain(|_, b| now.duration_since(b.last_seen) < b.window * 2);
        before - self.buckets.len()
    }

    pub fn stats(&self) -> serde_json::Value {
        json!({
            "active_limits": self.buckets.len(),
            "redis_available": self.redis.is_some(),
            "degraded": self.degraded.load(Ordering::Relaxed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_allows_within_limit() {
        let limiter = RateLimiter::new(None);
        for _ in 0..5 {
            assert!(limiter.allow("k", 5, Duration::from_secs(60)).await);
        }
    }

    #[tokio::test]
    async fn test_denies_over_limit() {
        let limiter = RateLimiter::new(None);
        let window = Duration::from_secs(60);

        assert!(limiter.allow("x", 3, window).await);
        assert!(limiter.allow("x", 3, window).await);
        assert!(limiter.allow("x", 3, window).await);
        assert!(!limiter.allow("x", 3, window).await);
    }

    #[tokio::test]
    async fn test_window_slides() {
        let limiter = RateLimiter::new(None);
        let window = Duration::from_millis(50);

        assert!(limiter.allow("s", 1, window).await);
        assert!(!limiter.allow("s", 1, window).await);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(limiter.allow("s", 1, window).await);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let limiter = RateLimiter::new(None);
        let window = Duration::from_secs(60);

        assert!(limiter.allow("a", 1, window).await);
        assert!(!limiter.allow("a", 1, window).await);
        assert!(limiter.allow("b", 1, window).await);
    }

    #[tokio::test]
    async fn test_cleanup_evicts_idle_buckets() {
        let limiter = RateLimiter::new(None);
        limiter.allow("old", 5, Duration::from_millis(10)).await;

        tokio::time::sleep(Duration::from_millis(40)).await;
        let evicted = limiter.cleanup();
        assert_eq!(evicted, 1);
    }

    #[tokio::test]
    async fn test_window_tightness_under_concurrency() {
        use std::sync::Arc;

        let limiter = Arc::new(RateLimiter::new(None));
        let window = Duration::from_secs(60);
        let mut handles = Vec::new();

        for _ in 0..8 {
            let l = limiter.clone();
            handles.push(tokio::spawn(async move {
                let mut allowed = 0u32;
                for _ in 0..25 {
                    if l.allow("shared", 50, window).await {
                        allowed += 1;
                    }
                }
                allowed
            }));
        }

        let mut total = 0;
        for h in handles {
            total += h.await.unwrap();
        }
        assert_eq!(total, 50, "exactly the limit must be admitted");
    }
}
