//! Adaptive security pipeline.
//!
//! `SecurityService` composes the blocker, rate limiter, bot scorer, and
//! adaptive limiter behind a single per-request decision. The pipeline
//! stops at the first deny; reasons are surfaced verbatim to the caller.

mod adaptive_limiter;
mod bot_detector;
mod ip_blocker;
mod rate_limiter;

pub use adaptive_limiter::{AdaptiveLimiter, AdaptiveLimiterConfig, SourceBehavior};
pub use bot_detector::BotDetector;
pub use ip_blocker::IpBlocker;
pub use rate_limiter::RateLimiter;

use redis::aio::ConnectionManager;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use gauntlet_common::constants::{HIGH_BOT_SCORE, MIN_BOT_SCORE};
use gauntlet_common::BlockRecord;

use crate::config::SecurityConfig;

/// Outcome of one admission check
#[derive(Debug, Clone)]
pub struct SecurityDecision {
    pub allowed: bool,
    pub reasons: Vec<String>,
}

impl SecurityDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reasons: Vec::new(),
        }
    }

    fn deny(reason: String) -> Self {
        Self {
            allowed: false,
            reasons: vec![reason],
        }
    }
}

/// Aggregate counters for the operational surface
#[derive(Default)]
struct SecurityStats {
    total_requests: AtomicU64,
    blocked_requests: AtomicU64,
    rate_limited_requests: AtomicU64,
    bot_detections: AtomicU64,
    manual_blocks: AtomicU64,
}

pub struct SecurityService {
    rate_limiter: RateLimiter,
    ip_blocker: IpBlocker,
    bot_detector: BotDetector,
    adaptive_limiter: AdaptiveLimiter,

    ip_blocking_enabled: bool,
    bot_detection_enabled: bool,

    stats: SecurityStats,
    started_at: Instant,
}

impl SecurityService {
    pub fn new(redis: Option<ConnectionManager>, config: &SecurityConfig) -> Self {
        let adaptive_config = AdaptiveLimiterConfig {
            base_rpm_limit: config.rate_limit.requests_per_minute,
            ..AdaptiveLimiterConfig::default()
        };

        Self {
            rate_limiter: RateLimiter::new(redis.clone()),
            ip_blocker: IpBlocker::new(
                redis,
                config.ip_blocking.max_failed_attempts,
                Duration::from_secs(config.ip_blocking.block_duration_secs),
            ),
            bot_detector: BotDetector::new(&config.bot_detection.suspicious_patterns),
            adaptive_limiter: AdaptiveLimiter::new(adaptive_config),
            ip_blocking_enabled: config.ip_blocking.enabled,
            bot_detection_enabled: config.bot_detection.enabled,
            stats: SecurityStats::default(),
            started_at: Instant::now(),
        }
    }

    /// Run the full admission pipeline for one request.
    ///
    /// Order: blocker, adaptive rate limit, bot score, then error
    /// bookkeeping with a blocker re-check (a failure recorded here may
    /// have just crossed the block threshold).
    pub async fn check_request(
        &self,
        ip: &str,
        user_agent: &str,
        path: &str,
        response_time: Duration,
        is_error: bool,
    ) -> SecurityDecision {
        self.stats.total_requests.fetch_add(1, Ordering::Relaxed);

        // Rolling stats feed the trust model regardless of the verdict
        self.adaptive_limiter
            .observe(ip, user_agent, path, response_time, !is_error);

        // 1. Blocker
        if self.ip_blocking_enabled {
            let (blocked, record) = self.ip_blocker.is_blocked(ip).await;
            if blocked {
                self.stats.blocked_requests.fetch_add(1, Ordering::Relaxed);
                let reason = record
                    .map(|r| r.reason)
                    .unwrap_or_else(|| "unknown".to_string());
                return SecurityDecision::deny(format!("IP blocked: {reason}"));
            }
        }

        // 2. Rate limit against the adaptive per-source tier
        let limit = self.adaptive_limiter.adaptive_limit(ip);
        if !self
            .rate_limiter
            .allow(ip, limit, Duration::from_secs(60))
            .await
        {
            self.stats
                .rate_limited_requests
                .fetch_add(1, Ordering::Relaxed);
            return SecurityDecision::deny("Rate limit exceeded".to_string());
        }

        let mut decision = SecurityDecision::allow();

        // 3. Bot score
        if self.bot_detection_enabled {
            let bot_score = self
                .bot_detector
                .analyze(ip, user_agent, path, response_time, is_error);

            if bot_score.score > HIGH_BOT_SCORE {
                self.stats.bot_detections.fetch_add(1, Ordering::Relaxed);
                self.ip_blocker
                    .record_failure(ip, "Bot behavior detected")
                    .await;

                let mut reasons =
                    vec![format!("Bot detected (score: {:.2})", bot_score.score)];
                reasons.extend(bot_score.reasons);
                return SecurityDecision {
                    allowed: false,
                    reasons,
                };
            }

            if bot_score.score > MIN_BOT_SCORE {
                decision
                    .reasons
                    .push(format!("Suspicious behavior (score: {:.2})", bot_score.score));
                decision.reasons.extend(bot_score.reasons);
            }
        }

        // 4. Error bookkeeping; the new failure may cross the threshold
        if is_error && self.ip_blocking_enabled {
            self.ip_blocker.record_failure(ip, "Request error").await;

            let (blocked, record) = self.ip_blocker.is_blocked(ip).await;
            if blocked {
                self.stats.blocked_requests.fetch_add(1, Ordering::Relaxed);
                let reason = record
                    .map(|r| r.reason)
                    .unwrap_or_else(|| "unknown".to_string());
                return SecurityDecision::deny(format!("IP blocked: {reason}"));
            }
        }

        decision
    }

    /// Record a successful or failed challenge solve duration for the
    /// trust model
    pub fn record_solve_time(&self, ip: &str, solve_ms: i64) {
        self.adaptive_limiter.record_solve_time(ip, solve_ms);
    }

    pub async fn block_ip(&self, ip: &str, reason: &str, duration: Duration) {
        self.stats.manual_blocks.fetch_add(1, Ordering::Relaxed);
        self.ip_blocker.block_ip(ip, reason, duration).await;
    }

    pub async fn unblock_ip(&self, ip: &str) {
        self.ip_blocker.unblock_ip(ip).await;
    }

    pub fn blocked_ips(&self) -> Vec<BlockRecord> {
        self.ip_blocker.blocked_ips()
    }

    pub fn get_behavior(&self, ip: &str) -> Option<SourceBehavior> {
        self.adaptive_limiter.get_behavior(ip)
    }

    /// Maintenance pass over every sub-system; driven by the cleanup ticker
    pub fn cleanup(&self) {
        self.rate_limiter.cleanup();
        self.ip_blocker.cleanup();
        self.bot_detector.cleanup();
        self.adaptive_limiter.cleanup();
    }

    pub fn stats(&self) -> serde_json::Value {
        let uptime = self.started_at.elapsed().as_secs_f64();
        let total = self.stats.total_requests.load(Ordering::Relaxed);

        json!({
            "total_requests": total,
            "blocked_requests": self.stats.blocked_requests.load(Ordering::Relaxed),
            "rate_limited_requests": self.stats.rate_limited_requests.load(Ordering::Relaxed),
            "bot_detections": self.stats.bot_detections.load(Ordering::Relaxed),
            "manual_blocks": self.stats.manual_blocks.load(Ordering::Relaxed),
            "uptime_seconds": uptime,
            "request_rate": if uptime > 0.0 { total as f64 / uptime } else { 0.0 },
            "rate_limiter": self.rate_limiter.stats(),
            "ip_blocker": self.ip_blocker.stats(),
            "bot_detector": self.bot_detector.stats(),
            "adaptive_limiter": self.adaptive_limiter.stats(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BROWSER_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

    fn service() -> SecurityService {
        SecurityService::new(None, &SecurityConfig::default())
    }

    #[tokio::test]
    async fn test_clean_request_allowed() {
        let s = service();
        let decision = s
            .check_request("10.1.1.1", BROWSER_UA, "/shop", Duration::from_millis(250), false)
            .await;
        assert!(decision.allowed);
        assert!(decision.reasons.is_empty());
    }

    #[tokio::test]
    async fn test_blocked_ip_denied_with_reason() {
        let s = service();
        s.block_ip("10.1.1.2", "manual test", Duration::from_secs(60))
            .await;

        let decision = s
            .check_request("10.1.1.2", BROWSER_UA, "/", Duration::from_millis(200), false)
            .await;
        assert!(!decision.allowed);
        assert!(decision.reasons[0].contains("IP blocked"));
        assert!(decision.reasons[0].contains("manual test"));
    }

    #[tokio::test]
    async fn test_scripted_client_denied_and_failure_recorded() {
        let s = service();

        let mut last = SecurityDecision::allow();
        for _ in 0..6 {
            last = s
                .check_request(
                    "10.1.1.3",
                    "python-requests/2.28.0",
                    "/api/challenge",
                    Duration::from_millis(5),
                    false,
                )
                .await;
        }

        assert!(!last.allowed);
        assert!(
            last.reasons.iter().any(|r| r.contains("Bot detected")),
            "reasons: {:?}",
            last.reasons
        );
    }

    #[tokio::test]
    async fn test_request_errors_accumulate_into_block() {
        let s = service();
        let ip = "10.1.1.4";

        // Default threshold is 5 failures
        for _ in 0..5 {
            s.check_request(ip, BROWSER_UA, "/", Duration::from_millis(200), true)
                .await;
        }

        let decision = s
            .check_request(ip, BROWSER_UA, "/", Duration::from_millis(200), false)
            .await;
        assert!(!decision.allowed);
        assert!(decision.reasons[0].contains("IP blocked"));
    }

    #[tokio::test]
    async fn test_stats_shape() {
        let s = service();
        s.check_request("10.1.1.5", BROWSER_UA, "/", Duration::from_millis(100), false)
            .await;

        let stats = s.stats();
        assert_eq!(stats["total_requests"], 1);
        assert!(stats["rate_limiter"].is_object());
        assert!(stats["adaptive_limiter"].is_object());
    }
}
