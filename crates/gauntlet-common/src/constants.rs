//! Shared constants for Gauntlet components.

/// Default Redis connection URL
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Default port discovery range (inclusive)
pub const DEFAULT_MIN_PORT: u16 = 50_000;
pub const DEFAULT_MAX_PORT: u16 = 50_100;

/// Challenge lifetime (5 minutes)
pub const DEFAULT_CHALLENGE_TIMEOUT_SECS: u64 = 300;

/// Upper bound on concurrently active challenges
pub const DEFAULT_MAX_ACTIVE_CHALLENGES: usize = 10_000;

/// Periodic maintenance tick
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 60;

/// Failed attempts before an automatic IP block
pub const DEFAULT_MAX_FAILED_ATTEMPTS: u32 = 5;

/// Automatic block duration (1 hour)
pub const DEFAULT_BLOCK_DURATION_SECS: u64 = 3600;

/// Base per-source rate limit
pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 60;

/// Bounded history sizes
pub const MAX_BEHAVIOR_TIMESTAMPS: usize = 1000;
pub const MAX_SCORER_SAMPLES: usize = 100;

/// Per-session outbound queue capacity
pub const SESSION_QUEUE_CAPACITY: usize = 100;

/// Sessions idle longer than this are collected (1 hour)
pub const SESSION_IDLE_SECS: u64 = 3600;

/// Failure counters older than this are collected (1 hour)
pub const ATTEMPT_RETENTION_SECS: u64 = 3600;

/// User-agent verdict cache lifetime (5 minutes)
pub const UA_CACHE_TTL_SECS: u64 = 300;

/// Directed session sends time out after this many seconds
pub const SESSION_SEND_TIMEOUT_SECS: u64 = 5;

/// Admission thresholds for the bot score
pub const HIGH_BOT_SCORE: f64 = 0.7;
pub const MIN_BOT_SCORE: f64 = 0.4;

/// Redis key prefixes
pub mod redis_keys {
    /// Sliding-window rate limit: ratelimit:{key}
    pub const RATELIMIT_PREFIX: &str = "ratelimit:";

    /// Block record: blocked_ip:{ip}
    pub const BLOCKED_IP_PREFIX: &str = "blocked_ip:";

    /// Failure counter: failed_attempts:{ip}
    pub const FAILED_ATTEMPTS_PREFIX: &str = "failed_attempts:";
}
