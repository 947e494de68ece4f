//! Failure-count-triggered IP blocking with manual override.
//!
//! When Redis is configured the canonical record lives there (hash per
//! blocked IP, counter per failing IP, both with TTLs) and the local maps
//! act as a best-effort cache. Expired records never deny and are dropped
//! lazily on read and during cleanup ticks.

use chrono::{Duration as ChronoDuration, DateTime, Utc};
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use gauntlet_common::constants::redis_keys::{BLOCKED_IP_PREFIX, FAILED_ATTEMPTS_PREFIX};
use gauntlet_common::constants::ATTEMPT_RETENTION_SECS;
use gauntlet_common::BlockRecord;

/// Failure counter for one IP
#[derive(Debug, Clone)]
struct AttemptInfo {
    count: u32,
    last_seen: DateTime<Utc>,
}

pub struct IpBlocker {
    redis: Option<ConnectionManager>,
    max_failed_attempts: u32,
    block_duration: Duration,

    blocks: DashMap<String, BlockRecord>,
    attempts: DashMap<String, AttemptInfo>,
    degraded: AtomicBool,
}

impl IpBlocker {
    pub fn new(
        redis: Option<ConnectionManager>,
        max_failed_attempts: u32,
        block_duration: Duration,
    ) -> Self {
        Self {
            redis,
            max_failed_attempts,
            block_duration,
            blocks: DashMap::new(),
            attempts: DashMap::new(),
            degraded: AtomicBool::new(false),
        }
    }

    /// Returns whether `ip` is currently blocked, with the live record
    pub async fn is_blocked(&self, ip: &str) -> (bool, Option<BlockRecord>) {
        if let Some(conn) = &self.redis {
            match self.check_redis_block(conn.clone(), ip).await {
                Ok(result) => return result,
                Err(e) => self.note_degraded(&e),
            }
        }

        let now = Utc::now();
        let expired = match self.blocks.get(ip) {
            Some(record) if !record.is_expired(now) => return (true, Some(record.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.blocks.remove(ip);
        }
        (false, None)
    }

    /// Record one failed attempt; crossing the threshold creates a block
    pub async fn record_failure(&self, ip: &str, reason: &str) {
        if let Some(conn) = &self.redis {
            match self.record_redis_failure(conn.clone(), ip, reason).await {
                Ok(()) => return,
                Err(e) => self.note_degraded(&e),
            }
        }

        let now = Utc::now();
        let count = {
            let mut info = self.attempts.entry(ip.to_string()).or_insert(AttemptInfo {
                count: 0,
                last_seen: now,
            });
            info.count += 1;
            info.last_seen = now;
            info.count
        };

        if count >= self.max_failed_attempts {
            self.insert_local_block(ip, reason, self.block_duration, count);
        }
    }

    /// Manually block an IP for the given duration
    pub async fn block_ip(&self, ip: &str, reason: &str, duration: Duration) {
        let record = self.insert_local_block(ip, reason, duration, 0);

        if let Some(conn) = &self.redis {
            if let Err(e) = self.write_redis_block(conn.clone(), &record).await {
                self.note_degraded(&e);
            }
        }

        tracing::warn!(ip = %ip, reason = %reason, "IP blocked");
    }

    /// Remove any block and failure history for an IP
    pub async fn unblock_ip(&self, ip: &str) {
        self.blocks.remove(ip);
        self.attempts.remove(ip);

        if let Some(conn) = &self.redis {
            let mut conn = conn.clone();
            let result: Result<(), redis::RedisError> = redis::pipe()
                .del(format!("{BLOCKED_IP_PREFIX}{ip}"))
                .del(format!("{FAILED_ATTEMPTS_PREFIX}{ip}"))
                .query_async(&mut conn)
                .await;
            if let Err(e) = result {
                self.note_degraded(&e);
            }
        }

        tracing::info!(ip = %ip, "IP unblocked");
    }

    /// Currently blocked IPs from the local view
    pub fn blocked_ips(&self) -> Vec<BlockRecord> {
        let now = Utc::now();
        self.blocks
            .iter()
            .filter(|entry| !entry.value().is_expired(now))
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Drop expired blocks and stale failure counters
    pub fn cleanup(&self) {
        let now = Utc::now();
        self.blocks.retain(|_, record| !record.is_expired(now));

        let retention = ChronoDuration::seconds(ATTEMPT_RETENTION_SECS as i64);
        self.attempts
            .retain(|_, info| now - info.last_seen < retention);
    }

    pub fn stats(&self) -> serde_json::Value {
        json!({
            "blocked_ips": self.blocks.len(),
            "failed_attempts": self.attempts.len(),
            "redis_available": self.redis.is_some(),
            "max_failed_attempts": self.max_failed_attempts,
        })
    }

    fn insert_local_block(
        &self,
        ip: &str,
        reason: &str,
        duration: Duration,
        attempts: u32,
    ) -> BlockRecord {
        let now = Utc::now();
        let record = BlockRecord {
            ip: ip.to_string(),
            reason: reason.to_string(),
            blocked_at: now,
            expires_at: now
                + ChronoDuration::from_std(duration)
                    .unwrap_or_else(|_| ChronoDuration::seconds(3600)),
            attempts,
        };
        self.blocks.insert(ip.to_string(), record.clone());
        record
    }

    async fn check_redis_block(
        &self,
        mut conn: ConnectionManager,
        ip: &str,
    ) -> Result<(bool, Option<BlockRecord>), redis::RedisError> {
        use redis::AsyncCommands;

        let key = format!("{BLOCKED_IP_PREFIX}{ip}");
        let data: std::collections::HashMap<String, String> = conn.hgetall(&key).await?;

        if data.is_empty() {
            return Ok((false, None));
        }

        let blocked_at = data
            .get("blocked_at")
            .and_then(|v| v.parse::<i64>().ok())
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
            .unwrap_or_else(Utc::now);
        let expires_at = data
            .get("expires_at")
            .and_then(|v| v.parse::<i64>().ok())
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
            .unwrap_or_else(Utc::now);

        let record = BlockRecord {
            ip: ip.to_string(),
            reason: data.get("reason").cloned().unwrap_or_default(),
            blocked_at,
            expires_at,
            attempts: data
                .get("attempts")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
        };

        if record.is_expired(Utc::now()) {
            let _: () = conn.del(&key).await?;
            return Ok((false, None));
        }

        // Refresh the local cache so a Redis outage keeps denying
        self.blocks.insert(ip.to_string(), record.clone());

        Ok((true, Some(record)))
    }

    async fn record_redis_failure(
        &self,
        mut conn: ConnectionManager,
        ip: &str,
        reason: &str,
    ) -> Result<(), redis::RedisError> {
        use redis::AsyncCommands;

        let key = format!("{FAILED_ATTEMPTS_PREFIX}{ip}");
        let count: u32 = conn.incr(&key, 1).await?;
        let _: () = conn.expire(&key, ATTEMPT_RETENTION_SECS as i64).await?;

        if count >= self.max_failed_attempts {
            let record = self.insert_local_block(ip, reason, self.block_duration, count);
            self.write_redis_block(conn.clone(), &record).await?;
        }

        Ok(())
    }

    async fn write_redis_block(
        &self,
        mut conn: ConnectionManager,
        record: &BlockRecord,
    ) -> Result<(), redis::RedisError> {
        let key = format!("{BLOCKED_IP_PREFIX}{}", record.ip);
        let ttl = (record.expires_at - record.blocked_at).num_seconds().max(1);

        let _: () = redis::pipe()
            .atomic()
            .hset(&key, "reason", &record.reason)
            .hset(&key, "blocked_at", record.blocked_at.timestamp())
            .hset(&key, "expires_at", record.expires_at.timestamp())
            .hset(&key, "attempts", record.attempts)
            .expire(&key, ttl)
            .query_async(&mut conn)
            .await?;

        Ok(())
    }

    fn note_degraded(&self, error: &redis::RedisError) {
        if !self.degraded.swap(true, Ordering::Relaxed) {
            tracing::warn!(error = %error, "IP blocker falling back to local state");
        }
    }
}
