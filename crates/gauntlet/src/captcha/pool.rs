//! Pre-generated challenge pool.
//!
//! A lock-free ring buffer of ready-to-serve challenges so that admission
//! spikes do not pay generation cost on the hot path. A background worker
//! keeps the pool topped up; stale entries are discarded on pop so a
//! client never receives an artifact with most of its lifetime gone.

use crossbeam_queue::ArrayQueue;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use gauntlet_common::{ChallengeKind, Oracle};

use super::engine::{seeded_rng, CaptchaEngine};

/// How far a request's complexity may sit from the pool's configured
/// complexity and still be served from the pool.
const COMPLEXITY_BAND: i32 = 15;

/// Batch size for a single refill pass
const REFILL_BATCH: usize = 64;

/// A generated challenge waiting to be dispatched
pub struct PregenChallenge {
    pub kind: ChallengeKind,
    pub complexity: i32,
    pub artifact: String,
    pub oracle: Oracle,
    pub generated_at: Instant,
}

/// Pool counters
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub size: usize,
    pub capacity: usize,
    pub fill_percent: u8,
    pub served: u64,
    pub generated: u64,
    pub misses: u64,
    pub discarded_stale: u64,
}

pub struct ChallengePool {
    queue: ArrayQueue<PregenChallenge>,
    complexity: i32,
    capacity: usize,
    /// Entries older than this are dropped instead of served
    max_age: Duration,

    served: AtomicU64,
    generated: AtomicU64,
    misses: AtomicU64,
    discarded_stale: AtomicU64,
}

impl ChallengePool {
    pub fn new(capacity: usize, complexity: i32, challenge_timeout: Duration) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            complexity,
            capacity: capacity.max(1),
            max_age: challenge_timeout / 2,
            served: AtomicU64::new(0),
            generated: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            discarded_stale: AtomicU64::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn fill_percent(&self) -> u8 {
        ((self.queue.len() as f64 / self.capacity as f64) * 100.0) as u8
    }

    /// Pop a pre-generated challenge if the requested complexity falls in
    /// the pool's band. Stale entries are discarded until a fresh one (or
    /// nothing) is found.
    pub fn pop_for_complexity(&self, complexity: i32) -> Option<PregenChallenge> {
        if (complexity - self.complexity).abs() > COMPLEXITY_BAND {
            return None;
        }

        loop {
            match self.queue.pop() {
                Some(pregen) if pregen.generated_at.elapsed() > self.max_age => {
                    self.discarded_stale.fetch_add(1, Ordering::Relaxed);
                }
                Some(pregen) => {
                    self.served.fetch_add(1, Ordering::Relaxed);
                    return Some(pregen);
                }
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            }
        }
    }

    /// Generate and enqueue up to `count` challenges; stops early when full
    pub fn refill(&self, engine: &CaptchaEngine, count: usize) -> usize {
        let mut pushed = 0;

        for _ in 0..count {
            let mut rng = seeded_rng(self.complexity);
            let kind = engine.select_kind(self.complexity, &mut rng);
            let Ok((artifact, oracle)) = engine.generate_kind(kind, self.complexity, &mut rng)
            else {
                break;
            };

            let pregen = PregenChallenge {
                kind,
                complexity: self.complexity,
                artifact,
                oracle,
                generated_at: Instant::now(),
            };

            if self.queue.push(pregen).is_err() {
                break;
            }
            pushed += 1;
            self.generated.fetch_add(1, Ordering::Relaxed);
        }

        pushed
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            size: self.queue.len(),
            capacity: self.capacity,
            fill_percent: self.fill_percent(),
            served: self.served.load(Ordering::Relaxed),
            generated: self.generated.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            discarded_stale: self.discarded_stale.load(Ordering::Relaxed),
        }
    }
}

/// Background worker that maintains the pool level
pub async fn pool_worker(
    pool: Arc<ChallengePool>,
    engine: Arc<CaptchaEngine>,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    tracing::info!(capacity = pool.capacity, "Challenge pool worker started");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(1)) => {
                if pool.fill_percent() < 80 {
                    let free = pool.capacity - pool.len();
                    let pushed = pool.refill(&engine, free.min(REFILL_BATCH));
                    if pushed > 0 {
                        tracing::trace!(pushed = pushed, size = pool.len(), "Pool refilled");
                    }
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Challenge pool worker shutting down");
                break;
            }
        }
    }
}
