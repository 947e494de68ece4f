//! Challenge engine: family selection and generation dispatch.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use gauntlet_common::{ChallengeKind, GauntletError, Oracle};

use super::click::ClickGenerator;
use super::drag_drop::DragDropGenerator;
use super::game::GameGenerator;
use super::swipe::SwipeGenerator;
use crate::config::CaptchaConfig;

/// Process-wide counter folded into every generation seed so that
/// concurrent generations within the same nanosecond stay distinct.
static SEED_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Build a local RNG for one generation. Seeded from wall clock, pid,
/// complexity, and the counter; generators never share a global RNG.
pub(crate) fn seeded_rng(complexity: i32) -> StdRng {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    let counter = SEED_COUNTER.fetch_add(1, Ordering::Relaxed);

    let seed = nanos
        .wrapping_mul(0x9e37_79b9_7f4a_7c15)
        .wrapping_add(u64::from(std::process::id()).wrapping_mul(23))
        .wrapping_add((complexity as u64).wrapping_mul(7919))
        .wrapping_add(counter);

    StdRng::seed_from_u64(seed)
}

/// Engine performance counters
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub total_generations: u64,
    pub total_time_ms: u64,
    pub average_time_us: u64,
}

/// Owns the per-family generators and selects among them
pub struct CaptchaEngine {
    click: ClickGenerator,
    drag_drop: DragDropGenerator,
    swipe: SwipeGenerator,
    game: GameGenerator,

    generation_count: AtomicU64,
    generation_time_us: AtomicU64,
}

impl CaptchaEngine {
    pub fn new(config: &CaptchaConfig) -> Self {
        Self {
            click: ClickGenerator::new(&config.click),
            drag_drop: DragDropGenerator::new(&config.drag_drop),
            swipe: SwipeGenerator::new(&config.swipe),
            game: GameGenerator::new(config.drag_drop.canvas_width, config.drag_drop.canvas_height),
            generation_count: AtomicU64::new(0),
            generation_time_us: AtomicU64::new(0),
        }
    }

    /// Select a family and generate a `(kind, artifact, oracle)` triple
    pub fn generate(&self, complexity: i32) -> Result<(ChallengeKind, String, Oracle), GauntletError> {
        let mut rng = seeded_rng(complexity);
        let kind = self.select_kind(complexity, &mut rng);
        let (artifact, oracle) = self.generate_kind(kind, complexity, &mut rng)?;
        Ok((kind, artifact, oracle))
    }

    /// Generate a specific family (used by the pre-generation pool)
    pub fn generate_kind(
        &self,
        kind: ChallengeKind,
        complexity: i32,
        rng: &mut StdRng,
    ) -> Result<(String, Oracle), GauntletError> {
        let start = Instant::now();

        let result = match kind {
            ChallengeKind::Click => self.click.generate(complexity, rng),
            ChallengeKind::DragDrop => self.drag_drop.generate(complexity, rng),
            ChallengeKind::Swipe => self.swipe.generate(complexity, rng),
            ChallengeKind::Game => self.game.generate(complexity, rng),
        };

        self.generation_count.fetch_add(1, Ordering::Relaxed);
        self.generation_time_us
            .fetch_add(start.elapsed().as_micros() as u64, Ordering::Relaxed);

        Ok(result)
    }

    /// Weighted family selection. Game never appears below complexity 30;
    /// the mid band is balanced; the high band leans away from click.
    pub fn select_kind(&self, complexity: i32, rng: &mut StdRng) -> ChallengeKind {
        let weights: [(ChallengeKind, u32); 4] = if complexity < 30 {
            [
                (ChallengeKind::Click, 40),
                (ChallengeKind::DragDrop, 30),
                (ChallengeKind::Swipe, 30),
                (ChallengeKind::Game, 0),
            ]
        } else if complexity < 60 {
            [
                (ChallengeKind::Click, 25),
                (ChallengeKind::DragDrop, 25),
                (ChallengeKind::Swipe, 25),
                (ChallengeKind::Game, 25),
            ]
        } else {
            [
                (ChallengeKind::Click, 10),
                (ChallengeKind::DragDrop, 30),
                (ChallengeKind::Swipe, 30),
                (ChallengeKind::Game, 30),
            ]
        };

        let total: u32 = weights.iter().map(|(_, w)| w).sum();
        let mut roll = rng.random_range(0..total);
        for (kind, weight) in weights {
            if roll < weight {
                return kind;
            }
            roll -= weight;
        }

        ChallengeKind::Click
    }

    pub fn stats(&self) -> EngineStats {
        let count = self.generation_count.load(Ordering::Relaxed);
        let time_us = self.generation_time_us.load(Ordering::Relaxed);
        EngineStats {
            total_generations: count,
            total_time_ms: time_us / 1000,
            average_time_us: if count > 0 { time_us / count } else { 0 },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> CaptchaEngine {
        CaptchaEngine::new(&CaptchaConfig::default())
    }

    #[test]
    fn test_low_complexity_never_selects_game() {
        let e = engine();
        let mut rng = seeded_rng(10);
        for _ in 0..500 {
            let kind = e.select_kind(10, &mut rng);
            assert_ne!(kind, ChallengeKind::Game, "game must not appear below 30");
        }
    }

    #[test]
    fn test_mid_complexity_reaches_all_families() {
        let e = engine();
        let mut rng = seeded_rng(45);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..500 {
            seen.insert(e.select_kind(45, &mut rng));
        }
        assert_eq!(seen.len(), 4, "all four families should appear at mid band");
    }

    #[test]
    fn test_generate_counts_stats() {
        let e = engine();
        e.generate(50).unwrap();
        e.generate(50).unwrap();
        let stats = e.stats();
        assert_eq!(stats.total_generations, 2);
    }

    #[test]
    fn test_seeded_rngs_do_not_collide() {
        // Same complexity, back to back: counter must differentiate seeds
        let mut a = seeded_rng(50);
        let mut b = seeded_rng(50);
        let xs: Vec<u32> = (0..8).map(|_| a.random()).collect();
        let ys: Vec<u32> = (0..8).map(|_| b.random()).collect();
        assert_ne!(xs, ys);
    }
}
