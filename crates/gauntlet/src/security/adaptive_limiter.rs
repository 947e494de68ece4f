//! Trust-score-driven adaptive rate limits.
//!
//! Owns the per-source behavior model. Every request updates rolling
//! stats; once enough observations exist, five normalised sub-scores are
//! averaged into a signal and folded into the trust score by exponential
//! smoothing. The classification derived from trust picks the per-source
//! RPM tier the rate limiter enforces.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use gauntlet_common::constants::MAX_BEHAVIOR_TIMESTAMPS;
use gauntlet_common::SourceClass;

/// Solve-time history bound per source
const MAX_SOLVE_SAMPLES: usize = 100;

/// Per-source rolling behavior record.
///
/// Clones returned from `get_behavior` are defensive copies; mutating one
/// never touches the limiter's internal state.
#[derive(Debug, Clone, Serialize)]
pub struct SourceBehavior {
    pub ip: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub average_response_ms: f64,
    pub user_agents: HashMap<String, u32>,
    pub request_paths: HashMap<String, u32>,
    pub trust_score: f64,
    pub class: SourceClass,

    #[serde(skip)]
    request_times: VecDeque<Instant>,
    #[serde(skip)]
    solve_times_ms: VecDeque<i64>,
}

impl SourceBehavior {
    fn new(ip: &str) -> Self {
        let now = Utc::now();
        Self {
            ip: ip.to_string(),
            first_seen: now,
            last_seen: now,
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            average_response_ms: 0.0,
            user_agents: HashMap::new(),
            request_paths: HashMap::new(),
            trust_score: 0.5,
            class: SourceClass::Neutral,
            request_times: VecDeque::with_capacity(64),
            solve_times_ms: VecDeque::with_capacity(16),
        }
    }
}

/// Tuning knobs for the behavior model
#[derive(Debug, Clone)]
pub struct AdaptiveLimiterConfig {
    pub base_rpm_limit: u32,
    pub trusted_multiplier: f64,
    pub suspicious_divisor: f64,
    pub bot_rpm_limit: u32,
    pub min_requests_for_analysis: u64,
    pub trust_decay: f64,
    pub behavior_window: Duration,
    pub trusted_threshold: f64,
    pub suspicious_threshold: f64,
    pub bot_threshold: f64,
}

impl Default for AdaptiveLimiterConfig {
    fn default() -> Self {
        Self {
            base_rpm_limit: 60,
            trusted_multiplier: 2.0,
            suspicious_divisor: 4.0,
            bot_rpm_limit: 5,
            min_requests_for_analysis: 10,
            trust_decay: 0.95,
            behavior_window: Duration::from_secs(24 * 3600),
            trusted_threshold: 0.8,
            suspicious_threshold: 0.3,
            bot_threshold: 0.1,
        }
    }
}

pub struct AdaptiveLimiter {
    behaviors: DashMap<String, SourceBehavior>,
    config: AdaptiveLimiterConfig,
}

impl AdaptiveLimiter {
    pub fn new(config: AdaptiveLimiterConfig) -> Self {
        Self {
            behaviors: DashMap::new(),
            config,
        }
    }

    /// Fold one observed request into the source's behavior
    pub fn observe(
        &self,
        ip: &str,
        user_agent: &str,
        path: &str,
        response_time: Duration,
        is_success: bool,
    ) {
        let min_for_analysis = self.config.min_requests_for_analysis;
        let mut behavior = self
            .behaviors
            .entry(ip.to_string())
            .or_insert_with(|| SourceBehavior::new(ip));

        let now = Utc::now();
        behavior.last_seen = now;
        behavior.total_requests += 1;
        if is_success {
            behavior.successful_requests += 1;
        } else {
            behavior.failed_requests += 1;
        }

        let n = behavior.total_requests as f64;
        let sample_ms = response_time.as_secs_f64() * 1000.0;
        behavior.average_response_ms =
            (behavior.average_response_ms * (n - 1.0) + sample_ms) / n;

        *behavior
            .user_agents
            .entry(user_agent.to_string())
            .or_insert(0) += 1;
        *behavior.request_paths.entry(path.to_string()).or_insert(0) += 1;

        if behavior.request_times.len() >= MAX_BEHAVIOR_TIMESTAMPS {
            behavior.request_times.pop_front();
        }
        behavior.request_times.push_back(Instant::now());

        if behavior.total_requests >= min_for_analysis {
            self.analyze(&mut behavior);
        }
    }

    /// Record how long a source took to solve a challenge
    pub fn record_solve_time(&self, ip: &str, solve_ms: i64) {
        let mut behavior = self
            .behaviors
            .entry(ip.to_string())
            .or_insert_with(|| SourceBehavior::new(ip));
        if behavior.solve_times_ms.len() >= MAX_SOLVE_SAMPLES {
            behavior.solve_times_ms.pop_front();
        }
        behavior.solve_times_ms.push_back(solve_ms);
    }

    /// RPM tier for the source's current classification
    pub fn adaptive_limit(&self, ip: &str) -> u32 {
        let Some(behavior) = self.behaviors.get(ip) else {
            return self.config.base_rpm_limit;
        };

        match behavior.class {
            SourceClass::Regular => {
                (self.config.base_rpm_limit as f64 * self.config.trusted_multiplier) as u32
            }
            SourceClass::Neutral => self.config.base_rpm_limit,
            SourceClass::Suspicious => {
                (self.config.base_rpm_limit as f64 / self.config.suspicious_divisor) as u32
            }
            SourceClass::Bot => self.config.bot_rpm_limit,
        }
    }

    /// Defensive copy of the source's behavior record
    pub fn get_behavior(&self, ip: &str) -> Option<SourceBehavior> {
        self.behaviors.get(ip).map(|b| b.clone())
    }

    fn analyze(&self, behavior: &mut SourceBehavior) {
        let timing = score_timing(behavior);
        let ua = score_user_agents(behavior);
        let success = score_success_rate(behavior);
        let rate = score_request_rate(behavior);
        let solve = score_solve_time(behavior);

        let signal = (timing + ua + success + rate + solve) / 5.0;
        let decay = self.config.trust_decay;
        let old_trust = behavior.trust_score;
        behavior.trust_score = old_trust * decay + signal * (1.0 - decay);

        behavior.class = if behavior.trust_score >= self.config.trusted_threshold {
            SourceClass::Regular
        } else if behavior.trust_score <= self.config.bot_threshold {
            SourceClass::Bot
        } else if behavior.trust_score <= self.config.suspicious_threshold {
            SourceClass::Suspicious
        } else {
            SourceClass::Neutral
        };

        if behavior.trust_score < self.config.suspicious_threshold
            && old_trust >= self.config.suspicious_threshold
        {
            tracing::warn!(
                ip = %behavior.ip,
                trust = behavior.trust_score,
                total_requests = behavior.total_requests,
                "Source classified as suspicious"
            );
        }
    }

    /// Drop sources not seen within the behavior window
    pub fn cleanup(&self) {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.behavior_window)
                .unwrap_or_else(|_| chrono::Duration::hours(24));
        self.behaviors.retain(|_, b| b.last_seen > cutoff);
    }

    pub fn stats(&self) -> serde_json::Value {
        let mut regular = 0u64;
        let mut neutral = 0u64;
        let mut suspicious = 0u64;
        let mut bots = 0u64;
        for entry in self.behaviors.iter() {
            match entry.value().class {
                SourceClass::Regular => regular += 1,
                SourceClass::Neutral => neutral += 1,
                SourceClass::Suspicious => suspicious += 1,
                SourceClass::Bot => bots += 1,
            }
        }

        json!({
            "total_sources": self.behaviors.len(),
            "regular": regular,
            "neutral": neutral,
            "suspicious": suspicious,
            "bots": bots,
            "base_rpm_limit": self.config.base_rpm_limit,
        })
    }
}

/// Timing regularity: 1 − min(σ/μ, 1) over inter-arrivals, with a plateau
/// reward for human-like irregularity.
fn score_timing(behavior: &SourceBehavior) -> f64 {
    if behavior.request_times.len() < 5 {
        return 0.5;
    }

    let times: Vec<&Instant> = behavior.request_times.iter().collect();
    let intervals: Vec<f64> = times
        .windows(2)
        .map(|w| w[1].duration_since(*w[0]).as_secs_f64())
        .collect();

    let mean = intervals.iter().sum::<f64>() / intervals.len() as f64;
    if mean == 0.0 {
        return 0.0;
    }

    let variance = intervals
        .iter()
        .map(|x| (x - mean).powi(2))
        .sum::<f64>()
        / intervals.len() as f64;
    let std_dev = variance.sqrt();

    let regularity = 1.0 - (std_dev / mean).min(1.0);
    if regularity > 0.3 && regularity < 0.8 {
        0.8
    } else {
        regularity * 0.5
    }
}

/// One stable human UA is good; one bot UA or a churn of agents is not
fn score_user_agents(behavior: &SourceBehavior) -> f64 {
    let count = behavior.user_agents.len();

    if count == 1 {
        let only = behavior.user_agents.keys().next().map(String::as_str);
        if only.is_some_and(is_bot_user_agent) {
            return 0.1;
        }
        return 0.9;
    }

    if count > 5 {
        return 0.2;
    }

    0.7
}

fn score_success_rate(behavior: &SourceBehavior) -> f64 {
    if behavior.total_requests == 0 {
        return 0.5;
    }

    let rate = behavior.successful_requests as f64 / behavior.total_requests as f64;
    if rate > 0.95 {
        0.3 // suspiciously perfect
    } else if rate > 0.7 {
        0.9
    } else if rate > 0.3 {
        0.6
    } else {
        0.2
    }
}

/// RPS over the trailing five minutes, banded
fn score_request_rate(behavior: &SourceBehavior) -> f64 {
    if behavior.request_times.len() < 2 {
        return 0.5;
    }

    let window = Duration::from_secs(300);
    let now = Instant::now();
    let recent = behavior
        .request_times
        .iter()
        .filter(|t| now.duration_since(**t) < window)
        .count();

    let rps = recent as f64 / 300.0;
    if rps > 5.0 {
        0.1
    } else if rps > 2.0 {
        0.3
    } else if rps > 0.1 {
        0.8
    } else {
        0.6
    }
}

fn score_solve_time(behavior: &SourceBehavior) -> f64 {
    if behavior.solve_times_ms.is_empty() {
        return 0.5;
    }

    let total: i64 = behavior.solve_times_ms.iter().sum();
    let avg_ms = total / behavior.solve_times_ms.len() as i64;

    if avg_ms < 1000 {
        0.1
    } else if avg_ms < 3000 {
        0.4
    } else if avg_ms < 10_000 {
        0.9
    } else if avg_ms < 30_000 {
        0.7
    } else {
        0.3
    }
}

fn is_bot_user_agent(user_agent: &str) -> bool {
    const TOKENS: [&str; 9] = [
        "bot",
        "crawler",
        "spider",
        "scraper",
        "headless",
        "phantom",
        "selenium",
        "webdriver",
        "automated",
    ];
    let lowered = user_agent.to_lowercase();
    TOKENS.iter().any(|t| lowered.contains(t))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> AdaptiveLimiter {
        AdaptiveLimiter::new(AdaptiveLimiterConfig::default())
    }

    #[test]
    fn test_unknown_source_gets_base_limit() {
        let l = limiter();
        assert_eq!(l.adaptive_limit("10.0.0.9"), 60);
    }

    #[test]
    fn test_trust_starts_neutral() {
        let l = limiter();
        l.observe("a", "Mozilla/5.0", "/", Duration::from_millis(200), true);
        let b = l.get_behavior("a").unwrap();
        assert_eq!(b.trust_score, 0.5);
        assert_eq!(b.class, SourceClass::Neutral);
        assert_eq!(b.total_requests, 1);
        assert_eq!(b.successful_requests + b.failed_requests, b.total_requests);
    }

    #[test]
    fn test_defensive_copy() {
        let l = limiter();
        l.observe("b", "Mozilla/5.0", "/x", Duration::from_millis(100), true);

        let mut copy = l.get_behavior("b").unwrap();
        copy.trust_score = 0.0;
        copy.total_requests = 999;
        copy.user_agents.clear();

        let fresh = l.get_behavior("b").unwrap();
        assert_eq!(fresh.trust_score, 0.5);
        assert_eq!(fresh.total_requests, 1);
        assert_eq!(fresh.user_agents.len(), 1);
    }

    #[test]
    fn test_classification_tiers_map_to_limits() {
        let config = AdaptiveLimiterConfig::default();
        let l = AdaptiveLimiter::new(config);

        // Force classes directly through the internal map
        for (ip, class) in [
            ("reg", SourceClass::Regular),
            ("neu", SourceClass::Neutral),
            ("sus", SourceClass::Suspicious),
            ("bot", SourceClass::Bot),
        ] {
            let mut b = SourceBehavior::new(ip);
            b.class = class;
            l.behaviors.insert(ip.to_string(), b);
        }

        assert_eq!(l.adaptive_limit("reg"), 120);
        assert_eq!(l.adaptive_limit("neu"), 60);
        assert_eq!(l.adaptive_limit("sus"), 15);
        assert_eq!(l.adaptive_limit("bot"), 5);
    }

    #[test]
    fn test_trust_decays_smoothly() {
        let mut config = AdaptiveLimiterConfig::default();
        config.min_requests_for_analysis = 2;
        let l = AdaptiveLimiter::new(config);

        // A hammering bot-agent source: signal is low but the smoothing
        // keeps each step small
        for _ in 0..20 {
            l.observe("c", "curl-bot/1.0", "/", Duration::from_millis(1), true);
        }

        let b = l.get_behavior("c").unwrap();
        assert!(b.trust_score < 0.5, "trust should fall, got {}", b.trust_score);
        assert!(b.trust_score > 0.1, "decay keeps steps small, got {}", b.trust_score);
    }

    #[test]
    fn test_solve_time_bands() {
        let mut b = SourceBehavior::new("t");
        b.solve_times_ms.push_back(500);
        assert_eq!(score_solve_time(&b), 0.1);

        b.solve_times_ms.clear();
        b.solve_times_ms.push_back(5000);
        assert_eq!(score_solve_time(&b), 0.9);

        b.solve_times_ms.clear();
        b.solve_times_ms.push_back(45_000);
        assert_eq!(score_solve_time(&b), 0.3);
    }

    #[test]
    fn test_success_rate_bands() {
        let mut b = SourceBehavior::new("t");
        b.total_requests = 100;
        b.successful_requests = 100;
        assert_eq!(score_success_rate(&b), 0.3); // too perfect

        b.successful_requests = 80;
        assert_eq!(score_success_rate(&b), 0.9);

        b.successful_requests = 10;
        assert_eq!(score_success_rate(&b), 0.2);
    }

    #[test]
    fn test_cleanup_keeps_recent_sources() {
        let l = limiter();
        l.observe("fresh", "Mozilla/5.0", "/", Duration::from_millis(50), true);
        l.cleanup();
        assert!(l.get_behavior("fresh").is_some());
    }
}
