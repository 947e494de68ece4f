//! Multi-signal heuristic bot scoring.
//!
//! Each observed request updates a bounded per-IP pattern record, then five
//! sub-scores are summed: user agent, request frequency, response-time
//! shape, error rate, and path shape. Confidence grows with the number of
//! observations. User-agent verdicts are memoised for five minutes.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use moka::sync::Cache;
use regex::Regex;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use gauntlet_common::constants::{MAX_SCORER_SAMPLES, UA_CACHE_TTL_SECS};
use gauntlet_common::BotScore;

/// Built-in suspicious user-agent patterns, matched case-insensitively
const SUSPICIOUS_PATTERNS: [&str; 15] = [
    "headless",
    "phantom",
    "selenium",
    "webdriver",
    "automation",
    "bot",
    "crawler",
    "spider",
    "scraper",
    "curl",
    "wget",
    "python-requests",
    "go-http-client",
    "java/",
    "okhttp",
];

/// Self-reported bot tokens; each occurrence adds to the UA sub-score
const BOT_TOKENS: [&str; 12] = [
    "bot",
    "crawler",
    "spider",
    "scraper",
    "headless",
    "selenium",
    "phantom",
    "chrome-lighthouse",
    "googlebot",
    "bingbot",
    "slurp",
    "duckduckbot",
];

/// Paths whose mere presence in a request is a signal
const SENSITIVE_PATHS: [&str; 8] = [
    "/admin",
    "/wp-admin",
    "/phpmyadmin",
    "/.env",
    "/config",
    "/backup",
    "/test",
    "/debug",
];

/// Bounded per-IP request pattern
struct RequestPattern {
    request_count: u64,
    first_request: Instant,
    last_request: Instant,
    last_seen_wall: DateTime<Utc>,
    user_agents: HashMap<String, u32>,
    request_paths: HashMap<String, u32>,
    response_times: VecDeque<Duration>,
    arrivals: VecDeque<Instant>,
    error_count: u64,
}

impl RequestPattern {
    fn new(now: Instant) -> Self {
        Self {
            request_count: 0,
            first_request: now,
            last_request: now,
            last_seen_wall: Utc::now(),
            user_agents: HashMap::new(),
            request_paths: HashMap::new(),
            response_times: VecDeque::with_capacity(MAX_SCORER_SAMPLES),
            arrivals: VecDeque::with_capacity(MAX_SCORER_SAMPLES),
            error_count: 0,
        }
    }

    fn record(&mut self, user_agent: &str, path: &str, response_time: Duration, is_error: bool) {
        let now = Instant::now();
        self.last_request = now;
        self.last_seen_wall = Utc::now();
        self.request_count += 1;
        *self.user_agents.entry(user_agent.to_string()).or_insert(0) += 1;
        *self.request_paths.entry(path.to_string()).or_insert(0) += 1;
        if is_error {
            self.error_count += 1;
        }

        if self.response_times.len() >= MAX_SCORER_SAMPLES {
            self.response_times.pop_front();
        }
        self.response_times.push_back(response_time);

        if self.arrivals.len() >= MAX_SCORER_SAMPLES {
            self.arrivals.pop_front();
        }
        self.arrivals.push_back(now);
    }
}

#[derive(Clone)]
struct UaVerdict {
    score: f64,
    reasons: Vec<String>,
}

pub struct BotDetector {
    patterns: Vec<Regex>,
    ua_cache: Cache<String, UaVerdict>,
    requests: DashMap<String, RequestPattern>,
}

impl BotDetector {
    pub fn new(extra_patterns: &[String]) -> Self {
        let mut patterns = Vec::with_capacity(SUSPICIOUS_PATTERNS.len() + extra_patterns.len());
        for source in SUSPICIOUS_PATTERNS
            .iter()
            .copied()
            .chain(extra_patterns.iter().map(String::as_str))
        {
            match Regex::new(&format!("(?i){}", regex::escape(source))) {
                Ok(re) => patterns.push(re),
                Err(e) => tracing::warn!(pattern = %source, error = %e, "Skipping bad UA pattern"),
            }
        }

        Self {
            patterns,
            ua_cache: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(Duration::from_secs(UA_CACHE_TTL_SECS))
                .build(),
            requests: DashMap::new(),
        }
    }

    /// Observe one request and produce the updated verdict for its source
    pub fn analyze(
        &self,
        ip: &str,
        user_agent: &str,
        path: &str,
        response_time: Duration,
        is_error: bool,
    ) -> BotScore {
        let mut score = 0.0;
        let mut reasons = Vec::new();

        let ua = self.user_agent_verdict(user_agent);
        score += ua.score;
        reasons.extend(ua.reasons);

        let confidence;
        {
            let mut pattern = self
                .requests
                .entry(ip.to_string())
                .or_insert_with(|| RequestPattern::new(Instant::now()));
            pattern.record(user_agent, path, response_time, is_error);

            let (s, r) = analyze_frequency(&pattern);
            score += s;
            reasons.extend(r);

            let (s, r) = analyze_response_times(&pattern);
            score += s;
            reasons.extend(r);

            let (s, r) = analyze_errors(&pattern);
            score += s;
            reasons.extend(r);

            let (s, r) = analyze_paths(path, &pattern);
            score += s;
            reasons.extend(r);

            confidence = confidence_for(pattern.request_count);
        }

        BotScore {
            ip: ip.to_string(),
            score,
            confidence,
            reasons,
            timestamp: Utc::now(),
        }
    }

    /// UA sub-score, memoised per exact user agent for five minutes
    fn user_agent_verdict(&self, user_agent: &str) -> UaVerdict {
        if let Some(cached) = self.ua_cache.get(user_agent) {
            return cached;
        }

        let mut score = 0.0;
        let mut reasons = Vec::new();
        let lowered = user_agent.to_lowercase();

        for pattern in &self.patterns {
            if pattern.is_match(&lowered) {
                score += 0.3;
                reasons.push(format!("Suspicious user agent pattern: {}", pattern.as_str()));
            }
        }

        if user_agent.len() < 10 {
            score += 0.4;
            reasons.push("Very short user agent".to_string());
        }

        for token in BOT_TOKENS {
            if lowered.contains(token) {
                score += 0.2;
                reasons.push(format!("Bot user agent token: {token}"));
            }
        }

        let verdict = UaVerdict { score, reasons };
        self.ua_cache.insert(user_agent.to_string(), verdict.clone());
        verdict
    }

    /// Drop patterns idle for over an hour
    pub fn cleanup(&self) {
        let cutoff = Utc::now() - chrono::Duration::hours(1);
        self.requests
            .retain(|_, p| p.last_seen_wall > cutoff);
    }

    pub fn stats(&self) -> serde_json::Value {
        json!({
            "tracked_ips": self.requests.len(),
            "suspicious_patterns": self.patterns.len(),
            "ua_cache_entries": self.ua_cache.entry_count(),
        })
    }
}

fn analyze_frequency(pattern: &RequestPattern) -> (f64, Vec<String>) {
    let mut score = 0.0;
    let mut reasons = Vec::new();

    if pattern.request_count < 2 {
        return (score, reasons);
    }

    let elapsed = pattern
        .last_request
        .duration_since(pattern.first_request)
        .as_secs_f64()
        / 60.0;
    // Zero elapsed means everything landed inside one clock tick
    let rpm = if elapsed > 0.0 {
        pattern.request_count as f64 / elapsed
    } else {
        f64::INFINITY
    };
    if rpm > 60.0 {
        score += 0.4;
        reasons.push(format!("High request frequency: {rpm:.2} req/min"));
    } else if rpm > 30.0 {
        score += 0.2;
        reasons.push(format!("Elevated request frequency: {rpm:.2} req/min"));
    }

    // Burst: average of the last 10 inter-arrival gaps under 100ms
    if pattern.arrivals.len() > 10 {
        let recent: Vec<&Instant> = pattern.arrivals.iter().rev().take(11).collect();
        let total: Duration = recent
            .windows(2)
            .map(|w| w[0].duration_since(*w[1]))
            .sum();
        let avg = total / 10;
        if avg < Duration::from_millis(100) {
            score += 0.3;
            reasons.push("Burst request pattern detected".to_string());
        }
    }

    (score, reasons)
}

fn analyze_response_times(pattern: &RequestPattern) -> (f64, Vec<String>) {
    let mut score = 0.0;
    let mut reasons = Vec::new();

    if pattern.response_times.len() < 5 {
        return (score, reasons);
    }

    let total: Duration = pattern.response_times.iter().sum();
    let mean = total / pattern.response_times.len() as u32;

    if mean < Duration::from_millis(50) {
        score += 0.3;
        reasons.push("Unusually fast response times".to_string());
    }

    if pattern.response_times.len() >= 10 {
        let spread: Duration = pattern
            .response_times
            .iter()
            .map(|t| if *t > mean { *t - mean } else { mean - *t })
            .sum();
        let avg_deviation = spread / pattern.response_times.len() as u32;
        if avg_deviation < Duration::from_millis(10) {
            score += 0.2;
            reasons.push("Very consistent response times".to_string());
        }
    }

    (score, reasons)
}

fn analyze_errors(pattern: &RequestPattern) -> (f64, Vec<String>) {
    let mut score = 0.0;
    let mut reasons = Vec::new();

    if pattern.request_count == 0 {
        return (score, reasons);
    }

    let error_rate = pattern.error_count as f64 / pattern.request_count as f64;
    if error_rate > 0.5 {
        score += 0.4;
        reasons.push(format!("High error rate: {:.2}%", error_rate * 100.0));
    } else if error_rate > 0.2 {
        score += 0.2;
        reasons.push(format!("Elevated error rate: {:.2}%", error_rate * 100.0));
    }

    (score, reasons)
}

fn analyze_paths(path: &str, pattern: &RequestPattern) -> (f64, Vec<String>) {
    let mut score = 0.0;
    let mut reasons = Vec::new();

    for sensitive in SENSITIVE_PATHS {
        if path.contains(sensitive) {
            score += 0.3;
            reasons.push(format!("Suspicious path accessed: {sensitive}"));
        }
    }

    let total: u32 = pattern.request_paths.values().sum();
    if total > 0 {
        for (name, count) in &pattern.request_paths {
            if f64::from(*count) / f64::from(total) > 0.8 && total > 1 {
                score += 0.2;
                reasons.push(format!("Repetitive path access: {name}"));
                break;
            }
        }
    }

    (score, reasons)
}

fn confidence_for(observations: u64) -> f64 {
    if observations < 5 {
        0.3
    } else if observations < 20 {
        0.6
    } else {
        0.9
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> BotDetector {
        BotDetector::new(&[])
    }

    #[test]
    fn test_scripted_user_agent_scores_high() {
        let d = detector();
        let score = d.analyze(
            "1.1.1.1",
            "python-requests/2.28.0",
            "/",
            Duration::from_millis(30),
            false,
        );
        // Suspicious pattern match alone is 0.3
        assert!(score.score >= 0.3, "got {}", score.score);
        assert!(score
            .reasons
            .iter()
            .any(|r| r.contains("python-requests")));
    }

    #[test]
    fn test_browser_user_agent_scores_low() {
        let d = detector();
        let ua = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";
        let score = d.analyze("2.2.2.2", ua, "/shop", Duration::from_millis(250), false);
        assert!(score.score < 0.4, "got {}", score.score);
    }

    #[test]
    fn test_short_user_agent_penalized() {
        let d = detector();
        let score = d.analyze("3.3.3.3", "x", "/", Duration::from_millis(200), false);
        assert!(score.reasons.iter().any(|r| r.contains("short user agent")));
        assert!(score.score >= 0.4);
    }

    #[test]
    fn test_confidence_grows_with_observations() {
        let d = detector();
        let ua = "Mozilla/5.0 (X11; Linux x86_64)";

        let first = d.analyze("4.4.4.4", ua, "/", Duration::from_millis(100), false);
        assert_eq!(first.confidence, 0.3);

        for _ in 0..10 {
            d.analyze("4.4.4.4", ua, "/", Duration::from_millis(100), false);
        }
        let later = d.analyze("4.4.4.4", ua, "/", Duration::from_millis(100), false);
        assert_eq!(later.confidence, 0.6);

        for _ in 0..20 {
            d.analyze("4.4.4.4", ua, "/", Duration::from_millis(100), false);
        }
        let final_score = d.analyze("4.4.4.4", ua, "/", Duration::from_millis(100), false);
        assert_eq!(final_score.confidence, 0.9);
    }

    #[test]
    fn test_sensitive_path_flagged() {
        let d = detector();
        let ua = "Mozilla/5.0 (X11; Linux x86_64)";
        let score = d.analyze("5.5.5.5", ua, "/wp-admin/setup", Duration::from_millis(200), false);
        assert!(score.reasons.iter().any(|r| r.contains("/wp-admin")));
    }

    #[test]
    fn test_error_rate_signal() {
        let d = detector();
        let ua = "Mozilla/5.0 (X11; Linux x86_64)";
        for _ in 0..6 {
            d.analyze("6.6.6.6", ua, "/a", Duration::from_millis(200), true);
        }
        let score = d.analyze("6.6.6.6", ua, "/a", Duration::from_millis(200), true);
        assert!(score.reasons.iter().any(|r| r.contains("High error rate")));
    }

    #[test]
    fn test_fast_bot_crosses_high_threshold() {
        let d = detector();
        // A scripted client hammering with near-zero response times
        let mut last = BotScore {
            ip: String::new(),
            score: 0.0,
            confidence: 0.0,
            reasons: vec![],
            timestamp: Utc::now(),
        };
        for _ in 0..6 {
            last = d.analyze(
                "7.7.7.7",
                "python-requests/2.28.0",
                "/api/challenge",
                Duration::from_millis(5),
                false,
            );
        }
        assert!(
            last.score > gauntlet_common::constants::HIGH_BOT_SCORE,
            "score {} should exceed the deny threshold",
            last.score
        );
    }

    #[test]
    fn test_cleanup_keeps_fresh_patterns() {
        let d = detector();
        d.analyze("8.8.8.8", "curl/8.0", "/", Duration::from_millis(10), false);
        d.cleanup();
        assert_eq!(d.requests.len(), 1);
    }
}
