//! Core types shared across Gauntlet components.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Challenge family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeKind {
    Click,
    DragDrop,
    Swipe,
    Game,
}

impl ChallengeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Click => "click",
            Self::DragDrop => "drag_drop",
            Self::Swipe => "swipe",
            Self::Game => "game",
        }
    }
}

impl std::fmt::Display for ChallengeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Swipe direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Left,
    Right,
    Up,
    Down,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::Left,
        Direction::Right,
        Direction::Up,
        Direction::Down,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
            Self::Up => "up",
            Self::Down => "down",
        }
    }
}

/// One expected swipe gesture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwipeStep {
    pub direction: Direction,
    /// Minimum travel in pixels for the gesture to register
    pub min_distance: u32,
}

/// Verifier descriptor for the game family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GameVerifier {
    /// Snake run: collect at least `target_food` items
    SnakeScore { target_food: u32 },
    /// Memory: repeat the highlighted cell sequence exactly
    MemorySequence { sequence: Vec<u8> },
    /// Reaction: click within `tolerance_ms` of `target_ms`
    ReactionTime { target_ms: i64, tolerance_ms: i64 },
}

/// Server-private expected answer. Never serialized toward clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "oracle", rename_all = "snake_case")]
pub enum Oracle {
    /// Ordered sequence of target ids (click family)
    OrderedIds(Vec<String>),
    /// object-id -> target-id mapping (drag-drop family)
    PairMap(HashMap<String, String>),
    /// Ordered swipe gestures
    SwipeSeq(Vec<SwipeStep>),
    /// Game verifier descriptor
    GameVerifier(GameVerifier),
}

/// A single interactive challenge with its private oracle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Challenge {
    /// Unique opaque identifier
    pub id: String,

    /// Challenge family
    pub kind: ChallengeKind,

    /// Difficulty, 0-100
    pub complexity: i32,

    /// Self-contained interactive payload handed to the client
    #[serde(skip_serializing)]
    pub artifact: String,

    /// Expected answer (server-side only, never sent to clients)
    #[serde(skip_serializing)]
    pub oracle: Oracle,

    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,

    /// Terminal once set
    pub solved: bool,

    pub metadata: HashMap<String, String>,
}

impl Challenge {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Active means unsolved and not yet expired
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.solved && self.expires_at > now
    }
}

/// Verdict for a single validation attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeResult {
    pub challenge_id: String,
    pub solved: bool,
    pub confidence_percent: i32,
    #[serde(default)]
    pub time_to_solve_ms: i64,
    #[serde(default)]
    pub attempts: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Inbound event kinds on the session stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    FrontendEvent,
    ConnectionClosed,
    BalancerEvent,
}

/// An event received from a client session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default)]
    pub challenge_id: String,
    /// Raw JSON payload; shape depends on `kind`
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

/// Outbound event kinds pushed to client sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerEventKind {
    ChallengeResult,
    RunClientJs,
    SendClientData,
}

/// An event pushed from the server to a client session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerEvent {
    #[serde(rename = "type")]
    pub kind: ServerEventKind,
    pub challenge_id: String,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub js_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_percent: Option<i32>,
    pub timestamp: DateTime<Utc>,
}

impl ServerEvent {
    pub fn new(kind: ServerEventKind, challenge_id: impl Into<String>) -> Self {
        Self {
            kind,
            challenge_id: challenge_id.into(),
            data: serde_json::Value::Null,
            js_code: None,
            confidence_percent: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_confidence(mut self, percent: i32) -> Self {
        self.confidence_percent = Some(percent);
        self
    }
}

/// Source classification from the trust-score model
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceClass {
    Regular,
    #[default]
    Neutral,
    Suspicious,
    Bot,
}

impl SourceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Regular => "regular",
            Self::Neutral => "neutral",
            Self::Suspicious => "suspicious",
            Self::Bot => "bot",
        }
    }
}

/// Record of an active IP block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockRecord {
    pub ip: String,
    pub reason: String,
    pub blocked_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub attempts: u32,
}

impl BlockRecord {
    /// An expired record is garbage and must not deny
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Heuristic bot verdict for a single source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotScore {
    pub ip: String,
    /// Accumulated sub-scores, 0.0 and up
    pub score: f64,
    /// One of 0.3 / 0.6 / 0.9 depending on observation count
    pub confidence: f64,
    pub reasons: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// Generate an opaque URL-safe identifier (16 random bytes)
pub fn opaque_id() -> String {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use rand::Rng;

    let mut bytes = [0u8; 16];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_challenge_active_window() {
        let now = Utc::now();
        let c = Challenge {
            id: opaque_id(),
            kind: ChallengeKind::Click,
            complexity: 10,
            artifact: String::new(),
            oracle: Oracle::OrderedIds(vec!["t1".into()]),
            created_at: now,
            expires_at: now + Duration::seconds(300),
            solved: false,
            metadata: HashMap::new(),
        };

        assert!(c.expires_at > c.created_at);
        assert!(c.is_active(now));
        assert!(!c.is_expired(now));
        assert!(c.is_expired(now + Duration::seconds(300)));
        assert!(!c.is_active(now + Duration::seconds(301)));
    }

    #[test]
    fn test_oracle_not_serialized_on_challenge() {
        let now = Utc::now();
        let c = Challenge {
            id: "abc".into(),
            kind: ChallengeKind::Swipe,
            complexity: 50,
            artifact: "<html/>".into(),
            oracle: Oracle::SwipeSeq(vec![SwipeStep {
                direction: Direction::Left,
                min_distance: 50,
            }]),
            created_at: now,
            expires_at: now + Duration::seconds(60),
            solved: false,
            metadata: HashMap::new(),
        };

        let json = serde_json::to_string(&c).unwrap();
        assert!(!json.contains("oracle"));
        assert!(!json.contains("artifact"));
    }

    #[test]
    fn test_opaque_ids_unique() {
        let a = opaque_id();
        let b = opaque_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 22); // 16 bytes, unpadded base64
    }
}
