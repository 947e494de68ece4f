//! Attempt scoring, dispatched on the oracle tag.
//!
//! Scoring is pure: it reads the challenge and the attempt and produces
//! `(solved, confidence 0-100)`. Ill-typed attempts never panic; a failed
//! cast scores `(false, 0)`.

use serde_json::Value;

use gauntlet_common::{Challenge, GameVerifier, Oracle, SwipeStep};

/// Partial credit granted when the attempt has the wrong element count
const LENGTH_MISMATCH_CONFIDENCE: i32 = 20;

/// Attempts faster than this are physically impossible for a human
const MIN_HUMAN_REACTION_MS: i64 = 150;

pub struct ChallengeValidator;

impl ChallengeValidator {
    pub fn new() -> Self {
        Self
    }

    /// Score an attempt. Accepts either the bare solution value or an
    /// object wrapping it under `"solution"` (the artifact envelope).
    pub fn score(&self, challenge: &Challenge, answer: &Value) -> (bool, i32) {
        let answer = answer.get("solution").unwrap_or(answer);

        match &challenge.oracle {
            Oracle::OrderedIds(expected) => score_click(expected, answer),
            Oracle::PairMap(expected) => score_drag_drop(expected, answer),
            Oracle::SwipeSeq(expected) => score_swipe(expected, answer),
            Oracle::GameVerifier(verifier) => score_game(verifier, answer),
        }
    }
}

impl Default for ChallengeValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// Ordered match against the oracle sequence; confidence is the matched
/// prefix share.
fn score_click(expected: &[String], answer: &Value) -> (bool, i32) {
    let Some(attempt) = as_string_vec(answer) else {
        return (false, 0);
    };

    if attempt.len() != expected.len() {
        return (false, LENGTH_MISMATCH_CONFIDENCE);
    }

    let prefix = expected
        .iter()
        .zip(attempt.iter())
        .take_while(|(e, a)| e == a)
        .count();

    let confidence = (prefix * 100 / expected.len()) as i32;
    (prefix == expected.len(), confidence)
}

/// Set-equality of (object, target) pairs
fn score_drag_drop(
    expected: &std::collections::HashMap<String, String>,
    answer: &Value,
) -> (bool, i32) {
    let Some(attempt) = answer.as_object() else {
        return (false, 0);
    };

    if attempt.len() != expected.len() {
        return (false, LENGTH_MISMATCH_CONFIDENCE);
    }

    let correct = expected
        .iter()
        .filter(|(object_id, target_id)| {
            attempt
                .get(*object_id)
                .and_then(Value::as_str)
                .is_some_and(|actual| actual == *target_id)
        })
        .count();

    let confidence = (correct * 100 / expected.len()) as i32;
    (correct == expected.len(), confidence)
}

/// Element-wise direction match
fn score_swipe(expected: &[SwipeStep], answer: &Value) -> (bool, i32) {
    let Some(attempt) = answer.as_array() else {
        return (false, 0);
    };

    if attempt.len() != expected.len() {
        return (false, LENGTH_MISMATCH_CONFIDENCE);
    }

    let correct = expected
        .iter()
        .zip(attempt.iter())
        .filter(|(step, gesture)| {
            gesture
                .get("direction")
                .and_then(Value::as_str)
                .is_some_and(|d| d == step.direction.as_str())
        })
        .count();

    let confidence = (correct * 100 / expected.len()) as i32;
    (correct == expected.len(), confidence)
}

fn score_game(verifier: &GameVerifier, answer: &Value) -> (bool, i32) {
    match verifier {
        GameVerifier::SnakeScore { target_food } => score_snake(*target_food, answer),
        GameVerifier::MemorySequence { sequence } => score_memory(sequence, answer),
        GameVerifier::ReactionTime {
            target_ms,
            tolerance_ms,
        } => score_reaction(*target_ms, *tolerance_ms, answer),
    }
}

fn score_snake(target_food: u32, answer: &Value) -> (bool, i32) {
    let success = answer
        .get("success")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let Some(score) = answer.get("score").and_then(Value::as_u64) else {
        return (false, 0);
    };

    if success && score >= u64::from(target_food) {
        return (true, 100);
    }

    let partial = (80 * score / u64::from(target_food.max(1))).min(80) as i32;
    (false, partial)
}

fn score_memory(expected: &[u8], answer: &Value) -> (bool, i32) {
    let attempt = answer
        .get("sequence")
        .or_else(|| answer.get("detail"))
        .and_then(Value::as_array);
    let Some(attempt) = attempt else {
        return (false, 0);
    };

    if attempt.len() != expected.len() {
        return (false, LENGTH_MISMATCH_CONFIDENCE);
    }

    let correct = expected
        .iter()
        .zip(attempt.iter())
        .filter(|(e, a)| a.as_u64().is_some_and(|v| v == u64::from(**e)))
        .count();

    let confidence = (correct * 100 / expected.len()) as i32;
    (correct == expected.len(), confidence)
}

fn score_reaction(target_ms: i64, tolerance_ms: i64, answer: &Value) -> (bool, i32) {
    let actual = answer
        .get("elapsed_ms")
        .or_else(|| answer.get("score"))
        .and_then(Value::as_i64);
    let Some(actual) = actual else {
        return (false, 0);
    };

    if actual < MIN_HUMAN_REACTION_MS {
        return (false, 0);
    }

    let d = (actual - target_ms).abs();
    if d <= tolerance_ms {
        let confidence = (100 - 50 * d / tolerance_ms.max(1)).max(70) as i32;
        return (true, confidence);
    }

    if actual > 5000 {
        return (false, 10);
    }

    let confidence = (50 - 30 * d / 1000).max(0) as i32;
    (false, confidence)
}

fn as_string_vec(value: &Value) -> Option<Vec<String>> {
    value.as_array().map(|items| {
        items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use serde_json::json;
    use std::collections::HashMap;

    fn challenge_with(oracle: Oracle) -> Challenge {
        let now = Utc::now();
        Challenge {
            id: "test".into(),
            kind: gauntlet_common::ChallengeKind::Click,
            complexity: 50,
            artifact: String::new(),
            oracle,
            created_at: now,
            expires_at: now + Duration::seconds(300),
            solved: false,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn test_click_exact_match() {
        let v = ChallengeValidator::new();
        let c = challenge_with(Oracle::OrderedIds(vec!["t1".into(), "t2".into()]));

        assert_eq!(v.score(&c, &json!(["t1", "t2"])), (true, 100));
        assert_eq!(v.score(&c, &json!(["t2", "t1"])), (false, 0));
        assert_eq!(v.score(&c, &json!(["t1", "x"])), (false, 50));
    }

    #[test]
    fn test_click_length_mismatch() {
        let v = ChallengeValidator::new();
        let c = challenge_with(Oracle::OrderedIds(vec!["t1".into(), "t2".into()]));
        assert_eq!(v.score(&c, &json!(["t1"])), (false, 20));
        assert_eq!(v.score(&c, &json!(["t1", "t2", "t3"])), (false, 20));
    }

    #[test]
    fn test_click_ill_typed_attempt() {
        let v = ChallengeValidator::new();
        let c = challenge_with(Oracle::OrderedIds(vec!["t1".into()]));
        assert_eq!(v.score(&c, &json!({"bogus": true})), (false, 0));
        assert_eq!(v.score(&c, &json!(42)), (false, 0));
    }

    #[test]
    fn test_click_envelope_unwrapped() {
        let v = ChallengeValidator::new();
        let c = challenge_with(Oracle::OrderedIds(vec!["t1".into()]));
        assert_eq!(v.score(&c, &json!({"solution": ["t1"]})), (true, 100));
    }

    #[test]
    fn test_drag_drop_partial_credit() {
        let v = ChallengeValidator::new();
        let mut pairs = HashMap::new();
        pairs.insert("a".to_string(), "1".to_string());
        pairs.insert("b".to_string(), "2".to_string());
        pairs.insert("c".to_string(), "3".to_string());
        let c = challenge_with(Oracle::PairMap(pairs));

        // Two of three correct: integer division gives 66
        let attempt = json!({"a": "1", "b": "2", "c": "9"});
        assert_eq!(v.score(&c, &attempt), (false, 66));

        let full = json!({"a": "1", "b": "2", "c": "3"});
        assert_eq!(v.score(&c, &full), (true, 100));

        let short = json!({"a": "1"});
        assert_eq!(v.score(&c, &short), (false, 20));
    }

    #[test]
    fn test_swipe_direction_match() {
        use gauntlet_common::Direction;
        let v = ChallengeValidator::new();
        let c = challenge_with(Oracle::SwipeSeq(vec![
            SwipeStep {
                direction: Direction::Left,
                min_distance: 50,
            },
            SwipeStep {
                direction: Direction::Up,
                min_distance: 50,
            },
        ]));

        let good = json!([{"direction": "left"}, {"direction": "up"}]);
        assert_eq!(v.score(&c, &good), (true, 100));

        let half = json!([{"direction": "left"}, {"direction": "down"}]);
        assert_eq!(v.score(&c, &half), (false, 50));
    }

    #[test]
    fn test_snake_scoring() {
        let v = ChallengeValidator::new();
        let c = challenge_with(Oracle::GameVerifier(GameVerifier::SnakeScore {
            target_food: 5,
        }));

        assert_eq!(v.score(&c, &json!({"success": true, "score": 5})), (true, 100));
        assert_eq!(v.score(&c, &json!({"success": true, "score": 7})), (true, 100));
        // Died at 3 of 5: 80 * 3 / 5 = 48
        assert_eq!(v.score(&c, &json!({"success": false, "score": 3})), (false, 48));
        assert_eq!(v.score(&c, &json!({"success": true})), (false, 0));
    }

    #[test]
    fn test_memory_exact_equality() {
        let v = ChallengeValidator::new();
        let c = challenge_with(Oracle::GameVerifier(GameVerifier::MemorySequence {
            sequence: vec![3, 7, 11],
        }));

        assert_eq!(v.score(&c, &json!({"sequence": [3, 7, 11]})), (true, 100));
        assert_eq!(v.score(&c, &json!({"sequence": [3, 7, 12]})), (false, 66));
        assert_eq!(v.score(&c, &json!({"sequence": [3]})), (false, 20));
        // The game shell reports picks under "detail"
        assert_eq!(v.score(&c, &json!({"detail": [3, 7, 11]})), (true, 100));
    }

    #[test]
    fn test_reaction_tolerance_bands() {
        let v = ChallengeValidator::new();
        let c = challenge_with(Oracle::GameVerifier(GameVerifier::ReactionTime {
            target_ms: 2000,
            tolerance_ms: 300,
        }));

        // Within tolerance, confidence at least 70
        let (solved, confidence) = v.score(&c, &json!({"elapsed_ms": 1950}));
        assert!(solved);
        assert!(confidence >= 70);

        // Impossibly fast
        assert_eq!(v.score(&c, &json!({"elapsed_ms": 140})), (false, 0));

        // Far too slow
        assert_eq!(v.score(&c, &json!({"elapsed_ms": 6000})), (false, 10));

        // Near miss keeps some credit: d=400 -> 50 - 12 = 38
        assert_eq!(v.score(&c, &json!({"elapsed_ms": 2400})), (false, 38));
    }
}
