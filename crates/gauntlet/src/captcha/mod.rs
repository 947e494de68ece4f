//! Challenge generation, lifecycle, and scoring.
//!
//! `ChallengeService` is the single entry point the transport talks to:
//! it gates admission against the active-challenge cap, pulls artifacts
//! from the pre-generation pool (or generates on demand), and scores
//! attempts through the validator.

mod click;
mod drag_drop;
mod engine;
mod game;
mod pool;
mod swipe;
mod validator;

pub use engine::{CaptchaEngine, EngineStats};
pub use pool::{pool_worker, ChallengePool, PoolStats};
pub use validator::ChallengeValidator;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use gauntlet_common::{
    opaque_id, Challenge, ChallengeResult, Event, EventKind, GauntletError, ServerEvent,
    ServerEventKind,
};

use crate::store::ChallengeStore;

/// Element count schedule shared by all generator families
pub(crate) fn element_count(complexity: i32, base: usize, max: usize) -> usize {
    if complexity < 30 {
        base
    } else if complexity < 60 {
        base + 1
    } else if complexity < 80 {
        base + 2
    } else {
        max
    }
}

/// Challenge lifecycle policy
#[derive(Debug, Clone)]
pub struct ChallengePolicy {
    pub max_active: usize,
    pub challenge_timeout: Duration,
}

/// Challenge lifecycle and scoring service
pub struct ChallengeService {
    store: Arc<ChallengeStore>,
    engine: Arc<CaptchaEngine>,
    pool: Option<Arc<ChallengePool>>,
    validator: ChallengeValidator,
    policy: ChallengePolicy,
}

impl ChallengeService {
    pub fn new(
        store: Arc<ChallengeStore>,
        engine: Arc<CaptchaEngine>,
        pool: Option<Arc<ChallengePool>>,
        policy: ChallengePolicy,
    ) -> Self {
        Self {
            store,
            engine,
            pool,
            validator: ChallengeValidator::new(),
            policy,
        }
    }

    pub fn store(&self) -> &Arc<ChallengeStore> {
        &self.store
    }

    pub fn engine(&self) -> &Arc<CaptchaEngine> {
        &self.engine
    }

    pub fn pool(&self) -> Option<&Arc<ChallengePool>> {
        self.pool.as_ref()
    }

    /// Create a new challenge for the given complexity.
    ///
    /// Fails with `Invalid` for out-of-range complexity and `Exhausted`
    /// when the active-challenge cap is reached.
    pub async fn create_challenge(&self, complexity: i32) -> Result<Challenge, GauntletError> {
        if !(0..=100).contains(&complexity) {
            return Err(GauntletError::Invalid(format!(
                "complexity must be in [0, 100], got {complexity}"
            )));
        }

        let active = self.store.active_count().await;
        if active >= self.policy.max_active {
            return Err(GauntletError::Exhausted(format!(
                "maximum active challenges reached: {}",
                self.policy.max_active
            )));
        }

        // Pool hit avoids generation on the hot path; complexity must match
        // closely enough, so the pool only serves its configured band.
        let (kind, artifact, oracle) = match self
            .pool
            .as_ref()
            .and_then(|p| p.pop_for_complexity(complexity))
        {
            Some(pregen) => (pregen.kind, pregen.artifact, pregen.oracle),
            None => self.engine.generate(complexity)?,
        };

        let now = Utc::now();
        let ttl = ChronoDuration::from_std(self.policy.challenge_timeout)
            .map_err(|e| GauntletError::Fatal(format!("challenge timeout out of range: {e}")))?;

        let challenge = Challenge {
            id: opaque_id(),
            kind,
            complexity,
            artifact,
            oracle,
            created_at: now,
            expires_at: now + ttl,
            solved: false,
            metadata: HashMap::new(),
        };

        self.store.create(challenge.clone()).await;

        tracing::debug!(
            challenge_id = %challenge.id,
            kind = %challenge.kind,
            complexity = complexity,
            "Challenge created"
        );

        Ok(challenge)
    }

    /// Score an attempt against a stored challenge.
    ///
    /// Expired challenges yield `(false, 0, "expired")`; already-solved
    /// challenges yield `(true, 100)` idempotently.
    pub async fn validate(
        &self,
        challenge_id: &str,
        answer: &serde_json::Value,
    ) -> Result<ChallengeResult, GauntletError> {
        let challenge = self.store.get(challenge_id).await?;
        let now = Utc::now();

        if challenge.is_expired(now) {
            return Ok(ChallengeResult {
                challenge_id: challenge_id.to_string(),
                solved: false,
                confidence_percent: 0,
                time_to_solve_ms: 0,
                attempts: 1,
                error: Some("expired".to_string()),
            });
        }

        if challenge.solved {
            return Ok(ChallengeResult {
                challenge_id: challenge_id.to_string(),
                solved: true,
                confidence_percent: 100,
                time_to_solve_ms: 0,
                attempts: 0,
                error: None,
            });
        }

        let (solved, confidence) = self.validator.score(&challenge, answer);

        if solved {
            let mut updated = challenge.clone();
            updated.solved = true;
            self.store.update(updated).await?;
        }

        let elapsed_ms = (now - challenge.created_at).num_milliseconds();

        tracing::debug!(
            challenge_id = %challenge_id,
            solved = solved,
            confidence = confidence,
            "Challenge validated"
        );

        Ok(ChallengeResult {
            challenge_id: challenge_id.to_string(),
            solved,
            confidence_percent: confidence,
            time_to_solve_ms: elapsed_ms,
            attempts: 1,
            error: None,
        })
    }

    /// Dispatch an inbound session event to its handler
    pub async fn process_event(&self, event: &Event) -> Result<ServerEvent, GauntletError> {
        match event.kind {
            EventKind::FrontendEvent => self.process_frontend_event(event).await,
            EventKind::ConnectionClosed => self.process_connection_closed(event).await,
            EventKind::BalancerEvent => self.process_balancer_event(event),
        }
    }

    async fn process_frontend_event(&self, event: &Event) -> Result<ServerEvent, GauntletError> {
        let payload_type = event
            .data
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or_default();

        match payload_type {
            "challenge_attempt" => {
                let answer = event
                    .data
                    .get("answer")
                    .ok_or_else(|| GauntletError::Invalid("missing answer".to_string()))?;

                let result = self.validate(&event.challenge_id, answer).await?;
                let confidence = result.confidence_percent;

                Ok(
                    ServerEvent::new(ServerEventKind::ChallengeResult, &event.challenge_id)
                        .with_data(serde_json::to_value(&result).unwrap_or_default())
                        .with_confidence(confidence),
                )
            }
            "mouse_move" | "click" | "keypress" => {
                // Interaction telemetry; the transport feeds its timing
                // signals into the security pipeline separately.
                Ok(
                    ServerEvent::new(ServerEventKind::SendClientData, &event.challenge_id)
                        .with_data(json!({"type": "interaction_tracked", "status": "ok"})),
                )
            }
            _ => Ok(
                ServerEvent::new(ServerEventKind::SendClientData, &event.challenge_id)
                    .with_data(json!({"type": "event_acknowledged", "status": "ok"})),
            ),
        }
    }

    async fn process_connection_closed(
        &self,
        event: &Event,
    ) -> Result<ServerEvent, GauntletError> {
        Ok(
            ServerEvent::new(ServerEventKind::ChallengeResult, &event.challenge_id).with_data(
                json!({
                    "type": "connection_closed",
                    "challenge": event.challenge_id,
                    "reason": "client_disconnected",
                    "timestamp": Utc::now().timestamp(),
                }),
            ),
        )
    }

    fn process_balancer_event(&self, event: &Event) -> Result<ServerEvent, GauntletError> {
        let payload_type = event
            .data
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or_default();

        let data = match payload_type {
            "health_check" => json!({
                "type": "health_response",
                "status": "healthy",
                "timestamp": Utc::now().timestamp(),
            }),
            "shutdown_notice" => json!({
                "type": "shutdown_ack",
                "timestamp": Utc::now().timestamp(),
            }),
            _ => json!({"type": "balancer_event_ack", "status": "processed"}),
        };

        Ok(ServerEvent::new(ServerEventKind::SendClientData, &event.challenge_id).with_data(data))
    }

    /// Drop expired challenges; driven by the periodic cleanup ticker
    pub async fn cleanup_expired(&self) -> usize {
        self.store.cleanup_expired().await
    }

    pub async fn active_count(&self) -> usize {
        self.store.active_count().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CaptchaConfig;

    fn make_service(max_active: usize) -> ChallengeService {
        let cfg = CaptchaConfig::default();
        ChallengeService::new(
            Arc::new(ChallengeStore::new()),
            Arc::new(CaptchaEngine::new(&cfg)),
            None,
            ChallengePolicy {
                max_active,
                challenge_timeout: Duration::from_secs(300),
            },
        )
    }

    #[test]
    fn test_element_count_schedule() {
        assert_eq!(element_count(0, 2, 5), 2);
        assert_eq!(element_count(29, 2, 5), 2);
        assert_eq!(element_count(30, 2, 5), 3);
        assert_eq!(element_count(59, 2, 5), 3);
        assert_eq!(element_count(60, 2, 5), 4);
        assert_eq!(element_count(79, 2, 5), 4);
        assert_eq!(element_count(80, 2, 5), 5);
        assert_eq!(element_count(100, 2, 5), 5);
    }

    #[tokio::test]
    async fn test_create_rejects_out_of_range_complexity() {
        let service = make_service(10);
        assert!(matches!(
            service.create_challenge(-1).await,
            Err(GauntletError::Invalid(_))
        ));
        assert!(matches!(
            service.create_challenge(101).await,
            Err(GauntletError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_create_respects_active_cap() {
        let service = make_service(2);
        service.create_challenge(10).await.unwrap();
        service.create_challenge(10).await.unwrap();
        assert!(matches!(
            service.create_challenge(10).await,
            Err(GauntletError::Exhausted(_))
        ));
    }

    #[tokio::test]
    async fn test_validate_unknown_challenge() {
        let service = make_service(10);
        let answer = json!(["t1"]);
        assert!(matches!(
            service.validate("missing", &answer).await,
            Err(GauntletError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_solved_is_idempotent() {
        let service = make_service(10);
        let challenge = service.create_challenge(10).await.unwrap();

        // Craft the correct answer from the oracle
        let answer = match &challenge.oracle {
            gauntlet_common::Oracle::OrderedIds(ids) => json!(ids),
            gauntlet_common::Oracle::PairMap(map) => json!(map),
            gauntlet_common::Oracle::SwipeSeq(steps) => json!(steps
                .iter()
                .map(|s| json!({"direction": s.direction.as_str()}))
                .collect::<Vec<_>>()),
            gauntlet_common::Oracle::GameVerifier(_) => unreachable!("complexity 10 is not game"),
        };

        let first = service.validate(&challenge.id, &answer).await.unwrap();
        assert!(first.solved);
        assert_eq!(first.confidence_percent, 100);

        let second = service.validate(&challenge.id, &answer).await.unwrap();
        assert!(second.solved);
        assert_eq!(second.confidence_percent, 100);
        assert_eq!(second.attempts, 0);
    }

    #[tokio::test]
    async fn test_balancer_health_check_event() {
        let service = make_service(10);
        let event = Event {
            kind: EventKind::BalancerEvent,
            challenge_id: String::new(),
            data: json!({"type": "health_check"}),
            timestamp: Utc::now(),
        };

        let reply = service.process_event(&event).await.unwrap();
        assert_eq!(reply.kind, ServerEventKind::SendClientData);
        assert_eq!(reply.data["type"], "health_response");
    }
}
