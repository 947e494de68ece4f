//! In-memory challenge store with expiry.
//!
//! The store exclusively owns `Challenge` instances. Generators hand
//! challenges off at creation and retain nothing; the validator writes the
//! `solved` flag back through `update`.

use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

use gauntlet_common::{Challenge, GauntletError};

/// Concurrency-safe keyed challenge map
pub struct ChallengeStore {
    challenges: RwLock<HashMap<String, Challenge>>,
}

impl ChallengeStore {
    pub fn new() -> Self {
        Self {
            challenges: RwLock::new(HashMap::new()),
        }
    }

    /// Store a new challenge
    pub async fn create(&self, challenge: Challenge) {
        let mut map = self.challenges.write().await;
        map.insert(challenge.id.clone(), challenge);
    }

    /// Retrieve a challenge by id
    pub async fn get(&self, id: &str) -> Result<Challenge, GauntletError> {
        let map = self.challenges.read().await;
        map.get(id)
            .cloned()
            .ok_or_else(|| GauntletError::NotFound(format!("challenge {id}")))
    }

    /// Replace an existing challenge
    pub async fn update(&self, challenge: Challenge) -> Result<(), GauntletError> {
        let mut map = self.challenges.write().await;
        match map.get_mut(&challenge.id) {
            Some(slot) => {
                *slot = challenge;
                Ok(())
            }
            None => Err(GauntletError::NotFound(format!(
                "challenge {}",
                challenge.id
            ))),
        }
    }

    /// Remove a challenge by id
    pub async fn delete(&self, id: &str) -> Result<(), GauntletError> {
        let mut map = self.challenges.write().await;
        map.remove(id)
            .map(|_| ())
            .ok_or_else(|| GauntletError::NotFound(format!("challenge {id}")))
    }

    /// Number of unsolved, unexpired challenges
    pub async fn active_count(&self) -> usize {
        let now = Utc::now();
        let map = self.challenges.read().await;
        map.values().filter(|c| c.is_active(now)).count()
    }

    /// Total number of stored challenges, expired included
    pub async fn len(&self) -> usize {
        self.challenges.read().await.len()
    }

    /// Drop every challenge whose expiry has passed; returns how many
    pub async fn cleanup_expired(&self) -> usize {
        let now = Utc::now();
        let mut map = self.challenges.write().await;
        let before = map.len();
        map.retain(|_, c| !c.is_expired(now));
        before - map.len()
    }
}

impl Default for ChallengeStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use gauntlet_common::{opaque_id, ChallengeKind, Oracle};

    fn make_challenge(ttl_secs: i64, solved: bool) -> Challenge {
        let now = Utc::now();
        Challenge {
            id: opaque_id(),
            kind: ChallengeKind::Click,
            complexity: 20,
            artifact: String::new(),
            oracle: Oracle::OrderedIds(vec!["t1".into(), "t2".into()]),
            created_at: now,
            expires_at: now + Duration::seconds(ttl_secs),
            solved,
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_create_get_delete() {
        let store = ChallengeStore::new();
        let c = make_challenge(60, false);
        let id = c.id.clone();

        store.create(c).await;
        assert!(store.get(&id).await.is_ok());

        store.delete(&id).await.unwrap();
        assert!(matches!(
            store.get(&id).await,
            Err(GauntletError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let store = ChallengeStore::new();
        let c = make_challenge(60, false);
        assert!(matches!(
            store.update(c).await,
            Err(GauntletError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_active_count_skips_solved_and_expired() {
        let store = ChallengeStore::new();
        store.create(make_challenge(60, false)).await;
        store.create(make_challenge(60, true)).await;
        store.create(make_challenge(-1, false)).await;

        assert_eq!(store.active_count().await, 1);
        assert_eq!(store.len().await, 3);
    }

    #[tokio::test]
    async fn test_cleanup_removes_only_expired() {
        let store = ChallengeStore::new();
        store.create(make_challenge(60, false)).await;
        store.create(make_challenge(-1, false)).await;
        store.create(make_challenge(-30, true)).await;

        let removed = store.cleanup_expired().await;
        assert_eq!(removed, 2);
        assert_eq!(store.len().await, 1);
    }
}
