//! Session registry and event fan-out.
//!
//! The bus owns every session and its bounded outbound queue. Directed
//! sends wait up to five seconds for queue space; broadcasts drop events
//! for sessions whose queue is full. Per session, events are delivered in
//! submission order; across sessions no ordering is promised.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};

use gauntlet_common::constants::{
    SESSION_IDLE_SECS, SESSION_QUEUE_CAPACITY, SESSION_SEND_TIMEOUT_SECS,
};
use gauntlet_common::{opaque_id, GauntletError, ServerEvent};

/// One live bidirectional attachment
pub struct Session {
    pub id: String,
    pub client_id: String,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub active: bool,
    sender: mpsc::Sender<ServerEvent>,
}

pub struct EventBus {
    sessions: RwLock<HashMap<String, Session>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Create a session and hand back its id plus the outbound receiver
    /// for the transport's writer task.
    pub async fn create_session(&self, client_id: &str) -> (String, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(SESSION_QUEUE_CAPACITY);
        let id = opaque_id();
        let now = Utc::now();

        let session = Session {
            id: id.clone(),
            client_id: client_id.to_string(),
            created_at: now,
            last_seen: now,
            active: true,
            sender: tx,
        };

        self.sessions.write().await.insert(id.clone(), session);
        tracing::debug!(session_id = %id, client_id = %client_id, "Session created");

        (id, rx)
    }

    /// Refresh a session's liveness timestamp
    pub async fn touch(&self, session_id: &str) {
        if let Some(session) = self.sessions.write().await.get_mut(session_id) {
            session.last_seen = Utc::now();
        }
    }

    /// Directed send with a bounded wait for queue space
    pub async fn send_event(
        &self,
        session_id: &str,
        event: ServerEvent,
    ) -> Result<(), GauntletError> {
        let sender = {
            let sessions = self.sessions.read().await;
            let session = sessions
                .get(session_id)
                .filter(|s| s.active)
                .ok_or_else(|| GauntletError::NotFound(format!("session {session_id}")))?;
            session.sender.clone()
        };

        sender
            .send_timeout(event, Duration::from_secs(SESSION_SEND_TIMEOUT_SECS))
            .await
            .map_err(|_| GauntletError::Transient("session queue send timed out".to_string()))
    }

    /// Broadcast to every active session, skipping full queues
    pub async fn broadcast(&self, event: &ServerEvent) -> usize {
        let sessions = self.sessions.read().await;
        let mut delivered = 0;
        for session in sessions.values().filter(|s| s.active) {
            if session.sender.try_send(event.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Broadcast to every active session of one client
    pub async fn broadcast_to_client(&self, client_id: &str, event: &ServerEvent) -> usize {
        let sessions = self.sessions.read().await;
        let mut delivered = 0;
        for session in sessions
            .values()
            .filter(|s| s.active && s.client_id == client_id)
        {
            if session.sender.try_send(event.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Deactivate and drop a session; its queue closes when the sender
    /// goes away.
    pub async fn close_session(&self, session_id: &str) {
        let mut sessions = self.sessions.write().await;
        if let Some(mut session) = sessions.remove(session_id) {
            session.active = false;
            tracing::debug!(session_id = %session_id, "Session closed");
        }
    }

    /// Drop sessions that are inactive or idle for over an hour
    pub async fn cleanup_inactive(&self) -> usize {
        let cutoff = Utc::now() - chrono::Duration::seconds(SESSION_IDLE_SECS as i64);
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| s.active && s.last_seen > cutoff);
        before - sessions.len()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn stats(&self) -> serde_json::Value {
        let sessions = self.sessions.read().await;
        let active = sessions.values().filter(|s| s.active).count();
        json!({
            "total_sessions": sessions.len(),
            "active_sessions": active,
        })
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gauntlet_common::ServerEventKind;

    fn event() -> ServerEvent {
        ServerEvent::new(ServerEventKind::SendClientData, "c1")
    }

    #[tokio::test]
    async fn test_directed_send_in_order() {
        let bus = EventBus::new();
        let (id, mut rx) = bus.create_session("client-a").await;

        for i in 0..3 {
            let e = event().with_confidence(i);
            bus.send_event(&id, e).await.unwrap();
        }

        for i in 0..3 {
            let received = rx.recv().await.unwrap();
            assert_eq!(received.confidence_percent, Some(i));
        }
    }

    #[tokio::test]
    async fn test_send_to_unknown_session() {
        let bus = EventBus::new();
        assert!(matches!(
            bus.send_event("nope", event()).await,
            Err(GauntletError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_broadcast_to_client_targets_only_that_client() {
        let bus = EventBus::new();
        let (_id_a, mut rx_a) = bus.create_session("client-a").await;
        let (_id_b, mut rx_b) = bus.create_session("client-b").await;

        let delivered = bus.broadcast_to_client("client-a", &event()).await;
        assert_eq!(delivered, 1);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_skips_full_queues() {
        let bus = EventBus::new();
        let (_id, mut _rx) = bus.create_session("client-a").await;

        // Fill the queue to capacity without draining
        for _ in 0..SESSION_QUEUE_CAPACITY {
            bus.broadcast(&event()).await;
        }

        let delivered = bus.broadcast(&event()).await;
        assert_eq!(delivered, 0, "full queue must be skipped, not blocked");
    }

    #[tokio::test]
    async fn test_close_session_removes_it() {
        let bus = EventBus::new();
        let (id, _rx) = bus.create_session("client-a").await;
        assert_eq!(bus.session_count().await, 1);

        bus.close_session(&id).await;
        assert_eq!(bus.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_cleanup_keeps_live_sessions() {
        let bus = EventBus::new();
        let (_id, _rx) = bus.create_session("client-a").await;
        let dropped = bus.cleanup_inactive().await;
        assert_eq!(dropped, 0);
        assert_eq!(bus.session_count().await, 1);
    }
}
