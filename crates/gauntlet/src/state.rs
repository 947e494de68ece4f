//! Application state and shared resources.

use anyhow::Result;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::captcha::{CaptchaEngine, ChallengePolicy, ChallengePool, ChallengeService};
use crate::config::AppConfig;
use crate::events::EventBus;
use crate::security::SecurityService;
use crate::store::ChallengeStore;

/// The three discovered listen ports
#[derive(Debug, Clone, Copy)]
pub struct Ports {
    /// Request-response surface (NewChallenge)
    pub api: u16,
    /// Browser-facing stream surface (EventStream)
    pub stream: u16,
    /// Operational surface (health, metrics, security)
    pub ops: u16,
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,

    /// Optional external cache; None means local-only mode
    pub redis: Option<ConnectionManager>,

    /// Instance identifier advertised to the balancer
    pub instance_id: String,

    pub challenges: Arc<ChallengeService>,
    pub security: Arc<SecurityService>,
    pub events: Arc<EventBus>,

    /// Fires once to arm the graceful-shutdown path
    pub shutdown: broadcast::Sender<()>,

    pub ports: Ports,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Build the service graph. Redis connection failure is non-fatal:
    /// the process logs a warning and enters local-only mode.
    pub async fn new(
        config: AppConfig,
        ports: Ports,
        shutdown: broadcast::Sender<()>,
    ) -> Result<Self> {
        let redis = connect_redis(&config).await;
        if redis.is_none() {
            tracing::warn!("Running in local-only mode (no external cache)");
        }

        let store = Arc::new(ChallengeStore::new());
        let engine = Arc::new(CaptchaEngine::new(&config.captcha));

        let pool = if config.captcha.pool_capacity > 0 {
            Some(Arc::new(ChallengePool::new(
                config.captcha.pool_capacity,
                config.captcha.pool_complexity,
                config.challenge_timeout(),
            )))
        } else {
            None
        };

        let challenges = Arc::new(ChallengeService::new(
            store,
            engine,
            pool,
            ChallengePolicy {
                max_active: config.captcha.max_active_challenges,
                challenge_timeout: config.challenge_timeout(),
            },
        ));

        let security = Arc::new(SecurityService::new(redis.clone(), &config.security));
        let events = Arc::new(EventBus::new());

        let instance_id = format!("gauntlet-{}", gauntlet_common::opaque_id());

        Ok(Self {
            config,
            redis,
            instance_id,
            challenges,
            security,
            events,
            shutdown,
            ports,
            started_at: Utc::now(),
        })
    }
}

/// Dial Redis within the configured init deadline; any failure degrades
/// to local-only mode instead of aborting startup.
async fn connect_redis(config: &AppConfig) -> Option<ConnectionManager> {
    let client = match redis::Client::open(config.redis.url.as_str()) {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!(error = %e, url = %config.redis.url, "Invalid Redis URL");
            return None;
        }
    };

    let deadline = Duration::from_millis(config.redis.dial_timeout_ms)
        .max(Duration::from_millis(100));

    match tokio::time::timeout(deadline, ConnectionManager::new(client)).await {
        Ok(Ok(manager)) => {
            tracing::info!(url = %config.redis.url, "Redis connected");
            Some(manager)
        }
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Redis connection failed");
            None
        }
        Err(_) => {
            tracing::warn!(timeout_ms = config.redis.dial_timeout_ms, "Redis dial timed out");
            None
        }
    }
}
