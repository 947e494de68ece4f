//! Health and metrics endpoints.

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    time: DateTime<Utc>,
    port: u16,
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        time: Utc::now(),
        port: state.ports.ops,
    })
}

/// Plain-text metrics exposition
pub async fn metrics(State(state): State<AppState>) -> String {
    let active = state.challenges.active_count().await;
    let stored = state.challenges.store().len().await;
    let sessions = state.events.session_count().await;
    let engine = state.challenges.engine().stats();
    let security = state.security.stats();

    let mut out = String::with_capacity(1024);
    out.push_str(&format!("gauntlet_challenges_active {active}\n"));
    out.push_str(&format!("gauntlet_challenges_stored {stored}\n"));
    out.push_str(&format!("gauntlet_sessions {sessions}\n"));
    out.push_str(&format!(
        "gauntlet_generations_total {}\n",
        engine.total_generations
    ));
    out.push_str(&format!(
        "gauntlet_generation_time_us_avg {}\n",
        engine.average_time_us
    ));

    if let Some(pool) = state.challenges.pool() {
        let pool_stats = pool.stats();
        out.push_str(&format!("gauntlet_pool_size {}\n", pool_stats.size));
        out.push_str(&format!("gauntlet_pool_served_total {}\n", pool_stats.served));
        out.push_str(&format!("gauntlet_pool_misses_total {}\n", pool_stats.misses));
    }

    for key in [
        "total_requests",
        "blocked_requests",
        "rate_limited_requests",
        "bot_detections",
    ] {
        if let Some(value) = security.get(key).and_then(|v| v.as_u64()) {
            out.push_str(&format!("gauntlet_security_{key} {value}\n"));
        }
    }

    out
}
