//! Security administration endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use gauntlet_common::BlockRecord;

use crate::state::AppState;

pub async fn security_stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    let mut stats = state.security.stats();
    stats["active_challenges"] = json!(state.challenges.active_count().await);
    stats["sessions"] = state.events.stats().await;
    Json(stats)
}

pub async fn blocked_ips(State(state): State<AppState>) -> Json<Vec<BlockRecord>> {
    Json(state.security.blocked_ips())
}

#[derive(Deserialize)]
pub struct BlockIpRequest {
    pub ip: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub hours: u64,
}

pub async fn block_ip(
    State(state): State<AppState>,
    Json(payload): Json<BlockIpRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    if payload.ip.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "IP address required".to_string()));
    }

    let reason = if payload.reason.is_empty() {
        "Manual block".to_string()
    } else {
        payload.reason
    };

    let hours = if payload.hours == 0 { 1 } else { payload.hours };
    state
        .security
        .block_ip(&payload.ip, &reason, Duration::from_secs(hours * 3600))
        .await;

    Ok(Json(json!({
        "status": "success",
        "message": "IP blocked successfully",
    })))
}

#[derive(Deserialize)]
pub struct UnblockIpRequest {
    pub ip: String,
}

pub async fn unblock_ip(
    State(state): State<AppState>,
    Json(payload): Json<UnblockIpRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    if payload.ip.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "IP address required".to_string()));
    }

    state.security.unblock_ip(&payload.ip).await;

    Ok(Json(json!({
        "status": "success",
        "message": "IP unblocked successfully",
    })))
}
