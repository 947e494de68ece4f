//! Challenge creation endpoint.

use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use gauntlet_common::GauntletError;

use super::{client_ip, error_response, user_agent};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct NewChallengeRequest {
    pub complexity: i32,
}

#[derive(Serialize)]
pub struct NewChallengeResponse {
    pub challenge_id: String,
    /// Self-contained interactive artifact (HTML document)
    pub artifact: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub expires_at: DateTime<Utc>,
}

/// Create a new challenge for the requested complexity.
///
/// The request passes the admission pipeline first; denial surfaces the
/// pipeline's reasons verbatim with 403.
pub async fn new_challenge(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(payload): Json<NewChallengeRequest>,
) -> Result<Json<NewChallengeResponse>, (StatusCode, String)> {
    let ip = client_ip(&headers, &addr);
    let ua = user_agent(&headers);

    let decision = state
        .security
        .check_request(&ip, &ua, "/challenge", Duration::ZERO, false)
        .await;

    if !decision.allowed {
        return Err(error_response(GauntletError::Denied {
            reasons: decision.reasons,
        }));
    }

    let challenge = state
        .challenges
        .create_challenge(payload.complexity)
        .await
        .map_err(error_response)?;

    Ok(Json(NewChallengeResponse {
        challenge_id: challenge.id,
        artifact: challenge.artifact,
        kind: challenge.kind.to_string(),
        expires_at: challenge.expires_at,
    }))
}

#[derive(Serialize)]
pub struct ChallengeStatusResponse {
    pub challenge_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub complexity: i32,
    pub solved: bool,
    pub expires_at: DateTime<Utc>,
}

/// Inspect a challenge's public state. The oracle and artifact stay
/// server-side.
pub async fn get_challenge(
    State(state): State<AppState>,
    Path(challenge_id): Path<String>,
) -> Result<Json<ChallengeStatusResponse>, (StatusCode, String)> {
    let challenge = state
        .challenges
        .store()
        .get(&challenge_id)
        .await
        .map_err(error_response)?;

    Ok(Json(ChallengeStatusResponse {
        challenge_id: challenge.id,
        kind: challenge.kind.to_string(),
        complexity: challenge.complexity,
        solved: challenge.solved,
        expires_at: challenge.expires_at,
    }))
}
