//! HTTP routers for the three listen surfaces.

use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;

use gauntlet_common::GauntletError;

use crate::state::AppState;

mod challenge;
mod health;
mod security;
mod stream;

/// Request-response surface: challenge creation
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/challenge", post(challenge::new_challenge))
        .route("/challenge/{challenge_id}", get(challenge::get_challenge))
        .with_state(state)
}

/// Browser-facing stream surface
pub fn stream_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(stream::event_stream))
        .with_state(state)
}

/// Operational surface: health, metrics, security administration
pub fn ops_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/metrics", get(health::metrics))
        .route("/security/stats", get(security::security_stats))
        .route("/security/blocked-ips", get(security::blocked_ips))
        .route("/security/block-ip", post(security::block_ip))
        .route("/security/unblock-ip", post(security::unblock_ip))
        .with_state(state)
}

/// Map a domain error onto its HTTP shape
pub(crate) fn error_response(error: GauntletError) -> (StatusCode, String) {
    let status =
        StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, error.to_string())
}

/// Resolve the source key for per-IP accounting. The balancer fronts the
/// service, so the forwarded header wins over the socket peer.
pub(crate) fn client_ip(headers: &HeaderMap, addr: &SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| addr.ip().to_string())
}

pub(crate) fn user_agent(headers: &HeaderMap) -> String {
    headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_ip_prefers_forwarded_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        let addr: SocketAddr = "127.0.0.1:9999".parse().unwrap();
        assert_eq!(client_ip(&headers, &addr), "203.0.113.7");
    }

    #[test]
    fn test_client_ip_falls_back_to_peer() {
        let headers = HeaderMap::new();
        let addr: SocketAddr = "192.0.2.4:1234".parse().unwrap();
        assert_eq!(client_ip(&headers, &addr), "192.0.2.4");
    }

    #[test]
    fn test_error_response_mapping() {
        let (status, body) = error_response(GauntletError::Exhausted("cap".into()));
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert!(body.contains("cap"));

        let (status, _) = error_response(GauntletError::denied("bot"));
        assert_eq!(status, StatusCode::FORBIDDEN);
    }
}
