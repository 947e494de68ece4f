//! Bidirectional event stream over WebSocket.
//!
//! A session is created on upgrade. The writer task drains the session's
//! bounded queue; the read loop parses inbound events and dispatches them
//! through the challenge service. Malformed input never kills the stream;
//! it is answered with an error payload and reading continues.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::net::SocketAddr;
use std::time::Duration;

use gauntlet_common::{Event, EventKind, GauntletError, ServerEvent, ServerEventKind};

use super::{client_ip, error_response, user_agent};
use crate::state::AppState;

pub async fn event_stream(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let ip = client_ip(&headers, &addr);
    let ua = user_agent(&headers);

    let decision = state
        .security
        .check_request(&ip, &ua, "/ws", Duration::ZERO, false)
        .await;

    if !decision.allowed {
        return error_response(GauntletError::Denied {
            reasons: decision.reasons,
        })
        .into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(state, socket, ip))
}

async fn handle_socket(state: AppState, socket: WebSocket, ip: String) {
    // The source key doubles as the client id: every session opened by
    // the same source shares broadcasts.
    let (session_id, mut outbound) = state.events.create_session(&ip).await;
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Writer: session queue -> socket, in submission order
    let writer = tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize server event");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = ws_rx.next().await {
        let message = match message {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(session_id = %session_id, error = %e, "Stream read error");
                break;
            }
        };

        match message {
            Message::Text(text) => {
                state.events.touch(&session_id).await;
                handle_inbound(&state, &session_id, &ip, text.as_str()).await;
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    // Socket gone: treat as an implicit ConnectionClosed for bookkeeping
    tracing::debug!(session_id = %session_id, "Stream closed");
    state.events.close_session(&session_id).await;
    writer.abort();
}

async fn handle_inbound(state: &AppState, session_id: &str, ip: &str, text: &str) {
    let event: Event = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(e) => {
            let reply = ServerEvent::new(ServerEventKind::SendClientData, "")
                .with_data(json!({"type": "error", "error": format!("invalid event: {e}")}));
            let _ = state.events.send_event(session_id, reply).await;
            return;
        }
    };

    // shutdown_notice arms the graceful-shutdown path before the ack
    if event.kind == EventKind::BalancerEvent
        && event.data.get("type").and_then(|v| v.as_str()) == Some("shutdown_notice")
    {
        tracing::info!(session_id = %session_id, "Shutdown notice received on stream");
        let _ = state.shutdown.send(());
    }

    match state.challenges.process_event(&event).await {
        Ok(reply) => {
            // Solve timings feed the trust model
            if reply.kind == ServerEventKind::ChallengeResult {
                if let Some(ms) = reply.data.get("time_to_solve_ms").and_then(|v| v.as_i64()) {
                    if ms > 0 {
                        state.security.record_solve_time(ip, ms);
                    }
                }
            }
            let _ = state.events.send_event(session_id, reply).await;
        }
        Err(error) => {
            let reply = ServerEvent::new(ServerEventKind::SendClientData, &event.challenge_id)
                .with_data(json!({"type": "error", "error": error.to_string()}));
            let _ = state.events.send_event(session_id, reply).await;
        }
    }
}
