//! Balancer registration client.
//!
//! Maintains a long-lived stream to the external director: READY on
//! connect, READY every heartbeat tick, STOPPED on shutdown. Responses are
//! classified and logged. On stream failure the client reconnects with a
//! configured delay up to the retry budget; after exhaustion the service
//! keeps serving but no longer registers.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::broadcast;

use crate::config::BalancerConfig;

#[derive(Debug, Serialize)]
struct RegistrationEvent<'a> {
    event_type: &'a str,
    instance_id: &'a str,
    challenge_type: &'a str,
    host: &'a str,
    port_number: u16,
    timestamp: i64,
}

#[derive(Debug, Deserialize)]
struct RegistrationResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: String,
}

pub struct BalancerClient {
    config: BalancerConfig,
    instance_id: String,
    host: String,
    port: u16,
    challenge_type: String,
}

impl BalancerClient {
    pub fn new(config: BalancerConfig, instance_id: String, host: String, port: u16) -> Self {
        Self {
            config,
            instance_id,
            host,
            port,
            challenge_type: "interactive".to_string(),
        }
    }

    /// Run the registration loop until shutdown or retry exhaustion
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let address = self
            .config
            .url
            .trim_start_matches("tcp://")
            .trim_start_matches("http://")
            .to_string();
        let retry_delay = Duration::from_secs(self.config.retry_delay_secs);
        let mut attempts = 0u32;

        tracing::info!(address = %address, instance_id = %self.instance_id, "Balancer client started");

        loop {
            match TcpStream::connect(&address).await {
                Ok(stream) => {
                    attempts = 0;
                    match self.registration_stream(stream, &mut shutdown).await {
                        StreamEnd::Shutdown => return,
                        StreamEnd::Failed => {}
                    }
                }
                Err(e) => {
                    tracing::warn!(address = %address, error = %e, "Balancer connection failed");
                }
            }

            attempts += 1;
            if attempts > self.config.max_retry_attempts {
                tracing::error!(
                    attempts = attempts,
                    "Balancer retries exhausted; continuing without registration"
                );
                return;
            }

            tokio::select! {
                _ = tokio::time::sleep(retry_delay) => {}
                _ = shutdown.recv() => return,
            }
        }
    }

    /// One connected stream: heartbeats out, classified responses in
    async fn registration_stream(
        &self,
        stream: TcpStream,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> StreamEnd {
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        if let Err(e) = self.send_event(&mut write_half, "READY").await {
            tracing::warn!(error = %e, "Failed to send registration");
            return StreamEnd::Failed;
        }
        tracing::info!(instance_id = %self.instance_id, "Registered with balancer");

        let mut heartbeat =
            tokio::time::interval(Duration::from_secs(self.config.registration_interval_secs.max(1)));
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    if let Err(e) = self.send_event(&mut write_half, "READY").await {
                        tracing::warn!(error = %e, "Heartbeat failed");
                        return StreamEnd::Failed;
                    }
                }
                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => classify_response(&line),
                        Ok(None) => {
                            tracing::warn!("Balancer closed the stream");
                            return StreamEnd::Failed;
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Balancer read error");
                            return StreamEnd::Failed;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    if let Err(e) = self.send_event(&mut write_half, "STOPPED").await {
                        tracing::warn!(error = %e, "Failed to send STOPPED");
                    } else {
                        tracing::info!("Sent STOPPED to balancer");
                    }
                    return StreamEnd::Shutdown;
                }
            }
        }
    }

    async fn send_event(
        &self,
        write_half: &mut tokio::net::tcp::OwnedWriteHalf,
        event_type: &str,
    ) -> std::io::Result<()> {
        let event = RegistrationEvent {
            event_type,
            instance_id: &self.instance_id,
            challenge_type: &self.challenge_type,
            host: &self.host,
            port_number: self.port,
            timestamp: Utc::now().timestamp(),
        };

        let mut frame = serde_json::to_vec(&event).unwrap_or_default();
        frame.push(b'\n');
        write_half.write_all(&frame).await
    }
}

enum StreamEnd {
    Shutdown,
    Failed,
}

fn classify_response(line: &str) {
    let response: RegistrationResponse = match serde_json::from_str(line) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = %e, "Unparseable balancer response");
            return;
        }
    };

    match response.status.as_str() {
        "SUCCESS" => tracing::debug!("Registration acknowledged"),
        "ERROR" => tracing::error!(message = %response.message, "Registration error"),
        other => tracing::warn!(status = %other, message = %response.message, "Unknown registration status"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn config(url: &str) -> BalancerConfig {
        BalancerConfig {
            url: url.to_string(),
            enabled: true,
            registration_interval_secs: 1,
            heartbeat_timeout_secs: 5,
            max_retry_attempts: 0,
            retry_delay_secs: 1,
        }
    }

    #[tokio::test]
    async fn test_ready_then_stopped_on_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let accept = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut lines = BufReader::new(stream).lines();
            let mut seen = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                let value: serde_json::Value = serde_json::from_str(&line).unwrap();
                seen.push(value["event_type"].as_str().unwrap().to_string());
                if seen.last().is_some_and(|e| e == "STOPPED") {
                    break;
                }
            }
            seen
        });

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let client = BalancerClient::new(
            config(&address.to_string()),
            "instance-1".to_string(),
            "127.0.0.1".to_string(),
            4000,
        );

        let runner = tokio::spawn(client.run(shutdown_rx));

        // Let the initial READY land, then shut down
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(()).unwrap();
        runner.await.unwrap();

        let seen = accept.await.unwrap();
        assert_eq!(seen.first().map(String::as_str), Some("READY"));
        assert_eq!(seen.last().map(String::as_str), Some("STOPPED"));
    }

    #[tokio::test]
    async fn test_gives_up_after_retry_budget() {
        // Nothing listens on this address; one failed attempt exhausts the
        // zero-retry budget and run() returns.
        let (_tx, shutdown_rx) = broadcast::channel(1);
        let client = BalancerClient::new(
            config("127.0.0.1:1"),
            "instance-2".to_string(),
            "127.0.0.1".to_string(),
            4000,
        );

        tokio::time::timeout(Duration::from_secs(5), client.run(shutdown_rx))
            .await
            .expect("client must give up, not spin forever");
    }

    #[test]
    fn test_registration_event_wire_shape() {
        let event = RegistrationEvent {
            event_type: "READY",
            instance_id: "i-1",
            challenge_type: "interactive",
            host: "10.0.0.2",
            port_number: 4000,
            timestamp: 1_700_000_000,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "READY");
        assert_eq!(json["port_number"], 4000);
        assert_eq!(json["instance_id"], "i-1");
    }
}
