//! Gauntlet service entry point: port discovery, startup, background
//! workers, and graceful shutdown.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use gauntlet::balancer::BalancerClient;
use gauntlet::captcha::pool_worker;
use gauntlet::config::{AppConfig, CliOverrides};
use gauntlet::routes;
use gauntlet::state::{AppState, Ports};

/// Gauntlet - interactive challenge-response gate
#[derive(Parser, Debug)]
#[command(name = "gauntlet")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/gauntlet.yaml")]
    config: String,

    /// Redis URL (overrides config)
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// Balancer URL (overrides config, implies registration)
    #[arg(long, env = "BALANCER_URL")]
    balancer_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "LOG_LEVEL")]
    log_level: String,

    /// Enable JSON logging output
    #[arg(long, default_value = "false")]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level, args.json_logs)?;

    info!("Starting Gauntlet v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load(
        &args.config,
        &CliOverrides {
            redis_url: args.redis_url.clone(),
            balancer_url: args.balancer_url.clone(),
        },
    )?;
    info!(path = %args.config, "Configuration loaded");

    let (shutdown_tx, _) = broadcast::channel::<()>(8);

    // Startup is gated: binding the three surfaces and building the
    // service graph must finish inside the startup window.
    let startup = tokio::time::timeout(
        config.startup_timeout(),
        start(config.clone(), shutdown_tx.clone()),
    )
    .await;

    let (state, listeners) = match startup {
        Ok(result) => result?,
        Err(_) => bail!(
            "startup did not finish within {}s",
            config.server.startup_timeout_secs
        ),
    };

    info!(
        instance_id = %state.instance_id,
        api_port = state.ports.api,
        stream_port = state.ports.stream,
        ops_port = state.ports.ops,
        "Gauntlet listening"
    );

    // Background workers
    if let Some(pool) = state.challenges.pool() {
        tokio::spawn(pool_worker(
            pool.clone(),
            state.challenges.engine().clone(),
            shutdown_tx.subscribe(),
        ));
    }
    tokio::spawn(cleanup_worker(state.clone(), shutdown_tx.subscribe()));

    if state.config.balancer.enabled {
        let client = BalancerClient::new(
            state.config.balancer.clone(),
            state.instance_id.clone(),
            local_host(),
            state.ports.stream,
        );
        tokio::spawn(client.run(shutdown_tx.subscribe()));
    }

    // The three surfaces
    let (api_listener, stream_listener, ops_listener) = listeners;
    let mut servers = tokio::task::JoinSet::new();
    servers.spawn(serve_surface(
        api_listener,
        routes::api_router(state.clone()),
        shutdown_tx.subscribe(),
    ));
    servers.spawn(serve_surface(
        stream_listener,
        routes::stream_router(state.clone()),
        shutdown_tx.subscribe(),
    ));
    servers.spawn(serve_surface(
        ops_listener,
        routes::ops_router(state.clone()),
        shutdown_tx.subscribe(),
    ));

    // Ctrl+C arms the same shutdown path as a balancer shutdown_notice
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            let _ = signal_tx.send(());
        }
    });

    // Wait for shutdown (or an early server failure), then drain
    let mut shutdown_rx = shutdown_tx.subscribe();
    tokio::select! {
        _ = shutdown_rx.recv() => {}
        Some(result) = servers.join_next() => {
            let _ = shutdown_tx.send(());
            result.context("server task panicked")??;
            bail!("server stopped unexpectedly");
        }
    }

    info!("Draining connections...");
    let drained = tokio::time::timeout(config.shutdown_timeout(), async {
        while let Some(result) = servers.join_next().await {
            if let Ok(Err(e)) = result {
                tracing::error!(error = %e, "Server error during drain");
            }
        }
    })
    .await;

    if drained.is_err() {
        tracing::warn!("Drain deadline exceeded; closing remaining streams");
        servers.abort_all();
    }

    info!("Gauntlet shutdown complete");
    Ok(())
}

/// Bind the three surfaces and build the application state
async fn start(
    config: AppConfig,
    shutdown: broadcast::Sender<()>,
) -> Result<(AppState, (TcpListener, TcpListener, TcpListener))> {
    let (listeners, ports) = discover_ports(&config).await?;
    let state = AppState::new(config, ports, shutdown).await?;
    Ok((state, listeners))
}

/// Find three free ports in the configured range. A fixed metrics port,
/// when configured, replaces discovery for the operational surface.
/// Failure to bind any surface is fatal.
async fn discover_ports(
    config: &AppConfig,
) -> Result<((TcpListener, TcpListener, TcpListener), Ports)> {
    let needed = if config.server.metrics_port != 0 { 2 } else { 3 };
    let mut found: Vec<TcpListener> = Vec::with_capacity(needed);

    for port in config.server.min_port..=config.server.max_port {
        if found.len() == needed {
            break;
        }
        if let Ok(listener) = TcpListener::bind(("0.0.0.0", port)).await {
            found.push(listener);
        }
    }

    if found.len() < needed {
        bail!(
            "could not find {} free ports in [{}, {}]",
            needed,
            config.server.min_port,
            config.server.max_port
        );
    }

    let ops_listener = if config.server.metrics_port != 0 {
        TcpListener::bind(("0.0.0.0", config.server.metrics_port))
            .await
            .with_context(|| format!("failed to bind metrics port {}", config.server.metrics_port))?
    } else {
        found.pop().expect("three listeners discovered")
    };

    let stream_listener = found.pop().expect("listener discovered");
    let api_listener = found.pop().expect("listener discovered");

    let ports = Ports {
        api: api_listener.local_addr()?.port(),
        stream: stream_listener.local_addr()?.port(),
        ops: ops_listener.local_addr()?.port(),
    };

    Ok(((api_listener, stream_listener, ops_listener), ports))
}

async fn serve_surface(
    listener: TcpListener,
    router: axum::Router,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = shutdown.recv().await;
    })
    .await
    .context("server error")
}

/// Periodic maintenance: expired challenges, security maps, idle sessions
async fn cleanup_worker(state: AppState, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = tokio::time::interval(state.config.cleanup_interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let challenges = state.challenges.cleanup_expired().await;
                state.security.cleanup();
                let sessions = state.events.cleanup_inactive().await;

                if challenges > 0 || sessions > 0 {
                    tracing::debug!(
                        challenges_removed = challenges,
                        sessions_removed = sessions,
                        "Cleanup tick"
                    );
                }
            }
            _ = shutdown.recv() => {
                tracing::debug!("Cleanup worker shutting down");
                break;
            }
        }
    }
}

fn local_host() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "127.0.0.1".to_string())
}

/// Initialize structured logging with tracing
fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }

    Ok(())
}
