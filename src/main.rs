//! Pong Match Server - authoritative multiplayer Pong
//!
//! Entry point. The server handles:
//! - WebSocket connections for real-time matches
//! - HTTP endpoints for matchmaking, rooms and tournaments
//! - Reporting finished matches to the result persistence endpoint

mod app;
mod config;
mod error;
mod game;
mod http;
mod matchmaking;
mod rooms;
mod session;
mod store;
mod tournament;
mod util;
mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::app::AppState;
use crate::config::Config;
use crate::http::build_router;
use crate::matchmaking::LiveMatches;
use crate::store::{run_reporter, ResultReporter};
use crate::util::time::init_server_time;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;

    init_tracing(&config.log_level);
    init_server_time();

    info!("Starting Pong Match Server");
    info!(
        addr = %config.server_addr,
        tick_rate = config.tick_rate,
        default_max_score = config.default_max_score,
        "Configuration loaded"
    );
    if config.results_url.is_none() {
        warn!("RESULTS_URL not set, match results will only be logged");
    }

    let (state, results_rx) = AppState::new(config.clone());

    // Result reporter
    let reporter = ResultReporter::new(&config);
    tokio::spawn(run_reporter(reporter, results_rx));

    // Matchmaking pairing pass
    let matchmaking = state.matchmaking.clone();
    let live: Arc<dyn LiveMatches> = state.hub.clone();
    tokio::spawn(async move {
        matchmaking.run(live).await;
    });

    // Room and tournament cleanup
    let rooms = state.rooms.clone();
    let tournaments = state.tournaments.clone();
    let sweep_interval = config.sweep_interval;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            rooms.sweep();
            tournaments.sweep();
        }
    });

    let router = build_router(state);

    let addr: SocketAddr = config.server_addr;
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on {}", addr);
    info!("Health check: http://{}/health", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}
