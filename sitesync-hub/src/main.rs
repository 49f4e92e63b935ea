//! `SiteSync` development hub.
//!
//! Serves the realtime channel on `/socket.io/` plus the test and stats
//! endpoints, keeping rooms, history and notifications in memory.
//!
//! ```bash
//! # Default address 0.0.0.0:5001
//! cargo run --bin sitesync-hub
//!
//! # Long-polling only, custom address
//! cargo run --bin sitesync-hub -- --bind 127.0.0.1:8080 --polling-only
//! ```

use std::sync::Arc;

use clap::Parser;
use sitesync_hub::config::{HubCliArgs, HubSettings};
use sitesync_hub::hub::{self, HubState};

#[tokio::main]
async fn main() {
    let cli = HubCliArgs::parse();

    let settings = match HubSettings::load(&cli) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(
        addr = %settings.bind_addr,
        websocket = settings.hub.websocket,
        "starting sitesync hub"
    );

    let state = Arc::new(HubState::with_config(settings.hub));

    match hub::start_server_with_state(&settings.bind_addr, Arc::clone(&state)).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "hub listening");
            tokio::select! {
                result = handle => {
                    if let Err(e) = result {
                        tracing::error!(error = %e, "hub server task failed");
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("shutting down");
                    state.close_all_connections().await;
                }
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start hub");
            std::process::exit(1);
        }
    }
}
