//! Tally server — runs the polling relay over WebSocket.
//!
//! Configuration comes from `TALLY_*` environment variables (see
//! [`config`]); log filtering from `RUST_LOG` (default `info`).

mod config;

use std::process::ExitCode;

use log::info;
use tally_relay::RelayServer;

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match config::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!("Starting Tally relay on {}", config.bind_addr);
    let server = RelayServer::new(config);

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                log::error!("Server stopped: {e}");
                return ExitCode::FAILURE;
            }
        }
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                log::error!("Failed to listen for shutdown signal: {e}");
                return ExitCode::FAILURE;
            }
            let stats = server.stats().await;
            info!(
                "Shutting down: {} connections served, {} messages, {} rooms",
                stats.total_connections, stats.total_messages, stats.active_rooms
            );
        }
    }

    ExitCode::SUCCESS
}
