//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p realm_server -- [--addr 127.0.0.1:5000] [--tick-hz 30] [--max-clients 16]
//!
//! The server listens for client connections, runs a fixed timestep
//! simulation, and broadcasts player snapshots to connected clients.

use std::env;

use anyhow::Context;
use realm_server::server::{shutdown_channel, SessionServer};
use realm_shared::config::ServerConfig;
use tracing::info;

fn parse_args() -> ServerConfig {
    let mut cfg = ServerConfig::default();
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.bind_addr = args[i + 1].clone();
                i += 2;
            }
            "--tick-hz" if i + 1 < args.len() => {
                cfg.tick_hz = args[i + 1].parse().unwrap_or(30);
                i += 2;
            }
            "--max-clients" if i + 1 < args.len() => {
                cfg.max_clients = args[i + 1].parse().unwrap_or(16);
                i += 2;
            }
            _ => i += 1,
        }
    }
    cfg
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args();
    info!(addr = %cfg.bind_addr, tick_hz = cfg.tick_hz, max_clients = cfg.max_clients, "Starting server");

    let server = SessionServer::bind(cfg).await.context("bind server")?;
    let local = server.local_addr()?;
    info!(%local, "Server listening");

    // The sender is held for the lifetime of the process; the loops run
    // until it is dropped at exit.
    let (_shutdown_tx, shutdown_rx) = shutdown_channel();
    server.run(shutdown_rx).await
}
