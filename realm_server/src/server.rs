//! Server assembly: accept loop, fixed-rate tick loop, snapshot broadcast.
//!
//! Two long-lived tasks share the registry and connection set:
//! - the accept loop, spawning one handler task per admitted socket,
//! - the tick loop, which takes the registry's exclusive window once per
//!   tick to integrate motion and capture the snapshot it broadcasts.
//!
//! Both loops observe a `watch`-based shutdown signal so the process (and
//! every test) can stop them cleanly.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use realm_shared::config::ServerConfig;
use realm_shared::protocol::{encode, encode_snapshot, Opcode};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::connection::{self, ConnId, ConnectionSet};
use crate::registry::EntityRegistry;

/// Creates the shutdown signal pair shared by the accept and tick loops.
/// Send `true` (or drop the sender) to stop a running server.
pub fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// The session server: listener plus the state shared by all its tasks.
pub struct SessionServer {
    cfg: ServerConfig,
    listener: TcpListener,
    registry: Arc<EntityRegistry>,
    connections: Arc<ConnectionSet>,
    next_conn_id: AtomicU64,
}

impl SessionServer {
    /// Binds the listener for the configured address.
    pub async fn bind(cfg: ServerConfig) -> anyhow::Result<Self> {
        let addr: SocketAddr = cfg.bind_addr.parse().context("parse bind_addr")?;
        let listener = TcpListener::bind(addr).await.context("tcp bind")?;
        Ok(Self {
            cfg,
            listener,
            registry: Arc::new(EntityRegistry::new()),
            connections: Arc::new(ConnectionSet::new()),
            next_conn_id: AtomicU64::new(1),
        })
    }

    /// Returns the local address (after binding).
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn registry(&self) -> Arc<EntityRegistry> {
        Arc::clone(&self.registry)
    }

    /// Runs the tick loop and the accept loop until the shutdown signal
    /// fires. Connection handler tasks outlive neither the process nor
    /// their sockets; they are not awaited on shutdown.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let tick = tokio::spawn(tick_loop(
            Arc::clone(&self.registry),
            Arc::clone(&self.connections),
            self.cfg.tick_period(),
            shutdown.clone(),
        ));

        let accept = self.accept_loop(shutdown).await;
        match &accept {
            Ok(()) => tick.await.context("tick loop task")?,
            // An accept failure leaves the shutdown signal untriggered, so
            // the tick task must be stopped here instead of awaited.
            Err(_) => tick.abort(),
        }
        accept
    }

    async fn accept_loop(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Accept loop stopping");
                        return Ok(());
                    }
                }
                accepted = self.listener.accept() => {
                    let (stream, peer) = accepted.context("tcp accept")?;
                    // The slot is reserved here, before any handshake I/O,
                    // so concurrent joins cannot overshoot the cap.
                    if !self.connections.try_admit(self.cfg.max_clients) {
                        tokio::spawn(connection::refuse(stream, peer));
                        continue;
                    }
                    let conn = ConnId(self.next_conn_id.fetch_add(1, Ordering::Relaxed));
                    info!(%conn, %peer, "Accepted connection");
                    let registry = Arc::clone(&self.registry);
                    let connections = Arc::clone(&self.connections);
                    tokio::spawn(async move {
                        connection::handle_connection(
                            registry,
                            Arc::clone(&connections),
                            stream,
                            peer,
                            conn,
                        )
                        .await;
                        connections.release();
                    });
                }
            }
        }
    }
}

/// Fixed-cadence simulation loop. Each tick takes the registry's exclusive
/// window to integrate motion and snapshot in one critical section, then
/// fans the encoded snapshot out. A tick that overruns its period proceeds
/// immediately; there is no catch-up, drift is accepted.
async fn tick_loop(
    registry: Arc<EntityRegistry>,
    connections: Arc<ConnectionSet>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let dt = period.as_secs_f32();
    loop {
        let start = Instant::now();

        let players = registry.advance_and_snapshot(dt);
        match encode_snapshot(&players) {
            Ok(payload) => {
                connections
                    .broadcast(&encode(Opcode::UpdatePlayers, &payload))
                    .await;
            }
            Err(err) => error!(error = %err, "Snapshot serialization failed, tick skipped"),
        }

        let elapsed = start.elapsed();
        if elapsed >= period {
            debug!(?elapsed, "Tick overran its period");
            if *shutdown.borrow() {
                break;
            }
            continue;
        }
        tokio::select! {
            _ = tokio::time::sleep(period - elapsed) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    info!("Tick loop stopping");
}

/// Helper for tests: bind to an ephemeral port.
pub async fn bind_ephemeral(tick_hz: u32) -> anyhow::Result<(SessionServer, ServerConfig)> {
    let cfg = ServerConfig {
        bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0).to_string(),
        tick_hz,
        ..Default::default()
    };
    bind_ephemeral_with(cfg).await
}

/// Same as [`bind_ephemeral`] but with a caller-supplied config (the port in
/// `bind_addr` is replaced by the one actually bound).
pub async fn bind_ephemeral_with(cfg: ServerConfig) -> anyhow::Result<(SessionServer, ServerConfig)> {
    let server = SessionServer::bind(cfg).await?;
    let mut cfg = server.cfg.clone();
    cfg.bind_addr = server.local_addr()?.to_string();
    Ok((server, cfg))
}
