//! Per-connection handling.
//!
//! Each accepted socket gets its own task walking the state machine
//! `AwaitingRegister -> AwaitingHandshake -> Active -> Closed`. Registration
//! is two-phase: an id is assigned and echoed back on `Register`, but the
//! player only becomes live in the registry once the client confirms with a
//! bare `Handshake`. Any read failure in the active loop is the single exit
//! path: the task removes its player, drops its socket from the connection
//! set, and broadcasts the departure.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context};
use realm_shared::player::{EntityId, Player};
use realm_shared::protocol::{
    decode, decode_movement, encode, encode_id, read_frame, Opcode, ProtocolError,
};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::registry::EntityRegistry;

/// Handle identifying one accepted connection for the registry's reverse
/// map and the connection set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(pub u64);

impl std::fmt::Display for ConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// The set of currently open sockets. A socket is present iff its handler
/// task reached `Active` and is still running; removal happens exactly once,
/// at first read failure.
#[derive(Default)]
pub struct ConnectionSet {
    writers: Mutex<HashMap<ConnId, OwnedWriteHalf>>,
    /// Admitted handler tasks, including those still mid-handshake. The
    /// admission cap is enforced against this count, not the writer map,
    /// so concurrent joins cannot slip past the cap before registering.
    admitted: AtomicUsize,
}

impl ConnectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves an admission slot, refusing once `cap` handlers are live.
    pub fn try_admit(&self, cap: usize) -> bool {
        self.admitted
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < cap).then_some(n + 1)
            })
            .is_ok()
    }

    /// Releases an admission slot. Called exactly once per admitted handler,
    /// when its task finishes.
    pub fn release(&self) {
        self.admitted.fetch_sub(1, Ordering::AcqRel);
    }

    pub async fn insert(&self, conn: ConnId, writer: OwnedWriteHalf) {
        self.writers.lock().await.insert(conn, writer);
    }

    pub async fn remove(&self, conn: ConnId) -> Option<OwnedWriteHalf> {
        self.writers.lock().await.remove(&conn)
    }

    /// Writes one frame to a single open socket, if it is still present.
    pub async fn send_to(&self, conn: ConnId, frame: &[u8]) {
        let mut writers = self.writers.lock().await;
        if let Some(writer) = writers.get_mut(&conn) {
            if let Err(err) = writer.write_all(frame).await {
                warn!(%conn, error = %err, "Reply write failed");
            }
        }
    }

    /// Writes one frame to every open socket. A failure on one socket never
    /// aborts the others; the dead peer is detected by its own read loop.
    pub async fn broadcast(&self, frame: &[u8]) {
        let mut writers = self.writers.lock().await;
        for (conn, writer) in writers.iter_mut() {
            if let Err(err) = writer.write_all(frame).await {
                warn!(%conn, error = %err, "Broadcast write failed");
            }
        }
    }
}

/// Runs one connection from registration to teardown.
pub async fn handle_connection(
    registry: Arc<EntityRegistry>,
    connections: Arc<ConnectionSet>,
    stream: TcpStream,
    peer: SocketAddr,
    conn: ConnId,
) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    // AwaitingRegister: one frame, must be a valid Register.
    let player = match register(&registry, &mut reader, &mut write_half).await {
        Ok(player) => player,
        Err(err) => {
            info!(%conn, %peer, error = %err, "Registration rejected");
            let _ = write_half.write_all(&encode(Opcode::BadMessage, b"")).await;
            return;
        }
    };
    let id = player.id();

    // AwaitingHandshake: the id stays provisional until the client confirms.
    if let Err(err) = await_handshake(&mut reader).await {
        info!(%conn, %peer, %id, error = %err, "Handshake failed, join abandoned");
        return;
    }

    registry.add(conn, player);
    connections.insert(conn, write_half).await;
    info!(%conn, %peer, %id, "Client joined");

    // Active: translate client messages into registry commands until the
    // stream errors out.
    let err = match read_loop(&registry, &mut reader, id).await {
        Ok(never) => match never {},
        Err(err) => err,
    };
    match &err {
        ProtocolError::Closed => info!(%conn, %id, "Client disconnected"),
        ProtocolError::Io(io_err) => info!(%conn, %id, error = %io_err, "Client read failed"),
        // Malformed input is connection-fatal, but the client is told why
        // before its socket goes away.
        malformed => {
            info!(%conn, %id, error = %malformed, "Malformed message, closing");
            connections
                .send_to(conn, &encode(Opcode::BadMessage, b""))
                .await;
        }
    }

    // Closed: one atomic group of cleanup, then tell the survivors.
    let removed = registry.remove(conn);
    connections.remove(conn).await;
    if removed.is_some() {
        connections
            .broadcast(&encode(Opcode::Disconnect, &encode_id(id)))
            .await;
    }
}

async fn register(
    registry: &EntityRegistry,
    reader: &mut BufReader<OwnedReadHalf>,
    writer: &mut OwnedWriteHalf,
) -> anyhow::Result<Player> {
    let frame = read_frame(reader).await?;
    let (op, payload) = decode(&frame)?;
    if op != Opcode::Register {
        bail!("expected Register, got {op:?}");
    }
    let mut player = Player::from_json(payload)?;
    player.entity.id = registry.allocate_id();

    // Round-trip the reply before the id is exposed to the client: a payload
    // that cannot be parsed back would leave the two sides disagreeing on
    // the player's identity.
    let reply = player.to_json().context("serialize assigned player")?;
    Player::from_json(&reply).context("assigned player failed round-trip")?;

    writer.write_all(&encode(Opcode::Success, &reply)).await?;
    Ok(player)
}

async fn await_handshake(reader: &mut BufReader<OwnedReadHalf>) -> anyhow::Result<()> {
    let frame = read_frame(reader).await?;
    match decode(&frame)? {
        (Opcode::Handshake, payload) if payload.is_empty() => Ok(()),
        (op, _) => bail!("expected bare Handshake, got {op:?}"),
    }
}

async fn read_loop(
    registry: &EntityRegistry,
    reader: &mut BufReader<OwnedReadHalf>,
    own_id: EntityId,
) -> Result<std::convert::Infallible, ProtocolError> {
    loop {
        let frame = read_frame(reader).await?;
        let (op, payload) = match decode(&frame) {
            Ok(parts) => parts,
            // An opcode byte outside the closed set is not fatal here: the
            // message is dropped and the session continues.
            Err(ProtocolError::UnknownOpcode(byte)) => {
                debug!(%own_id, byte, "Ignoring unknown opcode");
                continue;
            }
            Err(err) => return Err(err),
        };
        match op {
            Opcode::EntityStartMove | Opcode::EntityStopMove => {
                let (dir, target) = decode_movement(payload)?;
                // Clients may only steer their own entity.
                if target != own_id {
                    warn!(%own_id, %target, "Movement for foreign entity, dropped");
                    continue;
                }
                registry.apply_movement(own_id, dir, op == Opcode::EntityStartMove);
            }
            other => {
                debug!(%own_id, opcode = ?other, "Ignoring unexpected opcode");
            }
        }
    }
}

/// Refuses a connection that exceeds the admission cap: reply, then close.
pub async fn refuse(mut stream: TcpStream, peer: SocketAddr) {
    warn!(%peer, "Connection refused, server full");
    let _ = stream.write_all(&encode(Opcode::BadMessage, b"")).await;
}
