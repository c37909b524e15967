//! Test helpers: a minimal client speaking the framed wire protocol.

use anyhow::{bail, Context};
use realm_shared::player::{Direction, Entity, EntityId, Player};
use realm_shared::protocol::{decode, encode, encode_movement, read_frame, Opcode};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// A client end of one server connection.
pub struct TestClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    pub async fn connect(addr: &str) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr).await.context("connect")?;
        let (read_half, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read_half),
            writer,
        })
    }

    pub async fn send(&mut self, op: Opcode, payload: &[u8]) -> anyhow::Result<()> {
        self.writer.write_all(&encode(op, payload)).await?;
        Ok(())
    }

    /// Writes arbitrary bytes, bypassing the framing helpers.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
        self.writer.write_all(bytes).await?;
        Ok(())
    }

    /// Reads and decodes the next frame.
    pub async fn recv(&mut self) -> anyhow::Result<(Opcode, Vec<u8>)> {
        let frame = read_frame(&mut self.reader).await?;
        let (op, payload) = decode(&frame)?;
        Ok((op, payload.to_vec()))
    }

    /// Skips frames until one with the wanted opcode arrives.
    pub async fn recv_until(&mut self, wanted: Opcode) -> anyhow::Result<Vec<u8>> {
        loop {
            let (op, payload) = self.recv().await?;
            if op == wanted {
                return Ok(payload);
            }
        }
    }

    /// Sends `Register` for a fresh player and returns the server's assigned
    /// player from the `Success` reply.
    pub async fn register(&mut self, name: &str) -> anyhow::Result<Player> {
        let player = Player::new(Entity::new(name));
        self.send(Opcode::Register, &player.to_json()?).await?;
        match self.recv().await? {
            (Opcode::Success, payload) => Ok(Player::from_json(&payload)?),
            (op, _) => bail!("expected Success, got {op:?}"),
        }
    }

    /// Full two-phase join: register, then confirm with a bare handshake.
    pub async fn join(&mut self, name: &str) -> anyhow::Result<Player> {
        let player = self.register(name).await?;
        self.send(Opcode::Handshake, b"").await?;
        Ok(player)
    }

    pub async fn start_move(&mut self, dir: Direction, id: EntityId) -> anyhow::Result<()> {
        self.send(Opcode::EntityStartMove, &encode_movement(dir, id))
            .await
    }

    pub async fn stop_move(&mut self, dir: Direction, id: EntityId) -> anyhow::Result<()> {
        self.send(Opcode::EntityStopMove, &encode_movement(dir, id))
            .await
    }
}

/// Installs the test tracing subscriber (idempotent).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}
