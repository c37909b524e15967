//! Wire protocol: opcode-tagged, terminator-delimited frames.
//!
//! One message = opcode byte + payload bytes + terminator byte. There is no
//! escaping: every payload is compact JSON or an ASCII digit string, neither
//! of which can contain the terminator.

use std::collections::BTreeMap;

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::player::{Direction, EntityId, Player};

/// Delimits messages in the byte stream. Payload encodings are ASCII-safe
/// and never produce this byte.
pub const TERMINATOR: u8 = b'\n';

/// Message kinds. The opcode space is closed: unknown bytes fail decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// client -> server: request to join, payload is a serialized player.
    Register = 0x01,
    /// client -> server: confirm received id, finalize the join. Empty payload.
    Handshake = 0x02,
    /// server -> client: registration accepted, payload is the player with
    /// its assigned id.
    Success = 0x03,
    /// server -> client: malformed or invalid request, connection will close.
    BadMessage = 0x04,
    /// client -> server: begin moving in a direction.
    EntityStartMove = 0x05,
    /// client -> server: stop moving in a direction.
    EntityStopMove = 0x06,
    /// server -> client broadcast: per-tick world snapshot.
    UpdatePlayers = 0x07,
    /// server -> client broadcast: a peer left.
    Disconnect = 0x08,
}

impl Opcode {
    pub const ALL: [Opcode; 8] = [
        Opcode::Register,
        Opcode::Handshake,
        Opcode::Success,
        Opcode::BadMessage,
        Opcode::EntityStartMove,
        Opcode::EntityStopMove,
        Opcode::UpdatePlayers,
        Opcode::Disconnect,
    ];
}

impl TryFrom<u8> for Opcode {
    type Error = ProtocolError;

    fn try_from(byte: u8) -> Result<Self, ProtocolError> {
        match byte {
            0x01 => Ok(Opcode::Register),
            0x02 => Ok(Opcode::Handshake),
            0x03 => Ok(Opcode::Success),
            0x04 => Ok(Opcode::BadMessage),
            0x05 => Ok(Opcode::EntityStartMove),
            0x06 => Ok(Opcode::EntityStopMove),
            0x07 => Ok(Opcode::UpdatePlayers),
            0x08 => Ok(Opcode::Disconnect),
            other => Err(ProtocolError::UnknownOpcode(other)),
        }
    }
}

/// Framing and payload decode failures.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame has no opcode byte")]
    EmptyFrame,
    #[error("unknown opcode byte {0:#04x}")]
    UnknownOpcode(u8),
    #[error("stream ended before terminator")]
    MissingTerminator,
    #[error("peer closed the connection")]
    Closed,
    #[error("bad movement payload")]
    BadMovement,
    #[error("bad id payload")]
    BadId,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Builds one wire frame.
pub fn encode(op: Opcode, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(2 + payload.len());
    buf.put_u8(op as u8);
    buf.extend_from_slice(payload);
    buf.put_u8(TERMINATOR);
    buf.freeze()
}

/// Splits one wire frame into opcode and payload.
pub fn decode(frame: &[u8]) -> Result<(Opcode, &[u8]), ProtocolError> {
    let body = match frame.split_last() {
        Some((&TERMINATOR, body)) => body,
        _ => return Err(ProtocolError::MissingTerminator),
    };
    let (&op_byte, payload) = body.split_first().ok_or(ProtocolError::EmptyFrame)?;
    Ok((Opcode::try_from(op_byte)?, payload))
}

/// Reads one terminator-delimited frame from a buffered stream.
///
/// Returns `Closed` on a clean EOF between frames and `MissingTerminator`
/// when the stream ends mid-frame.
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let mut frame = Vec::new();
    let n = reader.read_until(TERMINATOR, &mut frame).await?;
    if n == 0 {
        return Err(ProtocolError::Closed);
    }
    if frame.last() != Some(&TERMINATOR) {
        return Err(ProtocolError::MissingTerminator);
    }
    Ok(frame)
}

fn direction_byte(dir: Direction) -> u8 {
    match dir {
        Direction::Up => b'U',
        Direction::Down => b'D',
        Direction::Left => b'L',
        Direction::Right => b'R',
    }
}

fn direction_from(byte: u8) -> Option<Direction> {
    match byte {
        b'U' => Some(Direction::Up),
        b'D' => Some(Direction::Down),
        b'L' => Some(Direction::Left),
        b'R' => Some(Direction::Right),
        _ => None,
    }
}

/// Movement payload: one direction byte followed by the entity id in ASCII.
pub fn encode_movement(dir: Direction, id: EntityId) -> Vec<u8> {
    let mut payload = vec![direction_byte(dir)];
    payload.extend_from_slice(id.to_string().as_bytes());
    payload
}

pub fn decode_movement(payload: &[u8]) -> Result<(Direction, EntityId), ProtocolError> {
    let (&dir_byte, id_digits) = payload.split_first().ok_or(ProtocolError::BadMovement)?;
    let dir = direction_from(dir_byte).ok_or(ProtocolError::BadMovement)?;
    let id = decode_id(id_digits).map_err(|_| ProtocolError::BadMovement)?;
    Ok((dir, id))
}

/// Id payload (Disconnect): the entity id in ASCII digits.
pub fn encode_id(id: EntityId) -> Vec<u8> {
    id.to_string().into_bytes()
}

pub fn decode_id(payload: &[u8]) -> Result<EntityId, ProtocolError> {
    std::str::from_utf8(payload)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(EntityId)
        .ok_or(ProtocolError::BadId)
}

/// Snapshot payload: JSON object keyed by stringified id. `BTreeMap` keeps
/// the wire ordering stable across ticks.
pub fn encode_snapshot(players: &BTreeMap<String, Player>) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(players)
}

pub fn decode_snapshot(payload: &[u8]) -> serde_json::Result<BTreeMap<String, Player>> {
    serde_json::from_slice(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::Entity;
    use tokio::io::BufReader;

    #[test]
    fn roundtrip_every_opcode() {
        let payloads: [&[u8]; 3] = [b"", b"x", &[b'a'; 4096 + 17]];
        for op in Opcode::ALL {
            for payload in payloads {
                let frame = encode(op, payload);
                let (back_op, back_payload) = decode(&frame).unwrap();
                assert_eq!(back_op, op);
                assert_eq!(back_payload, payload);
            }
        }
    }

    #[test]
    fn decode_rejects_empty_body() {
        let frame = [TERMINATOR];
        assert!(matches!(decode(&frame), Err(ProtocolError::EmptyFrame)));
    }

    #[test]
    fn decode_rejects_missing_terminator() {
        let frame = [Opcode::Handshake as u8];
        assert!(matches!(
            decode(&frame),
            Err(ProtocolError::MissingTerminator)
        ));
    }

    #[test]
    fn decode_rejects_unknown_opcode() {
        let frame = [0x7f, TERMINATOR];
        assert!(matches!(
            decode(&frame),
            Err(ProtocolError::UnknownOpcode(0x7f))
        ));
    }

    #[test]
    fn movement_payload_roundtrip() {
        let payload = encode_movement(Direction::Right, EntityId(42));
        let (dir, id) = decode_movement(&payload).unwrap();
        assert_eq!(dir, Direction::Right);
        assert_eq!(id, EntityId(42));
    }

    #[test]
    fn movement_payload_rejects_garbage() {
        assert!(decode_movement(b"").is_err());
        assert!(decode_movement(b"Q7").is_err());
        assert!(decode_movement(b"R7x").is_err());
    }

    #[test]
    fn snapshot_payload_roundtrip() {
        let mut players = BTreeMap::new();
        let mut entity = Entity::new("Alice");
        entity.id = EntityId(3);
        players.insert("3".to_string(), Player::new(entity));
        let bytes = encode_snapshot(&players).unwrap();
        assert_eq!(decode_snapshot(&bytes).unwrap(), players);
    }

    #[tokio::test]
    async fn read_frame_splits_stream() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&encode(Opcode::Handshake, b""));
        wire.extend_from_slice(&encode(Opcode::Disconnect, b"9"));
        let mut reader = BufReader::new(wire.as_slice());

        let first = read_frame(&mut reader).await.unwrap();
        assert_eq!(decode(&first).unwrap().0, Opcode::Handshake);
        let second = read_frame(&mut reader).await.unwrap();
        assert_eq!(decode(&second).unwrap(), (Opcode::Disconnect, &b"9"[..]));
        assert!(matches!(
            read_frame(&mut reader).await,
            Err(ProtocolError::Closed)
        ));
    }

    #[tokio::test]
    async fn read_frame_reports_truncated_stream() {
        let partial = [Opcode::Register as u8, b'{'];
        let mut reader = BufReader::new(partial.as_slice());
        assert!(matches!(
            read_frame(&mut reader).await,
            Err(ProtocolError::MissingTerminator)
        ));
    }
}
