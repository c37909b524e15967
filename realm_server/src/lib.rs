//! `realm_server`
//!
//! The authoritative core of a real-time multiplayer session: a TCP accept
//! loop registering clients as controlled entities, a concurrent entity
//! registry, a fixed-rate simulation tick, and per-tick snapshot broadcast.

pub mod connection;
pub mod registry;
pub mod server;
