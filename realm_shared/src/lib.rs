//! `realm_shared`
//!
//! Libraries shared by the session server and its clients.
//!
//! Design goals:
//! - Deterministic and modular where practical.
//! - Clear separation of concerns (protocol, player types, config).
//! - No `unsafe`.

pub mod config;
pub mod player;
pub mod protocol;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::config::*;
    pub use crate::player::*;
    pub use crate::protocol::*;
}
