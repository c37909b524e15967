//! Configuration system.
//!
//! Loads server configuration from JSON strings/files (file IO left to app).

use serde::{Deserialize, Serialize};

/// Root configuration for the session server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address, e.g. `127.0.0.1:5000`.
    pub bind_addr: String,
    /// Fixed simulation tick rate.
    pub tick_hz: u32,
    /// Connection admission cap.
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
}

fn default_max_clients() -> usize {
    16
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:5000".to_string(),
            tick_hz: 30,
            max_clients: default_max_clients(),
        }
    }
}

impl ServerConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Duration of one simulation tick.
    pub fn tick_period(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f32(1.0 / self.tick_hz.max(1) as f32)
    }
}
