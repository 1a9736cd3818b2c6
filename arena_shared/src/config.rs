//! Configuration system.
//!
//! Loads configuration from JSON strings/files (file IO left to app).

use serde::{Deserialize, Serialize};

/// Root configuration shared by client/server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArenaConfig {
    /// Server listen address, e.g. `127.0.0.1:41000`.
    pub server_addr: String,
    /// Fixed simulation tick rate.
    pub sim_hz: u32,
    /// Replication sweep rate; dirty entities are flushed at this cadence.
    #[serde(default = "default_replication_hz")]
    pub replication_hz: u32,
    /// Path to maps directory.
    #[serde(default = "default_maps_dir")]
    pub maps_dir: String,
    /// Player name (client only).
    #[serde(default = "default_player_name")]
    pub player_name: String,
    /// Entity movement speed in cells per second.
    #[serde(default = "default_move_speed")]
    pub move_speed: f32,
}

fn default_replication_hz() -> u32 {
    20
}

fn default_maps_dir() -> String {
    "maps".to_string()
}

fn default_player_name() -> String {
    "Player".to_string()
}

fn default_move_speed() -> f32 {
    4.0
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:41000".to_string(),
            sim_hz: 60,
            replication_hz: default_replication_hz(),
            maps_dir: default_maps_dir(),
            player_name: default_player_name(),
            move_speed: default_move_speed(),
        }
    }
}

impl ArenaConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}
