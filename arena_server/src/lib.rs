//! `arena_server`
//!
//! Server-side systems:
//! - Per-session authoritative simulation (map + entity store + version)
//! - Dirty-entity replication sweeps and full-snapshot resync
//! - Receives `MoveInput`/`ResyncRequest` commands
//! - Fixed timestep loop
//!
//! Networking model:
//! - TCP: handshake/join control plane
//! - UDP: gameplay plane (commands in both directions)

pub mod server;
pub mod session;

pub use server::GameServer;
pub use session::{CommandSink, SessionManager};
