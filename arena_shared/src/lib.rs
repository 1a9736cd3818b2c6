//! `arena_shared`
//!
//! Shared libraries used by both the arena client and server.
//!
//! Design goals:
//! - Deterministic fixed-step simulation over a grid map.
//! - Compact, versioned replication commands (server-authoritative).
//! - Clear separation of concerns (grid, sim, protocol, net, config).
//! - No `unsafe`.

pub mod config;
pub mod grid;
pub mod map_repo;
pub mod math;
pub mod net;
pub mod protocol;
pub mod sim;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::config::*;
    pub use crate::grid::*;
    pub use crate::math::*;
    pub use crate::net::*;
    pub use crate::protocol::*;
    pub use crate::sim::*;
}
