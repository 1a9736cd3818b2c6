//! `arena_client`
//!
//! Client-side systems:
//! - [`replica`]: version-gated mirror of one session's replicated state
//! - [`input`]: sampled input to `MoveInput` commands
//! - [`client`]: connection lifecycle (handshake, join, command pump)
//!
//! The replica is transport-agnostic and fully testable without sockets;
//! the client wires it to the reliable/unreliable channels.

pub mod client;
pub mod input;
pub mod replica;

pub use client::GameClient;
pub use replica::{ApplyOutcome, ClientReplica};
