//! Replication protocol.
//!
//! A single `Command` message replicates state in both directions:
//! server→client for map and entity state, client→server for movement input
//! and resync requests. The payload shape depends solely on the variant, so
//! each message carries only the fields that variant needs.
//!
//! Versioning:
//! - The server stamps a per-session, monotonically increasing `version` on
//!   the commands it authors.
//! - Clients detect missed or reordered updates purely from version gaps and
//!   recover by requesting a resync; the transport owes no ordering.
//! - Client-authored commands (`MoveInput`, `ResyncRequest`) carry
//!   `version = 0` and are not ordered against server state.

use serde::{Deserialize, Serialize};

use crate::grid::MapConfig;
use crate::math::Vec3;

/// Maximum byte length of any wire string field.
pub const MAX_WIRE_STR: usize = 64;

/// Bounded wire string: at most [`MAX_WIRE_STR`] bytes, truncated at a char
/// boundary on construction. Serializes as a plain string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(from = "String", into = "String")]
pub struct Str64(String);

impl Str64 {
    pub fn new(s: &str) -> Self {
        Self::from(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for Str64 {
    fn from(mut s: String) -> Self {
        if s.len() > MAX_WIRE_STR {
            let mut cut = MAX_WIRE_STR;
            while !s.is_char_boundary(cut) {
                cut -= 1;
            }
            s.truncate(cut);
        }
        Self(s)
    }
}

impl From<Str64> for String {
    fn from(s: Str64) -> Self {
        s.0
    }
}

impl From<&str> for Str64 {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl std::fmt::Display for Str64 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Discrete movement direction held by an entity until changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum GridDirection {
    #[default]
    None,
    Up,
    Down,
    Left,
    Right,
}

impl GridDirection {
    /// Cell delta for one step in this direction.
    pub fn delta(self) -> (i32, i32) {
        match self {
            GridDirection::None => (0, 0),
            GridDirection::Up => (0, 1),
            GridDirection::Down => (0, -1),
            GridDirection::Left => (-1, 0),
            GridDirection::Right => (1, 0),
        }
    }
}

/// Entity state snapshot carried by `SpawnEntity` and `UpdateEntity`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EntityState {
    pub entity_id: Str64,
    pub entity_type: Str64,
    /// Stable logical uid of the owning player (optional).
    pub owner_uid: Str64,
    /// Transport connection id; clients identify their local pawn by it.
    pub owner_id: u64,
    pub display_name: Str64,
    pub color_index: i32,
    pub prefab_type: u8,
    pub map_size: Vec3,
    pub world_offset: Vec3,
    pub cell_x: i32,
    pub cell_y: i32,
}

/// Per-variant command payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CommandPayload {
    MapConfig(MapConfig),
    SpawnEntity(EntityState),
    UpdateEntity(EntityState),
    RemoveEntity {
        entity_id: Str64,
    },
    MoveInput {
        entity_id: Str64,
        direction: GridDirection,
        cell_x: i32,
        cell_y: i32,
    },
    ResyncRequest,
}

/// Replication command: common header plus a variant-specific payload.
/// Commands are immutable value objects, produced once and consumed once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub version: i32,
    pub session_uid: Str64,
    pub payload: CommandPayload,
}

impl Command {
    pub fn map_config(session_uid: &str, config: MapConfig) -> Self {
        Self {
            version: 0,
            session_uid: Str64::new(session_uid),
            payload: CommandPayload::MapConfig(config),
        }
    }

    pub fn spawn_entity(session_uid: &str, entity: EntityState, version: i32) -> Self {
        Self {
            version,
            session_uid: Str64::new(session_uid),
            payload: CommandPayload::SpawnEntity(entity),
        }
    }

    pub fn update_entity(session_uid: &str, entity: EntityState, version: i32) -> Self {
        Self {
            version,
            session_uid: Str64::new(session_uid),
            payload: CommandPayload::UpdateEntity(entity),
        }
    }

    pub fn remove_entity(session_uid: &str, entity_id: &str, version: i32) -> Self {
        Self {
            version,
            session_uid: Str64::new(session_uid),
            payload: CommandPayload::RemoveEntity {
                entity_id: Str64::new(entity_id),
            },
        }
    }

    pub fn move_input(
        session_uid: &str,
        entity_id: &str,
        direction: GridDirection,
        cell_x: i32,
        cell_y: i32,
    ) -> Self {
        Self {
            version: 0,
            session_uid: Str64::new(session_uid),
            payload: CommandPayload::MoveInput {
                entity_id: Str64::new(entity_id),
                direction,
                cell_x,
                cell_y,
            },
        }
    }

    pub fn resync_request(session_uid: &str) -> Self {
        Self {
            version: 0,
            session_uid: Str64::new(session_uid),
            payload: CommandPayload::ResyncRequest,
        }
    }
}

/// Encodes a command to its wire form.
pub fn encode(cmd: &Command) -> anyhow::Result<Vec<u8>> {
    Ok(serde_json::to_vec(cmd)?)
}

/// Decodes a command from its wire form.
pub fn decode(bytes: &[u8]) -> anyhow::Result<Command> {
    Ok(serde_json::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::MapShape;

    fn roundtrip(cmd: &Command) -> Command {
        decode(&encode(cmd).unwrap()).unwrap()
    }

    #[test]
    fn str64_truncates_at_char_boundary() {
        let long = "x".repeat(100);
        assert_eq!(Str64::new(&long).as_str().len(), MAX_WIRE_STR);

        // 2-byte chars: 63 bytes fit, the 65th byte would split a char.
        let wide = "é".repeat(40);
        let bounded = Str64::new(&wide);
        assert!(bounded.as_str().len() <= MAX_WIRE_STR);
        assert_eq!(bounded.as_str().len() % 2, 0);
    }

    #[test]
    fn map_config_roundtrip() {
        let cmd = Command::map_config(
            "session-1",
            MapConfig {
                map_name: "arena_small".to_string(),
                shape: MapShape::Circle,
                map_size: Vec3::new(16.0, 0.0, 16.0),
                circle_radius: 8.0,
                grid_width: 16,
                grid_height: 16,
                cell_size: 1.0,
                seed: -77,
                world_offset: Vec3::new(100.0, 0.0, -50.0),
            },
        );
        assert_eq!(roundtrip(&cmd), cmd);
    }

    #[test]
    fn entity_commands_roundtrip() {
        let entity = EntityState {
            entity_id: Str64::new("42"),
            entity_type: Str64::new("player"),
            owner_uid: Str64::new("uid-abc"),
            owner_id: 7,
            display_name: Str64::new("Ada"),
            color_index: 3,
            prefab_type: 1,
            map_size: Vec3::new(10.0, 0.0, 10.0),
            world_offset: Vec3::ZERO,
            cell_x: 4,
            cell_y: -2,
        };
        let spawn = Command::spawn_entity("s", entity.clone(), 5);
        assert_eq!(roundtrip(&spawn), spawn);

        let update = Command::update_entity("s", entity, 6);
        assert_eq!(roundtrip(&update), update);

        let remove = Command::remove_entity("s", "42", 7);
        assert_eq!(roundtrip(&remove), remove);
    }

    #[test]
    fn client_commands_carry_version_zero() {
        let mv = Command::move_input("s", "42", GridDirection::Right, 4, 2);
        assert_eq!(mv.version, 0);
        assert_eq!(roundtrip(&mv), mv);

        let resync = Command::resync_request("s");
        assert_eq!(resync.version, 0);
        assert_eq!(roundtrip(&resync), resync);
    }

    #[test]
    fn direction_deltas() {
        assert_eq!(GridDirection::Up.delta(), (0, 1));
        assert_eq!(GridDirection::Down.delta(), (0, -1));
        assert_eq!(GridDirection::Left.delta(), (-1, 0));
        assert_eq!(GridDirection::Right.delta(), (1, 0));
        assert_eq!(GridDirection::None.delta(), (0, 0));
    }
}
