//! Version-gated replica of one session's replicated state.
//!
//! The server stamps every command it authors with a per-session version.
//! The replica applies commands strictly in version order:
//! - a regression (older than what is already applied) is dropped silently,
//! - a gap (newer than the next expected version) means datagrams were lost
//!   and the caller must request a resync,
//! - commands within one sweep or snapshot share a version and all apply.
//!
//! A `MapConfig` starts a fresh snapshot: it clears every entity view and
//! the next entity command re-baselines the version counter, so a resync
//! converges no matter how far behind the replica was.

use std::collections::HashMap;

use tracing::debug;

use arena_shared::grid::MapConfig;
use arena_shared::protocol::{Command, CommandPayload, EntityState, Str64};

/// Result of feeding one command to the replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The command was applied to the replica.
    Applied,
    /// The command was dropped (stale version, foreign session, or a
    /// variant the server never sends).
    Ignored,
    /// State was missed; the caller should send a `ResyncRequest`.
    NeedsResync(&'static str),
}

/// Client-side view of one replicated entity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityView {
    pub entity_type: Str64,
    pub owner_uid: Str64,
    pub owner_id: u64,
    pub display_name: Str64,
    pub color_index: i32,
    pub prefab_type: u8,
    pub cell_x: i32,
    pub cell_y: i32,
}

impl EntityView {
    fn from_state(state: &EntityState) -> Self {
        Self {
            entity_type: state.entity_type.clone(),
            owner_uid: state.owner_uid.clone(),
            owner_id: state.owner_id,
            display_name: state.display_name.clone(),
            color_index: state.color_index,
            prefab_type: state.prefab_type,
            cell_x: state.cell_x,
            cell_y: state.cell_y,
        }
    }
}

/// Mirror of one session's state, driven purely by [`Command`]s.
#[derive(Debug, Default)]
pub struct ClientReplica {
    session_uid: String,
    map_config: Option<MapConfig>,
    entities: HashMap<String, EntityView>,
    last_applied_version: i32,
    /// Set once the first entity command after a `MapConfig` has fixed the
    /// version baseline for this snapshot.
    has_baseline: bool,
}

impl ClientReplica {
    pub fn new(session_uid: &str) -> Self {
        Self {
            session_uid: session_uid.to_string(),
            ..Default::default()
        }
    }

    pub fn session_uid(&self) -> &str {
        &self.session_uid
    }

    pub fn map_config(&self) -> Option<&MapConfig> {
        self.map_config.as_ref()
    }

    pub fn last_applied_version(&self) -> i32 {
        self.last_applied_version
    }

    pub fn entity(&self, entity_id: &str) -> Option<&EntityView> {
        self.entities.get(entity_id)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// The entity owned by the given connection, if replicated.
    pub fn entity_for_owner(&self, owner_id: u64) -> Option<(&str, &EntityView)> {
        self.entities
            .iter()
            .find(|(_, view)| view.owner_id == owner_id)
            .map(|(id, view)| (id.as_str(), view))
    }

    /// Feeds one command through the version gate.
    pub fn apply(&mut self, command: &Command) -> ApplyOutcome {
        if command.session_uid.as_str() != self.session_uid {
            debug!(
                session = %command.session_uid,
                "Dropping command for foreign session"
            );
            return ApplyOutcome::Ignored;
        }

        match &command.payload {
            CommandPayload::MapConfig(config) => {
                self.map_config = Some(config.clone());
                self.entities.clear();
                self.last_applied_version = 0;
                self.has_baseline = false;
                ApplyOutcome::Applied
            }
            CommandPayload::SpawnEntity(state) => {
                if self.map_config.is_none() {
                    return ApplyOutcome::NeedsResync("spawn before map config");
                }
                if !self.has_baseline {
                    // First entity of a snapshot fixes the baseline.
                    self.last_applied_version = command.version;
                    self.has_baseline = true;
                } else {
                    match self.gate(command.version) {
                        Ok(()) => {}
                        Err(outcome) => return outcome,
                    }
                }
                self.entities
                    .insert(state.entity_id.as_str().to_string(), EntityView::from_state(state));
                ApplyOutcome::Applied
            }
            CommandPayload::UpdateEntity(state) => {
                if self.map_config.is_none() || !self.has_baseline {
                    return ApplyOutcome::NeedsResync("update before snapshot");
                }
                if let Err(outcome) = self.gate(command.version) {
                    return outcome;
                }
                // Updates are sparse: only the cell moves.
                match self.entities.get_mut(state.entity_id.as_str()) {
                    Some(view) => {
                        view.cell_x = state.cell_x;
                        view.cell_y = state.cell_y;
                        ApplyOutcome::Applied
                    }
                    None => ApplyOutcome::NeedsResync("update for unknown entity"),
                }
            }
            CommandPayload::RemoveEntity { entity_id } => {
                if self.map_config.is_none() || !self.has_baseline {
                    return ApplyOutcome::NeedsResync("remove before snapshot");
                }
                if let Err(outcome) = self.gate(command.version) {
                    return outcome;
                }
                self.entities.remove(entity_id.as_str());
                ApplyOutcome::Applied
            }
            CommandPayload::MoveInput { .. } | CommandPayload::ResyncRequest => {
                // Client-authored variants never flow server→client.
                ApplyOutcome::Ignored
            }
        }
    }

    /// Version gate: equal versions share a sweep, `last + 1` advances,
    /// anything newer is a gap, anything older is stale.
    fn gate(&mut self, version: i32) -> Result<(), ApplyOutcome> {
        if version < self.last_applied_version {
            return Err(ApplyOutcome::Ignored);
        }
        if version > self.last_applied_version + 1 {
            return Err(ApplyOutcome::NeedsResync("version gap"));
        }
        self.last_applied_version = self.last_applied_version.max(version);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_config_cmd() -> Command {
        Command::map_config(
            "s",
            MapConfig {
                map_name: "arena".to_string(),
                grid_width: 8,
                grid_height: 8,
                cell_size: 1.0,
                ..Default::default()
            },
        )
    }

    fn spawn_cmd(id: &str, version: i32) -> Command {
        Command::spawn_entity(
            "s",
            EntityState {
                entity_id: Str64::new(id),
                entity_type: Str64::new("player"),
                owner_id: 7,
                cell_x: 2,
                cell_y: 3,
                ..Default::default()
            },
            version,
        )
    }

    fn update_cmd(id: &str, version: i32, cell_x: i32, cell_y: i32) -> Command {
        Command::update_entity(
            "s",
            EntityState {
                entity_id: Str64::new(id),
                cell_x,
                cell_y,
                ..Default::default()
            },
            version,
        )
    }

    #[test]
    fn snapshot_then_sequential_updates() {
        let mut replica = ClientReplica::new("s");
        assert_eq!(replica.apply(&map_config_cmd()), ApplyOutcome::Applied);
        assert_eq!(replica.apply(&spawn_cmd("1", 1)), ApplyOutcome::Applied);

        assert_eq!(replica.apply(&update_cmd("1", 2, 3, 3)), ApplyOutcome::Applied);
        assert_eq!(replica.apply(&update_cmd("1", 3, 4, 3)), ApplyOutcome::Applied);
        assert_eq!(replica.entity("1").unwrap().cell_x, 4);
        assert_eq!(replica.last_applied_version(), 3);
    }

    #[test]
    fn updates_in_one_sweep_share_a_version() {
        let mut replica = ClientReplica::new("s");
        replica.apply(&map_config_cmd());
        replica.apply(&spawn_cmd("1", 1));
        replica.apply(&spawn_cmd("2", 1));

        assert_eq!(replica.apply(&update_cmd("1", 2, 3, 3)), ApplyOutcome::Applied);
        assert_eq!(replica.apply(&update_cmd("2", 2, 1, 1)), ApplyOutcome::Applied);
        assert_eq!(replica.last_applied_version(), 2);
    }

    #[test]
    fn version_gap_requests_resync_and_regression_is_dropped() {
        let mut replica = ClientReplica::new("s");
        replica.apply(&map_config_cmd());
        replica.apply(&spawn_cmd("1", 1));
        replica.apply(&update_cmd("1", 2, 3, 3));
        replica.apply(&update_cmd("1", 3, 4, 3));

        // 4 is missing: 5 is a gap.
        assert!(matches!(
            replica.apply(&update_cmd("1", 5, 6, 3)),
            ApplyOutcome::NeedsResync(_)
        ));
        // State untouched by the gapped command.
        assert_eq!(replica.entity("1").unwrap().cell_x, 4);

        // Late duplicate of an old sweep is dropped without complaint.
        assert_eq!(replica.apply(&update_cmd("1", 2, 9, 9)), ApplyOutcome::Ignored);
        assert_eq!(replica.entity("1").unwrap().cell_x, 4);
    }

    #[test]
    fn resync_snapshot_rebaselines_any_version() {
        let mut replica = ClientReplica::new("s");
        replica.apply(&map_config_cmd());
        replica.apply(&spawn_cmd("1", 1));

        // Resync arrives much later: map config clears, spawn re-baselines.
        assert_eq!(replica.apply(&map_config_cmd()), ApplyOutcome::Applied);
        assert_eq!(replica.entity_count(), 0);
        assert_eq!(replica.apply(&spawn_cmd("1", 40)), ApplyOutcome::Applied);
        assert_eq!(replica.apply(&spawn_cmd("2", 40)), ApplyOutcome::Applied);
        assert_eq!(replica.last_applied_version(), 40);
        assert_eq!(replica.apply(&update_cmd("2", 41, 0, 0)), ApplyOutcome::Applied);
    }

    #[test]
    fn update_before_snapshot_requests_resync() {
        let mut replica = ClientReplica::new("s");
        assert!(matches!(
            replica.apply(&update_cmd("1", 1, 0, 0)),
            ApplyOutcome::NeedsResync(_)
        ));
    }

    #[test]
    fn foreign_session_is_ignored() {
        let mut replica = ClientReplica::new("other");
        assert_eq!(replica.apply(&map_config_cmd()), ApplyOutcome::Ignored);
        assert!(replica.map_config().is_none());
    }

    #[test]
    fn remove_entity_drops_view() {
        let mut replica = ClientReplica::new("s");
        replica.apply(&map_config_cmd());
        replica.apply(&spawn_cmd("1", 1));
        replica.apply(&spawn_cmd("2", 1));

        let remove = Command::remove_entity("s", "1", 2);
        assert_eq!(replica.apply(&remove), ApplyOutcome::Applied);
        assert!(replica.entity("1").is_none());
        assert_eq!(replica.entity_count(), 1);
    }

    #[test]
    fn owner_lookup_finds_local_pawn() {
        let mut replica = ClientReplica::new("s");
        replica.apply(&map_config_cmd());
        replica.apply(&spawn_cmd("1", 1));
        let (id, view) = replica.entity_for_owner(7).unwrap();
        assert_eq!(id, "1");
        assert_eq!(view.cell_x, 2);
        assert!(replica.entity_for_owner(8).is_none());
    }
}
