//! Session management and replication sweeps.
//!
//! One session = one isolated (map, entity store) pair plus a monotonic
//! state version. Sessions never share state, so the manager steps them
//! independently; delivery goes through the [`CommandSink`] seam and is
//! fire-and-forget from the simulation's perspective.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use arena_shared::grid::{GridCellType, GridMap, MapConfig, MapShape};
use arena_shared::map_repo;
use arena_shared::math::Vec3;
use arena_shared::protocol::{Command, CommandPayload, EntityState, GridDirection, Str64};
use arena_shared::sim::SimWorld;

/// Delivery seam for authored commands. Implementations must not block the
/// caller on slow observers; the simulation never retries at this layer.
#[async_trait]
pub trait CommandSink: Send + Sync {
    async fn send(&mut self, targets: &[u64], commands: &[Command]);
}

/// Test sink that records every batch it is asked to deliver.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub batches: Vec<(Vec<u64>, Vec<Command>)>,
}

impl RecordingSink {
    /// All recorded commands addressed to `target`, flattened in send order.
    pub fn commands_for(&self, target: u64) -> Vec<Command> {
        self.batches
            .iter()
            .filter(|(targets, _)| targets.contains(&target))
            .flat_map(|(_, commands)| commands.iter().cloned())
            .collect()
    }
}

#[async_trait]
impl CommandSink for RecordingSink {
    async fn send(&mut self, targets: &[u64], commands: &[Command]) {
        self.batches.push((targets.to_vec(), commands.to_vec()));
    }
}

/// One player's identity when entering a session.
#[derive(Debug, Clone)]
pub struct PlayerSeat {
    pub connection_id: u64,
    pub player_name: String,
    pub player_uid: String,
}

/// Server-side session state.
pub struct SessionInstance {
    pub session_name: String,
    pub session_uid: String,
    pub map_config: MapConfig,
    pub grid_map: GridMap,
    pub world: SimWorld,
    pub player_ids: Vec<u64>,
    version: i32,
}

impl SessionInstance {
    pub fn version(&self) -> i32 {
        self.version
    }

    pub fn bump_version(&mut self) {
        self.version += 1;
    }

    pub fn step(&mut self, dt: f32, move_speed: f32) {
        self.world.step(dt, move_speed, &self.grid_map);
    }

    /// Spawns a player entity at a resolved open cell. Returns the entity id,
    /// or `None` when the connection already owns one.
    pub fn add_player(&mut self, seat: &PlayerSeat, spawn_index: usize, total: usize) -> Option<i32> {
        let spawn_world = spawn_position(spawn_index, total, &self.map_config);
        let mut cell = self.map_config.world_to_cell(spawn_world);

        if !self.map_config.in_bounds(cell.x, cell.y) {
            cell.x = self.map_config.grid_width / 2;
            cell.y = self.map_config.grid_height / 2;
        } else if self.grid_map.get_cell(cell.x, cell.y) == GridCellType::Wall {
            cell = self.grid_map.find_first_open_cell();
        }

        let display_name = if seat.player_name.is_empty() {
            format!("Player {}", seat.connection_id)
        } else {
            seat.player_name.clone()
        };

        let entity_id = self.world.spawn(
            seat.connection_id,
            Str64::new(&seat.player_uid),
            Str64::new(&display_name),
            spawn_index as i32,
            0,
            cell.x,
            cell.y,
        )?;

        self.player_ids.push(seat.connection_id);
        Some(entity_id)
    }

    /// Full replication state for one entity, stamped with `version`.
    pub fn build_spawn_command(&self, entity_id: i32, version: i32) -> Option<Command> {
        let snap = self.world.snapshot(entity_id)?;
        Some(Command::spawn_entity(
            &self.session_uid,
            EntityState {
                entity_id: Str64::new(&entity_id.to_string()),
                entity_type: Str64::new("player"),
                owner_uid: snap.owner_uid,
                owner_id: snap.owner_id,
                display_name: snap.display_name,
                color_index: snap.color_index,
                prefab_type: snap.prefab_type,
                map_size: self.map_config.map_size,
                world_offset: self.map_config.world_offset,
                cell_x: snap.cell_x,
                cell_y: snap.cell_y,
            },
            version,
        ))
    }

    /// Delta update: id and cell only, the rest stays at wire defaults.
    pub fn build_update_command(&self, entity_id: i32, version: i32) -> Option<Command> {
        let snap = self.world.snapshot(entity_id)?;
        Some(Command::update_entity(
            &self.session_uid,
            EntityState {
                entity_id: Str64::new(&entity_id.to_string()),
                cell_x: snap.cell_x,
                cell_y: snap.cell_y,
                ..Default::default()
            },
            version,
        ))
    }

    /// Map config followed by one spawn per live entity, all at the current
    /// version. Snapshots never bump the version.
    pub fn full_snapshot_commands(&self, include_map_config: bool) -> Vec<Command> {
        let mut commands = Vec::new();
        if include_map_config {
            commands.push(Command::map_config(&self.session_uid, self.map_config.clone()));
        }
        for entity_id in self.world.collect_all() {
            if let Some(cmd) = self.build_spawn_command(entity_id, self.version) {
                commands.push(cmd);
            }
        }
        commands
    }
}

/// Evenly spaced spawn positions on a ring around the arena center.
fn spawn_position(index: usize, total: usize, config: &MapConfig) -> Vec3 {
    let half_w = config.map_size.x.abs() * 0.5;
    let half_h = config.map_size.z.abs() * 0.5;
    let radius = half_w.min(half_h) * 0.5;
    let angle = std::f32::consts::TAU * index as f32 / total.max(1) as f32;
    config.world_offset + Vec3::new(radius * angle.cos(), 0.0, radius * angle.sin())
}

/// FNV-1a 32-bit hash of the session uid and world offset; gives each
/// session deterministic procedural content.
fn compute_seed(session_uid: &str, world_offset: Vec3) -> i32 {
    let mut hash: u32 = 2166136261;
    for b in session_uid.bytes() {
        hash ^= b as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash ^= (world_offset.x * 10.0).round() as i32 as u32;
    hash = hash.wrapping_mul(16777619);
    hash ^= (world_offset.z * 10.0).round() as i32 as u32;
    hash = hash.wrapping_mul(16777619);
    hash as i32
}

/// Owns every active session. Single-writer: the server loop calls into the
/// manager from one task; cross-session work shares no mutable state.
pub struct SessionManager {
    maps_dir: PathBuf,
    move_speed: f32,
    by_name: BTreeMap<String, SessionInstance>,
    uid_to_name: BTreeMap<String, String>,
}

impl SessionManager {
    pub fn new(maps_dir: PathBuf, move_speed: f32) -> Self {
        Self {
            maps_dir,
            move_speed,
            by_name: BTreeMap::new(),
            uid_to_name: BTreeMap::new(),
        }
    }

    pub fn session_count(&self) -> usize {
        self.by_name.len()
    }

    pub fn instance(&self, session_name: &str) -> Option<&SessionInstance> {
        self.by_name.get(session_name)
    }

    pub fn instance_by_uid(&self, session_uid: &str) -> Option<&SessionInstance> {
        self.uid_to_name
            .get(session_uid)
            .and_then(|name| self.by_name.get(name))
    }

    /// Creates a session: resolves the map (stored definition or procedural
    /// fallback), carves circular arenas, scatters seeded obstacles on fresh
    /// maps, and spawns one entity per seated player. Fans the initial
    /// snapshot out to all seats.
    pub async fn create_session(
        &mut self,
        session_name: &str,
        session_uid: &str,
        map_config: MapConfig,
        seats: &[PlayerSeat],
        sink: &mut dyn CommandSink,
    ) -> bool {
        if session_name.is_empty() || session_uid.is_empty() {
            warn!(session_name, "Rejecting session with missing identifiers");
            return false;
        }
        if self.by_name.contains_key(session_name) || self.uid_to_name.contains_key(session_uid) {
            warn!(session_name, "Session already active");
            return false;
        }

        let mut config = map_config.normalized();
        if config.seed == 0 {
            config.seed = compute_seed(session_uid, config.world_offset);
        }

        let loaded = map_repo::load(&self.maps_dir, &config.map_name);
        let stored = loaded.is_some();
        let mut grid_map = map_repo::apply_fallback(
            loaded,
            &config.map_name,
            config.grid_width.max(1) as u32,
            config.grid_height.max(1) as u32,
            config.cell_size,
            config.world_offset,
        );

        if config.shape == MapShape::Circle {
            grid_map.apply_circle_mask(config.circle_radius);
        }
        if !stored {
            let obstacles = (config.grid_width * config.grid_height / 24).max(0) as u32;
            map_repo::generate_obstacles(&mut grid_map, config.seed, obstacles);
        }

        let mut instance = SessionInstance {
            session_name: session_name.to_string(),
            session_uid: session_uid.to_string(),
            map_config: config,
            grid_map,
            world: SimWorld::new(),
            player_ids: Vec::new(),
            version: 1,
        };

        for (i, seat) in seats.iter().enumerate() {
            if instance.add_player(seat, i, seats.len()).is_none() {
                warn!(
                    session_name,
                    connection_id = seat.connection_id,
                    "Seat already owns an entity, skipping"
                );
            }
        }

        info!(
            session_name,
            session_uid,
            players = instance.player_ids.len(),
            map = %instance.map_config.map_name,
            "Session created"
        );

        let snapshot = instance.full_snapshot_commands(true);
        let targets = instance.player_ids.clone();
        self.uid_to_name
            .insert(session_uid.to_string(), session_name.to_string());
        self.by_name.insert(session_name.to_string(), instance);

        if !targets.is_empty() {
            sink.send(&targets, &snapshot).await;
        }
        true
    }

    pub fn destroy_session(&mut self, session_name: &str) -> bool {
        let Some(instance) = self.by_name.remove(session_name) else {
            return false;
        };
        self.uid_to_name.remove(&instance.session_uid);
        info!(session_name, "Session destroyed");
        true
    }

    /// Adds a late joiner: spawns their entity, announces it to the existing
    /// observers at the bumped version, then sends the joiner a full snapshot.
    pub async fn add_player_to_session(
        &mut self,
        session_name: &str,
        seat: PlayerSeat,
        sink: &mut dyn CommandSink,
    ) -> Option<i32> {
        let instance = self.by_name.get_mut(session_name)?;
        let join_index = instance.player_ids.len();
        let total = join_index + 1;
        let entity_id = instance.add_player(&seat, join_index, total)?;
        instance.bump_version();

        let others: Vec<u64> = instance
            .player_ids
            .iter()
            .copied()
            .filter(|&id| id != seat.connection_id)
            .collect();
        if !others.is_empty() {
            if let Some(cmd) = instance.build_spawn_command(entity_id, instance.version) {
                sink.send(&others, &[cmd]).await;
            }
        }

        let snapshot = instance.full_snapshot_commands(true);
        sink.send(&[seat.connection_id], &snapshot).await;

        debug!(session_name, entity_id, connection_id = seat.connection_id, "Player joined");
        Some(entity_id)
    }

    /// Removes a player's entity and announces the removal to the remaining
    /// observers. A session whose last player leaves is destroyed.
    pub async fn remove_player_from_session(
        &mut self,
        session_name: &str,
        connection_id: u64,
        sink: &mut dyn CommandSink,
    ) -> bool {
        let Some(instance) = self.by_name.get_mut(session_name) else {
            return false;
        };
        let Some(entity_id) = instance.world.entity_for_owner(connection_id) else {
            instance.player_ids.retain(|&id| id != connection_id);
            if instance.player_ids.is_empty() {
                self.destroy_session(session_name);
            }
            return false;
        };

        instance.bump_version();
        instance.world.remove(entity_id);
        instance.player_ids.retain(|&id| id != connection_id);

        if !instance.player_ids.is_empty() {
            let cmd = Command::remove_entity(
                &instance.session_uid,
                &entity_id.to_string(),
                instance.version,
            );
            sink.send(&instance.player_ids.clone(), &[cmd]).await;
        }

        let emptied = instance.player_ids.is_empty();
        debug!(session_name, entity_id, connection_id, "Player removed");
        if emptied {
            self.destroy_session(session_name);
        }
        true
    }

    pub fn set_player_input(&mut self, session_uid: &str, connection_id: u64, direction: GridDirection) {
        let Some(name) = self.uid_to_name.get(session_uid) else {
            return;
        };
        if let Some(instance) = self.by_name.get_mut(name) {
            instance.world.set_input(connection_id, direction);
        }
    }

    /// Applies one client-authored command.
    pub async fn handle_command(
        &mut self,
        connection_id: u64,
        command: &Command,
        sink: &mut dyn CommandSink,
    ) {
        match &command.payload {
            CommandPayload::MoveInput { direction, .. } => {
                self.set_player_input(command.session_uid.as_str(), connection_id, *direction);
            }
            CommandPayload::ResyncRequest => {
                self.send_full_snapshot_by_uid(command.session_uid.as_str(), connection_id, sink)
                    .await;
            }
            _ => {
                debug!(connection_id, "Ignoring server-authored command from client");
            }
        }
    }

    /// Full snapshot (map + spawns) to a single observer; does not change
    /// authoritative state or version.
    pub async fn send_full_snapshot_by_uid(
        &self,
        session_uid: &str,
        target: u64,
        sink: &mut dyn CommandSink,
    ) {
        let Some(instance) = self.instance_by_uid(session_uid) else {
            warn!(session_uid, "Resync requested for unknown session");
            return;
        };
        let snapshot = instance.full_snapshot_commands(true);
        sink.send(&[target], &snapshot).await;
    }

    /// Advances every session by one fixed step.
    pub fn step_all(&mut self, dt: f32) {
        for instance in self.by_name.values_mut() {
            instance.step(dt, self.move_speed);
        }
    }

    /// Drains each session's dirty set into `UpdateEntity` commands, bumping
    /// the version once per session per sweep.
    pub async fn replicate_dirty(&mut self, sink: &mut dyn CommandSink) {
        for instance in self.by_name.values_mut() {
            if !instance.world.is_dirty() {
                continue;
            }

            instance.bump_version();
            let mut dirty = instance.world.collect_dirty();
            dirty.sort_unstable();

            let commands: Vec<Command> = dirty
                .iter()
                .filter_map(|&id| instance.build_update_command(id, instance.version))
                .collect();
            instance.world.clear_dirty();

            if !commands.is_empty() && !instance.player_ids.is_empty() {
                sink.send(&instance.player_ids.clone(), &commands).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect_config(name: &str, w: i32, h: i32) -> MapConfig {
        MapConfig {
            map_name: name.to_string(),
            grid_width: w,
            grid_height: h,
            cell_size: 1.0,
            ..Default::default()
        }
    }

    fn seat(connection_id: u64) -> PlayerSeat {
        PlayerSeat {
            connection_id,
            player_name: format!("P{connection_id}"),
            player_uid: format!("uid-{connection_id}"),
        }
    }

    fn manager() -> SessionManager {
        SessionManager::new(PathBuf::from("maps-that-do-not-exist"), 4.0)
    }

    #[tokio::test]
    async fn create_session_sends_snapshot_to_all_seats() {
        let mut mgr = manager();
        let mut sink = RecordingSink::default();

        let ok = mgr
            .create_session("game-1", "uid-1", rect_config("arena", 8, 8), &[seat(1), seat(2)], &mut sink)
            .await;
        assert!(ok);

        let received = sink.commands_for(1);
        assert!(matches!(received[0].payload, CommandPayload::MapConfig(_)));
        let spawns = received
            .iter()
            .filter(|c| matches!(c.payload, CommandPayload::SpawnEntity(_)))
            .count();
        assert_eq!(spawns, 2);
        // Initial snapshot is stamped with the starting version.
        assert!(received[1..].iter().all(|c| c.version == 1));
    }

    #[tokio::test]
    async fn duplicate_session_rejected() {
        let mut mgr = manager();
        let mut sink = RecordingSink::default();
        assert!(mgr.create_session("g", "u", rect_config("a", 4, 4), &[], &mut sink).await);
        assert!(!mgr.create_session("g", "u2", rect_config("a", 4, 4), &[], &mut sink).await);
        assert!(!mgr.create_session("g2", "u", rect_config("a", 4, 4), &[], &mut sink).await);
    }

    #[tokio::test]
    async fn dirty_sweep_bumps_version_once() {
        let mut mgr = manager();
        let mut sink = RecordingSink::default();
        mgr.create_session("g", "u", rect_config("a", 8, 8), &[seat(1), seat(2)], &mut sink)
            .await;

        sink.batches.clear();
        mgr.set_player_input("u", 1, GridDirection::Right);
        mgr.set_player_input("u", 2, GridDirection::Up);
        // One second at 4 cells/sec, in fixed steps.
        for _ in 0..10 {
            mgr.step_all(0.1);
        }
        mgr.replicate_dirty(&mut sink).await;

        let updates: Vec<Command> = sink
            .commands_for(1)
            .into_iter()
            .filter(|c| matches!(c.payload, CommandPayload::UpdateEntity(_)))
            .collect();
        assert_eq!(updates.len(), 2);
        // One bump per sweep, shared by every command in the batch.
        assert!(updates.iter().all(|c| c.version == 2));

        // Nothing dirty, nothing sent.
        sink.batches.clear();
        mgr.replicate_dirty(&mut sink).await;
        assert!(sink.batches.is_empty());

        // Next movement sweeps at the next version.
        mgr.set_player_input("u", 1, GridDirection::Left);
        mgr.set_player_input("u", 2, GridDirection::Down);
        for _ in 0..10 {
            mgr.step_all(0.1);
        }
        mgr.replicate_dirty(&mut sink).await;
        let later = sink.commands_for(2);
        assert!(!later.is_empty());
        assert!(later.iter().all(|c| c.version == 3));
    }

    #[tokio::test]
    async fn resync_request_gets_full_snapshot() {
        let mut mgr = manager();
        let mut sink = RecordingSink::default();
        mgr.create_session("g", "u", rect_config("a", 6, 6), &[seat(1)], &mut sink).await;

        sink.batches.clear();
        let resync = Command::resync_request("u");
        mgr.handle_command(1, &resync, &mut sink).await;

        let received = sink.commands_for(1);
        assert!(matches!(received[0].payload, CommandPayload::MapConfig(_)));
        assert!(matches!(received[1].payload, CommandPayload::SpawnEntity(_)));
    }

    #[tokio::test]
    async fn remove_player_announces_removal() {
        let mut mgr = manager();
        let mut sink = RecordingSink::default();
        mgr.create_session("g", "u", rect_config("a", 6, 6), &[seat(1), seat(2)], &mut sink)
            .await;

        sink.batches.clear();
        assert!(mgr.remove_player_from_session("g", 2, &mut sink).await);

        let received = sink.commands_for(1);
        assert_eq!(received.len(), 1);
        assert!(matches!(received[0].payload, CommandPayload::RemoveEntity { .. }));
        assert_eq!(received[0].version, 2);
        assert_eq!(mgr.instance("g").unwrap().world.count(), 1);
    }

    #[tokio::test]
    async fn last_player_leaving_destroys_session() {
        let mut mgr = manager();
        let mut sink = RecordingSink::default();
        mgr.create_session("g", "u", rect_config("a", 6, 6), &[seat(1), seat(2)], &mut sink)
            .await;

        assert!(mgr.remove_player_from_session("g", 1, &mut sink).await);
        assert!(mgr.instance("g").is_some());

        assert!(mgr.remove_player_from_session("g", 2, &mut sink).await);
        assert!(mgr.instance("g").is_none());
        assert_eq!(mgr.session_count(), 0);

        // The uid is free again for a fresh session.
        assert!(mgr.create_session("g", "u", rect_config("a", 6, 6), &[seat(3)], &mut sink).await);
    }

    #[test]
    fn seed_is_deterministic_and_offset_sensitive() {
        let a = compute_seed("session", Vec3::ZERO);
        let b = compute_seed("session", Vec3::ZERO);
        let c = compute_seed("session", Vec3::new(10.0, 0.0, 0.0));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
