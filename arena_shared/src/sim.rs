//! Entity store and grid simulation.
//!
//! `SimWorld` is dense SoA storage for player entities, owned exclusively by
//! the server's fixed-step loop. Rows are kept dense via swap-remove; the
//! id→index map absorbs the index instability, so callers always address
//! entities by id and never hold raw indices across calls.
//!
//! All operations are total over malformed references (unknown id, unknown
//! owner): they return a sentinel instead of failing, and every mutation
//! either fully applies or is a no-op before any column is touched.

use std::collections::{HashMap, HashSet};

use crate::grid::{GridCellType, GridMap, MapConfig, MapShape};
use crate::math::{Quat, Vec3};
use crate::protocol::{GridDirection, Str64};

/// Replicated fields of one entity row.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EntitySnapshot {
    pub entity_id: i32,
    pub prefab_type: u8,
    pub owner_id: u64,
    pub owner_uid: Str64,
    pub display_name: Str64,
    pub color_index: i32,
    pub cell_x: i32,
    pub cell_y: i32,
}

/// Dense SoA world for the server-authoritative simulation.
#[derive(Debug, Default)]
pub struct SimWorld {
    next_entity_id: i32,

    // Dense entity storage, one row per entity across all columns.
    entity_ids: Vec<i32>,
    prefab_types: Vec<u8>,
    owner_ids: Vec<u64>,
    owner_uids: Vec<Str64>,
    display_names: Vec<Str64>,
    color_indices: Vec<i32>,
    cell_xs: Vec<i32>,
    cell_ys: Vec<i32>,
    rotations: Vec<Quat>,
    inputs: Vec<GridDirection>,
    move_progress: Vec<f32>,

    // Lookups
    id_to_index: HashMap<i32, usize>,
    owner_to_entity: HashMap<u64, i32>,

    // Entity ids mutated since the last replication sweep.
    dirty: HashSet<i32>,
}

impl SimWorld {
    pub fn new() -> Self {
        Self {
            next_entity_id: 1,
            ..Default::default()
        }
    }

    pub fn count(&self) -> usize {
        self.entity_ids.len()
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub fn clear_dirty(&mut self) {
        self.dirty.clear();
    }

    pub fn entity_for_owner(&self, owner_id: u64) -> Option<i32> {
        self.owner_to_entity.get(&owner_id).copied()
    }

    pub fn contains(&self, entity_id: i32) -> bool {
        self.id_to_index.contains_key(&entity_id)
    }

    /// Spawns an entity row for an owner. Ids are never reused while the
    /// store lives. Returns `None` when the owner already has an entity:
    /// one pawn per connection.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        &mut self,
        owner_id: u64,
        owner_uid: Str64,
        display_name: Str64,
        color_index: i32,
        prefab_type: u8,
        cell_x: i32,
        cell_y: i32,
    ) -> Option<i32> {
        if self.owner_to_entity.contains_key(&owner_id) {
            return None;
        }

        let entity_id = self.next_entity_id;
        self.next_entity_id += 1;
        let index = self.entity_ids.len();

        self.entity_ids.push(entity_id);
        self.prefab_types.push(prefab_type);
        self.owner_ids.push(owner_id);
        self.owner_uids.push(owner_uid);
        self.display_names.push(display_name);
        self.color_indices.push(color_index);
        self.cell_xs.push(cell_x);
        self.cell_ys.push(cell_y);
        self.rotations.push(Quat::IDENTITY);
        self.inputs.push(GridDirection::None);
        self.move_progress.push(0.0);

        self.id_to_index.insert(entity_id, index);
        self.owner_to_entity.insert(owner_id, entity_id);

        Some(entity_id)
    }

    /// Removes an entity by id. Returns `false` for unknown ids.
    ///
    /// Keeps storage dense by copying the last row into the vacated slot and
    /// fixing both lookup maps for the moved row.
    pub fn remove(&mut self, entity_id: i32) -> bool {
        let Some(&index) = self.id_to_index.get(&entity_id) else {
            return false;
        };

        let owner = self.owner_ids[index];
        if self.owner_to_entity.get(&owner) == Some(&entity_id) {
            self.owner_to_entity.remove(&owner);
        }

        let last = self.entity_ids.len() - 1;
        if index != last {
            self.entity_ids.swap(index, last);
            self.prefab_types.swap(index, last);
            self.owner_ids.swap(index, last);
            self.owner_uids.swap(index, last);
            self.display_names.swap(index, last);
            self.color_indices.swap(index, last);
            self.cell_xs.swap(index, last);
            self.cell_ys.swap(index, last);
            self.rotations.swap(index, last);
            self.inputs.swap(index, last);
            self.move_progress.swap(index, last);

            let moved_id = self.entity_ids[index];
            self.id_to_index.insert(moved_id, index);
            self.owner_to_entity.insert(self.owner_ids[index], moved_id);
        }

        self.entity_ids.pop();
        self.prefab_types.pop();
        self.owner_ids.pop();
        self.owner_uids.pop();
        self.display_names.pop();
        self.color_indices.pop();
        self.cell_xs.pop();
        self.cell_ys.pop();
        self.rotations.pop();
        self.inputs.pop();
        self.move_progress.pop();

        self.id_to_index.remove(&entity_id);
        self.dirty.remove(&entity_id);

        true
    }

    /// Overwrites an owner's pending input. No-op for unknown owners. Does
    /// not mark dirty; movement caused by the input will.
    pub fn set_input(&mut self, owner_id: u64, direction: GridDirection) {
        let Some(&entity_id) = self.owner_to_entity.get(&owner_id) else {
            return;
        };
        let Some(&index) = self.id_to_index.get(&entity_id) else {
            return;
        };
        self.inputs[index] = direction;
    }

    /// Advances movement by one fixed step against the map.
    ///
    /// Progress accumulates at `move_speed * dt` per entity with a pending
    /// direction; each whole unit of progress buys at most one discrete cell
    /// step, so no `dt` can carry an entity across a wall. A rejected step
    /// (out of bounds, wall, degenerate delta) consumes the unit that
    /// triggered it and banks the fractional remainder.
    pub fn step(&mut self, dt: f32, move_speed: f32, map: &GridMap) {
        let speed = move_speed.max(0.0);

        for i in 0..self.entity_ids.len() {
            let dir = self.inputs[i];
            if dir == GridDirection::None {
                continue;
            }

            self.move_progress[i] += speed * dt;
            while self.move_progress[i] >= 1.0 {
                self.move_progress[i] -= 1.0;

                let (dx, dy) = dir.delta();
                let next_x = self.cell_xs[i] + dx;
                let next_y = self.cell_ys[i] + dy;

                if !map.in_bounds(next_x, next_y) {
                    break;
                }
                if map.get_cell(next_x, next_y) == GridCellType::Wall {
                    break;
                }
                if next_x == self.cell_xs[i] && next_y == self.cell_ys[i] {
                    break;
                }

                self.cell_xs[i] = next_x;
                self.cell_ys[i] = next_y;
                self.dirty.insert(self.entity_ids[i]);
            }
        }
    }

    /// Replicated fields of one entity, or `None` for unknown ids.
    pub fn snapshot(&self, entity_id: i32) -> Option<EntitySnapshot> {
        let &index = self.id_to_index.get(&entity_id)?;
        Some(EntitySnapshot {
            entity_id,
            prefab_type: self.prefab_types[index],
            owner_id: self.owner_ids[index],
            owner_uid: self.owner_uids[index].clone(),
            display_name: self.display_names[index].clone(),
            color_index: self.color_indices[index],
            cell_x: self.cell_xs[index],
            cell_y: self.cell_ys[index],
        })
    }

    /// Ids touched since the last `clear_dirty`. Order unspecified.
    pub fn collect_dirty(&self) -> Vec<i32> {
        debug_assert!(self.dirty.iter().all(|id| self.id_to_index.contains_key(id)));
        self.dirty.iter().copied().collect()
    }

    /// All live entity ids in storage order.
    pub fn collect_all(&self) -> Vec<i32> {
        self.entity_ids.clone()
    }
}

/// Clamps a world position into the playable area, keeping `margin` world
/// units away from the edge. For circular arenas the position is rescaled
/// radially, preserving direction from the center; the clamp range collapses
/// to the center when `margin` exceeds the usable extent.
pub fn clamp_to_map(position: Vec3, map_config: &MapConfig, margin: f32) -> Vec3 {
    let offset = map_config.world_offset;

    if map_config.shape == MapShape::Circle {
        let radius = (map_config.circle_radius - margin).max(0.0);
        let dx = position.x - offset.x;
        let dz = position.z - offset.z;
        let dist = (dx * dx + dz * dz).sqrt();

        let mut clamped = position;
        if dist > radius && dist > 1e-4 {
            let scale = radius / dist;
            clamped.x = offset.x + dx * scale;
            clamped.z = offset.z + dz * scale;
        }
        clamped.y = offset.y;
        return clamped;
    }

    let half_w = (map_config.map_size.x.abs() * 0.5 - margin).max(0.0);
    let half_h = (map_config.map_size.z.abs() * 0.5 - margin).max(0.0);

    Vec3::new(
        position.x.clamp(offset.x - half_w, offset.x + half_w),
        offset.y,
        position.z.clamp(offset.z - half_h, offset.z + half_h),
    )
}
