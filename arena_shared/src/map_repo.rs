//! Map repository.
//!
//! Loads named map definitions from a maps directory (JSON), tolerating the
//! legacy on-disk variant whose cell array stores bare cell types with no
//! element indices. Falls back to a procedurally sized empty map when no
//! stored definition exists.

use std::path::{Path, PathBuf};

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::grid::{CellCoord, GameElement, GridCellType, GridMap, GridMapConfig};
use crate::math::Vec3;

/// Legacy map file: `cells` is a bare array of cell types, no elements.
/// Read-only compatibility; we never write this form.
#[derive(Debug, Deserialize)]
struct LegacyGridMap {
    config: GridMapConfig,
    cells: Vec<GridCellType>,
}

impl LegacyGridMap {
    fn into_map(self) -> GridMap {
        let mut map = GridMap::create_empty(
            &self.config.map_id,
            self.config.width,
            self.config.height,
            self.config.cell_size,
            self.config.world_offset,
        );
        if self.cells.len() == map.cell_count() {
            for (cell, cell_type) in map.cells.iter_mut().zip(self.cells) {
                cell.cell_type = cell_type;
            }
        }
        map
    }
}

fn map_path(maps_dir: &Path, map_id: &str) -> PathBuf {
    maps_dir.join(format!("{map_id}.json"))
}

/// Loads a stored map definition. Returns `None` when the file is missing,
/// empty, or unparseable in both the current and legacy formats.
pub fn load(maps_dir: &Path, map_id: &str) -> Option<GridMap> {
    if map_id.is_empty() {
        return None;
    }

    let path = map_path(maps_dir, map_id);
    let text = std::fs::read_to_string(&path).ok()?;
    if text.trim().is_empty() {
        return None;
    }

    let mut map = match serde_json::from_str::<GridMap>(&text) {
        Ok(map) if !map.cells.is_empty() => map,
        _ => match serde_json::from_str::<LegacyGridMap>(&text) {
            Ok(legacy) if !legacy.cells.is_empty() => legacy.into_map(),
            _ => {
                warn!(map_id, path = %path.display(), "Stored map unparseable");
                return None;
            }
        },
    };

    let (w, h, s) = (map.config.width, map.config.height, map.config.cell_size);
    map.ensure_size(w, h, s);
    map.ensure_element_defaults();
    map.apply_elements_to_cells_if_unassigned();

    debug!(map_id, cells = map.cells.len(), elements = map.game_elements.len(), "Map loaded");
    Some(map)
}

/// Loads a stored definition or creates an empty map, then re-applies the
/// requested dimensions and world offset either way.
pub fn load_or_create_fallback(
    maps_dir: &Path,
    map_id: &str,
    width: u32,
    height: u32,
    cell_size: f32,
    world_offset: Vec3,
) -> GridMap {
    apply_fallback(load(maps_dir, map_id), map_id, width, height, cell_size, world_offset)
}

/// Resizes an already-loaded map to the requested shape, or creates an empty
/// one. Split out so callers that need to know whether a stored definition
/// existed can `load` once and branch on the `Option` themselves.
pub fn apply_fallback(
    loaded: Option<GridMap>,
    map_id: &str,
    width: u32,
    height: u32,
    cell_size: f32,
    world_offset: Vec3,
) -> GridMap {
    let mut map = match loaded {
        Some(mut map) => {
            map.ensure_size(width, height, cell_size);
            map.set_world_offset(world_offset);
            if map.config.map_id.is_empty() {
                map.config.map_id = map_id.to_string();
            }
            map
        }
        None => {
            debug!(map_id, width, height, "No stored map, creating empty fallback");
            GridMap::create_empty(map_id, width, height, cell_size, world_offset)
        }
    };

    map.ensure_element_defaults();
    map.apply_elements_to_cells_if_unassigned();
    map
}

/// Scatters single-cell wall obstacles over open cells, deterministically for
/// a given seed. The first open cell is left clear so spawn resolution always
/// has somewhere to land.
pub fn generate_obstacles(map: &mut GridMap, seed: i32, count: u32) {
    if count == 0 {
        return;
    }

    let mut rng = StdRng::seed_from_u64(seed as u32 as u64);
    let width = map.config.width as i32;
    let height = map.config.height as i32;
    let reserved = map.find_first_open_cell();

    let mut placed = 0u32;
    // Bounded attempts so a dense map cannot loop forever.
    for _ in 0..count * 8 {
        if placed >= count {
            break;
        }
        let x = rng.gen_range(0..width);
        let y = rng.gen_range(0..height);
        if CellCoord::new(x, y) == reserved || map.get_cell(x, y) != GridCellType::Empty {
            continue;
        }

        map.set_cell(x, y, GridCellType::Wall);
        map.game_elements.push(GameElement {
            id: format!("obstacle_{placed}"),
            cells: vec![CellCoord::new(x, y)],
        });
        placed += 1;
    }

    map.apply_elements_to_cells(true);
}
