//! Grid map model.
//!
//! A map is a row-major array of cells plus a list of static game elements
//! (multi-cell features such as obstacles). The cell array shape is fixed by
//! the config; contents are only mutated during map setup, never by the
//! simulation step.

use serde::{Deserialize, Serialize};

use crate::math::Vec3;

/// Minimum cell size in world units. Dimensions are clamped on construction
/// and on any resize, never rejected.
pub const MIN_CELL_SIZE: f32 = 0.01;

/// Sentinel element index meaning "no element assigned".
pub const NO_ELEMENT: i32 = -1;

/// Per-cell classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum GridCellType {
    #[default]
    Empty,
    Wall,
    Spawn,
    Goal,
}

/// Integer cell coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CellCoord {
    pub x: i32,
    pub y: i32,
}

impl CellCoord {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Static multi-cell map feature (obstacle, decoration footprint, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct GameElement {
    pub id: String,
    pub cells: Vec<CellCoord>,
}

/// One grid cell: its type plus the index of the element occupying it
/// (`NO_ELEMENT` when unoccupied).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    pub cell_type: GridCellType,
    #[serde(default = "no_element")]
    pub element_index: i32,
}

fn no_element() -> i32 {
    NO_ELEMENT
}

impl Default for Cell {
    fn default() -> Self {
        Self {
            cell_type: GridCellType::Empty,
            element_index: NO_ELEMENT,
        }
    }
}

/// Immutable-shape map configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GridMapConfig {
    pub map_id: String,
    pub width: u32,
    pub height: u32,
    pub cell_size: f32,
    #[serde(default)]
    pub world_offset: Vec3,
}

/// Grid map: config, row-major cell array, element list.
///
/// Invariants:
/// - `cells.len() == width * height` at all times.
/// - Every `element_index` is `NO_ELEMENT` or a valid index into
///   `game_elements`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GridMap {
    pub config: GridMapConfig,
    pub cells: Vec<Cell>,
    #[serde(default)]
    pub game_elements: Vec<GameElement>,
}

impl GridMap {
    /// Creates a map with all cells `Empty` and no elements.
    pub fn create_empty(
        map_id: &str,
        width: u32,
        height: u32,
        cell_size: f32,
        world_offset: Vec3,
    ) -> Self {
        let config = GridMapConfig {
            map_id: map_id.to_string(),
            width: width.max(1),
            height: height.max(1),
            cell_size: cell_size.max(MIN_CELL_SIZE),
            world_offset,
        };
        let cells = vec![Cell::default(); (config.width * config.height) as usize];
        Self {
            config,
            cells,
            game_elements: Vec::new(),
        }
    }

    pub fn cell_count(&self) -> usize {
        (self.config.width * self.config.height) as usize
    }

    /// Resizes the cell array, preserving contents in row-major order up to
    /// `min(old_len, new_len)`.
    pub fn ensure_size(&mut self, width: u32, height: u32, cell_size: f32) {
        self.config.width = width.max(1);
        self.config.height = height.max(1);
        self.config.cell_size = cell_size.max(MIN_CELL_SIZE);

        let expected = self.cell_count();
        if self.cells.len() != expected {
            let mut new_cells = vec![Cell::default(); expected];
            let keep = self.cells.len().min(expected);
            new_cells[..keep].copy_from_slice(&self.cells[..keep]);
            self.cells = new_cells;
        }
    }

    pub fn set_world_offset(&mut self, offset: Vec3) {
        self.config.world_offset = offset;
    }

    fn index(&self, x: i32, y: i32) -> usize {
        (y as usize * self.config.width as usize) + x as usize
    }

    pub fn in_bounds(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && x < self.config.width as i32 && y < self.config.height as i32
    }

    /// Out-of-bounds reads return `Empty`.
    pub fn get_cell(&self, x: i32, y: i32) -> GridCellType {
        if !self.in_bounds(x, y) {
            return GridCellType::Empty;
        }
        self.cells[self.index(x, y)].cell_type
    }

    /// Out-of-bounds writes are no-ops.
    pub fn set_cell(&mut self, x: i32, y: i32, value: GridCellType) {
        if !self.in_bounds(x, y) {
            return;
        }
        let i = self.index(x, y);
        self.cells[i].cell_type = value;
    }

    pub fn cell_element_index(&self, x: i32, y: i32) -> i32 {
        if !self.in_bounds(x, y) {
            return NO_ELEMENT;
        }
        self.cells[self.index(x, y)].element_index
    }

    pub fn set_cell_element_index(&mut self, x: i32, y: i32, element_index: i32) {
        if !self.in_bounds(x, y) {
            return;
        }
        let i = self.index(x, y);
        self.cells[i].element_index = element_index;
    }

    pub fn clear_cell_element(&mut self, x: i32, y: i32) {
        self.set_cell_element_index(x, y, NO_ELEMENT);
    }

    pub fn clear_all_cell_elements(&mut self) {
        for cell in &mut self.cells {
            cell.element_index = NO_ELEMENT;
        }
    }

    /// Resets any element index that does not point into `game_elements`.
    pub fn ensure_element_defaults(&mut self) {
        if self.game_elements.is_empty() {
            self.clear_all_cell_elements();
            return;
        }
        let len = self.game_elements.len() as i32;
        for cell in &mut self.cells {
            if cell.element_index < 0 || cell.element_index >= len {
                cell.element_index = NO_ELEMENT;
            }
        }
    }

    /// Writes each element's index into its cells. Out-of-bounds coordinates
    /// are silently skipped. On overlap the last element in array order wins;
    /// this tie-break is deliberate and relied upon.
    ///
    /// With `clear_existing` the operation is idempotent.
    pub fn apply_elements_to_cells(&mut self, clear_existing: bool) {
        if clear_existing {
            self.clear_all_cell_elements();
        }
        if self.game_elements.is_empty() {
            return;
        }
        let elements = std::mem::take(&mut self.game_elements);
        for (i, element) in elements.iter().enumerate() {
            for coord in &element.cells {
                self.set_cell_element_index(coord.x, coord.y, i as i32);
            }
        }
        self.game_elements = elements;
    }

    /// Applies elements only when no cell has an assignment yet. Used after
    /// loading legacy maps whose cell array carries no element indices.
    pub fn apply_elements_to_cells_if_unassigned(&mut self) {
        if self.game_elements.is_empty() {
            return;
        }
        if !self.cells.iter().any(|c| c.element_index >= 0) {
            self.apply_elements_to_cells(true);
        }
    }

    /// Turns every cell whose world-space center lies farther than `radius`
    /// from the world offset into a `Wall` and clears its element. Used to
    /// carve circular arenas out of rectangular storage.
    pub fn apply_circle_mask(&mut self, radius: f32) {
        let r = radius.max(0.0);
        let r_sq = r * r;
        let size = self.config.cell_size.max(MIN_CELL_SIZE);
        let half = Vec3::new(
            self.config.width as f32 * size * 0.5,
            0.0,
            self.config.height as f32 * size * 0.5,
        );
        let origin = self.config.world_offset - half;

        for y in 0..self.config.height as i32 {
            for x in 0..self.config.width as i32 {
                let world = origin
                    + Vec3::new((x as f32 + 0.5) * size, 0.0, (y as f32 + 0.5) * size);
                let delta = world - self.config.world_offset;
                if delta.x * delta.x + delta.z * delta.z > r_sq {
                    self.set_cell(x, y, GridCellType::Wall);
                    self.clear_cell_element(x, y);
                }
            }
        }
    }

    /// First non-`Wall` cell in row-major order, falling back to (0,0).
    pub fn find_first_open_cell(&self) -> CellCoord {
        for y in 0..self.config.height as i32 {
            for x in 0..self.config.width as i32 {
                if self.get_cell(x, y) != GridCellType::Wall {
                    return CellCoord::new(x, y);
                }
            }
        }
        CellCoord::new(0, 0)
    }
}

/// Arena outline replicated to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum MapShape {
    #[default]
    Rect,
    Circle,
}

/// Arena configuration replicated from server to clients. Clients use it to
/// rebuild the playable area deterministically; `world_offset` isolates
/// concurrently running sessions in world space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MapConfig {
    pub map_name: String,
    pub shape: MapShape,
    /// Rect: x = width, z = height in world units. Circle: diameter in x/z.
    pub map_size: Vec3,
    pub circle_radius: f32,
    pub grid_width: i32,
    pub grid_height: i32,
    pub cell_size: f32,
    pub seed: i32,
    pub world_offset: Vec3,
}

impl MapConfig {
    /// Fills in whichever of grid dimensions / world size is missing from the
    /// other, so a config stays usable no matter which form the producer
    /// populated.
    pub fn normalized(mut self) -> Self {
        let size = self.cell_size.max(MIN_CELL_SIZE);
        self.cell_size = size;

        if self.grid_width <= 0 || self.grid_height <= 0 {
            self.grid_width = ((self.map_size.x.abs() / size).round() as i32).max(1);
            self.grid_height = ((self.map_size.z.abs() / size).round() as i32).max(1);
        }

        if self.map_size.len_sq() <= 1e-4 {
            self.map_size = Vec3::new(
                self.grid_width as f32 * size,
                0.0,
                self.grid_height as f32 * size,
            );
        }

        self
    }

    /// World-space position of cell (0,0)'s min corner:
    /// `world_offset - half_extent`.
    pub fn origin(&self) -> Vec3 {
        let size = self.cell_size.max(MIN_CELL_SIZE);
        let w = self.grid_width.max(1) as f32 * size;
        let h = self.grid_height.max(1) as f32 * size;
        self.world_offset - Vec3::new(w * 0.5, 0.0, h * 0.5)
    }

    /// World-space center of a cell. Exact inverse of `world_to_cell` at
    /// cell centers.
    pub fn cell_to_world(&self, cell_x: i32, cell_y: i32) -> Vec3 {
        let size = self.cell_size.max(MIN_CELL_SIZE);
        self.origin() + Vec3::new((cell_x as f32 + 0.5) * size, 0.0, (cell_y as f32 + 0.5) * size)
    }

    pub fn world_to_cell(&self, world: Vec3) -> CellCoord {
        let size = self.cell_size.max(MIN_CELL_SIZE);
        let origin = self.origin();
        CellCoord::new(
            ((world.x - origin.x) / size).floor() as i32,
            ((world.z - origin.z) / size).floor() as i32,
        )
    }

    pub fn in_bounds(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && x < self.grid_width && y < self.grid_height
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_config(width: i32, height: i32, cell_size: f32, offset: Vec3) -> MapConfig {
        MapConfig {
            map_name: "test".to_string(),
            grid_width: width,
            grid_height: height,
            cell_size,
            world_offset: offset,
            ..Default::default()
        }
        .normalized()
    }

    #[test]
    fn create_empty_clamps_dimensions() {
        let map = GridMap::create_empty("m", 0, 0, 0.0, Vec3::ZERO);
        assert_eq!(map.config.width, 1);
        assert_eq!(map.config.height, 1);
        assert_eq!(map.config.cell_size, MIN_CELL_SIZE);
        assert_eq!(map.cells.len(), 1);
    }

    #[test]
    fn out_of_bounds_access_is_neutral() {
        let mut map = GridMap::create_empty("m", 3, 3, 1.0, Vec3::ZERO);
        assert_eq!(map.get_cell(-1, 0), GridCellType::Empty);
        assert_eq!(map.get_cell(3, 3), GridCellType::Empty);
        map.set_cell(99, 99, GridCellType::Wall);
        assert!(map.cells.iter().all(|c| c.cell_type == GridCellType::Empty));
    }

    #[test]
    fn ensure_size_preserves_row_major_prefix() {
        let mut map = GridMap::create_empty("m", 4, 4, 1.0, Vec3::ZERO);
        map.set_cell(1, 0, GridCellType::Wall);
        map.set_cell(3, 0, GridCellType::Goal);

        map.ensure_size(2, 8, 1.0);
        assert_eq!(map.cells.len(), 16);
        // Linear index 1 survives; linear index 3 maps to (1,1) in the new shape.
        assert_eq!(map.get_cell(1, 0), GridCellType::Wall);
        assert_eq!(map.get_cell(1, 1), GridCellType::Goal);

        map.ensure_size(1, 1, 1.0);
        assert_eq!(map.cells.len(), 1);
        assert_eq!(map.get_cell(0, 0), GridCellType::Empty);
    }

    #[test]
    fn apply_elements_last_one_wins_and_is_idempotent() {
        let mut map = GridMap::create_empty("m", 3, 3, 1.0, Vec3::ZERO);
        map.game_elements = vec![
            GameElement {
                id: "a".to_string(),
                cells: vec![CellCoord::new(1, 1), CellCoord::new(2, 1)],
            },
            GameElement {
                id: "b".to_string(),
                // Overlaps element "a" at (1,1) and goes out of bounds.
                cells: vec![CellCoord::new(1, 1), CellCoord::new(9, 9)],
            },
        ];

        map.apply_elements_to_cells(true);
        assert_eq!(map.cell_element_index(1, 1), 1);
        assert_eq!(map.cell_element_index(2, 1), 0);
        assert_eq!(map.cell_element_index(0, 0), NO_ELEMENT);

        let snapshot = map.cells.clone();
        map.apply_elements_to_cells(true);
        assert_eq!(map.cells, snapshot);
    }

    #[test]
    fn apply_elements_with_clear_wipes_stale_indices_when_empty() {
        let mut map = GridMap::create_empty("m", 2, 2, 1.0, Vec3::ZERO);
        map.set_cell_element_index(1, 0, 3);

        map.apply_elements_to_cells(true);
        assert_eq!(map.cell_element_index(1, 0), NO_ELEMENT);
    }

    #[test]
    fn ensure_element_defaults_resets_dangling_indices() {
        let mut map = GridMap::create_empty("m", 2, 2, 1.0, Vec3::ZERO);
        map.game_elements = vec![GameElement {
            id: "a".to_string(),
            cells: vec![CellCoord::new(0, 0)],
        }];
        map.set_cell_element_index(0, 0, 0);
        map.set_cell_element_index(1, 1, 7);
        map.ensure_element_defaults();
        assert_eq!(map.cell_element_index(0, 0), 0);
        assert_eq!(map.cell_element_index(1, 1), NO_ELEMENT);
    }

    #[test]
    fn circle_mask_walls_corners_and_clears_elements() {
        let mut map = GridMap::create_empty("m", 9, 9, 1.0, Vec3::ZERO);
        map.game_elements = vec![GameElement {
            id: "corner".to_string(),
            cells: vec![CellCoord::new(0, 0)],
        }];
        map.apply_elements_to_cells(true);

        map.apply_circle_mask(3.0);
        assert_eq!(map.get_cell(0, 0), GridCellType::Wall);
        assert_eq!(map.cell_element_index(0, 0), NO_ELEMENT);
        // Center stays open.
        assert_eq!(map.get_cell(4, 4), GridCellType::Empty);
    }

    #[test]
    fn find_first_open_cell_skips_walls() {
        let mut map = GridMap::create_empty("m", 2, 2, 1.0, Vec3::ZERO);
        map.set_cell(0, 0, GridCellType::Wall);
        map.set_cell(1, 0, GridCellType::Wall);
        assert_eq!(map.find_first_open_cell(), CellCoord::new(0, 1));
    }

    #[test]
    fn cell_world_round_trip() {
        let cfg = map_config(7, 5, 0.75, Vec3::new(10.0, 0.0, -4.0));
        for y in 0..5 {
            for x in 0..7 {
                let world = cfg.cell_to_world(x, y);
                let back = cfg.world_to_cell(world);
                assert_eq!(back, CellCoord::new(x, y), "cell ({x},{y})");
            }
        }
    }

    #[test]
    fn world_to_cell_snaps_to_nearest_cell() {
        let cfg = map_config(4, 4, 2.0, Vec3::ZERO);
        let center = cfg.cell_to_world(2, 1);
        // Anywhere inside the cell maps back to it.
        let nudged = center + Vec3::new(0.9, 0.0, -0.9);
        assert_eq!(cfg.world_to_cell(nudged), CellCoord::new(2, 1));
    }

    #[test]
    fn normalized_derives_grid_from_size() {
        let cfg = MapConfig {
            map_size: Vec3::new(10.0, 0.0, 6.0),
            cell_size: 2.0,
            ..Default::default()
        }
        .normalized();
        assert_eq!(cfg.grid_width, 5);
        assert_eq!(cfg.grid_height, 3);
    }

    #[test]
    fn normalized_derives_size_from_grid() {
        let cfg = map_config(8, 4, 1.5, Vec3::ZERO);
        assert_eq!(cfg.map_size, Vec3::new(12.0, 0.0, 6.0));
    }
}
