//! Map catalogue and terrain-grid capabilities.
//!
//! The catalogue is read-only static metadata about map ids; the core never
//! loads it itself, it consumes an injected implementation. `StaticMapCatalog`
//! is the in-memory implementation used by the server binary and tests.

use std::collections::{HashMap, HashSet};

use wc_common::{Difficulty, MapKind};

/// World units per terrain grid cell.
pub const CELL_SIZE: f32 = 533.33333;

/// Highest grid coordinate on either axis.
pub const MAX_GRID_COORD: i32 = 63;

/// Grid-cell index for a world position.
pub fn grid_cell(x: f32, y: f32) -> (i32, i32) {
    (
        MAX_GRID_COORD - (x / CELL_SIZE).floor() as i32,
        MAX_GRID_COORD - (y / CELL_SIZE).floor() as i32,
    )
}

/// Static metadata for one map id.
#[derive(Debug, Clone)]
pub struct MapEntry {
    pub map_id: u32,
    pub name: String,
    pub kind: MapKind,
    /// Entering this map in heroic raid mode requires the group leader to
    /// hold this achievement.
    pub heroic_requires_achievement: Option<u32>,
}

impl MapEntry {
    pub fn instanceable(&self) -> bool {
        self.kind.instanceable()
    }
}

/// Static template describing an instanceable map.
#[derive(Debug, Clone)]
pub struct InstanceTemplate {
    pub map_id: u32,
    pub max_players: u32,
}

/// Read-only map catalogue capability.
pub trait MapCatalog: Send + Sync {
    fn lookup(&self, map_id: u32) -> Option<MapEntry>;

    fn instance_template(&self, map_id: u32) -> Option<InstanceTemplate>;

    /// The difficulty entry for `(map_id, difficulty)`, if the map offers
    /// that mode.
    fn map_difficulty(&self, map_id: u32, difficulty: Difficulty) -> Option<Difficulty>;

    /// Battleground difficulty bracket for the battle's minimum level.
    fn battleground_bracket(&self, map_id: u32, min_level: u32) -> Option<Difficulty>;
}

/// Terrain-grid existence capability.
pub trait GridCatalog: Send + Sync {
    fn exists_map(&self, map_id: u32, gx: i32, gy: i32) -> bool;

    fn exists_vmap(&self, map_id: u32, gx: i32, gy: i32) -> bool;
}

/// In-memory catalogue, filled at startup.
#[derive(Default)]
pub struct StaticMapCatalog {
    entries: HashMap<u32, MapEntry>,
    templates: HashMap<u32, InstanceTemplate>,
    difficulties: HashSet<(u32, Difficulty)>,
    brackets: HashMap<u32, Vec<(u32, Difficulty)>>,
}

impl StaticMapCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_entry(&mut self, entry: MapEntry) -> &mut Self {
        self.entries.insert(entry.map_id, entry);
        self
    }

    pub fn add_template(&mut self, template: InstanceTemplate) -> &mut Self {
        self.templates.insert(template.map_id, template);
        self
    }

    pub fn add_difficulty(&mut self, map_id: u32, difficulty: Difficulty) -> &mut Self {
        self.difficulties.insert((map_id, difficulty));
        self
    }

    /// Register a bracket: battles at or above `min_level` on this map use
    /// the given difficulty.
    pub fn add_bracket(&mut self, map_id: u32, min_level: u32, difficulty: Difficulty) -> &mut Self {
        self.brackets.entry(map_id).or_default().push((min_level, difficulty));
        self
    }
}

impl MapCatalog for StaticMapCatalog {
    fn lookup(&self, map_id: u32) -> Option<MapEntry> {
        self.entries.get(&map_id).cloned()
    }

    fn instance_template(&self, map_id: u32) -> Option<InstanceTemplate> {
        self.templates.get(&map_id).cloned()
    }

    fn map_difficulty(&self, map_id: u32, difficulty: Difficulty) -> Option<Difficulty> {
        self.difficulties
            .contains(&(map_id, difficulty))
            .then_some(difficulty)
    }

    fn battleground_bracket(&self, map_id: u32, min_level: u32) -> Option<Difficulty> {
        let brackets = self.brackets.get(&map_id)?;
        brackets
            .iter()
            .filter(|(level, _)| *level <= min_level)
            .max_by_key(|(level, _)| *level)
            .map(|(_, difficulty)| *difficulty)
    }
}

/// Grid catalogue that reports full terrain coverage except for explicitly
/// punched holes. Stands in for the on-disk grid/vmap files.
#[derive(Default)]
pub struct StaticGridCatalog {
    missing_map: HashSet<(u32, i32, i32)>,
    missing_vmap: HashSet<(u32, i32, i32)>,
}

impl StaticGridCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remove_map_cell(&mut self, map_id: u32, gx: i32, gy: i32) -> &mut Self {
        self.missing_map.insert((map_id, gx, gy));
        self
    }

    pub fn remove_vmap_cell(&mut self, map_id: u32, gx: i32, gy: i32) -> &mut Self {
        self.missing_vmap.insert((map_id, gx, gy));
        self
    }
}

impl GridCatalog for StaticGridCatalog {
    fn exists_map(&self, map_id: u32, gx: i32, gy: i32) -> bool {
        !self.missing_map.contains(&(map_id, gx, gy))
    }

    fn exists_vmap(&self, map_id: u32, gx: i32, gy: i32) -> bool {
        !self.missing_vmap.contains(&(map_id, gx, gy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_cell_from_world_coordinates() {
        assert_eq!(grid_cell(0.0, 0.0), (63, 63));
        assert_eq!(grid_cell(CELL_SIZE, 0.0), (62, 63));
        assert_eq!(grid_cell(-CELL_SIZE, 2.0 * CELL_SIZE), (64, 61));
    }

    #[test]
    fn bracket_picks_highest_matching_level() {
        let mut catalog = StaticMapCatalog::new();
        catalog
            .add_bracket(30, 10, Difficulty::Normal)
            .add_bracket(30, 70, Difficulty::Heroic);
        assert_eq!(catalog.battleground_bracket(30, 40), Some(Difficulty::Normal));
        assert_eq!(catalog.battleground_bracket(30, 80), Some(Difficulty::Heroic));
        assert_eq!(catalog.battleground_bracket(30, 5), None);
        assert_eq!(catalog.battleground_bracket(31, 40), None);
    }

    #[test]
    fn grid_catalog_reports_punched_holes() {
        let mut grids = StaticGridCatalog::new();
        grids.remove_map_cell(0, 30, 30);
        assert!(!grids.exists_map(0, 30, 30));
        assert!(grids.exists_map(0, 30, 31));
        assert!(grids.exists_vmap(0, 30, 30));
    }
}
