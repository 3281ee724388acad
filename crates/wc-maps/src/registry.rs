//! Map registry: the keyed collection of live maps.
//!
//! Holds the `(map_id, instance_id) -> map` mapping and the creation
//! policies: one shared world map per world, one private instance per dungeon
//! save or battleground. All mutation goes through a single non-reentrant
//! mutex with two-phase lookup-then-insert, so creation never re-enters the
//! lock. Transports never enter the registry.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use wc_common::time::WorldClock;
use wc_common::{Difficulty, MapId, TransferAbort};
use wc_config::MapsConfig;

use crate::entry::{grid_cell, GridCatalog, MapCatalog, MapEntry};
use crate::instance::{InstanceIdAllocator, SaveStore};
use crate::map::{GameMap, MapHooks, MapVariant};
use crate::player::{Actor, PlayerInfo};

/// Why `can_player_enter` refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryDenied {
    UnknownMap,
    Abort(TransferAbort),
}

/// What the registry needs to know about a battleground when its factory
/// asks for a map.
#[derive(Debug, Clone)]
pub struct BattleGroundInfo {
    pub type_id: u32,
    pub min_level: u32,
}

pub struct MapRegistry {
    maps: Mutex<HashMap<MapId, Arc<GameMap>>>,
    catalog: Arc<dyn MapCatalog>,
    grids: Arc<dyn GridCatalog>,
    saves: Arc<dyn SaveStore>,
    hooks: Option<Arc<dyn MapHooks>>,
    ids: InstanceIdAllocator,
    clock: WorldClock,
    config: MapsConfig,
}

impl MapRegistry {
    pub fn new(
        catalog: Arc<dyn MapCatalog>,
        grids: Arc<dyn GridCatalog>,
        saves: Arc<dyn SaveStore>,
        clock: WorldClock,
        config: MapsConfig,
    ) -> Self {
        Self {
            maps: Mutex::new(HashMap::new()),
            catalog,
            grids,
            saves,
            hooks: None,
            ids: InstanceIdAllocator::new(),
            clock,
            config,
        }
    }

    /// Attach the script/behavior factory consulted when maps are built.
    pub fn with_hooks(mut self, hooks: Arc<dyn MapHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    // ------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------

    /// Get or create the map `actor` belongs on. For non-instanceable
    /// entries this is the shared world map; for instanceable entries only a
    /// player actor may trigger creation (battleground maps come from
    /// [`MapRegistry::create_bg_map`] alone).
    pub fn create_map(&self, map_id: u32, actor: Actor<'_>) -> Option<Arc<GameMap>> {
        let entry = self.catalog.lookup(map_id)?;
        if entry.kind.is_transport() {
            debug!(map_id, "Transport maps are not managed by the registry");
            return None;
        }

        if entry.instanceable() {
            return match actor {
                Actor::Player(player) => self.create_instance(map_id, player),
                Actor::Other => {
                    debug!(map_id, "Non-player actor asked for an instanceable map, wrong usage");
                    None
                }
            };
        }

        let key = MapId::world(map_id);
        if let Some(existing) = self.maps.lock().get(&key) {
            return Some(existing.clone());
        }
        let map = Arc::new(self.apply_hooks(
            &entry,
            GameMap::new(
                map_id,
                0,
                &entry.name,
                entry.kind,
                Difficulty::Normal,
                MapVariant::World,
                self.config.unload_grace_ms,
                self.clock.now_ms(),
            ),
        ));
        info!(map = %key, name = %entry.name, "World map created");
        Some(self.insert_or_existing(key, map))
    }

    /// Get or create the instance `player` belongs in. Battlegrounds only
    /// resolve to an existing battle; dungeons reuse the persisted bind when
    /// one exists and get a fresh instance id otherwise.
    pub fn create_instance(&self, map_id: u32, player: &PlayerInfo) -> Option<Arc<GameMap>> {
        let entry = self.catalog.lookup(map_id)?;
        if entry.kind.is_transport() {
            return None;
        }
        if !entry.instanceable() {
            return self.create_map(map_id, Actor::Player(player));
        }

        if entry.kind.is_battleground_or_arena() {
            let instance_id = player.battleground_id;
            if instance_id == 0 {
                debug!(map_id, player = %player.name, "Player is not in a battle");
                return None;
            }
            let found = self.find(map_id, instance_id);
            if found.is_none() {
                warn!(
                    map_id,
                    instance_id,
                    "Battleground map missing; battles are created by the battleground factory"
                );
            }
            return found;
        }

        if let Some(save) = self.saves.bound_save(player, map_id) {
            // The save may outlive the map: rebuild it bound to the save.
            let key = MapId::new(map_id, save.instance_id);
            if let Some(existing) = self.maps.lock().get(&key) {
                return Some(existing.clone());
            }
            let map =
                self.build_dungeon_map(&entry, save.instance_id, save.difficulty, Some(save))?;
            return Some(self.insert_or_existing(key, map));
        }

        let instance_id = self.ids.next();
        let difficulty = player.group_difficulty(entry.kind.is_raid());
        let map = self.build_dungeon_map(&entry, instance_id, difficulty, None)?;
        Some(self.insert_or_existing(MapId::new(map_id, instance_id), map))
    }

    /// Create a fresh battleground map for a battle, with a newly allocated
    /// instance id. Difficulty comes from the bracket for the battle's
    /// minimum level.
    pub fn create_bg_map(&self, map_id: u32, bg: &BattleGroundInfo) -> Option<Arc<GameMap>> {
        let entry = self.catalog.lookup(map_id)?;
        if !entry.kind.is_battleground_or_arena() {
            debug!(map_id, "Not a battleground map, wrong usage");
            return None;
        }

        let instance_id = self.ids.next();
        let difficulty = self
            .catalog
            .battleground_bracket(map_id, bg.min_level)
            .unwrap_or(Difficulty::REGULAR);
        let key = MapId::new(map_id, instance_id);
        let map = Arc::new(self.apply_hooks(
            &entry,
            GameMap::new(
                map_id,
                instance_id,
                &entry.name,
                entry.kind,
                difficulty,
                MapVariant::BattleGround,
                self.config.unload_grace_ms,
                self.clock.now_ms(),
            ),
        ));
        info!(map = %key, bg_type = bg.type_id, ?difficulty, "Battleground map created");
        Some(self.insert_or_existing(key, map))
    }

    fn build_dungeon_map(
        &self,
        entry: &MapEntry,
        instance_id: u32,
        requested: Difficulty,
        save: Option<crate::instance::InstanceSave>,
    ) -> Option<Arc<GameMap>> {
        if self.catalog.instance_template(entry.map_id).is_none() {
            error!(map_id = entry.map_id, "No instance template for dungeon map");
            return None;
        }

        // some instances only have one difficulty
        let difficulty = if self.catalog.map_difficulty(entry.map_id, requested).is_some() {
            requested
        } else {
            Difficulty::Normal
        };

        let key = MapId::new(entry.map_id, instance_id);
        debug!(map = %key, ?difficulty, from_save = save.is_some(), "Dungeon map instance created");

        Some(Arc::new(self.apply_hooks(
            entry,
            GameMap::new(
                entry.map_id,
                instance_id,
                &entry.name,
                entry.kind,
                difficulty,
                MapVariant::Dungeon { save },
                self.config.unload_grace_ms,
                self.clock.now_ms(),
            ),
        )))
    }

    fn apply_hooks(&self, entry: &MapEntry, map: GameMap) -> GameMap {
        match &self.hooks {
            Some(hooks) => {
                let key = map.map_id();
                let difficulty = map.difficulty();
                map.with_script(hooks.instance_script(entry, key, difficulty))
                    .with_behavior(hooks.behavior(entry, key))
            }
            None => map,
        }
    }

    /// Insert under the registry lock, keeping whatever map won a creation
    /// race for the same key.
    fn insert_or_existing(&self, key: MapId, map: Arc<GameMap>) -> Arc<GameMap> {
        self.maps.lock().entry(key).or_insert(map).clone()
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    pub fn find(&self, map_id: u32, instance_id: u32) -> Option<Arc<GameMap>> {
        if self.is_transport_map(map_id) {
            return None;
        }
        self.maps.lock().get(&MapId::new(map_id, instance_id)).cloned()
    }

    /// Any live map for `map_id`; used for shared world maps where the
    /// instance id is unknown.
    pub fn find_first(&self, map_id: u32) -> Option<Arc<GameMap>> {
        if self.is_transport_map(map_id) {
            return None;
        }
        self.maps
            .lock()
            .iter()
            .find(|(key, _)| key.map_id == map_id)
            .map(|(_, map)| map.clone())
    }

    fn is_transport_map(&self, map_id: u32) -> bool {
        self.catalog
            .lookup(map_id)
            .map(|entry| entry.kind.is_transport())
            .unwrap_or(false)
    }

    /// Snapshot of every live map, for the tick driver.
    pub fn live_maps(&self) -> Vec<Arc<GameMap>> {
        self.maps.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.maps.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.lock().is_empty()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Destroy one instance. Refuses non-instanceable maps.
    pub fn delete_instance(&self, map_id: u32, instance_id: u32) -> bool {
        let mut maps = self.maps.lock();
        let key = MapId::new(map_id, instance_id);
        match maps.get(&key) {
            Some(map) if map.instanceable() => {
                map.unload_all(true);
                maps.remove(&key);
                info!(map = %key, "Instance deleted");
                true
            }
            Some(_) => {
                debug!(map = %key, "Refusing to delete a non-instanceable map");
                false
            }
            None => false,
        }
    }

    /// Remove and destroy every map whose `can_unload` reports true.
    /// Returns the removed keys. Runs after the round barrier, so no worker
    /// holds a reference to any of these.
    pub fn sweep(&self, now_ms: u64) -> Vec<MapId> {
        let mut maps = self.maps.lock();
        let removable: Vec<MapId> = maps
            .iter()
            .filter(|(_, map)| map.can_unload(now_ms))
            .map(|(key, _)| *key)
            .collect();
        for key in &removable {
            maps.remove(key);
        }
        removable
    }

    /// Drain everything; used at shutdown.
    pub fn unload_all(&self) {
        let mut maps = self.maps.lock();
        for map in maps.values() {
            map.unload_all(true);
        }
        maps.clear();
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn num_instances(&self) -> u32 {
        self.maps
            .lock()
            .values()
            .filter(|map| map.is_dungeon())
            .count() as u32
    }

    pub fn num_players_in_instances(&self) -> u32 {
        self.maps
            .lock()
            .values()
            .filter(|map| map.is_dungeon())
            .map(|map| map.players_count())
            .sum()
    }

    /// Terrain existence probe for a world position.
    pub fn exist_map_and_vmap(&self, map_id: u32, x: f32, y: f32) -> bool {
        let (gx, gy) = grid_cell(x, y);
        self.grids.exists_map(map_id, gx, gy) && self.grids.exists_vmap(map_id, gx, gy)
    }

    /// Whether the id names a playable map (dungeons additionally need an
    /// instance template).
    pub fn is_valid_map(&self, map_id: u32) -> bool {
        match self.catalog.lookup(map_id) {
            Some(entry) => {
                !entry.kind.is_dungeon() || self.catalog.instance_template(map_id).is_some()
            }
            None => false,
        }
    }

    // ------------------------------------------------------------------
    // Entry gating
    // ------------------------------------------------------------------

    /// Pre-entry checks that do not need the map loaded; the abort reason is
    /// forwarded to the player's session on refusal.
    pub fn can_player_enter(&self, map_id: u32, player: &PlayerInfo) -> Result<(), EntryDenied> {
        let entry = self.catalog.lookup(map_id).ok_or(EntryDenied::UnknownMap)?;
        if !entry.kind.is_dungeon() {
            return Ok(());
        }

        let raid = entry.kind.is_raid();

        if raid && !player.game_master && !self.config.instance_ignore_raid && !player.in_raid_group()
        {
            debug!(
                map_id,
                player = %player.name,
                "Player must be in a raid group to enter"
            );
            return Err(EntryDenied::Abort(TransferAbort::RaidRequired));
        }

        if raid && !player.game_master {
            if let Some(achievement) = entry.heroic_requires_achievement {
                if player.group_difficulty(true).is_heroic() {
                    let leader_holds = match &player.group {
                        Some(group) => group.leader_achievements.contains(&achievement),
                        None => player.achievements.contains(&achievement),
                    };
                    if !leader_holds {
                        return Err(EntryDenied::Abort(TransferAbort::AchievementRequired));
                    }
                }
            }
        }

        let requested = player.difficulty(raid);
        if self.catalog.map_difficulty(map_id, requested).is_none() {
            return Err(EntryDenied::Abort(TransferAbort::Difficulty));
        }

        if !player.game_master {
            if let Some(map) = self.create_map(map_id, Actor::Player(player)) {
                if map.encounter_in_progress() {
                    return Err(EntryDenied::Abort(TransferAbort::ZoneInCombat));
                }
            }
        }

        Ok(())
    }
}
