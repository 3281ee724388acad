//! Live map entities.
//!
//! A `GameMap` is one running map: a shared world continent, a private
//! dungeon instance, or a battleground instance. The scheduling core owns
//! their lifecycle; the game simulation proper hangs off the injected
//! [`MapBehavior`] and [`InstanceScript`] seams.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use wc_common::{Difficulty, MapId, MapKind};
use wc_updater::Updatable;

use crate::entry::MapEntry;
use crate::instance::{InstanceSave, InstanceScript};

/// Per-tick game logic for one map. The core calls this from a worker thread,
/// exactly once per map per tick.
pub trait MapBehavior: Send + Sync {
    fn on_update(&self, _map: &GameMap, _diff_ms: u32) {}
}

/// Factory seam for attaching scripts and behaviors when the registry builds
/// a map.
pub trait MapHooks: Send + Sync {
    fn instance_script(
        &self,
        _entry: &MapEntry,
        _map: MapId,
        _difficulty: Difficulty,
    ) -> Option<Box<dyn InstanceScript>> {
        None
    }

    fn behavior(&self, _entry: &MapEntry, _map: MapId) -> Option<Box<dyn MapBehavior>> {
        None
    }
}

/// Variant-specific payload of a live map.
pub enum MapVariant {
    World,
    Dungeon { save: Option<InstanceSave> },
    BattleGround,
}

struct MapState {
    players: HashSet<u64>,
    /// Set while the map has no players; cleared on first join.
    empty_since_ms: Option<u64>,
    battle_ended: bool,
}

pub struct GameMap {
    id: u32,
    instance_id: u32,
    name: String,
    kind: MapKind,
    difficulty: Difficulty,
    variant: MapVariant,
    /// Quarantined after a crash; updates are a no-op until reset.
    broken: AtomicBool,
    unload_grace_ms: u64,
    script: Option<Box<dyn InstanceScript>>,
    behavior: Option<Box<dyn MapBehavior>>,
    state: Mutex<MapState>,
}

impl GameMap {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u32,
        instance_id: u32,
        name: &str,
        kind: MapKind,
        difficulty: Difficulty,
        variant: MapVariant,
        unload_grace_ms: u64,
        created_at_ms: u64,
    ) -> Self {
        Self {
            id,
            instance_id,
            name: name.to_string(),
            kind,
            difficulty,
            variant,
            broken: AtomicBool::new(false),
            unload_grace_ms,
            script: None,
            behavior: None,
            state: Mutex::new(MapState {
                players: HashSet::new(),
                empty_since_ms: Some(created_at_ms),
                battle_ended: false,
            }),
        }
    }

    pub fn with_script(mut self, script: Option<Box<dyn InstanceScript>>) -> Self {
        self.script = script;
        self
    }

    pub fn with_behavior(mut self, behavior: Option<Box<dyn MapBehavior>>) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn instance_id(&self) -> u32 {
        self.instance_id
    }

    pub fn map_id(&self) -> MapId {
        MapId::new(self.id, self.instance_id)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> MapKind {
        self.kind
    }

    pub fn difficulty(&self) -> Difficulty {
        self.difficulty
    }

    pub fn is_continent(&self) -> bool {
        self.kind.is_continent()
    }

    pub fn is_dungeon(&self) -> bool {
        self.kind.is_dungeon()
    }

    pub fn instanceable(&self) -> bool {
        self.kind.instanceable()
    }

    /// The persisted bind this dungeon was created from, if any.
    pub fn save(&self) -> Option<InstanceSave> {
        match &self.variant {
            MapVariant::Dungeon { save } => *save,
            _ => None,
        }
    }

    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::SeqCst)
    }

    pub fn set_broken(&self, broken: bool) {
        self.broken.store(broken, Ordering::SeqCst);
    }

    /// Lift the crash quarantine and let updates run again.
    pub fn reset_broken(&self) {
        self.set_broken(false);
    }

    /// Drive one tick of this map. A quarantined map does nothing.
    pub fn update(&self, diff_ms: u32) {
        if self.is_broken() {
            return;
        }
        if let Some(behavior) = &self.behavior {
            behavior.on_update(self, diff_ms);
        }
        if let Some(script) = &self.script {
            script.on_update(diff_ms);
        }
    }

    /// Whether the sweep may destroy this map right now. Continents persist
    /// for the server's lifetime; instances go once empty past the grace
    /// period, battlegrounds as soon as the battle has ended.
    pub fn can_unload(&self, now_ms: u64) -> bool {
        if self.kind.is_continent() {
            return false;
        }
        let state = self.state.lock();
        if !state.players.is_empty() {
            return false;
        }
        if state.battle_ended {
            return true;
        }
        state
            .empty_since_ms
            .map(|since| now_ms.saturating_sub(since) >= self.unload_grace_ms)
            .unwrap_or(false)
    }

    pub fn add_player(&self, guid: u64) {
        let mut state = self.state.lock();
        state.players.insert(guid);
        state.empty_since_ms = None;
    }

    pub fn remove_player(&self, guid: u64, now_ms: u64) {
        let mut state = self.state.lock();
        state.players.remove(&guid);
        if state.players.is_empty() {
            state.empty_since_ms = Some(now_ms);
        }
    }

    pub fn players_count(&self) -> u32 {
        self.state.lock().players.len() as u32
    }

    /// Battleground over: the map becomes sweepable.
    pub fn end_battle(&self) {
        self.state.lock().battle_ended = true;
    }

    /// Evict everyone and make the map immediately sweepable.
    pub fn unload_all(&self, force: bool) {
        let mut state = self.state.lock();
        debug!(map = %self.map_id(), players = state.players.len(), force, "Unloading map");
        state.players.clear();
        state.empty_since_ms = Some(0);
        state.battle_ended = true;
    }

    pub fn encounter_in_progress(&self) -> bool {
        self.script
            .as_ref()
            .map(|s| s.is_encounter_in_progress())
            .unwrap_or(false)
    }
}

impl Updatable for GameMap {
    fn update(&self, diff_ms: u32) {
        GameMap::update(self, diff_ms);
    }

    fn update_label(&self) -> String {
        format!("map {} ({})", self.map_id(), self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct CountingBehavior {
        updates: std::sync::Arc<AtomicU32>,
    }

    impl MapBehavior for CountingBehavior {
        fn on_update(&self, _map: &GameMap, _diff_ms: u32) {
            self.updates.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn dungeon() -> GameMap {
        GameMap::new(
            389,
            7,
            "Ragefire Chasm",
            MapKind::Dungeon,
            Difficulty::Normal,
            MapVariant::Dungeon { save: None },
            1000,
            0,
        )
    }

    #[test]
    fn broken_map_skips_updates() {
        let updates = std::sync::Arc::new(AtomicU32::new(0));
        let map = dungeon().with_behavior(Some(Box::new(CountingBehavior {
            updates: updates.clone(),
        })));

        map.update(100);
        map.set_broken(true);
        map.update(100);
        map.update(100);
        map.reset_broken();
        map.update(100);

        assert_eq!(updates.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn empty_map_unloads_after_grace() {
        let map = dungeon();
        assert!(!map.can_unload(500));
        assert!(map.can_unload(1000));

        map.add_player(11);
        assert!(!map.can_unload(5000));

        map.remove_player(11, 6000);
        assert!(!map.can_unload(6500));
        assert!(map.can_unload(7000));
    }

    #[test]
    fn continents_never_unload() {
        let map = GameMap::new(
            0,
            0,
            "Eastern Kingdoms",
            MapKind::World,
            Difficulty::Normal,
            MapVariant::World,
            1000,
            0,
        );
        assert!(!map.can_unload(u64::MAX));
    }

    #[test]
    fn battleground_unloads_when_battle_ends() {
        let map = GameMap::new(
            30,
            5,
            "Alterac Valley",
            MapKind::BattleGround,
            Difficulty::REGULAR,
            MapVariant::BattleGround,
            60_000,
            0,
        );
        map.add_player(3);
        assert!(!map.can_unload(100));
        map.end_battle();
        assert!(!map.can_unload(100), "players still inside");
        map.remove_player(3, 200);
        assert!(map.can_unload(200));
    }

    #[test]
    fn unload_all_makes_map_sweepable() {
        let map = dungeon();
        map.add_player(1);
        map.add_player(2);
        map.unload_all(true);
        assert_eq!(map.players_count(), 0);
        assert!(map.can_unload(0));
    }
}
