//! Instance collaborators: scripts, persisted saves and instance ids.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use wc_common::Difficulty;

use crate::player::PlayerInfo;

/// Behavior attached to a dungeon or battleground instance. Game logic lives
/// behind this seam; the core only drives `on_update` and consults the
/// encounter predicate for entry gating.
pub trait InstanceScript: Send + Sync {
    fn on_update(&self, _diff_ms: u32) {}

    fn is_encounter_in_progress(&self) -> bool {
        false
    }
}

/// A persisted dungeon bind: the instance a player (or their group) is
/// locked to, with the difficulty it was saved at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceSave {
    pub instance_id: u32,
    pub difficulty: Difficulty,
}

/// Persistence collaborator consulted while creating dungeon instances.
pub trait SaveStore: Send + Sync {
    /// The bind for this player (or their group) on `map_id`, if any.
    fn bound_save(&self, player: &PlayerInfo, map_id: u32) -> Option<InstanceSave>;
}

/// Save store with no persisted binds.
pub struct NoSaves;

impl SaveStore for NoSaves {
    fn bound_save(&self, _player: &PlayerInfo, _map_id: u32) -> Option<InstanceSave> {
        None
    }
}

/// In-memory save store keyed by `(player guid, map id)`.
#[derive(Default)]
pub struct StaticSaveStore {
    binds: HashMap<(u64, u32), InstanceSave>,
}

impl StaticSaveStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, guid: u64, map_id: u32, save: InstanceSave) -> &mut Self {
        self.binds.insert((guid, map_id), save);
        self
    }
}

impl SaveStore for StaticSaveStore {
    fn bound_save(&self, player: &PlayerInfo, map_id: u32) -> Option<InstanceSave> {
        self.binds.get(&(player.guid, map_id)).copied()
    }
}

/// Monotonic non-zero instance id source.
pub struct InstanceIdAllocator {
    next: AtomicU32,
}

impl InstanceIdAllocator {
    pub fn new() -> Self {
        Self { next: AtomicU32::new(1) }
    }

    pub fn next(&self) -> u32 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for InstanceIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
