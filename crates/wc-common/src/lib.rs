use serde::{Deserialize, Serialize};

pub mod logging;
pub mod time;

/// Hard ceiling on update-pool worker threads; the crash side channel sizes
/// its lock-free slot table from this.
pub const MAX_WORKERS: usize = 64;

// ============================================================================
// Map Identity
// ============================================================================

/// Composite key identifying one live map: the static map id plus the
/// instance id. Non-instanceable maps always use instance id 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MapId {
    pub map_id: u32,
    pub instance_id: u32,
}

impl MapId {
    pub fn new(map_id: u32, instance_id: u32) -> Self {
        Self { map_id, instance_id }
    }

    /// Key for a non-instanceable (shared world) map.
    pub fn world(map_id: u32) -> Self {
        Self { map_id, instance_id: 0 }
    }
}

impl std::fmt::Display for MapId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.map_id, self.instance_id)
    }
}

// ============================================================================
// Catalogue Enums
// ============================================================================

/// Static kind of a map, from the map catalogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MapKind {
    World,
    Dungeon,
    Raid,
    BattleGround,
    Arena,
    Transport,
}

impl MapKind {
    /// Whether maps of this kind get a private instance per group/battle.
    pub fn instanceable(&self) -> bool {
        matches!(
            self,
            MapKind::Dungeon | MapKind::Raid | MapKind::BattleGround | MapKind::Arena
        )
    }

    /// Dungeon-style content (includes raids).
    pub fn is_dungeon(&self) -> bool {
        matches!(self, MapKind::Dungeon | MapKind::Raid)
    }

    pub fn is_raid(&self) -> bool {
        matches!(self, MapKind::Raid)
    }

    pub fn is_battleground_or_arena(&self) -> bool {
        matches!(self, MapKind::BattleGround | MapKind::Arena)
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, MapKind::Transport)
    }

    /// Large shared world map.
    pub fn is_continent(&self) -> bool {
        matches!(self, MapKind::World)
    }
}

/// Map difficulty mode. `Normal` doubles as the regular (non-heroic)
/// battleground difficulty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Difficulty {
    Normal,
    Heroic,
    Raid10Normal,
    Raid25Normal,
    Raid10Heroic,
    Raid25Heroic,
}

impl Difficulty {
    /// Fallback difficulty for battleground brackets without an entry.
    pub const REGULAR: Difficulty = Difficulty::Normal;

    pub fn is_heroic(&self) -> bool {
        matches!(
            self,
            Difficulty::Heroic | Difficulty::Raid10Heroic | Difficulty::Raid25Heroic
        )
    }

    pub fn is_raid(&self) -> bool {
        matches!(
            self,
            Difficulty::Raid10Normal
                | Difficulty::Raid25Normal
                | Difficulty::Raid10Heroic
                | Difficulty::Raid25Heroic
        )
    }
}

impl Default for Difficulty {
    fn default() -> Self {
        Difficulty::Normal
    }
}

// ============================================================================
// Entry Gating
// ============================================================================

/// Structured reason a player is refused entry to a map, forwarded to the
/// session layer which informs the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferAbort {
    /// The requested difficulty does not exist for this map.
    Difficulty,
    /// An encounter is in progress inside the target instance.
    ZoneInCombat,
    /// The map requires a raid group.
    RaidRequired,
    /// The heroic mode requires an achievement the group leader lacks.
    AchievementRequired,
}

// ============================================================================
// Snapshots
// ============================================================================

/// Point-in-time view of the update pool, for logging and monitoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub current_threads: usize,
    pub preferred_threads: usize,
    pub active_workers: usize,
    pub pending_requests: usize,
    pub queue_len: usize,
}

/// Point-in-time view of one map's update statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapStatSnapshot {
    pub map: MapId,
    pub updates: u64,
    pub break_count: u32,
    pub last_update_ms: u64,
    pub avg_duration_ms: f64,
    pub max_duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_id_equality_uses_both_fields() {
        assert_eq!(MapId::new(533, 42), MapId::new(533, 42));
        assert_ne!(MapId::new(533, 42), MapId::new(533, 43));
        assert_ne!(MapId::new(533, 42), MapId::new(534, 42));
        assert_eq!(MapId::world(0), MapId::new(0, 0));
    }

    #[test]
    fn map_kind_predicates() {
        assert!(MapKind::Dungeon.instanceable());
        assert!(MapKind::Arena.instanceable());
        assert!(!MapKind::World.instanceable());
        assert!(!MapKind::Transport.instanceable());
        assert!(MapKind::Raid.is_dungeon());
        assert!(!MapKind::BattleGround.is_dungeon());
        assert!(MapKind::World.is_continent());
    }

    #[test]
    fn difficulty_predicates() {
        assert!(Difficulty::Raid10Heroic.is_heroic());
        assert!(Difficulty::Raid10Heroic.is_raid());
        assert!(!Difficulty::Heroic.is_raid());
        assert_eq!(Difficulty::REGULAR, Difficulty::Normal);
    }
}
