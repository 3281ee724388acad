//! WorldCore Map Scheduling
//!
//! This crate provides the map side of the scheduling core with:
//! - MapRegistry: the keyed collection of live maps with instancing policies
//! - GameMap: world/dungeon/battleground map variants with quarantine support
//! - MapManager: the tick driver wiring registry, pool, balancer and sweep
//! - MapStatistics: per-map update durations and break accounting
//! - CrashRecovery: per-map quarantine for worker crashes
//! - Capability traits for the injected collaborators: MapCatalog,
//!   GridCatalog, SaveStore, InstanceScript, MapBehavior/MapHooks

pub mod entry;
pub mod instance;
pub mod manager;
pub mod map;
pub mod player;
pub mod recovery;
pub mod registry;
pub mod stats;

pub use entry::{
    grid_cell, GridCatalog, InstanceTemplate, MapCatalog, MapEntry, StaticGridCatalog,
    StaticMapCatalog, CELL_SIZE,
};
pub use instance::{InstanceIdAllocator, InstanceSave, InstanceScript, NoSaves, SaveStore,
    StaticSaveStore};
pub use manager::MapManager;
pub use map::{GameMap, MapBehavior, MapHooks, MapVariant};
pub use player::{Actor, GroupInfo, PlayerInfo};
pub use recovery::{crash_verdict, CrashAction, CrashRecovery};
pub use registry::{BattleGroundInfo, EntryDenied, MapRegistry};
pub use stats::MapStatistics;
