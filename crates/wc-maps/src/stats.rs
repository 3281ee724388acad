//! Per-map update statistics and break accounting.
//!
//! Workers report through the pool's observer hooks; the crash recovery
//! thread reads and bumps break counts. Keyed by `MapId` in a sharded map
//! because the recovery path reads while workers write.

use dashmap::DashMap;
use tracing::warn;

use wc_common::time::WorldClock;
use wc_common::{MapId, MapStatSnapshot};
use wc_updater::UpdateObserver;

use crate::map::GameMap;

#[derive(Default)]
struct MapStat {
    updates: u64,
    break_count: u32,
    last_update_ms: u64,
    avg_duration_ms: f64,
    max_duration_ms: u64,
}

pub struct MapStatistics {
    clock: WorldClock,
    stats: DashMap<MapId, MapStat>,
}

impl MapStatistics {
    pub fn new(clock: WorldClock) -> Self {
        Self {
            clock,
            stats: DashMap::new(),
        }
    }

    pub fn record_update(&self, map: MapId, duration_ms: u64) {
        let mut stat = self.stats.entry(map).or_default();
        stat.updates += 1;
        stat.last_update_ms = self.clock.now_ms();
        // running mean
        stat.avg_duration_ms +=
            (duration_ms as f64 - stat.avg_duration_ms) / stat.updates as f64;
        stat.max_duration_ms = stat.max_duration_ms.max(duration_ms);
    }

    /// Count one crash against the map; returns the new break count.
    pub fn record_break(&self, map: MapId) -> u32 {
        let mut stat = self.stats.entry(map).or_default();
        stat.break_count += 1;
        stat.break_count
    }

    pub fn break_count(&self, map: MapId) -> u32 {
        self.stats.get(&map).map(|s| s.break_count).unwrap_or(0)
    }

    pub fn update_count(&self, map: MapId) -> u64 {
        self.stats.get(&map).map(|s| s.updates).unwrap_or(0)
    }

    /// Drop a map's record once the map itself is gone.
    pub fn forget(&self, map: MapId) {
        self.stats.remove(&map);
    }

    pub fn snapshot(&self, map: MapId) -> Option<MapStatSnapshot> {
        self.stats.get(&map).map(|stat| MapStatSnapshot {
            map,
            updates: stat.updates,
            break_count: stat.break_count,
            last_update_ms: stat.last_update_ms,
            avg_duration_ms: stat.avg_duration_ms,
            max_duration_ms: stat.max_duration_ms,
        })
    }

    pub fn snapshots(&self) -> Vec<MapStatSnapshot> {
        self.stats
            .iter()
            .map(|entry| MapStatSnapshot {
                map: *entry.key(),
                updates: entry.updates,
                break_count: entry.break_count,
                last_update_ms: entry.last_update_ms,
                avg_duration_ms: entry.avg_duration_ms,
                max_duration_ms: entry.max_duration_ms,
            })
            .collect()
    }
}

impl UpdateObserver<GameMap> for MapStatistics {
    fn on_update_end(&self, target: &GameMap, duration_ms: u64) {
        self.record_update(target.map_id(), duration_ms);
    }

    fn on_update_panic(&self, target: &GameMap) {
        // A panic means the worker survived but the map state is suspect:
        // quarantine immediately, no skip-first grace.
        target.set_broken(true);
        let breaks = self.record_break(target.map_id());
        warn!(
            map = %target.map_id(),
            breaks,
            "Map update panicked; map quarantined"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wc_common::{Difficulty, MapKind};

    use crate::map::MapVariant;

    #[test]
    fn update_statistics_accumulate() {
        let stats = MapStatistics::new(WorldClock::new());
        let id = MapId::new(389, 1);

        stats.record_update(id, 10);
        stats.record_update(id, 30);
        let snap = stats.snapshot(id).unwrap();
        assert_eq!(snap.updates, 2);
        assert_eq!(snap.avg_duration_ms, 20.0);
        assert_eq!(snap.max_duration_ms, 30);

        stats.forget(id);
        assert!(stats.snapshot(id).is_none());
    }

    #[test]
    fn break_counts_accumulate_independently() {
        let stats = MapStatistics::new(WorldClock::new());
        assert_eq!(stats.break_count(MapId::new(533, 42)), 0);
        assert_eq!(stats.record_break(MapId::new(533, 42)), 1);
        assert_eq!(stats.record_break(MapId::new(533, 42)), 2);
        assert_eq!(stats.break_count(MapId::new(533, 43)), 0);
    }

    #[test]
    fn panic_hook_quarantines_the_map() {
        let stats = MapStatistics::new(WorldClock::new());
        let map = GameMap::new(
            533,
            42,
            "Naxxramas",
            MapKind::Raid,
            Difficulty::Raid10Normal,
            MapVariant::Dungeon { save: None },
            1000,
            0,
        );
        assert!(!map.is_broken());
        stats.on_update_panic(&map);
        assert!(map.is_broken());
        assert_eq!(stats.break_count(map.map_id()), 1);
    }
}
