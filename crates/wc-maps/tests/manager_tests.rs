//! MapManager end-to-end tests
//!
//! Drives the full tick pipeline: balancer sample, pool scheduling, round
//! barrier, sweep. Map "game logic" is a behavior that sleeps, so update
//! durations are controllable.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use wc_common::time::WorldClock;
use wc_common::{MapId, MapKind};
use wc_config::WorldConfig;
use wc_maps::{
    Actor, GameMap, InstanceTemplate, MapBehavior, MapEntry, MapHooks, MapManager, MapRegistry,
    NoSaves, PlayerInfo, StaticGridCatalog, StaticMapCatalog,
};

struct DelayBehavior {
    delay_ms: u64,
}

impl MapBehavior for DelayBehavior {
    fn on_update(&self, _map: &GameMap, _diff_ms: u32) {
        if self.delay_ms > 0 {
            std::thread::sleep(Duration::from_millis(self.delay_ms));
        }
    }
}

/// Per-map update delays, defaulting to instant.
struct DelayHooks {
    delays: HashMap<u32, u64>,
}

impl MapHooks for DelayHooks {
    fn behavior(&self, entry: &MapEntry, _map: MapId) -> Option<Box<dyn MapBehavior>> {
        let delay_ms = self.delays.get(&entry.map_id).copied().unwrap_or(0);
        Some(Box::new(DelayBehavior { delay_ms }))
    }
}

fn catalog() -> Arc<StaticMapCatalog> {
    let mut catalog = StaticMapCatalog::new();
    catalog
        .add_entry(MapEntry {
            map_id: 0,
            name: "Eastern Kingdoms".into(),
            kind: MapKind::World,
            heroic_requires_achievement: None,
        })
        .add_entry(MapEntry {
            map_id: 389,
            name: "Ragefire Chasm".into(),
            kind: MapKind::Dungeon,
            heroic_requires_achievement: None,
        })
        .add_template(InstanceTemplate { map_id: 389, max_players: 5 })
        .add_difficulty(389, wc_common::Difficulty::Normal);
    Arc::new(catalog)
}

fn config(num_threads: usize, dynamic: bool) -> WorldConfig {
    let mut config = WorldConfig::default();
    config.updater.update_interval_ms = 100;
    config.updater.num_threads = num_threads;
    config.updater.max_threads = 4;
    config.updater.dynamic_threads = dynamic;
    config.watchdog.freeze_detect_ms = 2000;
    config.maps.unload_grace_ms = 30;
    config
}

fn manager_with(config: WorldConfig, delays: HashMap<u32, u64>) -> MapManager {
    let clock = WorldClock::new();
    let registry = Arc::new(
        MapRegistry::new(
            catalog(),
            Arc::new(StaticGridCatalog::new()),
            Arc::new(NoSaves),
            clock,
            config.maps.clone(),
        )
        .with_hooks(Arc::new(DelayHooks { delays })),
    );
    MapManager::new(config, registry, clock)
}

#[test]
fn three_ticks_update_the_map_once_each() {
    let manager = manager_with(config(1, false), HashMap::new());
    manager.initialize().unwrap();

    let world = manager
        .registry()
        .create_map(0, Actor::Other)
        .expect("world map");
    world.add_player(1);

    for round in 1..=3u64 {
        manager.tick(100);
        assert_eq!(manager.stats().update_count(world.map_id()), round);
        let snapshot = manager.snapshot();
        assert_eq!(snapshot.pending_requests, 0);
        assert_eq!(snapshot.current_threads, 1);
    }
    assert_eq!(manager.tick_counter().load(std::sync::atomic::Ordering::SeqCst), 3);

    manager.unload_all();
}

#[test]
fn inline_mode_updates_on_the_tick_thread() {
    let manager = manager_with(config(0, false), HashMap::new());
    manager.initialize().unwrap();
    assert!(!manager.pool().activated());

    let world = manager.registry().create_map(0, Actor::Other).unwrap();
    manager.tick(100);
    assert_eq!(manager.stats().update_count(world.map_id()), 1);

    manager.unload_all();
}

#[test]
fn the_interval_timer_gates_rounds() {
    let manager = manager_with(config(1, false), HashMap::new());
    manager.initialize().unwrap();
    let world = manager.registry().create_map(0, Actor::Other).unwrap();

    manager.tick(40);
    assert_eq!(manager.stats().update_count(world.map_id()), 0);
    manager.tick(60);
    assert_eq!(manager.stats().update_count(world.map_id()), 1);

    manager.unload_all();
}

#[test]
fn sweep_removes_empty_dungeons_and_their_stats() {
    let mut cfg = config(1, false);
    cfg.maps.unload_grace_ms = 200;
    let manager = manager_with(cfg, HashMap::new());
    manager.initialize().unwrap();

    let player = PlayerInfo::new(9, "Wanderer");
    manager.registry().create_map(0, Actor::Other).unwrap();
    let dungeon = manager
        .registry()
        .create_map(389, Actor::Player(&player))
        .unwrap();
    let key = dungeon.map_id();

    manager.tick(100);
    assert_eq!(manager.stats().update_count(key), 1);

    // let the unload grace elapse, then the next round sweeps it
    std::thread::sleep(Duration::from_millis(250));
    manager.tick(100);

    assert!(manager.registry().find(389, key.instance_id).is_none());
    assert_eq!(manager.stats().update_count(key), 0, "stats were forgotten");
    assert!(manager.registry().find(0, 0).is_some(), "continent survives");

    manager.unload_all();
}

#[test]
fn straggling_map_does_not_stall_the_world() {
    let mut cfg = config(2, false);
    cfg.watchdog.freeze_detect_ms = 100;
    let mut delays = HashMap::new();
    delays.insert(389u32, 400u64);
    let manager = manager_with(cfg, delays);
    manager.initialize().unwrap();

    let player = PlayerInfo::new(9, "Wanderer");
    let world = manager.registry().create_map(0, Actor::Other).unwrap();
    world.add_player(9);
    let dungeon = manager
        .registry()
        .create_map(389, Actor::Player(&player))
        .unwrap();
    dungeon.add_player(9);

    // the dungeon outruns the 100ms barrier; the tick completes anyway
    manager.tick(100);
    assert_eq!(manager.stats().update_count(world.map_id()), 1);

    // the next round runs without deadlock
    manager.tick(100);
    assert_eq!(manager.stats().update_count(world.map_id()), 2);

    manager.unload_all();
}

#[test]
fn dynamic_balancing_grows_the_pool_under_load() {
    let mut cfg = config(3, true);
    cfg.balancer.balance_interval_ticks = 2;
    let mut delays = HashMap::new();
    delays.insert(0u32, 90u64);
    let manager = manager_with(cfg, delays);
    manager.initialize().unwrap();
    assert_eq!(manager.pool().current_thread_count(), 1, "dynamic mode starts at one");

    let world = manager.registry().create_map(0, Actor::Other).unwrap();
    world.add_player(1);

    // back-to-back busy ticks: ~90ms work, no sleep in between
    for _ in 0..8 {
        manager.tick(100);
    }
    assert!(
        manager.pool().current_thread_count() >= 2,
        "pool should have grown, is {}",
        manager.pool().current_thread_count()
    );

    manager.unload_all();
}

#[test]
fn unload_all_drains_registry_and_pool() {
    let manager = manager_with(config(2, false), HashMap::new());
    manager.initialize().unwrap();
    manager.registry().create_map(0, Actor::Other).unwrap();

    manager.tick(100);
    manager.unload_all();

    assert!(manager.registry().is_empty());
    assert!(!manager.pool().activated());
    assert_eq!(manager.pool().current_thread_count(), 0);
}

#[test]
fn delete_instance_forgets_statistics() {
    let manager = manager_with(config(1, false), HashMap::new());
    manager.initialize().unwrap();

    let player = PlayerInfo::new(9, "Wanderer");
    let dungeon = manager
        .registry()
        .create_map(389, Actor::Player(&player))
        .unwrap();
    dungeon.add_player(9);
    let key = dungeon.map_id();

    manager.tick(100);
    assert_eq!(manager.stats().update_count(key), 1);

    assert!(manager.delete_instance(389, key.instance_id));
    assert!(manager.registry().find(389, key.instance_id).is_none());
    assert_eq!(manager.stats().update_count(key), 0);

    manager.unload_all();
}
