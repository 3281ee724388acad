//! WorldCore map server daemon.
//!
//! Boots the map scheduling core: configuration, the map catalogue, the
//! registry and manager, the freeze watchdog, the crash recovery thread and
//! the fatal-signal handler. The main thread runs the world loop, feeding
//! elapsed time into the manager until a termination signal arrives.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, error, info};

use wc_config::ConfigLoader;
use wc_maps::{
    Actor, CrashRecovery, InstanceTemplate, MapEntry, MapManager, MapRegistry, NoSaves,
    StaticGridCatalog, StaticMapCatalog,
};
use wc_updater::crash;
use wc_updater::{FreezeWatchdog, WatchdogSettings, WatchedCounter};

use wc_common::time::WorldClock;
use wc_common::{Difficulty, MapKind};

/// World loop sleep between iterations.
const WORLD_SLEEP_MS: u64 = 50;

/// Loops between status log lines.
const STATUS_EVERY_LOOPS: u32 = 1200;

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    wc_common::logging::init_logging();

    info!("Starting WorldCore map server");

    let config = ConfigLoader::new()
        .load()
        .context("failed to load configuration")?;
    info!(
        threads = config.updater.num_threads,
        dynamic = config.updater.dynamic_threads,
        update_interval_ms = config.updater.update_interval_ms,
        "Configuration loaded"
    );

    let clock = WorldClock::new();
    let registry = Arc::new(MapRegistry::new(
        Arc::new(demo_catalog()),
        Arc::new(StaticGridCatalog::new()),
        Arc::new(NoSaves),
        clock,
        config.maps.clone(),
    ));
    let manager = Arc::new(MapManager::new(config.clone(), registry.clone(), clock));
    manager
        .initialize()
        .context("failed to start the update pool")?;

    // Continents exist for the server's whole life; bring them up front.
    for map_id in [0u32, 1] {
        if registry.create_map(map_id, Actor::Other).is_none() {
            error!(map_id, "Continent missing from the catalogue");
        }
    }

    install_shutdown_handler();
    crash::install_crash_handler();

    let recovery = if config.recovery.enabled {
        Some(
            CrashRecovery::spawn(
                manager.pool().clone(),
                manager.stats().clone(),
                config.recovery.clone(),
            )
            .context("failed to start crash recovery")?,
        )
    } else {
        info!("Crash recovery disabled; worker crashes stop the world");
        None
    };

    let world_loop_counter = Arc::new(AtomicU32::new(0));
    let watchdog = if config.watchdog.enabled {
        let pool = manager.pool().clone();
        Some(
            FreezeWatchdog::spawn(
                WatchdogSettings {
                    check_period_ms: config.watchdog.check_period_ms,
                    stall_ms: config.watchdog.freeze_detect_ms,
                    max_stuck_ms: config.watchdog.max_stuck_ms,
                },
                vec![
                    WatchedCounter {
                        name: "map-ticks",
                        counter: manager.tick_counter(),
                    },
                    WatchedCounter {
                        name: "world-loop",
                        counter: world_loop_counter.clone(),
                    },
                ],
                Arc::new(move |name| {
                    if name == "map-ticks" {
                        pool.force_end_round();
                    }
                }),
                Arc::new(|name| {
                    error!(counter = name, "World hangs, killing server to preserve a core");
                    crash::escalate_hang();
                }),
            )
            .context("failed to start the freeze watchdog")?,
        )
    } else {
        None
    };

    info!("World loop running");
    run_world_loop(&manager, &world_loop_counter);

    info!("Shutting down");
    if let Some(watchdog) = watchdog {
        watchdog.stop();
    }
    manager.unload_all();
    if let Some(recovery) = recovery {
        recovery.stop();
    }

    info!("Halted cleanly");
    Ok(())
}

fn run_world_loop(manager: &MapManager, world_loop_counter: &AtomicU32) {
    let mut last = Instant::now();
    while !SHUTDOWN.load(Ordering::SeqCst) {
        let diff = last.elapsed().as_millis() as u64;
        last = Instant::now();

        manager.tick(diff);
        let loops = world_loop_counter.fetch_add(1, Ordering::SeqCst) + 1;

        if loops % STATUS_EVERY_LOOPS == 0 {
            let snapshot = manager.snapshot();
            debug!(
                maps = manager.registry().len(),
                instances = manager.registry().num_instances(),
                players = manager.registry().num_players_in_instances(),
                threads = snapshot.current_threads,
                preferred = snapshot.preferred_threads,
                "Server status"
            );
        }

        std::thread::sleep(Duration::from_millis(WORLD_SLEEP_MS));
    }
}

/// A small built-in catalogue standing in for the game data stores.
fn demo_catalog() -> StaticMapCatalog {
    let mut catalog = StaticMapCatalog::new();
    catalog
        .add_entry(MapEntry {
            map_id: 0,
            name: "Eastern Kingdoms".into(),
            kind: MapKind::World,
            heroic_requires_achievement: None,
        })
        .add_entry(MapEntry {
            map_id: 1,
            name: "Kalimdor".into(),
            kind: MapKind::World,
            heroic_requires_achievement: None,
        })
        .add_entry(MapEntry {
            map_id: 389,
            name: "Ragefire Chasm".into(),
            kind: MapKind::Dungeon,
            heroic_requires_achievement: None,
        })
        .add_entry(MapEntry {
            map_id: 533,
            name: "Naxxramas".into(),
            kind: MapKind::Raid,
            heroic_requires_achievement: None,
        })
        .add_entry(MapEntry {
            map_id: 30,
            name: "Alterac Valley".into(),
            kind: MapKind::BattleGround,
            heroic_requires_achievement: None,
        })
        .add_template(InstanceTemplate {
            map_id: 389,
            max_players: 5,
        })
        .add_template(InstanceTemplate {
            map_id: 533,
            max_players: 40,
        })
        .add_difficulty(389, Difficulty::Normal)
        .add_difficulty(533, Difficulty::Raid10Normal)
        .add_difficulty(533, Difficulty::Raid25Normal)
        .add_bracket(30, 51, Difficulty::REGULAR);
    catalog
}

#[cfg(unix)]
fn install_shutdown_handler() {
    extern "C" fn on_terminate(_signo: libc::c_int) {
        SHUTDOWN.store(true, Ordering::SeqCst);
    }
    let handler: extern "C" fn(libc::c_int) = on_terminate;
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = handler as usize;
        action.sa_flags = 0;
        libc::sigemptyset(&mut action.sa_mask);
        libc::sigaction(libc::SIGINT, &action, std::ptr::null_mut());
        libc::sigaction(libc::SIGTERM, &action, std::ptr::null_mut());
    }
}

#[cfg(not(unix))]
fn install_shutdown_handler() {}
