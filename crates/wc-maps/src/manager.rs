//! Map manager: the tick driver over the registry and the update pool.
//!
//! Every update interval the manager samples the load balancer, resizes the
//! pool when the preferred thread count moved, enqueues one update request
//! per live map, blocks on the round barrier, and sweeps unloadable maps.
//! The world loop calls [`MapManager::tick`] once per iteration; the
//! interval timer decides when a round actually runs.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use wc_common::time::{IntervalTimer, WorldClock};
use wc_common::{MapId, PoolSnapshot};
use wc_config::WorldConfig;
use wc_updater::{BalancerSettings, LoadBalancer, Updatable, UpdatePool};

use crate::map::GameMap;
use crate::registry::MapRegistry;
use crate::stats::MapStatistics;

pub struct MapManager {
    registry: Arc<MapRegistry>,
    pool: Arc<UpdatePool<GameMap>>,
    stats: Arc<MapStatistics>,
    balancer: Mutex<LoadBalancer>,
    update_timer: Mutex<IntervalTimer>,
    /// Bumped once per completed round; watched by the freeze watchdog.
    tick_counter: Arc<AtomicU32>,
    clock: WorldClock,
    config: WorldConfig,
}

impl MapManager {
    pub fn new(config: WorldConfig, registry: Arc<MapRegistry>, clock: WorldClock) -> Self {
        let stats = Arc::new(MapStatistics::new(clock));
        let pool = Arc::new(UpdatePool::with_observer(
            config.updater.queue_capacity,
            clock,
            stats.clone(),
        ));
        let balancer = LoadBalancer::new(
            BalancerSettings {
                dynamic: config.updater.dynamic_threads,
                configured_threads: config.updater.num_threads,
                max_threads: config.updater.max_threads,
                balance_interval_ms: config.updater.update_interval_ms
                    * config.balancer.balance_interval_ticks as u64,
                load_high: config.balancer.load_high,
                load_low: config.balancer.load_low,
            },
            clock.now_ms(),
        );
        let update_timer = IntervalTimer::new(config.updater.update_interval_ms);

        Self {
            registry,
            pool,
            stats,
            balancer: Mutex::new(balancer),
            update_timer: Mutex::new(update_timer),
            tick_counter: Arc::new(AtomicU32::new(0)),
            clock,
            config,
        }
    }

    /// Start the worker pool at the configured size. A zero thread count
    /// selects the single-threaded fallback: maps update inline on the tick
    /// thread and the barrier is skipped.
    pub fn initialize(&self) -> wc_updater::Result<()> {
        let threads = self.balancer.lock().preferred_threads();
        if threads > 0 {
            self.pool.activate(threads)?;
            info!(
                threads,
                dynamic = self.config.updater.dynamic_threads,
                "Map update pool started"
            );
        } else {
            info!("Map update pool disabled; maps update inline on the tick thread");
        }
        Ok(())
    }

    /// World-loop entry point. Accumulates `diff_ms` and runs a full round
    /// once per update interval.
    pub fn tick(&self, diff_ms: u64) {
        let tick_diff = {
            let mut timer = self.update_timer.lock();
            timer.update(diff_ms);
            if !timer.passed() {
                return;
            }
            let current = timer.current();
            timer.set_current(0);
            current as u32
        };
        self.run_round(tick_diff);
        self.tick_counter.fetch_add(1, Ordering::SeqCst);
    }

    fn run_round(&self, diff_ms: u32) {
        let now = self.clock.now_ms();
        let (preferred, load) = {
            let mut balancer = self.balancer.lock();
            balancer.sample_begin(now, self.pool.current_thread_count());
            (balancer.preferred_threads(), balancer.last_load())
        };

        if preferred != self.pool.current_thread_count() {
            info!(preferred, load, "Map update pool reactivating at new thread count");
            if let Err(e) = self.pool.reactivate(preferred) {
                error!(error = %e, "Pool reactivation failed");
            }
        }

        let maps = self.registry.live_maps();
        let pooled = self.pool.activated();
        for map in &maps {
            if pooled {
                if let Err(e) = self.pool.schedule_update(map.clone(), diff_ms) {
                    warn!(
                        map = %map.update_label(),
                        error = %e,
                        "Failed to schedule map update; map skipped this tick"
                    );
                }
            } else {
                // inline fallback bypasses the pool, so feed the statistics
                // from here
                let started_ms = self.clock.now_ms();
                map.update(diff_ms);
                self.stats
                    .record_update(map.map_id(), self.clock.now_ms().saturating_sub(started_ms));
            }
        }

        if pooled {
            let remaining = self.pool.queue_wait(self.config.watchdog.freeze_detect_ms);
            if remaining > 0 {
                let now = self.clock.now_ms();
                for (tid, map, started_ms) in self.pool.active_updates() {
                    warn!(
                        tid,
                        map = %map.update_label(),
                        running_ms = now.saturating_sub(started_ms),
                        "Map update lagging behind the round barrier"
                    );
                }
                error!(
                    remaining,
                    active_workers = self.pool.active_worker_count(),
                    "Round barrier timed out with stragglers"
                );
            }
        }

        self.balancer
            .lock()
            .sample_end(self.clock.now_ms(), self.pool.current_thread_count());

        let now = self.clock.now_ms();
        for key in self.registry.sweep(now) {
            self.stats.forget(key);
            debug!(map = %key, "Map unloaded by sweep");
        }
    }

    /// Destroy one instance and drop its statistics.
    pub fn delete_instance(&self, map_id: u32, instance_id: u32) -> bool {
        let deleted = self.registry.delete_instance(map_id, instance_id);
        if deleted {
            self.stats.forget(MapId::new(map_id, instance_id));
        }
        deleted
    }

    /// Drain every map and stop the pool. Called once at shutdown.
    pub fn unload_all(&self) {
        info!("Unloading all maps");
        self.registry.unload_all();
        self.pool.deactivate();
    }

    pub fn registry(&self) -> &Arc<MapRegistry> {
        &self.registry
    }

    pub fn pool(&self) -> &Arc<UpdatePool<GameMap>> {
        &self.pool
    }

    pub fn stats(&self) -> &Arc<MapStatistics> {
        &self.stats
    }

    /// Progress counter for the freeze watchdog.
    pub fn tick_counter(&self) -> Arc<AtomicU32> {
        self.tick_counter.clone()
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        self.pool.snapshot(self.balancer.lock().preferred_threads())
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }
}
