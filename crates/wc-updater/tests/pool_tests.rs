//! UpdatePool integration tests
//!
//! Tests for:
//! - Round barrier semantics (one update per target per round)
//! - Straggler handling when an update outruns the barrier deadline
//! - Reactivation idempotence and resizing
//! - Panic containment and the observer hooks
//! - Hard worker removal bookkeeping

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use wc_common::time::WorldClock;
use wc_updater::{Updatable, UpdateObserver, UpdatePool, UpdaterError};

struct TestMap {
    name: String,
    delay_ms: u64,
    updates: AtomicU32,
    broken: AtomicBool,
    panic_next: AtomicBool,
}

impl TestMap {
    fn new(name: &str, delay_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            delay_ms,
            updates: AtomicU32::new(0),
            broken: AtomicBool::new(false),
            panic_next: AtomicBool::new(false),
        })
    }

    fn updates(&self) -> u32 {
        self.updates.load(Ordering::SeqCst)
    }
}

impl Updatable for TestMap {
    fn update(&self, _diff_ms: u32) {
        if self.panic_next.swap(false, Ordering::SeqCst) {
            panic!("scripted update failure");
        }
        self.updates.fetch_add(1, Ordering::SeqCst);
        if self.delay_ms > 0 {
            std::thread::sleep(Duration::from_millis(self.delay_ms));
        }
    }

    fn update_label(&self) -> String {
        self.name.clone()
    }
}

#[derive(Default)]
struct RecordingObserver {
    begins: AtomicU32,
    ends: AtomicU32,
    panics: AtomicU32,
}

impl UpdateObserver<TestMap> for RecordingObserver {
    fn on_update_begin(&self, _target: &TestMap) {
        self.begins.fetch_add(1, Ordering::SeqCst);
    }

    fn on_update_end(&self, _target: &TestMap, _duration_ms: u64) {
        self.ends.fetch_add(1, Ordering::SeqCst);
    }

    fn on_update_panic(&self, target: &TestMap) {
        target.broken.store(true, Ordering::SeqCst);
        self.panics.fetch_add(1, Ordering::SeqCst);
    }
}

fn pool() -> UpdatePool<TestMap> {
    UpdatePool::new(256, WorldClock::new())
}

#[test]
fn single_worker_three_rounds() {
    let pool = pool();
    pool.activate(1).unwrap();

    let map = TestMap::new("world:0", 10);
    for round in 1..=3u32 {
        pool.schedule_update(map.clone(), 100).unwrap();
        let remaining = pool.queue_wait(2000);
        assert_eq!(remaining, 0);
        assert_eq!(map.updates(), round);
        assert_eq!(pool.pending_requests(), 0);
    }

    pool.deactivate();
}

#[test]
fn fifty_maps_one_slow_all_complete_within_barrier() {
    let pool = pool();
    pool.activate(4).unwrap();

    let maps: Vec<_> = (0..50)
        .map(|i| TestMap::new(&format!("dungeon:{i}"), if i == 17 { 500 } else { 5 }))
        .collect();

    for map in &maps {
        pool.schedule_update(map.clone(), 100).unwrap();
    }
    let remaining = pool.queue_wait(2000);
    assert_eq!(remaining, 0);
    for map in &maps {
        assert_eq!(map.updates(), 1, "{} missed its update", map.name);
    }

    pool.deactivate();
}

#[test]
fn straggler_is_reported_and_next_round_proceeds() {
    let pool = pool();
    pool.activate(4).unwrap();

    let slow = TestMap::new("dungeon:slow", 1000);
    let fast: Vec<_> = (0..3).map(|i| TestMap::new(&format!("dungeon:{i}"), 5)).collect();

    pool.schedule_update(slow.clone(), 100).unwrap();
    for map in &fast {
        pool.schedule_update(map.clone(), 100).unwrap();
    }

    let remaining = pool.queue_wait(150);
    assert_eq!(remaining, 1, "the slow map should outrun the barrier");
    assert!(!pool.active_updates().is_empty());

    // next round: same thread count is a no-op reactivation, the fast maps
    // update again and the straggler's late completion does not disturb the
    // new round's pending count
    pool.reactivate(4).unwrap();
    for map in &fast {
        pool.schedule_update(map.clone(), 100).unwrap();
    }
    let remaining = pool.queue_wait(2000);
    assert_eq!(remaining, 0);
    for map in &fast {
        assert_eq!(map.updates(), 2);
    }

    pool.deactivate();
    assert_eq!(slow.updates(), 1);
}

#[test]
fn reactivate_is_idempotent_and_resizes() {
    let pool = pool();
    pool.activate(3).unwrap();
    assert_eq!(pool.current_thread_count(), 3);

    pool.reactivate(3).unwrap();
    assert_eq!(pool.current_thread_count(), 3);
    assert!(pool.activated());

    pool.reactivate(2).unwrap();
    assert_eq!(pool.current_thread_count(), 2);
    assert!(pool.activated());

    let map = TestMap::new("world:0", 0);
    pool.schedule_update(map.clone(), 100).unwrap();
    assert_eq!(pool.queue_wait(1000), 0);
    assert_eq!(map.updates(), 1);

    pool.deactivate();
    assert_eq!(pool.current_thread_count(), 0);
    assert!(!pool.activated());
}

#[test]
fn panic_is_contained_and_worker_survives() {
    let observer = Arc::new(RecordingObserver::default());
    let pool = UpdatePool::with_observer(256, WorldClock::new(), observer.clone());
    pool.activate(1).unwrap();

    let map = TestMap::new("dungeon:13", 0);
    map.panic_next.store(true, Ordering::SeqCst);

    pool.schedule_update(map.clone(), 100).unwrap();
    assert_eq!(pool.queue_wait(2000), 0);
    assert_eq!(observer.panics.load(Ordering::SeqCst), 1);
    assert!(map.broken.load(Ordering::SeqCst));
    assert_eq!(map.updates(), 0);

    // the same worker keeps serving requests
    pool.schedule_update(map.clone(), 100).unwrap();
    assert_eq!(pool.queue_wait(2000), 0);
    assert_eq!(map.updates(), 1);
    assert_eq!(observer.ends.load(Ordering::SeqCst), 1);
    assert_eq!(
        observer.begins.load(Ordering::SeqCst),
        observer.ends.load(Ordering::SeqCst) + observer.panics.load(Ordering::SeqCst)
    );

    pool.deactivate();
}

#[test]
fn inactive_pool_rejects_scheduling() {
    let pool = pool();
    let map = TestMap::new("world:0", 0);
    assert_eq!(
        pool.schedule_update(map, 100).unwrap_err(),
        UpdaterError::QueueInactive
    );
    assert_eq!(pool.activate(0).unwrap_err(), UpdaterError::NoThreads);
}

#[test]
fn hard_kill_lowers_thread_count_and_reactivate_restores() {
    let pool = pool();
    pool.activate(2).unwrap();

    let slow = TestMap::new("dungeon:slow", 800);
    pool.schedule_update(slow, 100).unwrap();

    // wait until a worker picks the request up
    let mut victim = None;
    for _ in 0..100 {
        if let Some((tid, _, _)) = pool.active_updates().into_iter().next() {
            victim = Some(tid);
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    let victim = victim.expect("no worker picked up the slow update");

    pool.kill_worker(victim, true);
    assert_eq!(pool.current_thread_count(), 1);
    // the killed worker's request was counted off
    assert_eq!(pool.queue_wait(500), 0);

    pool.reactivate(2).unwrap();
    assert_eq!(pool.current_thread_count(), 2);

    let map = TestMap::new("world:0", 0);
    pool.schedule_update(map.clone(), 100).unwrap();
    assert_eq!(pool.queue_wait(2000), 0);
    assert_eq!(map.updates(), 1);

    pool.deactivate();
}

#[test]
fn force_end_round_releases_a_stuck_barrier() {
    let pool = Arc::new(pool());
    pool.activate(1).unwrap();

    let slow = TestMap::new("dungeon:slow", 1200);
    pool.schedule_update(slow, 100).unwrap();
    std::thread::sleep(Duration::from_millis(50));

    let barrier_pool = pool.clone();
    let handle = std::thread::spawn(move || {
        // infinite barrier; only the freeze hook can end it early
        barrier_pool.queue_wait(0)
    });

    std::thread::sleep(Duration::from_millis(100));
    pool.force_end_round();

    let remaining = handle.join().unwrap();
    assert_eq!(remaining, 1, "the in-flight update should be reported");

    pool.deactivate();
}
