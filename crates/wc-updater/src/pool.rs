//! Update pool: a fixed-size set of workers draining the activation queue.
//!
//! Each round the tick driver enqueues one request per live target, then
//! blocks in [`UpdatePool::queue_wait`] until every request of the round has
//! completed, the deadline elapses, or the watchdog force-ends the wait. The
//! pool tracks which worker is processing which target so the crash pathway
//! can identify and quarantine the offending target.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, warn};

use wc_common::time::WorldClock;
use wc_common::PoolSnapshot;

use crate::crash;
use crate::error::UpdaterError;
use crate::queue::ActivationQueue;
use crate::request::UpdateRequest;
use crate::{Result, Updatable, UpdateObserver};

/// Poll period for infinite barrier waits, so the freeze hook gets checked.
const FREEZE_POLL_MS: u64 = 100;

/// What a worker is processing right now.
pub struct CurrentUpdate<T> {
    pub target: Arc<T>,
    pub diff_ms: u32,
    pub started_ms: u64,
}

/// Per-worker record. `current` is `Some` exactly between dequeue and
/// completion of one request.
pub struct WorkerEntry<T> {
    pub worker_id: u64,
    pub current: Option<CurrentUpdate<T>>,
}

struct PoolState {
    current_threads: usize,
    live_workers: usize,
    pending_requests: usize,
    /// Barrier round generation; bumped whenever the pending counter resets.
    round: u64,
}

struct Shared<T: Updatable> {
    queue: ActivationQueue<T>,
    state: Mutex<PoolState>,
    done: Condvar,
    workers: DashMap<u64, WorkerEntry<T>>,
    active_workers: AtomicUsize,
    force_end: AtomicBool,
    observer: Option<Arc<dyn UpdateObserver<T>>>,
    clock: WorldClock,
}

impl<T: Updatable> Shared<T> {
    /// A request from `round` finished (or was cancelled). Decrements are
    /// ignored for rounds that already ended, so stragglers from a timed-out
    /// round cannot eat into the next round's pending total.
    fn finish_request(&self, round: u64) {
        let mut st = self.state.lock();
        if st.round == round {
            st.pending_requests = st.pending_requests.saturating_sub(1);
        } else {
            debug!(round, current_round = st.round, "Late completion from an ended round");
        }
        drop(st);
        self.done.notify_all();
    }
}

pub struct UpdatePool<T: Updatable> {
    shared: Arc<Shared<T>>,
}

impl<T: Updatable> UpdatePool<T> {
    pub fn new(queue_capacity: usize, clock: WorldClock) -> Self {
        Self::with_observer_opt(queue_capacity, clock, None)
    }

    pub fn with_observer(
        queue_capacity: usize,
        clock: WorldClock,
        observer: Arc<dyn UpdateObserver<T>>,
    ) -> Self {
        Self::with_observer_opt(queue_capacity, clock, Some(observer))
    }

    fn with_observer_opt(
        queue_capacity: usize,
        clock: WorldClock,
        observer: Option<Arc<dyn UpdateObserver<T>>>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: ActivationQueue::new(queue_capacity),
                state: Mutex::new(PoolState {
                    current_threads: 0,
                    live_workers: 0,
                    pending_requests: 0,
                    round: 0,
                }),
                done: Condvar::new(),
                workers: DashMap::new(),
                active_workers: AtomicUsize::new(0),
                force_end: AtomicBool::new(false),
                observer,
                clock,
            }),
        }
    }

    /// Open the queue and spawn `num_threads` workers.
    pub fn activate(&self, num_threads: usize) -> Result<()> {
        if num_threads == 0 {
            return Err(UpdaterError::NoThreads);
        }
        {
            let mut st = self.shared.state.lock();
            if self.shared.queue.is_active() || st.live_workers > 0 {
                return Err(UpdaterError::AlreadyActive);
            }
            self.shared.queue.activate();
            st.current_threads = num_threads;
            st.pending_requests = 0;
        }

        for index in 0..num_threads {
            {
                self.shared.state.lock().live_workers += 1;
            }
            let shared = self.shared.clone();
            let spawned = thread::Builder::new()
                .name(format!("map-worker-{index}"))
                .spawn(move || worker_main(shared));
            if let Err(e) = spawned {
                error!(error = %e, "Failed to spawn update worker");
                self.shared.state.lock().live_workers -= 1;
                self.deactivate();
                return Err(UpdaterError::Spawn(e.to_string()));
            }
        }
        Ok(())
    }

    /// Close the queue, drop pending requests and wait for every worker to
    /// exit. Safe to call when never activated.
    pub fn deactivate(&self) {
        self.shared.queue.deactivate();
        let mut st = self.shared.state.lock();
        while st.live_workers > 0 {
            self.shared.done.wait(&mut st);
        }
        st.current_threads = 0;
        st.pending_requests = 0;
        st.round += 1;
        drop(st);
        self.shared.workers.clear();
        self.shared.active_workers.store(0, Ordering::SeqCst);
        self.shared.force_end.store(false, Ordering::SeqCst);
    }

    /// Resize to `num_threads`, rebuilding the worker set unless the pool is
    /// already active at that size. Starts a fresh round either way.
    /// `num_threads == 0` leaves the pool deactivated (inline fallback mode).
    pub fn reactivate(&self, num_threads: usize) -> Result<()> {
        {
            let mut st = self.shared.state.lock();
            st.pending_requests = 0;
            st.round += 1;
            if self.shared.queue.is_active() && st.current_threads == num_threads {
                return Ok(());
            }
        }
        self.deactivate();
        if num_threads == 0 {
            return Ok(());
        }
        self.activate(num_threads)
    }

    pub fn activated(&self) -> bool {
        self.shared.queue.is_active()
    }

    /// Enqueue one update request for `target`. Blocks while the queue is
    /// full; this is the only backpressure path between the tick driver and
    /// the pool.
    pub fn schedule_update(&self, target: Arc<T>, diff_ms: u32) -> Result<()> {
        if !self.shared.queue.is_active() {
            return Err(UpdaterError::QueueInactive);
        }
        // Count the request before it becomes visible to workers, so a fast
        // completion can never decrement ahead of the increment.
        let round = {
            let mut st = self.shared.state.lock();
            st.pending_requests += 1;
            st.round
        };
        let request = UpdateRequest::new(target, diff_ms, self.shared.clock.now_ms(), round);
        if let Err(e) = self.shared.queue.enqueue(request) {
            self.shared.finish_request(round);
            return Err(e);
        }
        Ok(())
    }

    /// Round barrier: wait until every request of the current round has
    /// completed, no worker can ever complete them, or the deadline elapses.
    /// Returns the number of requests still pending (stragglers); the pending
    /// counter is reset and the round ended regardless.
    pub fn queue_wait(&self, max_delay_ms: u64) -> usize {
        let deadline = Instant::now() + Duration::from_millis(max_delay_ms);
        let mut st = self.shared.state.lock();
        let mut remaining = 0;

        while st.current_threads > 0 && st.pending_requests > 0 {
            let timed_out = if max_delay_ms == 0 {
                self.shared
                    .done
                    .wait_for(&mut st, Duration::from_millis(FREEZE_POLL_MS))
                    .timed_out()
            } else {
                self.shared.done.wait_until(&mut st, deadline).timed_out()
            };
            if !timed_out {
                continue;
            }
            if self.shared.force_end.swap(false, Ordering::SeqCst) {
                warn!(pending = st.pending_requests, "Round barrier force-ended by watchdog");
                remaining = st.pending_requests;
                break;
            }
            if self.shared.active_workers.load(Ordering::SeqCst) == 0
                && self.shared.queue.is_empty()
            {
                // Nothing running and nothing queued: the requests died with
                // their workers.
                remaining = st.pending_requests;
                break;
            }
            if max_delay_ms != 0 {
                remaining = st.pending_requests;
                break;
            }
        }

        st.pending_requests = 0;
        st.round += 1;
        remaining
    }

    /// Watchdog hook: make a stuck `queue_wait` return with its pending count
    /// at the next timeout check.
    pub fn force_end_round(&self) {
        self.shared.force_end.store(true, Ordering::SeqCst);
        self.shared.done.notify_all();
    }

    /// The target the given worker thread is currently updating, if any.
    pub fn current_for_thread(&self, tid: u64) -> Option<Arc<T>> {
        self.shared
            .workers
            .get(&tid)
            .and_then(|entry| entry.current.as_ref().map(|c| c.target.clone()))
    }

    /// Every in-flight update: `(worker tid, target, started_ms)`. Used for
    /// straggler logging after a barrier timeout.
    pub fn active_updates(&self) -> Vec<(u64, Arc<T>, u64)> {
        self.shared
            .workers
            .iter()
            .filter_map(|entry| {
                entry
                    .current
                    .as_ref()
                    .map(|c| (entry.worker_id, c.target.clone(), c.started_ms))
            })
            .collect()
    }

    /// Remove a worker that died outside the normal exit path. `hard` drops
    /// its table entry and lowers the thread count so the next `reactivate`
    /// rebuilds the pool at full strength; the in-flight request is counted
    /// off either way.
    pub fn kill_worker(&self, tid: u64, hard: bool) {
        let round = {
            let mut st = self.shared.state.lock();
            if hard {
                st.live_workers = st.live_workers.saturating_sub(1);
                st.current_threads = st.current_threads.saturating_sub(1);
            }
            st.round
        };
        if hard {
            let had_current = self
                .shared
                .workers
                .remove(&tid)
                .map(|(_, entry)| entry.current.is_some())
                .unwrap_or(false);
            crash::unregister_worker(tid);
            if had_current {
                self.shared.active_workers.fetch_sub(1, Ordering::SeqCst);
            }
            warn!(tid, "Worker removed from pool");
        }
        self.shared.finish_request(round);
    }

    pub fn current_thread_count(&self) -> usize {
        self.shared.state.lock().current_threads
    }

    pub fn active_worker_count(&self) -> usize {
        self.shared.active_workers.load(Ordering::SeqCst)
    }

    pub fn pending_requests(&self) -> usize {
        self.shared.state.lock().pending_requests
    }

    pub fn queue_len(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn snapshot(&self, preferred_threads: usize) -> PoolSnapshot {
        let st = self.shared.state.lock();
        PoolSnapshot {
            current_threads: st.current_threads,
            preferred_threads,
            active_workers: self.shared.active_workers.load(Ordering::SeqCst),
            pending_requests: st.pending_requests,
            queue_len: self.shared.queue.len(),
        }
    }
}

fn worker_main<T: Updatable>(shared: Arc<Shared<T>>) {
    let tid = crash::current_tid();
    if !crash::register_worker(tid) {
        warn!(tid, "Worker tid registry full; crash isolation unavailable for this worker");
    }
    shared.workers.insert(
        tid,
        WorkerEntry {
            worker_id: tid,
            current: None,
        },
    );
    debug!(tid, "Update worker started");

    loop {
        let request = match shared.queue.dequeue() {
            Ok(request) => request,
            Err(_) => break,
        };

        let started_ms = shared.clock.now_ms();
        if let Some(observer) = shared.observer.as_ref() {
            observer.on_update_begin(&request.target);
        }
        // A hard-killed worker loses its table entry; only the entry owner
        // may touch the active counter.
        let adopted = shared
            .workers
            .get_mut(&tid)
            .map(|mut entry| {
                entry.current = Some(CurrentUpdate {
                    target: request.target.clone(),
                    diff_ms: request.diff_ms,
                    started_ms,
                });
            })
            .is_some();
        if adopted {
            shared.active_workers.fetch_add(1, Ordering::SeqCst);
        }

        let outcome = catch_unwind(AssertUnwindSafe(|| request.target.update(request.diff_ms)));
        let duration_ms = shared.clock.now_ms().saturating_sub(started_ms);

        match outcome {
            Ok(()) => {
                if let Some(observer) = shared.observer.as_ref() {
                    observer.on_update_end(&request.target, duration_ms);
                }
            }
            Err(_) => {
                error!(
                    label = %request.target.update_label(),
                    duration_ms,
                    "Update panicked; worker survives"
                );
                if let Some(observer) = shared.observer.as_ref() {
                    observer.on_update_panic(&request.target);
                }
            }
        }

        let cleared = shared
            .workers
            .get_mut(&tid)
            .map(|mut entry| entry.current = None)
            .is_some();
        if adopted && cleared {
            shared.active_workers.fetch_sub(1, Ordering::SeqCst);
        }
        shared.finish_request(request.round);
        if !adopted || !cleared {
            // the pool removed this worker out from under us
            break;
        }
    }

    let was_registered = shared.workers.remove(&tid).is_some();
    crash::unregister_worker(tid);
    if was_registered {
        let mut st = shared.state.lock();
        st.live_workers = st.live_workers.saturating_sub(1);
    }
    shared.done.notify_all();
    debug!(tid, "Update worker exited");
}
