//! WorldCore Update Engine
//!
//! This crate provides the generic parallel update machinery with:
//! - ActivationQueue: bounded FIFO of update requests with activate/deactivate states
//! - UpdatePool: worker pool draining the queue behind a round barrier
//! - LoadBalancer: adaptive preferred-thread-count control from work/idle ratios
//! - FreezeWatchdog: stall detection over progress counters with crash escalation
//! - crash: async-signal-safe side channel between fatal-signal handlers and
//!   the recovery thread
//!
//! The engine is generic over the updated entity: anything implementing
//! [`Updatable`] can be scheduled. Domain reactions to update lifecycle events
//! (statistics, quarantine on panic) hang off the [`UpdateObserver`] trait.

pub mod balancer;
pub mod crash;
pub mod error;
pub mod pool;
pub mod queue;
pub mod request;
pub mod watchdog;

pub use balancer::{BalancerSettings, LoadBalancer};
pub use error::UpdaterError;
pub use pool::{UpdatePool, WorkerEntry};
pub use queue::ActivationQueue;
pub use request::UpdateRequest;
pub use watchdog::{FreezeWatchdog, WatchdogSettings, WatchedCounter};

pub type Result<T> = std::result::Result<T, UpdaterError>;

/// An entity the pool can drive. One `update` call per entity per round; the
/// implementation owns its interior locking.
pub trait Updatable: Send + Sync + 'static {
    fn update(&self, diff_ms: u32);

    /// Short label for log lines ("map 533:42").
    fn update_label(&self) -> String;
}

/// Hooks invoked by workers around each `update` call.
///
/// All methods run on the worker thread that processed the request and must
/// not block on the pool itself.
pub trait UpdateObserver<T>: Send + Sync {
    fn on_update_begin(&self, _target: &T) {}

    fn on_update_end(&self, _target: &T, _duration_ms: u64) {}

    /// The update panicked; the worker survived and the target's state is
    /// suspect.
    fn on_update_panic(&self, _target: &T) {}
}
