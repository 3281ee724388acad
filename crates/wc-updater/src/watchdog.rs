//! Freeze watchdog.
//!
//! A dedicated thread polling a set of progress counters. A counter that
//! stops advancing for `stall_ms` triggers the stall hook each poll (wired to
//! the pool's force-end so a stuck round barrier returns); one that stays
//! frozen past `max_stuck_ms` triggers the hang hook, which in production
//! raises SIGABRT to preserve a core.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::error::UpdaterError;
use crate::Result;

/// Watchdog tuning, derived from configuration.
#[derive(Debug, Clone)]
pub struct WatchdogSettings {
    pub check_period_ms: u64,
    /// Non-progress span after which the stall hook fires. 0 disables.
    pub stall_ms: u64,
    /// Non-progress span after which the hang hook fires. 0 disables.
    pub max_stuck_ms: u64,
}

/// A progress counter under watch, bumped by the owning loop once per pass.
pub struct WatchedCounter {
    pub name: &'static str,
    pub counter: Arc<AtomicU32>,
}

struct Observed {
    last_value: u32,
    last_change: Instant,
    stall_logged: bool,
}

pub struct FreezeWatchdog {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl FreezeWatchdog {
    /// Start the watchdog thread. `on_stall` runs every poll for each stalled
    /// counter; `on_hang` runs when a counter exceeds the hard limit.
    pub fn spawn(
        settings: WatchdogSettings,
        counters: Vec<WatchedCounter>,
        on_stall: Arc<dyn Fn(&'static str) + Send + Sync>,
        on_hang: Arc<dyn Fn(&'static str) + Send + Sync>,
    ) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let handle = thread::Builder::new()
            .name("freeze-watchdog".into())
            .spawn(move || run(settings, counters, on_stall, on_hang, stop_flag))
            .map_err(|e| UpdaterError::Spawn(e.to_string()))?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Signal the watchdog to exit and join it.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run(
    settings: WatchdogSettings,
    counters: Vec<WatchedCounter>,
    on_stall: Arc<dyn Fn(&'static str) + Send + Sync>,
    on_hang: Arc<dyn Fn(&'static str) + Send + Sync>,
    stop: Arc<AtomicBool>,
) {
    info!(
        period_ms = settings.check_period_ms,
        max_stuck_ms = settings.max_stuck_ms,
        "Freeze watchdog started"
    );

    let started = Instant::now();
    let mut observed: Vec<Observed> = counters
        .iter()
        .map(|watched| Observed {
            last_value: watched.counter.load(Ordering::SeqCst),
            last_change: started,
            stall_logged: false,
        })
        .collect();

    while !stop.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(settings.check_period_ms));
        if stop.load(Ordering::SeqCst) {
            break;
        }
        let now = Instant::now();

        for (watched, seen) in counters.iter().zip(observed.iter_mut()) {
            let value = watched.counter.load(Ordering::SeqCst);
            if value != seen.last_value {
                seen.last_value = value;
                seen.last_change = now;
                seen.stall_logged = false;
                continue;
            }

            let stuck_ms = now.duration_since(seen.last_change).as_millis() as u64;
            if settings.stall_ms > 0 && stuck_ms >= settings.stall_ms {
                if !seen.stall_logged {
                    warn!(counter = watched.name, stuck_ms, "Progress counter stalled");
                    seen.stall_logged = true;
                }
                on_stall(watched.name);
            }
            if settings.max_stuck_ms > 0 && stuck_ms >= settings.max_stuck_ms {
                error!(
                    counter = watched.name,
                    stuck_ms,
                    max_stuck_ms = settings.max_stuck_ms,
                    "Loop hangs, escalating"
                );
                on_hang(watched.name);
            }
        }
    }

    info!("Freeze watchdog exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_hook(hits: Arc<AtomicUsize>) -> Arc<dyn Fn(&'static str) + Send + Sync> {
        Arc::new(move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn advancing_counter_never_stalls() {
        let counter = Arc::new(AtomicU32::new(0));
        let stalls = Arc::new(AtomicUsize::new(0));
        let hangs = Arc::new(AtomicUsize::new(0));

        let watchdog = FreezeWatchdog::spawn(
            WatchdogSettings {
                check_period_ms: 10,
                stall_ms: 30,
                max_stuck_ms: 0,
            },
            vec![WatchedCounter {
                name: "ticks",
                counter: counter.clone(),
            }],
            counting_hook(stalls.clone()),
            counting_hook(hangs.clone()),
        )
        .unwrap();

        for _ in 0..10 {
            counter.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(10));
        }
        watchdog.stop();
        assert_eq!(stalls.load(Ordering::SeqCst), 0);
        assert_eq!(hangs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn frozen_counter_triggers_stall_then_hang() {
        let counter = Arc::new(AtomicU32::new(7));
        let stalls = Arc::new(AtomicUsize::new(0));
        let hangs = Arc::new(AtomicUsize::new(0));

        let watchdog = FreezeWatchdog::spawn(
            WatchdogSettings {
                check_period_ms: 10,
                stall_ms: 30,
                max_stuck_ms: 120,
            },
            vec![WatchedCounter {
                name: "world",
                counter: counter.clone(),
            }],
            counting_hook(stalls.clone()),
            counting_hook(hangs.clone()),
        )
        .unwrap();

        thread::sleep(Duration::from_millis(250));
        watchdog.stop();
        assert!(stalls.load(Ordering::SeqCst) > 0);
        assert!(hangs.load(Ordering::SeqCst) > 0);
    }

    #[test]
    fn disabled_thresholds_stay_quiet() {
        let counter = Arc::new(AtomicU32::new(0));
        let stalls = Arc::new(AtomicUsize::new(0));
        let hangs = Arc::new(AtomicUsize::new(0));

        let watchdog = FreezeWatchdog::spawn(
            WatchdogSettings {
                check_period_ms: 10,
                stall_ms: 0,
                max_stuck_ms: 0,
            },
            vec![WatchedCounter {
                name: "idle",
                counter,
            }],
            counting_hook(stalls.clone()),
            counting_hook(hangs.clone()),
        )
        .unwrap();

        thread::sleep(Duration::from_millis(100));
        watchdog.stop();
        assert_eq!(stalls.load(Ordering::SeqCst), 0);
        assert_eq!(hangs.load(Ordering::SeqCst), 0);
    }
}
