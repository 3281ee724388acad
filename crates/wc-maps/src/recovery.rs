//! Crash recovery: per-map quarantine for worker crashes.
//!
//! The fatal-signal handler (see `wc_updater::crash`) records the faulting
//! worker and terminates just that thread; this module's dedicated thread
//! consumes the record and applies the quarantine ladder with normal locks
//! and logging. Escalation restores the default disposition and re-raises
//! the recorded signal, taking the process down with the original status.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{error, info, warn};

use wc_config::RecoveryConfig;
use wc_updater::crash::{self, CrashRecord};
use wc_updater::{Updatable, UpdatePool, UpdaterError};

use crate::map::GameMap;
use crate::stats::MapStatistics;

/// Outcome of the quarantine ladder for one crash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashAction {
    /// Not recoverable; the process dies with the original signal.
    Escalate,
    /// Quarantine the map (updates become no-ops) and replace the worker.
    QuarantineAndRestart,
    /// First offense forgiven: replace the worker, leave the map running.
    RestartOnly,
}

/// The quarantine ladder: recovery disabled or a non-skippable continent
/// escalates, a map over its break budget escalates, a first crash may be
/// forgiven, everything else quarantines the map.
///
/// `break_count` is the count before this crash is recorded.
pub fn crash_verdict(is_continent: bool, break_count: u32, config: &RecoveryConfig) -> CrashAction {
    if !config.enabled {
        return CrashAction::Escalate;
    }
    if is_continent && !config.skip_continents {
        return CrashAction::Escalate;
    }
    if break_count > config.max_breaks {
        return CrashAction::Escalate;
    }
    if !config.try_skip_first || break_count > 0 {
        CrashAction::QuarantineAndRestart
    } else {
        CrashAction::RestartOnly
    }
}

/// Dedicated consumer of the crash side channel.
pub struct CrashRecovery {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl CrashRecovery {
    pub fn spawn(
        pool: Arc<UpdatePool<GameMap>>,
        stats: Arc<MapStatistics>,
        config: RecoveryConfig,
    ) -> Result<Self, UpdaterError> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let handle = thread::Builder::new()
            .name("crash-recovery".into())
            .spawn(move || run(pool, stats, config, stop_flag))
            .map_err(|e| UpdaterError::Spawn(e.to_string()))?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Signal the recovery thread to exit and join it.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run(
    pool: Arc<UpdatePool<GameMap>>,
    stats: Arc<MapStatistics>,
    config: RecoveryConfig,
    stop: Arc<AtomicBool>,
) {
    info!("Crash recovery thread started");
    let poll = Duration::from_millis(config.poll_interval_ms.max(1));
    while !stop.load(Ordering::SeqCst) {
        match crash::take_crash() {
            Some(record) => handle_crash(record, &pool, &stats, &config),
            None => thread::sleep(poll),
        }
    }
    info!("Crash recovery thread exiting");
}

fn handle_crash(
    record: CrashRecord,
    pool: &UpdatePool<GameMap>,
    stats: &MapStatistics,
    config: &RecoveryConfig,
) {
    error!(
        signo = record.signo,
        tid = record.tid,
        "Fatal signal captured in update worker"
    );

    let Some(map) = pool.current_for_thread(record.tid) else {
        error!(
            tid = record.tid,
            "Crashed worker is not updating any map; stopping world"
        );
        crash::restore_default_and_raise(record.signo);
        return;
    };

    let breaks = stats.break_count(map.map_id());
    error!(map = %map.update_label(), breaks, "Worker crashed while updating map");

    match crash_verdict(map.is_continent(), breaks, config) {
        CrashAction::Escalate => {
            error!(map = %map.update_label(), "Crash is not recoverable; stopping world");
            crash::restore_default_and_raise(record.signo);
        }
        action => {
            if action == CrashAction::QuarantineAndRestart {
                map.set_broken(true);
                warn!(map = %map.update_label(), "Map quarantined; updates disabled");
            }
            let breaks = stats.record_break(map.map_id());
            warn!(
                map = %map.update_label(),
                breaks,
                "Restarting virtual map server for this map"
            );
            pool.kill_worker(record.tid, true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RecoveryConfig {
        RecoveryConfig {
            enabled: true,
            max_breaks: 3,
            try_skip_first: true,
            skip_continents: true,
            poll_interval_ms: 50,
        }
    }

    #[test]
    fn disabled_recovery_always_escalates() {
        let config = RecoveryConfig {
            enabled: false,
            ..config()
        };
        assert_eq!(crash_verdict(false, 0, &config), CrashAction::Escalate);
    }

    #[test]
    fn first_crash_is_forgiven_with_skip_first() {
        assert_eq!(crash_verdict(false, 0, &config()), CrashAction::RestartOnly);
    }

    #[test]
    fn second_crash_quarantines_the_map() {
        assert_eq!(
            crash_verdict(false, 1, &config()),
            CrashAction::QuarantineAndRestart
        );
    }

    #[test]
    fn without_skip_first_the_first_crash_quarantines() {
        let config = RecoveryConfig {
            try_skip_first: false,
            ..config()
        };
        assert_eq!(
            crash_verdict(false, 0, &config),
            CrashAction::QuarantineAndRestart
        );
    }

    #[test]
    fn break_budget_is_a_strict_bound() {
        let config = config();
        assert_eq!(
            crash_verdict(false, 3, &config),
            CrashAction::QuarantineAndRestart
        );
        assert_eq!(crash_verdict(false, 4, &config), CrashAction::Escalate);
    }

    #[test]
    fn continent_crash_depends_on_skip_continents() {
        let forgiving = config();
        assert_eq!(crash_verdict(true, 0, &forgiving), CrashAction::RestartOnly);

        let strict = RecoveryConfig {
            skip_continents: false,
            ..config()
        };
        assert_eq!(crash_verdict(true, 0, &strict), CrashAction::Escalate);
        // non-continents unaffected
        assert_eq!(crash_verdict(false, 0, &strict), CrashAction::RestartOnly);
    }
}
