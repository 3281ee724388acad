//! Logging bootstrap for the world server.
//!
//! Almost every interesting line comes from a named auxiliary thread
//! (`map-worker-N`, `freeze-watchdog`, `crash-recovery`), so the format
//! leads with the thread name. Level filtering comes from `RUST_LOG`
//! (default: info), e.g. `RUST_LOG=wc_updater=debug,wc_maps=trace`.

use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber. Safe to call more than once; later calls
/// keep the first subscriber.
pub fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_names(true)
        .with_ansi(true)
        .try_init();
}
