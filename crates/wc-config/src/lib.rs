//! WorldCore Configuration System
//!
//! This crate provides TOML-based configuration with environment variable
//! override support for the map-update scheduling core.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use wc_common::MAX_WORKERS;

mod loader;

pub use loader::ConfigLoader;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Root world-server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    pub updater: UpdaterConfig,
    pub balancer: BalancerConfig,
    pub watchdog: WatchdogConfig,
    pub recovery: RecoveryConfig,
    pub maps: MapsConfig,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            updater: UpdaterConfig::default(),
            balancer: BalancerConfig::default(),
            watchdog: WatchdogConfig::default(),
            recovery: RecoveryConfig::default(),
            maps: MapsConfig::default(),
        }
    }
}

impl WorldConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: WorldConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Check cross-field constraints. Called once at startup; a failed check
    /// aborts the boot rather than running with a nonsensical schedule.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let u = &self.updater;
        if u.update_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "updater.update_interval_ms must be > 0".into(),
            ));
        }
        if u.queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "updater.queue_capacity must be > 0".into(),
            ));
        }
        if u.max_threads == 0 || u.max_threads > MAX_WORKERS {
            return Err(ConfigError::ValidationError(format!(
                "updater.max_threads must be in 1..={}",
                MAX_WORKERS
            )));
        }
        if u.num_threads > u.max_threads {
            return Err(ConfigError::ValidationError(format!(
                "updater.num_threads ({}) exceeds updater.max_threads ({})",
                u.num_threads, u.max_threads
            )));
        }

        let b = &self.balancer;
        if b.balance_interval_ticks == 0 {
            return Err(ConfigError::ValidationError(
                "balancer.balance_interval_ticks must be > 0".into(),
            ));
        }
        if !(b.load_low > 0.0 && b.load_low < b.load_high && b.load_high <= 1.0) {
            return Err(ConfigError::ValidationError(format!(
                "balancer thresholds must satisfy 0 < low < high <= 1 (low={}, high={})",
                b.load_low, b.load_high
            )));
        }

        let w = &self.watchdog;
        if w.enabled && w.check_period_ms == 0 {
            return Err(ConfigError::ValidationError(
                "watchdog.check_period_ms must be > 0 when the watchdog is enabled".into(),
            ));
        }

        Ok(())
    }
}

/// Update pool and tick driver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdaterConfig {
    /// Map update tick interval in milliseconds.
    pub update_interval_ms: u64,
    /// Capacity of the activation queue; sized above the expected live-map
    /// count so the tick driver never blocks on enqueue in steady state.
    pub queue_capacity: usize,
    /// Worker thread count. With dynamic balancing this is the starting
    /// count; 0 selects the single-threaded inline fallback.
    pub num_threads: usize,
    /// Upper bound the balancer may grow the pool to.
    pub max_threads: usize,
    /// Enable the adaptive load balancer.
    pub dynamic_threads: bool,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            update_interval_ms: 100,
            queue_capacity: 4096,
            num_threads: 3,
            max_threads: 8,
            dynamic_threads: false,
        }
    }
}

/// Load balancer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BalancerConfig {
    /// Ticks between balancing decisions.
    pub balance_interval_ticks: u32,
    /// Work/total ratio above which the pool grows.
    pub load_high: f64,
    /// Work/total ratio below which the pool shrinks.
    pub load_low: f64,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            balance_interval_ticks: 100,
            load_high: 0.8,
            load_low: 0.2,
        }
    }
}

/// Freeze watchdog configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub enabled: bool,
    /// Barrier timeout handed to `queue_wait`; stragglers past this are
    /// logged and left to finish asynchronously.
    pub freeze_detect_ms: u64,
    /// Watchdog poll period.
    pub check_period_ms: u64,
    /// Non-progress span after which the world is considered hung and the
    /// process is crash-escalated. 0 disables the escalation.
    pub max_stuck_ms: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            freeze_detect_ms: 2000,
            check_period_ms: 1000,
            max_stuck_ms: 60_000,
        }
    }
}

/// Crash isolation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Enable per-map crash quarantine. When disabled a fatal signal in a
    /// worker takes the process down, same as a crash outside the pool.
    pub enabled: bool,
    /// Break count beyond which a crashing map escalates to process exit.
    pub max_breaks: u32,
    /// Let a map's first crash restart the worker without quarantining the map.
    pub try_skip_first: bool,
    /// Treat a continent crash as fatal for the process.
    pub skip_continents: bool,
    /// Recovery thread poll period for the crash side channel.
    pub poll_interval_ms: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_breaks: 3,
            try_skip_first: true,
            skip_continents: true,
            poll_interval_ms: 50,
        }
    }
}

/// Map lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MapsConfig {
    /// How long an empty map lingers before the sweep unloads it.
    pub unload_grace_ms: u64,
    /// Allow entering raid maps without a raid group.
    pub instance_ignore_raid: bool,
}

impl Default for MapsConfig {
    fn default() -> Self {
        Self {
            unload_grace_ms: 30_000,
            instance_ignore_raid: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = WorldConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.updater.update_interval_ms, 100);
        assert_eq!(config.updater.max_threads, 8);
        assert!(!config.updater.dynamic_threads);
        assert_eq!(config.balancer.balance_interval_ticks, 100);
        assert!(config.recovery.try_skip_first);
    }

    #[test]
    fn rejects_inverted_thresholds() {
        let mut config = WorldConfig::default();
        config.balancer.load_low = 0.9;
        config.balancer.load_high = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_thread_count_over_max() {
        let mut config = WorldConfig::default();
        config.updater.num_threads = 16;
        config.updater.max_threads = 8;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_interval() {
        let mut config = WorldConfig::default();
        config.updater.update_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_partial_toml() {
        let config: WorldConfig = toml::from_str(
            r#"
            [updater]
            num_threads = 4
            dynamic_threads = true

            [balancer]
            load_high = 0.9
            "#,
        )
        .unwrap();
        assert_eq!(config.updater.num_threads, 4);
        assert!(config.updater.dynamic_threads);
        assert_eq!(config.balancer.load_high, 0.9);
        // untouched sections keep their defaults
        assert_eq!(config.updater.update_interval_ms, 100);
        assert_eq!(config.maps.unload_grace_ms, 30_000);
    }
}
