//! Configuration loader with file and environment variable support

use crate::{ConfigError, WorldConfig};
use std::env;
use std::path::PathBuf;
use tracing::info;

/// Standard config file search paths
const CONFIG_PATHS: &[&str] = &[
    "worldcore.toml",
    "config.toml",
    "./config/worldcore.toml",
    "/etc/worldcore/worldcore.toml",
];

/// Configuration loader
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Create a loader with a specific config file path
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found) with environment variable overrides
    pub fn load(&self) -> Result<WorldConfig, ConfigError> {
        let mut config = WorldConfig::default();

        if let Some(path) = self.find_config_file() {
            info!(?path, "Loading configuration from file");
            config = WorldConfig::from_file(&path)?;
        }

        self.apply_env_overrides(&mut config);
        config.validate()?;

        Ok(config)
    }

    /// Find the configuration file to use
    fn find_config_file(&self) -> Option<PathBuf> {
        // Check explicit path first
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        // Check WORLDCORE_CONFIG env var
        if let Ok(path) = env::var("WORLDCORE_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        // Search standard paths
        for path in CONFIG_PATHS {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&self, config: &mut WorldConfig) {
        // Updater
        if let Ok(val) = env::var("WORLDCORE_UPDATE_INTERVAL_MS") {
            if let Ok(v) = val.parse() {
                config.updater.update_interval_ms = v;
            }
        }
        if let Ok(val) = env::var("WORLDCORE_QUEUE_CAPACITY") {
            if let Ok(v) = val.parse() {
                config.updater.queue_capacity = v;
            }
        }
        if let Ok(val) = env::var("WORLDCORE_NUM_THREADS") {
            if let Ok(v) = val.parse() {
                config.updater.num_threads = v;
            }
        }
        if let Ok(val) = env::var("WORLDCORE_MAX_THREADS") {
            if let Ok(v) = val.parse() {
                config.updater.max_threads = v;
            }
        }
        if let Ok(val) = env::var("WORLDCORE_DYNAMIC_THREADS") {
            config.updater.dynamic_threads = parse_bool(&val);
        }

        // Balancer
        if let Ok(val) = env::var("WORLDCORE_BALANCE_INTERVAL_TICKS") {
            if let Ok(v) = val.parse() {
                config.balancer.balance_interval_ticks = v;
            }
        }
        if let Ok(val) = env::var("WORLDCORE_LOAD_HIGH") {
            if let Ok(v) = val.parse() {
                config.balancer.load_high = v;
            }
        }
        if let Ok(val) = env::var("WORLDCORE_LOAD_LOW") {
            if let Ok(v) = val.parse() {
                config.balancer.load_low = v;
            }
        }

        // Watchdog
        if let Ok(val) = env::var("WORLDCORE_WATCHDOG_ENABLED") {
            config.watchdog.enabled = parse_bool(&val);
        }
        if let Ok(val) = env::var("WORLDCORE_FREEZE_DETECT_MS") {
            if let Ok(v) = val.parse() {
                config.watchdog.freeze_detect_ms = v;
            }
        }
        if let Ok(val) = env::var("WORLDCORE_MAX_STUCK_MS") {
            if let Ok(v) = val.parse() {
                config.watchdog.max_stuck_ms = v;
            }
        }

        // Recovery
        if let Ok(val) = env::var("WORLDCORE_RECOVERY_ENABLED") {
            config.recovery.enabled = parse_bool(&val);
        }
        if let Ok(val) = env::var("WORLDCORE_MAX_BREAKS") {
            if let Ok(v) = val.parse() {
                config.recovery.max_breaks = v;
            }
        }
        if let Ok(val) = env::var("WORLDCORE_TRY_SKIP_FIRST") {
            config.recovery.try_skip_first = parse_bool(&val);
        }
        if let Ok(val) = env::var("WORLDCORE_SKIP_CONTINENTS") {
            config.recovery.skip_continents = parse_bool(&val);
        }

        // Maps
        if let Ok(val) = env::var("WORLDCORE_UNLOAD_GRACE_MS") {
            if let Ok(v) = val.parse() {
                config.maps.unload_grace_ms = v;
            }
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_bool(val: &str) -> bool {
    matches!(val.to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on")
}
