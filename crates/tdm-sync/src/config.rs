//! # Clock Configuration
//!
//! Configuration management for the sync engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     TDM_SYNC_CYCLE=250                                                 │
//! │     TDM_EXTERNAL_REFERENCE=true                                        │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/tdm-sync/clock.toml (Linux)                              │
//! │     ~/Library/Application Support/org.tdm.tdm-sync/clock.toml (macOS) │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     Tuned for 1 kHz ticks over USB                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # clock.toml
//! [ticker]
//! quick_cycle = 1000
//! slow_cycle = 10000
//!
//! [drift]
//! sync_cycle = 500
//! sample_window = 100
//! center_target_us = 500
//! delta_band_us = 40
//! max_adjustment = 20
//! converge_cycles = 10
//! runaway_threshold = 100
//!
//! [election]
//! fallback_to_first_ready = true
//! external_reference = false
//!
//! [orchestrator]
//! big_tick_interval = 1000
//! command_queue_depth = 64
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tdm_core::validation::{validate_cycle_bounds, validate_drift_params};
use tdm_core::{CycleBounds, DriftParams};
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Ticker Settings
// =============================================================================

/// Sampling cycle limits for every bus ticker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerSettings {
    /// Cycle used right after attach or reset.
    #[serde(default = "default_quick_cycle")]
    pub quick_cycle: u32,

    /// Cycle used once a bus is locked within the delta band.
    #[serde(default = "default_slow_cycle")]
    pub slow_cycle: u32,
}

fn default_quick_cycle() -> u32 {
    tdm_core::ticker::DEFAULT_QUICK_CYCLE
}

fn default_slow_cycle() -> u32 {
    tdm_core::ticker::DEFAULT_SLOW_CYCLE
}

impl Default for TickerSettings {
    fn default() -> Self {
        TickerSettings {
            quick_cycle: default_quick_cycle(),
            slow_cycle: default_slow_cycle(),
        }
    }
}

impl TickerSettings {
    /// Returns the bounds handed to every new `Ticker`.
    pub fn bounds(&self) -> CycleBounds {
        CycleBounds {
            quick: self.quick_cycle,
            slow: self.slow_cycle,
        }
    }
}

// =============================================================================
// Election Settings
// =============================================================================

/// Syncer election behavior.
///
/// ## Fallback
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │  No port anywhere is an eligible timing source:                        │
/// │                                                                         │
/// │  fallback_to_first_ready = true   → first READY bus becomes AB         │
/// │                                     (its free-running oscillator)      │
/// │  fallback_to_first_ready = false  → no bus syncer;                     │
/// │                                     external reference if enabled,     │
/// │                                     else every bus NONE                │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionSettings {
    /// Elect the first READY bus when no port qualifies.
    #[serde(default = "default_true")]
    pub fallback_to_first_ready: bool,

    /// A non-bus timing source drives `on_external_tick`; followers lock to
    /// it when no bus is syncer.
    #[serde(default)]
    pub external_reference: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ElectionSettings {
    fn default() -> Self {
        ElectionSettings {
            fallback_to_first_ready: true,
            external_reference: false,
        }
    }
}

// =============================================================================
// Orchestrator Settings
// =============================================================================

/// Global tick orchestration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    /// Global ticks between housekeeping-reset broadcasts.
    #[serde(default = "default_big_tick_interval")]
    pub big_tick_interval: u64,

    /// Capacity of each `ChannelLink` command queue.
    #[serde(default = "default_command_queue_depth")]
    pub command_queue_depth: usize,
}

fn default_big_tick_interval() -> u64 {
    1_000
}

fn default_command_queue_depth() -> usize {
    64
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        OrchestratorSettings {
            big_tick_interval: default_big_tick_interval(),
            command_queue_depth: default_command_queue_depth(),
        }
    }
}

// =============================================================================
// Main Clock Configuration
// =============================================================================

/// Complete clock sync configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClockConfig {
    /// Ticker sampling cycle limits.
    #[serde(default)]
    pub ticker: TickerSettings,

    /// Drift control loop tuning.
    #[serde(default)]
    pub drift: DriftParams,

    /// Syncer election behavior.
    #[serde(default)]
    pub election: ElectionSettings,

    /// Global tick orchestration.
    #[serde(default)]
    pub orchestrator: OrchestratorSettings,
}

impl ClockConfig {
    /// Creates a config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (clock.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading clock config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load clock config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Clock config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        validate_cycle_bounds(&self.ticker.bounds())?;
        validate_drift_params(&self.drift)?;

        if self.orchestrator.big_tick_interval == 0 {
            return Err(SyncError::InvalidConfig(
                "orchestrator.big_tick_interval must be greater than 0".into(),
            ));
        }

        if self.orchestrator.command_queue_depth == 0 {
            return Err(SyncError::InvalidConfig(
                "orchestrator.command_queue_depth must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Applies overrides from any key lookup. Unparseable values are logged
    /// and ignored.
    fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: std::str::FromStr>(key: &str, raw: Option<String>) -> Option<T> {
            let raw = raw?;
            match raw.trim().parse::<T>() {
                Ok(v) => {
                    debug!(key, value = %raw, "Overriding clock config from environment");
                    Some(v)
                }
                Err(_) => {
                    warn!(key, value = %raw, "Ignoring unparseable environment override");
                    None
                }
            }
        }

        if let Some(v) = parsed("TDM_SYNC_CYCLE", lookup("TDM_SYNC_CYCLE")) {
            self.drift.sync_cycle = v;
        }
        if let Some(v) = parsed("TDM_SAMPLE_WINDOW", lookup("TDM_SAMPLE_WINDOW")) {
            self.drift.sample_window = v;
        }
        if let Some(v) = parsed("TDM_MAX_ADJUSTMENT", lookup("TDM_MAX_ADJUSTMENT")) {
            self.drift.max_adjustment = v;
        }
        if let Some(v) = parsed("TDM_CENTER_TARGET_US", lookup("TDM_CENTER_TARGET_US")) {
            self.drift.center_target_us = v;
        }
        if let Some(v) = parsed("TDM_DELTA_BAND_US", lookup("TDM_DELTA_BAND_US")) {
            self.drift.delta_band_us = v;
        }
        if let Some(v) = parsed("TDM_FALLBACK_FIRST_READY", lookup("TDM_FALLBACK_FIRST_READY")) {
            self.election.fallback_to_first_ready = v;
        }
        if let Some(v) = parsed("TDM_EXTERNAL_REFERENCE", lookup("TDM_EXTERNAL_REFERENCE")) {
            self.election.external_reference = v;
        }
        if let Some(v) = parsed("TDM_BIG_TICK_INTERVAL", lookup("TDM_BIG_TICK_INTERVAL")) {
            self.orchestrator.big_tick_interval = v;
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("org", "tdm", "tdm-sync").map(|dirs| {
            let config_dir = dirs.config_dir();
            config_dir.join("clock.toml")
        })
    }
}
