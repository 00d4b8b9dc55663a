//! # Simulation Scenarios
//!
//! A scenario names the buses, their crystal error and port priorities, and
//! a timeline of topology events.
//!
//! ## Scenario File Format
//! ```json
//! {
//!   "duration_ms": 60000,
//!   "nominal_period_us": 1000.0,
//!   "gain_ppm": 2.0,
//!   "buses": [
//!     { "id": 0, "ppm": 0.0, "phase_us": 0.0, "priorities": [1] },
//!     { "id": 1, "ppm": 12.5, "phase_us": 380.0, "priorities": [2, 0] }
//!   ],
//!   "events": [
//!     { "at_ms": 30000, "action": "raise_alarm", "bus": 0, "port": 0 }
//!   ]
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use thiserror::Error;

use tdm_sync::SyncError;

use crate::firmware::MAX_SPEED;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum SimError {
    #[error("Failed to read scenario: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse scenario: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid scenario: {0}")]
    InvalidScenario(String),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

pub type SimResult<T> = Result<T, SimError>;

// =============================================================================
// Scenario
// =============================================================================

/// One simulated bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusSpec {
    pub id: u16,

    /// Crystal error in parts per million. Positive runs slow.
    #[serde(default)]
    pub ppm: f64,

    /// Delay of the first tick after t=0.
    #[serde(default)]
    pub phase_us: f64,

    /// Timing priority per port.
    #[serde(default)]
    pub priorities: Vec<i32>,

    /// Drop every Nth tick before it reaches the engine.
    #[serde(default)]
    pub drop_every: Option<u64>,

    /// Ticks of this bus carry the sync-designation flag.
    #[serde(default)]
    pub designates_sync: bool,
}

/// Topology change applied at a point in virtual time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SimAction {
    RaiseAlarm { bus: u16, port: usize },
    ClearAlarm { bus: u16, port: usize },
    SetPriority { bus: u16, port: usize, priority: i32 },
    Detach { bus: u16 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimEvent {
    pub at_ms: u64,
    #[serde(flatten)]
    pub action: SimAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub duration_ms: u64,

    #[serde(default = "default_nominal_period")]
    pub nominal_period_us: f64,

    /// Period change per unit of drift correction, in ppm.
    #[serde(default = "default_gain")]
    pub gain_ppm: f64,

    pub buses: Vec<BusSpec>,

    #[serde(default)]
    pub events: Vec<SimEvent>,
}

fn default_nominal_period() -> f64 {
    1_000.0
}

fn default_gain() -> f64 {
    2.0
}

impl Default for Scenario {
    /// Three buses; the syncer loses its line halfway through.
    fn default() -> Self {
        Scenario {
            duration_ms: 60_000,
            nominal_period_us: default_nominal_period(),
            gain_ppm: default_gain(),
            buses: vec![
                BusSpec {
                    id: 0,
                    ppm: 0.0,
                    phase_us: 0.0,
                    priorities: vec![1],
                    drop_every: None,
                    designates_sync: true,
                },
                BusSpec {
                    id: 1,
                    ppm: 12.5,
                    phase_us: 380.0,
                    priorities: vec![2, 0],
                    drop_every: None,
                    designates_sync: false,
                },
                BusSpec {
                    id: 2,
                    ppm: -8.0,
                    phase_us: 610.0,
                    priorities: vec![0],
                    drop_every: Some(20_000),
                    designates_sync: false,
                },
            ],
            events: vec![SimEvent {
                at_ms: 30_000,
                action: SimAction::RaiseAlarm { bus: 0, port: 0 },
            }],
        }
    }
}

impl Scenario {
    /// Loads a scenario from a JSON file.
    pub fn load(path: &Path) -> SimResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let scenario: Scenario = serde_json::from_str(&contents)?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn validate(&self) -> SimResult<()> {
        if self.duration_ms == 0 {
            return Err(SimError::InvalidScenario("duration_ms must be greater than 0".into()));
        }
        if !(self.nominal_period_us > 0.0) {
            return Err(SimError::InvalidScenario(
                "nominal_period_us must be greater than 0".into(),
            ));
        }
        if !self.gain_ppm.is_finite() {
            return Err(SimError::InvalidScenario("gain_ppm must be finite".into()));
        }
        if self.buses.is_empty() {
            return Err(SimError::InvalidScenario("at least one bus is required".into()));
        }

        let mut seen = BTreeSet::new();
        for bus in &self.buses {
            if !seen.insert(bus.id) {
                return Err(SimError::InvalidScenario(format!("duplicate bus id {}", bus.id)));
            }
            if bus.drop_every == Some(0) {
                return Err(SimError::InvalidScenario(format!(
                    "bus {}: drop_every must be greater than 0",
                    bus.id
                )));
            }
            if !bus.ppm.is_finite() {
                return Err(SimError::InvalidScenario(format!("bus {}: ppm must be finite", bus.id)));
            }
            if self.min_period_us(bus) <= 0.0 {
                return Err(SimError::InvalidScenario(format!(
                    "bus {}: ppm {} with gain {} can stop the clock",
                    bus.id, bus.ppm, self.gain_ppm
                )));
            }
        }
        Ok(())
    }

    /// Shortest tick period `bus` can reach at full correction.
    fn min_period_us(&self, bus: &BusSpec) -> f64 {
        let error = bus.ppm.abs() + self.gain_ppm.abs() * f64::from(MAX_SPEED);
        self.nominal_period_us * (1.0 - error / 1_000_000.0)
    }

    /// Events ordered by time; ties keep file order.
    pub fn timeline(&self) -> Vec<SimEvent> {
        let mut events = self.events.clone();
        events.sort_by_key(|e| e.at_ms);
        events
    }
}
