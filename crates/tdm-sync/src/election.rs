//! # Syncer Election Module
//!
//! Picks the bus whose clock every other bus follows.
//!
//! ## Election Algorithm
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Syncer Election                                      │
//! │                                                                         │
//! │  ELECTION TRIGGER CONDITIONS:                                          │
//! │  ────────────────────────────                                          │
//! │  1. A bus becomes READY or detaches                                    │
//! │  2. A port's alarms or priority change                                 │
//! │  3. Ports are hot-swapped (sub-card replaced)                          │
//! │  4. The sync source override changes                                   │
//! │                                                                         │
//! │  SCAN (READY buses by ascending id, ports by ascending index):         │
//! │  ─────────────────────────────────────────────────────────────         │
//! │  skip port if priority <= 0                                            │
//! │  skip port if RED, BLUE or LOOPBACK                                    │
//! │  keep the smallest positive priority; first seen wins ties             │
//! │                                                                         │
//! │  RESULT:                                                               │
//! │  ───────                                                               │
//! │  best port found          → its bus                                    │
//! │  none, a READY bus exists → first READY bus (if fallback enabled)      │
//! │  no READY bus             → no syncer                                  │
//! │                                                                         │
//! │  SOURCE OVERRIDE:                                                      │
//! │  ────────────────                                                      │
//! │  Auto       → scan                                                     │
//! │  External   → no bus syncer (external reference)                       │
//! │  Bus(id)    → that bus if READY, else scan                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Selection is a pure function of the candidates; the coordinator gathers
//! them and applies the result under its election lock.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use tdm_core::{BusId, Port};

use crate::config::ElectionSettings;
use crate::error::SyncError;

// =============================================================================
// Sync Source
// =============================================================================

/// Operator override of where timing comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncSource {
    /// Elect by port priority.
    #[default]
    Auto,

    /// Follow the external (non-bus) reference.
    External,

    /// Prefer this bus whenever it is READY.
    Bus(BusId),
}

impl fmt::Display for SyncSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncSource::Auto => write!(f, "auto"),
            SyncSource::External => write!(f, "external"),
            SyncSource::Bus(id) => write!(f, "{}", id.0),
        }
    }
}

impl FromStr for SyncSource {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.to_lowercase().as_str() {
            "auto" => Ok(SyncSource::Auto),
            "external" | "host" | "sync=host" => Ok(SyncSource::External),
            other => other.parse::<u16>().map(|id| SyncSource::Bus(BusId(id))).map_err(|_| {
                SyncError::InvalidConfig(format!(
                    "Unknown sync source: '{}'. Valid options: auto, external, <bus number>",
                    s
                ))
            }),
        }
    }
}

// =============================================================================
// Candidates
// =============================================================================

/// A READY bus and its ports, as seen at election time.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub id: BusId,
    pub ports: Vec<Port>,
}

/// Where an elected timing source was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub bus: BusId,
    /// Winning port, or `None` when chosen by override or fallback.
    pub port: Option<usize>,
    pub priority: Option<i32>,
}

// =============================================================================
// Selection
// =============================================================================

/// Runs the priority scan. `candidates` must be in ascending bus id order.
pub fn scan(candidates: &[Candidate]) -> Option<Selection> {
    let mut best: Option<Selection> = None;

    for candidate in candidates {
        for port in &candidate.ports {
            let Some(priority) = port.timing_priority() else {
                continue;
            };
            let better = match best.and_then(|b| b.priority) {
                Some(current) => priority < current,
                None => true,
            };
            if better {
                best = Some(Selection {
                    bus: candidate.id,
                    port: Some(port.index),
                    priority: Some(priority),
                });
            }
        }
    }

    best
}

/// Elects a syncer bus, or `None` when no bus should be syncer.
///
/// `candidates` are the READY buses in ascending id order.
pub fn select_syncer(
    candidates: &[Candidate],
    source: SyncSource,
    settings: &ElectionSettings,
) -> Option<Selection> {
    match source {
        SyncSource::External => return None,
        SyncSource::Bus(id) => {
            if candidates.iter().any(|c| c.id == id) {
                return Some(Selection {
                    bus: id,
                    port: None,
                    priority: None,
                });
            }
        }
        SyncSource::Auto => {}
    }

    scan(candidates).or_else(|| {
        if settings.fallback_to_first_ready {
            candidates.first().map(|c| Selection {
                bus: c.id,
                port: None,
                priority: None,
            })
        } else {
            None
        }
    })
}
