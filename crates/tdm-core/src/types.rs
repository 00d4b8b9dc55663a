//! # Domain Types
//!
//! Core domain types shared by the clock arithmetic and the sync engine.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │     BusId       │   │    SyncMode     │   │      Port       │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  u16, stable    │   │  None   (0x00)  │   │  index          │       │
//! │  │  across ticks   │   │  Ab     (0x01)  │   │  priority (i32) │       │
//! │  │  reused after   │   │  Pll    (0x03)  │   │  alarms         │       │
//! │  │  detach         │   │  Query  (0x80)  │   │                 │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │                        ┌─────────────────┐                              │
//! │                        │   PortAlarms    │                              │
//! │                        │  ─────────────  │                              │
//! │                        │  red, blue      │  ← disqualify                │
//! │                        │  loopback       │  ← disqualifies              │
//! │                        │  yellow         │  ← informational only        │
//! │                        └─────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;

// =============================================================================
// Bus Identifier
// =============================================================================

/// Stable identifier of an attached bus.
///
/// Ids are ordered; election scans buses in ascending id order. An id may be
/// reused by a later attach, which always starts from a clean state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BusId(pub u16);

impl fmt::Display for BusId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BUS-{:02}", self.0)
    }
}

impl From<u16> for BusId {
    fn from(id: u16) -> Self {
        BusId(id)
    }
}

// =============================================================================
// Sync Mode
// =============================================================================

/// Timing mode of a single bus.
///
/// ## State Transitions
/// ```text
///                 request AB (elected)
///   ┌──────┐  ─────────────────────────▶  ┌──────┐
///   │ NONE │                              │  AB  │
///   └──┬───┘  ◀─────────────────────────  └──┬───┘
///      │         lost sync source            │  re-election
///      │                                     ▼
///      │       request PLL (follower)     ┌──────┐
///      └────────────────────────────────▶ │ PLL  │
///                                         └──────┘
///
///   QUERY is transient: it asks the firmware to report its current mode and
///   never becomes a bus's recorded mode.
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SyncMode {
    /// Free-running; the host paces the bus with a software timer.
    #[default]
    None,

    /// This bus's own oscillator is the reference for everyone else.
    Ab,

    /// This bus's rate is steered by a correction value.
    Pll,

    /// In-flight request for the firmware to report its mode.
    Query,
}

impl SyncMode {
    /// Returns the firmware wire code of this mode.
    pub const fn code(&self) -> u8 {
        match self {
            SyncMode::None => 0x00,
            SyncMode::Ab => 0x01,
            SyncMode::Pll => 0x03,
            SyncMode::Query => 0x80,
        }
    }

    /// Returns true when the hardware paces its own ticks in this mode.
    pub const fn is_self_ticking(&self) -> bool {
        matches!(self, SyncMode::Ab | SyncMode::Pll)
    }
}

impl TryFrom<u8> for SyncMode {
    type Error = CoreError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0x00 => Ok(SyncMode::None),
            0x01 => Ok(SyncMode::Ab),
            0x03 => Ok(SyncMode::Pll),
            0x80 => Ok(SyncMode::Query),
            other => Err(CoreError::InvalidSyncMode(other)),
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::None => write!(f, "NONE"),
            SyncMode::Ab => write!(f, "AB"),
            SyncMode::Pll => write!(f, "PLL"),
            SyncMode::Query => write!(f, "QUERY"),
        }
    }
}

// =============================================================================
// Port Alarms
// =============================================================================

/// Line health flags reported by a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PortAlarms {
    /// Loss of signal / loss of frame.
    #[serde(default)]
    pub red: bool,

    /// All-ones (AIS) from the far end.
    #[serde(default)]
    pub blue: bool,

    /// Remote alarm indication. Does not disqualify the port as a source.
    #[serde(default)]
    pub yellow: bool,

    /// Port is looped back, so its recovered clock is our own.
    #[serde(default)]
    pub loopback: bool,
}

impl PortAlarms {
    /// No alarms raised.
    pub const fn clear() -> Self {
        PortAlarms {
            red: false,
            blue: false,
            yellow: false,
            loopback: false,
        }
    }

    /// Only RED raised.
    pub const fn red() -> Self {
        PortAlarms {
            red: true,
            ..PortAlarms::clear()
        }
    }

    /// Returns true if any alarm that makes the recovered clock untrustworthy is raised.
    pub const fn disqualifies_timing(&self) -> bool {
        self.red || self.blue || self.loopback
    }
}

// =============================================================================
// Port
// =============================================================================

/// A line interface on a bus that may recover a timing source.
///
/// Ports hold no pointer to their bus; they are always addressed as
/// `(BusId, index)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    /// Position of the port on its bus.
    pub index: usize,

    /// Timing priority: 1 is the best source, 0 never a source, negative
    /// means the port actively refuses.
    pub priority: i32,

    /// Current health flags.
    #[serde(default)]
    pub alarms: PortAlarms,
}

impl Port {
    /// Creates a healthy port.
    pub const fn new(index: usize, priority: i32) -> Self {
        Port {
            index,
            priority,
            alarms: PortAlarms::clear(),
        }
    }

    /// Returns the priority this port competes with, or `None` if it may not
    /// be a timing source right now.
    pub const fn timing_priority(&self) -> Option<i32> {
        if self.priority <= 0 || self.alarms.disqualifies_timing() {
            None
        } else {
            Some(self.priority)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_mode_codes() {
        for mode in [SyncMode::None, SyncMode::Ab, SyncMode::Pll, SyncMode::Query] {
            assert_eq!(SyncMode::try_from(mode.code()).unwrap(), mode);
        }
        assert!(matches!(
            SyncMode::try_from(0x42),
            Err(CoreError::InvalidSyncMode(0x42))
        ));
    }

    #[test]
    fn test_self_ticking_modes() {
        assert!(SyncMode::Ab.is_self_ticking());
        assert!(SyncMode::Pll.is_self_ticking());
        assert!(!SyncMode::None.is_self_ticking());
        assert!(!SyncMode::Query.is_self_ticking());
    }

    #[test]
    fn test_port_eligibility() {
        assert_eq!(Port::new(0, 1).timing_priority(), Some(1));
        assert_eq!(Port::new(0, 0).timing_priority(), None);
        assert_eq!(Port::new(0, -3).timing_priority(), None);

        let mut port = Port::new(1, 2);
        port.alarms.yellow = true;
        assert_eq!(port.timing_priority(), Some(2));

        port.alarms = PortAlarms::red();
        assert_eq!(port.timing_priority(), None);

        port.alarms = PortAlarms { loopback: true, ..PortAlarms::clear() };
        assert_eq!(port.timing_priority(), None);
    }

    #[test]
    fn test_mode_serialization() {
        let json = serde_json::to_string(&SyncMode::Pll).unwrap();
        assert_eq!(json, "\"PLL\"");
        assert_eq!(BusId(3).to_string(), "BUS-03");
    }
}
