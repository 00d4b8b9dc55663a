//! # Bus Command Protocol
//!
//! Message types exchanged between the sync engine and bus firmware.
//!
//! ## Protocol Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Bus Command Messages                               │
//! │                                                                         │
//! │  MODE CHANGE                                                           │
//! │  ───────────                                                           │
//! │  ENGINE   ───► SetMode { bus, mode, drift }                            │
//! │  FIRMWARE ◄─── ModeAck { bus, mode, speed }    → got_new_syncer        │
//! │                                                                         │
//! │  DRIFT CORRECTION                                                      │
//! │  ────────────────                                                      │
//! │  ENGINE   ───► SetDrift { bus, speed }                                 │
//! │  FIRMWARE ◄─── DriftAck { bus, speed }         → got_drift_ack         │
//! │                                                                         │
//! │  HOUSEKEEPING (fire-and-forget)                                        │
//! │  ──────────────────────────────                                        │
//! │  ENGINE   ───► HousekeepingReset { bus }                               │
//! │  ENGINE   ───► SetPacingTimer { bus, enabled }                         │
//! │  ENGINE   ───► Drain { bus }                                           │
//! │  ENGINE   ───► PcmTick { bus }                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Format
//! Messages are serialized as tagged JSON using serde's adjacently tagged enum:
//! ```json
//! { "type": "SetMode", "payload": { "bus": 2, "mode": "PLL", "drift": -3 } }
//! ```

use serde::{Deserialize, Serialize};
use tdm_core::{BusId, SyncMode};

// =============================================================================
// Engine → Firmware
// =============================================================================

/// Outbound command for one bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum BusCommand {
    /// Switch the bus into `mode`, starting from correction `drift`.
    SetMode { bus: BusId, mode: SyncMode, drift: i32 },

    /// Apply a new rate correction.
    SetDrift { bus: BusId, speed: i32 },

    /// Periodic PCM housekeeping reset.
    HousekeepingReset { bus: BusId },

    /// Start or stop the host-side software pacing timer.
    SetPacingTimer { bus: BusId, enabled: bool },

    /// Flush any queued outbound work for this bus.
    Drain { bus: BusId },

    /// One PCM fan-out step for a self-ticking bus.
    PcmTick { bus: BusId },
}

impl BusCommand {
    /// Returns the command type name (for logging).
    pub fn type_name(&self) -> &'static str {
        match self {
            BusCommand::SetMode { .. } => "SetMode",
            BusCommand::SetDrift { .. } => "SetDrift",
            BusCommand::HousekeepingReset { .. } => "HousekeepingReset",
            BusCommand::SetPacingTimer { .. } => "SetPacingTimer",
            BusCommand::Drain { .. } => "Drain",
            BusCommand::PcmTick { .. } => "PcmTick",
        }
    }

    /// Returns the bus this command is addressed to.
    pub fn bus(&self) -> BusId {
        match self {
            BusCommand::SetMode { bus, .. }
            | BusCommand::SetDrift { bus, .. }
            | BusCommand::HousekeepingReset { bus }
            | BusCommand::SetPacingTimer { bus, .. }
            | BusCommand::Drain { bus }
            | BusCommand::PcmTick { bus } => *bus,
        }
    }

    /// Returns true for commands the firmware answers with an acknowledgement.
    pub fn expects_ack(&self) -> bool {
        matches!(self, BusCommand::SetMode { .. } | BusCommand::SetDrift { .. })
    }

    /// Serializes to JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Deserializes from JSON.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

// =============================================================================
// Firmware → Engine
// =============================================================================

/// Acknowledgement reported by bus firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum FirmwareAck {
    /// The bus is now in `mode` with correction `speed`.
    ModeAck { bus: BusId, mode: SyncMode, speed: i32 },

    /// The bus applied correction `speed`.
    DriftAck { bus: BusId, speed: i32 },
}

impl FirmwareAck {
    /// Returns the ack type name (for logging).
    pub fn type_name(&self) -> &'static str {
        match self {
            FirmwareAck::ModeAck { .. } => "ModeAck",
            FirmwareAck::DriftAck { .. } => "DriftAck",
        }
    }

    /// Returns the bus that sent this ack.
    pub fn bus(&self) -> BusId {
        match self {
            FirmwareAck::ModeAck { bus, .. } | FirmwareAck::DriftAck { bus, .. } => *bus,
        }
    }
}
