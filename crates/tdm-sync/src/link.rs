//! # Bus Link
//!
//! Outbound seam between the sync engine and bus firmware.
//!
//! ## Link Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          BusLink Implementations                        │
//! │                                                                         │
//! │   SyncCoordinator ──► dyn BusLink                                      │
//! │                          │                                              │
//! │          ┌───────────────┼────────────────────┐                         │
//! │          ▼               ▼                    ▼                         │
//! │   ┌────────────┐  ┌──────────────┐   ┌──────────────────┐              │
//! │   │ NoOpLink   │  │ ChannelLink  │   │ driver glue      │              │
//! │   │            │  │              │   │ (host-provided)  │              │
//! │   │ discards   │  │ control mpsc │   │ USB control msgs │              │
//! │   │ everything │  │ tick mpsc    │   │                  │              │
//! │   └────────────┘  └──────────────┘   └──────────────────┘              │
//! │                                                                         │
//! │  No method may block: they are called from the tick path with engine   │
//! │  locks held. request_mode reports whether the command was accepted so  │
//! │  the coordinator can retry a refused mode change.                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use tdm_core::{BusId, SyncMode};
use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::protocol::BusCommand;

// =============================================================================
// Bus Link Trait
// =============================================================================

/// Outbound commands to bus firmware.
pub trait BusLink: Send + Sync {
    /// Asks the firmware to switch `bus` into `mode` with correction `drift`.
    /// Returns false if the request was not queued.
    fn request_mode(&self, bus: BusId, mode: SyncMode, drift: i32) -> bool;

    /// Asks the firmware to apply correction `speed`.
    fn send_drift(&self, bus: BusId, speed: i32);

    /// Periodic PCM housekeeping reset.
    fn request_housekeeping_reset(&self, bus: BusId);

    /// Starts or stops the host-side software pacing timer of `bus`.
    fn set_pacing_timer(&self, bus: BusId, enabled: bool);

    /// Flushes queued outbound work for `bus`.
    fn drain_commands(&self, bus: BusId);

    /// Runs one PCM fan-out step for a self-ticking `bus`.
    fn pcm_tick(&self, bus: BusId);
}

/// Link that discards every command.
pub struct NoOpLink;

impl BusLink for NoOpLink {
    fn request_mode(&self, _bus: BusId, _mode: SyncMode, _drift: i32) -> bool {
        true
    }
    fn send_drift(&self, _bus: BusId, _speed: i32) {}
    fn request_housekeeping_reset(&self, _bus: BusId) {}
    fn set_pacing_timer(&self, _bus: BusId, _enabled: bool) {}
    fn drain_commands(&self, _bus: BusId) {}
    fn pcm_tick(&self, _bus: BusId) {}
}

// =============================================================================
// Channel Link
// =============================================================================

/// Receiving ends of a [`ChannelLink`].
pub struct LinkQueues {
    /// Mode, drift, pacing and housekeeping commands.
    pub control: mpsc::Receiver<BusCommand>,
    /// Per-tick `Drain` and `PcmTick` traffic.
    pub ticks: mpsc::Receiver<BusCommand>,
}

/// Link that queues every call as a [`BusCommand`] on bounded channels.
///
/// Per-tick traffic has its own queue so a lagging consumer can never crowd
/// out control commands. A full queue drops the command; the tick path never
/// waits on the consumer.
pub struct ChannelLink {
    control: mpsc::Sender<BusCommand>,
    ticks: mpsc::Sender<BusCommand>,
    dropped: AtomicU64,
    dropped_ticks: AtomicU64,
}

impl ChannelLink {
    /// Creates a link whose queues each hold `depth` commands.
    pub fn new(depth: usize) -> (Self, LinkQueues) {
        let (control_tx, control_rx) = mpsc::channel(depth.max(1));
        let (ticks_tx, ticks_rx) = mpsc::channel(depth.max(1));
        (
            ChannelLink {
                control: control_tx,
                ticks: ticks_tx,
                dropped: AtomicU64::new(0),
                dropped_ticks: AtomicU64::new(0),
            },
            LinkQueues {
                control: control_rx,
                ticks: ticks_rx,
            },
        )
    }

    /// Control commands dropped because the queue was full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Per-tick commands dropped because the queue was full or closed.
    pub fn dropped_ticks(&self) -> u64 {
        self.dropped_ticks.load(Ordering::Relaxed)
    }

    fn push(&self, command: BusCommand) -> bool {
        let Err(e) = self.control.try_send(command) else {
            return true;
        };
        let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        let (reason, command) = match e {
            mpsc::error::TrySendError::Full(c) => ("queue full", c),
            mpsc::error::TrySendError::Closed(c) => ("receiver closed", c),
        };
        warn!(
            bus = %command.bus(),
            command = command.type_name(),
            reason,
            total,
            "Dropping bus command"
        );
        false
    }

    fn push_tick(&self, command: BusCommand) {
        if let Err(e) = self.ticks.try_send(command) {
            let total = self.dropped_ticks.fetch_add(1, Ordering::Relaxed) + 1;
            let command = match e {
                mpsc::error::TrySendError::Full(c) | mpsc::error::TrySendError::Closed(c) => c,
            };
            trace!(bus = %command.bus(), command = command.type_name(), total, "Dropping tick command");
        }
    }
}

impl BusLink for ChannelLink {
    fn request_mode(&self, bus: BusId, mode: SyncMode, drift: i32) -> bool {
        self.push(BusCommand::SetMode { bus, mode, drift })
    }

    fn send_drift(&self, bus: BusId, speed: i32) {
        self.push(BusCommand::SetDrift { bus, speed });
    }

    fn request_housekeeping_reset(&self, bus: BusId) {
        self.push(BusCommand::HousekeepingReset { bus });
    }

    fn set_pacing_timer(&self, bus: BusId, enabled: bool) {
        self.push(BusCommand::SetPacingTimer { bus, enabled });
    }

    fn drain_commands(&self, bus: BusId) {
        self.push_tick(BusCommand::Drain { bus });
    }

    fn pcm_tick(&self, bus: BusId) {
        self.push_tick(BusCommand::PcmTick { bus });
    }
}

// =============================================================================
// Recording Link (tests)
// =============================================================================

#[cfg(test)]
pub(crate) use recording::RecordingLink;
