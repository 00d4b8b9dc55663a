//! # Bus
//!
//! Engine-side state of one attached bus: the lock-protected core structures
//! plus mode, correction and port bookkeeping.
//!
//! ## Lock Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Bus (shared as Arc<Bus>)                                               │
//! │                                                                         │
//! │  control: Mutex<BusControl>   state, mode, sync_adjustment, ports ...  │
//! │      │                                                                  │
//! │      ▼  (always taken in this order)                                    │
//! │  drift:   Mutex<DriftTracker>                                           │
//! │      │                                                                  │
//! │      ▼                                                                  │
//! │  ticker:  Mutex<Ticker>       the only lock other buses ever take,     │
//! │                               and only to copy a TickSample            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;

use tdm_core::{
    BusId, CycleBounds, DriftParams, DriftTracker, Port, SyncMode, TickSample, Ticker, Timestamp,
};

// =============================================================================
// Bus State
// =============================================================================

/// Lifecycle of an attached bus.
///
/// ```text
///  attach ──▶ Connected ──mark_ready──▶ Ready ──detach──▶ Disconnecting
///                 └────────────────detach──────────────────────▲
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusState {
    /// Attached; not yet an election candidate.
    Connected,
    /// Fully initialized; may be elected syncer.
    Ready,
    /// Being torn down. Terminal.
    Disconnecting,
}

impl fmt::Display for BusState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusState::Connected => write!(f, "connected"),
            BusState::Ready => write!(f, "ready"),
            BusState::Disconnecting => write!(f, "disconnecting"),
        }
    }
}

// =============================================================================
// Bus Control
// =============================================================================

/// Mode and bookkeeping guarded by the bus control lock.
#[derive(Debug, Clone)]
pub(crate) struct BusControl {
    pub(crate) state: BusState,
    pub(crate) mode: SyncMode,
    /// Last correction the firmware acknowledged.
    pub(crate) sync_adjustment: i32,
    /// Last correction the drift loop computed.
    pub(crate) computed_speed: i32,
    pub(crate) self_ticking: bool,
    /// Hardware-confirmed syncer status.
    pub(crate) is_syncer: bool,
    /// Host-side software pacing timer running.
    pub(crate) pacing_timer: bool,
    pub(crate) ports: Vec<Port>,
    /// Global tick counter as of this bus's last tick.
    pub(crate) global_counter: u64,
    /// Lost-tick events, for log rate limiting.
    pub(crate) lost_events: u64,
    /// Mode request the link refused; retried until one is accepted.
    pub(crate) unsent_mode: Option<SyncMode>,
}

// =============================================================================
// Bus
// =============================================================================

/// One attached bus.
pub struct Bus {
    id: BusId,
    pub(crate) control: Mutex<BusControl>,
    pub(crate) drift: Mutex<DriftTracker>,
    pub(crate) ticker: Mutex<Ticker>,
}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bus").field("id", &self.id).finish_non_exhaustive()
    }
}

impl Bus {
    /// Creates a freshly attached bus: Connected, NONE, pacing timer on.
    pub(crate) fn new(
        id: BusId,
        ports: Vec<Port>,
        now: Timestamp,
        bounds: CycleBounds,
        params: &DriftParams,
    ) -> Self {
        Bus {
            id,
            control: Mutex::new(BusControl {
                state: BusState::Connected,
                mode: SyncMode::None,
                sync_adjustment: 0,
                computed_speed: 0,
                self_ticking: false,
                is_syncer: false,
                pacing_timer: true,
                ports: normalize_ports(ports),
                global_counter: 0,
                lost_events: 0,
                unsent_mode: None,
            }),
            drift: Mutex::new(DriftTracker::new(params)),
            ticker: Mutex::new(Ticker::new(now, bounds)),
        }
    }

    pub fn id(&self) -> BusId {
        self.id
    }

    pub fn state(&self) -> BusState {
        self.control.lock().state
    }

    pub fn mode(&self) -> SyncMode {
        self.control.lock().mode
    }

    pub fn is_self_ticking(&self) -> bool {
        self.control.lock().self_ticking
    }

    /// Copies this bus's `{count, last_sample, tick_period}`.
    pub fn tick_sample(&self) -> TickSample {
        self.ticker.lock().snapshot()
    }

    /// Hard-resets the drift tracker and drops the ticker back to quick sampling.
    pub(crate) fn reset_drift(&self) {
        let mut drift = self.drift.lock();
        let mut ticker = self.ticker.lock();
        drift.reset(&mut ticker);
    }

    /// Returns a diagnostic snapshot.
    pub fn status(&self) -> BusStatus {
        let control = self.control.lock();
        let drift = self.drift.lock().stats();
        let tick = self.ticker.lock().snapshot();

        BusStatus {
            id: self.id,
            state: control.state,
            mode: control.mode,
            sync_adjustment: control.sync_adjustment,
            computed_speed: control.computed_speed,
            offset: drift.offset,
            lost_ticks: drift.lost_ticks,
            lost_tick_count: drift.lost_tick_count,
            tick_count: tick.count,
            tick_period: tick.tick_period,
            sync_inaccuracy: drift.sync_inaccuracy,
            offset_range: drift.offset_range,
            self_ticking: control.self_ticking,
            is_syncer: control.is_syncer,
            pacing_timer: control.pacing_timer,
            global_counter: control.global_counter,
            ports: control.ports.clone(),
        }
    }
}

/// Re-numbers ports by position so `(bus, index)` addressing stays valid.
pub(crate) fn normalize_ports(mut ports: Vec<Port>) -> Vec<Port> {
    for (i, port) in ports.iter_mut().enumerate() {
        port.index = i;
    }
    ports
}

// =============================================================================
// Bus Status
// =============================================================================

/// Diagnostic snapshot of one bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusStatus {
    pub id: BusId,
    pub state: BusState,
    pub mode: SyncMode,
    pub sync_adjustment: i32,
    pub computed_speed: i32,
    pub offset: i64,
    pub lost_ticks: u64,
    pub lost_tick_count: u64,
    pub tick_count: u64,
    pub tick_period: i64,
    pub sync_inaccuracy: i64,
    pub offset_range: i64,
    pub self_ticking: bool,
    pub is_syncer: bool,
    pub pacing_timer: bool,
    pub global_counter: u64,
    pub ports: Vec<Port>,
}
