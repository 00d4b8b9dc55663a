//! # Sync Coordinator
//!
//! Owns the timing reference and drives every bus toward it.
//!
//! ## Coordinator Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        SyncCoordinator                                  │
//! │                                                                         │
//! │  election: Mutex<ElectionState>                                        │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │  reference: None | Bus(Arc<Bus>) | External                      │  │
//! │  │  epoch      (bumped on every reassignment)                       │  │
//! │  │  global_tick, source, external Ticker                            │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │  buses: RwLock<BTreeMap<BusId, Arc<Bus>>>                              │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │  BUS-00  (AB)  │  │  BUS-01 (PLL)  │  │  BUS-02 (NONE)         │    │
//! │  │  reference     │  │  drift → speed │  │  host pacing timer     │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                                                                         │
//! │  LOCK ORDER: election → buses → bus control → drift → ticker           │
//! │                                                                         │
//! │  INBOUND (never fail):                                                 │
//! │    on_tick, on_external_tick, got_new_syncer, got_drift_ack,           │
//! │    notify_topology_change                                              │
//! │  ADMINISTRATIVE (SyncResult):                                          │
//! │    attach_bus, mark_ready, detach_bus, port updates, query_sync_mode   │
//! │  OUTBOUND: dyn BusLink (non-blocking; refused mode requests retried)   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Tick Path
//! ```text
//! on_tick(bus, ts, designates_sync)
//!   1. drain bus command queue; retry a refused mode request
//!   2. bus is syncer (or designated with no syncer)? → global_tick += 1
//!        every big_tick_interval → housekeeping reset to self-ticking buses
//!   3. step bus Ticker; if PLL with a live reference → DriftTracker step
//!   4. self-ticking? → PCM fan-out
//!   5. bus.global_counter = global_tick
//! ```

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use tdm_core::{
    BusId, DriftInput, DriftOutcome, Port, PortAlarms, ReferenceSample, SyncMode, Ticker, Timestamp,
};

use crate::bus::{normalize_ports, Bus, BusControl, BusState, BusStatus};
use crate::config::ClockConfig;
use crate::election::{select_syncer, Candidate, SyncSource};
use crate::error::{SyncError, SyncResult};
use crate::link::BusLink;

/// One debug line per this many lost-tick events on a bus.
const LOST_TICK_LOG_INTERVAL: u64 = 1003;

// =============================================================================
// Sync Status
// =============================================================================

/// Which timing source the engine currently follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "bus", rename_all = "snake_case")]
pub enum SyncerStatus {
    /// No reference; self-ticking buses run free.
    None,
    /// This bus is syncer.
    Bus(BusId),
    /// The external (non-bus) reference.
    External,
}

impl fmt::Display for SyncerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncerStatus::None => write!(f, "none"),
            SyncerStatus::Bus(id) => write!(f, "{}", id),
            SyncerStatus::External => write!(f, "external"),
        }
    }
}

/// Point-in-time diagnostics for the whole engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatus {
    pub syncer: SyncerStatus,
    pub source: SyncSource,
    pub global_tick: u64,
    pub reference_epoch: u64,
    pub captured_at: DateTime<Utc>,
    pub buses: Vec<BusStatus>,
}

impl SyncStatus {
    /// Returns the status of one bus, if attached.
    pub fn bus(&self, id: BusId) -> Option<&BusStatus> {
        self.buses.iter().find(|b| b.id == id)
    }
}

// =============================================================================
// Election State
// =============================================================================

enum Reference {
    None,
    Bus(Arc<Bus>),
    External,
}

impl Reference {
    fn status(&self) -> SyncerStatus {
        match self {
            Reference::None => SyncerStatus::None,
            Reference::Bus(bus) => SyncerStatus::Bus(bus.id()),
            Reference::External => SyncerStatus::External,
        }
    }
}

struct ElectionState {
    source: SyncSource,
    reference: Reference,
    epoch: u64,
    global_tick: u64,
    external: Ticker,
}

impl ElectionState {
    /// Mode the reconciliation rules want `id` to be in.
    fn wanted_mode(&self, id: BusId) -> SyncMode {
        match &self.reference {
            Reference::Bus(bus) if bus.id() == id => SyncMode::Ab,
            Reference::None => SyncMode::None,
            _ => SyncMode::Pll,
        }
    }

    /// Reference ticker sample for a follower, or `None` if `id` has nothing
    /// to follow.
    fn reference_sample(&self, id: BusId) -> Option<ReferenceSample> {
        let tick = match &self.reference {
            Reference::None => return None,
            Reference::Bus(bus) if bus.id() == id => return None,
            Reference::Bus(bus) => bus.tick_sample(),
            Reference::External => self.external.snapshot(),
        };
        Some(ReferenceSample {
            epoch: self.epoch,
            tick,
        })
    }
}

// =============================================================================
// Sync Coordinator
// =============================================================================

/// Process-wide clock sync engine.
pub struct SyncCoordinator {
    config: ClockConfig,
    link: Arc<dyn BusLink>,
    election: Mutex<ElectionState>,
    buses: RwLock<BTreeMap<BusId, Arc<Bus>>>,
}

impl SyncCoordinator {
    /// Creates a coordinator with no buses and no reference.
    pub fn new(config: ClockConfig, link: Arc<dyn BusLink>) -> SyncResult<Self> {
        config.validate()?;

        let external = Ticker::new(Timestamp::default(), config.ticker.bounds());
        info!(
            sync_cycle = config.drift.sync_cycle,
            max_adjustment = config.drift.max_adjustment,
            external_reference = config.election.external_reference,
            "Sync coordinator created"
        );

        Ok(SyncCoordinator {
            config,
            link,
            election: Mutex::new(ElectionState {
                source: SyncSource::Auto,
                reference: Reference::None,
                epoch: 0,
                global_tick: 0,
                external,
            }),
            buses: RwLock::new(BTreeMap::new()),
        })
    }

    pub fn config(&self) -> &ClockConfig {
        &self.config
    }

    /// Returns a live bus.
    pub fn bus(&self, id: BusId) -> Option<Arc<Bus>> {
        self.buses.read().get(&id).cloned()
    }

    fn lookup(&self, id: BusId) -> SyncResult<Arc<Bus>> {
        self.bus(id).ok_or(SyncError::UnknownBus(id))
    }

    fn all_buses(&self) -> Vec<Arc<Bus>> {
        self.buses.read().values().cloned().collect()
    }

    // =========================================================================
    // Tick Path
    // =========================================================================

    /// Handles one tick of `id`. Ticks for unknown or departing buses are
    /// ignored.
    pub fn on_tick(&self, id: BusId, timestamp: Timestamp, designates_sync: bool) {
        let mut state = self.election.lock();

        let Some(bus) = self.bus(id) else {
            trace!(bus = %id, "Tick for unknown bus ignored");
            return;
        };
        if bus.state() == BusState::Disconnecting {
            return;
        }

        self.link.drain_commands(id);
        {
            let mut control = bus.control.lock();
            self.resend_mode(&state, id, &mut control);
        }

        let drives_global = match &state.reference {
            Reference::Bus(syncer) => syncer.id() == id,
            Reference::None => designates_sync,
            Reference::External => false,
        };
        if drives_global {
            self.advance_global(&mut state);
        }

        let reference = state.reference_sample(id);

        let mut control = bus.control.lock();
        let outcome = {
            let mut drift = bus.drift.lock();
            let mut ticker = bus.ticker.lock();
            ticker.step(timestamp);

            match reference {
                Some(reference) if control.mode == SyncMode::Pll => {
                    let input = DriftInput {
                        adjustment: control.sync_adjustment,
                        is_syncer: control.is_syncer,
                    };
                    drift.step(&mut ticker, reference, input, &self.config.drift)
                }
                _ => DriftOutcome::Idle,
            }
        };
        self.handle_drift_outcome(id, &mut control, outcome);

        if control.self_ticking {
            self.link.pcm_tick(id);
        }
        control.global_counter = state.global_tick;
    }

    /// Handles one tick of the external timing source.
    pub fn on_external_tick(&self, timestamp: Timestamp) {
        let mut state = self.election.lock();
        state.external.step(timestamp);
        if matches!(state.reference, Reference::External) {
            self.advance_global(&mut state);
        }
    }

    fn advance_global(&self, state: &mut ElectionState) {
        state.global_tick += 1;
        if state.global_tick % self.config.orchestrator.big_tick_interval != 0 {
            return;
        }

        for bus in self.buses.read().values() {
            let control = bus.control.lock();
            if control.state != BusState::Disconnecting && control.self_ticking {
                self.link.request_housekeeping_reset(bus.id());
            }
        }
        debug!(global_tick = state.global_tick, "Housekeeping reset broadcast");
    }

    fn handle_drift_outcome(&self, id: BusId, control: &mut BusControl, outcome: DriftOutcome) {
        match outcome {
            DriftOutcome::Idle | DriftOutcome::Sampled { .. } => {}
            DriftOutcome::Rebaselined { delta_tick } => {
                debug!(bus = %id, delta_tick, "Drift baseline taken");
            }
            DriftOutcome::LostTicks { lost } => {
                control.lost_events += 1;
                if control.lost_events % LOST_TICK_LOG_INTERVAL == 1 {
                    debug!(bus = %id, lost, events = control.lost_events, "Lost ticks");
                }
            }
            DriftOutcome::Runaway { lost, resync_count } => {
                warn!(bus = %id, lost, resync_count, "Runaway lost ticks, drift reset");
            }
            DriftOutcome::Cycle(report) => {
                control.computed_speed = report.speed;
                debug!(
                    bus = %id,
                    offset = report.offset,
                    speed = report.speed,
                    best_speed = report.best_speed,
                    fix = report.fix,
                    inaccuracy = report.sync_inaccuracy,
                    locked = report.locked,
                    "Drift cycle"
                );
                if report.send_drift {
                    self.link.send_drift(id, report.speed);
                }
            }
        }
    }

    // =========================================================================
    // Firmware Acknowledgements
    // =========================================================================

    /// Firmware reports that `id` is now in `mode` with correction `ack_speed`.
    pub fn got_new_syncer(&self, id: BusId, mode: SyncMode, ack_speed: i32) {
        let state = self.election.lock();

        let Some(bus) = self.bus(id) else {
            debug!(bus = %id, mode = %mode, "Mode ack for unknown bus ignored");
            return;
        };
        if mode == SyncMode::Query {
            debug!(bus = %id, "QUERY ack ignored");
            return;
        }

        let mut control = bus.control.lock();
        if control.unsent_mode == Some(mode) {
            control.unsent_mode = None;
        }
        if control.mode == mode {
            trace!(bus = %id, mode = %mode, "Mode ack unchanged");
            return;
        }

        let previous = control.mode;
        control.sync_adjustment = self.config.drift.clamp_speed(ack_speed);
        control.mode = mode;

        match mode {
            SyncMode::Ab | SyncMode::Pll => {
                control.self_ticking = true;
                control.is_syncer = mode == SyncMode::Ab;
                if control.pacing_timer {
                    control.pacing_timer = false;
                    self.link.set_pacing_timer(id, false);
                }
            }
            SyncMode::None => {
                control.self_ticking = false;
                control.is_syncer = false;
                if !control.pacing_timer {
                    control.pacing_timer = true;
                    self.link.set_pacing_timer(id, true);
                }
            }
            SyncMode::Query => {}
        }

        info!(
            bus = %id,
            from = %previous,
            to = %mode,
            adjustment = control.sync_adjustment,
            "Sync mode changed"
        );

        let wanted = state.wanted_mode(id);
        if mode == SyncMode::Ab && wanted != SyncMode::Ab {
            warn!(bus = %id, wanted = %wanted, "Unelected bus claims AB, re-requesting");
            self.send_mode(id, &mut control, wanted);
        }
    }

    /// Firmware confirms it applied correction `speed` to `id`.
    pub fn got_drift_ack(&self, id: BusId, speed: i32) {
        let Some(bus) = self.bus(id) else {
            debug!(bus = %id, "Drift ack for unknown bus ignored");
            return;
        };
        let mut control = bus.control.lock();
        control.sync_adjustment = self.config.drift.clamp_speed(speed);
        trace!(bus = %id, speed = control.sync_adjustment, "Drift acknowledged");
    }

    /// Asks the firmware of `id` to report its current mode.
    pub fn query_sync_mode(&self, id: BusId) -> SyncResult<()> {
        let bus = self.lookup(id)?;
        let mut control = bus.control.lock();
        self.send_mode(id, &mut control, SyncMode::Query);
        Ok(())
    }

    /// Queues a mode request, remembering it if the link refuses it. AB
    /// carries no correction.
    fn send_mode(&self, id: BusId, control: &mut BusControl, mode: SyncMode) {
        let drift = match mode {
            SyncMode::Ab => 0,
            _ => control.sync_adjustment,
        };
        if self.link.request_mode(id, mode, drift) {
            control.unsent_mode = None;
        } else {
            debug!(bus = %id, mode = %mode, "Mode request refused, will retry");
            control.unsent_mode = Some(mode);
        }
    }

    /// Retries a refused mode request if the election still wants it.
    fn resend_mode(&self, state: &ElectionState, id: BusId, control: &mut BusControl) {
        let Some(mode) = control.unsent_mode else {
            return;
        };
        if mode == SyncMode::Query || mode == state.wanted_mode(id) {
            self.send_mode(id, control, mode);
        } else {
            trace!(bus = %id, mode = %mode, "Stale mode request discarded");
            control.unsent_mode = None;
        }
    }

    // =========================================================================
    // Topology
    // =========================================================================

    /// Attaches a bus in state Connected, mode NONE, with its pacing timer on.
    pub fn attach_bus(&self, id: BusId, ports: Vec<Port>, now: Timestamp) -> SyncResult<Arc<Bus>> {
        let bus = {
            let mut buses = self.buses.write();
            if buses.contains_key(&id) {
                return Err(SyncError::BusAlreadyAttached(id));
            }
            let bus = Arc::new(Bus::new(
                id,
                ports,
                now,
                self.config.ticker.bounds(),
                &self.config.drift,
            ));
            buses.insert(id, Arc::clone(&bus));
            bus
        };

        info!(bus = %id, "Bus attached");
        self.link.set_pacing_timer(id, true);
        Ok(bus)
    }

    /// Makes `id` an election candidate, queries its mode and re-elects.
    pub fn mark_ready(&self, id: BusId) -> SyncResult<()> {
        let mut state = self.election.lock();
        let bus = self.lookup(id)?;

        {
            let mut control = bus.control.lock();
            match control.state {
                BusState::Connected => control.state = BusState::Ready,
                BusState::Ready => return Ok(()),
                BusState::Disconnecting => return Err(SyncError::UnknownBus(id)),
            }
            info!(bus = %id, "Bus ready");
            self.send_mode(id, &mut control, SyncMode::Query);
        }
        self.elect(&mut state);
        Ok(())
    }

    /// Removes `id` and re-elects. The caller owns the returned bus for
    /// teardown.
    pub fn detach_bus(&self, id: BusId) -> SyncResult<Arc<Bus>> {
        let mut state = self.election.lock();
        let bus = self
            .buses
            .write()
            .remove(&id)
            .ok_or(SyncError::UnknownBus(id))?;
        bus.control.lock().state = BusState::Disconnecting;

        info!(bus = %id, "Bus detached");
        self.elect(&mut state);
        Ok(bus)
    }

    /// Changes one port's timing priority and re-elects.
    pub fn set_port_priority(&self, id: BusId, index: usize, priority: i32) -> SyncResult<()> {
        self.update_port(id, index, |port| port.priority = priority)
    }

    /// Replaces one port's alarm flags and re-elects.
    pub fn set_port_alarms(&self, id: BusId, index: usize, alarms: PortAlarms) -> SyncResult<()> {
        self.update_port(id, index, |port| port.alarms = alarms)
    }

    fn update_port<F>(&self, id: BusId, index: usize, update: F) -> SyncResult<()>
    where
        F: FnOnce(&mut Port),
    {
        let mut state = self.election.lock();
        let bus = self.lookup(id)?;
        {
            let mut control = bus.control.lock();
            let port = control
                .ports
                .get_mut(index)
                .ok_or(SyncError::UnknownPort { bus: id, index })?;
            update(port);
            debug!(bus = %id, port = index, priority = port.priority, alarms = ?port.alarms, "Port updated");
        }
        self.elect(&mut state);
        Ok(())
    }

    /// Swaps the whole port list of `id` (sub-card hot-plug) and re-elects.
    pub fn replace_ports(&self, id: BusId, ports: Vec<Port>) -> SyncResult<()> {
        let mut state = self.election.lock();
        let bus = self.lookup(id)?;
        bus.control.lock().ports = normalize_ports(ports);
        info!(bus = %id, "Ports replaced");
        self.elect(&mut state);
        Ok(())
    }

    /// Re-runs the election.
    pub fn notify_topology_change(&self) {
        let mut state = self.election.lock();
        self.elect(&mut state);
    }

    /// Re-runs the election and returns the result.
    pub fn elect_syncer(&self) -> SyncerStatus {
        let mut state = self.election.lock();
        self.elect(&mut state)
    }

    /// Sets the operator override and re-elects.
    pub fn set_sync_source(&self, source: SyncSource) {
        let mut state = self.election.lock();
        if state.source != source {
            info!(from = %state.source, to = %source, "Sync source changed");
            state.source = source;
        }
        self.elect(&mut state);
    }

    pub fn sync_source(&self) -> SyncSource {
        self.election.lock().source
    }

    pub fn syncer(&self) -> SyncerStatus {
        self.election.lock().reference.status()
    }

    pub fn global_tick(&self) -> u64 {
        self.election.lock().global_tick
    }

    // =========================================================================
    // Election
    // =========================================================================

    fn candidates(&self) -> Vec<Candidate> {
        self.buses
            .read()
            .values()
            .filter_map(|bus| {
                let control = bus.control.lock();
                (control.state == BusState::Ready).then(|| Candidate {
                    id: bus.id(),
                    ports: control.ports.clone(),
                })
            })
            .collect()
    }

    fn elect(&self, state: &mut ElectionState) -> SyncerStatus {
        let candidates = self.candidates();
        let selection = select_syncer(&candidates, state.source, &self.config.election);

        let external = self.config.election.external_reference || state.source == SyncSource::External;
        let target = match selection {
            Some(sel) => SyncerStatus::Bus(sel.bus),
            None if external => SyncerStatus::External,
            None => SyncerStatus::None,
        };

        if target == state.reference.status() {
            trace!(syncer = %target, "Election unchanged");
            for bus in self.buses.read().values() {
                let mut control = bus.control.lock();
                if control.state != BusState::Disconnecting {
                    self.resend_mode(state, bus.id(), &mut control);
                }
            }
            return target;
        }

        if let Some(sel) = selection {
            info!(
                bus = %sel.bus,
                port = ?sel.port,
                priority = ?sel.priority,
                candidates = candidates.len(),
                "Syncer elected"
            );
        }
        self.update_sync_master(state, target);
        target
    }

    /// Repoints the reference at `target` and requests every bus into its
    /// new role.
    fn update_sync_master(&self, state: &mut ElectionState, target: SyncerStatus) {
        let previous = std::mem::replace(&mut state.reference, Reference::None);
        if let Reference::Bus(old) = &previous {
            old.reset_drift();
        }
        state.epoch += 1;

        let buses = self.all_buses();
        match target {
            SyncerStatus::Bus(id) => {
                let Some(syncer) = buses.iter().find(|b| b.id() == id).cloned() else {
                    warn!(bus = %id, "Elected bus vanished before takeover");
                    return;
                };
                syncer.reset_drift();
                {
                    let mut control = syncer.control.lock();
                    control.computed_speed = 0;
                    self.send_mode(id, &mut control, SyncMode::Ab);
                }
                state.reference = Reference::Bus(syncer);
                self.request_followers(&buses, Some(id), SyncMode::Pll);
            }
            SyncerStatus::External => {
                state.reference = Reference::External;
                self.request_followers(&buses, None, SyncMode::Pll);
            }
            SyncerStatus::None => {
                self.request_followers(&buses, None, SyncMode::None);
            }
        }

        info!(
            syncer = %target,
            previous = %previous.status(),
            epoch = state.epoch,
            "Sync master updated"
        );
    }

    fn request_followers(&self, buses: &[Arc<Bus>], syncer: Option<BusId>, mode: SyncMode) {
        for bus in buses {
            if Some(bus.id()) == syncer {
                continue;
            }
            let mut control = bus.control.lock();
            if control.state == BusState::Disconnecting || !control.self_ticking {
                continue;
            }
            self.send_mode(bus.id(), &mut control, mode);
        }
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    /// Returns a diagnostic snapshot. Never used for control decisions.
    pub fn status(&self) -> SyncStatus {
        let state = self.election.lock();
        let buses = self.all_buses();

        SyncStatus {
            syncer: state.reference.status(),
            source: state.source,
            global_tick: state.global_tick,
            reference_epoch: state.epoch,
            captured_at: Utc::now(),
            buses: buses.iter().map(|bus| bus.status()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClockConfig;
    use crate::link::{ChannelLink, LinkQueues, RecordingLink};
    use crate::protocol::BusCommand;

    const A: BusId = BusId(1);
    const B: BusId = BusId(2);
    const C: BusId = BusId(3);
    const D: BusId = BusId(4);

    fn test_config() -> ClockConfig {
        let mut config = ClockConfig::default();
        config.ticker.quick_cycle = 10;
        config.ticker.slow_cycle = 100;
        config.drift.sync_cycle = 10;
        config.drift.sample_window = 4;
        config.drift.converge_cycles = 3;
        config.orchestrator.big_tick_interval = 50;
        config
    }

    fn setup_with(config: ClockConfig) -> (SyncCoordinator, Arc<RecordingLink>) {
        let link = Arc::new(RecordingLink::default());
        let coordinator = SyncCoordinator::new(config, link.clone()).unwrap();
        (coordinator, link)
    }

    fn setup() -> (SyncCoordinator, Arc<RecordingLink>) {
        setup_with(test_config())
    }

    fn attach(c: &SyncCoordinator, id: BusId, priorities: &[i32]) {
        let ports = priorities
            .iter()
            .enumerate()
            .map(|(i, &p)| Port::new(i, p))
            .collect();
        c.attach_bus(id, ports, Timestamp::default()).unwrap();
    }

    /// A elected and acked AB; every other bus acked PLL.
    fn locked_pair(c: &SyncCoordinator) {
        attach(c, A, &[1]);
        attach(c, B, &[2]);
        c.mark_ready(A).unwrap();
        c.mark_ready(B).unwrap();
        c.got_new_syncer(A, SyncMode::Ab, 0);
        c.got_new_syncer(B, SyncMode::Pll, 0);
    }

    fn bus_status(c: &SyncCoordinator, id: BusId) -> BusStatus {
        c.bus(id).unwrap().status()
    }

    fn count_of(link: &RecordingLink, pred: impl Fn(&BusCommand) -> bool) -> usize {
        link.take().iter().filter(|c| pred(c)).count()
    }

    fn control_commands(queues: &mut LinkQueues) -> Vec<BusCommand> {
        std::iter::from_fn(|| queues.control.try_recv().ok()).collect()
    }

    #[test]
    fn test_attach_starts_connected_and_paced() {
        let (c, link) = setup();
        attach(&c, A, &[1]);

        let status = bus_status(&c, A);
        assert_eq!(status.state, BusState::Connected);
        assert_eq!(status.mode, SyncMode::None);
        assert!(status.pacing_timer);
        assert_eq!(
            link.take(),
            vec![BusCommand::SetPacingTimer {
                bus: A,
                enabled: true
            }]
        );

        let err = c.attach_bus(A, Vec::new(), Timestamp::default()).unwrap_err();
        assert!(matches!(err, SyncError::BusAlreadyAttached(id) if id == A));

        // Connected is not a candidate.
        assert_eq!(c.elect_syncer(), SyncerStatus::None);
    }

    #[test]
    fn test_priority_then_alarm_reelection() {
        let (c, link) = setup();
        attach(&c, A, &[1]);
        attach(&c, B, &[2]);
        // B reports itself self-ticking before any election.
        c.got_new_syncer(B, SyncMode::Pll, 0);
        link.take();

        c.mark_ready(A).unwrap();
        c.mark_ready(B).unwrap();
        assert_eq!(c.syncer(), SyncerStatus::Bus(A));
        assert_eq!(
            link.mode_requests(),
            vec![
                (A, SyncMode::Query),
                (A, SyncMode::Ab),
                (B, SyncMode::Pll),
                (B, SyncMode::Query),
            ]
        );

        c.got_new_syncer(A, SyncMode::Ab, 0);
        assert!(bus_status(&c, A).is_syncer);
        link.take();

        c.set_port_alarms(A, 0, PortAlarms::red()).unwrap();
        assert_eq!(c.syncer(), SyncerStatus::Bus(B));
        assert_eq!(
            link.mode_requests(),
            vec![(B, SyncMode::Ab), (A, SyncMode::Pll)]
        );

        c.got_new_syncer(B, SyncMode::Ab, 0);
        c.got_new_syncer(A, SyncMode::Pll, 0);
        let status = c.status();
        let ab: Vec<BusId> = status
            .buses
            .iter()
            .filter(|b| b.mode == SyncMode::Ab)
            .map(|b| b.id)
            .collect();
        assert_eq!(ab, vec![B]);
        assert!(!status.bus(A).unwrap().is_syncer);
    }

    #[test]
    fn test_promoted_syncer_drops_correction() {
        let (c, link) = setup();
        locked_pair(&c);
        c.got_drift_ack(B, -6);
        c.bus(B).unwrap().control.lock().computed_speed = -6;
        link.take();

        c.set_port_alarms(A, 0, PortAlarms::red()).unwrap();
        let commands = link.take();
        assert_eq!(
            commands[0],
            BusCommand::SetMode {
                bus: B,
                mode: SyncMode::Ab,
                drift: 0
            }
        );
        assert_eq!(bus_status(&c, B).computed_speed, 0);

        c.got_new_syncer(B, SyncMode::Ab, 0);
        let status = bus_status(&c, B);
        assert_eq!(status.sync_adjustment, 0);
        assert!(status.is_syncer);
    }

    /// `locked_pair` over a [`ChannelLink`] whose control queue holds four
    /// commands, with every queue drained.
    fn channel_pair(
        config: ClockConfig,
        b_priority: i32,
    ) -> (SyncCoordinator, Arc<ChannelLink>, LinkQueues) {
        let (link, mut queues) = ChannelLink::new(4);
        let link = Arc::new(link);
        let c = SyncCoordinator::new(config, link.clone()).unwrap();
        attach(&c, A, &[1]);
        attach(&c, B, &[b_priority]);
        c.got_new_syncer(A, SyncMode::Pll, 0);
        c.got_new_syncer(B, SyncMode::Pll, 0);
        control_commands(&mut queues);
        c.mark_ready(A).unwrap();
        control_commands(&mut queues);
        c.mark_ready(B).unwrap();
        control_commands(&mut queues);
        c.got_new_syncer(A, SyncMode::Ab, 0);
        assert_eq!(link.dropped(), 0);
        (c, link, queues)
    }

    fn fill_control_queue(link: &ChannelLink) {
        for _ in 0..4 {
            link.request_housekeeping_reset(A);
        }
    }

    #[test]
    fn test_refused_mode_request_is_retried() {
        let (c, link, mut queues) = channel_pair(test_config(), 2);

        // A consumer that stops reading only loses tick traffic.
        let mut now = Timestamp::default();
        for _ in 0..16 {
            now += 1_000;
            c.on_tick(A, now, false);
        }
        assert!(link.dropped_ticks() > 0);
        assert_eq!(link.dropped(), 0);
        assert!(control_commands(&mut queues).is_empty());

        fill_control_queue(&link);
        c.set_port_alarms(A, 0, PortAlarms::red()).unwrap();
        assert_eq!(c.syncer(), SyncerStatus::Bus(B));
        assert_eq!(link.dropped(), 2);
        assert_eq!(control_commands(&mut queues).len(), 4);

        // The new syncer's next tick resends its AB request.
        c.on_tick(B, now + 500, false);
        assert_eq!(
            control_commands(&mut queues),
            vec![BusCommand::SetMode {
                bus: B,
                mode: SyncMode::Ab,
                drift: 0
            }]
        );

        // An unchanged election resends what is still missing, once.
        c.notify_topology_change();
        assert_eq!(
            control_commands(&mut queues),
            vec![BusCommand::SetMode {
                bus: A,
                mode: SyncMode::Pll,
                drift: 0
            }]
        );
        c.notify_topology_change();
        c.on_tick(B, now + 1_500, false);
        assert!(control_commands(&mut queues).is_empty());

        c.got_new_syncer(B, SyncMode::Ab, 0);
        c.got_new_syncer(A, SyncMode::Pll, 0);
        assert_eq!(bus_status(&c, B).mode, SyncMode::Ab);
        assert_eq!(bus_status(&c, A).mode, SyncMode::Pll);
    }

    #[test]
    fn test_stale_refused_request_is_discarded() {
        let mut config = test_config();
        config.election.fallback_to_first_ready = false;
        let (c, link, mut queues) = channel_pair(config, 0);

        fill_control_queue(&link);
        c.got_new_syncer(B, SyncMode::Ab, 0);
        assert_eq!(link.dropped(), 1);
        assert_eq!(c.bus(B).unwrap().control.lock().unsent_mode, Some(SyncMode::Pll));
        control_commands(&mut queues);

        c.got_new_syncer(B, SyncMode::None, 0);
        c.detach_bus(A).unwrap();
        assert_eq!(c.syncer(), SyncerStatus::None);
        control_commands(&mut queues);

        // With no reference B is wanted in NONE, not PLL.
        c.notify_topology_change();
        assert!(control_commands(&mut queues).is_empty());
        assert_eq!(c.bus(B).unwrap().control.lock().unsent_mode, None);
    }

    #[test]
    fn test_election_is_idempotent() {
        let (c, link) = setup();
        locked_pair(&c);
        let epoch = c.status().reference_epoch;
        link.take();

        c.notify_topology_change();
        c.notify_topology_change();
        assert_eq!(c.elect_syncer(), SyncerStatus::Bus(A));
        c.set_sync_source(SyncSource::Auto);

        assert!(link.mode_requests().is_empty());
        assert_eq!(c.status().reference_epoch, epoch);
    }

    #[test]
    fn test_fallback_without_eligible_ports() {
        let (c, link) = setup();
        attach(&c, C, &[0, -1]);
        c.mark_ready(C).unwrap();
        assert_eq!(c.syncer(), SyncerStatus::Bus(C));
        assert!(link.mode_requests().contains(&(C, SyncMode::Ab)));

        let mut config = test_config();
        config.election.fallback_to_first_ready = false;
        let (c, _link) = setup_with(config);
        attach(&c, C, &[0]);
        c.mark_ready(C).unwrap();
        assert_eq!(c.syncer(), SyncerStatus::None);
    }

    #[test]
    fn test_stray_ab_ack_is_corrected() {
        let (c, link) = setup();
        locked_pair(&c);
        link.take();

        c.got_new_syncer(B, SyncMode::Ab, 3);
        assert_eq!(link.mode_requests(), vec![(B, SyncMode::Pll)]);
        assert_eq!(bus_status(&c, B).sync_adjustment, 3);
    }

    #[test]
    fn test_mode_ack_semantics() {
        let (c, link) = setup();
        attach(&c, A, &[1]);
        link.take();

        c.got_new_syncer(A, SyncMode::Query, 5);
        assert_eq!(bus_status(&c, A).mode, SyncMode::None);

        c.got_new_syncer(A, SyncMode::Pll, 99);
        let status = bus_status(&c, A);
        assert_eq!(status.mode, SyncMode::Pll);
        assert_eq!(status.sync_adjustment, c.config().drift.max_adjustment);
        assert!(status.self_ticking);
        assert!(!status.pacing_timer);

        // Same mode again: no-op, adjustment untouched.
        c.got_new_syncer(A, SyncMode::Pll, 0);
        assert_eq!(bus_status(&c, A).sync_adjustment, c.config().drift.max_adjustment);

        c.got_new_syncer(A, SyncMode::None, 0);
        let status = bus_status(&c, A);
        assert!(!status.self_ticking);
        assert!(status.pacing_timer);
        assert_eq!(
            link.take(),
            vec![
                BusCommand::SetPacingTimer {
                    bus: A,
                    enabled: false
                },
                BusCommand::SetPacingTimer {
                    bus: A,
                    enabled: true
                },
            ]
        );

        // Acks for unknown buses are dropped.
        c.got_new_syncer(D, SyncMode::Ab, 0);
        c.got_drift_ack(D, 1);
    }

    #[test]
    fn test_follower_converges_on_constant_offset() {
        let (c, link) = setup();
        locked_pair(&c);
        link.take();

        let mut now = Timestamp::default();
        let mut drift_requests = Vec::new();
        for _ in 0..60 {
            now += 1_000;
            c.on_tick(A, now, false);
            c.on_tick(B, now + 545, false);
            for cmd in link.take() {
                if let BusCommand::SetDrift { bus, speed } = cmd {
                    assert_eq!(bus, B);
                    drift_requests.push(speed);
                    c.got_drift_ack(bus, speed);
                }
            }
        }

        assert_eq!(drift_requests, vec![-1]);
        let status = bus_status(&c, B);
        assert_eq!(status.offset, 45);
        assert_eq!(status.computed_speed, -1);
        assert_eq!(status.sync_adjustment, -1);
        assert!(status.computed_speed.abs() <= c.config().drift.max_adjustment);
    }

    #[test]
    fn test_reassignment_rebaselines_followers() {
        let (c, _link) = setup();
        attach(&c, A, &[1]);
        attach(&c, B, &[2]);
        attach(&c, C, &[3]);
        for id in [A, B, C] {
            c.mark_ready(id).unwrap();
        }
        c.got_new_syncer(A, SyncMode::Ab, 0);
        c.got_new_syncer(B, SyncMode::Pll, 0);
        c.got_new_syncer(C, SyncMode::Pll, 0);

        let mut now = Timestamp::default();
        let mut round = |c: &SyncCoordinator| {
            now += 1_000;
            for id in [A, B, C] {
                c.on_tick(id, now + 500, false);
            }
        };
        for _ in 0..7 {
            round(&c);
        }
        let old_epoch = c.status().reference_epoch;
        let bus_c = c.bus(C).unwrap();
        assert_eq!(bus_c.drift.lock().reference_epoch(), Some(old_epoch));
        assert!(bus_c.drift.lock().pending_samples() > 0);

        c.set_port_alarms(A, 0, PortAlarms::red()).unwrap();
        assert_eq!(c.syncer(), SyncerStatus::Bus(B));
        let new_epoch = c.status().reference_epoch;
        assert_eq!(new_epoch, old_epoch + 1);
        assert_eq!(c.bus(B).unwrap().drift.lock().reference_epoch(), None);

        round(&c);
        assert_eq!(bus_c.drift.lock().reference_epoch(), Some(new_epoch));
        assert_eq!(bus_c.drift.lock().pending_samples(), 0);
    }

    #[test]
    fn test_detach_with_lost_ticks_then_clean_reattach() {
        let (c, link) = setup();
        attach(&c, A, &[1]);
        attach(&c, D, &[2]);
        c.mark_ready(A).unwrap();
        c.mark_ready(D).unwrap();
        c.got_new_syncer(A, SyncMode::Ab, 0);
        c.got_new_syncer(D, SyncMode::Pll, 0);

        let mut now = Timestamp::default();
        for round in 0..40 {
            now += 1_000;
            c.on_tick(A, now, false);
            // D misses every fifth tick, seven times.
            if round % 5 == 4 && round < 35 {
                continue;
            }
            c.on_tick(D, now + 500, false);
        }
        let status = bus_status(&c, D);
        assert_eq!(status.lost_ticks, 7);
        assert_eq!(status.lost_tick_count, 7);

        let detached = c.detach_bus(D).unwrap();
        assert_eq!(detached.state(), BusState::Disconnecting);
        let count = detached.tick_sample().count;
        let drains = link.drains();

        c.on_tick(D, now + 1_000, false);
        c.got_drift_ack(D, 4);
        assert_eq!(detached.tick_sample().count, count);
        assert_eq!(link.drains(), drains);
        assert!(c.bus(D).is_none());
        assert!(c.status().bus(D).is_none());

        attach(&c, D, &[2]);
        let status = bus_status(&c, D);
        assert_eq!(status.lost_ticks, 0);
        assert_eq!(status.lost_tick_count, 0);
        assert_eq!(status.tick_count, 0);
        assert_eq!(status.mode, SyncMode::None);
        assert_eq!(status.state, BusState::Connected);
    }

    #[test]
    fn test_runaway_realigns_count() {
        let (c, _link) = setup();
        locked_pair(&c);

        let mut now = Timestamp::default();
        for _ in 0..5 {
            now += 1_000;
            c.on_tick(A, now, false);
            c.on_tick(B, now + 500, false);
        }
        for _ in 0..150 {
            now += 1_000;
            c.on_tick(A, now, false);
        }
        now += 1_000;
        c.on_tick(A, now, false);
        c.on_tick(B, now + 500, false);

        let a = bus_status(&c, A);
        let b = bus_status(&c, B);
        assert_eq!(b.tick_count, a.tick_count);
        assert_eq!(b.lost_tick_count, 150);
    }

    #[test]
    fn test_detaching_syncer_releases_reference() {
        let (c, link) = setup();
        locked_pair(&c);
        link.take();

        let a = c.detach_bus(A).unwrap();
        assert_eq!(c.syncer(), SyncerStatus::Bus(B));
        assert_eq!(Arc::strong_count(&a), 1);
        assert_eq!(link.mode_requests(), vec![(B, SyncMode::Ab)]);

        let b = c.detach_bus(B).unwrap();
        assert_eq!(c.syncer(), SyncerStatus::None);
        assert_eq!(Arc::strong_count(&b), 1);
        assert!(matches!(c.detach_bus(B), Err(SyncError::UnknownBus(_))));
    }

    #[test]
    fn test_global_tick_and_housekeeping() {
        let (c, link) = setup();
        locked_pair(&c);
        link.take();

        let mut now = Timestamp::default();
        for _ in 0..50 {
            now += 1_000;
            c.on_tick(A, now, false);
            c.on_tick(B, now + 500, true);
        }
        assert_eq!(c.global_tick(), 50);
        assert_eq!(bus_status(&c, B).global_counter, 50);
        assert_eq!(link.drains(), 100);
        assert_eq!(link.pcm_ticks(), 100);

        let resets = count_of(&link, |cmd| matches!(cmd, BusCommand::HousekeepingReset { .. }));
        assert_eq!(resets, 2);
    }

    #[test]
    fn test_designated_bus_drives_global_without_syncer() {
        let mut config = test_config();
        config.election.fallback_to_first_ready = false;
        let (c, link) = setup_with(config);
        attach(&c, A, &[0]);
        attach(&c, B, &[0]);
        c.mark_ready(A).unwrap();
        c.mark_ready(B).unwrap();
        assert_eq!(c.syncer(), SyncerStatus::None);

        let now = Timestamp::from_millis(1);
        c.on_tick(A, now, true);
        c.on_tick(B, now, false);
        c.on_tick(A, now + 1_000, true);
        assert_eq!(c.global_tick(), 2);

        // NONE buses are host-paced: no PCM fan-out from the tick path.
        assert_eq!(link.pcm_ticks(), 0);
    }

    #[test]
    fn test_external_reference() {
        let (c, link) = setup();
        attach(&c, A, &[1]);
        c.got_new_syncer(A, SyncMode::Pll, 0);
        c.mark_ready(A).unwrap();
        link.take();

        c.set_sync_source(SyncSource::External);
        assert_eq!(c.syncer(), SyncerStatus::External);
        assert_eq!(link.mode_requests(), vec![(A, SyncMode::Pll)]);

        let mut now = Timestamp::default();
        for _ in 0..3 {
            now += 1_000;
            c.on_external_tick(now);
            c.on_tick(A, now + 500, false);
        }
        assert_eq!(c.global_tick(), 3);
        let epoch = c.status().reference_epoch;
        assert_eq!(c.bus(A).unwrap().drift.lock().reference_epoch(), Some(epoch));

        c.set_sync_source(SyncSource::Auto);
        assert_eq!(c.syncer(), SyncerStatus::Bus(A));
    }

    #[test]
    fn test_port_administration_errors() {
        let (c, _link) = setup();
        attach(&c, A, &[1]);
        assert!(matches!(
            c.set_port_priority(A, 5, 1),
            Err(SyncError::UnknownPort { index: 5, .. })
        ));
        assert!(c.set_port_priority(D, 0, 1).unwrap_err().is_topology_error());
        assert!(c.mark_ready(D).is_err());
        assert!(c.query_sync_mode(D).is_err());

        c.mark_ready(A).unwrap();
        c.replace_ports(A, vec![Port::new(9, 0), Port::new(9, 4)]).unwrap();
        let ports = bus_status(&c, A).ports;
        assert_eq!(ports[1].index, 1);
        assert_eq!(ports[1].priority, 4);
    }

    #[test]
    fn test_priority_change_moves_syncer() {
        let (c, _link) = setup();
        locked_pair(&c);
        c.set_port_priority(B, 0, 1).unwrap();
        // Tie: lower bus id keeps it.
        assert_eq!(c.syncer(), SyncerStatus::Bus(A));
        c.set_port_priority(A, 0, 0).unwrap();
        assert_eq!(c.syncer(), SyncerStatus::Bus(B));
    }

    #[test]
    fn test_parallel_ticks_with_topology_changes() {
        let (c, _link) = setup();
        attach(&c, A, &[1]);
        attach(&c, B, &[2]);
        attach(&c, C, &[3]);
        for id in [A, B, C] {
            c.mark_ready(id).unwrap();
        }
        c.got_new_syncer(A, SyncMode::Ab, 0);
        c.got_new_syncer(B, SyncMode::Pll, 0);
        c.got_new_syncer(C, SyncMode::Pll, 0);

        std::thread::scope(|s| {
            for (i, id) in [A, B, C].into_iter().enumerate() {
                let c = &c;
                s.spawn(move || {
                    let mut now = Timestamp::from_micros(i as i64 * 300);
                    for _ in 0..2_000 {
                        now += 1_000;
                        c.on_tick(id, now, false);
                    }
                });
            }

            s.spawn(|| {
                for _ in 0..500 {
                    let status = c.status();
                    for bus in &status.buses {
                        assert!(bus.global_counter <= status.global_tick);
                    }
                    if let SyncerStatus::Bus(id) = status.syncer {
                        assert!(status.bus(id).is_some());
                    }
                }
            });

            s.spawn(|| {
                for round in 0..100 {
                    let alarms = if round % 2 == 0 {
                        PortAlarms::red()
                    } else {
                        PortAlarms::clear()
                    };
                    c.set_port_alarms(A, 0, alarms).unwrap();
                    let syncer = c.syncer();
                    for id in [A, B, C] {
                        let mode = if syncer == SyncerStatus::Bus(id) {
                            SyncMode::Ab
                        } else {
                            SyncMode::Pll
                        };
                        c.got_new_syncer(id, mode, 0);
                    }
                }
            });
        });

        assert_eq!(c.syncer(), SyncerStatus::Bus(A));
        let status = c.status();
        let ab: Vec<BusId> = status
            .buses
            .iter()
            .filter(|b| b.mode == SyncMode::Ab)
            .map(|b| b.id)
            .collect();
        assert_eq!(ab, vec![A]);
        assert!(status.global_tick > 0);
    }

    #[test]
    fn test_status_serializes() {
        let (c, _link) = setup();
        locked_pair(&c);
        let json = serde_json::to_value(c.status()).unwrap();
        assert_eq!(json["syncer"]["kind"], "bus");
        assert_eq!(json["syncer"]["bus"], 1);
        assert_eq!(json["source"], "auto");
        assert_eq!(json["buses"].as_array().unwrap().len(), 2);
    }
}
