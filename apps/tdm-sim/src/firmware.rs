//! # Firmware Model
//!
//! Stands in for bus firmware: owns each bus's crystal, applies mode and
//! drift commands, and answers with acknowledgements.
//!
//! ```text
//!   BusCommand ──► Firmware::handle ──► Option<FirmwareAck>
//!
//!   tick period:
//!     NONE      nominal (host pacing timer)
//!     AB / PLL  nominal × (1 + (ppm + speed × gain) / 1e6)
//!
//!   speed register: signed byte, clamped to ±MAX_SPEED
//! ```

use serde::Serialize;
use std::collections::BTreeMap;

use tdm_core::{BusId, SyncMode};
use tdm_sync::{BusCommand, FirmwareAck};
use tracing::{debug, trace};

use crate::scenario::BusSpec;

/// Largest correction the firmware speed register holds.
pub const MAX_SPEED: i32 = 127;

/// One simulated bus clock and its firmware state.
#[derive(Debug, Clone)]
pub struct SimClock {
    pub id: BusId,
    nominal_us: f64,
    ppm: f64,
    gain_ppm: f64,
    pub mode: SyncMode,
    pub speed: i32,
    pub next_tick_us: f64,
    pub ticks: u64,
    drop_every: Option<u64>,
    pub designates_sync: bool,
    pub counters: FirmwareCounters,
}

/// Per-bus command counts.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FirmwareCounters {
    pub bus: u16,
    pub mode_changes: u64,
    pub drift_updates: u64,
    pub housekeeping_resets: u64,
    pub pcm_ticks: u64,
    pub drains: u64,
    pub dropped_ticks: u64,
    pub pacing_timer: bool,
}

impl SimClock {
    pub fn new(spec: &BusSpec, nominal_us: f64, gain_ppm: f64) -> Self {
        SimClock {
            id: BusId(spec.id),
            nominal_us,
            ppm: spec.ppm,
            gain_ppm,
            mode: SyncMode::None,
            speed: 0,
            next_tick_us: spec.phase_us,
            ticks: 0,
            drop_every: spec.drop_every,
            designates_sync: spec.designates_sync,
            counters: FirmwareCounters {
                bus: spec.id,
                ..FirmwareCounters::default()
            },
        }
    }

    /// Current tick period in microseconds.
    pub fn period_us(&self) -> f64 {
        match self.mode {
            SyncMode::Ab | SyncMode::Pll => {
                let error = self.ppm + f64::from(self.speed) * self.gain_ppm;
                self.nominal_us * (1.0 + error / 1_000_000.0)
            }
            SyncMode::None | SyncMode::Query => self.nominal_us,
        }
    }

    /// Consumes the due tick. Returns false if it is dropped before reaching
    /// the host.
    pub fn advance(&mut self) -> bool {
        self.ticks += 1;
        self.next_tick_us += self.period_us();

        let dropped = self.drop_every.is_some_and(|n| self.ticks % n == 0);
        if dropped {
            self.counters.dropped_ticks += 1;
        }
        !dropped
    }
}

/// All simulated firmware, keyed by bus.
#[derive(Debug, Default)]
pub struct Firmware {
    clocks: BTreeMap<BusId, SimClock>,
}

impl Firmware {
    pub fn insert(&mut self, clock: SimClock) {
        self.clocks.insert(clock.id, clock);
    }

    pub fn remove(&mut self, id: BusId) -> Option<SimClock> {
        self.clocks.remove(&id)
    }

    #[cfg(test)]
    pub fn get(&self, id: BusId) -> Option<&SimClock> {
        self.clocks.get(&id)
    }

    /// The clock with the earliest pending tick.
    pub fn next_due(&mut self) -> Option<&mut SimClock> {
        self.clocks
            .values_mut()
            .min_by(|a, b| a.next_tick_us.total_cmp(&b.next_tick_us))
    }

    pub fn counters(&self) -> Vec<FirmwareCounters> {
        self.clocks.values().map(|c| c.counters.clone()).collect()
    }

    /// Applies one command. QUERY is answered with PLL: bus firmware that
    /// has a crystal always reports itself self-ticking.
    pub fn handle(&mut self, command: BusCommand) -> Option<FirmwareAck> {
        let bus = command.bus();
        let Some(clock) = self.clocks.get_mut(&bus) else {
            trace!(bus = %bus, command = command.type_name(), "Command for removed bus");
            return None;
        };

        match command {
            BusCommand::SetMode { mode: SyncMode::Query, .. } => {
                let mode = if clock.mode == SyncMode::None {
                    SyncMode::Pll
                } else {
                    clock.mode
                };
                clock.mode = mode;
                Some(FirmwareAck::ModeAck {
                    bus,
                    mode,
                    speed: clock.speed,
                })
            }
            BusCommand::SetMode { mode, drift, .. } => {
                clock.mode = mode;
                clock.speed = drift.clamp(-MAX_SPEED, MAX_SPEED);
                clock.counters.mode_changes += 1;
                debug!(bus = %bus, mode = %mode, speed = clock.speed, "Firmware mode set");
                Some(FirmwareAck::ModeAck {
                    bus,
                    mode,
                    speed: clock.speed,
                })
            }
            BusCommand::SetDrift { speed, .. } => {
                clock.speed = speed.clamp(-MAX_SPEED, MAX_SPEED);
                clock.counters.drift_updates += 1;
                Some(FirmwareAck::DriftAck {
                    bus,
                    speed: clock.speed,
                })
            }
            BusCommand::HousekeepingReset { .. } => {
                clock.counters.housekeeping_resets += 1;
                None
            }
            BusCommand::SetPacingTimer { enabled, .. } => {
                clock.counters.pacing_timer = enabled;
                None
            }
            BusCommand::Drain { .. } => {
                clock.counters.drains += 1;
                None
            }
            BusCommand::PcmTick { .. } => {
                clock.counters.pcm_ticks += 1;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(id: u16, ppm: f64) -> BusSpec {
        BusSpec {
            id,
            ppm,
            phase_us: 100.0,
            priorities: vec![1],
            drop_every: Some(3),
            designates_sync: false,
        }
    }

    #[test]
    fn test_period_follows_mode_and_speed() {
        let mut clock = SimClock::new(&spec(0, 10.0), 1_000.0, 2.0);
        assert_eq!(clock.period_us(), 1_000.0);

        clock.mode = SyncMode::Pll;
        assert!((clock.period_us() - 1_000.01).abs() < 1e-9);

        clock.speed = -5;
        assert_eq!(clock.period_us(), 1_000.0);
    }

    #[test]
    fn test_advance_drops_every_nth() {
        let mut clock = SimClock::new(&spec(0, 0.0), 1_000.0, 2.0);
        let delivered: Vec<bool> = (0..6).map(|_| clock.advance()).collect();
        assert_eq!(delivered, vec![true, true, false, true, true, false]);
        assert_eq!(clock.counters.dropped_ticks, 2);
        assert_eq!(clock.next_tick_us, 6_100.0);
    }

    #[test]
    fn test_query_answers_pll() {
        let mut fw = Firmware::default();
        fw.insert(SimClock::new(&spec(1, 0.0), 1_000.0, 2.0));

        let ack = fw.handle(BusCommand::SetMode {
            bus: BusId(1),
            mode: SyncMode::Query,
            drift: 0,
        });
        assert_eq!(
            ack,
            Some(FirmwareAck::ModeAck {
                bus: BusId(1),
                mode: SyncMode::Pll,
                speed: 0
            })
        );
    }

    #[test]
    fn test_commands_update_state() {
        let mut fw = Firmware::default();
        fw.insert(SimClock::new(&spec(1, 0.0), 1_000.0, 2.0));

        fw.handle(BusCommand::SetMode {
            bus: BusId(1),
            mode: SyncMode::Ab,
            drift: 3,
        });
        let ack = fw.handle(BusCommand::SetDrift {
            bus: BusId(1),
            speed: -2,
        });
        assert_eq!(ack, Some(FirmwareAck::DriftAck { bus: BusId(1), speed: -2 }));
        assert!(fw.handle(BusCommand::PcmTick { bus: BusId(1) }).is_none());

        let clock = fw.get(BusId(1)).unwrap();
        assert_eq!(clock.mode, SyncMode::Ab);
        assert_eq!(clock.speed, -2);
        assert_eq!(clock.counters.mode_changes, 1);
        assert_eq!(clock.counters.pcm_ticks, 1);

        assert!(fw.handle(BusCommand::Drain { bus: BusId(9) }).is_none());
    }

    #[test]
    fn test_speed_register_saturates() {
        let mut fw = Firmware::default();
        fw.insert(SimClock::new(&spec(1, 0.0), 1_000.0, 2.0));

        let ack = fw.handle(BusCommand::SetDrift {
            bus: BusId(1),
            speed: -500,
        });
        assert_eq!(
            ack,
            Some(FirmwareAck::DriftAck {
                bus: BusId(1),
                speed: -MAX_SPEED
            })
        );
        assert_eq!(fw.get(BusId(1)).unwrap().speed, -MAX_SPEED);
    }

    #[test]
    fn test_next_due_picks_earliest() {
        let mut fw = Firmware::default();
        fw.insert(SimClock::new(&spec(0, 0.0), 1_000.0, 2.0));
        let mut late = spec(1, 0.0);
        late.phase_us = 50.0;
        fw.insert(SimClock::new(&late, 1_000.0, 2.0));

        assert_eq!(fw.next_due().map(|c| c.id), Some(BusId(1)));
    }
}
