//! # Simulation Loop
//!
//! Discrete-event loop over virtual time. Each step delivers the earliest
//! pending bus tick to the coordinator, then pumps the control and tick
//! queues through the firmware model until both are quiet.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};

use tdm_core::{BusId, Port, PortAlarms, Timestamp};
use tdm_sync::{ChannelLink, ClockConfig, FirmwareAck, LinkQueues, SyncCoordinator, SyncStatus};

use crate::firmware::{Firmware, FirmwareCounters, SimClock};
use crate::scenario::{Scenario, SimAction, SimEvent, SimResult};

/// Final state of a run.
#[derive(Debug, Serialize)]
pub struct SimReport {
    pub virtual_ms: u64,
    pub delivered_ticks: u64,
    pub dropped_commands: u64,
    pub dropped_tick_commands: u64,
    pub status: SyncStatus,
    pub firmware: Vec<FirmwareCounters>,
}

pub struct Simulation {
    coordinator: SyncCoordinator,
    link: Arc<ChannelLink>,
    queues: LinkQueues,
    firmware: Firmware,
    timeline: VecDeque<SimEvent>,
    duration_us: f64,
    delivered_ticks: u64,
}

impl Simulation {
    /// Attaches every scenario bus and marks it ready.
    pub fn new(config: ClockConfig, scenario: &Scenario) -> SimResult<Self> {
        scenario.validate()?;

        let (link, queues) = ChannelLink::new(config.orchestrator.command_queue_depth);
        let link = Arc::new(link);
        let coordinator = SyncCoordinator::new(config, link.clone())?;

        let mut sim = Simulation {
            coordinator,
            link,
            queues,
            firmware: Firmware::default(),
            timeline: scenario.timeline().into(),
            duration_us: scenario.duration_ms as f64 * 1_000.0,
            delivered_ticks: 0,
        };

        for spec in &scenario.buses {
            let ports = spec
                .priorities
                .iter()
                .enumerate()
                .map(|(i, &p)| Port::new(i, p))
                .collect();
            sim.firmware
                .insert(SimClock::new(spec, scenario.nominal_period_us, scenario.gain_ppm));
            sim.coordinator
                .attach_bus(BusId(spec.id), ports, Timestamp::default())?;
            sim.pump();
        }
        for spec in &scenario.buses {
            sim.coordinator.mark_ready(BusId(spec.id))?;
            sim.pump();
        }

        Ok(sim)
    }

    #[cfg(test)]
    pub fn coordinator(&self) -> &SyncCoordinator {
        &self.coordinator
    }

    /// Runs to the end of the scenario.
    pub fn run(mut self) -> SimReport {
        info!(
            duration_ms = self.duration_us / 1_000.0,
            syncer = %self.coordinator.syncer(),
            "Simulation started"
        );

        while let Some((id, at_us, designates_sync, delivered)) = self.next_tick() {
            if at_us >= self.duration_us {
                break;
            }
            self.apply_due_events(at_us);

            if delivered {
                self.coordinator
                    .on_tick(id, Timestamp::from_micros(at_us as i64), designates_sync);
                self.delivered_ticks += 1;
            }
            self.pump();
        }

        let report = SimReport {
            virtual_ms: (self.duration_us / 1_000.0) as u64,
            delivered_ticks: self.delivered_ticks,
            dropped_commands: self.link.dropped(),
            dropped_tick_commands: self.link.dropped_ticks(),
            status: self.coordinator.status(),
            firmware: self.firmware.counters(),
        };
        info!(
            syncer = %report.status.syncer,
            global_tick = report.status.global_tick,
            delivered_ticks = report.delivered_ticks,
            "Simulation finished"
        );
        report
    }

    /// Advances the earliest clock and returns its tick.
    fn next_tick(&mut self) -> Option<(BusId, f64, bool, bool)> {
        let clock = self.firmware.next_due()?;
        let at_us = clock.next_tick_us;
        let delivered = clock.advance();
        Some((clock.id, at_us, clock.designates_sync, delivered))
    }

    fn apply_due_events(&mut self, now_us: f64) {
        while self
            .timeline
            .front()
            .is_some_and(|e| (e.at_ms as f64) * 1_000.0 <= now_us)
        {
            let Some(event) = self.timeline.pop_front() else {
                break;
            };
            info!(at_ms = event.at_ms, action = ?event.action, "Applying scenario event");
            if let Err(e) = self.apply(&event.action) {
                warn!(error = %e, action = ?event.action, "Scenario event failed");
            }
            self.pump();
        }
    }

    fn apply(&mut self, action: &SimAction) -> SimResult<()> {
        match *action {
            SimAction::RaiseAlarm { bus, port } => {
                self.coordinator
                    .set_port_alarms(BusId(bus), port, PortAlarms::red())?;
            }
            SimAction::ClearAlarm { bus, port } => {
                self.coordinator
                    .set_port_alarms(BusId(bus), port, PortAlarms::clear())?;
            }
            SimAction::SetPriority {
                bus,
                port,
                priority,
            } => {
                self.coordinator
                    .set_port_priority(BusId(bus), port, priority)?;
            }
            SimAction::Detach { bus } => {
                let detached = self.coordinator.detach_bus(BusId(bus))?;
                self.firmware.remove(detached.id());
            }
        }
        Ok(())
    }

    /// Delivers queued commands to the firmware and acks back to the
    /// coordinator until nothing is left.
    fn pump(&mut self) {
        while let Ok(command) = self.queues.ticks.try_recv() {
            self.firmware.handle(command);
        }
        while let Ok(command) = self.queues.control.try_recv() {
            let Some(ack) = self.firmware.handle(command) else {
                continue;
            };
            debug!(bus = %ack.bus(), ack = ack.type_name(), "Firmware ack");
            match ack {
                FirmwareAck::ModeAck { bus, mode, speed } => {
                    self.coordinator.got_new_syncer(bus, mode, speed)
                }
                FirmwareAck::DriftAck { bus, speed } => self.coordinator.got_drift_ack(bus, speed),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::BusSpec;
    use tdm_core::SyncMode;
    use tdm_sync::SyncerStatus;

    fn bus(id: u16, ppm: f64, phase_us: f64, priorities: Vec<i32>) -> BusSpec {
        BusSpec {
            id,
            ppm,
            phase_us,
            priorities,
            drop_every: None,
            designates_sync: false,
        }
    }

    fn two_bus(duration_ms: u64) -> Scenario {
        Scenario {
            duration_ms,
            nominal_period_us: 1_000.0,
            gain_ppm: 2.0,
            buses: vec![bus(0, 0.0, 0.0, vec![1]), bus(1, 5.0, 500.0, vec![2])],
            events: Vec::new(),
        }
    }

    #[test]
    fn test_startup_elects_and_locks_modes() {
        let sim = Simulation::new(ClockConfig::default(), &two_bus(10)).unwrap();
        let status = sim.coordinator().status();
        assert_eq!(status.syncer, SyncerStatus::Bus(BusId(0)));
        assert_eq!(status.bus(BusId(0)).unwrap().mode, SyncMode::Ab);
        assert_eq!(status.bus(BusId(1)).unwrap().mode, SyncMode::Pll);
        assert!(!status.bus(BusId(1)).unwrap().pacing_timer);
    }

    #[test]
    fn test_run_drives_global_tick() {
        let report = Simulation::new(ClockConfig::default(), &two_bus(100))
            .unwrap()
            .run();
        assert_eq!(report.status.global_tick, 100);
        assert_eq!(report.delivered_ticks, 200);
        assert_eq!(report.dropped_commands, 0);
        assert_eq!(report.dropped_tick_commands, 0);
        assert!(report.firmware.iter().all(|f| f.pcm_ticks == 100));
    }

    #[test]
    fn test_alarm_event_fails_over() {
        let mut scenario = two_bus(50);
        scenario.events.push(SimEvent {
            at_ms: 20,
            action: SimAction::RaiseAlarm { bus: 0, port: 0 },
        });
        let report = Simulation::new(ClockConfig::default(), &scenario)
            .unwrap()
            .run();
        assert_eq!(report.status.syncer, SyncerStatus::Bus(BusId(1)));
        assert_eq!(report.status.bus(BusId(1)).unwrap().mode, SyncMode::Ab);
        assert_eq!(report.status.bus(BusId(0)).unwrap().mode, SyncMode::Pll);
        assert_eq!(report.status.bus(BusId(1)).unwrap().sync_adjustment, 0);
    }

    #[test]
    fn test_detach_event_removes_bus() {
        let mut scenario = two_bus(50);
        scenario.events.push(SimEvent {
            at_ms: 10,
            action: SimAction::Detach { bus: 1 },
        });
        let report = Simulation::new(ClockConfig::default(), &scenario)
            .unwrap()
            .run();
        assert!(report.status.bus(BusId(1)).is_none());
        assert_eq!(report.firmware.len(), 1);
    }
}
