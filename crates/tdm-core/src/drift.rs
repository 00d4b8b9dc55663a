//! # Drift Tracker
//!
//! Compares one bus's [`Ticker`] against the reference ticker and derives a
//! bounded rate correction ("speed") for the bus firmware.
//!
//! ## Control Loop
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     One SYNC_CYCLE (default 500 ticks)                  │
//! │                                                                         │
//! │  phase: 1 ........................ cycle-window ........ cycle-1   0    │
//! │         │   ignore (settling)          │   accumulate usec_delta  │fin  │
//! │         └──────────────────────────────┴──────────────────────────┴──┘  │
//! │                                                                         │
//! │  usec_delta = last_sample(this) - last_sample(reference)                │
//! │                                                                         │
//! │  FINALIZE (phase 0):                                                    │
//! │    offset     = mean(usec_delta) - CENTER_TARGET                        │
//! │    best_speed = (max_speed + min_speed) / 2                             │
//! │                                                                         │
//! │        0 < offset < DELTA_BAND   →  best_speed - 1                      │
//! │   -DELTA_BAND < offset < 0       →  best_speed + 1                      │
//! │        otherwise                 →  sync_adjustment + fix               │
//! │             fix = -1  if offset > 0 and offset grew                     │
//! │             fix = +1  if offset ≤ 0 and offset shrank                   │
//! │                                                                         │
//! │    speed clamped to [-MAX_ADJ, +MAX_ADJ]                                │
//! │    every CONVERGE_CYCLES: [min_speed, max_speed] narrows toward best    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Lost Ticks
//! In steady state `this.count - ref.count` is constant. Any change is a lost
//! tick on one side. Small losses are counted and the step is skipped; a loss
//! beyond `runaway_threshold` hard-resets the tracker and snaps this bus's
//! count onto the reference.
//!
//! ## Reference Epochs
//! Every reassignment of the reference carries a new epoch. A tracker that
//! sees an epoch it did not measure against throws away its accumulated
//! samples and re-baselines before computing anything, so samples taken
//! against two different references are never mixed.

use serde::{Deserialize, Serialize};

use crate::ticker::{TickSample, Ticker};
use crate::timestamp::Timestamp;

/// Default number of ticks per drift cycle.
pub const DEFAULT_SYNC_CYCLE: u32 = 500;

/// Default number of trailing ticks of each cycle that are averaged.
pub const DEFAULT_SAMPLE_WINDOW: u32 = 100;

/// Default target distance, in µs, between a follower tick and the reference tick.
pub const DEFAULT_CENTER_TARGET_US: i64 = 500;

/// Default band, in µs, around the target inside which we creep instead of steer.
pub const DEFAULT_DELTA_BAND_US: i64 = 40;

/// Default correction limit, in firmware drift units.
pub const DEFAULT_MAX_ADJUSTMENT: i32 = 20;

/// Default number of cycles per convergence window.
pub const DEFAULT_CONVERGE_CYCLES: u32 = 10;

/// Default lost-tick magnitude that triggers a hard reset.
pub const DEFAULT_RUNAWAY_THRESHOLD: i64 = 100;

// =============================================================================
// Drift Parameters
// =============================================================================

/// Tuning of the drift control loop.
///
/// The defaults were tuned against USB micro-frame jitter; other transports
/// will want different values. See [`crate::validation::validate_drift_params`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftParams {
    /// Ticks per drift cycle.
    pub sync_cycle: u32,
    /// Trailing ticks of each cycle that are averaged.
    pub sample_window: u32,
    /// Desired mean `usec_delta`.
    pub center_target_us: i64,
    /// Half-width of the creep band around the target.
    pub delta_band_us: i64,
    /// Absolute limit on the correction value.
    pub max_adjustment: i32,
    /// Cycles per convergence window.
    pub converge_cycles: u32,
    /// Lost-tick magnitude beyond which the tracker hard-resets.
    pub runaway_threshold: i64,
}

impl Default for DriftParams {
    fn default() -> Self {
        DriftParams {
            sync_cycle: DEFAULT_SYNC_CYCLE,
            sample_window: DEFAULT_SAMPLE_WINDOW,
            center_target_us: DEFAULT_CENTER_TARGET_US,
            delta_band_us: DEFAULT_DELTA_BAND_US,
            max_adjustment: DEFAULT_MAX_ADJUSTMENT,
            converge_cycles: DEFAULT_CONVERGE_CYCLES,
            runaway_threshold: DEFAULT_RUNAWAY_THRESHOLD,
        }
    }
}

impl DriftParams {
    /// Clamps a correction into `[-max_adjustment, +max_adjustment]`.
    #[inline]
    pub fn clamp_speed(&self, speed: i32) -> i32 {
        speed.clamp(-self.max_adjustment, self.max_adjustment)
    }

    /// Returns true if `count` falls in the averaged tail of its cycle.
    ///
    /// Phase 0 (the tick that closes a cycle) is part of the tail.
    #[inline]
    fn in_sample_window(&self, count: u64) -> bool {
        let cycle = u64::from(self.sync_cycle);
        let phase = count % cycle;
        phase == 0 || phase > cycle - u64::from(self.sample_window)
    }
}

// =============================================================================
// Step Inputs and Outcomes
// =============================================================================

/// A reference ticker snapshot tagged with the reference generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceSample {
    /// Generation of the reference this sample was read from.
    pub epoch: u64,
    /// The reference ticker's latest `{count, last_sample, tick_period}`.
    pub tick: TickSample,
}

/// Bus-side facts the drift step needs but does not own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DriftInput {
    /// Correction value the firmware last acknowledged.
    pub adjustment: i32,
    /// Whether this bus currently holds hardware syncer status.
    pub is_syncer: bool,
}

/// Result of finalizing one drift cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub offset: i64,
    pub previous_offset: i64,
    pub best_speed: i32,
    pub fix: i32,
    /// New correction value, already clamped.
    pub speed: i32,
    pub min_speed: i32,
    pub max_speed: i32,
    pub sync_inaccuracy: i64,
    pub offset_range: i64,
    /// The convergence window closed and the speed window narrowed.
    pub narrowed: bool,
    /// The offset is inside the creep band.
    pub locked: bool,
    /// The engine should send `speed` to the firmware.
    pub send_drift: bool,
}

/// What a single drift step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftOutcome {
    /// No drift work this tick: the bus is not following a live reference.
    Idle,
    /// First step against this reference: baseline taken, nothing measured.
    Rebaselined { delta_tick: i64 },
    /// Some ticks went missing; step skipped.
    LostTicks { lost: i64 },
    /// Too many ticks went missing; tracker reset and count re-aligned.
    Runaway { lost: i64, resync_count: u64 },
    /// A regular mid-cycle tick.
    Sampled { usec_delta: i64 },
    /// The tick closed a drift cycle.
    Cycle(CycleReport),
}

// =============================================================================
// Drift Statistics
// =============================================================================

/// Diagnostic copy of a tracker's state. Never used for control decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DriftStats {
    pub delta_tick: i64,
    pub lost_ticks: u64,
    pub lost_tick_count: u64,
    pub last_lost_tick: Option<Timestamp>,
    pub offset: i64,
    pub computed_speed: i32,
    pub min_speed: i32,
    pub max_speed: i32,
    pub sync_inaccuracy: i64,
    pub offset_range: i64,
    pub reference_epoch: Option<u64>,
}

// =============================================================================
// Drift Tracker
// =============================================================================

/// Per-bus drift measurement and correction state.
#[derive(Debug, Clone)]
pub struct DriftTracker {
    max_adjustment: i32,

    delta_tick: i64,
    reference_epoch: Option<u64>,

    lost_ticks: u64,
    lost_tick_count: u64,
    last_lost_tick: Option<Timestamp>,

    delta_sum: i64,
    samples_in_window: i64,

    offset: i64,
    previous_offset: i64,
    offset_min: Option<i64>,
    offset_max: Option<i64>,
    sync_inaccuracy: i64,
    offset_range: i64,

    computed_speed: i32,
    min_speed: i32,
    max_speed: i32,
    cycles_in_window: u32,
}

impl DriftTracker {
    /// Creates a tracker with an empty speed window.
    pub fn new(params: &DriftParams) -> Self {
        DriftTracker {
            max_adjustment: params.max_adjustment,
            delta_tick: 0,
            reference_epoch: None,
            lost_ticks: 0,
            lost_tick_count: 0,
            last_lost_tick: None,
            delta_sum: 0,
            samples_in_window: 0,
            offset: 0,
            previous_offset: 0,
            offset_min: None,
            offset_max: None,
            sync_inaccuracy: 0,
            offset_range: 0,
            computed_speed: 0,
            // Inverted on purpose: the first cycle's speed becomes both ends.
            min_speed: params.max_adjustment,
            max_speed: -params.max_adjustment,
            cycles_in_window: 0,
        }
    }

    /// Hard reset: forget the baseline, the accumulated samples and both
    /// windows, and fall back to quick sampling.
    ///
    /// Lifetime lost-tick counters survive so diagnostics keep history.
    pub fn reset(&mut self, ticker: &mut Ticker) {
        self.delta_tick = 0;
        self.reference_epoch = None;
        self.last_lost_tick = Some(ticker.last_sample());
        self.clear_windows();
        ticker.set_cycle(ticker.bounds().quick);
    }

    fn clear_windows(&mut self) {
        self.delta_sum = 0;
        self.samples_in_window = 0;
        self.previous_offset = 0;
        self.offset_min = None;
        self.offset_max = None;
        self.min_speed = self.max_adjustment;
        self.max_speed = -self.max_adjustment;
        self.cycles_in_window = 0;
    }

    /// Runs one drift step for a bus that is in PLL with a live reference.
    ///
    /// `local` must already have been stepped for this tick.
    pub fn step(
        &mut self,
        local: &mut Ticker,
        reference: ReferenceSample,
        input: DriftInput,
        params: &DriftParams,
    ) -> DriftOutcome {
        let new_delta = local.count() as i64 - reference.tick.count as i64;

        if self.reference_epoch != Some(reference.epoch) {
            self.reset(local);
            self.reference_epoch = Some(reference.epoch);
            self.delta_tick = new_delta;
            return DriftOutcome::Rebaselined {
                delta_tick: new_delta,
            };
        }

        let lost = new_delta - self.delta_tick;
        self.delta_tick = new_delta;

        if lost != 0 {
            self.lost_ticks += 1;
            self.lost_tick_count += lost.unsigned_abs();
            self.last_lost_tick = Some(local.last_sample());

            if lost.abs() > params.runaway_threshold {
                self.reset(local);
                local.force_count(reference.tick.count);
                self.reference_epoch = Some(reference.epoch);
                return DriftOutcome::Runaway {
                    lost,
                    resync_count: reference.tick.count,
                };
            }
            return DriftOutcome::LostTicks { lost };
        }

        let usec_delta = local.last_sample() - reference.tick.last_sample;
        let count = local.count();
        if params.in_sample_window(count) {
            self.delta_sum += usec_delta;
            self.samples_in_window += 1;
        }

        if count % u64::from(params.sync_cycle) != 0 || self.samples_in_window == 0 {
            return DriftOutcome::Sampled { usec_delta };
        }

        DriftOutcome::Cycle(self.finalize_cycle(local, input, params))
    }

    fn finalize_cycle(
        &mut self,
        local: &mut Ticker,
        input: DriftInput,
        params: &DriftParams,
    ) -> CycleReport {
        let offset = self.delta_sum / self.samples_in_window - params.center_target_us;
        let previous_offset = self.previous_offset;
        let best_speed = midpoint(self.min_speed, self.max_speed);
        let band = params.delta_band_us;

        let mut fix = 0;
        let speed = if offset > 0 && offset < band {
            best_speed - 1
        } else if offset < 0 && offset > -band {
            best_speed + 1
        } else {
            if offset > 0 {
                if offset > previous_offset {
                    fix = -1;
                }
            } else if offset < previous_offset {
                fix = 1;
            }
            input.adjustment + fix
        };
        let speed = params.clamp_speed(speed);

        self.min_speed = self.min_speed.min(speed);
        self.max_speed = self.max_speed.max(speed);
        let offset_min = self.offset_min.map_or(offset, |m| m.min(offset));
        let offset_max = self.offset_max.map_or(offset, |m| m.max(offset));
        self.offset_min = Some(offset_min);
        self.offset_max = Some(offset_max);

        self.offset_range = offset_max - offset_min;
        self.sync_inaccuracy = offset.abs() + self.offset_range / 2;
        self.offset = offset;
        self.computed_speed = speed;

        self.cycles_in_window += 1;
        let narrowed = self.cycles_in_window >= params.converge_cycles;
        if narrowed {
            let best = midpoint(self.min_speed, self.max_speed);
            if self.min_speed < best {
                self.min_speed += 1;
            }
            if self.max_speed > best {
                self.max_speed -= 1;
            }
            self.cycles_in_window = 0;
            self.offset_min = None;
            self.offset_max = None;
        }

        let locked = offset.abs() < band;
        if locked {
            local.set_cycle(local.bounds().slow);
        }

        self.delta_sum = 0;
        self.samples_in_window = 0;
        self.previous_offset = offset;

        CycleReport {
            offset,
            previous_offset,
            best_speed,
            fix,
            speed,
            min_speed: self.min_speed,
            max_speed: self.max_speed,
            sync_inaccuracy: self.sync_inaccuracy,
            offset_range: self.offset_range,
            narrowed,
            locked,
            send_drift: !input.is_syncer && speed != input.adjustment,
        }
    }

    pub fn delta_tick(&self) -> i64 {
        self.delta_tick
    }

    pub fn reference_epoch(&self) -> Option<u64> {
        self.reference_epoch
    }

    pub fn speed_window(&self) -> (i32, i32) {
        (self.min_speed, self.max_speed)
    }

    pub fn pending_samples(&self) -> i64 {
        self.samples_in_window
    }

    /// Returns a diagnostic copy of the tracker state.
    pub fn stats(&self) -> DriftStats {
        DriftStats {
            delta_tick: self.delta_tick,
            lost_ticks: self.lost_ticks,
            lost_tick_count: self.lost_tick_count,
            last_lost_tick: self.last_lost_tick,
            offset: self.offset,
            computed_speed: self.computed_speed,
            min_speed: self.min_speed,
            max_speed: self.max_speed,
            sync_inaccuracy: self.sync_inaccuracy,
            offset_range: self.offset_range,
            reference_epoch: self.reference_epoch,
        }
    }
}

/// Floor of the mean of two speeds.
#[inline]
fn midpoint(a: i32, b: i32) -> i32 {
    (a + b).div_euclid(2)
}
