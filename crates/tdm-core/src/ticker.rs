//! # Ticker
//!
//! Converts a stream of tick timestamps into a smoothed tick period.
//!
//! ## Sampling Cycle
//! ```text
//! count:  0    1    2   ...  cycle-2  cycle-1  cycle  ...  2·cycle-1
//!         │    │    │           │        │                    │
//!         ▼    ▼    ▼           ▼        ▼                    ▼
//!       first                        recompute             recompute
//!       sample                    tick_period =          tick_period
//!                            (last - first) / cycle
//!                                 first ← last
//! ```
//!
//! A short cycle (`quick`) reacts fast after a reset; a long cycle (`slow`)
//! averages out USB micro-frame jitter once the bus is locked.
//!
//! The ticker itself is plain data. Whoever shares it (the engine's bus)
//! wraps it in a lock and hands out [`TickSample`] copies to readers.

use serde::{Deserialize, Serialize};

use crate::timestamp::Timestamp;

/// Default short sampling cycle, in ticks.
pub const DEFAULT_QUICK_CYCLE: u32 = 1_000;

/// Default long sampling cycle, in ticks.
pub const DEFAULT_SLOW_CYCLE: u32 = 10_000;

// =============================================================================
// Cycle Bounds
// =============================================================================

/// Allowed range for a ticker's sampling cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleBounds {
    /// Shortest cycle; also the cycle a fresh ticker starts with.
    pub quick: u32,
    /// Longest cycle.
    pub slow: u32,
}

impl Default for CycleBounds {
    fn default() -> Self {
        CycleBounds {
            quick: DEFAULT_QUICK_CYCLE,
            slow: DEFAULT_SLOW_CYCLE,
        }
    }
}

impl CycleBounds {
    /// Clamps `cycle` into `[quick, slow]`, and never below 1.
    pub fn clamp(&self, cycle: u32) -> u32 {
        cycle.max(self.quick).min(self.slow.max(self.quick)).max(1)
    }
}

// =============================================================================
// Tick Sample
// =============================================================================

/// Point-in-time copy of the fields other buses compare against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TickSample {
    /// Ticks seen so far.
    pub count: u64,
    /// Timestamp of the most recent tick.
    pub last_sample: Timestamp,
    /// Smoothed microseconds per tick (0 until the first cycle completes).
    pub tick_period: i64,
}

// =============================================================================
// Ticker
// =============================================================================

/// Tick counter with a periodically recomputed rate estimate.
#[derive(Debug, Clone)]
pub struct Ticker {
    count: u64,
    cycle: u32,
    bounds: CycleBounds,
    first_sample: Timestamp,
    last_sample: Timestamp,
    tick_period: i64,
}

impl Ticker {
    /// Creates a ticker whose first sampling cycle starts at `now`.
    pub fn new(now: Timestamp, bounds: CycleBounds) -> Self {
        Ticker {
            count: 0,
            cycle: bounds.clamp(bounds.quick),
            bounds,
            first_sample: now,
            last_sample: now,
            tick_period: 0,
        }
    }

    /// Records one tick. Returns true when this tick closed a sampling cycle
    /// and `tick_period` was recomputed.
    pub fn step(&mut self, timestamp: Timestamp) -> bool {
        self.last_sample = timestamp;
        self.count += 1;

        let cycle = u64::from(self.cycle);
        if self.count % cycle == cycle - 1 {
            let elapsed = self.last_sample - self.first_sample;
            self.tick_period = elapsed / i64::from(self.cycle);
            self.first_sample = self.last_sample;
            true
        } else {
            false
        }
    }

    /// Sets the sampling cycle, silently clamped into the configured bounds.
    pub fn set_cycle(&mut self, cycle: u32) {
        self.cycle = self.bounds.clamp(cycle);
    }

    /// Overwrites the tick count (used to re-align with the reference after a
    /// runaway loss).
    pub fn force_count(&mut self, count: u64) {
        self.count = count;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn cycle(&self) -> u32 {
        self.cycle
    }

    pub fn bounds(&self) -> CycleBounds {
        self.bounds
    }

    pub fn last_sample(&self) -> Timestamp {
        self.last_sample
    }

    pub fn tick_period(&self) -> i64 {
        self.tick_period
    }

    /// Returns a consistent copy of `{count, last_sample, tick_period}`.
    pub fn snapshot(&self) -> TickSample {
        TickSample {
            count: self.count,
            last_sample: self.last_sample,
            tick_period: self.tick_period,
        }
    }
}
