//! # Timestamp Module
//!
//! Provides the `Timestamp` type for tick arrival times.
//!
//! ## Why Integer Microseconds?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE DURATION PROBLEM                                                   │
//! │                                                                         │
//! │  std::time::Duration is unsigned:                                       │
//! │    follower.last_sample - reference.last_sample  → may be NEGATIVE      │
//! │                                                                         │
//! │  Floating point seconds drift after hours of 1000 ticks/s:              │
//! │    3600.0 + 0.001 - 3600.0 = 0.0009999999999763531  ❌                  │
//! │                                                                         │
//! │  OUR SOLUTION: signed i64 microseconds                                  │
//! │    Subtraction is exact and signed, good for ~292k years                │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use tdm_core::timestamp::Timestamp;
//!
//! let first = Timestamp::from_micros(1_000);
//! let later = first + 1_000;
//!
//! assert_eq!(later.micros_since(first), 1_000);
//! assert_eq!(first.micros_since(later), -1_000);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub};

// =============================================================================
// Timestamp Type
// =============================================================================

/// A monotonic instant, in microseconds from an arbitrary host-chosen epoch.
///
/// Only differences between timestamps are meaningful. The host converts its
/// own clock (ktime, `Instant`, a virtual simulation clock) at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp from microseconds.
    #[inline]
    pub const fn from_micros(micros: i64) -> Self {
        Timestamp(micros)
    }

    /// Creates a timestamp from whole milliseconds.
    #[inline]
    pub const fn from_millis(millis: i64) -> Self {
        Timestamp(millis * 1_000)
    }

    /// Returns the raw microsecond value.
    #[inline]
    pub const fn as_micros(&self) -> i64 {
        self.0
    }

    /// Signed microseconds elapsed from `earlier` to `self`.
    ///
    /// Negative when `earlier` is actually later.
    #[inline]
    pub const fn micros_since(&self, earlier: Timestamp) -> i64 {
        self.0 - earlier.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}s", self.0.div_euclid(1_000_000), self.0.rem_euclid(1_000_000))
    }
}

// =============================================================================
// Arithmetic Operations
// =============================================================================

impl Add<i64> for Timestamp {
    type Output = Self;

    #[inline]
    fn add(self, micros: i64) -> Self {
        Timestamp(self.0 + micros)
    }
}

impl AddAssign<i64> for Timestamp {
    #[inline]
    fn add_assign(&mut self, micros: i64) {
        self.0 += micros;
    }
}

impl Sub for Timestamp {
    type Output = i64;

    #[inline]
    fn sub(self, other: Self) -> i64 {
        self.micros_since(other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_difference() {
        let a = Timestamp::from_micros(10_500);
        let b = Timestamp::from_millis(10);
        assert_eq!(a - b, 500);
        assert_eq!(b - a, -500);
    }

    #[test]
    fn test_display() {
        assert_eq!(Timestamp::from_micros(1_000_250).to_string(), "1.000250s");
    }

    #[test]
    fn test_add_assign() {
        let mut t = Timestamp::default();
        t += 1_000;
        t += 1_000;
        assert_eq!(t.as_micros(), 2_000);
    }
}
