//! # tdm-core: Pure Clock Arithmetic for TDM Bus Sync
//!
//! This crate is the **heart** of the sync engine. It holds the tick counting
//! and drift control math as plain data and pure functions, with no I/O and
//! no locks.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        TDM Sync Architecture                            │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │              Host (driver glue / tdm-sim)                       │   │
//! │  │    tick interrupts ──► firmware acks ──► topology changes       │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                tdm-sync (coordinator, locks)                    │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ tdm-core (THIS CRATE) ★                         │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │ timestamp │  │  ticker   │  │   drift   │  │   │
//! │  │   │  BusId    │  │ Timestamp │  │  Ticker   │  │  Tracker  │  │   │
//! │  │   │ SyncMode  │  │  (i64 µs) │  │  period   │  │  speed    │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO LOCKS • NO CLOCK READS • PURE FUNCTIONS          │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (BusId, SyncMode, Port, PortAlarms)
//! - [`timestamp`] - Signed microsecond timestamps
//! - [`ticker`] - Tick counter and smoothed period
//! - [`drift`] - Drift measurement and speed correction
//! - [`error`] - Domain error types
//! - [`validation`] - Tuning parameter validation
//!
//! ## Example Usage
//!
//! ```rust
//! use tdm_core::{CycleBounds, Ticker, Timestamp};
//!
//! let mut ticker = Ticker::new(Timestamp::default(), CycleBounds { quick: 4, slow: 40 });
//! for ms in 1..=3 {
//!     ticker.step(Timestamp::from_millis(ms));
//! }
//! assert_eq!(ticker.count(), 3);
//! assert_eq!(ticker.tick_period(), 750);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod drift;
pub mod error;
pub mod ticker;
pub mod timestamp;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use drift::{
    CycleReport, DriftInput, DriftOutcome, DriftParams, DriftStats, DriftTracker, ReferenceSample,
};
pub use error::{CoreError, ValidationError};
pub use ticker::{CycleBounds, TickSample, Ticker};
pub use timestamp::Timestamp;
pub use types::*;
