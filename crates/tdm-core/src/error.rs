//! # Error Types
//!
//! Domain-specific error types for tdm-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  tdm-core errors (this file)                                           │
//! │  ├── CoreError        - Malformed domain values                        │
//! │  └── ValidationError  - Out-of-range tuning parameters                 │
//! │                                                                         │
//! │  tdm-sync errors (separate crate)                                      │
//! │  └── SyncError        - Config and topology failures                   │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → SyncError → host                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## What Is NOT an Error
//! Measurement noise, lost ticks, runaway resets and "no syncer anywhere" are
//! normal operating conditions of the control loop. They are reported through
//! `DriftOutcome` and diagnostics, never through these types.

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core domain errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Firmware reported a sync mode code we do not know.
    #[error("Unknown sync mode code: 0x{0:02X}")]
    InvalidSyncMode(u8),

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Tuning parameter validation errors.
///
/// These occur when a configuration would make the control loop meaningless
/// (e.g. a sample window longer than the cycle it samples).
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A parameter must be strictly positive.
    #[error("{field} must be greater than 0")]
    NotPositive { field: String },

    /// Two parameters are in the wrong order.
    #[error("{lesser} ({lesser_value}) must not exceed {greater} ({greater_value})")]
    Ordering {
        lesser: String,
        lesser_value: i64,
        greater: String,
        greater_value: i64,
    },

    /// A parameter exceeds what the firmware accepts.
    #[error("{field} exceeds hardware limit {max}")]
    TooLarge { field: String, max: i64 },
}
