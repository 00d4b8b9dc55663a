//! # Validation Module
//!
//! Sanity checks for control-loop tuning.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: TOML / env (tdm-sync config)                                 │
//! │  ├── Type validation (deserialization)                                 │
//! │  └── Unknown numeric strings rejected at parse                         │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE                                                  │
//! │  ├── Positive cycles and windows                                       │
//! │  ├── Window fits inside its cycle                                      │
//! │  └── Correction limit fits the firmware's signed byte                  │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Runtime clamping                                             │
//! │  ├── Ticker cycle clamped into [quick, slow]                           │
//! │  └── Every speed clamped into [-max_adjustment, +max_adjustment]       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use tdm_core::drift::DriftParams;
//! use tdm_core::validation::validate_drift_params;
//!
//! assert!(validate_drift_params(&DriftParams::default()).is_ok());
//!
//! let broken = DriftParams { sample_window: 600, ..DriftParams::default() };
//! assert!(validate_drift_params(&broken).is_err());
//! ```

use crate::drift::DriftParams;
use crate::error::ValidationError;
use crate::ticker::CycleBounds;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Largest correction the firmware can carry (one signed byte).
pub const MAX_HARDWARE_ADJUSTMENT: i32 = i8::MAX as i32;

// =============================================================================
// Helpers
// =============================================================================

fn positive(field: &str, value: i64) -> ValidationResult<()> {
    if value <= 0 {
        return Err(ValidationError::NotPositive {
            field: field.to_string(),
        });
    }
    Ok(())
}

fn ordered(lesser: &str, lesser_value: i64, greater: &str, greater_value: i64) -> ValidationResult<()> {
    if lesser_value > greater_value {
        return Err(ValidationError::Ordering {
            lesser: lesser.to_string(),
            lesser_value,
            greater: greater.to_string(),
            greater_value,
        });
    }
    Ok(())
}

// =============================================================================
// Validators
// =============================================================================

/// Validates ticker sampling cycle bounds.
///
/// ## Rules
/// - `quick` and `slow` must be positive
/// - `quick` must not exceed `slow`
pub fn validate_cycle_bounds(bounds: &CycleBounds) -> ValidationResult<()> {
    positive("ticker.quick_cycle", i64::from(bounds.quick))?;
    positive("ticker.slow_cycle", i64::from(bounds.slow))?;
    ordered(
        "ticker.quick_cycle",
        i64::from(bounds.quick),
        "ticker.slow_cycle",
        i64::from(bounds.slow),
    )
}

/// Validates drift control-loop parameters.
///
/// ## Rules
/// - `sync_cycle`, `sample_window`, `converge_cycles` must be positive
/// - `sample_window` must not exceed `sync_cycle`
/// - `delta_band_us` and `runaway_threshold` must be positive
/// - `max_adjustment` must be positive and fit the firmware's signed byte
pub fn validate_drift_params(params: &DriftParams) -> ValidationResult<()> {
    positive("drift.sync_cycle", i64::from(params.sync_cycle))?;
    positive("drift.sample_window", i64::from(params.sample_window))?;
    ordered(
        "drift.sample_window",
        i64::from(params.sample_window),
        "drift.sync_cycle",
        i64::from(params.sync_cycle),
    )?;
    positive("drift.converge_cycles", i64::from(params.converge_cycles))?;
    positive("drift.delta_band_us", params.delta_band_us)?;
    positive("drift.runaway_threshold", params.runaway_threshold)?;
    positive("drift.max_adjustment", i64::from(params.max_adjustment))?;

    if params.max_adjustment > MAX_HARDWARE_ADJUSTMENT {
        return Err(ValidationError::TooLarge {
            field: "drift.max_adjustment".to_string(),
            max: i64::from(MAX_HARDWARE_ADJUSTMENT),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate_cycle_bounds(&CycleBounds::default()).is_ok());
        assert!(validate_drift_params(&DriftParams::default()).is_ok());
    }

    #[test]
    fn test_cycle_bounds() {
        let inverted = CycleBounds { quick: 500, slow: 100 };
        assert!(matches!(
            validate_cycle_bounds(&inverted),
            Err(ValidationError::Ordering { .. })
        ));

        let zero = CycleBounds { quick: 0, slow: 100 };
        assert!(matches!(
            validate_cycle_bounds(&zero),
            Err(ValidationError::NotPositive { .. })
        ));
    }

    #[test]
    fn test_window_must_fit_cycle() {
        let params = DriftParams {
            sync_cycle: 50,
            sample_window: 51,
            ..DriftParams::default()
        };
        let err = validate_drift_params(&params).unwrap_err();
        assert!(err.to_string().contains("drift.sample_window (51)"));

        let params = DriftParams {
            sync_cycle: 50,
            sample_window: 50,
            ..DriftParams::default()
        };
        assert!(validate_drift_params(&params).is_ok());
    }

    #[test]
    fn test_max_adjustment_limits() {
        let params = DriftParams {
            max_adjustment: 0,
            ..DriftParams::default()
        };
        assert!(validate_drift_params(&params).is_err());

        let params = DriftParams {
            max_adjustment: 128,
            ..DriftParams::default()
        };
        assert!(matches!(
            validate_drift_params(&params),
            Err(ValidationError::TooLarge { max: 127, .. })
        ));
    }
}
