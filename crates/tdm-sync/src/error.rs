//! # Sync Error Types
//!
//! Error types for administrative sync operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │    Topology     │  │       Core              │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  BusAlready...  │  │  CoreError (#[from])    │ │
//! │  │  ConfigLoad...  │  │  UnknownBus     │  │                         │ │
//! │  │  ConfigSave...  │  │  UnknownPort    │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  Tick, ack and topology-change notifications never return errors:      │
//! │  late or stale events are logged and dropped.                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use tdm_core::{BusId, CoreError, ValidationError};
use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering administrative failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid clock configuration.
    #[error("Invalid clock configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Topology Errors
    // =========================================================================
    /// A bus with this id is still attached.
    #[error("{0} is already attached")]
    BusAlreadyAttached(BusId),

    /// No live bus with this id.
    #[error("Unknown bus: {0}")]
    UnknownBus(BusId),

    /// The bus exists but has no such port.
    #[error("{bus} has no port {index}")]
    UnknownPort { bus: BusId, index: usize },

    // =========================================================================
    // Core Errors
    // =========================================================================
    /// Error raised by tdm-core.
    #[error(transparent)]
    Core(#[from] CoreError),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<ValidationError> for SyncError {
    fn from(err: ValidationError) -> Self {
        SyncError::InvalidConfig(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl SyncError {
    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_) | SyncError::ConfigLoadFailed(_) | SyncError::ConfigSaveFailed(_)
        )
    }

    /// Returns true if this error came from addressing a bus or port that is
    /// not (or no longer) attached. Callers racing a hot-unplug can ignore it.
    pub fn is_topology_error(&self) -> bool {
        matches!(
            self,
            SyncError::BusAlreadyAttached(_) | SyncError::UnknownBus(_) | SyncError::UnknownPort { .. }
        )
    }
}
