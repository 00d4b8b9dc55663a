//! # tdm-sync: Multi-Bus Clock Sync Engine
//!
//! This crate keeps every attached TDM bus on one common timing reference.
//! One bus (or an external source) is elected syncer; every other
//! self-ticking bus follows it through a drift-correction loop.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Clock Sync Architecture                          │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                 SyncCoordinator (Main Orchestrator)              │  │
//! │  │                                                                  │  │
//! │  │  Owns the reference, the epoch and the global tick counter      │  │
//! │  │  Driven by bus ticks and firmware acknowledgements               │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │   Election     │  │      Bus       │  │      BusLink           │    │
//! │  │                │  │                │  │                        │    │
//! │  │ Port priority  │  │ Ticker +       │  │ SetMode / SetDrift /   │    │
//! │  │ scan, alarms,  │  │ DriftTracker + │  │ housekeeping to the    │    │
//! │  │ source override│  │ mode state     │  │ firmware               │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                                                                         │
//! │  SYNC MODES (per bus):                                                 │
//! │  • NONE - host-paced by a software timer                               │
//! │  • AB   - bus is the reference                                         │
//! │  • PLL  - bus follows the reference with drift correction              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`coordinator`] - Main `SyncCoordinator` orchestrator
//! - [`bus`] - Per-bus state and locks
//! - [`election`] - Syncer election and sync source override
//! - [`link`] - Outbound firmware seam (`BusLink`)
//! - [`protocol`] - Command and acknowledgement message types
//! - [`config`] - Clock configuration (TOML + env overrides)
//! - [`error`] - Sync error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tdm_core::{BusId, Port, Timestamp};
//! use tdm_sync::{ClockConfig, NoOpLink, SyncCoordinator};
//!
//! let config = ClockConfig::load_or_default(None);
//! let coordinator = SyncCoordinator::new(config, Arc::new(NoOpLink))?;
//!
//! coordinator.attach_bus(BusId(0), vec![Port::new(0, 1)], Timestamp::default())?;
//! coordinator.mark_ready(BusId(0))?;
//!
//! // From the bus interrupt path:
//! coordinator.on_tick(BusId(0), Timestamp::from_micros(1_000), false);
//!
//! println!("Syncer: {}", coordinator.status().syncer);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod bus;
pub mod config;
pub mod coordinator;
pub mod election;
pub mod error;
pub mod link;
pub mod protocol;

// =============================================================================
// Re-exports
// =============================================================================

pub use bus::{Bus, BusState, BusStatus};
pub use config::{ClockConfig, ElectionSettings, OrchestratorSettings, TickerSettings};
pub use coordinator::{SyncCoordinator, SyncStatus, SyncerStatus};
pub use election::{select_syncer, Candidate, Selection, SyncSource};
pub use error::{SyncError, SyncResult};
pub use link::{BusLink, ChannelLink, LinkQueues, NoOpLink};
pub use protocol::{BusCommand, FirmwareAck};
