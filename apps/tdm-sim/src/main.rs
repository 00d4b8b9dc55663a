//! # tdm-sim
//!
//! Runs a multi-bus clock sync scenario in virtual time and prints the final
//! engine status as JSON.
//!
//! ## Usage
//! ```text
//! tdm-sim [scenario.json]
//!
//!   RUST_LOG=debug            show drift cycles and firmware acks
//!   TDM_CLOCK_CONFIG=path     clock.toml to load instead of the default
//!   TDM_SYNC_CYCLE=250 ...    clock config environment overrides
//! ```

mod firmware;
mod scenario;
mod sim;

use std::path::PathBuf;

use tdm_sync::ClockConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::scenario::{Scenario, SimResult};
use crate::sim::Simulation;

fn main() {
    init_tracing();

    if let Err(e) = run() {
        tracing::error!(error = %e, "Simulation failed");
        std::process::exit(1);
    }
}

fn run() -> SimResult<()> {
    let config_path = std::env::var("TDM_CLOCK_CONFIG").ok().map(PathBuf::from);
    let config = ClockConfig::load_or_default(config_path);

    let scenario = match std::env::args().nth(1) {
        Some(path) => {
            info!(%path, "Loading scenario");
            Scenario::load(&PathBuf::from(path))?
        }
        None => Scenario::default(),
    };
    info!(
        buses = scenario.buses.len(),
        events = scenario.events.len(),
        duration_ms = scenario.duration_ms,
        "Scenario ready"
    );

    let report = Simulation::new(config, &scenario)?.run();
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Initializes the tracing subscriber for structured logging.
///
/// ## Log Levels
/// - `RUST_LOG=debug` - Show debug messages
/// - `RUST_LOG=tdm_sync=trace` - Show trace for the engine only
/// - Default: INFO level
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
