//! Hazard Analysis Sync Simulator
//!
//! Randomized multi-window runs against the synchronization layer.
//!
//! # Core Concepts
//!
//! - [`SimulatorConfig`]: Seed, window count, operation count and delivery
//!   mode
//! - [`run_simulator`]: Generates and executes operations, checking
//!   convergence, session restore and late-join sync
//! - [`SimulatorReport`]: Statistics, violations and final digests, as text
//!   or JSON
//!
//! # Example
//!
//! ```rust,ignore
//! use hazard_sim::{run_simulator, SimulatorConfig};
//!
//! let report = run_simulator(SimulatorConfig { seed: 7, ..Default::default() })?;
//! assert!(report.passed());
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod simulator;

pub use simulator::{
    run_simulator, SimulatedOperation, SimulationError, SimulatorConfig, SimulatorReport,
    SimulatorStats, Violation,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
