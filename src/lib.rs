//! Post-processing and sweep orchestration for an external event-driven molecular dynamics
//! simulator.
//!
//! A run leaves a header (`static.txt`) plus either a full trajectory dump or an event log
//! with periodic snapshots. This crate parses those files, turns them into classified
//! collisions, derives observables (collision counts, temperature, pressure, mean-squared
//! displacement) and aggregates them across a parameter sweep whose simulator jobs it also
//! launches.
//!
//! With the `python` feature the analysis entry points are exposed as a Python module.

pub mod aggregate;
pub mod classify;
pub mod core;
pub mod error;
pub mod harness;
pub mod logging;
pub mod observables;
pub mod settings;
pub mod stream;

#[cfg(feature = "python")]
mod python;

pub use aggregate::{aggregate, AggregatedResult, SweepReport};
pub use classify::{ClassifiedCollision, CollisionClass, CollisionSource};
pub use error::{Error, Result};
pub use harness::{
    run_sweep, Harness, JobOutcome, JobResult, JobSpec, ProcessLauncher, SimulatorLauncher,
};
pub use observables::ObservableSet;
pub use settings::{AnalysisConfig, SweepConfig};
pub use stream::JobOutput;
