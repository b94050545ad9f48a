//! Core data model shared by every stage of the analysis pipeline.
//!
//! - `config`: the immutable run description parsed from the header file
//! - `particle`: recorded per-particle state and 2D vector helpers
//! - `event`: tagged records of the event log

pub mod config;
pub mod event;
pub mod particle;

pub use config::{DeclaredCounts, DomainKind, ObstacleKind, RunConfig};
pub use event::{CollisionPayload, EventKind, EventRecord};
pub use particle::ParticleState;
