//! Readers for the files a simulator run leaves in its output directory.
//!
//! Two schemas exist side by side:
//! - legacy: `static.txt` + `dynamic.txt` (one full-state frame per event)
//! - event stream: `static.txt` + `events.txt` (tagged records) + `snapshots.txt` (coarse frames)

pub mod events;
pub mod frames;

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::core::RunConfig;
use crate::error::{Error, Result};

pub use events::EventLog;
pub use frames::{Frame, TrajectoryFrames};

pub const HEADER_FILE: &str = "static.txt";
pub const TRAJECTORY_FILE: &str = "dynamic.txt";
pub const EVENTS_FILE: &str = "events.txt";
pub const SNAPSHOTS_FILE: &str = "snapshots.txt";

/// Upper bound on values reserved up front from a header's declared counts. Storage past this
/// grows on demand, so a corrupt count costs a mismatch error instead of an allocation failure.
pub(crate) const MAX_RESERVED_VALUES: usize = 1 << 20;

/// Capacity to reserve for `declared` records of `width` values each.
pub(crate) fn reserve_hint(declared: usize, width: usize) -> usize {
    declared
        .checked_mul(width)
        .unwrap_or(usize::MAX)
        .min(MAX_RESERVED_VALUES)
}

/// Record streams of one run, by schema.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordStreams {
    /// Legacy full-trajectory dump.
    Trajectory(TrajectoryFrames),
    /// Explicit event log plus periodic snapshots.
    Events {
        events: EventLog,
        snapshots: TrajectoryFrames,
    },
}

impl RecordStreams {
    /// Full-state frames available for this run (trajectory frames or snapshots).
    pub fn frames(&self) -> &TrajectoryFrames {
        match self {
            RecordStreams::Trajectory(frames) => frames,
            RecordStreams::Events { snapshots, .. } => snapshots,
        }
    }

    fn schema_name(&self) -> &'static str {
        match self {
            RecordStreams::Trajectory(_) => "trajectory",
            RecordStreams::Events { .. } => "events",
        }
    }
}

/// Everything parsed from a single job's output directory.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutput {
    pub config: RunConfig,
    pub streams: RecordStreams,
}

impl JobOutput {
    /// Parse the header and discover which record schema the directory holds.
    pub fn open(dir: &Path) -> Result<Self> {
        let header_path = dir.join(HEADER_FILE);
        if !header_path.exists() {
            return Err(Error::MissingOutput(header_path));
        }
        let config = RunConfig::parse_header(&fs::read_to_string(&header_path)?)?;

        let events_path = dir.join(EVENTS_FILE);
        let streams = if events_path.exists() {
            let Some(snapshot_count) = config.counts.snapshots else {
                return Err(Error::MalformedHeader {
                    line: 0,
                    reason: "event-stream output requires a declared snapshot count".into(),
                });
            };
            let events =
                EventLog::from_path(&events_path, config.particle_count, config.counts.events)?;
            let snapshots = TrajectoryFrames::from_path(
                &dir.join(SNAPSHOTS_FILE),
                SNAPSHOTS_FILE,
                config.particle_count,
                snapshot_count,
            )?;
            RecordStreams::Events { events, snapshots }
        } else {
            RecordStreams::Trajectory(TrajectoryFrames::from_path(
                &dir.join(TRAJECTORY_FILE),
                TRAJECTORY_FILE,
                config.particle_count,
                config.counts.events,
            )?)
        };

        debug!(dir = %dir.display(), schema = streams.schema_name(), "opened job output");
        Ok(Self { config, streams })
    }
}
