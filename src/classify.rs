//! Turning recorded state into typed collision events.
//!
//! Two sources implement [`CollisionSource`]:
//! - [`TrajectoryDeltas`] detects collisions from velocity changes between consecutive frames of
//!   the legacy trajectory dump and classifies them geometrically.
//! - [`TaggedEvents`] trusts the simulator's own `O`/`W` tags, optionally re-verifying them
//!   against the geometry.
//!
//! Both yield [`ClassifiedCollision`]s in time order, so the observable engine is written once.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::core::particle::{norm, sub, unit_from, DIM};
use crate::core::{EventKind, RunConfig};
use crate::stream::{EventLog, JobOutput, RecordStreams, TrajectoryFrames};

/// Contact tolerance used when classifying trajectory-delta candidates.
pub const TRAJECTORY_EPS: f64 = 1e-5;

/// Contact tolerance used when re-verifying tagged records geometrically.
pub const TAGGED_EPS: f64 = 1e-6;

/// Which boundary a collision happened against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionClass {
    Obstacle,
    Wall,
    /// Neither boundary within tolerance. Never emitted by a source.
    Ambiguous,
}

/// A detected collision with the kinematics the pressure computation needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassifiedCollision {
    pub time: f64,
    pub participant_id: usize,
    pub class: CollisionClass,
    /// Contact position of the participant.
    pub position: [f64; DIM],
    /// Participant velocity just before the collision.
    pub velocity_before: [f64; DIM],
    /// Outward unit normal of the boundary that was hit, taken from its center through the
    /// contact position.
    pub normal: [f64; DIM],
}

/// Anything that can produce classified collisions for a run.
pub trait CollisionSource {
    /// Obstacle and wall collisions in time order. Ambiguous candidates are dropped.
    fn collisions(&self) -> Vec<ClassifiedCollision>;
}

/// Classify a contact position against the obstacle (centered at `obstacle_center`) and the
/// domain wall with a fixed tolerance `eps`.
pub fn classify_position(
    config: &RunConfig,
    position: [f64; DIM],
    obstacle_center: [f64; DIM],
    eps: f64,
) -> CollisionClass {
    let d = norm(&sub(&position, &obstacle_center));
    if (d - (config.obstacle.radius() + config.particle_radius)).abs() <= eps {
        return CollisionClass::Obstacle;
    }
    if config.domain.wall_gap(position, config.particle_radius).abs() <= eps {
        return CollisionClass::Wall;
    }
    CollisionClass::Ambiguous
}

fn boundary_normal(
    config: &RunConfig,
    class: CollisionClass,
    position: [f64; DIM],
    obstacle_center: [f64; DIM],
) -> Option<[f64; DIM]> {
    match class {
        CollisionClass::Obstacle => unit_from(&obstacle_center, &position),
        CollisionClass::Wall => config.domain.wall_normal(position),
        CollisionClass::Ambiguous => None,
    }
}

/// Pick the source matching the schema of a parsed job output.
pub fn source_for<'a>(
    output: &'a JobOutput,
    verify_tags: bool,
) -> Box<dyn CollisionSource + 'a> {
    let config = &output.config;
    match &output.streams {
        RecordStreams::Trajectory(frames) => Box::new(TrajectoryDeltas::new(config, frames)),
        RecordStreams::Events { events, snapshots } => {
            let source = TaggedEvents::new(config, events).with_snapshots(snapshots);
            if verify_tags {
                Box::new(source.verified())
            } else {
                Box::new(source)
            }
        }
    }
}

/// Velocity-discontinuity detection over consecutive trajectory frames.
///
/// A participant collided between two frames iff its stored velocity differs (exact float
/// comparison). Transitions where zero or several participants changed are discarded, since a
/// single participant cannot be attributed.
#[derive(Debug, Clone, Copy)]
pub struct TrajectoryDeltas<'a> {
    config: &'a RunConfig,
    frames: &'a TrajectoryFrames,
    eps: f64,
}

impl<'a> TrajectoryDeltas<'a> {
    pub fn new(config: &'a RunConfig, frames: &'a TrajectoryFrames) -> Self {
        Self {
            config,
            frames,
            eps: TRAJECTORY_EPS,
        }
    }

    pub fn with_tolerance(mut self, eps: f64) -> Self {
        self.eps = eps;
        self
    }
}

impl CollisionSource for TrajectoryDeltas<'_> {
    fn collisions(&self) -> Vec<ClassifiedCollision> {
        let obstacle_row = self.config.obstacle_row();
        let mut out = Vec::new();
        let mut discarded = 0usize;

        for i in 1..self.frames.len() {
            let (Some(before), Some(after)) = (self.frames.frame(i - 1), self.frames.frame(i))
            else {
                continue;
            };

            let mut changed: Option<usize> = None;
            let mut n_changed = 0usize;
            for p in 0..before.len() {
                if Some(p) == obstacle_row {
                    continue;
                }
                if before.state(p).v != after.state(p).v {
                    n_changed += 1;
                    changed = Some(p);
                    if n_changed > 1 {
                        break;
                    }
                }
            }
            let Some(p) = changed.filter(|_| n_changed == 1) else {
                continue;
            };

            let state = after.state(p);
            let obstacle_center = match obstacle_row {
                Some(row) => after.state(row).r,
                None => self.config.domain.center(),
            };
            let class = classify_position(self.config, state.r, obstacle_center, self.eps);
            let Some(normal) = boundary_normal(self.config, class, state.r, obstacle_center) else {
                discarded += 1;
                continue;
            };
            out.push(ClassifiedCollision {
                time: after.time,
                participant_id: p,
                class,
                position: state.r,
                velocity_before: before.state(p).v,
                normal,
            });
        }

        trace!(kept = out.len(), discarded, "trajectory-delta classification");
        out
    }
}

/// Direct classification from the simulator's event tags.
///
/// A fixed obstacle sits at the domain center. A free obstacle is located from the snapshot
/// nearest in time to each event when snapshots are attached; without them it is assumed to be
/// at the domain center, which only holds while it has not drifted.
#[derive(Debug, Clone, Copy)]
pub struct TaggedEvents<'a> {
    config: &'a RunConfig,
    events: &'a EventLog,
    snapshots: Option<&'a TrajectoryFrames>,
    verify: Option<f64>,
}

impl<'a> TaggedEvents<'a> {
    pub fn new(config: &'a RunConfig, events: &'a EventLog) -> Self {
        Self {
            config,
            events,
            snapshots: None,
            verify: None,
        }
    }

    /// Track a free obstacle through the run's snapshots.
    pub fn with_snapshots(mut self, snapshots: &'a TrajectoryFrames) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    /// Keep only tagged collisions whose payload position agrees with the tag within
    /// [`TAGGED_EPS`].
    pub fn verified(self) -> Self {
        self.with_geometric_check(TAGGED_EPS)
    }

    pub fn with_geometric_check(mut self, eps: f64) -> Self {
        self.verify = Some(eps);
        self
    }

    fn obstacle_center(&self, time: f64) -> [f64; DIM] {
        let tracked = self.config.obstacle_row().and_then(|row| {
            let snapshots = self.snapshots?;
            let frame = snapshots.frame(snapshots.nearest_index(time)?)?;
            (row < frame.len()).then(|| frame.state(row).r)
        });
        tracked.unwrap_or_else(|| self.config.domain.center())
    }
}

impl CollisionSource for TaggedEvents<'_> {
    fn collisions(&self) -> Vec<ClassifiedCollision> {
        let mut out = Vec::new();
        let mut discarded = 0usize;

        for event in self.events.iter() {
            let class = match event.kind {
                EventKind::ObstacleCollision => CollisionClass::Obstacle,
                EventKind::WallCollision => CollisionClass::Wall,
                EventKind::Other(_) => continue,
            };
            let Some(payload) = event.payload else {
                continue;
            };
            let center = self.obstacle_center(event.time_f64());
            if let Some(eps) = self.verify {
                if classify_position(self.config, payload.position, center, eps) != class {
                    discarded += 1;
                    continue;
                }
            }
            let Some(normal) = boundary_normal(self.config, class, payload.position, center) else {
                discarded += 1;
                continue;
            };
            out.push(ClassifiedCollision {
                time: event.time_f64(),
                participant_id: event.participant_id,
                class,
                position: payload.position,
                velocity_before: payload.velocity_before,
                normal,
            });
        }

        trace!(kept = out.len(), discarded, "tagged-event classification");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CollisionPayload, DeclaredCounts, DomainKind, EventRecord, ObstacleKind};
    use crate::error::Result;
    use std::io::Cursor;

    fn config(particle_count: usize, frames: usize, obstacle: ObstacleKind) -> RunConfig {
        RunConfig {
            particle_count,
            particle_radius: 0.1,
            particle_mass: 1.0,
            initial_speed: 1.0,
            domain: DomainKind::Circular { radius: 1.0 },
            obstacle,
            counts: DeclaredCounts {
                events: frames,
                snapshots: None,
            },
        }
    }

    #[test]
    fn geometric_classification() {
        let cfg = config(1, 1, ObstacleKind::Fixed { radius: 0.2 });
        let c = [0.0, 0.0];
        assert_eq!(
            classify_position(&cfg, [0.3, 0.0], c, TRAJECTORY_EPS),
            CollisionClass::Obstacle
        );
        assert_eq!(
            classify_position(&cfg, [0.0, -0.9], c, TRAJECTORY_EPS),
            CollisionClass::Wall
        );
        assert_eq!(
            classify_position(&cfg, [0.5, 0.5], c, TRAJECTORY_EPS),
            CollisionClass::Ambiguous
        );
        // Within the trajectory tolerance but outside the tagged one.
        assert_eq!(
            classify_position(&cfg, [0.300005, 0.0], c, TRAJECTORY_EPS),
            CollisionClass::Obstacle
        );
        assert_eq!(
            classify_position(&cfg, [0.300005, 0.0], c, TAGGED_EPS),
            CollisionClass::Ambiguous
        );
    }

    #[test]
    fn deltas_detect_single_changes_only() -> Result<()> {
        let text = "\
0.0
0.5 0 -1 0
0 -0.5 0 1
0.2
0.3 0 1 0
0 -0.3 0 1
0.3
0.4 0 -1 0
0 -0.2 0 -1
0.4
0.3 0 -1 0
0 -0.1 0 -1
1.2
0.3 0 -1 0
0 0.9 0 -1
1.5
0.5 0.5 1 1
0 0.9 0 -1
";
        let cfg = config(2, 6, ObstacleKind::Fixed { radius: 0.2 });
        let frames = TrajectoryFrames::parse(Cursor::new(text), "dynamic.txt", 2, 6)?;
        let found = TrajectoryDeltas::new(&cfg, &frames).collisions();

        // t=0.2: p0 bounces off the obstacle; t=0.3: both change (discarded);
        // t=0.4 and t=1.2: no velocity changes; t=1.5: p0 changes away from both
        // boundaries (ambiguous).
        assert_eq!(found.len(), 1);
        let c = found[0];
        assert_eq!(c.class, CollisionClass::Obstacle);
        assert_eq!(c.participant_id, 0);
        assert!((c.time - 0.2).abs() < 1e-12);
        assert_eq!(c.velocity_before, [-1.0, 0.0]);
        assert!((c.normal[0] - 1.0).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn deltas_detect_wall_hits() -> Result<()> {
        let text = "0.0\n0 0.5 0 1\n0.4\n0 0.9 0 -1\n";
        let cfg = config(1, 2, ObstacleKind::Fixed { radius: 0.2 });
        let frames = TrajectoryFrames::parse(Cursor::new(text), "dynamic.txt", 1, 2)?;
        let found = TrajectoryDeltas::new(&cfg, &frames).collisions();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].class, CollisionClass::Wall);
        assert_eq!(found[0].velocity_before, [0.0, 1.0]);
        assert!((found[0].normal[1] - 1.0).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn free_obstacle_row_is_ignored_and_tracked() -> Result<()> {
        // Row 1 is the free obstacle (radius 0.2), sitting at (0.1, 0) in the second frame.
        let text = "0.0\n0.6 0 -1 0\n0 0 0 0\n0.3\n0.4 0 1 0\n0.1 0 -0.1 0\n";
        let cfg = config(
            2,
            2,
            ObstacleKind::Free {
                radius: 0.2,
                mass: 3.0,
            },
        );
        let frames = TrajectoryFrames::parse(Cursor::new(text), "dynamic.txt", 2, 2)?;
        let found = TrajectoryDeltas::new(&cfg, &frames).collisions();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].class, CollisionClass::Obstacle);
        assert_eq!(found[0].participant_id, 0);
        Ok(())
    }

    #[test]
    fn tagged_events_trust_tags_unless_verified() -> Result<()> {
        let cfg = config(2, 2, ObstacleKind::Fixed { radius: 0.2 });
        let off_surface = CollisionPayload::from_values(&[0.35, 0.0, -1.0, 0.0, 1.0, 0.0]);
        let wall = CollisionPayload::from_values(&[0.0, 0.9, 0.0, 1.0, 0.0, -1.0]);
        let log = EventLog::from(vec![
            EventRecord::new(0.1, EventKind::ObstacleCollision, 0, Some(off_surface))?,
            EventRecord::new(0.15, EventKind::Other("P".into()), 1, None)?,
            EventRecord::new(0.2, EventKind::WallCollision, 1, Some(wall))?,
        ]);

        let trusted = TaggedEvents::new(&cfg, &log).collisions();
        assert_eq!(trusted.len(), 2);
        assert_eq!(trusted[0].class, CollisionClass::Obstacle);
        assert_eq!(trusted[1].class, CollisionClass::Wall);

        let verified = TaggedEvents::new(&cfg, &log).verified().collisions();
        assert_eq!(verified.len(), 1);
        assert_eq!(verified[0].class, CollisionClass::Wall);
        Ok(())
    }

    #[test]
    fn tagged_events_follow_a_drifting_free_obstacle() -> Result<()> {
        let cfg = config(
            2,
            1,
            ObstacleKind::Free {
                radius: 0.2,
                mass: 3.0,
            },
        );
        // The obstacle (row 1) has drifted to (0.4, 0) by the second snapshot.
        let snapshots = TrajectoryFrames::parse(
            Cursor::new("0.0\n0.6 0 -1 0\n0 0 0 0\n1.0\n0.7 0 1 0\n0.4 0 0.1 0\n"),
            "snapshots.txt",
            2,
            2,
        )?;
        let hit = CollisionPayload::from_values(&[0.7, 0.0, -1.0, 0.0, 1.0, 0.0]);
        let log = EventLog::from(vec![EventRecord::new(
            0.9,
            EventKind::ObstacleCollision,
            0,
            Some(hit),
        )?]);

        let centered = TaggedEvents::new(&cfg, &log).verified().collisions();
        assert!(centered.is_empty());

        let tracked = TaggedEvents::new(&cfg, &log)
            .with_snapshots(&snapshots)
            .verified()
            .collisions();
        assert_eq!(tracked.len(), 1);
        assert_eq!(tracked[0].class, CollisionClass::Obstacle);
        assert!((tracked[0].normal[0] - 1.0).abs() < 1e-12);
        Ok(())
    }
}
