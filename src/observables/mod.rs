//! Physical observables derived from classified collisions and stored frames.
//!
//! Everything here is computed per job from a [`JobOutput`]: step-function collision counts,
//! first-arrival counts, the system temperature, time-binned pressure on both boundaries, and
//! (optionally) the squared displacement of one tracked participant.

pub mod msd;

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use ordered_float::NotNan;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::classify::{source_for, ClassifiedCollision, CollisionClass};
use crate::core::particle::dot;
use crate::core::RunConfig;
use crate::error::{Error, Result};
use crate::settings::{AnalysisConfig, MsdConfig, TrackedParticle};
use crate::stream::{Frame, JobOutput};

/// Decimal digits kept when reporting the temperature.
pub const TEMPERATURE_DIGITS: i32 = 5;

/// Ordered `time -> count` step function.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "Vec<(f64, usize)>", try_from = "Vec<(f64, usize)>")]
pub struct StepSeries(BTreeMap<NotNan<f64>, usize>);

impl StepSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the count at `time`, replacing any value already stored at that exact time.
    pub fn record(&mut self, time: f64, count: usize) -> Result<()> {
        let key = NotNan::new(time)
            .map_err(|_| Error::InvalidParam("step series time must not be NaN".into()))?;
        self.0.insert(key, count);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, usize)> + '_ {
        self.0.iter().map(|(t, c)| (t.into_inner(), *c))
    }

    /// Final `(time, count)` pair.
    pub fn last(&self) -> Option<(f64, usize)> {
        self.0.iter().next_back().map(|(t, c)| (t.into_inner(), *c))
    }

    pub fn is_monotonic(&self) -> bool {
        self.0.values().zip(self.0.values().skip(1)).all(|(a, b)| a <= b)
    }

    /// Earliest time at which the count reaches `target`.
    pub fn first_time_reaching(&self, target: usize) -> Option<f64> {
        self.0
            .iter()
            .find(|(_, c)| **c >= target)
            .map(|(t, _)| t.into_inner())
    }

    /// Least-squares slope of count against time. `None` with fewer than two distinct times.
    pub fn slope(&self) -> Option<f64> {
        let n = self.0.len();
        if n < 2 {
            return None;
        }
        let nf = n as f64;
        let mean_t = self.iter().map(|(t, _)| t).sum::<f64>() / nf;
        let mean_c = self.iter().map(|(_, c)| c as f64).sum::<f64>() / nf;
        let mut cov = 0.0;
        let mut var = 0.0;
        for (t, c) in self.iter() {
            cov += (t - mean_t) * (c as f64 - mean_c);
            var += (t - mean_t) * (t - mean_t);
        }
        (var > 0.0).then(|| cov / var)
    }
}

impl From<StepSeries> for Vec<(f64, usize)> {
    fn from(series: StepSeries) -> Self {
        series.iter().collect()
    }
}

impl TryFrom<Vec<(f64, usize)>> for StepSeries {
    type Error = Error;

    fn try_from(pairs: Vec<(f64, usize)>) -> Result<Self> {
        let mut series = StepSeries::new();
        for (t, c) in pairs {
            series.record(t, c)?;
        }
        Ok(series)
    }
}

/// Cumulative count of collisions of `class`, one step per collision.
pub fn collision_counts(
    collisions: &[ClassifiedCollision],
    class: CollisionClass,
) -> Result<StepSeries> {
    let mut series = StepSeries::new();
    let mut count = 0usize;
    for c in collisions.iter().filter(|c| c.class == class) {
        count += 1;
        series.record(c.time, count)?;
    }
    Ok(series)
}

/// Number of distinct participants that have hit `class` at least once, stepping only on a
/// participant's first hit.
pub fn first_arrivals(
    collisions: &[ClassifiedCollision],
    class: CollisionClass,
) -> Result<StepSeries> {
    let mut series = StepSeries::new();
    let mut seen = HashSet::new();
    for c in collisions.iter().filter(|c| c.class == class) {
        if seen.insert(c.participant_id) {
            series.record(c.time, seen.len())?;
        }
    }
    Ok(series)
}

/// Round to `digits` decimal places.
pub fn round_to(value: f64, digits: i32) -> f64 {
    let scale = 10f64.powi(digits);
    (value * scale).round() / scale
}

/// Mean kinetic energy per gas particle in one frame, rounded to [`TEMPERATURE_DIGITS`].
///
/// The free obstacle row, if any, is excluded.
pub fn temperature(frame: &Frame<'_>, config: &RunConfig) -> f64 {
    let obstacle_row = config.obstacle_row();
    let gas = config.gas_particle_count();
    if gas == 0 {
        return 0.0;
    }
    let energy: f64 = frame
        .states()
        .enumerate()
        .filter(|(i, _)| Some(*i) != obstacle_row)
        .map(|(_, s)| s.kinetic_energy(config.particle_mass))
        .sum();
    round_to(energy / gas as f64, TEMPERATURE_DIGITS)
}

/// Momentum flux per unit boundary length, binned into fixed-width time slots.
///
/// Both sequences are indexed by slot number and always have the same length; slots without
/// collisions hold zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PressureSeries {
    pub slot_duration: f64,
    pub wall: Vec<f64>,
    pub obstacle: Vec<f64>,
}

impl PressureSeries {
    pub fn len(&self) -> usize {
        self.wall.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wall.is_empty()
    }

    /// Start time of slot `i`.
    pub fn slot_start(&self, i: usize) -> f64 {
        i as f64 * self.slot_duration
    }

    pub fn mean_wall(&self) -> f64 {
        mean(&self.wall)
    }

    pub fn mean_obstacle(&self) -> f64 {
        mean(&self.obstacle)
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Accumulates impulses for the open slot and finalizes it when the walk leaves it.
struct SlotWalk {
    slot_duration: f64,
    wall_norm: f64,
    obstacle_norm: f64,
    open: usize,
    wall_impulse: f64,
    obstacle_impulse: f64,
    out: PressureSeries,
}

impl SlotWalk {
    fn new(slot_duration: f64, config: &RunConfig) -> Self {
        Self {
            slot_duration,
            wall_norm: slot_duration * config.domain.boundary_length(),
            obstacle_norm: slot_duration * config.obstacle.boundary_length(),
            open: 0,
            wall_impulse: 0.0,
            obstacle_impulse: 0.0,
            out: PressureSeries {
                slot_duration,
                wall: Vec::new(),
                obstacle: Vec::new(),
            },
        }
    }

    fn slot_of(&self, time: f64) -> usize {
        (time / self.slot_duration).floor().max(0.0) as usize
    }

    fn finalize(&mut self) {
        self.out.wall.push(self.wall_impulse / self.wall_norm);
        self.out.obstacle.push(self.obstacle_impulse / self.obstacle_norm);
        self.wall_impulse = 0.0;
        self.obstacle_impulse = 0.0;
        self.open += 1;
    }

    fn advance_to(&mut self, slot: usize) {
        while self.open < slot {
            self.finalize();
        }
    }

    fn add(&mut self, time: f64, class: CollisionClass, impulse: f64) {
        let slot = self.slot_of(time);
        self.advance_to(slot);
        match class {
            CollisionClass::Wall => self.wall_impulse += impulse,
            CollisionClass::Obstacle => self.obstacle_impulse += impulse,
            CollisionClass::Ambiguous => {}
        }
    }

    fn finish(mut self, end_time: f64) -> PressureSeries {
        let end_slots = (end_time / self.slot_duration).ceil().max(0.0) as usize;
        self.advance_to(end_slots.saturating_sub(1));
        self.finalize();
        self.out
    }
}

/// Time-binned pressure on the wall and on the obstacle.
///
/// Each collision contributes `2 m |v_pre . n|` to the slot containing its time. Slots are
/// normalized by `slot_duration * boundary_length`. The series covers every slot up to the later
/// of the last collision and `end_time`.
pub fn pressure(
    collisions: &[ClassifiedCollision],
    config: &RunConfig,
    slot_duration: f64,
    end_time: f64,
) -> Result<PressureSeries> {
    if !slot_duration.is_finite() || slot_duration <= 0.0 {
        return Err(Error::InvalidParam(
            "time_slot_duration must be finite and > 0".into(),
        ));
    }
    let mut walk = SlotWalk::new(slot_duration, config);
    for c in collisions {
        let impulse = 2.0 * config.particle_mass * dot(&c.velocity_before, &c.normal).abs();
        walk.add(c.time, c.class, impulse);
    }
    Ok(walk.finish(end_time))
}

/// All observables of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservableSet {
    /// Cumulative obstacle collisions.
    pub collision_counts: StepSeries,
    /// Distinct participants that have reached the obstacle.
    pub first_arrivals: StepSeries,
    pub temperature: f64,
    pub pressure: PressureSeries,
    /// `(t, |r(t) - r(0)|^2)` of the tracked participant on the MSD grid.
    pub displacement: Option<Vec<(f64, f64)>>,
}

impl ObservableSet {
    /// Parse a job's output directory and compute its observables.
    pub fn from_dir(dir: &Path, analysis: &AnalysisConfig) -> Result<Self> {
        let output = JobOutput::open(dir)?;
        Self::from_output(&output, analysis)
    }

    pub fn from_output(output: &JobOutput, analysis: &AnalysisConfig) -> Result<Self> {
        let config = &output.config;
        let frames = output.streams.frames();
        let first = frames.frame(0).ok_or_else(|| {
            Error::InvalidParam("run has no stored frame to measure temperature".into())
        })?;

        let collisions = source_for(output, analysis.verify_tags).collisions();
        let end_time = frames.times().last().copied().unwrap_or(0.0);

        let collision_counts = collision_counts(&collisions, CollisionClass::Obstacle)?;
        let first_arrivals = first_arrivals(&collisions, CollisionClass::Obstacle)?;
        let temperature = temperature(&first, config);
        let pressure = pressure(&collisions, config, analysis.time_slot_duration, end_time)?;
        let displacement = match &analysis.msd {
            Some(msd) => Some(tracked_displacement(output, msd)?),
            None => None,
        };

        debug!(
            collisions = collisions.len(),
            obstacle_hits = collision_counts.last().map_or(0, |(_, c)| c),
            temperature,
            slots = pressure.len(),
            "computed observables"
        );
        Ok(Self {
            collision_counts,
            first_arrivals,
            temperature,
            pressure,
            displacement,
        })
    }
}

fn tracked_displacement(output: &JobOutput, msd: &MsdConfig) -> Result<Vec<(f64, f64)>> {
    let participant = match msd.participant {
        TrackedParticle::Id(id) => id,
        TrackedParticle::Obstacle => output.config.obstacle_row().ok_or_else(|| {
            Error::InvalidParam("tracking the obstacle requires a free obstacle".into())
        })?,
    };
    let grid = msd::uniform_grid(msd.grid_step, msd.grid_end);
    let values = msd::squared_displacements(output.streams.frames(), participant, &grid)?;
    Ok(grid.into_iter().zip(values).collect())
}
