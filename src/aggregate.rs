//! Cross-repetition aggregation of per-job observables.
//!
//! Successful jobs are grouped by `(initial speed, temperature)`. Each group reports the mean
//! and population standard deviation of its scalar observables and, when displacement data was
//! tracked, the averaged MSD with a fitted diffusion coefficient.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use ordered_float::NotNan;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::harness::{JobOutcome, JobResult, JobSpec};
use crate::observables::msd::{fit_diffusion, DiffusionFit, MsdSeries};
use crate::settings::MsdConfig;

/// Fraction of gas particles that must have reached the obstacle for the arrival time.
pub const ARRIVAL_FRACTION: f64 = 0.9;

/// Online mean and population variance (Welford).
#[derive(Debug, Clone, Copy, Default)]
pub struct RunningStats {
    n: usize,
    mean: f64,
    m2: f64,
}

impl RunningStats {
    /// Adds a sample if finite. Non-finite samples are ignored.
    pub fn push(&mut self, x: f64) {
        if !x.is_finite() {
            return;
        }
        self.n += 1;
        let delta = x - self.mean;
        self.mean += delta / self.n as f64;
        self.m2 += delta * (x - self.mean);
    }

    pub fn count(&self) -> usize {
        self.n
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn variance(&self) -> f64 {
        if self.n == 0 {
            0.0
        } else {
            self.m2 / self.n as f64
        }
    }

    pub fn std(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn summary(&self) -> Summary {
        Summary {
            mean: self.mean(),
            std: self.std(),
            count: self.n,
        }
    }
}

impl FromIterator<f64> for RunningStats {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        let mut stats = RunningStats::default();
        for x in iter {
            stats.push(x);
        }
        stats
    }
}

/// Mean, population std and number of contributing samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Summary {
    pub mean: f64,
    pub std: f64,
    pub count: usize,
}

/// Physical grouping key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct GroupKey {
    pub speed: NotNan<f64>,
    pub temperature: NotNan<f64>,
}

impl GroupKey {
    fn of(result: &JobResult) -> Result<Self> {
        let speed = NotNan::new(result.config.initial_speed)
            .map_err(|_| Error::InvalidParam("initial speed is NaN".into()))?;
        let temperature = NotNan::new(result.observables.temperature)
            .map_err(|_| Error::InvalidParam("temperature is NaN".into()))?;
        Ok(Self { speed, temperature })
    }
}

/// Statistics of one `(speed, temperature)` group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedResult {
    pub speed: f64,
    pub temperature: f64,
    pub repetitions: usize,
    /// Least-squares slope of the cumulative obstacle collision count.
    pub collision_slope: Summary,
    /// Time until [`ARRIVAL_FRACTION`] of the gas particles have hit the obstacle.
    pub arrival_time_90: Summary,
    pub wall_pressure: Summary,
    pub obstacle_pressure: Summary,
    pub msd: Option<MsdSeries>,
    pub diffusion: Option<DiffusionFit>,
}

/// Group successful jobs and summarize each group. Groups come out ordered by key.
pub fn aggregate(results: &[JobResult], msd: Option<&MsdConfig>) -> Result<Vec<AggregatedResult>> {
    let mut groups: BTreeMap<GroupKey, Vec<&JobResult>> = BTreeMap::new();
    for result in results {
        groups.entry(GroupKey::of(result)?).or_default().push(result);
    }

    let mut out = Vec::with_capacity(groups.len());
    for (key, members) in groups {
        let collision_slope: RunningStats = members
            .iter()
            .filter_map(|r| r.observables.collision_counts.slope())
            .collect();
        let arrival: RunningStats = members
            .iter()
            .filter_map(|r| {
                let target = (ARRIVAL_FRACTION * r.config.gas_particle_count() as f64).ceil();
                r.observables
                    .first_arrivals
                    .first_time_reaching(target as usize)
            })
            .collect();
        let wall: RunningStats = members
            .iter()
            .map(|r| r.observables.pressure.mean_wall())
            .collect();
        let obstacle: RunningStats = members
            .iter()
            .map(|r| r.observables.pressure.mean_obstacle())
            .collect();

        let (msd_series, diffusion) = match msd {
            Some(cfg) => group_msd(&members, cfg)?,
            None => (None, None),
        };

        debug!(
            speed = key.speed.into_inner(),
            temperature = key.temperature.into_inner(),
            repetitions = members.len(),
            "aggregated group"
        );
        out.push(AggregatedResult {
            speed: key.speed.into_inner(),
            temperature: key.temperature.into_inner(),
            repetitions: members.len(),
            collision_slope: collision_slope.summary(),
            arrival_time_90: arrival.summary(),
            wall_pressure: wall.summary(),
            obstacle_pressure: obstacle.summary(),
            msd: msd_series,
            diffusion,
        });
    }
    Ok(out)
}

fn group_msd(
    members: &[&JobResult],
    cfg: &MsdConfig,
) -> Result<(Option<MsdSeries>, Option<DiffusionFit>)> {
    let tracks: Vec<&Vec<(f64, f64)>> = members
        .iter()
        .filter_map(|r| r.observables.displacement.as_ref())
        .collect();
    let Some(first) = tracks.first() else {
        return Ok((None, None));
    };
    let times: Vec<f64> = first.iter().map(|(t, _)| *t).collect();
    let runs: Vec<Vec<f64>> = tracks
        .iter()
        .map(|track| track.iter().map(|(_, sq)| *sq).collect())
        .collect();

    let series = MsdSeries::from_runs(&times, &runs)?;
    let stationary = series.restrict(cfg.stationary_cutoff);
    let fit = if stationary.is_empty() {
        None
    } else {
        Some(fit_diffusion(
            &stationary.times,
            &stationary.mean,
            &cfg.diffusion,
            cfg.dimensionality,
        )?)
    };
    Ok((Some(series), fit))
}

/// A job that produced no result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobFailure {
    pub job: JobSpec,
    pub error: String,
}

/// Everything a sweep hands to the reporting layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepReport {
    pub results: Vec<JobResult>,
    pub failures: Vec<JobFailure>,
    pub aggregates: Vec<AggregatedResult>,
}

impl SweepReport {
    /// Split outcomes into results and failures, then aggregate the results.
    pub fn from_outcomes(outcomes: Vec<JobOutcome>, msd: Option<&MsdConfig>) -> Result<Self> {
        let mut results = Vec::new();
        let mut failures = Vec::new();
        for outcome in outcomes {
            match outcome.result {
                Ok(result) => results.push(result),
                Err(e) => failures.push(JobFailure {
                    job: outcome.job,
                    error: e.to_string(),
                }),
            }
        }
        let aggregates = aggregate(&results, msd)?;
        info!(
            succeeded = results.len(),
            failed = failures.len(),
            groups = aggregates.len(),
            "sweep aggregated"
        );
        Ok(Self {
            results,
            failures,
            aggregates,
        })
    }

    /// Write the report as pretty-printed JSON, creating parent directories as needed.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }
}
