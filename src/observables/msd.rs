//! Mean-squared displacement of a tracked participant and the diffusion-coefficient fit.
//!
//! Frames are stored at event times, which are not uniformly spaced. Each run is therefore
//! resampled onto a uniform grid by taking, for every grid point, the stored frame closest in
//! time. Runs are then averaged point by point and the diffusion coefficient is found by a grid
//! search minimizing the squared error against `msd(t) = k * D * t`.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::stream::TrajectoryFrames;

/// Spatial convention for the Einstein relation `msd = 2 * d * D * t`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimensionality {
    /// Displacement along one axis: `msd = 2 D t`.
    One,
    /// Planar displacement: `msd = 4 D t`.
    #[default]
    Two,
}

impl Dimensionality {
    /// Proportionality constant `k` of `msd = k D t`.
    pub fn factor(self) -> f64 {
        match self {
            Dimensionality::One => 2.0,
            Dimensionality::Two => 4.0,
        }
    }
}

/// Candidate diffusion coefficients, `linspace(min, max, steps)` with both ends included.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiffusionGrid {
    pub min: f64,
    pub max: f64,
    pub steps: usize,
}

impl Default for DiffusionGrid {
    fn default() -> Self {
        Self {
            min: 0.0,
            max: 3e-3,
            steps: 50,
        }
    }
}

impl DiffusionGrid {
    pub fn validate(&self) -> Result<()> {
        if !self.min.is_finite() || !self.max.is_finite() || self.max < self.min {
            return Err(Error::InvalidParam(
                "diffusion grid bounds must be finite with min <= max".into(),
            ));
        }
        if self.steps == 0 {
            return Err(Error::InvalidParam("diffusion grid needs at least one step".into()));
        }
        Ok(())
    }

    pub fn candidates(&self) -> Vec<f64> {
        if self.steps == 1 {
            return vec![self.min];
        }
        let h = (self.max - self.min) / (self.steps - 1) as f64;
        (0..self.steps).map(|i| self.min + h * i as f64).collect()
    }

    /// Spacing between neighbouring candidates.
    pub fn resolution(&self) -> f64 {
        if self.steps <= 1 {
            0.0
        } else {
            (self.max - self.min) / (self.steps - 1) as f64
        }
    }
}

/// Uniform grid `0, step, 2 step, ...` strictly below `end`.
pub fn uniform_grid(step: f64, end: f64) -> Vec<f64> {
    if !step.is_finite() || !end.is_finite() || step <= 0.0 || end <= 0.0 {
        return Vec::new();
    }
    let n = (end / step).ceil() as usize;
    (0..n).map(|i| i as f64 * step).filter(|t| *t < end).collect()
}

/// Squared displacement of `participant` from its first stored position, sampled at the stored
/// frame nearest to each grid time.
pub fn squared_displacements(
    frames: &TrajectoryFrames,
    participant: usize,
    grid: &[f64],
) -> Result<Vec<f64>> {
    if participant >= frames.particle_count() {
        return Err(Error::InvalidParam(format!(
            "tracked participant {participant} out of range for {} particles",
            frames.particle_count()
        )));
    }
    let Some(first) = frames.frame(0) else {
        return Err(Error::InvalidParam(
            "cannot track displacement without stored frames".into(),
        ));
    };
    let origin = first.state(participant).r;

    let mut out = Vec::with_capacity(grid.len());
    for &t in grid {
        let frame = frames
            .nearest_index(t)
            .and_then(|i| frames.frame(i))
            .ok_or_else(|| Error::InvalidParam("no frame near grid time".into()))?;
        out.push(frame.state(participant).squared_displacement(origin));
    }
    Ok(out)
}

/// Point-wise mean and population standard deviation of displacement runs on a shared grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MsdSeries {
    pub times: Vec<f64>,
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
}

impl MsdSeries {
    /// Average independent runs sampled on `times`.
    pub fn from_runs(times: &[f64], runs: &[Vec<f64>]) -> Result<Self> {
        if runs.is_empty() {
            return Err(Error::InvalidParam("MSD needs at least one run".into()));
        }
        if let Some(bad) = runs.iter().find(|r| r.len() != times.len()) {
            return Err(Error::InvalidParam(format!(
                "displacement run has {} samples but the grid has {}",
                bad.len(),
                times.len()
            )));
        }
        let n = runs.len() as f64;
        let mut mean = Vec::with_capacity(times.len());
        let mut std = Vec::with_capacity(times.len());
        for i in 0..times.len() {
            let m = runs.iter().map(|r| r[i]).sum::<f64>() / n;
            let var = runs.iter().map(|r| (r[i] - m).powi(2)).sum::<f64>() / n;
            mean.push(m);
            std.push(var.sqrt());
        }
        Ok(Self {
            times: times.to_vec(),
            mean,
            std,
        })
    }

    /// Keep only the stationary window `t < cutoff`.
    pub fn restrict(&self, cutoff: f64) -> Self {
        let keep = self.times.partition_point(|&t| t < cutoff);
        Self {
            times: self.times[..keep].to_vec(),
            mean: self.mean[..keep].to_vec(),
            std: self.std[..keep].to_vec(),
        }
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }
}

/// Outcome of the diffusion grid search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffusionFit {
    pub coefficient: f64,
    /// Squared error of the best candidate.
    pub sse: f64,
    pub dimensionality: Dimensionality,
    pub candidates: Vec<f64>,
    /// Squared error for every candidate, same order as `candidates`.
    pub sse_curve: Vec<f64>,
}

/// Grid-search the diffusion coefficient minimizing `sum (msd - k D t)^2`.
///
/// Ties resolve to the smallest candidate.
pub fn fit_diffusion(
    times: &[f64],
    msd: &[f64],
    grid: &DiffusionGrid,
    dimensionality: Dimensionality,
) -> Result<DiffusionFit> {
    grid.validate()?;
    if times.len() != msd.len() {
        return Err(Error::InvalidParam(format!(
            "{} times but {} MSD values",
            times.len(),
            msd.len()
        )));
    }
    if times.is_empty() {
        return Err(Error::InvalidParam("cannot fit an empty MSD series".into()));
    }

    let k = dimensionality.factor();
    let candidates = grid.candidates();
    let sse_curve: Vec<f64> = candidates
        .iter()
        .map(|&d| {
            times
                .iter()
                .zip(msd)
                .map(|(&t, &m)| (m - k * d * t).powi(2))
                .sum()
        })
        .collect();

    let mut best = 0usize;
    for (i, &sse) in sse_curve.iter().enumerate() {
        if sse < sse_curve[best] {
            best = i;
        }
    }

    Ok(DiffusionFit {
        coefficient: candidates[best],
        sse: sse_curve[best],
        dimensionality,
        candidates,
        sse_curve,
    })
}
