//! Sweep and analysis settings.
//!
//! Everything here deserializes from JSON with sensible defaults, and every struct offers a
//! `validate()` that rejects nonsensical values before any job starts.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use ordered_float::NotNan;
use serde::{Deserialize, Serialize};

use crate::core::{DomainKind, ObstacleKind};
use crate::error::{Error, Result};
use crate::observables::msd::{DiffusionGrid, Dimensionality};

/// Name of the subdirectory of `root_dir` that holds per-job output directories.
pub const JOB_ROOT_DIR: &str = "simulations";

/// Which participant's displacement is tracked for the MSD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackedParticle {
    /// The free obstacle (last row of every frame).
    #[default]
    Obstacle,
    /// An explicit row index.
    Id(usize),
}

/// Mean-squared-displacement settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MsdConfig {
    pub participant: TrackedParticle,
    /// Spacing of the uniform sampling grid.
    pub grid_step: f64,
    /// Grid covers `[0, grid_end)`.
    pub grid_end: f64,
    /// Only samples with `t < stationary_cutoff` enter the diffusion fit.
    pub stationary_cutoff: f64,
    pub diffusion: DiffusionGrid,
    pub dimensionality: Dimensionality,
}

impl Default for MsdConfig {
    fn default() -> Self {
        Self {
            participant: TrackedParticle::Obstacle,
            grid_step: 0.02,
            grid_end: 2.0,
            stationary_cutoff: 0.5,
            diffusion: DiffusionGrid::default(),
            dimensionality: Dimensionality::default(),
        }
    }
}

impl MsdConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.grid_step.is_finite() || self.grid_step <= 0.0 {
            return Err(Error::InvalidParam("msd.grid_step must be finite and > 0".into()));
        }
        if !self.grid_end.is_finite() || self.grid_end <= 0.0 {
            return Err(Error::InvalidParam("msd.grid_end must be finite and > 0".into()));
        }
        if !self.stationary_cutoff.is_finite() || self.stationary_cutoff <= 0.0 {
            return Err(Error::InvalidParam(
                "msd.stationary_cutoff must be finite and > 0".into(),
            ));
        }
        self.diffusion.validate()
    }
}

/// Per-run analysis settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Width of the pressure time slots.
    pub time_slot_duration: f64,
    /// Re-check simulator tags against the geometry.
    pub verify_tags: bool,
    /// Track a participant's displacement; `None` skips the MSD entirely.
    pub msd: Option<MsdConfig>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            time_slot_duration: 0.5,
            verify_tags: false,
            msd: None,
        }
    }
}

impl AnalysisConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.time_slot_duration.is_finite() || self.time_slot_duration <= 0.0 {
            return Err(Error::InvalidParam(
                "time_slot_duration must be finite and > 0".into(),
            ));
        }
        match &self.msd {
            Some(msd) => msd.validate(),
            None => Ok(()),
        }
    }
}

/// Parameters forwarded to every simulator invocation. The speed comes from the sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationParams {
    pub particle_count: usize,
    pub particle_radius: f64,
    pub particle_mass: f64,
    pub domain: DomainKind,
    pub obstacle: ObstacleKind,
    #[serde(default)]
    pub max_time: Option<f64>,
    #[serde(default)]
    pub max_events: Option<u64>,
    /// Write one snapshot every `snapshot_stride` events.
    #[serde(default)]
    pub snapshot_stride: Option<u64>,
    /// Base seed; job `i` runs with `seed + i`.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl SimulationParams {
    pub fn validate(&self) -> Result<()> {
        if self.particle_count == 0 {
            return Err(Error::InvalidParam("particle_count must be > 0".into()));
        }
        for (name, v) in [
            ("particle_radius", self.particle_radius),
            ("particle_mass", self.particle_mass),
            ("domain size", self.domain.size()),
            ("obstacle radius", self.obstacle.radius()),
        ] {
            if !v.is_finite() || v <= 0.0 {
                return Err(Error::InvalidParam(format!("{name} must be finite and > 0")));
            }
        }
        if let Some(mass) = self.obstacle.mass() {
            if !mass.is_finite() || mass <= 0.0 {
                return Err(Error::InvalidParam("obstacle mass must be finite and > 0".into()));
            }
        }
        match (self.max_time, self.max_events) {
            (None, None) => Err(Error::InvalidParam(
                "one of max_time or max_events is required".into(),
            )),
            (Some(t), _) if !t.is_finite() || t <= 0.0 => Err(Error::InvalidParam(
                "max_time must be finite and > 0".into(),
            )),
            (_, Some(0)) => Err(Error::InvalidParam("max_events must be > 0".into())),
            _ => Ok(()),
        }
    }
}

/// How to start the external simulator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LauncherConfig {
    pub program: PathBuf,
    /// Arguments placed before the simulator flags; `{mem}` expands to the job's memory budget.
    #[serde(default)]
    pub prefix_args: Vec<String>,
}

/// A full parameter sweep: `speeds x repetitions` simulator jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    pub simulation: SimulationParams,
    pub speeds: Vec<f64>,
    pub repetitions: usize,
    /// Worker pool size; `None` or `1` runs jobs sequentially.
    #[serde(default)]
    pub workers: Option<usize>,
    /// Memory budget shared by concurrently running jobs, in GiB.
    #[serde(default = "default_total_memory_gb")]
    pub total_memory_gb: u32,
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,
    /// Skip the final removal of the job directories.
    #[serde(default)]
    pub keep_outputs: bool,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub launcher: Option<LauncherConfig>,
}

fn default_total_memory_gb() -> u32 {
    12
}

fn default_root_dir() -> PathBuf {
    PathBuf::from("data")
}

impl SweepConfig {
    /// Load and validate a JSON sweep description.
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: SweepConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.simulation.validate()?;
        self.analysis.validate()?;
        if self.speeds.is_empty() {
            return Err(Error::InvalidParam("speeds must not be empty".into()));
        }
        let mut seen = BTreeSet::new();
        for &v in &self.speeds {
            let speed = NotNan::new(v)
                .ok()
                .filter(|s| s.is_finite() && **s >= 0.0)
                .ok_or_else(|| Error::InvalidParam("speeds must be finite and >= 0".into()))?;
            // Job directories are keyed by speed and repetition.
            if !seen.insert(speed) {
                return Err(Error::InvalidParam(format!("speed {v} is listed more than once")));
            }
        }
        if self.repetitions == 0 {
            return Err(Error::InvalidParam("repetitions must be > 0".into()));
        }
        if self.workers == Some(0) {
            return Err(Error::InvalidParam("workers must be > 0".into()));
        }
        if self.total_memory_gb == 0 {
            return Err(Error::InvalidParam("total_memory_gb must be > 0".into()));
        }
        Ok(())
    }

    /// Whether jobs run on a worker pool rather than one after another.
    pub fn is_concurrent(&self) -> bool {
        self.workers.is_some_and(|w| w > 1)
    }

    /// Memory handed to each job: the whole budget when sequential, an equal share otherwise.
    pub fn memory_per_job(&self) -> u32 {
        match self.workers {
            Some(w) if w > 1 => (self.total_memory_gb / w as u32).max(1),
            _ => self.total_memory_gb,
        }
    }

    /// Directory holding every job's output directory; removed after the sweep.
    pub fn job_root(&self) -> PathBuf {
        self.root_dir.join(JOB_ROOT_DIR)
    }
}
