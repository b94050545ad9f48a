//! Bounded-concurrency execution of simulator sweeps.
//!
//! A sweep is the cartesian product `speeds x repetitions`. Each job gets its own output
//! directory under `<root>/simulations`, is launched through a [`SimulatorLauncher`], and is
//! analyzed as soon as the simulator exits. Jobs run one after another or on a fixed-size rayon
//! pool; a failing job only loses its own result. Once every job has finished, the job root is
//! removed in a single pass.

use std::fs;
use std::any::Any;
use std::io::ErrorKind;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::aggregate::SweepReport;
use crate::core::RunConfig;
use crate::error::{Error, Result};
use crate::observables::ObservableSet;
use crate::settings::{LauncherConfig, SimulationParams, SweepConfig};
use crate::stream::JobOutput;

/// One point of the sweep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct JobSpec {
    /// Position in the sweep, stable across runs of the same config.
    pub index: usize,
    pub speed: f64,
    pub repetition: usize,
}

impl JobSpec {
    /// Output directory name, unique per `(speed, repetition)`.
    pub fn dir_name(&self) -> String {
        format!("v-{}_it-{}", self.speed, self.repetition)
    }
}

/// Everything a launcher needs to start one simulator run.
#[derive(Debug, Clone, Copy)]
pub struct LaunchRequest<'a> {
    pub job: &'a JobSpec,
    pub params: &'a SimulationParams,
    pub output_dir: &'a Path,
    /// Memory budget for this job in GiB.
    pub memory_gb: u32,
    pub seed: Option<u64>,
}

/// Starts the external simulator and blocks until it has written its output.
pub trait SimulatorLauncher: Sync {
    fn launch(&self, request: &LaunchRequest<'_>) -> Result<()>;
}

impl<L: SimulatorLauncher + ?Sized> SimulatorLauncher for &L {
    fn launch(&self, request: &LaunchRequest<'_>) -> Result<()> {
        (**self).launch(request)
    }
}

/// Launches the simulator as a child process.
///
/// The command line is `program prefix_args... <simulator flags>`, where every `{mem}` inside
/// the prefix arguments is replaced by the job's memory budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessLauncher {
    program: PathBuf,
    prefix_args: Vec<String>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            prefix_args: Vec::new(),
        }
    }

    pub fn with_prefix_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.prefix_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn from_config(config: &LauncherConfig) -> Self {
        Self::new(config.program.clone()).with_prefix_args(config.prefix_args.iter().cloned())
    }

    /// Full argument list for one request, without the program itself.
    pub fn arguments(&self, request: &LaunchRequest<'_>) -> Vec<String> {
        let mem = request.memory_gb.to_string();
        let mut args: Vec<String> = self
            .prefix_args
            .iter()
            .map(|a| a.replace("{mem}", &mem))
            .collect();

        let p = request.params;
        let mut flag = |name: &str, value: String| {
            args.push(name.to_string());
            args.push(value);
        };
        flag("-out", request.output_dir.display().to_string());
        flag("-N", p.particle_count.to_string());
        flag("-r", p.particle_radius.to_string());
        flag("-m", p.particle_mass.to_string());
        flag("-v", request.job.speed.to_string());
        if let Some(t) = p.max_time {
            flag("-t", t.to_string());
        }
        if let Some(e) = p.max_events {
            flag("-e", e.to_string());
        }
        flag("-d", p.domain.tag().to_string());
        flag("-sz", p.domain.size().to_string());
        flag("-obs", p.obstacle.tag().to_string());
        flag("-or", p.obstacle.radius().to_string());
        if let Some(m) = p.obstacle.mass() {
            flag("-om", m.to_string());
        }
        if let Some(stride) = p.snapshot_stride {
            flag("-sn", stride.to_string());
        }
        if let Some(seed) = request.seed {
            flag("-s", seed.to_string());
        }
        args
    }
}

impl SimulatorLauncher for ProcessLauncher {
    fn launch(&self, request: &LaunchRequest<'_>) -> Result<()> {
        let args = self.arguments(request);
        debug!(program = %self.program.display(), ?args, "spawning simulator");
        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()?;
        if !output.status.success() {
            return Err(Error::SimulatorProcessFailure {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Analyzed output of one successful job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobResult {
    pub job: JobSpec,
    pub config: RunConfig,
    #[serde(flatten)]
    pub observables: ObservableSet,
}

/// A job paired with its result, success or not.
#[derive(Debug)]
pub struct JobOutcome {
    pub job: JobSpec,
    pub result: Result<JobResult>,
}

/// Runs a sweep with a given launcher.
pub struct Harness<'a, L> {
    config: &'a SweepConfig,
    launcher: L,
    completed: AtomicUsize,
}

impl<'a, L: SimulatorLauncher> Harness<'a, L> {
    pub fn new(config: &'a SweepConfig, launcher: L) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            launcher,
            completed: AtomicUsize::new(0),
        })
    }

    /// Every job of the sweep, speed-major.
    pub fn jobs(&self) -> Vec<JobSpec> {
        self.config
            .speeds
            .iter()
            .flat_map(|&speed| (0..self.config.repetitions).map(move |rep| (speed, rep)))
            .enumerate()
            .map(|(index, (speed, repetition))| JobSpec {
                index,
                speed,
                repetition,
            })
            .collect()
    }

    /// Number of jobs that have finished so far, successful or not.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }

    /// Run every job and return the outcomes ordered by job index.
    ///
    /// Only pool construction fails the sweep; per-job errors are returned inside the outcomes.
    pub fn run(&self) -> Result<Vec<JobOutcome>> {
        let jobs = self.jobs();
        let total = jobs.len();
        let memory_gb = self.config.memory_per_job();

        let outcomes: Vec<JobOutcome> = match self.config.workers {
            Some(workers) if self.config.is_concurrent() => {
                info!(total, workers, memory_gb, "running jobs concurrently");
                let pool = ThreadPoolBuilder::new().num_threads(workers).build()?;
                pool.install(|| {
                    jobs.par_iter()
                        .map(|job| self.run_job(job, total, memory_gb))
                        .collect()
                })
            }
            _ => {
                info!(total, memory_gb, "running jobs sequentially");
                jobs.iter()
                    .map(|job| self.run_job(job, total, memory_gb))
                    .collect()
            }
        };

        self.cleanup();
        Ok(outcomes)
    }

    fn run_job(&self, job: &JobSpec, total: usize, memory_gb: u32) -> JobOutcome {
        info!(
            index = job.index,
            speed = job.speed,
            repetition = job.repetition,
            "starting job"
        );
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.execute(job, memory_gb)))
            .unwrap_or_else(|payload| Err(Error::JobPanicked(panic_message(payload.as_ref()))));
        let done = self.completed.fetch_add(1, Ordering::Relaxed) + 1;
        match &result {
            Ok(_) => info!(
                index = job.index,
                remaining = total - done,
                "completed job {}",
                job.dir_name()
            ),
            Err(e) => warn!(
                index = job.index,
                speed = job.speed,
                repetition = job.repetition,
                remaining = total - done,
                error = %e,
                "job failed"
            ),
        }
        JobOutcome { job: *job, result }
    }

    fn execute(&self, job: &JobSpec, memory_gb: u32) -> Result<JobResult> {
        let dir = self.config.job_root().join(job.dir_name());
        fs::create_dir_all(&dir)?;

        let params = &self.config.simulation;
        let request = LaunchRequest {
            job,
            params,
            output_dir: &dir,
            memory_gb,
            seed: params.seed.map(|s| s.wrapping_add(job.index as u64)),
        };
        self.launcher.launch(&request)?;

        let output = JobOutput::open(&dir)?;
        let observables = ObservableSet::from_output(&output, &self.config.analysis)?;
        Ok(JobResult {
            job: *job,
            config: output.config,
            observables,
        })
    }

    fn cleanup(&self) {
        let root = self.config.job_root();
        if self.config.keep_outputs {
            info!(root = %root.display(), "keeping job outputs");
            return;
        }
        match fs::remove_dir_all(&root) {
            Ok(()) => debug!(root = %root.display(), "removed job outputs"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(root = %root.display(), error = %e, "failed to remove job outputs"),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run a whole sweep and aggregate the successful jobs.
pub fn run_sweep<L: SimulatorLauncher>(config: &SweepConfig, launcher: L) -> Result<SweepReport> {
    let harness = Harness::new(config, launcher)?;
    let outcomes = harness.run()?;
    SweepReport::from_outcomes(outcomes, config.analysis.msd.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DomainKind, ObstacleKind};
    use crate::settings::AnalysisConfig;

    fn params() -> SimulationParams {
        SimulationParams {
            particle_count: 250,
            particle_radius: 5e-4,
            particle_mass: 1.0,
            domain: DomainKind::Circular { radius: 0.05 },
            obstacle: ObstacleKind::Free {
                radius: 0.005,
                mass: 3.0,
            },
            max_time: Some(0.5),
            max_events: None,
            snapshot_stride: Some(10),
            seed: Some(40),
        }
    }

    fn sweep() -> SweepConfig {
        SweepConfig {
            simulation: params(),
            speeds: vec![1.0, 2.5],
            repetitions: 3,
            workers: None,
            total_memory_gb: 12,
            root_dir: PathBuf::from("unused"),
            keep_outputs: false,
            analysis: AnalysisConfig::default(),
            launcher: None,
        }
    }

    struct Noop;

    impl SimulatorLauncher for Noop {
        fn launch(&self, _: &LaunchRequest<'_>) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn jobs_cover_speed_by_repetition() -> Result<()> {
        let cfg = sweep();
        let harness = Harness::new(&cfg, Noop)?;
        let jobs = harness.jobs();
        assert_eq!(jobs.len(), 6);
        assert_eq!(jobs[4].speed, 2.5);
        assert_eq!(jobs[4].repetition, 1);
        assert_eq!(jobs[4].index, 4);
        assert_eq!(jobs[4].dir_name(), "v-2.5_it-1");
        assert_eq!(harness.completed(), 0);
        Ok(())
    }

    struct Panicking;

    impl SimulatorLauncher for Panicking {
        fn launch(&self, request: &LaunchRequest<'_>) -> Result<()> {
            if request.job.index == 1 {
                panic!("simulator wrapper crashed on {}", request.job.dir_name());
            }
            Ok(())
        }
    }

    #[test]
    fn panicking_job_becomes_an_error_and_cleanup_runs() -> Result<()> {
        let root = tempfile::tempdir()?;
        let mut cfg = sweep();
        cfg.root_dir = root.path().to_path_buf();
        let harness = Harness::new(&cfg, Panicking)?;
        let outcomes = harness.run()?;

        assert_eq!(outcomes.len(), 6);
        assert_eq!(harness.completed(), 6);
        match &outcomes[1].result {
            Err(Error::JobPanicked(msg)) => assert!(msg.contains("v-1_it-1"), "{msg}"),
            other => panic!("expected JobPanicked, got {other:?}"),
        }
        // The rest fail on missing output, not on the panic.
        assert!(outcomes
            .iter()
            .filter(|o| o.job.index != 1)
            .all(|o| matches!(o.result, Err(Error::MissingOutput(_)))));
        assert!(!cfg.job_root().exists());
        Ok(())
    }

    #[test]
    fn panic_payloads_are_rendered() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42u8), "unknown panic");
    }

    #[test]
    fn process_arguments_expand_memory_and_flags() {
        let launcher =
            ProcessLauncher::new("java").with_prefix_args(["-Xmx{mem}G", "-jar", "sim.jar"]);
        let params = params();
        let job = JobSpec {
            index: 2,
            speed: 3.0,
            repetition: 1,
        };
        let dir = PathBuf::from("out/v-3_it-1");
        let request = LaunchRequest {
            job: &job,
            params: &params,
            output_dir: &dir,
            memory_gb: 3,
            seed: Some(42),
        };
        let args = launcher.arguments(&request);
        assert_eq!(&args[..3], ["-Xmx3G", "-jar", "sim.jar"]);

        let pos = |flag: &str| args.iter().position(|a| a == flag);
        let value = |flag: &str| pos(flag).map(|i| args[i + 1].clone());
        assert_eq!(value("-N").as_deref(), Some("250"));
        assert_eq!(value("-v").as_deref(), Some("3"));
        assert_eq!(value("-t").as_deref(), Some("0.5"));
        assert_eq!(value("-obs").as_deref(), Some("free"));
        assert_eq!(value("-om").as_deref(), Some("3"));
        assert_eq!(value("-sn").as_deref(), Some("10"));
        assert_eq!(value("-s").as_deref(), Some("42"));
        assert_eq!(pos("-e"), None);
    }
}
