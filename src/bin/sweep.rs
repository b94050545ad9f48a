//! Sweep runner
//!
//! Usage: `sweep <config.json>`. Runs every simulator job described by the config, analyzes the
//! outputs and writes `results.json` into the config's `root_dir`.

use std::env;
use std::path::PathBuf;
use std::process;

use tracing::info;

use edmd_analysis::logging::init_logging;
use edmd_analysis::settings::SweepConfig;
use edmd_analysis::{run_sweep, Error, ProcessLauncher, Result};

const RESULTS_FILE: &str = "results.json";

fn run(config_path: PathBuf) -> Result<()> {
    let config = SweepConfig::from_path(&config_path)?;
    let launcher = config
        .launcher
        .as_ref()
        .map(ProcessLauncher::from_config)
        .ok_or_else(|| Error::InvalidParam("config has no launcher section".into()))?;

    let report = run_sweep(&config, launcher)?;
    let out = config.root_dir.join(RESULTS_FILE);
    report.write_json(&out)?;
    info!(
        path = %out.display(),
        succeeded = report.results.len(),
        failed = report.failures.len(),
        "wrote results"
    );
    Ok(())
}

fn main() {
    let mut args = env::args_os().skip(1);
    let (Some(path), None) = (args.next(), args.next()) else {
        eprintln!("usage: sweep <config.json>");
        process::exit(2);
    };

    init_logging();

    if let Err(e) = run(PathBuf::from(path)) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
