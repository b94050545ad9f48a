use std::path::PathBuf;

use numpy::ndarray::Array2;
use numpy::{IntoPyArray, PyArray1, PyArray2, PyReadonlyArray1};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use crate::observables::msd::{self, DiffusionGrid, Dimensionality};
use crate::observables::{ObservableSet, StepSeries};
use crate::settings::AnalysisConfig;

fn py_err<E: ToString>(e: E) -> PyErr {
    PyValueError::new_err(e.to_string())
}

fn series_arrays(
    py: Python<'_>,
    series: &StepSeries,
) -> (Py<PyArray1<f64>>, Py<PyArray1<usize>>) {
    let (times, counts): (Vec<f64>, Vec<usize>) = series.iter().unzip();
    (
        times.into_pyarray(py).to_owned().into(),
        counts.into_pyarray(py).to_owned().into(),
    )
}

/// Observables of one simulator output directory.
///
/// Construct with `RunAnalysis(dir, time_slot_duration=0.5, verify_tags=False)` or
/// `analyze_run(...)`. Parsing releases the GIL.
#[pyclass]
pub struct RunAnalysis {
    observables: ObservableSet,
}

#[pymethods]
impl RunAnalysis {
    #[new]
    #[pyo3(signature = (dir, time_slot_duration=0.5, verify_tags=false))]
    fn new(
        py: Python<'_>,
        dir: PathBuf,
        time_slot_duration: f64,
        verify_tags: bool,
    ) -> PyResult<Self> {
        let analysis = AnalysisConfig {
            time_slot_duration,
            verify_tags,
            msd: None,
        };
        analysis.validate().map_err(py_err)?;
        let observables = py
            .detach(|| ObservableSet::from_dir(&dir, &analysis))
            .map_err(py_err)?;
        Ok(Self { observables })
    }

    /// System temperature (mean kinetic energy per gas particle).
    #[getter]
    fn temperature(&self) -> f64 {
        self.observables.temperature
    }

    #[getter]
    fn slot_duration(&self) -> f64 {
        self.observables.pressure.slot_duration
    }

    /// Cumulative obstacle collisions as `(times, counts)` arrays.
    fn collision_counts(&self, py: Python<'_>) -> (Py<PyArray1<f64>>, Py<PyArray1<usize>>) {
        series_arrays(py, &self.observables.collision_counts)
    }

    /// Distinct participants that reached the obstacle as `(times, counts)` arrays.
    fn first_arrivals(&self, py: Python<'_>) -> (Py<PyArray1<f64>>, Py<PyArray1<usize>>) {
        series_arrays(py, &self.observables.first_arrivals)
    }

    /// Per-slot `(wall, obstacle)` pressure arrays of equal length.
    fn pressure(&self, py: Python<'_>) -> (Py<PyArray1<f64>>, Py<PyArray1<f64>>) {
        let p = &self.observables.pressure;
        (
            p.wall.clone().into_pyarray(py).to_owned().into(),
            p.obstacle.clone().into_pyarray(py).to_owned().into(),
        )
    }

    /// All observables serialized as JSON.
    fn to_json(&self) -> PyResult<String> {
        serde_json::to_string(&self.observables).map_err(py_err)
    }
}

/// Analyze one simulator output directory.
#[pyfunction]
#[pyo3(signature = (dir, time_slot_duration=0.5, verify_tags=false))]
fn analyze_run(
    py: Python<'_>,
    dir: PathBuf,
    time_slot_duration: f64,
    verify_tags: bool,
) -> PyResult<RunAnalysis> {
    RunAnalysis::new(py, dir, time_slot_duration, verify_tags)
}

/// Squared displacement of one participant on a uniform grid, as an (M, 2) array of `(t, sq)`.
#[pyfunction]
#[pyo3(signature = (dir, participant, grid_step=0.02, grid_end=2.0))]
fn tracked_displacement(
    py: Python<'_>,
    dir: PathBuf,
    participant: usize,
    grid_step: f64,
    grid_end: f64,
) -> PyResult<Py<PyArray2<f64>>> {
    let grid = msd::uniform_grid(grid_step, grid_end);
    let values = py
        .detach(|| {
            let output = crate::stream::JobOutput::open(&dir)?;
            msd::squared_displacements(output.streams.frames(), participant, &grid)
        })
        .map_err(py_err)?;
    let mut arr = Array2::<f64>::zeros((grid.len(), 2));
    for (i, (t, sq)) in grid.iter().zip(values).enumerate() {
        arr[[i, 0]] = *t;
        arr[[i, 1]] = sq;
    }
    Ok(arr.into_pyarray(py).to_owned().into())
}

/// Grid-search the diffusion coefficient of an MSD curve.
///
/// Returns `(coefficient, sse, candidates, sse_curve)`. `dim` selects `msd = 2 dim D t`.
#[pyfunction]
#[pyo3(signature = (times, msd, d_min=0.0, d_max=3e-3, steps=50, dim=2))]
fn fit_diffusion<'py>(
    py: Python<'py>,
    times: PyReadonlyArray1<'py, f64>,
    msd: PyReadonlyArray1<'py, f64>,
    d_min: f64,
    d_max: f64,
    steps: usize,
    dim: usize,
) -> PyResult<(f64, f64, Py<PyArray1<f64>>, Py<PyArray1<f64>>)> {
    let dimensionality = match dim {
        1 => Dimensionality::One,
        2 => Dimensionality::Two,
        other => return Err(py_err(format!("dim must be 1 or 2, got {other}"))),
    };
    let grid = DiffusionGrid {
        min: d_min,
        max: d_max,
        steps,
    };
    let times = times.as_array().to_vec();
    let values = msd.as_array().to_vec();
    let fit = msd::fit_diffusion(&times, &values, &grid, dimensionality).map_err(py_err)?;
    Ok((
        fit.coefficient,
        fit.sse,
        fit.candidates.into_pyarray(py).to_owned().into(),
        fit.sse_curve.into_pyarray(py).to_owned().into(),
    ))
}

#[pymodule]
fn edmd_analysis(_py: Python<'_>, m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<RunAnalysis>()?;
    m.add_function(wrap_pyfunction!(analyze_run, m)?)?;
    m.add_function(wrap_pyfunction!(tracked_displacement, m)?)?;
    m.add_function(wrap_pyfunction!(fit_diffusion, m)?)?;
    Ok(())
}
