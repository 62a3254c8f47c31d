//! Python bindings

use crate::config::HarmonicPreset;
use crate::core::design::HarmonicDesign;
use crate::core::regression::fit_pixel;
use crate::core::spectral_index::{compute_index, SpectralIndex};
use crate::types::BaselineError;
use chrono::{TimeZone, Utc};
use ndarray::{Array1, Array2};
use numpy::{IntoPyArray, PyArray2, PyReadonlyArray2};
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;

fn to_py_err(e: BaselineError) -> PyErr {
    match e {
        BaselineError::InvalidConfiguration(msg) | BaselineError::InvalidFormat(msg) => {
            PyErr::new::<PyValueError, _>(msg)
        }
        other => PyErr::new::<PyRuntimeError, _>(format!("{}", other)),
    }
}

fn design_for(preset: &str) -> PyResult<HarmonicDesign> {
    let preset: HarmonicPreset = preset.parse().map_err(to_py_err)?;
    HarmonicDesign::new(&preset.frequencies()).map_err(to_py_err)
}

/// Evaluate a spectral index over reflectance arrays
#[pyfunction]
#[allow(clippy::too_many_arguments)]
fn spectral_index<'py>(
    py: Python<'py>,
    name: &str,
    blue: PyReadonlyArray2<'py, f32>,
    green: PyReadonlyArray2<'py, f32>,
    red: PyReadonlyArray2<'py, f32>,
    nir: PyReadonlyArray2<'py, f32>,
    swir1: PyReadonlyArray2<'py, f32>,
    swir2: PyReadonlyArray2<'py, f32>,
) -> PyResult<&'py PyArray2<f32>> {
    let index: SpectralIndex = name.parse().map_err(to_py_err)?;
    let out = compute_index(
        index,
        &blue.as_array().to_owned(),
        &green.as_array().to_owned(),
        &red.as_array().to_owned(),
        &nir.as_array().to_owned(),
        &swir1.as_array().to_owned(),
        &swir2.as_array().to_owned(),
    )
    .map_err(to_py_err)?;
    Ok(out.into_pyarray(py))
}

/// Fit one time series; returns `(coefficients, rmse, nobs)` or `None` if unresolved
#[pyfunction]
fn fit_harmonic_series(
    time_millis: Vec<i64>,
    values: Vec<f64>,
    preset: &str,
) -> PyResult<Option<(Vec<f64>, f64, usize)>> {
    if time_millis.len() != values.len() {
        return Err(PyErr::new::<PyValueError, _>(format!(
            "{} timestamps for {} values",
            time_millis.len(),
            values.len()
        )));
    }
    let design = design_for(preset)?;

    let mut times = Vec::with_capacity(values.len());
    let mut y = Vec::with_capacity(values.len());
    for (&ms, &v) in time_millis.iter().zip(values.iter()) {
        if !v.is_finite() {
            continue;
        }
        let time = Utc
            .timestamp_millis_opt(ms)
            .single()
            .ok_or_else(|| PyErr::new::<PyValueError, _>(format!("Invalid timestamp {}", ms)))?;
        times.push(time);
        y.push(v);
    }

    let x: Array2<f64> = design.design_matrix(&times);
    let fit = fit_pixel(&x, &Array1::from(y), 1e-10);
    Ok(fit.map(|f| (f.coefficients, f.rmse, f.nobs)))
}

/// Ordered term names for a harmonic preset
#[pyfunction]
fn harmonic_term_names(preset: &str) -> PyResult<Vec<String>> {
    Ok(design_for(preset)?.term_names().to_vec())
}

/// Python module definition
#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(spectral_index, m)?)?;
    m.add_function(wrap_pyfunction!(fit_harmonic_series, m)?)?;
    m.add_function(wrap_pyfunction!(harmonic_term_names, m)?)?;
    Ok(())
}
