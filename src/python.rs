//! Python bindings.

use ndarray::{Array1, Array2};
use numpy::{PyArray1, PyArray2, PyReadonlyArray1, PyReadonlyArray2, ToPyArray};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use crate::error::IrtError;
use crate::estimation::{EstimationConfig, MmleEstimator, TerminationStatus};
use crate::irm::{ItemModel, ItemResponseModel, ModelType, ParamKind};
use crate::logistic::LogisticModel;
use crate::polytomous::{GradedResponseModel, PartialCreditModel};
use crate::quadrature::Quadrature;
use crate::response_data::{ResponseData, ResponsePattern};
use crate::scoring;
use crate::starting_values::compute_starting_values;

fn parse_model(name: &str) -> PyResult<ModelType> {
    match name.to_ascii_uppercase().as_str() {
        "1PL" | "RASCH" => Ok(ModelType::OnePl),
        "2PL" => Ok(ModelType::TwoPl),
        "3PL" => Ok(ModelType::ThreePl),
        "4PL" => Ok(ModelType::FourPl),
        "PCM" => Ok(ModelType::PartialCredit),
        "GPCM" => Ok(ModelType::GeneralizedPartialCredit),
        "GRM" => Ok(ModelType::GradedResponse),
        other => Err(PyValueError::new_err(format!("unknown model '{other}'"))),
    }
}

fn logistic_slot(kind: ParamKind) -> Option<usize> {
    match kind {
        ParamKind::Discrimination => Some(0),
        ParamKind::Difficulty => Some(1),
        ParamKind::Guessing => Some(2),
        ParamKind::Slipping => Some(3),
        ParamKind::Step(_) => None,
    }
}

fn config(tolerance: f64, max_iterations: usize, estimate_latent_distribution: bool) -> EstimationConfig {
    EstimationConfig::default()
        .with_tolerance(tolerance)
        .with_max_iterations(max_iterations)
        .with_latent_distribution(estimate_latent_distribution)
}

/// Fit a 1PL-4PL model by MMLE/EM.
///
/// Returns `(params, se, log_likelihood, iterations, converged)` where `params`
/// and `se` have columns `(a, b, c, d)`; `se` is NaN for parameters held fixed.
#[pyfunction]
#[pyo3(signature = (responses, model="2PL", scaling=1.0, n_quadpts=41, tolerance=1e-4, max_iterations=500, estimate_latent_distribution=false))]
#[allow(clippy::too_many_arguments, clippy::type_complexity)]
pub fn mmle_fit_logistic<'py>(
    py: Python<'py>,
    responses: PyReadonlyArray2<i32>,
    model: &str,
    scaling: f64,
    n_quadpts: usize,
    tolerance: f64,
    max_iterations: usize,
    estimate_latent_distribution: bool,
) -> PyResult<(
    Bound<'py, PyArray2<f64>>,
    Bound<'py, PyArray2<f64>>,
    f64,
    usize,
    bool,
)> {
    let model_type = parse_model(model)?;
    if !model_type.is_binary() {
        return Err(PyValueError::new_err(format!("{model} is not a binary model")));
    }
    let data = ResponseData::from_matrix(responses.as_array())?;
    let config = config(tolerance, max_iterations, estimate_latent_distribution);

    let result = py.detach(|| -> Result<_, IrtError> {
        let template = LogisticModel::new(model_type, 1.0, 0.0, 0.0, 1.0)?
            .with_scaling_constant(scaling)?;
        let mut items = vec![template; data.n_items()];
        compute_starting_values(&data, &mut items)?;
        let quadrature = Quadrature::normal(-6.0, 6.0, n_quadpts)?;
        Ok(MmleEstimator::new(&data, items, quadrature, config)?.fit())
    })?;

    let n_items = result.items.len();
    let mut params = Array2::from_elem((n_items, 4), f64::NAN);
    let mut se = Array2::from_elem((n_items, 4), f64::NAN);
    for (j, item) in result.items.iter().enumerate() {
        params[[j, 0]] = item.discrimination();
        params[[j, 1]] = item.difficulty();
        params[[j, 2]] = item.guessing();
        params[[j, 3]] = item.slipping();
        for (kind, &s) in item.parameter_kinds().into_iter().zip(item.standard_errors()) {
            if let Some(col) = logistic_slot(kind) {
                se[[j, col]] = s;
            }
        }
    }
    Ok((
        params.to_pyarray(py),
        se.to_pyarray(py),
        result.log_likelihood,
        result.iterations,
        result.status == TerminationStatus::Converged,
    ))
}

/// Fit PCM, GPCM or GRM items by MMLE/EM. Each item's category count is taken
/// from its largest observed code.
///
/// Returns `(discrimination, steps, log_likelihood, iterations, converged)`;
/// `steps` is padded with NaN for items with fewer categories.
#[pyfunction]
#[pyo3(signature = (responses, model="GPCM", n_quadpts=41, tolerance=1e-4, max_iterations=500))]
#[allow(clippy::type_complexity)]
pub fn mmle_fit_polytomous<'py>(
    py: Python<'py>,
    responses: PyReadonlyArray2<i32>,
    model: &str,
    n_quadpts: usize,
    tolerance: f64,
    max_iterations: usize,
) -> PyResult<(
    Bound<'py, PyArray1<f64>>,
    Bound<'py, PyArray2<f64>>,
    f64,
    usize,
    bool,
)> {
    let model_type = parse_model(model)?;
    if model_type.is_binary() {
        return Err(PyValueError::new_err(format!("{model} is not a polytomous model")));
    }
    let view = responses.as_array();
    let max_steps: Vec<usize> = view
        .columns()
        .into_iter()
        .map(|col| col.iter().copied().max().unwrap_or(0).max(1) as usize)
        .collect();
    let data = ResponseData::from_matrix(view)?;
    let config = config(tolerance, max_iterations, false);

    let result = py.detach(|| -> Result<_, IrtError> {
        let mut items = Vec::with_capacity(max_steps.len());
        for &m in &max_steps {
            let steps: Vec<f64> = (0..m).map(|k| k as f64 - 0.5 * (m - 1) as f64).collect();
            let item: ItemModel = match model_type {
                ModelType::PartialCredit => PartialCreditModel::pcm(steps)?.into(),
                ModelType::GeneralizedPartialCredit => PartialCreditModel::gpcm(1.0, steps)?.into(),
                _ => GradedResponseModel::new(1.0, steps)?.into(),
            };
            items.push(item);
        }
        compute_starting_values(&data, &mut items)?;
        let quadrature = Quadrature::normal(-6.0, 6.0, n_quadpts)?;
        Ok(MmleEstimator::new(&data, items, quadrature, config)?.fit())
    })?;

    let width = max_steps.iter().copied().max().unwrap_or(1);
    let mut discrimination = Array1::from_elem(result.items.len(), f64::NAN);
    let mut steps = Array2::from_elem((result.items.len(), width), f64::NAN);
    for (j, item) in result.items.iter().enumerate() {
        let (a, b) = match item {
            ItemModel::PartialCredit(m) => (m.discrimination(), m.steps()),
            ItemModel::Graded(m) => (m.discrimination(), m.thresholds()),
            ItemModel::Logistic(_) => continue,
        };
        discrimination[j] = a;
        for (k, &v) in b.iter().enumerate() {
            steps[[j, k]] = v;
        }
    }
    Ok((
        discrimination.to_pyarray(py),
        steps.to_pyarray(py),
        result.log_likelihood,
        result.iterations,
        result.status == TerminationStatus::Converged,
    ))
}

fn check_length(expected: usize, got: usize) -> Result<(), IrtError> {
    if expected != got {
        return Err(IrtError::LengthMismatch { expected, got });
    }
    Ok(())
}

/// EAP scores for every row of `responses` under 2PL/3PL items.
#[pyfunction]
#[pyo3(signature = (responses, discrimination, difficulty, guessing=None, n_quadpts=61))]
#[allow(clippy::type_complexity)]
pub fn eap_scores<'py>(
    py: Python<'py>,
    responses: PyReadonlyArray2<i32>,
    discrimination: PyReadonlyArray1<f64>,
    difficulty: PyReadonlyArray1<f64>,
    guessing: Option<PyReadonlyArray1<f64>>,
    n_quadpts: usize,
) -> PyResult<(Bound<'py, PyArray1<f64>>, Bound<'py, PyArray1<f64>>)> {
    let a = discrimination.as_array().to_vec();
    let b = difficulty.as_array().to_vec();
    let c = guessing.map(|g| g.as_array().to_vec());
    check_length(a.len(), b.len())?;
    if let Some(c) = &c {
        check_length(a.len(), c.len())?;
    }
    let patterns = responses
        .as_array()
        .rows()
        .into_iter()
        .map(|row| ResponsePattern::new(row.to_vec(), 1.0))
        .collect::<Result<Vec<_>, _>>()?;
    let data = ResponseData::new(patterns)?;

    let scores = py.detach(|| -> Result<_, IrtError> {
        let items = (0..a.len())
            .map(|j| match &c {
                Some(c) => LogisticModel::three_pl(a[j], b[j], c[j]),
                None => LogisticModel::two_pl(a[j], b[j]),
            })
            .collect::<Result<Vec<_>, _>>()?;
        let quadrature = Quadrature::normal(-6.0, 6.0, n_quadpts)?;
        scoring::eap_scores(&data, &items, &quadrature)
    })?;

    let theta: Array1<f64> = scores.iter().map(|s| s.theta).collect();
    let se: Array1<f64> = scores.iter().map(|s| s.se).collect();
    Ok((theta.to_pyarray(py), se.to_pyarray(py)))
}

/// Normal quadrature `(points, weights)` on `[min, max]`.
#[pyfunction]
#[pyo3(signature = (n_points=41, min=-6.0, max=6.0))]
pub fn quadrature_normal<'py>(
    py: Python<'py>,
    n_points: usize,
    min: f64,
    max: f64,
) -> PyResult<(Bound<'py, PyArray1<f64>>, Bound<'py, PyArray1<f64>>)> {
    let q = Quadrature::normal(min, max, n_points)?;
    Ok((
        Array1::from(q.points().to_vec()).to_pyarray(py),
        Array1::from(q.weights().to_vec()).to_pyarray(py),
    ))
}

pub fn register(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(mmle_fit_logistic, m)?)?;
    m.add_function(wrap_pyfunction!(mmle_fit_polytomous, m)?)?;
    m.add_function(wrap_pyfunction!(eap_scores, m)?)?;
    m.add_function(wrap_pyfunction!(quadrature_normal, m)?)?;
    Ok(())
}
