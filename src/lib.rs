//! Marginal maximum likelihood estimation of unidimensional IRT models.
//!
//! This crate provides:
//! - Binary 1PL-4PL, partial credit (PCM/GPCM) and graded response item models
//!   with analytic gradients
//! - Fixed-form, Gauss-Hermite and user-supplied quadrature for the latent trait
//! - Beta, log-normal and normal item parameter priors
//! - Classical starting values
//! - The EM engine with synchronous parameter acceptance, optional latent
//!   distribution re-estimation and item standard errors
//! - EAP scoring, test information, metric transformations and simulation
//! - Optional Python bindings (feature `python-bindings`)

pub mod utils;

pub mod equating;
pub mod error;
pub mod estep;
pub mod estimation;
pub mod irm;
pub mod logistic;
pub mod mstep;
pub mod polytomous;
pub mod priors;
pub mod quadrature;
pub mod response_data;
pub mod scoring;
pub mod simulation;
pub mod standard_errors;
pub mod starting_values;

#[cfg(feature = "python-bindings")]
pub mod python;

pub use equating::LinearTransformation;
pub use error::{IrtError, Result};
pub use estimation::{
    EngineState, EstimationConfig, EstimationResult, IterationEvent, IterationPhase,
    IterationSummary, MmleEstimator, TerminationStatus,
};
pub use irm::{ItemModel, ItemResponseModel, ModelType, ParamKind, LOGISTIC_SCALE, NORMAL_OGIVE_SCALE};
pub use logistic::LogisticModel;
pub use mstep::MStepConfig;
pub use polytomous::{GradedResponseModel, PartialCreditModel};
pub use priors::ItemParamPrior;
pub use quadrature::Quadrature;
pub use response_data::{ResponseData, ResponsePattern, MISSING};
pub use scoring::{eap_scores, PersonScore};
pub use starting_values::{compute_starting_values, ItemStatistics};

#[cfg(feature = "python-bindings")]
use pyo3::prelude::*;

/// Python module for irt_mmle
#[cfg(feature = "python-bindings")]
#[pymodule]
fn irt_mmle(m: &Bound<'_, PyModule>) -> PyResult<()> {
    python::register(m)?;
    Ok(())
}
