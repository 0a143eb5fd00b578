//! Crate-wide error type.
//!
//! Only precondition violations surface as errors. Numerical degeneracy inside
//! an estimation run is resolved locally (clamping, NaN sentinels) and never
//! reaches this type.

use thiserror::Error;

#[cfg(feature = "python-bindings")]
use pyo3::{exceptions::PyValueError, PyErr};

pub type Result<T> = std::result::Result<T, IrtError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum IrtError {
    #[error("quadrature needs at least {min} points, got {got}")]
    TooFewPoints { min: usize, got: usize },

    #[error("invalid quadrature range: min ({min}) must be finite and less than max ({max})")]
    InvalidRange { min: f64, max: f64 },

    #[error("quadrature weight at node {index} is negative or non-finite: {weight}")]
    InvalidWeight { index: usize, weight: f64 },

    #[error("quadrature weights must sum to 1, got {0}")]
    WeightsDoNotSumToOne(f64),

    #[error("length mismatch: expected {expected}, got {got}")]
    LengthMismatch { expected: usize, got: usize },

    #[error("response data contains no patterns")]
    EmptyData,

    #[error("response pattern {pattern} has {got} items, expected {expected}")]
    PatternLength {
        pattern: usize,
        expected: usize,
        got: usize,
    },

    #[error("response pattern frequency must be positive and finite, got {0}")]
    InvalidFrequency(f64),

    #[error("response scoring fault: item {item} has category {category}, model accepts 0..{n_categories}")]
    CategoryOutOfRange {
        item: usize,
        category: i32,
        n_categories: usize,
    },

    #[error("{models} item models supplied for {items} items of response data")]
    ItemCountMismatch { models: usize, items: usize },

    #[error("invalid item parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("invalid prior: {0}")]
    InvalidPrior(String),

    #[error("model does not estimate parameter {0}")]
    ParameterNotEstimated(&'static str),

    #[error("invalid linear transformation: slope must be positive and finite, got {0}")]
    InvalidSlope(f64),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl IrtError {
    pub(crate) fn parameter(name: &'static str, reason: impl Into<String>) -> Self {
        IrtError::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}

#[cfg(feature = "python-bindings")]
impl From<IrtError> for PyErr {
    fn from(err: IrtError) -> PyErr {
        PyValueError::new_err(err.to_string())
    }
}
