//! Marginal maximum likelihood estimation by EM.
//!
//! One iteration runs an E-step over every distinct response pattern, an
//! independent M-step per item that writes only to the item's proposal slot,
//! and then a synchronous acceptance across all items. The largest accepted
//! change is the iteration's delta; estimation stops when it drops below the
//! tolerance or when the iteration cap is reached.

use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{IrtError, Result};
use crate::estep::{e_step, EStepResult};
use crate::irm::{ItemModel, ItemResponseModel};
use crate::mstep::{maximize_item, MStepConfig};
use crate::quadrature::Quadrature;
use crate::response_data::ResponseData;
use crate::standard_errors::item_standard_errors;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimationConfig {
    /// Convergence threshold on the largest parameter change of an iteration.
    pub tolerance: f64,
    pub max_iterations: usize,
    /// Re-estimate quadrature weights from the posterior node mass each iteration.
    pub estimate_latent_distribution: bool,
    pub compute_standard_errors: bool,
    /// Item-parallel M-step and chunked pattern-parallel E-step.
    pub parallel: bool,
    pub m_step: MStepConfig,
}

impl Default for EstimationConfig {
    fn default() -> Self {
        EstimationConfig {
            tolerance: 1e-4,
            max_iterations: 500,
            estimate_latent_distribution: false,
            compute_standard_errors: true,
            parallel: true,
            m_step: MStepConfig::default(),
        }
    }
}

impl EstimationConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(IrtError::InvalidConfig(format!(
                "tolerance must be positive, got {}",
                self.tolerance
            )));
        }
        if self.max_iterations == 0 {
            return Err(IrtError::InvalidConfig(
                "max_iterations must be at least 1".into(),
            ));
        }
        self.m_step.validate()
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_latent_distribution(mut self, estimate: bool) -> Self {
        self.estimate_latent_distribution = estimate;
        self
    }

    pub fn with_standard_errors(mut self, compute: bool) -> Self {
        self.compute_standard_errors = compute;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_m_step(mut self, m_step: MStepConfig) -> Self {
        self.m_step = m_step;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminationStatus {
    Converged,
    MaxIterReached,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    Initialized,
    Iterating,
    Converged,
    MaxIterReached,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IterationPhase {
    Started,
    Completed,
}

/// Progress notification. On `Started`, `delta` and `log_likelihood` carry the
/// previous iteration's values (NaN before the first).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IterationEvent {
    pub iteration: usize,
    pub phase: IterationPhase,
    pub delta: f64,
    pub log_likelihood: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct IterationSummary {
    /// 1-based.
    pub iteration: usize,
    pub delta: f64,
    /// Marginal log-likelihood at the parameters entering this iteration.
    pub log_likelihood: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EstimationResult<M = ItemModel> {
    pub items: Vec<M>,
    pub quadrature: Quadrature,
    /// Largest parameter change of each iteration.
    pub iteration_record: Vec<f64>,
    pub log_likelihood_history: Vec<f64>,
    pub status: TerminationStatus,
    /// Marginal log-likelihood at the final parameters, priors excluded.
    pub log_likelihood: f64,
    pub iterations: usize,
    pub n_parameters: usize,
    pub aic: f64,
    pub bic: f64,
    pub latent_mean: f64,
    pub latent_sd: f64,
    /// Items without response variance, held at their starting values.
    pub extreme_items: Vec<usize>,
}

type Listener<'a> = Box<dyn FnMut(&IterationEvent) + 'a>;

pub struct MmleEstimator<'a, M: ItemResponseModel + Clone = ItemModel> {
    data: &'a ResponseData,
    items: Vec<M>,
    quadrature: Quadrature,
    config: EstimationConfig,
    state: EngineState,
    iteration_record: Vec<f64>,
    log_likelihood_history: Vec<f64>,
    extreme: Vec<bool>,
    listener: Option<Listener<'a>>,
}

impl<'a, M: ItemResponseModel + Clone> MmleEstimator<'a, M> {
    pub fn new(
        data: &'a ResponseData,
        items: Vec<M>,
        quadrature: Quadrature,
        config: EstimationConfig,
    ) -> Result<Self> {
        config.validate()?;
        data.validate_for(&items)?;
        let extreme: Vec<bool> = (0..items.len()).map(|j| data.is_extreme_item(j)).collect();
        for (j, _) in extreme.iter().enumerate().filter(|(_, &e)| e) {
            log::warn!("item {j} has no response variance; holding it at its starting values");
        }
        Ok(MmleEstimator {
            data,
            items,
            quadrature,
            config,
            state: EngineState::Initialized,
            iteration_record: Vec::new(),
            log_likelihood_history: Vec::new(),
            extreme,
            listener: None,
        })
    }

    /// Register a callback invoked before and after every iteration.
    pub fn with_listener(mut self, listener: impl FnMut(&IterationEvent) + 'a) -> Self {
        self.listener = Some(Box::new(listener));
        self
    }

    pub fn items(&self) -> &[M] {
        &self.items
    }

    pub fn quadrature(&self) -> &Quadrature {
        &self.quadrature
    }

    pub fn config(&self) -> &EstimationConfig {
        &self.config
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn iteration_record(&self) -> &[f64] {
        &self.iteration_record
    }

    pub fn log_likelihood_history(&self) -> &[f64] {
        &self.log_likelihood_history
    }

    fn notify(&mut self, event: IterationEvent) {
        if let Some(listener) = self.listener.as_mut() {
            listener(&event);
        }
    }

    /// One E-step, M-step and synchronous acceptance.
    pub fn iterate_once(&mut self) -> IterationSummary {
        let iteration = self.iteration_record.len() + 1;
        self.notify(IterationEvent {
            iteration,
            phase: IterationPhase::Started,
            delta: self.iteration_record.last().copied().unwrap_or(f64::NAN),
            log_likelihood: self.log_likelihood_history.last().copied().unwrap_or(f64::NAN),
        });

        let estep = e_step(self.data, &self.items, &self.quadrature, self.config.parallel);
        let log_likelihood = estep.log_likelihood;

        propose(
            &mut self.items,
            &estep.expected,
            self.quadrature.points(),
            &self.extreme,
            &self.config,
        );
        let delta = self
            .items
            .iter_mut()
            .map(|item| item.accept_all_proposal_values())
            .fold(0.0, f64::max);

        if self.config.estimate_latent_distribution {
            if let Err(err) = self.quadrature.reestimate_weights(&estep.node_mass) {
                log::warn!("latent distribution left unchanged: {err}");
            }
        }

        self.iteration_record.push(delta);
        self.log_likelihood_history.push(log_likelihood);
        log::debug!("EM iteration {iteration}: delta {delta:.3e}, log-likelihood {log_likelihood:.6}");
        self.notify(IterationEvent {
            iteration,
            phase: IterationPhase::Completed,
            delta,
            log_likelihood,
        });
        IterationSummary {
            iteration,
            delta,
            log_likelihood,
        }
    }

    /// Iterate until convergence or the iteration cap.
    pub fn estimate(&mut self) -> TerminationStatus {
        self.state = EngineState::Iterating;
        let mut run = 0;
        loop {
            let summary = self.iterate_once();
            run += 1;
            if summary.delta < self.config.tolerance {
                self.state = EngineState::Converged;
                log::info!("EM converged after {} iterations", summary.iteration);
                return TerminationStatus::Converged;
            }
            if run >= self.config.max_iterations {
                self.state = EngineState::MaxIterReached;
                log::warn!(
                    "EM stopped at the iteration cap ({}) with delta {:.3e}",
                    self.config.max_iterations,
                    summary.delta
                );
                return TerminationStatus::MaxIterReached;
            }
        }
    }

    /// Final E-step, standard errors and fit statistics.
    pub fn finish(mut self) -> EstimationResult<M> {
        let status = match self.state {
            EngineState::Converged => TerminationStatus::Converged,
            _ => TerminationStatus::MaxIterReached,
        };
        let estep = e_step(self.data, &self.items, &self.quadrature, self.config.parallel);
        if self.config.compute_standard_errors {
            assign_standard_errors(
                &mut self.items,
                &estep,
                self.quadrature.points(),
                &self.extreme,
                self.config.parallel,
            );
        }

        let mut n_parameters: usize = self
            .items
            .iter()
            .zip(&self.extreme)
            .filter(|(item, &extreme)| !item.is_fixed() && !extreme)
            .map(|(item, _)| item.n_free_parameters())
            .sum();
        if self.config.estimate_latent_distribution {
            n_parameters += self.quadrature.len() - 1;
        }
        let log_likelihood = estep.log_likelihood;
        let n_obs = self.data.total_frequency();
        let k = n_parameters as f64;
        let aic = -2.0 * log_likelihood + 2.0 * k;
        let bic = -2.0 * log_likelihood + k * n_obs.ln();
        log::info!(
            "EM finished: {:?} after {} iterations, log-likelihood {:.6}",
            status,
            self.iteration_record.len(),
            log_likelihood
        );

        EstimationResult {
            latent_mean: self.quadrature.mean(),
            latent_sd: self.quadrature.std_dev(),
            iterations: self.iteration_record.len(),
            extreme_items: self
                .extreme
                .iter()
                .enumerate()
                .filter(|(_, &e)| e)
                .map(|(j, _)| j)
                .collect(),
            items: self.items,
            quadrature: self.quadrature,
            iteration_record: self.iteration_record,
            log_likelihood_history: self.log_likelihood_history,
            status,
            log_likelihood,
            n_parameters,
            aic,
            bic,
        }
    }

    /// [`estimate`](Self::estimate) followed by [`finish`](Self::finish).
    pub fn fit(mut self) -> EstimationResult<M> {
        self.estimate();
        self.finish()
    }
}

fn propose<M: ItemResponseModel + Clone>(
    items: &mut [M],
    expected: &[Array2<f64>],
    theta: &[f64],
    extreme: &[bool],
    config: &EstimationConfig,
) {
    let step = |(j, item): (usize, &mut M)| {
        if item.is_fixed() || extreme[j] {
            return;
        }
        let outcome = maximize_item(&*item, theta, &expected[j], &config.m_step);
        if outcome.used_gradient_fallback {
            log::warn!("item {j}: singular information matrix, used a gradient step");
        }
        item.set_proposal_parameters(&outcome.parameters);
    };
    if config.parallel {
        items.par_iter_mut().enumerate().for_each(step);
    } else {
        items.iter_mut().enumerate().for_each(step);
    }
}

fn assign_standard_errors<M: ItemResponseModel + Clone>(
    items: &mut [M],
    estep: &EStepResult,
    theta: &[f64],
    extreme: &[bool],
    parallel: bool,
) {
    let assign = |(j, item): (usize, &mut M)| {
        let se = if extreme[j] && !item.is_fixed() {
            vec![f64::NAN; item.n_free_parameters()]
        } else {
            item_standard_errors(&*item, theta, &estep.expected[j])
        };
        if se.iter().any(|s| s.is_nan()) {
            log::warn!("item {j}: some standard errors are undefined");
        }
        item.set_standard_errors(se);
    };
    if parallel {
        items.par_iter_mut().enumerate().for_each(assign);
    } else {
        items.iter_mut().enumerate().for_each(assign);
    }
}
