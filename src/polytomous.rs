//! Ordered polytomous items: partial credit (PCM/GPCM) and graded response (GRM).
//!
//! Both families carry a discrimination and `m` location parameters for
//! `m + 1` ordered categories scored `0..=m`.
//!
//! - GPCM: `P_k ∝ exp(sum_{v<=k} D a (theta - b_v))`, evaluated as a
//!   log-softmax with the maximum exponent subtracted. PCM holds `a` fixed.
//! - GRM: `P*_k = sigmoid(D a (theta - b_k))`, `P_k = P*_k - P*_{k+1}`, with the
//!   difference taken without cancellation.

use serde::{Deserialize, Serialize};

use crate::error::{IrtError, Result};
use crate::irm::{rescale_standard_errors, ItemResponseModel, ModelType, ParamKind, LOGISTIC_SCALE};
use crate::logistic::{MAX_DISCRIMINATION, MAX_LOCATION, MIN_DISCRIMINATION};
use crate::priors::ItemParamPrior;
use crate::utils::{logsumexp, sigmoid, sigmoid_difference};

/// Smallest admissible gap between adjacent graded thresholds.
pub const MIN_THRESHOLD_GAP: f64 = 1e-6;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepParameters {
    pub discrimination: f64,
    pub steps: Vec<f64>,
}

impl StepParameters {
    fn max_abs_change(&self, other: &StepParameters) -> f64 {
        self.steps
            .iter()
            .zip(&other.steps)
            .map(|(a, b)| (a - b).abs())
            .fold((self.discrimination - other.discrimination).abs(), f64::max)
    }

    fn rescale(&mut self, intercept: f64, slope: f64) {
        self.discrimination /= slope;
        for b in &mut self.steps {
            *b = slope * *b + intercept;
        }
    }
}

/// Parameter bookkeeping shared by both polytomous families.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct StepState {
    scaling: f64,
    free_discrimination: bool,
    current: StepParameters,
    proposal: StepParameters,
    fixed: bool,
    discrimination_prior: Option<ItemParamPrior>,
    step_prior: Option<ItemParamPrior>,
    standard_errors: Vec<f64>,
}

impl StepState {
    fn new(discrimination: f64, steps: Vec<f64>, free_discrimination: bool) -> Result<Self> {
        if !(discrimination.is_finite() && discrimination > 0.0) {
            return Err(IrtError::parameter(
                "discrimination",
                format!("must be positive and finite, got {discrimination}"),
            ));
        }
        if steps.is_empty() {
            return Err(IrtError::parameter("step", "at least one step is required"));
        }
        if steps.iter().any(|b| !b.is_finite()) {
            return Err(IrtError::parameter("step", "steps must be finite"));
        }
        let current = StepParameters {
            discrimination,
            steps,
        };
        Ok(StepState {
            scaling: LOGISTIC_SCALE,
            free_discrimination,
            proposal: current.clone(),
            current,
            fixed: false,
            discrimination_prior: None,
            step_prior: None,
            standard_errors: Vec::new(),
        })
    }

    fn n_steps(&self) -> usize {
        self.current.steps.len()
    }

    fn kinds(&self) -> Vec<ParamKind> {
        let mut kinds = Vec::with_capacity(self.n_steps() + 1);
        if self.free_discrimination {
            kinds.push(ParamKind::Discrimination);
        }
        kinds.extend((1..=self.n_steps()).map(ParamKind::Step));
        kinds
    }

    fn flatten(&self, p: &StepParameters) -> Vec<f64> {
        let mut v = Vec::with_capacity(self.n_steps() + 1);
        if self.free_discrimination {
            v.push(p.discrimination);
        }
        v.extend_from_slice(&p.steps);
        v
    }

    fn unflatten(&self, values: &[f64]) -> Result<StepParameters> {
        let expected = self.n_steps() + usize::from(self.free_discrimination);
        if values.len() != expected {
            return Err(IrtError::LengthMismatch {
                expected,
                got: values.len(),
            });
        }
        let (discrimination, steps) = if self.free_discrimination {
            (values[0], values[1..].to_vec())
        } else {
            (self.current.discrimination, values.to_vec())
        };
        Ok(StepParameters {
            discrimination,
            steps,
        })
    }

    fn set_prior(&mut self, kind: ParamKind, prior: ItemParamPrior) -> Result<()> {
        match kind {
            ParamKind::Discrimination if self.free_discrimination => {
                self.discrimination_prior = Some(prior)
            }
            ParamKind::Difficulty | ParamKind::Step(_) => self.step_prior = Some(prior),
            other => return Err(IrtError::ParameterNotEstimated(other.name())),
        }
        Ok(())
    }

    fn prior(&self, index: usize) -> Option<&ItemParamPrior> {
        if index >= self.n_steps() + usize::from(self.free_discrimination) {
            return None;
        }
        if self.free_discrimination && index == 0 {
            self.discrimination_prior.as_ref()
        } else {
            self.step_prior.as_ref()
        }
    }

    fn set_proposal(&mut self, values: &[f64], ordered: bool) {
        if let Ok(p) = self.unflatten(values) {
            self.propose(p, ordered);
        }
    }

    /// Store `p` as the proposal with discrimination and locations clamped into
    /// range. Non-finite values, and unordered steps when `ordered` is set,
    /// leave the proposal untouched.
    fn propose(&mut self, mut p: StepParameters, ordered: bool) {
        if self.fixed || !p.discrimination.is_finite() || p.steps.iter().any(|b| !b.is_finite()) {
            return;
        }
        p.discrimination = if self.free_discrimination {
            p.discrimination.clamp(MIN_DISCRIMINATION, MAX_DISCRIMINATION)
        } else {
            self.current.discrimination
        };
        for b in &mut p.steps {
            *b = b.clamp(-MAX_LOCATION, MAX_LOCATION);
        }
        if ordered && !is_ordered(&p.steps) {
            return;
        }
        self.proposal = p;
    }

    fn accept(&mut self) -> f64 {
        let delta = self.current.max_abs_change(&self.proposal);
        self.current = self.proposal.clone();
        delta
    }

    fn clamp(&self, values: &mut [f64]) -> bool {
        for (i, v) in values.iter_mut().enumerate() {
            if !v.is_finite() {
                return false;
            }
            *v = if self.free_discrimination && i == 0 {
                v.clamp(MIN_DISCRIMINATION, MAX_DISCRIMINATION)
            } else {
                v.clamp(-MAX_LOCATION, MAX_LOCATION)
            };
        }
        true
    }

    fn scale(&mut self, intercept: f64, slope: f64) -> Result<()> {
        if !(slope.is_finite() && slope > 0.0 && intercept.is_finite()) {
            return Err(IrtError::InvalidSlope(slope));
        }
        self.current.rescale(intercept, slope);
        self.proposal.rescale(intercept, slope);
        let kinds = self.kinds();
        rescale_standard_errors(&kinds, &mut self.standard_errors, slope);
        Ok(())
    }

    fn seed(&mut self, discrimination: f64, thresholds: &[f64]) {
        if self.fixed {
            return;
        }
        if self.free_discrimination && discrimination.is_finite() {
            let mut a = discrimination.clamp(MIN_DISCRIMINATION, MAX_DISCRIMINATION);
            if let Some(prior) = &self.discrimination_prior {
                a = prior.clamp_into_support(a);
            }
            self.current.discrimination = a;
        }
        for (b, &t) in self.current.steps.iter_mut().zip(thresholds) {
            if t.is_finite() {
                *b = t.clamp(-MAX_LOCATION, MAX_LOCATION);
                if let Some(prior) = &self.step_prior {
                    *b = prior.clamp_into_support(*b);
                }
            }
        }
        self.proposal = self.current.clone();
    }
}

/// Partial credit model; `generalized` frees the discrimination (GPCM).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PartialCreditModel {
    state: StepState,
}

impl PartialCreditModel {
    pub fn pcm(steps: Vec<f64>) -> Result<Self> {
        Self::pcm_with_discrimination(1.0, steps)
    }

    /// PCM with a common discrimination that is not estimated.
    pub fn pcm_with_discrimination(discrimination: f64, steps: Vec<f64>) -> Result<Self> {
        Ok(PartialCreditModel {
            state: StepState::new(discrimination, steps, false)?,
        })
    }

    pub fn gpcm(discrimination: f64, steps: Vec<f64>) -> Result<Self> {
        Ok(PartialCreditModel {
            state: StepState::new(discrimination, steps, true)?,
        })
    }

    pub fn with_scaling_constant(mut self, scaling: f64) -> Result<Self> {
        if !(scaling.is_finite() && scaling > 0.0) {
            return Err(IrtError::parameter("scaling", format!("must be positive, got {scaling}")));
        }
        self.state.scaling = scaling;
        Ok(self)
    }

    /// Attach a prior; a step prior applies to every step.
    pub fn with_prior(mut self, kind: ParamKind, prior: ItemParamPrior) -> Result<Self> {
        self.state.set_prior(kind, prior)?;
        Ok(self)
    }

    pub fn with_fixed(mut self, fixed: bool) -> Self {
        self.state.fixed = fixed;
        self
    }

    pub fn discrimination(&self) -> f64 {
        self.state.current.discrimination
    }

    pub fn steps(&self) -> &[f64] {
        &self.state.current.steps
    }

    /// Item location: the mean step.
    pub fn difficulty(&self) -> f64 {
        mean(self.steps())
    }

    pub fn set_proposal_discrimination(&mut self, discrimination: f64) {
        let mut p = self.state.proposal.clone();
        p.discrimination = discrimination;
        self.state.propose(p, false);
    }

    pub fn set_proposal_steps(&mut self, steps: &[f64]) {
        if steps.len() == self.state.n_steps() {
            let mut p = self.state.proposal.clone();
            p.steps = steps.to_vec();
            self.state.propose(p, false);
        }
    }

    fn log_numerators(&self, theta: f64) -> Vec<f64> {
        let p = &self.state.current;
        let slope = self.state.scaling * p.discrimination;
        let mut z = Vec::with_capacity(p.steps.len() + 1);
        z.push(0.0);
        let mut acc = 0.0;
        for &b in &p.steps {
            acc += slope * (theta - b);
            z.push(acc);
        }
        z
    }
}

impl ItemResponseModel for PartialCreditModel {
    fn model_type(&self) -> ModelType {
        if self.state.free_discrimination {
            ModelType::GeneralizedPartialCredit
        } else {
            ModelType::PartialCredit
        }
    }

    fn n_categories(&self) -> usize {
        self.state.n_steps() + 1
    }

    fn scaling_constant(&self) -> f64 {
        self.state.scaling
    }

    fn probability(&self, theta: f64, category: usize) -> f64 {
        self.probabilities(theta).get(category).copied().unwrap_or(0.0)
    }

    fn probabilities(&self, theta: f64) -> Vec<f64> {
        let n = self.n_categories();
        if theta.is_nan() {
            return vec![f64::NAN; n];
        }
        if theta.is_infinite() {
            let mut one_hot = vec![0.0; n];
            one_hot[if theta > 0.0 { n - 1 } else { 0 }] = 1.0;
            return one_hot;
        }
        let z = self.log_numerators(theta);
        let log_total = logsumexp(&z);
        z.into_iter().map(|v| (v - log_total).exp()).collect()
    }

    fn gradient(&self, theta: f64, category: usize) -> Vec<f64> {
        let n_free = self.n_free_parameters();
        if !theta.is_finite() || category >= self.n_categories() {
            return vec![0.0; n_free];
        }
        let p = &self.state.current;
        let probs = self.probabilities(theta);
        let d = self.state.scaling;
        let slope = d * p.discrimination;
        let pk = probs[category];
        let mut grad = Vec::with_capacity(n_free);

        if self.state.free_discrimination {
            // dz_k/da = D * sum_{v<=k} (theta - b_v)
            let mut h = Vec::with_capacity(probs.len());
            h.push(0.0);
            let mut acc = 0.0;
            for &b in &p.steps {
                acc += d * (theta - b);
                h.push(acc);
            }
            let mean_h: f64 = probs.iter().zip(&h).map(|(pj, hj)| pj * hj).sum();
            grad.push(pk * (h[category] - mean_h));
        }

        // sum_{j>=v} P_j, accumulated from the top category down
        let mut upper_tail = vec![0.0; probs.len() + 1];
        for j in (0..probs.len()).rev() {
            upper_tail[j] = upper_tail[j + 1] + probs[j];
        }
        for v in 1..=p.steps.len() {
            let own = if v <= category { 1.0 } else { 0.0 };
            grad.push(pk * slope * (upper_tail[v] - own));
        }
        grad
    }

    fn probability_deriv_theta(&self, theta: f64, category: usize) -> f64 {
        if !theta.is_finite() || category >= self.n_categories() {
            return 0.0;
        }
        let probs = self.probabilities(theta);
        let expected: f64 = probs.iter().enumerate().map(|(k, p)| k as f64 * p).sum();
        let slope = self.state.scaling * self.state.current.discrimination;
        slope * probs[category] * (category as f64 - expected)
    }

    fn item_information_at(&self, theta: f64) -> f64 {
        if !theta.is_finite() {
            return 0.0;
        }
        let probs = self.probabilities(theta);
        let expected: f64 = probs.iter().enumerate().map(|(k, p)| k as f64 * p).sum();
        let variance: f64 = probs
            .iter()
            .enumerate()
            .map(|(k, p)| p * (k as f64 - expected).powi(2))
            .sum();
        let slope = self.state.scaling * self.state.current.discrimination;
        (slope * slope * variance).max(0.0)
    }

    fn scale(&mut self, intercept: f64, slope: f64) -> Result<()> {
        self.state.scale(intercept, slope)
    }

    fn parameter_kinds(&self) -> Vec<ParamKind> {
        self.state.kinds()
    }

    fn parameters(&self) -> Vec<f64> {
        self.state.flatten(&self.state.current)
    }

    fn set_parameters(&mut self, values: &[f64]) -> Result<()> {
        let params = self.state.unflatten(values)?;
        if !(params.discrimination.is_finite() && params.discrimination > 0.0) {
            return Err(IrtError::parameter("discrimination", "must be positive and finite"));
        }
        if params.steps.iter().any(|b| !b.is_finite()) {
            return Err(IrtError::parameter("step", "steps must be finite"));
        }
        self.state.proposal = params.clone();
        self.state.current = params;
        Ok(())
    }

    fn proposal_parameters(&self) -> Vec<f64> {
        self.state.flatten(&self.state.proposal)
    }

    fn set_proposal_parameters(&mut self, values: &[f64]) {
        self.state.set_proposal(values, false);
    }

    fn accept_all_proposal_values(&mut self) -> f64 {
        self.state.accept()
    }

    fn constrain(&self, values: &mut [f64]) -> bool {
        self.state.clamp(values)
    }

    fn prior(&self, index: usize) -> Option<&ItemParamPrior> {
        self.state.prior(index)
    }

    fn is_fixed(&self) -> bool {
        self.state.fixed
    }

    fn set_fixed(&mut self, fixed: bool) {
        self.state.fixed = fixed;
    }

    fn standard_errors(&self) -> &[f64] {
        &self.state.standard_errors
    }

    fn set_standard_errors(&mut self, standard_errors: Vec<f64>) {
        self.state.standard_errors = standard_errors;
    }

    fn set_starting_values(&mut self, discrimination: f64, thresholds: &[f64]) {
        self.state.seed(discrimination, thresholds);
    }
}

/// Graded response model with strictly increasing thresholds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GradedResponseModel {
    state: StepState,
}

impl GradedResponseModel {
    pub fn new(discrimination: f64, thresholds: Vec<f64>) -> Result<Self> {
        if !is_ordered(&thresholds) {
            return Err(IrtError::parameter(
                "step",
                "graded thresholds must be strictly increasing",
            ));
        }
        Ok(GradedResponseModel {
            state: StepState::new(discrimination, thresholds, true)?,
        })
    }

    pub fn with_scaling_constant(mut self, scaling: f64) -> Result<Self> {
        if !(scaling.is_finite() && scaling > 0.0) {
            return Err(IrtError::parameter("scaling", format!("must be positive, got {scaling}")));
        }
        self.state.scaling = scaling;
        Ok(self)
    }

    pub fn with_prior(mut self, kind: ParamKind, prior: ItemParamPrior) -> Result<Self> {
        self.state.set_prior(kind, prior)?;
        Ok(self)
    }

    pub fn with_fixed(mut self, fixed: bool) -> Self {
        self.state.fixed = fixed;
        self
    }

    pub fn discrimination(&self) -> f64 {
        self.state.current.discrimination
    }

    pub fn thresholds(&self) -> &[f64] {
        &self.state.current.steps
    }

    pub fn difficulty(&self) -> f64 {
        mean(self.thresholds())
    }

    pub fn set_proposal_discrimination(&mut self, discrimination: f64) {
        let mut p = self.state.proposal.clone();
        p.discrimination = discrimination;
        self.state.propose(p, true);
    }

    /// Unordered thresholds are rejected.
    pub fn set_proposal_thresholds(&mut self, thresholds: &[f64]) {
        if thresholds.len() == self.state.n_steps() {
            let mut p = self.state.proposal.clone();
            p.steps = thresholds.to_vec();
            self.state.propose(p, true);
        }
    }

    /// Logits `D a (theta - b_k)` for `k = 1..=m`.
    fn logits(&self, theta: f64) -> Vec<f64> {
        let p = &self.state.current;
        let slope = self.state.scaling * p.discrimination;
        p.steps.iter().map(|&b| slope * (theta - b)).collect()
    }

    /// `P*_k (1 - P*_k)` padded with zeros for the fixed boundaries `k = 0, m + 1`.
    fn boundary_slopes(&self, theta: f64) -> Vec<f64> {
        let mut w = Vec::with_capacity(self.state.n_steps() + 2);
        w.push(0.0);
        w.extend(self.logits(theta).into_iter().map(|z| sigmoid(z) * sigmoid(-z)));
        w.push(0.0);
        w
    }
}

impl ItemResponseModel for GradedResponseModel {
    fn model_type(&self) -> ModelType {
        ModelType::GradedResponse
    }

    fn n_categories(&self) -> usize {
        self.state.n_steps() + 1
    }

    fn scaling_constant(&self) -> f64 {
        self.state.scaling
    }

    fn probability(&self, theta: f64, category: usize) -> f64 {
        let m = self.state.n_steps();
        if category > m {
            return 0.0;
        }
        let z = self.logits(theta);
        if category == 0 {
            sigmoid(-z[0])
        } else if category == m {
            sigmoid(z[m - 1])
        } else {
            sigmoid_difference(z[category - 1], z[category])
        }
    }

    fn probabilities(&self, theta: f64) -> Vec<f64> {
        let m = self.state.n_steps();
        let z = self.logits(theta);
        let mut probs = Vec::with_capacity(m + 1);
        probs.push(sigmoid(-z[0]));
        for k in 1..m {
            probs.push(sigmoid_difference(z[k - 1], z[k]));
        }
        probs.push(sigmoid(z[m - 1]));
        probs
    }

    fn expected_value(&self, theta: f64) -> f64 {
        self.logits(theta).into_iter().map(sigmoid).sum()
    }

    fn gradient(&self, theta: f64, category: usize) -> Vec<f64> {
        let m = self.state.n_steps();
        let mut grad = vec![0.0; m + 1];
        if !theta.is_finite() || category > m {
            return grad;
        }
        let p = &self.state.current;
        let d = self.state.scaling;
        let w = self.boundary_slopes(theta);
        // boundary k (1-based) sits at w[k]; boundaries 0 and m+1 are constant
        let d_star_da = |k: usize| {
            if k == 0 || k > m {
                0.0
            } else {
                w[k] * d * (theta - p.steps[k - 1])
            }
        };
        grad[0] = d_star_da(category) - d_star_da(category + 1);
        if category >= 1 {
            grad[category] = -w[category] * d * p.discrimination;
        }
        if category < m {
            grad[category + 1] = w[category + 1] * d * p.discrimination;
        }
        grad
    }

    fn probability_deriv_theta(&self, theta: f64, category: usize) -> f64 {
        let m = self.state.n_steps();
        if !theta.is_finite() || category > m {
            return 0.0;
        }
        let w = self.boundary_slopes(theta);
        self.state.scaling * self.state.current.discrimination * (w[category] - w[category + 1])
    }

    fn deriv_theta(&self, theta: f64) -> f64 {
        if !theta.is_finite() {
            return 0.0;
        }
        let slope = self.state.scaling * self.state.current.discrimination;
        self.boundary_slopes(theta).iter().map(|w| slope * w).sum()
    }

    fn scale(&mut self, intercept: f64, slope: f64) -> Result<()> {
        self.state.scale(intercept, slope)
    }

    fn parameter_kinds(&self) -> Vec<ParamKind> {
        self.state.kinds()
    }

    fn parameters(&self) -> Vec<f64> {
        self.state.flatten(&self.state.current)
    }

    fn set_parameters(&mut self, values: &[f64]) -> Result<()> {
        let params = self.state.unflatten(values)?;
        if !(params.discrimination.is_finite() && params.discrimination > 0.0) {
            return Err(IrtError::parameter("discrimination", "must be positive and finite"));
        }
        if params.steps.iter().any(|b| !b.is_finite()) || !is_ordered(&params.steps) {
            return Err(IrtError::parameter(
                "step",
                "graded thresholds must be finite and strictly increasing",
            ));
        }
        self.state.proposal = params.clone();
        self.state.current = params;
        Ok(())
    }

    fn proposal_parameters(&self) -> Vec<f64> {
        self.state.flatten(&self.state.proposal)
    }

    fn set_proposal_parameters(&mut self, values: &[f64]) {
        self.state.set_proposal(values, true);
    }

    fn accept_all_proposal_values(&mut self) -> f64 {
        self.state.accept()
    }

    fn constrain(&self, values: &mut [f64]) -> bool {
        self.state.clamp(values) && is_ordered(&values[1..])
    }

    fn prior(&self, index: usize) -> Option<&ItemParamPrior> {
        self.state.prior(index)
    }

    fn is_fixed(&self) -> bool {
        self.state.fixed
    }

    fn set_fixed(&mut self, fixed: bool) {
        self.state.fixed = fixed;
    }

    fn standard_errors(&self) -> &[f64] {
        &self.state.standard_errors
    }

    fn set_standard_errors(&mut self, standard_errors: Vec<f64>) {
        self.state.standard_errors = standard_errors;
    }

    fn set_starting_values(&mut self, discrimination: f64, thresholds: &[f64]) {
        let mut ordered = thresholds.to_vec();
        enforce_ordering(&mut ordered, 0.05);
        self.state.seed(discrimination, &ordered);
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn is_ordered(values: &[f64]) -> bool {
    values.windows(2).all(|w| w[1] - w[0] > MIN_THRESHOLD_GAP)
}

/// Push values up until each exceeds its predecessor by at least `gap`.
pub(crate) fn enforce_ordering(values: &mut [f64], gap: f64) {
    for k in 1..values.len() {
        if values[k] < values[k - 1] + gap {
            values[k] = values[k - 1] + gap;
        }
    }
}
