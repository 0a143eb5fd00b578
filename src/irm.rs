//! The item response model capability interface.
//!
//! Every item family exposes the same surface: category probabilities,
//! analytic gradients with respect to its free parameters, theta derivatives
//! and information, metric rescaling, and a two-phase current/proposal
//! parameter lifecycle. The EM engine only ever talks to this trait.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::logistic::LogisticModel;
use crate::polytomous::{GradedResponseModel, PartialCreditModel};
use crate::priors::ItemParamPrior;
use crate::utils::EPSILON;

/// Logistic metric.
pub const LOGISTIC_SCALE: f64 = 1.0;
/// Normal-ogive approximation.
pub const NORMAL_OGIVE_SCALE: f64 = 1.7;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelType {
    OnePl,
    TwoPl,
    ThreePl,
    FourPl,
    PartialCredit,
    GeneralizedPartialCredit,
    GradedResponse,
}

impl ModelType {
    pub fn is_binary(self) -> bool {
        matches!(
            self,
            ModelType::OnePl | ModelType::TwoPl | ModelType::ThreePl | ModelType::FourPl
        )
    }
}

/// Identifies a free parameter inside an item's parameter vector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParamKind {
    Discrimination,
    Difficulty,
    Guessing,
    Slipping,
    /// Step (PCM/GPCM) or threshold (GRM) parameter, 1-based.
    Step(usize),
}

impl ParamKind {
    pub fn name(self) -> &'static str {
        match self {
            ParamKind::Discrimination => "discrimination",
            ParamKind::Difficulty => "difficulty",
            ParamKind::Guessing => "guessing",
            ParamKind::Slipping => "slipping",
            ParamKind::Step(_) => "step",
        }
    }

    /// Whether a linear change of metric multiplies this parameter by the slope
    /// (locations) or divides it (discrimination). Asymptotes are invariant.
    fn metric_role(self) -> MetricRole {
        match self {
            ParamKind::Discrimination => MetricRole::Slope,
            ParamKind::Difficulty | ParamKind::Step(_) => MetricRole::Location,
            ParamKind::Guessing | ParamKind::Slipping => MetricRole::Invariant,
        }
    }
}

enum MetricRole {
    Slope,
    Location,
    Invariant,
}

/// Rescale standard errors after `theta* = slope * theta + intercept`.
pub(crate) fn rescale_standard_errors(kinds: &[ParamKind], se: &mut [f64], slope: f64) {
    for (kind, s) in kinds.iter().zip(se.iter_mut()) {
        match kind.metric_role() {
            MetricRole::Slope => *s /= slope,
            MetricRole::Location => *s *= slope,
            MetricRole::Invariant => {}
        }
    }
}

pub trait ItemResponseModel: std::fmt::Debug + Send + Sync {
    fn model_type(&self) -> ModelType;

    fn n_categories(&self) -> usize;

    /// The fixed scaling constant `D`.
    fn scaling_constant(&self) -> f64;

    fn probability(&self, theta: f64, category: usize) -> f64;

    fn probabilities(&self, theta: f64) -> Vec<f64> {
        (0..self.n_categories())
            .map(|k| self.probability(theta, k))
            .collect()
    }

    fn expected_value(&self, theta: f64) -> f64 {
        self.probabilities(theta)
            .iter()
            .enumerate()
            .map(|(k, p)| k as f64 * p)
            .sum()
    }

    /// Partial derivatives of `probability(theta, category)` with respect to
    /// each free parameter, in `parameter_kinds()` order.
    fn gradient(&self, theta: f64, category: usize) -> Vec<f64>;

    /// d probability(theta, category) / d theta.
    fn probability_deriv_theta(&self, theta: f64, category: usize) -> f64;

    /// d expected_value / d theta.
    fn deriv_theta(&self, theta: f64) -> f64 {
        (0..self.n_categories())
            .map(|k| k as f64 * self.probability_deriv_theta(theta, k))
            .sum()
    }

    fn item_information_at(&self, theta: f64) -> f64 {
        let info: f64 = (0..self.n_categories())
            .map(|k| {
                let p = self.probability(theta, k);
                if p < EPSILON {
                    0.0
                } else {
                    let dp = self.probability_deriv_theta(theta, k);
                    dp * dp / p
                }
            })
            .sum();
        if info.is_finite() {
            info.max(0.0)
        } else {
            0.0
        }
    }

    /// Apply `theta* = slope * theta + intercept` to the item's parameters.
    fn scale(&mut self, intercept: f64, slope: f64) -> Result<()>;

    fn parameter_kinds(&self) -> Vec<ParamKind>;

    fn n_free_parameters(&self) -> usize {
        self.parameter_kinds().len()
    }

    /// Current values of the free parameters.
    fn parameters(&self) -> Vec<f64>;

    /// Overwrite the current free parameters directly, bypassing proposals.
    /// Used for initialization and for scratch copies inside the M-step.
    fn set_parameters(&mut self, values: &[f64]) -> Result<()>;

    fn proposal_parameters(&self) -> Vec<f64>;

    /// No-op when the item is fixed.
    fn set_proposal_parameters(&mut self, values: &[f64]);

    /// Commit proposals and return the largest absolute change.
    fn accept_all_proposal_values(&mut self) -> f64;

    /// Project a candidate parameter vector into the feasible region. Returns
    /// `false` if no feasible projection exists.
    fn constrain(&self, values: &mut [f64]) -> bool;

    fn prior(&self, index: usize) -> Option<&ItemParamPrior>;

    fn log_prior(&self, values: &[f64]) -> f64 {
        values
            .iter()
            .enumerate()
            .filter_map(|(i, &v)| self.prior(i).map(|p| p.log_density(v)))
            .sum()
    }

    fn is_fixed(&self) -> bool;

    fn set_fixed(&mut self, fixed: bool);

    /// Standard errors aligned with `parameter_kinds()`; empty before estimation.
    fn standard_errors(&self) -> &[f64];

    fn set_standard_errors(&mut self, standard_errors: Vec<f64>);

    /// Seed the current parameters from classical statistics. `thresholds`
    /// holds one location for binary items and one per step otherwise.
    fn set_starting_values(&mut self, discrimination: f64, thresholds: &[f64]);
}

/// Closed set of supported item families.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ItemModel {
    Logistic(LogisticModel),
    PartialCredit(PartialCreditModel),
    Graded(GradedResponseModel),
}

impl From<LogisticModel> for ItemModel {
    fn from(m: LogisticModel) -> Self {
        ItemModel::Logistic(m)
    }
}

impl From<PartialCreditModel> for ItemModel {
    fn from(m: PartialCreditModel) -> Self {
        ItemModel::PartialCredit(m)
    }
}

impl From<GradedResponseModel> for ItemModel {
    fn from(m: GradedResponseModel) -> Self {
        ItemModel::Graded(m)
    }
}

macro_rules! dispatch {
    ($self:expr, $m:ident => $body:expr) => {
        match $self {
            ItemModel::Logistic($m) => $body,
            ItemModel::PartialCredit($m) => $body,
            ItemModel::Graded($m) => $body,
        }
    };
}

impl ItemResponseModel for ItemModel {
    fn model_type(&self) -> ModelType {
        dispatch!(self, m => m.model_type())
    }

    fn n_categories(&self) -> usize {
        dispatch!(self, m => m.n_categories())
    }

    fn scaling_constant(&self) -> f64 {
        dispatch!(self, m => m.scaling_constant())
    }

    fn probability(&self, theta: f64, category: usize) -> f64 {
        dispatch!(self, m => m.probability(theta, category))
    }

    fn probabilities(&self, theta: f64) -> Vec<f64> {
        dispatch!(self, m => m.probabilities(theta))
    }

    fn expected_value(&self, theta: f64) -> f64 {
        dispatch!(self, m => m.expected_value(theta))
    }

    fn gradient(&self, theta: f64, category: usize) -> Vec<f64> {
        dispatch!(self, m => m.gradient(theta, category))
    }

    fn probability_deriv_theta(&self, theta: f64, category: usize) -> f64 {
        dispatch!(self, m => m.probability_deriv_theta(theta, category))
    }

    fn deriv_theta(&self, theta: f64) -> f64 {
        dispatch!(self, m => m.deriv_theta(theta))
    }

    fn item_information_at(&self, theta: f64) -> f64 {
        dispatch!(self, m => m.item_information_at(theta))
    }

    fn scale(&mut self, intercept: f64, slope: f64) -> Result<()> {
        dispatch!(self, m => m.scale(intercept, slope))
    }

    fn parameter_kinds(&self) -> Vec<ParamKind> {
        dispatch!(self, m => m.parameter_kinds())
    }

    fn parameters(&self) -> Vec<f64> {
        dispatch!(self, m => m.parameters())
    }

    fn set_parameters(&mut self, values: &[f64]) -> Result<()> {
        dispatch!(self, m => m.set_parameters(values))
    }

    fn proposal_parameters(&self) -> Vec<f64> {
        dispatch!(self, m => m.proposal_parameters())
    }

    fn set_proposal_parameters(&mut self, values: &[f64]) {
        dispatch!(self, m => m.set_proposal_parameters(values))
    }

    fn accept_all_proposal_values(&mut self) -> f64 {
        dispatch!(self, m => m.accept_all_proposal_values())
    }

    fn constrain(&self, values: &mut [f64]) -> bool {
        dispatch!(self, m => m.constrain(values))
    }

    fn prior(&self, index: usize) -> Option<&ItemParamPrior> {
        dispatch!(self, m => m.prior(index))
    }

    fn is_fixed(&self) -> bool {
        dispatch!(self, m => m.is_fixed())
    }

    fn set_fixed(&mut self, fixed: bool) {
        dispatch!(self, m => m.set_fixed(fixed))
    }

    fn standard_errors(&self) -> &[f64] {
        dispatch!(self, m => m.standard_errors())
    }

    fn set_standard_errors(&mut self, standard_errors: Vec<f64>) {
        dispatch!(self, m => m.set_standard_errors(standard_errors))
    }

    fn set_starting_values(&mut self, discrimination: f64, thresholds: &[f64]) {
        dispatch!(self, m => m.set_starting_values(discrimination, thresholds))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_dispatch_reaches_each_family() {
        let items: Vec<ItemModel> = vec![
            LogisticModel::three_pl(1.2, -0.5, 0.2).unwrap().into(),
            PartialCreditModel::gpcm(0.9, vec![-1.0, 0.3, 1.1]).unwrap().into(),
            GradedResponseModel::new(1.4, vec![-0.8, 0.6]).unwrap().into(),
        ];
        let expected = [ModelType::ThreePl, ModelType::GeneralizedPartialCredit, ModelType::GradedResponse];
        for (item, ty) in items.iter().zip(expected) {
            assert_eq!(item.model_type(), ty);
            let total: f64 = item.probabilities(0.4).iter().sum();
            assert!((total - 1.0).abs() < 1e-12);
            assert_eq!(item.gradient(0.4, 0).len(), item.n_free_parameters());
        }
        assert_eq!(items[1].n_categories(), 4);
    }

    #[test]
    fn standard_errors_follow_metric_roles() {
        let kinds = [
            ParamKind::Discrimination,
            ParamKind::Difficulty,
            ParamKind::Guessing,
        ];
        let mut se = [0.2, 0.4, 0.05];
        rescale_standard_errors(&kinds, &mut se, 2.0);
        assert_eq!(se, [0.1, 0.8, 0.05]);
    }
}
