//! M-step: per-item penalized maximization of the expected complete-data
//! log-likelihood by Fisher scoring with step halving.
//!
//! For item parameters `p` and expected counts `r[k][c]` at node `theta_k` the
//! objective is `Q(p) = sum_k sum_c r[k][c] ln P_c(theta_k; p) + ln prior(p)`.
//! A candidate step is only taken when it does not decrease `Q`, so every
//! M-step is an ascent step for the EM objective.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{IrtError, Result};
use crate::irm::ItemResponseModel;
use crate::utils::{safe_ln, solve_spd, MIN_PROBABILITY};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MStepConfig {
    /// Newton iterations per item and EM cycle.
    pub max_iterations: usize,
    /// Largest absolute parameter change at which the item's Newton loop stops.
    pub tolerance: f64,
    pub max_step_halvings: usize,
    /// Initial ridge added when the information matrix is not positive definite.
    pub ridge: f64,
}

impl Default for MStepConfig {
    fn default() -> Self {
        MStepConfig {
            max_iterations: 50,
            tolerance: 1e-8,
            max_step_halvings: 20,
            ridge: 1e-8,
        }
    }
}

impl MStepConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(IrtError::InvalidConfig(
                "m-step max_iterations must be at least 1".into(),
            ));
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(IrtError::InvalidConfig(format!(
                "m-step tolerance must be positive, got {}",
                self.tolerance
            )));
        }
        if !(self.ridge.is_finite() && self.ridge > 0.0) {
            return Err(IrtError::InvalidConfig(format!(
                "m-step ridge must be positive, got {}",
                self.ridge
            )));
        }
        Ok(())
    }
}

/// What one item's M-step produced.
#[derive(Clone, Debug, PartialEq)]
pub struct MStepOutcome {
    pub parameters: Vec<f64>,
    pub objective: f64,
    pub iterations: usize,
    /// The information matrix could not be factored at some step and a
    /// gradient step was used instead.
    pub used_gradient_fallback: bool,
}

/// Expected complete-data log-likelihood of one item plus its log prior.
pub fn objective<M: ItemResponseModel>(item: &M, theta: &[f64], expected: &Array2<f64>) -> f64 {
    let mut q = 0.0;
    for (k, &t) in theta.iter().enumerate() {
        let row = expected.row(k);
        if row.iter().all(|&r| r == 0.0) {
            continue;
        }
        for (c, p) in item.probabilities(t).into_iter().enumerate() {
            let r = row[c];
            if r > 0.0 {
                q += r * safe_ln(p);
            }
        }
    }
    q + item.log_prior(&item.parameters())
}

/// Analytic score of [`objective`] and its expected (Fisher) information.
pub fn score_and_information<M: ItemResponseModel>(
    item: &M,
    theta: &[f64],
    expected: &Array2<f64>,
) -> (Vec<f64>, Vec<Vec<f64>>) {
    let n = item.n_free_parameters();
    let mut score = vec![0.0; n];
    let mut info = vec![vec![0.0; n]; n];
    for (k, &t) in theta.iter().enumerate() {
        let row = expected.row(k);
        let n_k: f64 = row.sum();
        if n_k <= 0.0 {
            continue;
        }
        let probs = item.probabilities(t);
        for (c, &p) in probs.iter().enumerate() {
            if p <= MIN_PROBABILITY {
                continue;
            }
            let grad = item.gradient(t, c);
            let r = row[c];
            for i in 0..n {
                score[i] += r * grad[i] / p;
                for j in 0..=i {
                    info[i][j] += n_k * grad[i] * grad[j] / p;
                }
            }
        }
    }
    let values = item.parameters();
    for i in 0..n {
        for j in 0..i {
            info[j][i] = info[i][j];
        }
        if let Some(prior) = item.prior(i) {
            score[i] += prior.derivative(values[i]);
            info[i][i] -= prior.second_derivative(values[i]).min(0.0);
        }
    }
    (score, info)
}

/// Maximize one item's objective starting from its current parameters.
/// The item itself is not modified.
pub fn maximize_item<M: ItemResponseModel + Clone>(
    item: &M,
    theta: &[f64],
    expected: &Array2<f64>,
    config: &MStepConfig,
) -> MStepOutcome {
    let mut scratch = item.clone();
    let mut current = item.parameters();
    let mut f_current = objective(&scratch, theta, expected);
    let mut used_gradient_fallback = false;
    let mut iterations = 0;

    while iterations < config.max_iterations {
        iterations += 1;
        let (score, info) = score_and_information(&scratch, theta, expected);
        let direction = match solve_spd(&info, &score, config.ridge) {
            Some(d) => d,
            None => {
                used_gradient_fallback = true;
                let norm = score.iter().map(|g| g * g).sum::<f64>().sqrt().max(1.0);
                score.iter().map(|g| g / norm).collect()
            }
        };

        let mut accepted = None;
        let mut step = 1.0;
        for _ in 0..=config.max_step_halvings {
            let mut candidate: Vec<f64> =
                current.iter().zip(&direction).map(|(p, d)| p + step * d).collect();
            if item.constrain(&mut candidate) && scratch.set_parameters(&candidate).is_ok() {
                let f = objective(&scratch, theta, expected);
                if f >= f_current {
                    accepted = Some((candidate, f));
                    break;
                }
            }
            step *= 0.5;
        }

        let Some((candidate, f)) = accepted else {
            break;
        };
        let change = candidate
            .iter()
            .zip(&current)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max);
        current = candidate;
        f_current = f;
        if change < config.tolerance {
            break;
        }
    }

    MStepOutcome {
        parameters: current,
        objective: f_current,
        iterations,
        used_gradient_fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::irm::{ItemModel, ParamKind};
    use crate::logistic::LogisticModel;
    use crate::polytomous::{GradedResponseModel, PartialCreditModel};
    use crate::priors::ItemParamPrior;
    use approx::assert_abs_diff_eq;

    fn grid() -> Vec<f64> {
        (0..41).map(|i| -4.0 + 0.2 * i as f64).collect()
    }

    /// Expected counts generated exactly by `truth` under a normal weight.
    fn exact_counts<M: ItemResponseModel>(truth: &M, theta: &[f64], n: f64) -> Array2<f64> {
        let mut table = Array2::zeros((theta.len(), truth.n_categories()));
        let total: f64 = theta.iter().map(|t| (-0.5 * t * t).exp()).sum();
        for (k, &t) in theta.iter().enumerate() {
            let n_k = n * (-0.5 * t * t).exp() / total;
            for (c, p) in truth.probabilities(t).into_iter().enumerate() {
                table[[k, c]] = n_k * p;
            }
        }
        table
    }

    #[test]
    fn recovers_generating_parameters_from_exact_counts() {
        let theta = grid();
        let cases: Vec<(ItemModel, ItemModel)> = vec![
            (
                LogisticModel::two_pl(1.4, 0.3).unwrap().into(),
                LogisticModel::two_pl(1.0, 0.0).unwrap().into(),
            ),
            (
                PartialCreditModel::gpcm(0.7, vec![-0.8, 0.9]).unwrap().into(),
                PartialCreditModel::gpcm(1.0, vec![0.0, 0.0]).unwrap().into(),
            ),
            (
                GradedResponseModel::new(1.8, vec![-1.0, 0.2, 1.1]).unwrap().into(),
                GradedResponseModel::new(1.0, vec![-0.5, 0.0, 0.5]).unwrap().into(),
            ),
        ];
        let config = MStepConfig::default();
        for (truth, start) in &cases {
            let counts = exact_counts(truth, &theta, 1000.0);
            let outcome = maximize_item(start, &theta, &counts, &config);
            for (got, want) in outcome.parameters.iter().zip(truth.parameters()) {
                assert_abs_diff_eq!(*got, want, epsilon = 1e-5);
            }
            assert!(outcome.objective >= objective(start, &theta, &counts));
        }
    }

    #[test]
    fn score_matches_numeric_derivative_of_objective() {
        let theta = grid();
        let truth = LogisticModel::three_pl(1.1, -0.2, 0.2).unwrap();
        let counts = exact_counts(&truth, &theta, 500.0);
        let item = LogisticModel::three_pl(0.9, 0.1, 0.15)
            .unwrap()
            .with_prior(ParamKind::Guessing, ItemParamPrior::beta4(3.5, 4.0, 0.0, 0.5).unwrap())
            .unwrap();
        let (score, info) = score_and_information(&item, &theta, &counts);
        let base = item.parameters();
        for i in 0..base.len() {
            let h = 1e-6;
            let mut up = item.clone();
            let mut down = item.clone();
            let mut v = base.clone();
            v[i] += h;
            up.set_parameters(&v).unwrap();
            v[i] -= 2.0 * h;
            down.set_parameters(&v).unwrap();
            let numeric =
                (objective(&up, &theta, &counts) - objective(&down, &theta, &counts)) / (2.0 * h);
            assert_abs_diff_eq!(score[i], numeric, epsilon = 1e-4);
            assert!(info[i][i] > 0.0);
        }
    }

    #[test]
    fn prior_pulls_estimate_toward_its_mode() {
        let theta = grid();
        let truth = LogisticModel::two_pl(1.0, 2.5).unwrap();
        let counts = exact_counts(&truth, &theta, 50.0);
        let plain = LogisticModel::two_pl(1.0, 0.0).unwrap();
        let penalized = plain
            .clone()
            .with_prior(ParamKind::Difficulty, ItemParamPrior::normal(0.0, 0.5).unwrap())
            .unwrap();
        let config = MStepConfig::default();
        let free = maximize_item(&plain, &theta, &counts, &config);
        let shrunk = maximize_item(&penalized, &theta, &counts, &config);
        assert!(shrunk.parameters[1] < free.parameters[1]);
        assert!(shrunk.parameters[1] > 0.0);
    }

    #[test]
    fn rejects_invalid_config() {
        let bad = MStepConfig {
            max_iterations: 0,
            ..MStepConfig::default()
        };
        assert!(bad.validate().is_err());
        assert!(MStepConfig::default().validate().is_ok());
    }
}
