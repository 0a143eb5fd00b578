//! Item parameter priors.
//!
//! A prior turns the item's M-step objective from a likelihood into a penalized
//! likelihood. Each family reports a normalized log-density and its first two
//! derivatives. Outside the support the log-density is `-inf` and both
//! derivatives are zero, so callers never see a NaN from a prior.

use serde::{Deserialize, Serialize};
use statrs::function::gamma::ln_gamma;

use crate::error::{IrtError, Result};
use crate::utils::LOG_2_PI;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum ItemParamPrior {
    /// Four-parameter Beta on the open interval `(lower, upper)`.
    Beta4 {
        alpha: f64,
        beta: f64,
        lower: f64,
        upper: f64,
    },
    /// Log-normal with `ln(x) ~ N(mu, sigma^2)`.
    LogNormal { mu: f64, sigma: f64 },
    Normal { mean: f64, sd: f64 },
}

impl ItemParamPrior {
    pub fn beta4(alpha: f64, beta: f64, lower: f64, upper: f64) -> Result<Self> {
        if !(alpha > 0.0 && beta > 0.0 && alpha.is_finite() && beta.is_finite()) {
            return Err(IrtError::InvalidPrior(format!(
                "beta shape parameters must be positive, got ({alpha}, {beta})"
            )));
        }
        if !(lower.is_finite() && upper.is_finite() && lower < upper) {
            return Err(IrtError::InvalidPrior(format!(
                "beta support must satisfy lower < upper, got ({lower}, {upper})"
            )));
        }
        Ok(ItemParamPrior::Beta4 {
            alpha,
            beta,
            lower,
            upper,
        })
    }

    pub fn log_normal(mu: f64, sigma: f64) -> Result<Self> {
        if !(mu.is_finite() && sigma.is_finite() && sigma > 0.0) {
            return Err(IrtError::InvalidPrior(format!(
                "log-normal needs finite mu and positive sigma, got ({mu}, {sigma})"
            )));
        }
        Ok(ItemParamPrior::LogNormal { mu, sigma })
    }

    pub fn normal(mean: f64, sd: f64) -> Result<Self> {
        if !(mean.is_finite() && sd.is_finite() && sd > 0.0) {
            return Err(IrtError::InvalidPrior(format!(
                "normal needs finite mean and positive sd, got ({mean}, {sd})"
            )));
        }
        Ok(ItemParamPrior::Normal { mean, sd })
    }

    pub fn contains(&self, value: f64) -> bool {
        if !value.is_finite() {
            return false;
        }
        match *self {
            ItemParamPrior::Beta4 { lower, upper, .. } => value > lower && value < upper,
            ItemParamPrior::LogNormal { .. } => value > 0.0,
            ItemParamPrior::Normal { .. } => true,
        }
    }

    /// Move `value` just inside the support if it lies outside.
    pub fn clamp_into_support(&self, value: f64) -> f64 {
        if self.contains(value) {
            return value;
        }
        match *self {
            ItemParamPrior::Beta4 { lower, upper, .. } => {
                let margin = 1e-4 * (upper - lower);
                if value.is_nan() {
                    0.5 * (lower + upper)
                } else {
                    value.clamp(lower + margin, upper - margin)
                }
            }
            ItemParamPrior::LogNormal { mu, .. } => {
                if value.is_nan() || value == f64::INFINITY {
                    mu.exp()
                } else {
                    value.max(1e-4)
                }
            }
            ItemParamPrior::Normal { mean, .. } => {
                if value.is_nan() {
                    mean
                } else {
                    value.clamp(-f64::MAX, f64::MAX)
                }
            }
        }
    }

    pub fn log_density(&self, value: f64) -> f64 {
        if !self.contains(value) {
            return f64::NEG_INFINITY;
        }
        match *self {
            ItemParamPrior::Beta4 {
                alpha,
                beta,
                lower,
                upper,
            } => {
                let log_beta_fn = ln_gamma(alpha) + ln_gamma(beta) - ln_gamma(alpha + beta);
                (alpha - 1.0) * (value - lower).ln() + (beta - 1.0) * (upper - value).ln()
                    - log_beta_fn
                    - (alpha + beta - 1.0) * (upper - lower).ln()
            }
            ItemParamPrior::LogNormal { mu, sigma } => {
                let z = (value.ln() - mu) / sigma;
                -value.ln() - sigma.ln() - 0.5 * LOG_2_PI - 0.5 * z * z
            }
            ItemParamPrior::Normal { mean, sd } => {
                let z = (value - mean) / sd;
                -sd.ln() - 0.5 * LOG_2_PI - 0.5 * z * z
            }
        }
    }

    pub fn derivative(&self, value: f64) -> f64 {
        if !self.contains(value) {
            return 0.0;
        }
        match *self {
            ItemParamPrior::Beta4 {
                alpha,
                beta,
                lower,
                upper,
            } => (alpha - 1.0) / (value - lower) - (beta - 1.0) / (upper - value),
            ItemParamPrior::LogNormal { mu, sigma } => {
                -(1.0 + (value.ln() - mu) / (sigma * sigma)) / value
            }
            ItemParamPrior::Normal { mean, sd } => -(value - mean) / (sd * sd),
        }
    }

    pub fn second_derivative(&self, value: f64) -> f64 {
        if !self.contains(value) {
            return 0.0;
        }
        match *self {
            ItemParamPrior::Beta4 {
                alpha,
                beta,
                lower,
                upper,
            } => {
                -(alpha - 1.0) / (value - lower).powi(2) - (beta - 1.0) / (upper - value).powi(2)
            }
            ItemParamPrior::LogNormal { mu, sigma } => {
                let s2 = sigma * sigma;
                (1.0 + (value.ln() - mu) / s2 - 1.0 / s2) / (value * value)
            }
            ItemParamPrior::Normal { sd, .. } => -1.0 / (sd * sd),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn numeric_derivative(f: impl Fn(f64) -> f64, x: f64) -> f64 {
        let h = 1e-6;
        (f(x + h) - f(x - h)) / (2.0 * h)
    }

    #[test]
    fn derivatives_match_finite_differences() {
        let priors = [
            ItemParamPrior::beta4(1.75, 3.0, 0.0, 3.0).unwrap(),
            ItemParamPrior::beta4(3.5, 4.0, 0.0, 0.5).unwrap(),
            ItemParamPrior::log_normal(0.0, 0.5).unwrap(),
            ItemParamPrior::normal(0.0, 2.0).unwrap(),
        ];
        let points = [0.2, 0.35, 1.1, 2.4];
        for prior in priors {
            for &x in &points {
                if !prior.contains(x) {
                    continue;
                }
                let d = numeric_derivative(|v| prior.log_density(v), x);
                assert_abs_diff_eq!(prior.derivative(x), d, epsilon = 1e-5);
                let d2 = numeric_derivative(|v| prior.derivative(v), x);
                assert_abs_diff_eq!(prior.second_derivative(x), d2, epsilon = 1e-4);
            }
        }
    }

    #[test]
    fn beta_density_integrates_to_one() {
        let prior = ItemParamPrior::beta4(2.0, 3.0, -1.0, 2.0).unwrap();
        let n = 20_000;
        let h = 3.0 / n as f64;
        let total: f64 = (0..n)
            .map(|i| prior.log_density(-1.0 + (i as f64 + 0.5) * h).exp() * h)
            .sum();
        assert_abs_diff_eq!(total, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn outside_support_is_guarded() {
        let beta = ItemParamPrior::beta4(3.5, 4.0, 0.0, 0.5).unwrap();
        assert_eq!(beta.log_density(0.7), f64::NEG_INFINITY);
        assert_eq!(beta.derivative(-0.1), 0.0);
        assert_eq!(beta.second_derivative(0.5), 0.0);
        let log_normal = ItemParamPrior::log_normal(0.0, 0.5).unwrap();
        assert_eq!(log_normal.log_density(0.0), f64::NEG_INFINITY);
        assert_eq!(log_normal.derivative(-1.0), 0.0);
        assert!(!log_normal.log_density(f64::NAN).is_nan());
    }

    #[test]
    fn clamp_moves_value_inside() {
        let beta = ItemParamPrior::beta4(1.75, 3.0, 0.0, 3.0).unwrap();
        let x = beta.clamp_into_support(3.5);
        assert!(beta.contains(x));
        assert!(beta.log_density(x).is_finite());
        let log_normal = ItemParamPrior::log_normal(0.0, 0.5).unwrap();
        assert!(log_normal.contains(log_normal.clamp_into_support(-2.0)));
        assert_eq!(log_normal.clamp_into_support(1.3), 1.3);
    }

    #[test]
    fn rejects_bad_hyperparameters() {
        assert!(ItemParamPrior::beta4(0.0, 1.0, 0.0, 1.0).is_err());
        assert!(ItemParamPrior::beta4(1.0, 1.0, 1.0, 1.0).is_err());
        assert!(ItemParamPrior::log_normal(0.0, -1.0).is_err());
        assert!(ItemParamPrior::normal(f64::NAN, 1.0).is_err());
    }
}
