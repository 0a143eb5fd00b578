//! Linear changes of the latent metric and mean/sigma linking.
//!
//! A transformation maps `theta* = slope * theta + intercept`. Applied to an
//! item, discriminations are divided by the slope and locations are mapped the
//! same way as theta, so response probabilities are unchanged.

use serde::{Deserialize, Serialize};

use crate::error::{IrtError, Result};
use crate::irm::ItemResponseModel;
use crate::quadrature::Quadrature;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinearTransformation {
    intercept: f64,
    slope: f64,
}

impl Default for LinearTransformation {
    fn default() -> Self {
        Self::identity()
    }
}

impl LinearTransformation {
    pub fn new(intercept: f64, slope: f64) -> Result<Self> {
        if !(slope.is_finite() && slope > 0.0) {
            return Err(IrtError::InvalidSlope(slope));
        }
        if !intercept.is_finite() {
            return Err(IrtError::parameter(
                "intercept",
                format!("must be finite, got {intercept}"),
            ));
        }
        Ok(LinearTransformation { intercept, slope })
    }

    pub fn identity() -> Self {
        LinearTransformation {
            intercept: 0.0,
            slope: 1.0,
        }
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    pub fn slope(&self) -> f64 {
        self.slope
    }

    pub fn apply(&self, theta: f64) -> f64 {
        self.slope * theta + self.intercept
    }

    pub fn inverse(&self) -> Self {
        LinearTransformation {
            intercept: -self.intercept / self.slope,
            slope: 1.0 / self.slope,
        }
    }

    /// `self` followed by `then`.
    pub fn compose(&self, then: &LinearTransformation) -> Self {
        LinearTransformation {
            intercept: then.slope * self.intercept + then.intercept,
            slope: then.slope * self.slope,
        }
    }

    pub fn apply_to_items<M: ItemResponseModel>(&self, items: &mut [M]) -> Result<()> {
        for item in items.iter_mut() {
            item.scale(self.intercept, self.slope)?;
        }
        Ok(())
    }

    /// Mean/sigma linking constants carrying `from` locations onto `to`.
    pub fn mean_sigma(from_locations: &[f64], to_locations: &[f64]) -> Result<Self> {
        if from_locations.len() != to_locations.len() {
            return Err(IrtError::LengthMismatch {
                expected: from_locations.len(),
                got: to_locations.len(),
            });
        }
        if from_locations.len() < 2 {
            return Err(IrtError::TooFewPoints {
                min: 2,
                got: from_locations.len(),
            });
        }
        let (mean_from, sd_from) = mean_sd(from_locations);
        let (mean_to, sd_to) = mean_sd(to_locations);
        let slope = sd_to / sd_from;
        Self::new(mean_to - slope * mean_from, slope)
    }

    /// The transformation that maps the quadrature's mean and SD to 0 and 1.
    pub fn standardizing(quadrature: &Quadrature) -> Result<Self> {
        let sd = quadrature.std_dev();
        Self::new(-quadrature.mean() / sd, 1.0 / sd)
    }
}

fn mean_sd(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::irm::ItemModel;
    use crate::logistic::LogisticModel;
    use crate::polytomous::GradedResponseModel;
    use approx::assert_abs_diff_eq;

    #[test]
    fn inverse_and_compose_cancel() {
        let t = LinearTransformation::new(0.7, 1.6).unwrap();
        let id = t.compose(&t.inverse());
        assert_abs_diff_eq!(id.intercept(), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(id.slope(), 1.0, epsilon = 1e-12);
        let u = LinearTransformation::new(-0.2, 0.5).unwrap();
        let both = t.compose(&u);
        assert_abs_diff_eq!(both.apply(1.3), u.apply(t.apply(1.3)), epsilon = 1e-12);
    }

    #[test]
    fn rejects_degenerate_slopes() {
        assert_eq!(
            LinearTransformation::new(0.0, 0.0),
            Err(IrtError::InvalidSlope(0.0))
        );
        assert!(LinearTransformation::new(0.0, f64::INFINITY).is_err());
        assert!(LinearTransformation::mean_sigma(&[1.0, 1.0], &[0.0, 2.0]).is_err());
    }

    #[test]
    fn items_keep_their_curves() {
        let mut items: Vec<ItemModel> = vec![
            LogisticModel::three_pl(1.3, 0.4, 0.15).unwrap().into(),
            GradedResponseModel::new(0.9, vec![-1.0, 0.5]).unwrap().into(),
        ];
        let before: Vec<Vec<f64>> = items.iter().map(|i| i.probabilities(0.8)).collect();
        let t = LinearTransformation::new(1.5, 2.5).unwrap();
        t.apply_to_items(&mut items).unwrap();
        for (item, old) in items.iter().zip(&before) {
            for (p, q) in item.probabilities(t.apply(0.8)).iter().zip(old) {
                assert_abs_diff_eq!(p, q, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn mean_sigma_recovers_known_constants() {
        let from = [-1.0, 0.0, 0.5, 2.0];
        let truth = LinearTransformation::new(0.3, 1.4).unwrap();
        let to: Vec<f64> = from.iter().map(|&b| truth.apply(b)).collect();
        let fitted = LinearTransformation::mean_sigma(&from, &to).unwrap();
        assert_abs_diff_eq!(fitted.slope(), 1.4, epsilon = 1e-12);
        assert_abs_diff_eq!(fitted.intercept(), 0.3, epsilon = 1e-12);
    }

    #[test]
    fn standardizing_centers_the_latent_scale() {
        let q = Quadrature::normal_with(0.8, 1.5, -6.0, 8.0, 141).unwrap();
        let t = LinearTransformation::standardizing(&q).unwrap();
        let standardized = q.transformed(&t);
        assert_abs_diff_eq!(standardized.mean(), 0.0, epsilon = 1e-10);
        assert_abs_diff_eq!(standardized.std_dev(), 1.0, epsilon = 1e-10);
    }
}
