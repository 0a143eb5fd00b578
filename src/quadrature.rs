//! Discrete approximations of the latent trait distribution.

use nalgebra::{DMatrix, SymmetricEigen};
use serde::{Deserialize, Serialize};

use crate::equating::LinearTransformation;
use crate::error::{IrtError, Result};

/// Tolerance on the total of user-supplied weights before renormalization.
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

const MIN_POINTS: usize = 2;

/// Ordered trait nodes with probability weights summing to 1.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Quadrature {
    points: Vec<f64>,
    weights: Vec<f64>,
}

impl Quadrature {
    /// Evenly spaced nodes on `[min, max]` weighted by the standard normal density.
    pub fn normal(min: f64, max: f64, n: usize) -> Result<Self> {
        Self::normal_with(0.0, 1.0, min, max, n)
    }

    pub fn normal_with(mean: f64, sd: f64, min: f64, max: f64, n: usize) -> Result<Self> {
        if !(mean.is_finite() && sd.is_finite() && sd > 0.0) {
            return Err(IrtError::InvalidConfig(format!(
                "normal quadrature needs a finite mean and positive sd, got ({mean}, {sd})"
            )));
        }
        let points = evenly_spaced(min, max, n)?;
        let weights = points
            .iter()
            .map(|&x| {
                let z = (x - mean) / sd;
                (-0.5 * z * z).exp()
            })
            .collect();
        Ok(Quadrature {
            points,
            weights: normalized(weights),
        })
    }

    pub fn uniform(min: f64, max: f64, n: usize) -> Result<Self> {
        let points = evenly_spaced(min, max, n)?;
        let weights = vec![1.0 / n as f64; n];
        Ok(Quadrature { points, weights })
    }

    /// Gauss-Hermite rule for the standard normal via the Golub-Welsch
    /// eigenproblem of the probabilists' Hermite Jacobi matrix.
    pub fn gauss_hermite(n: usize) -> Result<Self> {
        if n < MIN_POINTS {
            return Err(IrtError::TooFewPoints {
                min: MIN_POINTS,
                got: n,
            });
        }
        let jacobi = DMatrix::from_fn(n, n, |i, j| {
            if i + 1 == j {
                (j as f64).sqrt()
            } else if j + 1 == i {
                (i as f64).sqrt()
            } else {
                0.0
            }
        });
        let eigen = SymmetricEigen::new(jacobi);
        let mut nodes: Vec<(f64, f64)> = (0..n)
            .map(|k| {
                let v0 = eigen.eigenvectors[(0, k)];
                (eigen.eigenvalues[k], v0 * v0)
            })
            .collect();
        nodes.sort_by(|a, b| a.0.total_cmp(&b.0));
        let (points, weights): (Vec<f64>, Vec<f64>) = nodes.into_iter().unzip();
        Ok(Quadrature {
            points,
            weights: normalized(weights),
        })
    }

    /// Arbitrary nodes and weights. Points must be finite and strictly
    /// increasing; weights must be non-negative and sum to 1 within
    /// [`WEIGHT_SUM_TOLERANCE`], after which they are renormalized exactly.
    pub fn from_points(points: Vec<f64>, weights: Vec<f64>) -> Result<Self> {
        if points.len() != weights.len() {
            return Err(IrtError::LengthMismatch {
                expected: points.len(),
                got: weights.len(),
            });
        }
        if points.len() < MIN_POINTS {
            return Err(IrtError::TooFewPoints {
                min: MIN_POINTS,
                got: points.len(),
            });
        }
        for w in points.windows(2) {
            if !(w[0].is_finite() && w[1].is_finite() && w[0] < w[1]) {
                return Err(IrtError::InvalidRange {
                    min: w[0],
                    max: w[1],
                });
            }
        }
        check_weights(&weights)?;
        let total: f64 = weights.iter().sum();
        if (total - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(IrtError::WeightsDoNotSumToOne(total));
        }
        Ok(Quadrature {
            points,
            weights: normalized(weights),
        })
    }

    pub fn points(&self) -> &[f64] {
        &self.points
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Natural log of each weight; zero weights map to `-inf`.
    pub fn log_weights(&self) -> Vec<f64> {
        self.weights.iter().map(|w| w.ln()).collect()
    }

    pub fn mean(&self) -> f64 {
        self.points
            .iter()
            .zip(&self.weights)
            .map(|(x, w)| x * w)
            .sum()
    }

    pub fn std_dev(&self) -> f64 {
        let mean = self.mean();
        self.points
            .iter()
            .zip(&self.weights)
            .map(|(x, w)| w * (x - mean).powi(2))
            .sum::<f64>()
            .sqrt()
    }

    /// Replace the weights with the normalized posterior mass per node.
    /// Points are left untouched.
    pub fn reestimate_weights(&mut self, mass: &[f64]) -> Result<()> {
        if mass.len() != self.points.len() {
            return Err(IrtError::LengthMismatch {
                expected: self.points.len(),
                got: mass.len(),
            });
        }
        check_weights(mass)?;
        let total: f64 = mass.iter().sum();
        if total <= 0.0 {
            return Err(IrtError::WeightsDoNotSumToOne(total));
        }
        self.weights = mass.iter().map(|m| m / total).collect();
        Ok(())
    }

    /// A copy with every node mapped through `transform`; weights are shared.
    pub fn transformed(&self, transform: &LinearTransformation) -> Quadrature {
        Quadrature {
            points: self.points.iter().map(|&x| transform.apply(x)).collect(),
            weights: self.weights.clone(),
        }
    }
}

fn evenly_spaced(min: f64, max: f64, n: usize) -> Result<Vec<f64>> {
    if n < MIN_POINTS {
        return Err(IrtError::TooFewPoints {
            min: MIN_POINTS,
            got: n,
        });
    }
    if !(min.is_finite() && max.is_finite() && min < max) {
        return Err(IrtError::InvalidRange { min, max });
    }
    let step = (max - min) / (n - 1) as f64;
    Ok((0..n).map(|i| min + i as f64 * step).collect())
}

fn check_weights(weights: &[f64]) -> Result<()> {
    for (index, &weight) in weights.iter().enumerate() {
        if !(weight.is_finite() && weight >= 0.0) {
            return Err(IrtError::InvalidWeight { index, weight });
        }
    }
    Ok(())
}

fn normalized(weights: Vec<f64>) -> Vec<f64> {
    let total: f64 = weights.iter().sum();
    weights.into_iter().map(|w| w / total).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn moment(q: &Quadrature, power: i32) -> f64 {
        q.points()
            .iter()
            .zip(q.weights())
            .map(|(x, w)| w * x.powi(power))
            .sum()
    }

    #[test]
    fn weights_sum_to_one() {
        let rules = [
            Quadrature::normal(-4.0, 4.0, 40).unwrap(),
            Quadrature::normal_with(0.5, 2.0, -6.0, 6.0, 31).unwrap(),
            Quadrature::uniform(-3.0, 3.0, 7).unwrap(),
            Quadrature::gauss_hermite(21).unwrap(),
        ];
        for q in &rules {
            assert_eq!(q.points().len(), q.weights().len());
            assert_abs_diff_eq!(q.weights().iter().sum::<f64>(), 1.0, epsilon = 1e-10);
            assert!(q.points().windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn gauss_hermite_integrates_normal_moments() {
        let q = Quadrature::gauss_hermite(10).unwrap();
        assert_abs_diff_eq!(moment(&q, 1), 0.0, epsilon = 1e-10);
        assert_abs_diff_eq!(moment(&q, 2), 1.0, epsilon = 1e-10);
        assert_abs_diff_eq!(moment(&q, 4), 3.0, epsilon = 1e-9);
        assert_abs_diff_eq!(moment(&q, 6), 15.0, epsilon = 1e-8);
    }

    #[test]
    fn normal_rule_approximates_standard_normal() {
        let q = Quadrature::normal(-6.0, 6.0, 61).unwrap();
        assert_abs_diff_eq!(q.mean(), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(q.std_dev(), 1.0, epsilon = 1e-6);
        let shifted = Quadrature::normal_with(1.0, 0.5, -2.0, 4.0, 121).unwrap();
        assert_abs_diff_eq!(shifted.mean(), 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(shifted.std_dev(), 0.5, epsilon = 1e-4);
    }

    #[test]
    fn user_weights_are_validated() {
        let ok = Quadrature::from_points(vec![-1.0, 0.0, 1.0], vec![0.25, 0.5, 0.2500001]).unwrap();
        assert_abs_diff_eq!(ok.weights().iter().sum::<f64>(), 1.0, epsilon = 1e-12);

        assert_eq!(
            Quadrature::from_points(vec![-1.0, 1.0], vec![0.3, 0.3]),
            Err(IrtError::WeightsDoNotSumToOne(0.6))
        );
        assert!(matches!(
            Quadrature::from_points(vec![-1.0, 1.0], vec![1.5, -0.5]),
            Err(IrtError::InvalidWeight { index: 1, .. })
        ));
        assert!(matches!(
            Quadrature::from_points(vec![1.0, -1.0], vec![0.5, 0.5]),
            Err(IrtError::InvalidRange { .. })
        ));
        assert!(matches!(
            Quadrature::from_points(vec![0.0], vec![1.0]),
            Err(IrtError::TooFewPoints { .. })
        ));
        assert!(Quadrature::normal(2.0, -2.0, 10).is_err());
    }

    #[test]
    fn reestimation_keeps_points() {
        let mut q = Quadrature::uniform(-2.0, 2.0, 5).unwrap();
        let points = q.points().to_vec();
        q.reestimate_weights(&[1.0, 2.0, 4.0, 2.0, 1.0]).unwrap();
        assert_eq!(q.points(), points.as_slice());
        assert_abs_diff_eq!(q.weights()[2], 0.4, epsilon = 1e-12);
        assert!(q.reestimate_weights(&[1.0, 2.0]).is_err());
        assert!(q.reestimate_weights(&[0.0; 5]).is_err());
    }

    #[test]
    fn transformed_moves_points_only() {
        let q = Quadrature::normal(-4.0, 4.0, 41).unwrap();
        let t = LinearTransformation::new(0.5, 2.0).unwrap();
        let moved = q.transformed(&t);
        assert_eq!(moved.weights(), q.weights());
        assert_abs_diff_eq!(moved.mean(), 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(moved.std_dev(), 2.0 * q.std_dev(), epsilon = 1e-12);
        assert!(moved.log_weights().iter().all(|w| *w <= 0.0));
    }
}
