//! Shared numerical helpers.

use nalgebra::{DMatrix, DVector};

pub const EPSILON: f64 = 1e-10;
pub const LOG_2_PI: f64 = 1.8378770664093453;

/// Smallest probability admitted inside a logarithm.
pub const MIN_PROBABILITY: f64 = 1e-300;

#[inline]
pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let exp_x = x.exp();
        exp_x / (1.0 + exp_x)
    }
}

/// `sigmoid(x) - sigmoid(y)` for `x >= y` without cancellation.
#[inline]
pub fn sigmoid_difference(x: f64, y: f64) -> f64 {
    if x <= y {
        return 0.0;
    }
    if y == f64::NEG_INFINITY {
        return sigmoid(x);
    }
    if x == f64::INFINITY {
        return sigmoid(-y);
    }
    (sigmoid(x) * sigmoid(-y) * -(y - x).exp_m1()).max(0.0)
}

#[inline]
pub fn logsumexp(arr: &[f64]) -> f64 {
    if arr.is_empty() {
        return f64::NEG_INFINITY;
    }
    let max_val = arr.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max_val.is_infinite() {
        return max_val;
    }
    let sum: f64 = arr.iter().map(|x| (x - max_val).exp()).sum();
    max_val + sum.ln()
}

#[inline]
pub fn safe_ln(p: f64) -> f64 {
    p.max(MIN_PROBABILITY).ln()
}

/// Normalize a vector of log-masses into probabilities, returning the log normalizer.
pub fn normalize_log_posterior(log_joint: &[f64], out: &mut [f64]) -> f64 {
    let log_marginal = logsumexp(log_joint);
    for (o, &lj) in out.iter_mut().zip(log_joint) {
        *o = (lj - log_marginal).exp();
    }
    log_marginal
}

/// Weighted Pearson correlation; NaN when either variable has no variance.
pub fn weighted_correlation(x: &[f64], y: &[f64], w: &[f64]) -> f64 {
    let total: f64 = w.iter().sum();
    if total <= 0.0 {
        return f64::NAN;
    }
    let mx = x.iter().zip(w).map(|(a, b)| a * b).sum::<f64>() / total;
    let my = y.iter().zip(w).map(|(a, b)| a * b).sum::<f64>() / total;
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for ((&xi, &yi), &wi) in x.iter().zip(y).zip(w) {
        sxy += wi * (xi - mx) * (yi - my);
        sxx += wi * (xi - mx) * (xi - mx);
        syy += wi * (yi - my) * (yi - my);
    }
    if sxx <= EPSILON || syy <= EPSILON {
        return f64::NAN;
    }
    sxy / (sxx * syy).sqrt()
}

/// Solve `m x = rhs` for a symmetric positive definite `m`, adding a diagonal
/// ridge until the Cholesky factorization succeeds.
pub fn solve_spd(m: &[Vec<f64>], rhs: &[f64], ridge: f64) -> Option<Vec<f64>> {
    let n = rhs.len();
    let mut matrix = DMatrix::from_fn(n, n, |i, j| m[i][j]);
    let b = DVector::from_column_slice(rhs);
    let scale = (0..n).map(|i| matrix[(i, i)].abs()).fold(0.0, f64::max).max(1.0);
    let mut lambda = 0.0;
    for _ in 0..12 {
        if let Some(chol) = matrix.clone().cholesky() {
            let x = chol.solve(&b);
            if x.iter().all(|v| v.is_finite()) {
                return Some(x.iter().copied().collect());
            }
        }
        let next = if lambda == 0.0 { ridge * scale } else { lambda * 10.0 };
        for i in 0..n {
            matrix[(i, i)] += next - lambda;
        }
        lambda = next;
    }
    None
}

/// Inverse of a symmetric positive definite matrix, or `None` if it is not one.
pub fn invert_spd(m: &[Vec<f64>]) -> Option<Vec<Vec<f64>>> {
    let n = m.len();
    let matrix = DMatrix::from_fn(n, n, |i, j| 0.5 * (m[i][j] + m[j][i]));
    let inverse = matrix.cholesky()?.inverse();
    if inverse.iter().any(|v| !v.is_finite()) {
        return None;
    }
    Some((0..n).map(|i| (0..n).map(|j| inverse[(i, j)]).collect()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn sigmoid_saturates_without_nan() {
        assert_eq!(sigmoid(f64::INFINITY), 1.0);
        assert_eq!(sigmoid(f64::NEG_INFINITY), 0.0);
        assert_relative_eq!(sigmoid(0.0), 0.5);
    }

    #[test]
    fn sigmoid_difference_matches_naive_in_the_middle() {
        let naive = sigmoid(0.7) - sigmoid(-0.4);
        assert_relative_eq!(sigmoid_difference(0.7, -0.4), naive, epsilon = 1e-15);
        assert!(sigmoid_difference(40.0, 39.0) > 0.0);
        assert_eq!(sigmoid_difference(1.0, 2.0), 0.0);
    }

    #[test]
    fn logsumexp_handles_large_values() {
        let v = [1000.0, 1000.0];
        assert_relative_eq!(logsumexp(&v), 1000.0 + 2f64.ln(), epsilon = 1e-12);
        assert_eq!(logsumexp(&[]), f64::NEG_INFINITY);
        assert_relative_eq!(logsumexp(&[f64::NEG_INFINITY, 0.0]), 0.0);
    }

    #[test]
    fn correlation_of_constant_is_nan() {
        let w = [1.0, 2.0, 1.0];
        assert!(weighted_correlation(&[1.0, 1.0, 1.0], &[0.0, 1.0, 2.0], &w).is_nan());
        assert_relative_eq!(
            weighted_correlation(&[0.0, 1.0, 2.0], &[1.0, 3.0, 5.0], &w),
            1.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn spd_solve_and_inverse() {
        let m = vec![vec![4.0, 1.0], vec![1.0, 3.0]];
        let x = solve_spd(&m, &[1.0, 2.0], 1e-8).expect("solvable");
        assert_relative_eq!(4.0 * x[0] + x[1], 1.0, epsilon = 1e-12);
        assert_relative_eq!(x[0] + 3.0 * x[1], 2.0, epsilon = 1e-12);
        let inv = invert_spd(&m).expect("invertible");
        assert_relative_eq!(inv[0][0], 3.0 / 11.0, epsilon = 1e-12);
        assert!(invert_spd(&[vec![-1.0]]).is_none());
    }
}
