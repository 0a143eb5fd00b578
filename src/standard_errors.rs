//! Item parameter standard errors from the curvature of the M-step objective.
//!
//! The Hessian of `Q(p) + ln prior(p)` is approximated by differences of the
//! analytic score at the final expected counts, one-sided for parameters on a
//! bound. Standard errors are `sqrt(diag((-H)^-1))`; a parameter whose
//! curvature cannot be inverted reports NaN.

use ndarray::Array2;

use crate::irm::ItemResponseModel;
use crate::mstep::score_and_information;
use crate::utils::invert_spd;

const RELATIVE_STEP: f64 = 1e-5;

/// Numerical Hessian of the penalized objective.
///
/// A parameter whose shifted value leaves the feasible region on one side
/// (a guessing parameter at 0, say) is differenced on the other side only; the
/// returned flags mark those parameters. `None` if neither side is feasible.
pub fn objective_hessian<M: ItemResponseModel + Clone>(
    item: &M,
    theta: &[f64],
    expected: &Array2<f64>,
) -> Option<(Vec<Vec<f64>>, Vec<bool>)> {
    let base = item.parameters();
    let n = base.len();
    let (centre, _) = score_and_information(item, theta, expected);
    let mut hessian = vec![vec![0.0; n]; n];
    let mut on_bound = vec![false; n];
    let mut scratch = item.clone();
    for j in 0..n {
        let h = RELATIVE_STEP * base[j].abs().max(1.0);
        let up = shifted_score(&mut scratch, &base, j, h, theta, expected);
        let down = shifted_score(&mut scratch, &base, j, -h, theta, expected);
        let (hi, lo, width) = match (&up, &down) {
            (Some(up), Some(down)) => (up, down, 2.0 * h),
            (Some(up), None) => (up, &centre, h),
            (None, Some(down)) => (&centre, down, h),
            (None, None) => return None,
        };
        on_bound[j] = up.is_none() || down.is_none();
        for i in 0..n {
            hessian[i][j] = (hi[i] - lo[i]) / width;
        }
    }
    for i in 0..n {
        for j in 0..i {
            let avg = 0.5 * (hessian[i][j] + hessian[j][i]);
            hessian[i][j] = avg;
            hessian[j][i] = avg;
        }
    }
    Some((hessian, on_bound))
}

fn shifted_score<M: ItemResponseModel>(
    scratch: &mut M,
    base: &[f64],
    j: usize,
    step: f64,
    theta: &[f64],
    expected: &Array2<f64>,
) -> Option<Vec<f64>> {
    let mut shifted = base.to_vec();
    shifted[j] += step;
    if scratch.prior(j).is_some_and(|p| !p.contains(shifted[j])) {
        return None;
    }
    scratch.set_parameters(&shifted).ok()?;
    Some(score_and_information(scratch, theta, expected).0)
}

/// `sqrt(diag((-H)^-1))` restricted to `indices`.
fn covariance_diagonal(hessian: &[Vec<f64>], indices: &[usize]) -> Option<Vec<f64>> {
    if indices.is_empty() {
        return None;
    }
    let negated: Vec<Vec<f64>> = indices
        .iter()
        .map(|&i| indices.iter().map(|&j| -hessian[i][j]).collect())
        .collect();
    let cov = invert_spd(&negated)?;
    Some((0..indices.len()).map(|k| cov[k][k].max(0.0).sqrt()).collect())
}

/// Standard errors aligned with `item.parameter_kinds()`.
///
/// When the full curvature matrix is not negative definite, parameters sitting
/// on a bound report NaN and the rest come from the interior block.
pub fn item_standard_errors<M: ItemResponseModel + Clone>(
    item: &M,
    theta: &[f64],
    expected: &Array2<f64>,
) -> Vec<f64> {
    let n = item.n_free_parameters();
    if item.is_fixed() {
        return vec![0.0; n];
    }
    let mut se = vec![f64::NAN; n];
    let Some((hessian, on_bound)) = objective_hessian(item, theta, expected) else {
        return se;
    };
    let all: Vec<usize> = (0..n).collect();
    if let Some(full) = covariance_diagonal(&hessian, &all) {
        return full;
    }
    let interior: Vec<usize> = all.into_iter().filter(|&i| !on_bound[i]).collect();
    if interior.len() < n {
        if let Some(partial) = covariance_diagonal(&hessian, &interior) {
            for (&i, s) in interior.iter().zip(partial) {
                se[i] = s;
            }
        }
    }
    se
}
