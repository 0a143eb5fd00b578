//! Seeded simulation of latent traits and item responses.
//!
//! Person `i` draws from its own `Pcg64` stream seeded with `seed + i`, so
//! results do not depend on how rayon schedules the rows.

use ndarray::Array2;
use rand::prelude::*;
use rand_distr::Normal;
use rand_pcg::Pcg64;
use rayon::prelude::*;

use crate::error::{IrtError, Result};
use crate::irm::ItemResponseModel;

pub fn simulate_thetas(n: usize, mean: f64, sd: f64, seed: u64) -> Result<Vec<f64>> {
    let normal = Normal::new(mean, sd).map_err(|e| {
        IrtError::InvalidConfig(format!("invalid trait distribution N({mean}, {sd}): {e}"))
    })?;
    let mut rng = Pcg64::seed_from_u64(seed);
    Ok((0..n).map(|_| normal.sample(&mut rng)).collect())
}

/// Draw one response per person and item; rows are persons.
pub fn simulate_responses<M: ItemResponseModel>(items: &[M], thetas: &[f64], seed: u64) -> Array2<i32> {
    let n_items = items.len();
    let rows: Vec<Vec<i32>> = thetas
        .par_iter()
        .enumerate()
        .map(|(i, &theta)| {
            let mut rng = Pcg64::seed_from_u64(seed.wrapping_add(i as u64));
            items
                .iter()
                .map(|item| {
                    let u: f64 = rng.random();
                    let mut cumsum = 0.0;
                    let probs = item.probabilities(theta);
                    for (k, &p) in probs.iter().enumerate() {
                        cumsum += p;
                        if u < cumsum {
                            return k as i32;
                        }
                    }
                    (probs.len() - 1) as i32
                })
                .collect()
        })
        .collect();

    let mut result = Array2::zeros((thetas.len(), n_items));
    for (i, row) in rows.iter().enumerate() {
        for (j, &val) in row.iter().enumerate() {
            result[[i, j]] = val;
        }
    }
    result
}
