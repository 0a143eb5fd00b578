//! Person scores and test-level curves from calibrated items.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::estep::{log_probability_tables, pattern_posterior};
use crate::irm::ItemResponseModel;
use crate::quadrature::Quadrature;
use crate::response_data::ResponseData;

/// Expected a posteriori trait estimate and posterior SD.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersonScore {
    pub theta: f64,
    pub se: f64,
}

/// EAP score for every distinct pattern, in pattern order.
pub fn eap_scores<M: ItemResponseModel>(
    data: &ResponseData,
    items: &[M],
    quadrature: &Quadrature,
) -> Result<Vec<PersonScore>> {
    data.validate_for(items)?;
    let points = quadrature.points();
    let log_tables = log_probability_tables(items, points, true);
    let log_weights = quadrature.log_weights();

    let scores = data
        .patterns()
        .par_iter()
        .map(|pattern| {
            let mut log_joint = vec![0.0; points.len()];
            let mut posterior = vec![0.0; points.len()];
            pattern_posterior(pattern, &log_tables, &log_weights, &mut log_joint, &mut posterior);

            let eap: f64 = posterior.iter().zip(points).map(|(&p, &t)| p * t).sum();
            let psd = posterior
                .iter()
                .zip(points)
                .map(|(&p, &t)| p * (t - eap).powi(2))
                .sum::<f64>()
                .sqrt();
            PersonScore { theta: eap, se: psd }
        })
        .collect();
    Ok(scores)
}

pub fn test_information<M: ItemResponseModel>(items: &[M], theta: f64) -> f64 {
    items.iter().map(|item| item.item_information_at(theta)).sum()
}

/// Expected total score.
pub fn test_characteristic<M: ItemResponseModel>(items: &[M], theta: f64) -> f64 {
    items.iter().map(|item| item.expected_value(theta)).sum()
}

/// `1 / sqrt(I(theta))`; infinite where the test carries no information.
pub fn standard_error_of_measurement<M: ItemResponseModel>(items: &[M], theta: f64) -> f64 {
    let info = test_information(items, theta);
    if info > 0.0 {
        1.0 / info.sqrt()
    } else {
        f64::INFINITY
    }
}
