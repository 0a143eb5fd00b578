//! Classical starting values for EM.
//!
//! Item proportions and item-rest correlations are converted into initial
//! discriminations and locations through the normal-ogive relations between
//! biserial (or polyserial) correlation, slope and threshold.

use serde::{Deserialize, Serialize};
use statrs::distribution::{Continuous, ContinuousCDF, Normal};

use crate::error::Result;
use crate::irm::ItemResponseModel;
use crate::polytomous::enforce_ordering;
use crate::response_data::ResponseData;
use crate::utils::weighted_correlation;

/// Ratio between the logistic and normal-ogive slopes.
const OGIVE_TO_LOGISTIC: f64 = 1.702;
/// Below this biserial correlation the PROX logit is used instead.
const MIN_BISERIAL: f64 = 0.1;
const MAX_BISERIAL: f64 = 0.95;
/// Location assigned to a zero-variance item on the `D = 1` metric.
pub const EXTREME_LOCATION: f64 = 9.0;
const PROPORTION_FLOOR: f64 = 1e-3;
const THRESHOLD_GAP: f64 = 0.05;

/// Classical statistics of one item, computed from the weighted patterns.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ItemStatistics {
    /// Weighted number of non-missing responses.
    pub n: f64,
    /// Mean item score.
    pub mean: f64,
    pub proportions: Vec<f64>,
    /// Item-rest correlation; NaN when either score has no variance.
    pub item_rest_correlation: f64,
    /// All observed responses fall in a single category.
    pub extreme: bool,
}

/// Seed every non-fixed item from classical statistics.
pub fn compute_starting_values<M: ItemResponseModel>(
    data: &ResponseData,
    models: &mut [M],
) -> Result<Vec<ItemStatistics>> {
    data.validate_for(models)?;
    let standard = Normal::standard();
    let totals: Vec<f64> = data
        .patterns()
        .iter()
        .map(|p| p.responses().iter().filter(|&&r| r >= 0).map(|&r| r as f64).sum())
        .collect();

    let mut statistics = Vec::with_capacity(models.len());
    for (item, model) in models.iter_mut().enumerate() {
        let n_categories = model.n_categories();
        let mut scores = Vec::new();
        let mut rest = Vec::new();
        let mut weights = Vec::new();
        for (p, total) in data.patterns().iter().zip(&totals) {
            if let Some(k) = p.response(item) {
                scores.push(k as f64);
                rest.push(total - k as f64);
                weights.push(p.frequency());
            }
        }
        let n: f64 = weights.iter().sum();
        let counts = data.category_counts(item, n_categories);
        let proportions: Vec<f64> = counts
            .iter()
            .map(|c| if n > 0.0 { c / n } else { f64::NAN })
            .collect();
        let mean = if n > 0.0 {
            scores.iter().zip(&weights).map(|(s, w)| s * w).sum::<f64>() / n
        } else {
            f64::NAN
        };
        let r = weighted_correlation(&scores, &rest, &weights);
        let extreme = n <= 0.0 || data.is_extreme_item(item);
        let stats = ItemStatistics {
            n,
            mean,
            proportions,
            item_rest_correlation: r,
            extreme,
        };

        if !model.is_fixed() {
            let d = model.scaling_constant();
            let (a, thresholds) = if extreme {
                log::warn!("item {item} has no response variance; using an extreme location");
                extreme_start(&stats, n_categories, d)
            } else {
                let sd = weighted_sd(&scores, &weights, mean);
                classical_start(&stats, sd, d, &standard)
            };
            model.set_starting_values(a, &thresholds);
        }
        statistics.push(stats);
    }
    Ok(statistics)
}

fn weighted_sd(x: &[f64], w: &[f64], mean: f64) -> f64 {
    let n: f64 = w.iter().sum();
    let var = x.iter().zip(w).map(|(v, wi)| wi * (v - mean).powi(2)).sum::<f64>() / n;
    var.sqrt()
}

fn extreme_start(stats: &ItemStatistics, n_categories: usize, d: f64) -> (f64, Vec<f64>) {
    // Everyone in the lowest category means a hard item; anything else is easy.
    let location = if stats.proportions.first().copied().unwrap_or(1.0) >= 1.0 {
        EXTREME_LOCATION / d
    } else {
        -EXTREME_LOCATION / d
    };
    let thresholds = (0..n_categories - 1)
        .map(|k| location + THRESHOLD_GAP * k as f64)
        .collect();
    (1.0, thresholds)
}

fn classical_start(stats: &ItemStatistics, sd: f64, d: f64, standard: &Normal) -> (f64, Vec<f64>) {
    let m = stats.proportions.len() - 1;
    // P(X >= k) for k = 1..=m
    let upper: Vec<f64> = (1..=m)
        .map(|k| {
            stats.proportions[k..]
                .iter()
                .sum::<f64>()
                .clamp(PROPORTION_FLOOR, 1.0 - PROPORTION_FLOOR)
        })
        .collect();
    let tau: Vec<f64> = upper.iter().map(|&pi| standard.inverse_cdf(1.0 - pi)).collect();
    let density: f64 = tau.iter().map(|&t| standard.pdf(t)).sum();

    let r = stats.item_rest_correlation;
    let latent_r = if m == 1 {
        let p = upper[0];
        r * (p * (1.0 - p)).sqrt() / density
    } else {
        r * sd / density
    };

    let mut thresholds: Vec<f64>;
    let a;
    if !latent_r.is_finite() || latent_r < MIN_BISERIAL {
        a = 1.0;
        thresholds = upper.iter().map(|&pi| ((1.0 - pi) / pi).ln() / d).collect();
    } else {
        let rho = latent_r.min(MAX_BISERIAL);
        a = OGIVE_TO_LOGISTIC * rho / (1.0 - rho * rho).sqrt() / d;
        thresholds = tau.iter().map(|&t| t / rho).collect();
    }
    enforce_ordering(&mut thresholds, THRESHOLD_GAP);
    (a, thresholds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::irm::ItemModel;
    use crate::logistic::LogisticModel;
    use crate::polytomous::GradedResponseModel;
    use crate::response_data::ResponsePattern;

    fn patterns(rows: Vec<(Vec<i32>, f64)>) -> ResponseData {
        ResponseData::new(
            rows.into_iter()
                .map(|(r, f)| ResponsePattern::new(r, f).unwrap())
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn easier_items_get_lower_difficulty() {
        let data = patterns(vec![
            (vec![1, 1, 1], 30.0),
            (vec![1, 1, 0], 25.0),
            (vec![1, 0, 0], 20.0),
            (vec![0, 0, 0], 15.0),
            (vec![0, 1, 0], 5.0),
            (vec![1, 0, 1], 5.0),
        ]);
        let mut items = vec![LogisticModel::two_pl(1.0, 0.0).unwrap(); 3];
        let stats = compute_starting_values(&data, &mut items).unwrap();
        assert!(items[0].difficulty() < items[1].difficulty());
        assert!(items[1].difficulty() < items[2].difficulty());
        assert!(items.iter().all(|i| i.discrimination() > 0.0));
        assert!((stats[0].mean - 0.8).abs() < 1e-12);
        assert!(stats.iter().all(|s| !s.extreme));
    }

    #[test]
    fn zero_variance_item_is_extreme() {
        let data = patterns(vec![(vec![1, 1], 10.0), (vec![1, 0], 5.0), (vec![1, -1], 2.0)]);
        let mut items = vec![LogisticModel::two_pl(1.0, 0.0).unwrap(); 2];
        let stats = compute_starting_values(&data, &mut items).unwrap();
        assert!(stats[0].extreme);
        assert!(stats[0].item_rest_correlation.is_nan());
        assert_eq!(items[0].difficulty(), -EXTREME_LOCATION);
        assert!(!stats[1].extreme);
    }

    #[test]
    fn fixed_items_are_untouched() {
        let data = patterns(vec![(vec![1, 0], 10.0), (vec![0, 1], 5.0), (vec![1, 1], 7.0)]);
        let mut items = vec![
            LogisticModel::two_pl(2.0, 1.5).unwrap().with_fixed(true),
            LogisticModel::two_pl(1.0, 0.0).unwrap(),
        ];
        compute_starting_values(&data, &mut items).unwrap();
        assert_eq!(items[0].parameters(), vec![2.0, 1.5]);
    }

    #[test]
    fn graded_thresholds_are_increasing() {
        let data = patterns(vec![
            (vec![0, 0, 1], 10.0),
            (vec![1, 1, 1], 20.0),
            (vec![2, 1, 2], 25.0),
            (vec![3, 2, 2], 15.0),
            (vec![2, 2, 1], 8.0),
        ]);
        let mut items: Vec<ItemModel> = vec![
            GradedResponseModel::new(1.0, vec![-1.0, 0.0, 1.0]).unwrap().into(),
            GradedResponseModel::new(1.0, vec![-0.5, 0.5]).unwrap().into(),
            GradedResponseModel::new(1.0, vec![-0.5, 0.5]).unwrap().into(),
        ];
        compute_starting_values(&data, &mut items).unwrap();
        for item in &items {
            let p = item.parameters();
            assert!(p[0] > 0.0);
            assert!(p[1..].windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn scoring_faults_surface() {
        let data = patterns(vec![(vec![0, 3], 1.0)]);
        let mut items = vec![LogisticModel::two_pl(1.0, 0.0).unwrap(); 2];
        assert!(compute_starting_values(&data, &mut items).is_err());
    }
}
