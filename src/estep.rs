//! E-step: posterior over quadrature nodes and expected category counts.

use ndarray::Array2;
use rayon::prelude::*;

use crate::irm::ItemResponseModel;
use crate::quadrature::Quadrature;
use crate::response_data::{ResponseData, ResponsePattern};
use crate::utils::{normalize_log_posterior, safe_ln};

/// Patterns per reduction chunk. Partial sums are always combined in chunk
/// order, so results do not depend on the number of threads.
pub const PATTERN_CHUNK: usize = 64;

/// Sufficient statistics of one E-step.
#[derive(Clone, Debug, PartialEq)]
pub struct EStepResult {
    /// Per item, a nodes x categories table of frequency-weighted posterior counts.
    pub expected: Vec<Array2<f64>>,
    /// Posterior mass per node summed over all patterns.
    pub node_mass: Vec<f64>,
    /// Marginal log-likelihood at the parameters used for this E-step.
    pub log_likelihood: f64,
}

impl EStepResult {
    fn zeros<M: ItemResponseModel>(items: &[M], n_nodes: usize) -> Self {
        EStepResult {
            expected: items
                .iter()
                .map(|item| Array2::zeros((n_nodes, item.n_categories())))
                .collect(),
            node_mass: vec![0.0; n_nodes],
            log_likelihood: 0.0,
        }
    }

    fn merge(&mut self, other: EStepResult) {
        for (acc, part) in self.expected.iter_mut().zip(other.expected) {
            *acc += &part;
        }
        for (acc, part) in self.node_mass.iter_mut().zip(other.node_mass) {
            *acc += part;
        }
        self.log_likelihood += other.log_likelihood;
    }

    /// Expected number of responses to `item` at each node.
    pub fn item_node_totals(&self, item: usize) -> Vec<f64> {
        self.expected[item].rows().into_iter().map(|r| r.sum()).collect()
    }
}

/// `ln P(category | theta_k)` for every item, node and category.
pub fn log_probability_tables<M: ItemResponseModel>(
    items: &[M],
    points: &[f64],
    parallel: bool,
) -> Vec<Array2<f64>> {
    let table = |item: &M| {
        let mut t = Array2::zeros((points.len(), item.n_categories()));
        for (k, &theta) in points.iter().enumerate() {
            for (c, p) in item.probabilities(theta).into_iter().enumerate() {
                t[[k, c]] = safe_ln(p);
            }
        }
        t
    };
    if parallel {
        items.par_iter().map(table).collect()
    } else {
        items.iter().map(table).collect()
    }
}

/// Posterior over nodes for one pattern; returns the log marginal likelihood.
pub fn pattern_posterior(
    pattern: &ResponsePattern,
    log_tables: &[Array2<f64>],
    log_weights: &[f64],
    log_joint: &mut [f64],
    posterior: &mut [f64],
) -> f64 {
    log_joint.copy_from_slice(log_weights);
    for (item, table) in log_tables.iter().enumerate() {
        if let Some(c) = pattern.response(item) {
            for (k, lj) in log_joint.iter_mut().enumerate() {
                *lj += table[[k, c]];
            }
        }
    }
    normalize_log_posterior(log_joint, posterior)
}

fn accumulate_chunk<M: ItemResponseModel>(
    chunk: &[ResponsePattern],
    items: &[M],
    log_tables: &[Array2<f64>],
    log_weights: &[f64],
) -> EStepResult {
    let n_nodes = log_weights.len();
    let mut acc = EStepResult::zeros(items, n_nodes);
    let mut log_joint = vec![0.0; n_nodes];
    let mut posterior = vec![0.0; n_nodes];
    for pattern in chunk {
        let log_marginal =
            pattern_posterior(pattern, log_tables, log_weights, &mut log_joint, &mut posterior);
        let f = pattern.frequency();
        acc.log_likelihood += f * log_marginal;
        for (item, table) in acc.expected.iter_mut().enumerate() {
            if let Some(c) = pattern.response(item) {
                let mut column = table.column_mut(c);
                for (k, &post) in posterior.iter().enumerate() {
                    column[k] += f * post;
                }
            }
        }
        for (m, &post) in acc.node_mass.iter_mut().zip(&posterior) {
            *m += f * post;
        }
    }
    acc
}

/// Run one E-step at the items' current parameters.
pub fn e_step<M: ItemResponseModel>(
    data: &ResponseData,
    items: &[M],
    quadrature: &Quadrature,
    parallel: bool,
) -> EStepResult {
    let log_tables = log_probability_tables(items, quadrature.points(), parallel);
    let log_weights = quadrature.log_weights();
    let patterns = data.patterns();

    let partials: Vec<EStepResult> = if parallel {
        patterns
            .par_chunks(PATTERN_CHUNK)
            .map(|chunk| accumulate_chunk(chunk, items, &log_tables, &log_weights))
            .collect()
    } else {
        patterns
            .chunks(PATTERN_CHUNK)
            .map(|chunk| accumulate_chunk(chunk, items, &log_tables, &log_weights))
            .collect()
    };

    let mut total = EStepResult::zeros(items, quadrature.len());
    for part in partials {
        total.merge(part);
    }
    total
}

/// Marginal log-likelihood without accumulating expected counts.
pub fn marginal_log_likelihood<M: ItemResponseModel>(
    data: &ResponseData,
    items: &[M],
    quadrature: &Quadrature,
) -> f64 {
    let log_tables = log_probability_tables(items, quadrature.points(), false);
    let log_weights = quadrature.log_weights();
    let n = quadrature.len();
    let mut log_joint = vec![0.0; n];
    let mut posterior = vec![0.0; n];
    data.patterns()
        .iter()
        .map(|p| {
            p.frequency()
                * pattern_posterior(p, &log_tables, &log_weights, &mut log_joint, &mut posterior)
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::irm::ItemModel;
    use crate::logistic::LogisticModel;
    use crate::polytomous::PartialCreditModel;
    use approx::assert_abs_diff_eq;

    fn fixture() -> (ResponseData, Vec<ItemModel>, Quadrature) {
        let mut rows = Vec::new();
        for i in 0..300 {
            let a = (i % 2) as i32;
            let b = ((i / 2) % 3) as i32;
            let c = if i % 7 == 0 { -1 } else { ((i / 5) % 2) as i32 };
            rows.extend_from_slice(&[a, b, c]);
        }
        let m = Array2::from_shape_vec((300, 3), rows).unwrap();
        let data = ResponseData::from_matrix(m.view()).unwrap();
        let items: Vec<ItemModel> = vec![
            LogisticModel::two_pl(1.2, -0.3).unwrap().into(),
            PartialCreditModel::gpcm(0.8, vec![-0.5, 0.7]).unwrap().into(),
            LogisticModel::three_pl(1.0, 0.4, 0.2).unwrap().into(),
        ];
        (data, items, Quadrature::normal(-5.0, 5.0, 31).unwrap())
    }

    #[test]
    fn expected_counts_respect_missing_responses() {
        let (data, items, q) = fixture();
        let result = e_step(&data, &items, &q, false);
        let n_observed = |item: usize| -> f64 {
            data.patterns()
                .iter()
                .filter(|p| p.response(item).is_some())
                .map(|p| p.frequency())
                .sum()
        };
        assert_abs_diff_eq!(result.expected[0].sum(), 300.0, epsilon = 1e-9);
        assert_abs_diff_eq!(result.expected[2].sum(), n_observed(2), epsilon = 1e-9);
        assert!(n_observed(2) < 300.0);
        assert_abs_diff_eq!(result.node_mass.iter().sum::<f64>(), 300.0, epsilon = 1e-9);
        let counts = data.category_counts(1, 3);
        for (c, &count) in counts.iter().enumerate() {
            assert_abs_diff_eq!(result.expected[1].column(c).sum(), count, epsilon = 1e-9);
        }
    }

    #[test]
    fn parallel_and_sequential_agree_exactly() {
        let (data, items, q) = fixture();
        let a = e_step(&data, &items, &q, true);
        let b = e_step(&data, &items, &q, false);
        assert_eq!(a, b);
        assert_eq!(a.log_likelihood, marginal_log_likelihood(&data, &items, &q));
    }

    #[test]
    fn log_likelihood_matches_direct_sum() {
        let (data, items, q) = fixture();
        let direct: f64 = data
            .patterns()
            .iter()
            .map(|p| {
                let marginal: f64 = q
                    .points()
                    .iter()
                    .zip(q.weights())
                    .map(|(&theta, &w)| {
                        let lik: f64 = (0..items.len())
                            .filter_map(|j| p.response(j).map(|c| items[j].probability(theta, c)))
                            .product();
                        w * lik
                    })
                    .sum();
                p.frequency() * marginal.ln()
            })
            .sum();
        let result = e_step(&data, &items, &q, true);
        assert_abs_diff_eq!(result.log_likelihood, direct, epsilon = 1e-9);
    }
}
