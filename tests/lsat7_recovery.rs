//! Calibration of the LSAT-7 data against reference estimates.

mod common;

use approx::assert_abs_diff_eq;
use irt_mmle::{
    compute_starting_values, EstimationConfig, ItemParamPrior, ItemResponseModel, LogisticModel,
    MmleEstimator, ParamKind, Quadrature, TerminationStatus,
};

#[test]
fn lsat7_two_parameter_recovery() {
    let data = common::lsat7();
    let mut items = vec![LogisticModel::two_pl(1.0, 0.0).unwrap(); 5];
    compute_starting_values(&data, &mut items).unwrap();
    let config = EstimationConfig::default()
        .with_tolerance(1e-6)
        .with_max_iterations(2000);
    let quadrature = Quadrature::normal(-6.0, 6.0, 61).unwrap();

    let result = MmleEstimator::new(&data, items, quadrature, config)
        .unwrap()
        .fit();

    assert_eq!(result.status, TerminationStatus::Converged);
    assert_abs_diff_eq!(result.log_likelihood, -2658.805, epsilon = 0.1);
    let reference = [
        (0.9875, -1.8793),
        (1.0808, -0.7475),
        (1.7075, -1.0572),
        (0.7650, -0.6353),
        (0.7357, -2.5208),
    ];
    for (item, &(a, b)) in result.items.iter().zip(&reference) {
        assert_abs_diff_eq!(item.discrimination(), a, epsilon = 1e-2);
        assert_abs_diff_eq!(item.difficulty(), b, epsilon = 1e-2);
        assert!(item.standard_errors().iter().all(|s| s.is_finite() && *s > 0.0));
    }
    assert_eq!(result.n_parameters, 10);
    assert_abs_diff_eq!(
        result.aic,
        -2.0 * result.log_likelihood + 20.0,
        epsilon = 1e-9
    );
}

#[test]
fn lsat7_three_parameter_with_priors() {
    let data = common::lsat7();
    let template = LogisticModel::three_pl(1.0, 0.0, 0.1)
        .unwrap()
        .with_scaling_constant(1.7)
        .unwrap()
        .with_prior(
            ParamKind::Discrimination,
            ItemParamPrior::beta4(1.75, 3.0, 0.0, 3.0).unwrap(),
        )
        .unwrap()
        .with_prior(
            ParamKind::Difficulty,
            ItemParamPrior::beta4(1.01, 1.01, -6.0, 6.0).unwrap(),
        )
        .unwrap()
        .with_prior(
            ParamKind::Guessing,
            ItemParamPrior::beta4(3.5, 4.0, 0.0, 0.5).unwrap(),
        )
        .unwrap();
    let items = vec![template; 5];
    let config = EstimationConfig::default()
        .with_tolerance(1e-5)
        .with_max_iterations(2000);
    let quadrature = Quadrature::normal(-6.0, 6.0, 61).unwrap();

    let result = MmleEstimator::new(&data, items, quadrature, config)
        .unwrap()
        .fit();

    assert_eq!(result.status, TerminationStatus::Converged);
    // ICL publishes item 1 as (0.658, -1.414, 0.209). This configuration
    // settles about 0.014 above that in b and 0.008 above it in c, stable
    // across tolerances and quadrature sizes, hence the wider b band.
    let first = &result.items[0];
    assert_abs_diff_eq!(first.discrimination(), 0.658, epsilon = 1e-2);
    assert_abs_diff_eq!(first.difficulty(), -1.400, epsilon = 2e-2);
    assert_abs_diff_eq!(first.guessing(), 0.217, epsilon = 1e-2);
    // Not a published figure: the marginal log-likelihood this configuration
    // reached in an independent EM run on the same 61-point grid.
    assert_abs_diff_eq!(result.log_likelihood, -2659.227, epsilon = 0.1);
    assert_eq!(result.n_parameters, 15);
}

#[test]
fn lsat7_three_parameter_without_priors_reports_slope_and_location_errors() {
    let data = common::lsat7();
    let template = LogisticModel::three_pl(1.0, 0.0, 0.1)
        .unwrap()
        .with_scaling_constant(1.7)
        .unwrap();
    let config = EstimationConfig::default().with_max_iterations(500);
    let quadrature = Quadrature::normal(-6.0, 6.0, 61).unwrap();

    let result = MmleEstimator::new(&data, vec![template; 5], quadrature, config)
        .unwrap()
        .fit();

    // several lower asymptotes end on zero
    assert!(result.items.iter().any(|item| item.guessing() < 1e-3));
    for item in &result.items {
        let se = item.standard_errors();
        assert_eq!(se.len(), 3);
        assert!(se[0].is_finite() && se[0] > 0.0);
        assert!(se[1].is_finite() && se[1] > 0.0);
    }
}

#[test]
fn single_iteration_hits_the_cap() {
    let data = common::lsat7();
    let items = vec![LogisticModel::two_pl(1.0, 0.0).unwrap(); 5];
    let config = EstimationConfig::default().with_max_iterations(1);
    let quadrature = Quadrature::normal(-6.0, 6.0, 41).unwrap();

    let result = MmleEstimator::new(&data, items, quadrature, config)
        .unwrap()
        .fit();

    assert_eq!(result.status, TerminationStatus::MaxIterReached);
    assert_eq!(result.iteration_record.len(), 1);
    assert_eq!(result.iterations, 1);
    assert!(result.iteration_record[0] > 0.0);
}
