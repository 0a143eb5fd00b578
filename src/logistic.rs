//! Binary logistic items: the 4PL and its 1PL/2PL/3PL restrictions.
//!
//! `P(X = 1 | theta) = c + (d - c) * sigmoid(D * a * (theta - b))`. The
//! restricted forms hold the unused asymptotes at `c = 0`, `d = 1` (and `a`
//! at its constructed value for the 1PL), so every binary item shares one
//! probability and gradient implementation.

use serde::{Deserialize, Serialize};

use crate::error::{IrtError, Result};
use crate::irm::{rescale_standard_errors, ItemResponseModel, ModelType, ParamKind, LOGISTIC_SCALE};
use crate::priors::ItemParamPrior;
use crate::utils::sigmoid;

pub const MIN_DISCRIMINATION: f64 = 1e-3;
pub const MAX_DISCRIMINATION: f64 = 50.0;
pub const MAX_LOCATION: f64 = 40.0;
/// Guessing used to seed 3PL/4PL items that start with `c = 0`.
pub const DEFAULT_GUESSING: f64 = 0.1;
/// Upper asymptote used to seed 4PL items that start with `d = 1`.
pub const DEFAULT_SLIPPING: f64 = 0.99;

const A: usize = 0;
const B: usize = 1;
const C: usize = 2;
const D: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogisticParameters {
    pub discrimination: f64,
    pub difficulty: f64,
    pub guessing: f64,
    pub slipping: f64,
}

impl LogisticParameters {
    fn to_array(self) -> [f64; 4] {
        [
            self.discrimination,
            self.difficulty,
            self.guessing,
            self.slipping,
        ]
    }

    fn from_array(v: [f64; 4]) -> Self {
        LogisticParameters {
            discrimination: v[A],
            difficulty: v[B],
            guessing: v[C],
            slipping: v[D],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogisticModel {
    model_type: ModelType,
    scaling: f64,
    current: LogisticParameters,
    proposal: LogisticParameters,
    fixed: bool,
    priors: [Option<ItemParamPrior>; 4],
    standard_errors: Vec<f64>,
}

impl LogisticModel {
    pub fn new(
        model_type: ModelType,
        discrimination: f64,
        difficulty: f64,
        guessing: f64,
        slipping: f64,
    ) -> Result<Self> {
        if !model_type.is_binary() {
            return Err(IrtError::parameter(
                "model_type",
                format!("{model_type:?} is not a binary logistic model"),
            ));
        }
        let params = LogisticParameters {
            discrimination,
            difficulty,
            guessing,
            slipping,
        };
        validate(&params)?;
        let restricted_c = matches!(model_type, ModelType::OnePl | ModelType::TwoPl);
        if restricted_c && guessing != 0.0 {
            return Err(IrtError::parameter("guessing", "must be 0 for 1PL/2PL items"));
        }
        if model_type != ModelType::FourPl && slipping != 1.0 {
            return Err(IrtError::parameter("slipping", "must be 1 below the 4PL"));
        }
        Ok(LogisticModel {
            model_type,
            scaling: LOGISTIC_SCALE,
            current: params,
            proposal: params,
            fixed: false,
            priors: [None; 4],
            standard_errors: Vec::new(),
        })
    }

    /// Rasch-type item with unit discrimination.
    pub fn one_pl(difficulty: f64) -> Result<Self> {
        Self::new(ModelType::OnePl, 1.0, difficulty, 0.0, 1.0)
    }

    /// 1PL with a common, fixed discrimination.
    pub fn one_pl_with_discrimination(discrimination: f64, difficulty: f64) -> Result<Self> {
        Self::new(ModelType::OnePl, discrimination, difficulty, 0.0, 1.0)
    }

    pub fn two_pl(discrimination: f64, difficulty: f64) -> Result<Self> {
        Self::new(ModelType::TwoPl, discrimination, difficulty, 0.0, 1.0)
    }

    pub fn three_pl(discrimination: f64, difficulty: f64, guessing: f64) -> Result<Self> {
        Self::new(ModelType::ThreePl, discrimination, difficulty, guessing, 1.0)
    }

    pub fn four_pl(discrimination: f64, difficulty: f64, guessing: f64, slipping: f64) -> Result<Self> {
        Self::new(ModelType::FourPl, discrimination, difficulty, guessing, slipping)
    }

    pub fn with_scaling_constant(mut self, scaling: f64) -> Result<Self> {
        if !(scaling.is_finite() && scaling > 0.0) {
            return Err(IrtError::parameter("scaling", format!("must be positive, got {scaling}")));
        }
        self.scaling = scaling;
        Ok(self)
    }

    pub fn with_prior(mut self, kind: ParamKind, prior: ItemParamPrior) -> Result<Self> {
        let slot = slot_of(kind).ok_or(IrtError::ParameterNotEstimated(kind.name()))?;
        if !self.free_slots().contains(&slot) {
            return Err(IrtError::ParameterNotEstimated(kind.name()));
        }
        self.priors[slot] = Some(prior);
        Ok(self)
    }

    pub fn with_fixed(mut self, fixed: bool) -> Self {
        self.fixed = fixed;
        self
    }

    pub fn discrimination(&self) -> f64 {
        self.current.discrimination
    }

    pub fn difficulty(&self) -> f64 {
        self.current.difficulty
    }

    pub fn guessing(&self) -> f64 {
        self.current.guessing
    }

    pub fn slipping(&self) -> f64 {
        self.current.slipping
    }

    pub fn current(&self) -> LogisticParameters {
        self.current
    }

    pub fn proposal(&self) -> LogisticParameters {
        self.proposal
    }

    /// Clamped into `[MIN_DISCRIMINATION, MAX_DISCRIMINATION]`. Ignored for
    /// 1PL items, fixed items and non-finite values.
    pub fn set_proposal_discrimination(&mut self, discrimination: f64) {
        if !self.fixed && self.model_type != ModelType::OnePl && discrimination.is_finite() {
            self.proposal.discrimination = discrimination.clamp(MIN_DISCRIMINATION, MAX_DISCRIMINATION);
        }
    }

    pub fn set_proposal_difficulty(&mut self, difficulty: f64) {
        if !self.fixed && difficulty.is_finite() {
            self.proposal.difficulty = difficulty.clamp(-MAX_LOCATION, MAX_LOCATION);
        }
    }

    pub fn set_proposal_guessing(&mut self, guessing: f64) {
        if !self.fixed && !guessing.is_nan() {
            self.proposal.guessing = guessing.clamp(0.0, 1.0);
        }
    }

    pub fn set_proposal_slipping(&mut self, slipping: f64) {
        if !self.fixed && !slipping.is_nan() {
            self.proposal.slipping = slipping.clamp(0.0, 1.0);
        }
    }

    fn free_slots(&self) -> &'static [usize] {
        match self.model_type {
            ModelType::OnePl => &[B],
            ModelType::TwoPl => &[A, B],
            ModelType::ThreePl => &[A, B, C],
            _ => &[A, B, C, D],
        }
    }

    #[inline]
    fn logit(&self, theta: f64) -> f64 {
        self.scaling * self.current.discrimination * (theta - self.current.difficulty)
    }

    /// P(X = 1 | theta).
    #[inline]
    fn p_correct(&self, theta: f64) -> f64 {
        let c = self.current.guessing;
        let d = self.current.slipping;
        c + (d - c) * sigmoid(self.logit(theta))
    }

    /// P(X = 0 | theta), computed from the complementary tail.
    #[inline]
    fn p_incorrect(&self, theta: f64) -> f64 {
        let c = self.current.guessing;
        let d = self.current.slipping;
        (1.0 - d) + (d - c) * sigmoid(-self.logit(theta))
    }
}

fn slot_of(kind: ParamKind) -> Option<usize> {
    match kind {
        ParamKind::Discrimination => Some(A),
        ParamKind::Difficulty => Some(B),
        ParamKind::Guessing => Some(C),
        ParamKind::Slipping => Some(D),
        ParamKind::Step(_) => None,
    }
}

fn kind_of(slot: usize) -> ParamKind {
    match slot {
        A => ParamKind::Discrimination,
        B => ParamKind::Difficulty,
        C => ParamKind::Guessing,
        _ => ParamKind::Slipping,
    }
}

fn validate(p: &LogisticParameters) -> Result<()> {
    if !(p.discrimination.is_finite() && p.discrimination > 0.0) {
        return Err(IrtError::parameter(
            "discrimination",
            format!("must be positive and finite, got {}", p.discrimination),
        ));
    }
    if !p.difficulty.is_finite() {
        return Err(IrtError::parameter("difficulty", "must be finite"));
    }
    if !(0.0..=1.0).contains(&p.guessing) || !(0.0..=1.0).contains(&p.slipping) {
        return Err(IrtError::parameter("guessing", "asymptotes must lie in [0, 1]"));
    }
    if p.guessing > p.slipping {
        return Err(IrtError::parameter(
            "guessing",
            format!("lower asymptote {} exceeds upper asymptote {}", p.guessing, p.slipping),
        ));
    }
    Ok(())
}

impl ItemResponseModel for LogisticModel {
    fn model_type(&self) -> ModelType {
        self.model_type
    }

    fn n_categories(&self) -> usize {
        2
    }

    fn scaling_constant(&self) -> f64 {
        self.scaling
    }

    fn probability(&self, theta: f64, category: usize) -> f64 {
        match category {
            0 => self.p_incorrect(theta),
            1 => self.p_correct(theta),
            _ => 0.0,
        }
    }

    fn expected_value(&self, theta: f64) -> f64 {
        self.p_correct(theta)
    }

    fn gradient(&self, theta: f64, category: usize) -> Vec<f64> {
        let slots = self.free_slots();
        let z = self.logit(theta);
        if category > 1 || z.is_nan() {
            return vec![0.0; slots.len()];
        }
        let p = self.current;
        let s = sigmoid(z);
        // the slope terms vanish in the tails; theta - b is infinite there
        let ds = if z.is_finite() { s * sigmoid(-z) } else { 0.0 };
        let range = p.slipping - p.guessing;
        let sign = if category == 1 { 1.0 } else { -1.0 };
        slots
            .iter()
            .map(|&slot| {
                let g = match slot {
                    A if ds == 0.0 => 0.0,
                    A => range * ds * self.scaling * (theta - p.difficulty),
                    B => -range * ds * self.scaling * p.discrimination,
                    C => 1.0 - s,
                    _ => s,
                };
                sign * g
            })
            .collect()
    }

    fn probability_deriv_theta(&self, theta: f64, category: usize) -> f64 {
        let z = self.logit(theta);
        if category > 1 || !z.is_finite() {
            return 0.0;
        }
        let p = self.current;
        let d = (p.slipping - p.guessing) * sigmoid(z) * sigmoid(-z) * self.scaling * p.discrimination;
        if category == 1 {
            d
        } else {
            -d
        }
    }

    fn deriv_theta(&self, theta: f64) -> f64 {
        self.probability_deriv_theta(theta, 1)
    }

    fn scale(&mut self, intercept: f64, slope: f64) -> Result<()> {
        if !(slope.is_finite() && slope > 0.0 && intercept.is_finite()) {
            return Err(IrtError::InvalidSlope(slope));
        }
        for params in [&mut self.current, &mut self.proposal] {
            params.discrimination /= slope;
            params.difficulty = slope * params.difficulty + intercept;
        }
        let kinds = self.parameter_kinds();
        rescale_standard_errors(&kinds, &mut self.standard_errors, slope);
        Ok(())
    }

    fn parameter_kinds(&self) -> Vec<ParamKind> {
        self.free_slots().iter().map(|&s| kind_of(s)).collect()
    }

    fn parameters(&self) -> Vec<f64> {
        let all = self.current.to_array();
        self.free_slots().iter().map(|&s| all[s]).collect()
    }

    fn set_parameters(&mut self, values: &[f64]) -> Result<()> {
        let slots = self.free_slots();
        if values.len() != slots.len() {
            return Err(IrtError::LengthMismatch {
                expected: slots.len(),
                got: values.len(),
            });
        }
        let mut all = self.current.to_array();
        for (&slot, &v) in slots.iter().zip(values) {
            all[slot] = v;
        }
        let params = LogisticParameters::from_array(all);
        validate(&params)?;
        self.current = params;
        self.proposal = params;
        Ok(())
    }

    fn proposal_parameters(&self) -> Vec<f64> {
        let all = self.proposal.to_array();
        self.free_slots().iter().map(|&s| all[s]).collect()
    }

    fn set_proposal_parameters(&mut self, values: &[f64]) {
        if self.fixed {
            return;
        }
        for (&slot, &v) in self.free_slots().iter().zip(values) {
            match slot {
                A => self.set_proposal_discrimination(v),
                B => self.set_proposal_difficulty(v),
                C => self.set_proposal_guessing(v),
                _ => self.set_proposal_slipping(v),
            }
        }
    }

    fn accept_all_proposal_values(&mut self) -> f64 {
        let mut next = self.proposal;
        next.guessing = next.guessing.clamp(0.0, 1.0);
        next.slipping = next.slipping.clamp(0.0, 1.0);
        next.guessing = next.guessing.min(next.slipping);
        let delta = self
            .current
            .to_array()
            .iter()
            .zip(next.to_array())
            .map(|(old, new)| (new - old).abs())
            .fold(0.0, f64::max);
        self.current = next;
        self.proposal = next;
        delta
    }

    fn constrain(&self, values: &mut [f64]) -> bool {
        let mut all = self.current.to_array();
        for (&slot, v) in self.free_slots().iter().zip(values.iter_mut()) {
            if !v.is_finite() {
                return false;
            }
            *v = match slot {
                A => v.clamp(MIN_DISCRIMINATION, MAX_DISCRIMINATION),
                B => v.clamp(-MAX_LOCATION, MAX_LOCATION),
                _ => v.clamp(0.0, 1.0),
            };
            all[slot] = *v;
        }
        all[C] < all[D]
    }

    fn prior(&self, index: usize) -> Option<&ItemParamPrior> {
        self.free_slots()
            .get(index)
            .and_then(|&slot| self.priors[slot].as_ref())
    }

    fn is_fixed(&self) -> bool {
        self.fixed
    }

    fn set_fixed(&mut self, fixed: bool) {
        self.fixed = fixed;
    }

    fn standard_errors(&self) -> &[f64] {
        &self.standard_errors
    }

    fn set_standard_errors(&mut self, standard_errors: Vec<f64>) {
        self.standard_errors = standard_errors;
    }

    fn set_starting_values(&mut self, discrimination: f64, thresholds: &[f64]) {
        if self.fixed {
            return;
        }
        let mut all = self.current.to_array();
        if self.model_type != ModelType::OnePl && discrimination.is_finite() {
            all[A] = discrimination.clamp(MIN_DISCRIMINATION, MAX_DISCRIMINATION);
        }
        if let Some(&b) = thresholds.first().filter(|b| b.is_finite()) {
            all[B] = b.clamp(-MAX_LOCATION, MAX_LOCATION);
        }
        if matches!(self.model_type, ModelType::ThreePl | ModelType::FourPl) && all[C] == 0.0 {
            all[C] = DEFAULT_GUESSING;
        }
        if self.model_type == ModelType::FourPl && all[D] == 1.0 {
            all[D] = DEFAULT_SLIPPING;
        }
        for &slot in self.free_slots() {
            if let Some(prior) = &self.priors[slot] {
                all[slot] = prior.clamp_into_support(all[slot]);
            }
        }
        all[C] = all[C].min(all[D]);
        let params = LogisticParameters::from_array(all);
        self.current = params;
        self.proposal = params;
    }
}
