//! Frequency-weighted response patterns.
//!
//! Identical response vectors are stored once with a frequency, so every
//! E-step cost scales with the number of distinct patterns.

use std::collections::HashMap;

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

use crate::error::{IrtError, Result};
use crate::irm::ItemResponseModel;

/// Code stored for a missing response. Any negative input code is treated as missing.
pub const MISSING: i32 = -1;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponsePattern {
    responses: Vec<i32>,
    frequency: f64,
}

impl ResponsePattern {
    pub fn new(responses: Vec<i32>, frequency: f64) -> Result<Self> {
        if !(frequency.is_finite() && frequency > 0.0) {
            return Err(IrtError::InvalidFrequency(frequency));
        }
        let responses = responses
            .into_iter()
            .map(|r| if r < 0 { MISSING } else { r })
            .collect();
        Ok(ResponsePattern {
            responses,
            frequency,
        })
    }

    pub fn responses(&self) -> &[i32] {
        &self.responses
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    pub fn len(&self) -> usize {
        self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }

    /// Observed category for `item`, or `None` if missing.
    #[inline]
    pub fn response(&self, item: usize) -> Option<usize> {
        match self.responses[item] {
            r if r >= 0 => Some(r as usize),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseData {
    patterns: Vec<ResponsePattern>,
    n_items: usize,
}

impl ResponseData {
    pub fn new(patterns: Vec<ResponsePattern>) -> Result<Self> {
        let n_items = patterns.first().map(|p| p.len()).ok_or(IrtError::EmptyData)?;
        if n_items == 0 {
            return Err(IrtError::EmptyData);
        }
        for (index, p) in patterns.iter().enumerate() {
            if p.len() != n_items {
                return Err(IrtError::PatternLength {
                    pattern: index,
                    expected: n_items,
                    got: p.len(),
                });
            }
        }
        Ok(ResponseData { patterns, n_items })
    }

    /// Collapse identical rows of a persons x items matrix into weighted
    /// patterns, keeping first-appearance order.
    pub fn from_matrix(responses: ArrayView2<i32>) -> Result<Self> {
        if responses.nrows() == 0 || responses.ncols() == 0 {
            return Err(IrtError::EmptyData);
        }
        let mut index: HashMap<Vec<i32>, usize> = HashMap::new();
        let mut rows: Vec<(Vec<i32>, f64)> = Vec::new();
        for row in responses.rows() {
            let key: Vec<i32> = row.iter().map(|&r| if r < 0 { MISSING } else { r }).collect();
            match index.get(&key) {
                Some(&slot) => rows[slot].1 += 1.0,
                None => {
                    index.insert(key.clone(), rows.len());
                    rows.push((key, 1.0));
                }
            }
        }
        let patterns = rows
            .into_iter()
            .map(|(r, f)| ResponsePattern::new(r, f))
            .collect::<Result<Vec<_>>>()?;
        Self::new(patterns)
    }

    pub fn patterns(&self) -> &[ResponsePattern] {
        &self.patterns
    }

    pub fn n_items(&self) -> usize {
        self.n_items
    }

    pub fn n_patterns(&self) -> usize {
        self.patterns.len()
    }

    pub fn total_frequency(&self) -> f64 {
        self.patterns.iter().map(|p| p.frequency).sum()
    }

    /// Check item count and that every observed code is a valid category.
    pub fn validate_for<M: ItemResponseModel>(&self, models: &[M]) -> Result<()> {
        if models.len() != self.n_items {
            return Err(IrtError::ItemCountMismatch {
                models: models.len(),
                items: self.n_items,
            });
        }
        for p in &self.patterns {
            for (item, (&code, model)) in p.responses.iter().zip(models).enumerate() {
                if code >= 0 && code as usize >= model.n_categories() {
                    return Err(IrtError::CategoryOutOfRange {
                        item,
                        category: code,
                        n_categories: model.n_categories(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Frequency-weighted counts of each category of `item`, ignoring missing.
    pub fn category_counts(&self, item: usize, n_categories: usize) -> Vec<f64> {
        let mut counts = vec![0.0; n_categories];
        for p in &self.patterns {
            if let Some(k) = p.response(item) {
                if k < n_categories {
                    counts[k] += p.frequency;
                }
            }
        }
        counts
    }

    /// True when every non-missing response to `item` falls in one category.
    pub fn is_extreme_item(&self, item: usize) -> bool {
        let mut seen = None;
        for p in &self.patterns {
            if let Some(k) = p.response(item) {
                match seen {
                    None => seen = Some(k),
                    Some(s) if s != k => return false,
                    _ => {}
                }
            }
        }
        true
    }
}
