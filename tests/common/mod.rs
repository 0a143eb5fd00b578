//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use irt_mmle::{ResponseData, ResponsePattern};

/// LSAT-7 pattern frequencies, patterns `00000` through `11111` with item 1
/// as the most significant digit. N = 1000.
const LSAT7_FREQUENCIES: [f64; 32] = [
    12.0, 19.0, 1.0, 7.0, 3.0, 19.0, 3.0, 17.0, 10.0, 5.0, 3.0, 7.0, 7.0, 23.0, 8.0, 28.0, 7.0,
    39.0, 11.0, 34.0, 14.0, 51.0, 15.0, 90.0, 6.0, 25.0, 7.0, 35.0, 18.0, 136.0, 32.0, 308.0,
];

pub fn lsat7() -> ResponseData {
    let patterns = LSAT7_FREQUENCIES
        .iter()
        .enumerate()
        .map(|(index, &freq)| {
            let responses = (0..5).map(|j| ((index >> (4 - j)) & 1) as i32).collect();
            ResponsePattern::new(responses, freq).expect("valid pattern")
        })
        .collect();
    ResponseData::new(patterns).expect("valid data")
}

/// Person-level responses converted to aggregated patterns.
pub fn from_rows(rows: &ndarray::Array2<i32>) -> ResponseData {
    ResponseData::from_matrix(rows.view()).expect("valid matrix")
}
