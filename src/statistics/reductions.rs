//! Parallel reduction kernels over a whole slice
//!
//! Non-finite values (NaN, ±infinity) are skipped. A slice without any finite
//! value reduces to NaN, except for the sum which reduces to `0.0`.

use ndarray::parallel::prelude::*;
use ndarray::ArrayD;

/// Mean of the finite values of a slice, accumulated in f64
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub fn parallel_mean(data: &ArrayD<f32>) -> f32 {
    let (sum, count) = data
        .par_iter()
        .filter(|v| v.is_finite())
        .map(|&v| (f64::from(v), 1_usize))
        .reduce(|| (0.0, 0), |a, b| (a.0 + b.0, a.1 + b.1));

    if count > 0 {
        (sum / count as f64) as f32
    } else {
        f32::NAN
    }
}

/// Sum of the finite values of a slice, accumulated in f64
#[allow(clippy::cast_possible_truncation)]
pub fn parallel_sum(data: &ArrayD<f32>) -> f32 {
    data.par_iter()
        .filter(|v| v.is_finite())
        .map(|&v| f64::from(v))
        .sum::<f64>() as f32
}

/// Minimum finite value of a slice
pub fn parallel_min(data: &ArrayD<f32>) -> f32 {
    let min = data
        .par_iter()
        .filter(|v| v.is_finite())
        .copied()
        .reduce(|| f32::INFINITY, f32::min);

    // No finite value found
    if min == f32::INFINITY {
        f32::NAN
    } else {
        min
    }
}

/// Maximum finite value of a slice
pub fn parallel_max(data: &ArrayD<f32>) -> f32 {
    let max = data
        .par_iter()
        .filter(|v| v.is_finite())
        .copied()
        .reduce(|| f32::NEG_INFINITY, f32::max);

    if max == f32::NEG_INFINITY {
        f32::NAN
    } else {
        max
    }
}
