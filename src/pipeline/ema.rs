//! Exponential moving average over market-cap series
//!
//! EMA_t = value_t * k + EMA_{t-1} * (1 - k), with k = 2 / (periods + 1)
//!
//! The fold is seeded with the earliest value (no SMA warmup), so a single
//! snapshot smooths to itself.

use super::error::SmoothingError;

/// Smoothing factor for an EMA over `periods` periods
pub fn smoothing_factor(periods: u32) -> Result<f64, SmoothingError> {
    if periods == 0 {
        return Err(SmoothingError::InvalidPeriods);
    }
    Ok(2.0 / (f64::from(periods) + 1.0))
}

/// Fold `values` (oldest-first) into a single EMA value
///
/// Fails on an empty series instead of returning a default.
pub fn ema(values: &[f64], periods: u32) -> Result<f64, SmoothingError> {
    let k = smoothing_factor(periods)?;
    let (first, rest) = values.split_first().ok_or(SmoothingError::EmptySeries)?;

    Ok(rest
        .iter()
        .fold(*first, |prev, value| value * k + prev * (1.0 - k)))
}
