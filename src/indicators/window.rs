// Rolling-window helpers shared by the indicator families.
// All outputs are aligned with the input; positions without a full window are NaN.

use crate::error::{PipelineError, Result};

pub fn require_len(indicator: &'static str, available: usize, required: usize) -> Result<()> {
    if available < required {
        return Err(PipelineError::InsufficientData {
            indicator,
            required,
            available,
        });
    }
    Ok(())
}

pub fn rolling_max(values: &[f64], period: usize) -> Vec<f64> {
    rolling(values, period, |w| w.iter().copied().fold(f64::NEG_INFINITY, f64::max))
}

pub fn rolling_min(values: &[f64], period: usize) -> Vec<f64> {
    rolling(values, period, |w| w.iter().copied().fold(f64::INFINITY, f64::min))
}

pub fn rolling<F>(values: &[f64], period: usize, f: F) -> Vec<f64>
where
    F: Fn(&[f64]) -> f64,
{
    let mut out = vec![f64::NAN; values.len()];
    if period == 0 {
        return out;
    }
    for i in (period - 1)..values.len() {
        out[i] = f(&values[i + 1 - period..=i]);
    }
    out
}

/// Simple moving average of a derived column that itself has a NaN warm-up.
/// Averaging starts at the first defined value.
pub fn sma_defined(values: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    let start = match values.iter().position(|v| !v.is_nan()) {
        Some(start) => start,
        None => return out,
    };
    let smoothed = rolling(&values[start..], period, |w| w.iter().sum::<f64>() / period as f64);
    out[start..].copy_from_slice(&smoothed);
    out
}

/// Shift forward by `periods` bars (value at i comes from i - periods).
pub fn shift_forward(values: &[f64], periods: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    for i in periods..values.len() {
        out[i] = values[i - periods];
    }
    out
}

/// Shift back by `periods` bars (value at i comes from i + periods).
pub fn shift_back(values: &[f64], periods: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    for i in 0..values.len().saturating_sub(periods) {
        out[i] = values[i + periods];
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rolling_extremes() {
        let v = [3.0, 1.0, 4.0, 1.0, 5.0];
        let max = rolling_max(&v, 3);
        let min = rolling_min(&v, 3);
        assert!(max[1].is_nan());
        assert_eq!(&max[2..], &[4.0, 4.0, 5.0]);
        assert_eq!(&min[2..], &[1.0, 1.0, 1.0]);
    }

    #[test]
    fn shifts() {
        let v = [1.0, 2.0, 3.0];
        let fwd = shift_forward(&v, 1);
        let back = shift_back(&v, 1);
        assert!(fwd[0].is_nan());
        assert_eq!(&fwd[1..], &[1.0, 2.0]);
        assert_eq!(&back[..2], &[2.0, 3.0]);
        assert!(back[2].is_nan());
    }
}
