use crate::database::models::CandleSeries;
use crate::error::{PipelineError, Result};
use crate::indicators::ta::{run, ExponentialMovingAverage, SimpleMovingAverage};
use crate::indicators::window::require_len;
use serde::{Deserialize, Serialize};

/// Share of total volume that defines the value area.
pub const VALUE_AREA_SHARE: f64 = 0.70;

/// Volume traded per price bin over a set of bars. Each bar's volume is
/// assigned to the bin holding its typical price.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeProfile {
    pub price_low: f64,
    pub price_high: f64,
    pub bin_width: f64,
    pub volumes: Vec<f64>,
    /// Point of control: centre of the busiest bin
    pub poc: f64,
    pub value_area_high: f64,
    pub value_area_low: f64,
}

impl VolumeProfile {
    fn build(high: &[f64], low: &[f64], close: &[f64], volume: &[f64], bins: usize) -> Option<Self> {
        let total: f64 = volume.iter().sum();
        if bins == 0 || total <= 0.0 {
            return None;
        }

        let price_low = low.iter().copied().fold(f64::INFINITY, f64::min);
        let price_high = high.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if !price_low.is_finite() || !price_high.is_finite() {
            return None;
        }

        let range = price_high - price_low;
        if range <= 0.0 {
            return Some(Self {
                price_low,
                price_high,
                bin_width: 0.0,
                volumes: vec![total],
                poc: price_low,
                value_area_high: price_low,
                value_area_low: price_low,
            });
        }

        let bin_width = range / bins as f64;
        let mut volumes = vec![0.0; bins];
        for i in 0..volume.len() {
            let typical = (high[i] + low[i] + close[i]) / 3.0;
            let bin = (((typical - price_low) / bin_width).floor() as usize).min(bins - 1);
            volumes[bin] += volume[i];
        }

        let mut poc_bin = 0;
        for (i, v) in volumes.iter().enumerate() {
            if *v > volumes[poc_bin] {
                poc_bin = i;
            }
        }

        // grow the value area from the POC towards the heavier neighbour
        let (mut lo, mut hi) = (poc_bin, poc_bin);
        let mut accumulated = volumes[poc_bin];
        while accumulated < total * VALUE_AREA_SHARE {
            let below = if lo > 0 { Some(volumes[lo - 1]) } else { None };
            let above = if hi + 1 < bins { Some(volumes[hi + 1]) } else { None };
            match (below, above) {
                (None, None) => break,
                (Some(b), Some(a)) if b > a => {
                    lo -= 1;
                    accumulated += b;
                }
                (_, Some(a)) => {
                    hi += 1;
                    accumulated += a;
                }
                (Some(b), None) => {
                    lo -= 1;
                    accumulated += b;
                }
            }
        }

        Some(Self {
            price_low,
            price_high,
            bin_width,
            poc: price_low + (poc_bin as f64 + 0.5) * bin_width,
            value_area_high: price_low + (hi + 1) as f64 * bin_width,
            value_area_low: price_low + lo as f64 * bin_width,
            volumes,
        })
    }
}

#[derive(Debug, Clone)]
pub struct RollingVolumeProfile {
    pub poc: Vec<f64>,
    pub value_area_high: Vec<f64>,
    pub value_area_low: Vec<f64>,
}

pub struct VolumeCalculator;

impl VolumeCalculator {
    // Calculate OBV (On Balance Volume), starting from zero on the first bar
    pub fn calculate_obv(series: &CandleSeries) -> Result<Vec<f64>> {
        require_len("OBV", series.len(), 2)?;

        let volume = series.volume_or_zero();
        let mut results = Vec::with_capacity(series.len());
        let mut obv = 0.0;
        results.push(obv);

        for i in 1..series.len() {
            if series.close[i] > series.close[i - 1] {
                obv += volume[i];
            } else if series.close[i] < series.close[i - 1] {
                obv -= volume[i];
            }
            results.push(obv);
        }

        Ok(results)
    }

    // Calculate Accumulation/Distribution Line
    pub fn calculate_ad_line(series: &CandleSeries) -> Result<Vec<f64>> {
        require_len("A/D Line", series.len(), 1)?;

        let volume = series.volume_or_zero();
        let mut ad_line = 0.0;

        Ok((0..series.len())
            .map(|i| {
                let (high, low, close) = (series.high[i], series.low[i], series.close[i]);
                let range = high - low;
                let mfm = if range > 0.0 {
                    ((close - low) - (high - close)) / range
                } else {
                    0.0
                };
                ad_line += mfm * volume[i];
                ad_line
            })
            .collect())
    }

    // Chaikin Oscillator = EMA(A/D, fast) - EMA(A/D, slow)
    pub fn calculate_chaikin_oscillator(
        series: &CandleSeries,
        fast_period: usize,
        slow_period: usize,
    ) -> Result<Vec<f64>> {
        if fast_period >= slow_period {
            return Err(PipelineError::InvalidParameter(
                "Fast period must be less than slow period".to_string(),
            ));
        }
        let fast = ExponentialMovingAverage::new(fast_period)?;
        let slow = ExponentialMovingAverage::new(slow_period)?;
        require_len("Chaikin Oscillator", series.len(), slow_period)?;

        let ad_line = Self::calculate_ad_line(series)?;
        let fast = run(fast, &ad_line);
        let slow = run(slow, &ad_line);

        Ok(fast.iter().zip(&slow).map(|(f, s)| f - s).collect())
    }

    pub fn calculate_volume_sma(series: &CandleSeries, period: usize) -> Result<Vec<f64>> {
        let sma = SimpleMovingAverage::new(period)?;
        require_len("Volume SMA", series.len(), period)?;
        Ok(run(sma, &series.volume_or_zero()))
    }

    /// Profile of the whole series.
    pub fn volume_profile(series: &CandleSeries, bins: usize) -> Result<VolumeProfile> {
        if bins == 0 {
            return Err(PipelineError::InvalidParameter(
                "Volume profile needs at least one bin".to_string(),
            ));
        }
        require_len("Volume Profile", series.len(), 1)?;

        VolumeProfile::build(
            &series.high,
            &series.low,
            &series.close,
            &series.volume_or_zero(),
            bins,
        )
        .ok_or_else(|| PipelineError::InsufficientData {
            indicator: "Volume Profile",
            required: 1,
            available: 0,
        })
    }

    /// POC and value area over a trailing window of `window` bars.
    pub fn calculate_rolling_volume_profile(
        series: &CandleSeries,
        window: usize,
        bins: usize,
    ) -> Result<RollingVolumeProfile> {
        if window == 0 || bins == 0 {
            return Err(PipelineError::InvalidParameter(
                "Volume profile window and bins must be greater than 0".to_string(),
            ));
        }
        require_len("Volume Profile", series.len(), window)?;

        let n = series.len();
        let volume = series.volume_or_zero();
        let mut out = RollingVolumeProfile {
            poc: vec![f64::NAN; n],
            value_area_high: vec![f64::NAN; n],
            value_area_low: vec![f64::NAN; n],
        };

        for i in (window - 1)..n {
            let range = (i + 1 - window)..(i + 1);
            if let Some(profile) = VolumeProfile::build(
                &series.high[range.clone()],
                &series.low[range.clone()],
                &series.close[range.clone()],
                &volume[range],
                bins,
            ) {
                out.poc[i] = profile.poc;
                out.value_area_high[i] = profile.value_area_high;
                out.value_area_low[i] = profile.value_area_low;
            }
        }

        Ok(out)
    }
}
