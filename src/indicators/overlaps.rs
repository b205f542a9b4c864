use crate::database::models::CandleSeries;
use crate::error::Result;
use crate::indicators::ta::{
    run, ExponentialMovingAverage, Next, SimpleMovingAverage, StandardDeviation,
};
use crate::indicators::window::{require_len, rolling_max, rolling_min, shift_back, shift_forward};

#[derive(Debug, Clone)]
pub struct BollingerBands {
    pub middle: Vec<f64>,
    pub upper: Vec<f64>,
    pub lower: Vec<f64>,
    /// (upper - lower) / middle
    pub width: Vec<f64>,
    /// (close - lower) / (upper - lower)
    pub percent_b: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct Ichimoku {
    pub tenkan: Vec<f64>,
    pub kijun: Vec<f64>,
    pub senkou_a: Vec<f64>,
    pub senkou_b: Vec<f64>,
    pub chikou: Vec<f64>,
}

pub struct OverlapCalculator;

impl OverlapCalculator {
    // Calculate SMA (Simple Moving Average)
    pub fn calculate_sma(series: &CandleSeries, period: usize) -> Result<Vec<f64>> {
        let sma = SimpleMovingAverage::new(period)?;
        require_len("SMA", series.len(), period)?;
        Ok(run(sma, &series.close))
    }

    // Calculate EMA (Exponential Moving Average)
    pub fn calculate_ema(series: &CandleSeries, period: usize) -> Result<Vec<f64>> {
        let ema = ExponentialMovingAverage::new(period)?;
        require_len("EMA", series.len(), period)?;
        Ok(run(ema, &series.close))
    }

    // Calculate Bollinger Bands over closes
    pub fn calculate_bollinger_bands(
        series: &CandleSeries,
        period: usize,
        deviation_multiplier: f64,
    ) -> Result<BollingerBands> {
        let mut sma = SimpleMovingAverage::new(period)?;
        let mut stddev = StandardDeviation::new(period)?;
        require_len("Bollinger Bands", series.len(), period)?;

        let n = series.len();
        let mut bands = BollingerBands {
            middle: Vec::with_capacity(n),
            upper: Vec::with_capacity(n),
            lower: Vec::with_capacity(n),
            width: Vec::with_capacity(n),
            percent_b: Vec::with_capacity(n),
        };

        for &close in &series.close {
            let middle = sma.next(close);
            let deviation = stddev.next(close) * deviation_multiplier;
            let upper = middle + deviation;
            let lower = middle - deviation;

            let width = if middle != 0.0 { (upper - lower) / middle } else { f64::NAN };
            let percent_b = if upper != lower {
                (close - lower) / (upper - lower)
            } else {
                f64::NAN
            };

            bands.middle.push(middle);
            bands.upper.push(upper);
            bands.lower.push(lower);
            bands.width.push(width);
            bands.percent_b.push(percent_b);
        }

        Ok(bands)
    }

    /// Ichimoku cloud. Senkou spans are plotted `kijun_period` bars ahead and the
    /// chikou span `kijun_period` bars behind, so the last bars have no chikou.
    pub fn calculate_ichimoku(
        series: &CandleSeries,
        tenkan_period: usize,
        kijun_period: usize,
        senkou_b_period: usize,
    ) -> Result<Ichimoku> {
        for period in [tenkan_period, kijun_period, senkou_b_period] {
            if period == 0 {
                return Err(crate::error::PipelineError::InvalidParameter(
                    "Ichimoku periods must be greater than 0".to_string(),
                ));
            }
        }
        require_len("Ichimoku", series.len(), kijun_period)?;

        let midpoint = |period: usize| -> Vec<f64> {
            let highs = rolling_max(&series.high, period);
            let lows = rolling_min(&series.low, period);
            highs.iter().zip(&lows).map(|(h, l)| (h + l) / 2.0).collect()
        };

        let tenkan = midpoint(tenkan_period);
        let kijun = midpoint(kijun_period);
        let span_a: Vec<f64> = tenkan.iter().zip(&kijun).map(|(t, k)| (t + k) / 2.0).collect();
        let span_b = midpoint(senkou_b_period);

        Ok(Ichimoku {
            senkou_a: shift_forward(&span_a, kijun_period),
            senkou_b: shift_forward(&span_b, kijun_period),
            chikou: shift_back(&series.close, kijun_period),
            tenkan,
            kijun,
        })
    }

    /// Cumulative volume-weighted average price over the whole series.
    pub fn calculate_vwap(series: &CandleSeries) -> Result<Vec<f64>> {
        let typical = series.typical_price();
        let mut cumulative_pv = 0.0;
        let mut cumulative_volume = 0.0;

        let vwap = typical
            .iter()
            .zip(&series.volume)
            .map(|(price, volume)| {
                if let Some(v) = volume {
                    cumulative_pv += price * v;
                    cumulative_volume += v;
                }
                if cumulative_volume > 0.0 {
                    cumulative_pv / cumulative_volume
                } else {
                    f64::NAN
                }
            })
            .collect();

        Ok(vwap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{AssetClass, Candle, Interval};
    use chrono::{Duration, TimeZone, Utc};

    fn series_from(closes: &[f64], volume: Option<f64>) -> CandleSeries {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let candles = closes
            .iter()
            .enumerate()
            .map(|(i, c)| Candle {
                datetime: start + Duration::days(i as i64),
                open: *c,
                high: c + 1.0,
                low: c - 1.0,
                close: *c,
                volume,
            })
            .collect();
        CandleSeries::from_candles("TEST".into(), AssetClass::Stock, Interval::Day1, candles)
    }

    #[test]
    fn bollinger_middle_is_sma_and_bands_are_symmetric() {
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + (i as f64 * 0.7).sin() * 5.0).collect();
        let series = series_from(&closes, Some(10.0));
        let bb = OverlapCalculator::calculate_bollinger_bands(&series, 20, 2.0).unwrap();
        let sma = OverlapCalculator::calculate_sma(&series, 20).unwrap();

        assert!(bb.middle[18].is_nan());
        for i in 19..30 {
            assert!((bb.middle[i] - sma[i]).abs() < 1e-9);
            assert!(((bb.upper[i] - bb.middle[i]) - (bb.middle[i] - bb.lower[i])).abs() < 1e-9);
            assert!(bb.upper[i] >= bb.lower[i]);
        }
    }

    #[test]
    fn flat_series_has_undefined_percent_b() {
        let series = series_from(&[50.0; 25], Some(1.0));
        let bb = OverlapCalculator::calculate_bollinger_bands(&series, 20, 2.0).unwrap();
        assert_eq!(bb.width[24], 0.0);
        assert!(bb.percent_b[24].is_nan());
    }

    #[test]
    fn sma_needs_a_full_window() {
        let series = series_from(&[1.0, 2.0], None);
        assert!(OverlapCalculator::calculate_sma(&series, 5).is_err());
    }

    #[test]
    fn ichimoku_spans_are_displaced() {
        let closes: Vec<f64> = (0..80).map(|i| i as f64).collect();
        let series = series_from(&closes, None);
        let ichi = OverlapCalculator::calculate_ichimoku(&series, 9, 26, 52).unwrap();

        // midpoint of a 9-bar window of a linear series with +/-1 bands
        assert!((ichi.tenkan[8] - 4.0).abs() < 1e-9);
        assert!(ichi.senkou_a[50].is_nan());
        assert!(!ichi.senkou_a[51].is_nan());
        assert!(ichi.senkou_b[76].is_nan());
        assert!(!ichi.senkou_b[77].is_nan());
        assert_eq!(ichi.chikou[0], 26.0);
        assert!(ichi.chikou[79].is_nan());
    }

    #[test]
    fn vwap_without_volume_is_undefined() {
        let series = series_from(&[1.0, 2.0, 3.0], None);
        let vwap = OverlapCalculator::calculate_vwap(&series).unwrap();
        assert!(vwap.iter().all(|v| v.is_nan()));

        let series = series_from(&[1.0, 2.0, 3.0], Some(10.0));
        let vwap = OverlapCalculator::calculate_vwap(&series).unwrap();
        assert!((vwap[2] - 2.0).abs() < 1e-9);
    }
}
