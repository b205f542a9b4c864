use crate::database::models::CandleSeries;
use crate::error::{PipelineError, Result};
use crate::indicators::window::{require_len, rolling_max, rolling_min};

pub const FIBONACCI_RATIOS: [f64; 7] = [0.0, 0.236, 0.382, 0.5, 0.618, 0.786, 1.0];

/// Number of legs in one impulse (1-5) plus corrective (A-C) cycle.
const ELLIOTT_CYCLE: usize = 8;

/// Column suffix for a retracement ratio, e.g. 0.618 -> "618".
pub fn fibonacci_suffix(ratio: f64) -> String {
    format!("{}", (ratio * 1000.0).round() as i64)
}

/// Retracement prices measured down from `swing_high`, one per `FIBONACCI_RATIOS` entry.
pub fn fibonacci_retracement(swing_high: f64, swing_low: f64) -> [f64; 7] {
    let range = swing_high - swing_low;
    FIBONACCI_RATIOS.map(|r| swing_high - range * r)
}

#[derive(Debug, Clone)]
pub struct PivotPoints {
    pub pivot: Vec<f64>,
    pub r1: Vec<f64>,
    pub s1: Vec<f64>,
    pub r2: Vec<f64>,
    pub s2: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct ElliottWaves {
    /// 1-5 impulse legs, 6-8 corrective legs A-C
    pub wave: Vec<f64>,
    /// +1 for a rising leg, -1 for a falling one
    pub direction: Vec<f64>,
}

pub struct LevelCalculator;

impl LevelCalculator {
    /// Retracement levels of the trailing `lookback` swing range, one column per ratio.
    pub fn calculate_fibonacci_levels(series: &CandleSeries, lookback: usize) -> Result<Vec<Vec<f64>>> {
        if lookback == 0 {
            return Err(PipelineError::InvalidParameter(
                "Fibonacci lookback must be greater than 0".to_string(),
            ));
        }
        require_len("Fibonacci", series.len(), lookback)?;

        let highs = rolling_max(&series.high, lookback);
        let lows = rolling_min(&series.low, lookback);

        let mut columns = vec![Vec::with_capacity(series.len()); FIBONACCI_RATIOS.len()];
        for i in 0..series.len() {
            let levels = fibonacci_retracement(highs[i], lows[i]);
            for (column, level) in columns.iter_mut().zip(levels) {
                column.push(level);
            }
        }

        Ok(columns)
    }

    /// Classic floor pivots computed from the previous bar.
    pub fn calculate_pivot_points(series: &CandleSeries) -> Result<PivotPoints> {
        require_len("Pivot Points", series.len(), 2)?;

        let n = series.len();
        let mut out = PivotPoints {
            pivot: vec![f64::NAN; n],
            r1: vec![f64::NAN; n],
            s1: vec![f64::NAN; n],
            r2: vec![f64::NAN; n],
            s2: vec![f64::NAN; n],
        };

        for i in 1..n {
            let (high, low, close) = (series.high[i - 1], series.low[i - 1], series.close[i - 1]);
            let pivot = (high + low + close) / 3.0;
            out.pivot[i] = pivot;
            out.r1[i] = 2.0 * pivot - low;
            out.s1[i] = 2.0 * pivot - high;
            out.r2[i] = pivot + (high - low);
            out.s2[i] = pivot - (high - low);
        }

        Ok(out)
    }

    /// Elliott wave labelling by causal zig-zag.
    ///
    /// A swing is confirmed once price reverses by `threshold` (a fraction, 0.05 = 5%)
    /// from the running extreme of the current leg. Legs are numbered in a repeating
    /// eight-leg cycle starting with the first established leg. Bars before the first
    /// leg is established stay undefined.
    pub fn calculate_elliott_waves(series: &CandleSeries, threshold: f64) -> Result<ElliottWaves> {
        if !(threshold > 0.0 && threshold < 1.0) {
            return Err(PipelineError::InvalidParameter(format!(
                "Elliott wave threshold must be in (0, 1), got {}",
                threshold
            )));
        }
        require_len("Elliott Wave", series.len(), 2)?;

        let n = series.len();
        let mut out = ElliottWaves {
            wave: vec![f64::NAN; n],
            direction: vec![f64::NAN; n],
        };

        let mut direction: i8 = 0;
        let mut legs: usize = 0;
        let mut lowest = series.low[0];
        let mut highest = series.high[0];
        let mut extreme = f64::NAN;

        for i in 0..n {
            let (high, low) = (series.high[i], series.low[i]);

            match direction {
                0 => {
                    lowest = lowest.min(low);
                    highest = highest.max(high);
                    if high >= lowest * (1.0 + threshold) {
                        direction = 1;
                        extreme = high;
                    } else if low <= highest * (1.0 - threshold) {
                        direction = -1;
                        extreme = low;
                    }
                }
                1 => {
                    if low <= extreme * (1.0 - threshold) {
                        direction = -1;
                        legs += 1;
                        extreme = low;
                    } else {
                        extreme = extreme.max(high);
                    }
                }
                _ => {
                    if high >= extreme * (1.0 + threshold) {
                        direction = 1;
                        legs += 1;
                        extreme = high;
                    } else {
                        extreme = extreme.min(low);
                    }
                }
            }

            if direction != 0 {
                out.wave[i] = ((legs % ELLIOTT_CYCLE) + 1) as f64;
                out.direction[i] = direction as f64;
            }
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{AssetClass, Candle, Interval};
    use chrono::{Duration, TimeZone, Utc};

    fn closes(values: &[f64]) -> CandleSeries {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let candles = values
            .iter()
            .enumerate()
            .map(|(i, c)| Candle {
                datetime: start + Duration::days(i as i64),
                open: *c,
                high: *c,
                low: *c,
                close: *c,
                volume: Some(1.0),
            })
            .collect();
        CandleSeries::from_candles("GLD".into(), AssetClass::Commodity, Interval::Day1, candles)
    }

    #[test]
    fn retracement_levels_span_the_range() {
        let levels = fibonacci_retracement(200.0, 100.0);
        assert_eq!(levels[0], 200.0);
        assert!((levels[4] - 138.2).abs() < 1e-9);
        assert_eq!(levels[6], 100.0);
        assert_eq!(fibonacci_suffix(0.618), "618");
        assert_eq!(fibonacci_suffix(0.0), "0");
    }

    #[test]
    fn rolling_fibonacci_columns() {
        let s = closes(&[100.0, 150.0, 120.0, 200.0]);
        let cols = LevelCalculator::calculate_fibonacci_levels(&s, 3).unwrap();
        assert_eq!(cols.len(), FIBONACCI_RATIOS.len());
        assert!(cols[0][1].is_nan());
        assert_eq!(cols[0][2], 150.0);
        assert_eq!(cols[6][2], 100.0);
        assert_eq!(cols[3][3], 160.0);
    }

    #[test]
    fn pivots_use_previous_bar() {
        let s = closes(&[10.0, 20.0]);
        let p = LevelCalculator::calculate_pivot_points(&s).unwrap();
        assert!(p.pivot[0].is_nan());
        assert_eq!(p.pivot[1], 10.0);
        assert_eq!(p.r1[1], 10.0);
        assert_eq!(p.s2[1], 10.0);
    }

    #[test]
    fn elliott_legs_advance_on_confirmed_reversals() {
        let s = closes(&[100.0, 106.0, 110.0, 103.0, 101.0, 108.0]);
        let waves = LevelCalculator::calculate_elliott_waves(&s, 0.05).unwrap();

        assert!(waves.wave[0].is_nan());
        assert_eq!(&waves.wave[1..], &[1.0, 1.0, 2.0, 2.0, 3.0]);
        assert_eq!(&waves.direction[1..], &[1.0, 1.0, -1.0, -1.0, 1.0]);
    }

    #[test]
    fn elliott_cycle_wraps_after_eight_legs() {
        let mut prices = vec![100.0];
        for leg in 0..9 {
            prices.push(if leg % 2 == 0 { 120.0 } else { 100.0 });
        }
        let waves = LevelCalculator::calculate_elliott_waves(&closes(&prices), 0.05).unwrap();
        assert_eq!(waves.wave[8], 8.0);
        assert_eq!(waves.wave[9], 1.0);
    }

    #[test]
    fn elliott_rejects_bad_threshold() {
        let s = closes(&[1.0, 2.0]);
        assert!(LevelCalculator::calculate_elliott_waves(&s, 0.0).is_err());
        assert!(LevelCalculator::calculate_elliott_waves(&s, 1.5).is_err());
    }
}
