use crate::database::models::CandleSeries;
use crate::error::Result;
use crate::indicators::ta::{run, AverageTrueRange, Next, StandardDeviation};
use crate::indicators::window::require_len;

pub struct VolatilityCalculator;

impl VolatilityCalculator {
    // Calculate True Range
    // TR = max(high - low, |high - prev_close|, |low - prev_close|); undefined on the first bar
    pub fn calculate_true_range(series: &CandleSeries) -> Result<Vec<f64>> {
        require_len("True Range", series.len(), 2)?;

        let mut results = Vec::with_capacity(series.len());
        results.push(f64::NAN);

        for i in 1..series.len() {
            let high = series.high[i];
            let low = series.low[i];
            let prev_close = series.close[i - 1];

            let tr = (high - low)
                .max((high - prev_close).abs())
                .max((low - prev_close).abs());
            results.push(tr);
        }

        Ok(results)
    }

    // Calculate ATR (Average True Range); first value lands on bar `period`
    pub fn calculate_atr(series: &CandleSeries, period: usize) -> Result<Vec<f64>> {
        let mut atr = AverageTrueRange::new(period)?;
        require_len("ATR", series.len(), period + 1)?;

        let tr_values = Self::calculate_true_range(series)?;
        Ok(tr_values
            .iter()
            .map(|tr| if tr.is_nan() { f64::NAN } else { atr.next(*tr) })
            .collect())
    }

    // Calculate NATR (Normalized ATR - as percentage of close price)
    pub fn calculate_natr(series: &CandleSeries, period: usize) -> Result<Vec<f64>> {
        let atr = Self::calculate_atr(series, period)?;

        Ok(atr
            .iter()
            .zip(&series.close)
            .map(|(atr, close)| {
                if *close > 0.0 {
                    atr / close * 100.0
                } else {
                    f64::NAN
                }
            })
            .collect())
    }

    // Calculate rolling Standard Deviation of closes
    pub fn calculate_standard_deviation(series: &CandleSeries, period: usize) -> Result<Vec<f64>> {
        let stddev = StandardDeviation::new(period)?;
        require_len("Standard Deviation", series.len(), period)?;
        Ok(run(stddev, &series.close))
    }
}
