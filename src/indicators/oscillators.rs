use crate::database::models::CandleSeries;
use crate::error::{PipelineError, Result};
use crate::indicators::ta::{
    run, CommodityChannelIndex, MoneyFlowIndex, MovingAverageConvergenceDivergence, Next,
    RateOfChange, RelativeStrengthIndex,
};
use crate::indicators::window::{require_len, rolling_max, rolling_min, sma_defined};

#[derive(Debug, Clone)]
pub struct Macd {
    pub macd: Vec<f64>,
    pub signal: Vec<f64>,
    pub histogram: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct Stochastic {
    pub k: Vec<f64>,
    pub d: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct DirectionalMovement {
    pub adx: Vec<f64>,
    pub plus_di: Vec<f64>,
    pub minus_di: Vec<f64>,
}

pub struct OscillatorCalculator;

impl OscillatorCalculator {
    pub fn calculate_rsi(series: &CandleSeries, period: usize) -> Result<Vec<f64>> {
        let rsi = RelativeStrengthIndex::new(period)?;
        require_len("RSI", series.len(), period + 1)?;
        Ok(run(rsi, &series.close))
    }

    pub fn calculate_macd(
        series: &CandleSeries,
        fast_period: usize,
        slow_period: usize,
        signal_period: usize,
    ) -> Result<Macd> {
        let mut macd = MovingAverageConvergenceDivergence::new(fast_period, slow_period, signal_period)?;
        require_len("MACD", series.len(), slow_period)?;

        let n = series.len();
        let mut out = Macd {
            macd: Vec::with_capacity(n),
            signal: Vec::with_capacity(n),
            histogram: Vec::with_capacity(n),
        };
        for &close in &series.close {
            let value = macd.next(close);
            out.macd.push(value.macd);
            out.signal.push(value.signal);
            out.histogram.push(value.histogram);
        }

        Ok(out)
    }

    /// Slow stochastic: raw %K over `k_period`, smoothed by `smooth_k`, %D = SMA(%K, `d_period`).
    pub fn calculate_stochastic(
        series: &CandleSeries,
        k_period: usize,
        smooth_k: usize,
        d_period: usize,
    ) -> Result<Stochastic> {
        if k_period == 0 || smooth_k == 0 || d_period == 0 {
            return Err(PipelineError::InvalidParameter(
                "Stochastic periods must be greater than 0".to_string(),
            ));
        }
        require_len("Stochastic", series.len(), k_period)?;

        let highest = rolling_max(&series.high, k_period);
        let lowest = rolling_min(&series.low, k_period);

        let raw_k: Vec<f64> = (0..series.len())
            .map(|i| {
                let range = highest[i] - lowest[i];
                if range.is_nan() {
                    f64::NAN
                } else if range == 0.0 {
                    50.0
                } else {
                    (series.close[i] - lowest[i]) / range * 100.0
                }
            })
            .collect();

        let k = sma_defined(&raw_k, smooth_k);
        let d = sma_defined(&k, d_period);

        Ok(Stochastic { k, d })
    }

    pub fn calculate_williams_r(series: &CandleSeries, period: usize) -> Result<Vec<f64>> {
        if period == 0 {
            return Err(PipelineError::InvalidParameter(
                "Period must be greater than 0".to_string(),
            ));
        }
        require_len("Williams %R", series.len(), period)?;

        let highest = rolling_max(&series.high, period);
        let lowest = rolling_min(&series.low, period);

        Ok((0..series.len())
            .map(|i| {
                let range = highest[i] - lowest[i];
                if range.is_nan() {
                    f64::NAN
                } else if range == 0.0 {
                    -50.0
                } else {
                    (highest[i] - series.close[i]) / range * -100.0
                }
            })
            .collect())
    }

    pub fn calculate_cci(series: &CandleSeries, period: usize) -> Result<Vec<f64>> {
        let cci = CommodityChannelIndex::new(period)?;
        require_len("CCI", series.len(), period)?;
        Ok(run(cci, &series.typical_price()))
    }

    pub fn calculate_roc(series: &CandleSeries, period: usize) -> Result<Vec<f64>> {
        let roc = RateOfChange::new(period)?;
        require_len("ROC", series.len(), period + 1)?;
        Ok(run(roc, &series.close))
    }

    pub fn calculate_mfi(series: &CandleSeries, period: usize) -> Result<Vec<f64>> {
        let mut mfi = MoneyFlowIndex::new(period)?;
        require_len("MFI", series.len(), period + 1)?;

        let typical = series.typical_price();
        let volume = series.volume_or_zero();
        Ok(typical
            .iter()
            .zip(&volume)
            .map(|(tp, v)| mfi.next((*tp, *v)))
            .collect())
    }

    /// Average Directional Index with +DI / -DI, Wilder smoothing throughout.
    /// DI values start at bar `period`, ADX at bar `2 * period - 1`.
    pub fn calculate_adx(series: &CandleSeries, period: usize) -> Result<DirectionalMovement> {
        if period == 0 {
            return Err(PipelineError::InvalidParameter(
                "Period must be greater than 0".to_string(),
            ));
        }
        let n = series.len();
        require_len("ADX", n, 2 * period)?;

        let p = period as f64;
        let mut out = DirectionalMovement {
            adx: vec![f64::NAN; n],
            plus_di: vec![f64::NAN; n],
            minus_di: vec![f64::NAN; n],
        };

        let (mut sm_tr, mut sm_plus, mut sm_minus) = (0.0, 0.0, 0.0);
        let mut dx_sum = 0.0;
        let mut dx_count = 0usize;
        let mut adx = f64::NAN;

        for i in 1..n {
            let up_move = series.high[i] - series.high[i - 1];
            let down_move = series.low[i - 1] - series.low[i];
            let plus_dm = if up_move > down_move && up_move > 0.0 { up_move } else { 0.0 };
            let minus_dm = if down_move > up_move && down_move > 0.0 { down_move } else { 0.0 };
            let prev_close = series.close[i - 1];
            let tr = (series.high[i] - series.low[i])
                .max((series.high[i] - prev_close).abs())
                .max((series.low[i] - prev_close).abs());

            if i <= period {
                sm_tr += tr;
                sm_plus += plus_dm;
                sm_minus += minus_dm;
                if i < period {
                    continue;
                }
            } else {
                sm_tr = sm_tr - sm_tr / p + tr;
                sm_plus = sm_plus - sm_plus / p + plus_dm;
                sm_minus = sm_minus - sm_minus / p + minus_dm;
            }

            let (plus_di, minus_di) = if sm_tr > 0.0 {
                (100.0 * sm_plus / sm_tr, 100.0 * sm_minus / sm_tr)
            } else {
                (0.0, 0.0)
            };
            let di_sum = plus_di + minus_di;
            let dx = if di_sum > 0.0 {
                100.0 * (plus_di - minus_di).abs() / di_sum
            } else {
                0.0
            };

            out.plus_di[i] = plus_di;
            out.minus_di[i] = minus_di;

            if dx_count < period {
                dx_sum += dx;
                dx_count += 1;
                if dx_count == period {
                    adx = dx_sum / p;
                }
            } else {
                adx = (adx * (p - 1.0) + dx) / p;
            }
            out.adx[i] = adx;
        }

        Ok(out)
    }
}
