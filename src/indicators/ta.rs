// Streaming technical indicator primitives.
// Each primitive consumes one input per bar and returns NaN until its window is warm.

use crate::error::{PipelineError, Result};
use std::collections::VecDeque;

/// The `Next` trait is used for indicators that consume one bar at a time
pub trait Next<T> {
    type Output;
    fn next(&mut self, input: T) -> Self::Output;
}

fn check_period(period: usize) -> Result<()> {
    if period == 0 {
        return Err(PipelineError::InvalidParameter(
            "Period must be greater than 0".to_string(),
        ));
    }
    Ok(())
}

/// Simple Moving Average
#[derive(Debug, Clone)]
pub struct SimpleMovingAverage {
    period: usize,
    window: VecDeque<f64>,
    sum: f64,
}

impl SimpleMovingAverage {
    pub fn new(period: usize) -> Result<Self> {
        check_period(period)?;
        Ok(Self {
            period,
            window: VecDeque::with_capacity(period + 1),
            sum: 0.0,
        })
    }
}

impl Next<f64> for SimpleMovingAverage {
    type Output = f64;

    fn next(&mut self, input: f64) -> Self::Output {
        self.window.push_back(input);
        self.sum += input;
        if self.window.len() > self.period {
            if let Some(old) = self.window.pop_front() {
                self.sum -= old;
            }
        }

        if self.window.len() < self.period {
            f64::NAN
        } else {
            self.sum / self.period as f64
        }
    }
}

/// Exponential Moving Average, seeded with the SMA of the first `period` inputs
#[derive(Debug, Clone)]
pub struct ExponentialMovingAverage {
    period: usize,
    alpha: f64,
    value: Option<f64>,
    count: usize,
    sum: f64,
}

impl ExponentialMovingAverage {
    pub fn new(period: usize) -> Result<Self> {
        check_period(period)?;
        Ok(Self {
            period,
            alpha: 2.0 / (period as f64 + 1.0),
            value: None,
            count: 0,
            sum: 0.0,
        })
    }
}

impl Next<f64> for ExponentialMovingAverage {
    type Output = f64;

    fn next(&mut self, input: f64) -> Self::Output {
        match self.value {
            Some(prev) => {
                let value = input * self.alpha + prev * (1.0 - self.alpha);
                self.value = Some(value);
                value
            }
            None => {
                self.sum += input;
                self.count += 1;
                if self.count < self.period {
                    f64::NAN
                } else {
                    let seed = self.sum / self.period as f64;
                    self.value = Some(seed);
                    seed
                }
            }
        }
    }
}

/// Relative Strength Index with Wilder smoothing
#[derive(Debug, Clone)]
pub struct RelativeStrengthIndex {
    period: usize,
    prev_value: Option<f64>,
    gain_sum: f64,
    loss_sum: f64,
    avg_gain: f64,
    avg_loss: f64,
    changes: usize,
}

impl RelativeStrengthIndex {
    pub fn new(period: usize) -> Result<Self> {
        check_period(period)?;
        Ok(Self {
            period,
            prev_value: None,
            gain_sum: 0.0,
            loss_sum: 0.0,
            avg_gain: 0.0,
            avg_loss: 0.0,
            changes: 0,
        })
    }
}

impl Next<f64> for RelativeStrengthIndex {
    type Output = f64;

    fn next(&mut self, input: f64) -> Self::Output {
        let prev = match self.prev_value.replace(input) {
            Some(prev) => prev,
            None => return f64::NAN,
        };

        let change = input - prev;
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);
        self.changes += 1;

        let period = self.period as f64;
        if self.changes < self.period {
            self.gain_sum += gain;
            self.loss_sum += loss;
            return f64::NAN;
        } else if self.changes == self.period {
            self.avg_gain = (self.gain_sum + gain) / period;
            self.avg_loss = (self.loss_sum + loss) / period;
        } else {
            self.avg_gain = (self.avg_gain * (period - 1.0) + gain) / period;
            self.avg_loss = (self.avg_loss * (period - 1.0) + loss) / period;
        }

        if self.avg_loss == 0.0 {
            if self.avg_gain == 0.0 {
                50.0
            } else {
                100.0
            }
        } else {
            let rs = self.avg_gain / self.avg_loss;
            100.0 - (100.0 / (1.0 + rs))
        }
    }
}

/// MACD (Moving Average Convergence Divergence) output
#[derive(Debug, Clone, Copy)]
pub struct MacdOutput {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// Moving Average Convergence Divergence
#[derive(Debug, Clone)]
pub struct MovingAverageConvergenceDivergence {
    fast_ema: ExponentialMovingAverage,
    slow_ema: ExponentialMovingAverage,
    signal_ema: ExponentialMovingAverage,
}

impl MovingAverageConvergenceDivergence {
    pub fn new(fast_period: usize, slow_period: usize, signal_period: usize) -> Result<Self> {
        if fast_period >= slow_period {
            return Err(PipelineError::InvalidParameter(
                "Fast period must be less than slow period".to_string(),
            ));
        }

        Ok(Self {
            fast_ema: ExponentialMovingAverage::new(fast_period)?,
            slow_ema: ExponentialMovingAverage::new(slow_period)?,
            signal_ema: ExponentialMovingAverage::new(signal_period)?,
        })
    }
}

impl Next<f64> for MovingAverageConvergenceDivergence {
    type Output = MacdOutput;

    fn next(&mut self, input: f64) -> Self::Output {
        let fast = self.fast_ema.next(input);
        let slow = self.slow_ema.next(input);

        if slow.is_nan() {
            return MacdOutput {
                macd: f64::NAN,
                signal: f64::NAN,
                histogram: f64::NAN,
            };
        }

        let macd = fast - slow;
        // the signal line only ever sees defined MACD values
        let signal = self.signal_ema.next(macd);

        MacdOutput {
            macd,
            signal,
            histogram: macd - signal,
        }
    }
}

/// Population standard deviation over a rolling window
#[derive(Debug, Clone)]
pub struct StandardDeviation {
    period: usize,
    values: VecDeque<f64>,
}

impl StandardDeviation {
    pub fn new(period: usize) -> Result<Self> {
        check_period(period)?;
        Ok(Self {
            period,
            values: VecDeque::with_capacity(period + 1),
        })
    }
}

impl Next<f64> for StandardDeviation {
    type Output = f64;

    fn next(&mut self, input: f64) -> Self::Output {
        self.values.push_back(input);
        if self.values.len() > self.period {
            self.values.pop_front();
        }

        if self.values.len() < self.period {
            return f64::NAN;
        }

        let n = self.period as f64;
        let mean = self.values.iter().sum::<f64>() / n;
        let variance = self.values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

        variance.sqrt()
    }
}

/// Average True Range over true-range inputs, Wilder smoothing
#[derive(Debug, Clone)]
pub struct AverageTrueRange {
    period: usize,
    sum: f64,
    atr: Option<f64>,
    count: usize,
}

impl AverageTrueRange {
    pub fn new(period: usize) -> Result<Self> {
        check_period(period)?;
        Ok(Self {
            period,
            sum: 0.0,
            atr: None,
            count: 0,
        })
    }
}

impl Next<f64> for AverageTrueRange {
    type Output = f64;

    fn next(&mut self, tr: f64) -> Self::Output {
        let period = self.period as f64;
        match self.atr {
            Some(prev) => {
                let atr = (prev * (period - 1.0) + tr) / period;
                self.atr = Some(atr);
                atr
            }
            None => {
                self.sum += tr;
                self.count += 1;
                if self.count < self.period {
                    f64::NAN
                } else {
                    let atr = self.sum / period;
                    self.atr = Some(atr);
                    atr
                }
            }
        }
    }
}

/// Commodity Channel Index over typical prices
#[derive(Debug, Clone)]
pub struct CommodityChannelIndex {
    period: usize,
    typical_prices: VecDeque<f64>,
}

impl CommodityChannelIndex {
    pub fn new(period: usize) -> Result<Self> {
        check_period(period)?;
        Ok(Self {
            period,
            typical_prices: VecDeque::with_capacity(period + 1),
        })
    }
}

impl Next<f64> for CommodityChannelIndex {
    type Output = f64;

    fn next(&mut self, typical_price: f64) -> Self::Output {
        self.typical_prices.push_back(typical_price);
        if self.typical_prices.len() > self.period {
            self.typical_prices.pop_front();
        }

        if self.typical_prices.len() < self.period {
            return f64::NAN;
        }

        let n = self.period as f64;
        let sma = self.typical_prices.iter().sum::<f64>() / n;
        let mean_deviation = self.typical_prices.iter().map(|p| (p - sma).abs()).sum::<f64>() / n;

        if mean_deviation == 0.0 {
            return 0.0;
        }

        (typical_price - sma) / (0.015 * mean_deviation)
    }
}

/// Money Flow Index over (typical price, volume) pairs
#[derive(Debug, Clone)]
pub struct MoneyFlowIndex {
    period: usize,
    prev_typical: Option<f64>,
    flows: VecDeque<(f64, f64)>,
}

impl MoneyFlowIndex {
    pub fn new(period: usize) -> Result<Self> {
        check_period(period)?;
        Ok(Self {
            period,
            prev_typical: None,
            flows: VecDeque::with_capacity(period + 1),
        })
    }
}

impl Next<(f64, f64)> for MoneyFlowIndex {
    type Output = f64;

    fn next(&mut self, (typical_price, volume): (f64, f64)) -> Self::Output {
        let prev = match self.prev_typical.replace(typical_price) {
            Some(prev) => prev,
            None => return f64::NAN,
        };

        let raw_flow = typical_price * volume;
        let flow = if typical_price > prev {
            (raw_flow, 0.0)
        } else if typical_price < prev {
            (0.0, raw_flow)
        } else {
            (0.0, 0.0)
        };

        self.flows.push_back(flow);
        if self.flows.len() > self.period {
            self.flows.pop_front();
        }

        if self.flows.len() < self.period {
            return f64::NAN;
        }

        let positive: f64 = self.flows.iter().map(|f| f.0).sum();
        let negative: f64 = self.flows.iter().map(|f| f.1).sum();

        if negative == 0.0 {
            return if positive == 0.0 { 50.0 } else { 100.0 };
        }

        let money_ratio = positive / negative;
        100.0 - (100.0 / (1.0 + money_ratio))
    }
}

/// Rate of Change, in percent
#[derive(Debug, Clone)]
pub struct RateOfChange {
    period: usize,
    prices: VecDeque<f64>,
}

impl RateOfChange {
    pub fn new(period: usize) -> Result<Self> {
        check_period(period)?;
        Ok(Self {
            period,
            prices: VecDeque::with_capacity(period + 2),
        })
    }
}

impl Next<f64> for RateOfChange {
    type Output = f64;

    fn next(&mut self, price: f64) -> Self::Output {
        self.prices.push_back(price);
        if self.prices.len() > self.period + 1 {
            self.prices.pop_front();
        }

        if self.prices.len() <= self.period {
            return f64::NAN;
        }

        let old_price = self.prices[0];
        if old_price == 0.0 {
            return f64::NAN;
        }

        (price - old_price) / old_price * 100.0
    }
}

/// Run a single-input primitive over a slice.
pub fn run<I: Next<f64, Output = f64>>(mut indicator: I, values: &[f64]) -> Vec<f64> {
    values.iter().map(|v| indicator.next(*v)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn sma_warms_up_then_averages() {
        let out = run(SimpleMovingAverage::new(3).unwrap(), &[1.0, 2.0, 3.0, 4.0]);
        assert!(out[0].is_nan() && out[1].is_nan());
        assert!(approx(out[2], 2.0));
        assert!(approx(out[3], 3.0));
    }

    #[test]
    fn ema_is_seeded_with_sma() {
        let out = run(ExponentialMovingAverage::new(3).unwrap(), &[2.0, 4.0, 6.0, 8.0]);
        assert!(out[1].is_nan());
        assert!(approx(out[2], 4.0));
        // alpha = 0.5
        assert!(approx(out[3], 6.0));
    }

    #[test]
    fn rsi_extremes_and_flat() {
        let up: Vec<f64> = (1..=30).map(|x| x as f64).collect();
        let down: Vec<f64> = up.iter().rev().copied().collect();
        let flat = vec![10.0; 30];

        let rsi_up = run(RelativeStrengthIndex::new(14).unwrap(), &up);
        let rsi_down = run(RelativeStrengthIndex::new(14).unwrap(), &down);
        let rsi_flat = run(RelativeStrengthIndex::new(14).unwrap(), &flat);

        assert!(rsi_up[13].is_nan());
        assert!(approx(rsi_up[14], 100.0));
        assert!(approx(*rsi_down.last().unwrap(), 0.0));
        assert!(approx(*rsi_flat.last().unwrap(), 50.0));
    }

    #[test]
    fn rsi_matches_wilder_reference() {
        // Wilder's classic 14-period example, first RSI value ~70.46
        let closes = [
            44.34, 44.09, 44.15, 43.61, 44.33, 44.83, 45.10, 45.42, 45.84, 46.08, 45.89, 46.03,
            45.61, 46.28, 46.28,
        ];
        let out = run(RelativeStrengthIndex::new(14).unwrap(), &closes);
        assert!((out[14] - 70.46).abs() < 0.05, "got {}", out[14]);
    }

    #[test]
    fn macd_rejects_bad_periods() {
        assert!(MovingAverageConvergenceDivergence::new(26, 12, 9).is_err());
        assert!(MovingAverageConvergenceDivergence::new(0, 12, 9).is_err());
    }

    #[test]
    fn macd_signal_waits_for_macd_line() {
        let values: Vec<f64> = (1..=40).map(|x| x as f64).collect();
        let mut macd = MovingAverageConvergenceDivergence::new(3, 5, 4).unwrap();
        let out: Vec<MacdOutput> = values.iter().map(|v| macd.next(*v)).collect();

        assert!(out[3].macd.is_nan());
        assert!(!out[4].macd.is_nan());
        assert!(out[6].signal.is_nan());
        assert!(!out[7].signal.is_nan());
        // linear input: EMA lag is constant, so the MACD line converges
        assert!(approx(out[39].histogram, 0.0) || out[39].histogram.abs() < 1e-6);
    }

    #[test]
    fn atr_of_constant_range() {
        let out = run(AverageTrueRange::new(5).unwrap(), &[2.0; 10]);
        assert!(out[3].is_nan());
        assert!(approx(out[4], 2.0));
        assert!(approx(out[9], 2.0));
    }

    #[test]
    fn mfi_is_bounded() {
        let mut mfi = MoneyFlowIndex::new(5).unwrap();
        let prices = [10.0, 11.0, 10.5, 12.0, 11.5, 13.0, 12.0, 12.5];
        for (i, p) in prices.iter().enumerate() {
            let v = mfi.next((*p, 1_000.0 + i as f64));
            if i >= 5 {
                assert!((0.0..=100.0).contains(&v), "MFI {} out of range", v);
            } else {
                assert!(v.is_nan());
            }
        }
    }

    #[test]
    fn roc_percent_change() {
        let out = run(RateOfChange::new(2).unwrap(), &[100.0, 105.0, 110.0]);
        assert!(out[1].is_nan());
        assert!(approx(out[2], 10.0));
    }

    #[test]
    fn zero_period_is_rejected() {
        assert!(SimpleMovingAverage::new(0).is_err());
        assert!(StandardDeviation::new(0).is_err());
        assert!(CommodityChannelIndex::new(0).is_err());
    }
}
