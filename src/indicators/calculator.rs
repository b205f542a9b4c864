use crate::database::models::{AssetClass, CandleSeries, IndicatorFrame, Interval};
use crate::error::{PipelineError, Result};
use crate::indicators::levels::{fibonacci_suffix, LevelCalculator, FIBONACCI_RATIOS};
use crate::indicators::oscillators::OscillatorCalculator;
use crate::indicators::overlaps::OverlapCalculator;
use crate::indicators::volatility::VolatilityCalculator;
use crate::indicators::volume::VolumeCalculator;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

/// Window lengths and thresholds for every computed column.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorSettings {
    pub sma_periods: Vec<usize>,
    pub ema_periods: Vec<usize>,
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub bollinger_period: usize,
    pub bollinger_std: f64,
    pub stochastic_k: usize,
    pub stochastic_smooth: usize,
    pub stochastic_d: usize,
    pub williams_period: usize,
    pub cci_period: usize,
    pub roc_period: usize,
    pub mfi_period: usize,
    pub adx_period: usize,
    pub atr_period: usize,
    pub stddev_period: usize,
    pub ichimoku_tenkan: usize,
    pub ichimoku_kijun: usize,
    pub ichimoku_senkou_b: usize,
    pub chaikin_fast: usize,
    pub chaikin_slow: usize,
    pub volume_sma_period: usize,
    pub volume_profile_window: usize,
    pub volume_profile_bins: usize,
    pub fibonacci_lookback: usize,
    pub elliott_threshold: f64,
}

impl Default for IndicatorSettings {
    fn default() -> Self {
        Self {
            sma_periods: vec![20, 50, 200],
            ema_periods: vec![12, 26, 50],
            rsi_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            bollinger_period: 20,
            bollinger_std: 2.0,
            stochastic_k: 14,
            stochastic_smooth: 3,
            stochastic_d: 3,
            williams_period: 14,
            cci_period: 20,
            roc_period: 12,
            mfi_period: 14,
            adx_period: 14,
            atr_period: 14,
            stddev_period: 20,
            ichimoku_tenkan: 9,
            ichimoku_kijun: 26,
            ichimoku_senkou_b: 52,
            chaikin_fast: 3,
            chaikin_slow: 10,
            volume_sma_period: 20,
            volume_profile_window: 50,
            volume_profile_bins: 24,
            fibonacci_lookback: 100,
            elliott_threshold: 0.05,
        }
    }
}

impl IndicatorSettings {
    pub fn validate(&self) -> Result<()> {
        let periods = [
            ("rsi_period", self.rsi_period),
            ("macd_fast", self.macd_fast),
            ("macd_signal", self.macd_signal),
            ("bollinger_period", self.bollinger_period),
            ("stochastic_k", self.stochastic_k),
            ("stochastic_smooth", self.stochastic_smooth),
            ("stochastic_d", self.stochastic_d),
            ("williams_period", self.williams_period),
            ("cci_period", self.cci_period),
            ("roc_period", self.roc_period),
            ("mfi_period", self.mfi_period),
            ("adx_period", self.adx_period),
            ("atr_period", self.atr_period),
            ("stddev_period", self.stddev_period),
            ("ichimoku_tenkan", self.ichimoku_tenkan),
            ("ichimoku_kijun", self.ichimoku_kijun),
            ("ichimoku_senkou_b", self.ichimoku_senkou_b),
            ("chaikin_fast", self.chaikin_fast),
            ("volume_sma_period", self.volume_sma_period),
            ("volume_profile_window", self.volume_profile_window),
            ("volume_profile_bins", self.volume_profile_bins),
            ("fibonacci_lookback", self.fibonacci_lookback),
        ];
        for (name, value) in periods {
            if value == 0 {
                return Err(PipelineError::InvalidParameter(format!("{} must be greater than 0", name)));
            }
        }

        for (name, list) in [("sma_periods", &self.sma_periods), ("ema_periods", &self.ema_periods)] {
            if list.iter().any(|p| *p == 0) {
                return Err(PipelineError::InvalidParameter(format!("{} contains 0", name)));
            }
            let mut sorted = list.clone();
            sorted.sort_unstable();
            sorted.dedup();
            if sorted.len() != list.len() {
                return Err(PipelineError::InvalidParameter(format!("{} has duplicates", name)));
            }
        }

        if self.macd_fast >= self.macd_slow {
            return Err(PipelineError::InvalidParameter(
                "macd_fast must be less than macd_slow".to_string(),
            ));
        }
        if self.chaikin_fast >= self.chaikin_slow {
            return Err(PipelineError::InvalidParameter(
                "chaikin_fast must be less than chaikin_slow".to_string(),
            ));
        }
        if !(self.bollinger_std > 0.0) {
            return Err(PipelineError::InvalidParameter(
                "bollinger_std must be positive".to_string(),
            ));
        }
        if !(self.elliott_threshold > 0.0 && self.elliott_threshold < 1.0) {
            return Err(PipelineError::InvalidParameter(
                "elliott_threshold must be in (0, 1)".to_string(),
            ));
        }

        Ok(())
    }
}

/// Single-output indicator result: short series become an all-null column.
fn single(frame: &mut IndicatorFrame, name: String, result: Result<Vec<f64>>) -> Result<()> {
    match result {
        Ok(values) => frame.push(name, values),
        Err(PipelineError::InsufficientData { .. }) => {
            let len = frame.len();
            frame.push_optional(name, vec![None; len])
        }
        Err(e) => Err(e),
    }
}

/// Multi-output indicator result: `names` and the extracted columns line up.
fn multi<T>(
    frame: &mut IndicatorFrame,
    names: &[&str],
    result: Result<T>,
    columns: impl FnOnce(T) -> Vec<Vec<f64>>,
) -> Result<()> {
    match result {
        Ok(value) => {
            for (name, values) in names.iter().zip(columns(value)) {
                frame.push(*name, values)?;
            }
            Ok(())
        }
        Err(PipelineError::InsufficientData { .. }) => {
            let len = frame.len();
            for name in names {
                frame.push_optional(*name, vec![None; len])?;
            }
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn no_volume<T>(indicator: &'static str) -> Result<T> {
    Err(PipelineError::InsufficientData {
        indicator,
        required: 1,
        available: 0,
    })
}

pub struct IndicatorCalculator;

impl IndicatorCalculator {
    /// Compute every indicator column for `series`. Columns are always present and
    /// the same for every series; values are NULL where history is too short or,
    /// for volume-based indicators, where the series carries no volume.
    pub fn compute_all(series: &CandleSeries, settings: &IndicatorSettings) -> Result<IndicatorFrame> {
        settings.validate()?;
        let started = Instant::now();
        let s = settings;
        let mut frame = IndicatorFrame::new(series.len());
        let has_volume = series.has_volume();

        for period in &s.sma_periods {
            single(&mut frame, format!("sma_{}", period), OverlapCalculator::calculate_sma(series, *period))?;
        }
        for period in &s.ema_periods {
            single(&mut frame, format!("ema_{}", period), OverlapCalculator::calculate_ema(series, *period))?;
        }

        single(
            &mut frame,
            format!("rsi_{}", s.rsi_period),
            OscillatorCalculator::calculate_rsi(series, s.rsi_period),
        )?;
        multi(
            &mut frame,
            &["macd", "macd_signal", "macd_hist"],
            OscillatorCalculator::calculate_macd(series, s.macd_fast, s.macd_slow, s.macd_signal),
            |m| vec![m.macd, m.signal, m.histogram],
        )?;
        multi(
            &mut frame,
            &["bb_upper", "bb_middle", "bb_lower", "bb_width", "bb_percent_b"],
            OverlapCalculator::calculate_bollinger_bands(series, s.bollinger_period, s.bollinger_std),
            |b| vec![b.upper, b.middle, b.lower, b.width, b.percent_b],
        )?;
        multi(
            &mut frame,
            &["stoch_k", "stoch_d"],
            OscillatorCalculator::calculate_stochastic(series, s.stochastic_k, s.stochastic_smooth, s.stochastic_d),
            |st| vec![st.k, st.d],
        )?;
        single(
            &mut frame,
            format!("williams_r_{}", s.williams_period),
            OscillatorCalculator::calculate_williams_r(series, s.williams_period),
        )?;
        single(
            &mut frame,
            format!("cci_{}", s.cci_period),
            OscillatorCalculator::calculate_cci(series, s.cci_period),
        )?;
        single(
            &mut frame,
            format!("roc_{}", s.roc_period),
            OscillatorCalculator::calculate_roc(series, s.roc_period),
        )?;
        single(
            &mut frame,
            format!("mfi_{}", s.mfi_period),
            if has_volume {
                OscillatorCalculator::calculate_mfi(series, s.mfi_period)
            } else {
                no_volume("MFI")
            },
        )?;

        let adx_names = [
            format!("adx_{}", s.adx_period),
            format!("plus_di_{}", s.adx_period),
            format!("minus_di_{}", s.adx_period),
        ];
        multi(
            &mut frame,
            &adx_names.iter().map(String::as_str).collect::<Vec<_>>(),
            OscillatorCalculator::calculate_adx(series, s.adx_period),
            |d| vec![d.adx, d.plus_di, d.minus_di],
        )?;

        single(
            &mut frame,
            format!("atr_{}", s.atr_period),
            VolatilityCalculator::calculate_atr(series, s.atr_period),
        )?;
        single(
            &mut frame,
            format!("natr_{}", s.atr_period),
            VolatilityCalculator::calculate_natr(series, s.atr_period),
        )?;
        single(
            &mut frame,
            format!("stddev_{}", s.stddev_period),
            VolatilityCalculator::calculate_standard_deviation(series, s.stddev_period),
        )?;

        multi(
            &mut frame,
            &[
                "ichimoku_tenkan",
                "ichimoku_kijun",
                "ichimoku_senkou_a",
                "ichimoku_senkou_b",
                "ichimoku_chikou",
            ],
            OverlapCalculator::calculate_ichimoku(series, s.ichimoku_tenkan, s.ichimoku_kijun, s.ichimoku_senkou_b),
            |i| vec![i.tenkan, i.kijun, i.senkou_a, i.senkou_b, i.chikou],
        )?;

        // volume family
        single(
            &mut frame,
            "vwap".to_string(),
            if has_volume { OverlapCalculator::calculate_vwap(series) } else { no_volume("VWAP") },
        )?;
        single(
            &mut frame,
            "obv".to_string(),
            if has_volume { VolumeCalculator::calculate_obv(series) } else { no_volume("OBV") },
        )?;
        single(
            &mut frame,
            "ad_line".to_string(),
            if has_volume { VolumeCalculator::calculate_ad_line(series) } else { no_volume("A/D Line") },
        )?;
        single(
            &mut frame,
            "chaikin_osc".to_string(),
            if has_volume {
                VolumeCalculator::calculate_chaikin_oscillator(series, s.chaikin_fast, s.chaikin_slow)
            } else {
                no_volume("Chaikin Oscillator")
            },
        )?;
        single(
            &mut frame,
            format!("volume_sma_{}", s.volume_sma_period),
            if has_volume {
                VolumeCalculator::calculate_volume_sma(series, s.volume_sma_period)
            } else {
                no_volume("Volume SMA")
            },
        )?;
        multi(
            &mut frame,
            &["vp_poc", "vp_value_area_high", "vp_value_area_low"],
            if has_volume {
                VolumeCalculator::calculate_rolling_volume_profile(
                    series,
                    s.volume_profile_window,
                    s.volume_profile_bins,
                )
            } else {
                no_volume("Volume Profile")
            },
            |vp| vec![vp.poc, vp.value_area_high, vp.value_area_low],
        )?;

        // levels
        let fib_names: Vec<String> = FIBONACCI_RATIOS
            .iter()
            .map(|r| format!("fib_{}", fibonacci_suffix(*r)))
            .collect();
        multi(
            &mut frame,
            &fib_names.iter().map(String::as_str).collect::<Vec<_>>(),
            LevelCalculator::calculate_fibonacci_levels(series, s.fibonacci_lookback),
            |levels| levels,
        )?;
        multi(
            &mut frame,
            &["pivot", "pivot_r1", "pivot_s1", "pivot_r2", "pivot_s2"],
            LevelCalculator::calculate_pivot_points(series),
            |p| vec![p.pivot, p.r1, p.s1, p.r2, p.s2],
        )?;
        multi(
            &mut frame,
            &["elliott_wave", "elliott_direction"],
            LevelCalculator::calculate_elliott_waves(series, s.elliott_threshold),
            |w| vec![w.wave, w.direction],
        )?;

        debug!(
            "Computed {} indicator columns for {} ({} bars) in {:.2?}",
            frame.names().len(),
            series.symbol,
            series.len(),
            started.elapsed()
        );

        Ok(frame)
    }

    /// Compute frames for many series in parallel, one result per input.
    pub fn compute_batch(series: &[CandleSeries], settings: &IndicatorSettings) -> Vec<Result<IndicatorFrame>> {
        series
            .par_iter()
            .map(|s| Self::compute_all(s, settings))
            .collect()
    }

    /// Names of the columns `compute_all` produces for these settings, in order.
    pub fn column_names(settings: &IndicatorSettings) -> Result<Vec<String>> {
        let empty = CandleSeries::new(String::new(), AssetClass::Stock, Interval::Day1);
        Ok(Self::compute_all(&empty, settings)?.names().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::Candle;
    use chrono::{Duration, TimeZone, Utc};

    fn wave_series(n: usize, with_volume: bool) -> CandleSeries {
        let start = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        let candles = (0..n)
            .map(|i| {
                let c = 100.0 + (i as f64 / 7.0).sin() * 10.0 + i as f64 * 0.05;
                Candle {
                    datetime: start + Duration::days(i as i64),
                    open: c - 0.5,
                    high: c + 1.5,
                    low: c - 1.5,
                    close: c,
                    volume: if with_volume { Some(1_000.0 + (i % 13) as f64 * 50.0) } else { None },
                }
            })
            .collect();
        CandleSeries::from_candles("MSFT".into(), AssetClass::Stock, Interval::Day1, candles)
    }

    #[test]
    fn every_column_has_series_length() {
        let series = wave_series(260, true);
        let frame = IndicatorCalculator::compute_all(&series, &IndicatorSettings::default()).unwrap();

        assert!(frame.names().len() >= 50);
        for name in frame.names() {
            assert_eq!(frame.column(name).unwrap().len(), 260, "column {}", name);
        }
        assert!(frame.value("sma_200", 198).is_none());
        assert!(frame.value("sma_200", 199).is_some());
        assert!(frame.value("vp_poc", 259).is_some());
        assert!(frame.value("elliott_wave", 259).is_some());
    }

    #[test]
    fn short_history_yields_null_columns_not_errors() {
        let series = wave_series(30, true);
        let frame = IndicatorCalculator::compute_all(&series, &IndicatorSettings::default()).unwrap();

        assert!(frame.column("sma_200").unwrap().iter().all(|v| v.is_none()));
        assert!(frame.column("fib_618").unwrap().iter().all(|v| v.is_none()));
        assert!(frame.value("sma_20", 29).is_some());
    }

    #[test]
    fn series_without_volume_gets_null_volume_columns() {
        let series = wave_series(120, false);
        let frame = IndicatorCalculator::compute_all(&series, &IndicatorSettings::default()).unwrap();

        for name in ["vwap", "obv", "ad_line", "mfi_14", "vp_poc", "volume_sma_20"] {
            assert!(frame.column(name).unwrap().iter().all(|v| v.is_none()), "{}", name);
        }
        assert!(frame.value("rsi_14", 119).is_some());
    }

    #[test]
    fn column_names_match_computed_frame() {
        let settings = IndicatorSettings::default();
        let names = IndicatorCalculator::column_names(&settings).unwrap();
        let frame = IndicatorCalculator::compute_all(&wave_series(80, true), &settings).unwrap();
        assert_eq!(names, frame.names());
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let mut settings = IndicatorSettings::default();
        settings.macd_fast = 30;
        assert!(IndicatorCalculator::compute_all(&wave_series(10, true), &settings).is_err());

        let mut settings = IndicatorSettings::default();
        settings.sma_periods = vec![20, 20];
        assert!(settings.validate().is_err());
    }

    #[test]
    fn batch_keeps_input_order() {
        let settings = IndicatorSettings::default();
        let batch = vec![wave_series(40, true), wave_series(90, false)];
        let frames = IndicatorCalculator::compute_batch(&batch, &settings);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].as_ref().unwrap().len(), 40);
        assert_eq!(frames[1].as_ref().unwrap().len(), 90);
    }
}
