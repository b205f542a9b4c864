use crate::error::{PipelineError, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetClass {
    Stock,
    Crypto,
    Forex,
    Etf,
    Commodity,
}

impl AssetClass {
    pub const ALL: [AssetClass; 5] = [
        AssetClass::Stock,
        AssetClass::Crypto,
        AssetClass::Forex,
        AssetClass::Etf,
        AssetClass::Commodity,
    ];

    /// Stem used when naming the warehouse table for this asset class.
    pub fn table_stem(&self) -> &'static str {
        match self {
            AssetClass::Stock => "stocks",
            AssetClass::Crypto => "crypto",
            AssetClass::Forex => "forex",
            AssetClass::Etf => "etfs",
            AssetClass::Commodity => "commodities",
        }
    }

    /// Quote pairs (forex, crypto) are written `BASE/QUOTE` by the providers.
    pub fn is_pair(&self) -> bool {
        matches!(self, AssetClass::Crypto | AssetClass::Forex)
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetClass::Stock => write!(f, "stock"),
            AssetClass::Crypto => write!(f, "crypto"),
            AssetClass::Forex => write!(f, "forex"),
            AssetClass::Etf => write!(f, "etf"),
            AssetClass::Commodity => write!(f, "commodity"),
        }
    }
}

impl FromStr for AssetClass {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "stock" | "stocks" => Ok(AssetClass::Stock),
            "crypto" | "cryptos" => Ok(AssetClass::Crypto),
            "forex" | "fx" => Ok(AssetClass::Forex),
            "etf" | "etfs" => Ok(AssetClass::Etf),
            "commodity" | "commodities" => Ok(AssetClass::Commodity),
            other => Err(PipelineError::InvalidParameter(format!(
                "unknown asset class {:?}",
                other
            ))),
        }
    }
}

/// Candle timeframe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    Min1,
    Min5,
    Min15,
    Min30,
    Hour1,
    Hour4,
    Day1,
    Week1,
    Month1,
}

impl Interval {
    pub const ALL: [Interval; 9] = [
        Interval::Min1,
        Interval::Min5,
        Interval::Min15,
        Interval::Min30,
        Interval::Hour1,
        Interval::Hour4,
        Interval::Day1,
        Interval::Week1,
        Interval::Month1,
    ];

    pub fn twelvedata_code(&self) -> &'static str {
        match self {
            Interval::Min1 => "1min",
            Interval::Min5 => "5min",
            Interval::Min15 => "15min",
            Interval::Min30 => "30min",
            Interval::Hour1 => "1h",
            Interval::Hour4 => "4h",
            Interval::Day1 => "1day",
            Interval::Week1 => "1week",
            Interval::Month1 => "1month",
        }
    }

    /// Finnhub resolution; Finnhub has no 4h candles.
    pub fn finnhub_resolution(&self) -> Option<&'static str> {
        match self {
            Interval::Min1 => Some("1"),
            Interval::Min5 => Some("5"),
            Interval::Min15 => Some("15"),
            Interval::Min30 => Some("30"),
            Interval::Hour1 => Some("60"),
            Interval::Hour4 => None,
            Interval::Day1 => Some("D"),
            Interval::Week1 => Some("W"),
            Interval::Month1 => Some("M"),
        }
    }

    pub fn table_suffix(&self) -> &'static str {
        match self {
            Interval::Min1 => "1m",
            Interval::Min5 => "5m",
            Interval::Min15 => "15m",
            Interval::Min30 => "30m",
            Interval::Hour1 => "1h",
            Interval::Hour4 => "4h",
            Interval::Day1 => "1d",
            Interval::Week1 => "1w",
            Interval::Month1 => "1mo",
        }
    }

    /// Nominal bar length in seconds (months approximated as 30 days).
    pub fn seconds(&self) -> i64 {
        match self {
            Interval::Min1 => 60,
            Interval::Min5 => 300,
            Interval::Min15 => 900,
            Interval::Min30 => 1_800,
            Interval::Hour1 => 3_600,
            Interval::Hour4 => 14_400,
            Interval::Day1 => 86_400,
            Interval::Week1 => 604_800,
            Interval::Month1 => 2_592_000,
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.twelvedata_code())
    }
}

impl FromStr for Interval {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "1min" | "1m" | "1" => Ok(Interval::Min1),
            "5min" | "5m" | "5" => Ok(Interval::Min5),
            "15min" | "15m" | "15" => Ok(Interval::Min15),
            "30min" | "30m" | "30" => Ok(Interval::Min30),
            "1h" | "60min" | "60" => Ok(Interval::Hour1),
            "4h" => Ok(Interval::Hour4),
            "1day" | "1d" | "d" | "daily" => Ok(Interval::Day1),
            "1week" | "1w" | "w" | "weekly" => Ok(Interval::Week1),
            "1month" | "1mo" | "m" | "monthly" => Ok(Interval::Month1),
            other => Err(PipelineError::InvalidParameter(format!(
                "unknown interval {:?}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub datetime: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Forex quotes carry no volume
    pub volume: Option<f64>,
}

/// Columnar OHLCV series for a single symbol, ascending by datetime with unique
/// timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandleSeries {
    pub symbol: String,
    pub asset_class: AssetClass,
    pub interval: Interval,
    pub datetime: Vec<DateTime<Utc>>,
    pub open: Vec<f64>,
    pub high: Vec<f64>,
    pub low: Vec<f64>,
    pub close: Vec<f64>,
    pub volume: Vec<Option<f64>>,
}

impl CandleSeries {
    pub fn new(symbol: String, asset_class: AssetClass, interval: Interval) -> Self {
        Self {
            symbol,
            asset_class,
            interval,
            datetime: Vec::new(),
            open: Vec::new(),
            high: Vec::new(),
            low: Vec::new(),
            close: Vec::new(),
            volume: Vec::new(),
        }
    }

    /// Build a series from candles in any order. Later duplicates of the same
    /// datetime replace earlier ones.
    pub fn from_candles(
        symbol: String,
        asset_class: AssetClass,
        interval: Interval,
        mut candles: Vec<Candle>,
    ) -> Self {
        // stable sort keeps input order among equal timestamps
        candles.sort_by_key(|c| c.datetime);

        let mut deduped: Vec<Candle> = Vec::with_capacity(candles.len());
        for candle in candles {
            match deduped.last_mut() {
                Some(last) if last.datetime == candle.datetime => *last = candle,
                _ => deduped.push(candle),
            }
        }

        let mut series = Self::new(symbol, asset_class, interval);
        for c in deduped {
            series.datetime.push(c.datetime);
            series.open.push(c.open);
            series.high.push(c.high);
            series.low.push(c.low);
            series.close.push(c.close);
            series.volume.push(c.volume);
        }
        series
    }

    pub fn len(&self) -> usize {
        self.close.len()
    }

    pub fn is_empty(&self) -> bool {
        self.close.is_empty()
    }

    pub fn candle(&self, index: usize) -> Candle {
        Candle {
            datetime: self.datetime[index],
            open: self.open[index],
            high: self.high[index],
            low: self.low[index],
            close: self.close[index],
            volume: self.volume[index],
        }
    }

    pub fn candles(&self) -> Vec<Candle> {
        (0..self.len()).map(|i| self.candle(i)).collect()
    }

    pub fn has_volume(&self) -> bool {
        self.volume.iter().any(|v| v.is_some())
    }

    /// Volume column with missing values read as zero.
    pub fn volume_or_zero(&self) -> Vec<f64> {
        self.volume.iter().map(|v| v.unwrap_or(0.0)).collect()
    }

    /// (high + low + close) / 3 per bar.
    pub fn typical_price(&self) -> Vec<f64> {
        (0..self.len())
            .map(|i| (self.high[i] + self.low[i] + self.close[i]) / 3.0)
            .collect()
    }

    pub fn first_datetime(&self) -> Option<DateTime<Utc>> {
        self.datetime.first().copied()
    }

    pub fn last_datetime(&self) -> Option<DateTime<Utc>> {
        self.datetime.last().copied()
    }

    /// Index of the first bar at or after `from`.
    pub fn position_from(&self, from: DateTime<Utc>) -> usize {
        self.datetime.partition_point(|t| *t < from)
    }

    /// Bars at or after `from` as a new series.
    pub fn slice_from(&self, from: DateTime<Utc>) -> CandleSeries {
        let start = self.position_from(from);
        CandleSeries {
            symbol: self.symbol.clone(),
            asset_class: self.asset_class,
            interval: self.interval,
            datetime: self.datetime[start..].to_vec(),
            open: self.open[start..].to_vec(),
            high: self.high[start..].to_vec(),
            low: self.low[start..].to_vec(),
            close: self.close[start..].to_vec(),
            volume: self.volume[start..].to_vec(),
        }
    }
}

/// One FRED observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroObservation {
    pub series_id: String,
    pub date: NaiveDate,
    pub value: f64,
}

/// Named indicator columns aligned with a candle series.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndicatorFrame {
    len: usize,
    names: Vec<String>,
    columns: Vec<Vec<Option<f64>>>,
}

impl IndicatorFrame {
    pub fn new(len: usize) -> Self {
        Self {
            len,
            names: Vec::new(),
            columns: Vec::new(),
        }
    }

    /// Add a column of raw values; NaN and infinities become `None`.
    pub fn push(&mut self, name: impl Into<String>, values: Vec<f64>) -> Result<()> {
        let column = values
            .into_iter()
            .map(|v| if v.is_finite() { Some(v) } else { None })
            .collect();
        self.push_optional(name, column)
    }

    pub fn push_optional(&mut self, name: impl Into<String>, values: Vec<Option<f64>>) -> Result<()> {
        let name = name.into();
        if values.len() != self.len {
            return Err(PipelineError::InvalidParameter(format!(
                "column {} has {} values, frame has {} rows",
                name,
                values.len(),
                self.len
            )));
        }
        if self.names.contains(&name) {
            return Err(PipelineError::InvalidParameter(format!(
                "duplicate column {}",
                name
            )));
        }
        self.names.push(name);
        self.columns.push(values);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn column(&self, name: &str) -> Option<&[Option<f64>]> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.columns[i].as_slice())
    }

    /// Value of `name` at `index`, if the column exists and is non-null there.
    pub fn value(&self, name: &str, index: usize) -> Option<f64> {
        self.column(name).and_then(|c| c.get(index).copied().flatten())
    }

    pub fn row(&self, index: usize) -> Vec<Option<f64>> {
        self.columns.iter().map(|c| c[index]).collect()
    }
}

/// A warehouse row: OHLCV plus indicator values in the frame's column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRow {
    pub symbol: String,
    pub datetime: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: Option<f64>,
    pub indicators: Vec<Option<f64>>,
}

/// Join a series and its indicator frame into rows, starting at bar `from`.
pub fn enriched_rows(series: &CandleSeries, frame: &IndicatorFrame, from: usize) -> Vec<EnrichedRow> {
    (from..series.len())
        .map(|i| EnrichedRow {
            symbol: series.symbol.clone(),
            datetime: series.datetime[i],
            open: series.open[i],
            high: series.high[i],
            low: series.low[i],
            close: series.close[i],
            volume: series.volume[i],
            indicators: frame.row(i),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn candle(day: u32, close: f64) -> Candle {
        Candle {
            datetime: Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: Some(100.0),
        }
    }

    #[test]
    fn from_candles_sorts_and_keeps_last_duplicate() {
        let candles = vec![candle(3, 30.0), candle(1, 10.0), candle(2, 20.0), candle(1, 11.0)];
        let series = CandleSeries::from_candles("AAPL".into(), AssetClass::Stock, Interval::Day1, candles);

        assert_eq!(series.len(), 3);
        assert_eq!(series.close, vec![11.0, 20.0, 30.0]);
        assert!(series.datetime.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn position_from_finds_first_bar_at_or_after() {
        let candles = vec![candle(1, 1.0), candle(2, 2.0), candle(4, 4.0)];
        let series = CandleSeries::from_candles("X".into(), AssetClass::Stock, Interval::Day1, candles);

        assert_eq!(series.position_from(Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap()), 1);
        assert_eq!(series.position_from(Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap()), 2);
        assert_eq!(series.position_from(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap()), 3);

        let tail = series.slice_from(Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap());
        assert_eq!(tail.close, vec![2.0, 4.0]);
        assert_eq!(tail.volume.len(), 2);
    }

    #[test]
    fn frame_maps_non_finite_to_null_and_checks_length() {
        let mut frame = IndicatorFrame::new(3);
        frame.push("rsi_14", vec![f64::NAN, 50.0, f64::INFINITY]).unwrap();

        assert_eq!(frame.column("rsi_14").unwrap(), &[None, Some(50.0), None]);
        assert!(frame.push("short", vec![1.0]).is_err());
        assert!(frame.push("rsi_14", vec![1.0, 2.0, 3.0]).is_err());
    }

    #[test]
    fn parses_intervals_and_asset_classes() {
        assert_eq!("1day".parse::<Interval>().unwrap(), Interval::Day1);
        assert_eq!("D".parse::<Interval>().unwrap(), Interval::Day1);
        assert_eq!("4h".parse::<Interval>().unwrap(), Interval::Hour4);
        assert!(Interval::Hour4.finnhub_resolution().is_none());
        assert_eq!("ETFs".parse::<AssetClass>().unwrap(), AssetClass::Etf);
        assert!("bonds".parse::<AssetClass>().is_err());
    }
}
