use crate::cache::redis::RedisManager;
use crate::database::models::{AssetClass, Interval};
use crate::database::schema::market_table_name;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One symbol to fetch, enrich and upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolJob {
    pub symbol: String,
    pub asset_class: AssetClass,
    pub interval: Interval,
    pub output_size: usize,
}

impl SymbolJob {
    pub fn new(symbol: impl Into<String>, asset_class: AssetClass, interval: Interval, output_size: usize) -> Self {
        Self {
            symbol: symbol.into(),
            asset_class,
            interval,
            output_size,
        }
    }

    /// Jobs for every symbol of one asset class.
    pub fn for_symbols(
        symbols: &[String],
        asset_class: AssetClass,
        interval: Interval,
        output_size: usize,
    ) -> Vec<Self> {
        symbols
            .iter()
            .map(|s| Self::new(s.clone(), asset_class, interval, output_size))
            .collect()
    }

    pub fn table(&self) -> String {
        market_table_name(self.asset_class, self.interval)
    }

    pub fn cache_key(&self) -> String {
        format!(
            "job:{}:{}:{}",
            self.asset_class,
            self.symbol,
            self.interval.table_suffix()
        )
    }

    pub fn series_cache_key(&self, provider: &str) -> String {
        RedisManager::series_key(provider, &self.symbol, self.interval, self.output_size)
    }
}

impl fmt::Display for SymbolJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.asset_class, self.symbol, self.interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_and_table() {
        let job = SymbolJob::new("EUR/USD", AssetClass::Forex, Interval::Hour1, 300);
        assert_eq!(job.table(), "forex_1h");
        assert_eq!(job.cache_key(), "job:forex:EUR/USD:1h");
        assert_eq!(job.series_cache_key("TwelveData"), "series:TwelveData:EUR/USD:1h:300");
        assert_eq!(job.to_string(), "forex:EUR/USD:1h");
    }

    #[test]
    fn builds_jobs_for_universe() {
        let symbols = vec!["SPY".to_string(), "QQQ".to_string()];
        let jobs = SymbolJob::for_symbols(&symbols, AssetClass::Etf, Interval::Day1, 500);
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[1].symbol, "QQQ");
        assert!(jobs.iter().all(|j| j.table() == "etfs_1d"));
    }
}
