pub mod finnhub;
pub mod fred;
pub mod rate_limit;
pub mod twelvedata;

pub use self::finnhub::FinnhubClient;
pub use self::fred::FredClient;
pub use self::rate_limit::RateLimiter;
pub use self::twelvedata::TwelveDataClient;

use crate::config::{MarketProvider, ProvidersConfig};
use crate::database::models::{AssetClass, CandleSeries, Interval};
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Quote currencies recognised when splitting an unslashed pair.
const QUOTE_CURRENCIES: [&str; 10] = ["USDT", "USDC", "USD", "EUR", "GBP", "JPY", "CHF", "CAD", "AUD", "BTC"];

/// Split `EUR/USD`, `EURUSD` or `BTCUSDT` into uppercase base and quote.
pub(crate) fn split_pair(symbol: &str) -> Option<(String, String)> {
    let symbol = symbol.trim().to_uppercase();
    if let Some((base, quote)) = symbol.split_once('/') {
        return Some((base.to_string(), quote.to_string()));
    }
    if symbol.len() == 6 && symbol.chars().all(|c| c.is_ascii_alphabetic()) {
        return Some((symbol[..3].to_string(), symbol[3..].to_string()));
    }
    QUOTE_CURRENCIES
        .iter()
        .find(|quote| symbol.len() > quote.len() && symbol.ends_with(*quote))
        .map(|quote| (symbol[..symbol.len() - quote.len()].to_string(), quote.to_string()))
}

/// A REST provider of OHLCV candles.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fetch up to `output_size` of the most recent bars, ascending by datetime.
    async fn fetch_series(
        &self,
        symbol: &str,
        asset_class: AssetClass,
        interval: Interval,
        output_size: usize,
    ) -> Result<CandleSeries>;
}

/// Build the configured candle provider.
pub fn market_source(config: &ProvidersConfig) -> Result<Arc<dyn MarketDataSource>> {
    let timeout = Duration::from_secs(config.timeout_secs);
    match config.market {
        MarketProvider::TwelveData => {
            let key = config.twelvedata_api_key.as_deref().ok_or_else(|| {
                PipelineError::Config("TWELVEDATA_API_KEY is not set".to_string())
            })?;
            Ok(Arc::new(
                TwelveDataClient::new(key, timeout)?.with_base_url(&config.twelvedata_base_url),
            ))
        }
        MarketProvider::Finnhub => {
            let key = config
                .finnhub_api_key
                .as_deref()
                .ok_or_else(|| PipelineError::Config("FINNHUB_API_KEY is not set".to_string()))?;
            Ok(Arc::new(
                FinnhubClient::new(key, timeout)?.with_base_url(&config.finnhub_base_url),
            ))
        }
    }
}

pub fn fred_client(config: &ProvidersConfig) -> Result<FredClient> {
    let key = config
        .fred_api_key
        .as_deref()
        .ok_or_else(|| PipelineError::Config("FRED_API_KEY is not set".to_string()))?;
    Ok(FredClient::new(key, Duration::from_secs(config.timeout_secs))?
        .with_base_url(&config.fred_base_url))
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("market-data-pipeline/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Map non-success statuses onto the error taxonomy, then decode the body.
pub(crate) async fn decode_json<T: DeserializeOwned>(provider: &'static str, response: Response) -> Result<T> {
    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(PipelineError::RateLimited { provider });
    }
    let body = response.text().await?;
    if !status.is_success() {
        return Err(PipelineError::Api {
            provider,
            status: status.as_u16(),
            message: body.chars().take(300).collect(),
        });
    }
    serde_json::from_str(&body).map_err(|e| PipelineError::Parse(format!("{} response: {}", provider, e)))
}

pub(crate) fn parse_number(provider: &str, field: &str, raw: &str) -> Result<f64> {
    raw.trim()
        .parse::<f64>()
        .map_err(|_| PipelineError::Parse(format!("{} {} is not a number: {:?}", provider, field, raw)))
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// `retry_max` retries are used up. The n-th retry waits `n * retry_delay`.
pub async fn with_retry<T, F, Fut>(label: &str, retry_max: usize, retry_delay: Duration, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < retry_max => {
                attempt += 1;
                let delay = retry_delay * attempt as u32;
                warn!(
                    "{} failed ({}), retry {}/{} in {:?}",
                    label, e, attempt, retry_max, delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
