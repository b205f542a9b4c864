use super::{decode_json, http_client, parse_number, split_pair, MarketDataSource};
use crate::database::models::{AssetClass, Candle, CandleSeries, Interval};
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};

const PROVIDER: &str = "TwelveData";

/// TwelveData allows at most 5000 bars per request.
const MAX_OUTPUT_SIZE: usize = 5000;

#[derive(Debug, Deserialize)]
struct TimeSeriesResponse {
    status: Option<String>,
    code: Option<u16>,
    message: Option<String>,
    #[serde(default)]
    values: Vec<TimeSeriesValue>,
}

#[derive(Debug, Deserialize)]
struct TimeSeriesValue {
    datetime: String,
    open: String,
    high: String,
    low: String,
    close: String,
    volume: Option<String>,
}

#[derive(Clone)]
pub struct TwelveDataClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl TwelveDataClient {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            api_key: api_key.into(),
            base_url: "https://api.twelvedata.com".to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// `EURUSD` -> `EUR/USD` for pair asset classes; everything else passes through.
    pub fn normalize_symbol(symbol: &str, asset_class: AssetClass) -> String {
        if !asset_class.is_pair() {
            return symbol.trim().to_uppercase();
        }
        match split_pair(symbol) {
            Some((base, quote)) => format!("{}/{}", base, quote),
            None => symbol.trim().to_uppercase(),
        }
    }

    fn parse_response(
        body: TimeSeriesResponse,
        symbol: &str,
        asset_class: AssetClass,
        interval: Interval,
    ) -> Result<CandleSeries> {
        if body.status.as_deref() == Some("error") {
            let message = body.message.unwrap_or_default();
            return match body.code {
                Some(429) => Err(PipelineError::RateLimited { provider: PROVIDER }),
                Some(400) | Some(404) if message.to_lowercase().contains("symbol") => {
                    Err(PipelineError::NoData { symbol: symbol.to_string() })
                }
                code => Err(PipelineError::Api {
                    provider: PROVIDER,
                    status: code.unwrap_or(0),
                    message,
                }),
            };
        }
        if body.values.is_empty() {
            return Err(PipelineError::NoData { symbol: symbol.to_string() });
        }

        let candles = body
            .values
            .iter()
            .map(|v| {
                Ok(Candle {
                    datetime: parse_datetime(&v.datetime)?,
                    open: parse_number(PROVIDER, "open", &v.open)?,
                    high: parse_number(PROVIDER, "high", &v.high)?,
                    low: parse_number(PROVIDER, "low", &v.low)?,
                    close: parse_number(PROVIDER, "close", &v.close)?,
                    volume: match v.volume.as_deref() {
                        Some(raw) if !raw.is_empty() => Some(parse_number(PROVIDER, "volume", raw)?),
                        _ => None,
                    },
                })
            })
            .collect::<Result<Vec<_>>>()?;

        // values arrive newest-first
        Ok(CandleSeries::from_candles(symbol.to_string(), asset_class, interval, candles))
    }
}

/// TwelveData datetimes are `YYYY-MM-DD` for daily and coarser bars,
/// `YYYY-MM-DD HH:MM:SS` otherwise; requests ask for UTC.
fn parse_datetime(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Ok(dt.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| PipelineError::Parse(format!("{} datetime {:?}", PROVIDER, raw)))
}

#[async_trait]
impl MarketDataSource for TwelveDataClient {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    #[instrument(skip(self), fields(provider = PROVIDER))]
    async fn fetch_series(
        &self,
        symbol: &str,
        asset_class: AssetClass,
        interval: Interval,
        output_size: usize,
    ) -> Result<CandleSeries> {
        let provider_symbol = Self::normalize_symbol(symbol, asset_class);
        let output_size = output_size.clamp(1, MAX_OUTPUT_SIZE).to_string();

        let response = self
            .client
            .get(format!("{}/time_series", self.base_url))
            .query(&[
                ("symbol", provider_symbol.as_str()),
                ("interval", interval.twelvedata_code()),
                ("outputsize", output_size.as_str()),
                ("timezone", "UTC"),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await?;

        let body: TimeSeriesResponse = decode_json(PROVIDER, response).await?;
        let series = Self::parse_response(body, symbol, asset_class, interval)?;
        debug!("Fetched {} bars for {} from {}", series.len(), symbol, PROVIDER);
        Ok(series)
    }
}
