use super::{decode_json, http_client, split_pair, MarketDataSource};
use crate::database::models::{AssetClass, Candle, CandleSeries, Interval};
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};

const PROVIDER: &str = "Finnhub";

/// Finnhub candle payload: parallel arrays plus a status flag.
#[derive(Debug, Deserialize)]
struct CandleResponse {
    s: Option<String>,
    error: Option<String>,
    #[serde(default)]
    t: Vec<i64>,
    #[serde(default)]
    o: Vec<f64>,
    #[serde(default)]
    h: Vec<f64>,
    #[serde(default)]
    l: Vec<f64>,
    #[serde(default)]
    c: Vec<f64>,
    v: Option<Vec<f64>>,
}

#[derive(Clone)]
pub struct FinnhubClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl FinnhubClient {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            api_key: api_key.into(),
            base_url: "https://finnhub.io/api/v1".to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Finnhub wants exchange-qualified pairs: `EUR/USD` -> `OANDA:EUR_USD`,
    /// `BTC/USD` -> `BINANCE:BTCUSDT`. Qualified symbols (`X:Y`) pass through.
    pub fn provider_symbol(symbol: &str, asset_class: AssetClass) -> String {
        let trimmed = symbol.trim();
        if trimmed.contains(':') || !asset_class.is_pair() {
            return trimmed.to_string();
        }
        match (asset_class, split_pair(trimmed)) {
            (AssetClass::Forex, Some((base, quote))) => format!("OANDA:{}_{}", base, quote),
            (AssetClass::Crypto, Some((base, quote))) => {
                let quote = if quote == "USD" { "USDT".to_string() } else { quote };
                format!("BINANCE:{}{}", base, quote)
            }
            _ => trimmed.to_string(),
        }
    }

    fn endpoint(asset_class: AssetClass) -> &'static str {
        match asset_class {
            AssetClass::Forex => "forex/candle",
            AssetClass::Crypto => "crypto/candle",
            _ => "stock/candle",
        }
    }

    /// Unix-second range covering `output_size` bars back from `now`.
    fn time_range(now: DateTime<Utc>, interval: Interval, output_size: usize) -> (i64, i64) {
        let to = now.timestamp();
        (to - interval.seconds() * output_size as i64, to)
    }

    fn parse_response(
        body: CandleResponse,
        symbol: &str,
        asset_class: AssetClass,
        interval: Interval,
    ) -> Result<CandleSeries> {
        if let Some(error) = body.error {
            return Err(PipelineError::Api {
                provider: PROVIDER,
                status: 200,
                message: error,
            });
        }
        match body.s.as_deref() {
            Some("ok") => {}
            Some("no_data") => return Err(PipelineError::NoData { symbol: symbol.to_string() }),
            other => {
                return Err(PipelineError::Parse(format!(
                    "{} candle status {:?}",
                    PROVIDER, other
                )))
            }
        }

        let n = body.t.len();
        let volume_ok = body.v.as_ref().map_or(true, |v| v.len() == n);
        if body.o.len() != n || body.h.len() != n || body.l.len() != n || body.c.len() != n || !volume_ok {
            return Err(PipelineError::Parse(format!(
                "{} candle arrays for {} have unequal lengths",
                PROVIDER, symbol
            )));
        }
        if n == 0 {
            return Err(PipelineError::NoData { symbol: symbol.to_string() });
        }

        let candles = (0..n)
            .map(|i| {
                let datetime = DateTime::from_timestamp(body.t[i], 0).ok_or_else(|| {
                    PipelineError::Parse(format!("{} timestamp {} out of range", PROVIDER, body.t[i]))
                })?;
                Ok(Candle {
                    datetime,
                    open: body.o[i],
                    high: body.h[i],
                    low: body.l[i],
                    close: body.c[i],
                    volume: body.v.as_ref().map(|v| v[i]),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(CandleSeries::from_candles(symbol.to_string(), asset_class, interval, candles))
    }
}

#[async_trait]
impl MarketDataSource for FinnhubClient {
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
        let resolution = interval.finnhub_resolution().ok_or_else(|| {
            PipelineError::InvalidParameter(format!("{} has no {} candles", PROVIDER, interval))
        })?;
        let (from, to) = Self::time_range(Utc::now(), interval, output_size);

        let response = self
            .client
            .get(format!("{}/{}", self.base_url, Self::endpoint(asset_class)))
            .query(&[
                ("symbol", Self::provider_symbol(symbol, asset_class)),
                ("resolution", resolution.to_string()),
                ("from", from.to_string()),
                ("to", to.to_string()),
                ("token", self.api_key.clone()),
            ])
            .send()
            .await?;

        let body: CandleResponse = decode_json(PROVIDER, response).await?;
        let series = Self::parse_response(body, symbol, asset_class, interval)?;
        debug!("Fetched {} bars for {} from {}", series.len(), symbol, PROVIDER);
        Ok(series)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn parse(json: &str) -> Result<CandleSeries> {
        let body: CandleResponse = serde_json::from_str(json).unwrap();
        FinnhubClient::parse_response(body, "AAPL", AssetClass::Stock, Interval::Day1)
    }

    #[test]
    fn range_spans_requested_bars() {
        let now = Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap();
        let (from, to) = FinnhubClient::time_range(now, Interval::Day1, 30);
        assert_eq!(to - from, 30 * 86_400);
    }

    #[test]
    fn maps_universe_pairs_to_exchange_symbols() {
        assert_eq!(FinnhubClient::provider_symbol("EUR/USD", AssetClass::Forex), "OANDA:EUR_USD");
        assert_eq!(FinnhubClient::provider_symbol("gbpjpy", AssetClass::Forex), "OANDA:GBP_JPY");
        assert_eq!(FinnhubClient::provider_symbol("BTC/USD", AssetClass::Crypto), "BINANCE:BTCUSDT");
        assert_eq!(FinnhubClient::provider_symbol("ETH/BTC", AssetClass::Crypto), "BINANCE:ETHBTC");
        assert_eq!(FinnhubClient::provider_symbol("OANDA:EUR_USD", AssetClass::Forex), "OANDA:EUR_USD");
        assert_eq!(FinnhubClient::provider_symbol("AAPL", AssetClass::Stock), "AAPL");
    }

    #[test]
    fn no_data_status() {
        assert!(matches!(parse(r#"{"s":"no_data"}"#), Err(PipelineError::NoData { .. })));
    }

    #[test]
    fn unequal_arrays_are_rejected() {
        let result = parse(r#"{"s":"ok","t":[1704067200,1704153600],"o":[1,2],"h":[1,2],"l":[1],"c":[1,2],"v":[5,6]}"#);
        assert!(matches!(result, Err(PipelineError::Parse(_))));
    }

    #[test]
    fn parses_candles_ascending() {
        let series = parse(
            r#"{"s":"ok","t":[1704153600,1704067200],"o":[2,1],"h":[2.5,1.5],"l":[1.5,0.5],"c":[2.2,1.2],"v":[60,50]}"#,
        )
        .unwrap();
        assert_eq!(series.close, vec![1.2, 2.2]);
        assert_eq!(series.volume, vec![Some(50.0), Some(60.0)]);
    }

    #[test]
    fn error_field_is_api_error() {
        assert!(matches!(
            parse(r#"{"error":"You don't have access to this resource."}"#),
            Err(PipelineError::Api { .. })
        ));
    }
}
