use crate::database::models::AssetClass;
use crate::error::{PipelineError, Result};
use crate::indicators::IndicatorSettings;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

/// Default config file looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "pipeline.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub providers: ProvidersConfig,
    pub pipeline: PipelineConfig,
    pub universe: UniverseConfig,
    pub indicators: IndicatorSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub dbname: String,
    pub max_connections: u32,
    /// Full connection string; wins over the individual fields when set
    pub url: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: "postgres".to_string(),
            dbname: "market_data".to_string(),
            max_connections: 10,
            url: None,
        }
    }
}

impl DatabaseConfig {
    pub fn url(&self) -> String {
        match &self.url {
            Some(url) => url.clone(),
            None => format!(
                "postgres://{}:{}@{}:{}/{}",
                self.user, self.password, self.host, self.port, self.dbname
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub enabled: bool,
    pub url: String,
    pub ttl_seconds: u64,
    pub pool_size: usize,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "redis://127.0.0.1:6379".to_string(),
            ttl_seconds: 3600,
            pool_size: 8,
        }
    }
}

/// Which provider serves OHLCV candles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketProvider {
    TwelveData,
    Finnhub,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub market: MarketProvider,
    pub twelvedata_api_key: Option<String>,
    pub twelvedata_base_url: String,
    pub finnhub_api_key: Option<String>,
    pub finnhub_base_url: String,
    pub fred_api_key: Option<String>,
    pub fred_base_url: String,
    pub timeout_secs: u64,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            market: MarketProvider::TwelveData,
            twelvedata_api_key: None,
            twelvedata_base_url: "https://api.twelvedata.com".to_string(),
            finnhub_api_key: None,
            finnhub_base_url: "https://finnhub.io/api/v1".to_string(),
            fred_api_key: None,
            fred_base_url: "https://api.stlouisfed.org".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Minimum spacing between provider calls, shared by all tasks
    pub request_delay_ms: u64,
    pub batch_size: usize,
    pub retry_max: usize,
    pub retry_delay_ms: u64,
    pub concurrency: usize,
    /// Bars requested per symbol
    pub output_size: usize,
    /// Upload only bars at or after the latest stored datetime
    pub incremental: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            request_delay_ms: 8000,
            batch_size: 1000,
            retry_max: 3,
            retry_delay_ms: 2000,
            concurrency: num_cpus::get().min(4),
            output_size: 500,
            incremental: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UniverseConfig {
    pub stocks: Vec<String>,
    pub crypto: Vec<String>,
    pub forex: Vec<String>,
    pub etfs: Vec<String>,
    pub commodities: Vec<String>,
    /// FRED series ids
    pub fred_series: Vec<String>,
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

impl Default for UniverseConfig {
    fn default() -> Self {
        Self {
            stocks: strings(&["AAPL", "MSFT", "GOOGL", "AMZN", "NVDA"]),
            crypto: strings(&["BTC/USD", "ETH/USD"]),
            forex: strings(&["EUR/USD", "GBP/USD", "USD/JPY"]),
            etfs: strings(&["SPY", "QQQ"]),
            commodities: strings(&["XAU/USD", "WTI/USD"]),
            fred_series: strings(&["GDP", "CPIAUCSL", "UNRATE", "FEDFUNDS", "DGS10"]),
        }
    }
}

impl UniverseConfig {
    pub fn symbols(&self, asset_class: AssetClass) -> &[String] {
        match asset_class {
            AssetClass::Stock => &self.stocks,
            AssetClass::Crypto => &self.crypto,
            AssetClass::Forex => &self.forex,
            AssetClass::Etf => &self.etfs,
            AssetClass::Commodity => &self.commodities,
        }
    }
}

impl AppConfig {
    /// Load defaults, then the config file (if present), then `PIPELINE__*`
    /// environment variables, then the conventional provider/database variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let mut environment = config::Environment::with_prefix("PIPELINE")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
            .list_separator(",");
        for key in ["stocks", "crypto", "forex", "etfs", "commodities", "fred_series"] {
            environment = environment.with_list_parse_key(&format!("universe.{}", key));
        }

        let builder = config::Config::builder()
            .add_source(file)
            .add_source(environment)
            .set_override_option("providers.twelvedata_api_key", env::var("TWELVEDATA_API_KEY").ok())?
            .set_override_option("providers.finnhub_api_key", env::var("FINNHUB_API_KEY").ok())?
            .set_override_option("providers.fred_api_key", env::var("FRED_API_KEY").ok())?
            .set_override_option("database.url", env::var("DATABASE_URL").ok())?
            .set_override_option("redis.url", env::var("REDIS_URL").ok())?;

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pipeline.concurrency == 0 {
            return Err(PipelineError::Config("pipeline.concurrency must be at least 1".to_string()));
        }
        if self.pipeline.batch_size == 0 {
            return Err(PipelineError::Config("pipeline.batch_size must be at least 1".to_string()));
        }
        if self.pipeline.output_size == 0 {
            return Err(PipelineError::Config("pipeline.output_size must be at least 1".to_string()));
        }
        self.indicators
            .validate()
            .map_err(|e| PipelineError::Config(format!("indicators: {}", e)))
    }
}
