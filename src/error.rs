use thiserror::Error;

/// Errors raised by the fetchers, indicator calculators and warehouse layer.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Transport-level failure talking to a provider
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Provider answered with an error payload or a non-success status
    #[error("{provider} API error (status {status}): {message}")]
    Api {
        provider: &'static str,
        status: u16,
        message: String,
    },

    /// Provider rejected the call because of its request quota
    #[error("{provider} rate limit exceeded")]
    RateLimited { provider: &'static str },

    /// Provider has no data for the requested symbol / range
    #[error("No data returned for {symbol}")]
    NoData { symbol: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Not enough data points for {indicator}: need {required}, have {available}")]
    InsufficientData {
        indicator: &'static str,
        required: usize,
        available: usize,
    },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Table or column name that cannot be safely interpolated into SQL
    #[error("Invalid SQL identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("Database error")]
    Database(#[from] sqlx::Error),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    /// Whether repeating the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::RateLimited { .. } => true,
            PipelineError::Api { status, .. } => *status >= 500,
            PipelineError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Parse(err.to_string())
    }
}

impl From<redis::RedisError> for PipelineError {
    fn from(err: redis::RedisError) -> Self {
        PipelineError::Cache(err.to_string())
    }
}

impl From<deadpool_redis::PoolError> for PipelineError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        PipelineError::Cache(err.to_string())
    }
}

impl From<config::ConfigError> for PipelineError {
    fn from(err: config::ConfigError) -> Self {
        PipelineError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
