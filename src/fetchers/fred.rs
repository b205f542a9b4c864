use super::{decode_json, http_client, parse_number};
use crate::database::models::MacroObservation;
use crate::error::{PipelineError, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};

const PROVIDER: &str = "FRED";

/// FRED's marker for a missing observation.
const MISSING_VALUE: &str = ".";

#[derive(Debug, Deserialize)]
struct ObservationsResponse {
    #[serde(default)]
    observations: Vec<RawObservation>,
    error_code: Option<u16>,
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawObservation {
    date: String,
    value: String,
}

/// Client for the St. Louis Fed economic data API.
#[derive(Clone)]
pub struct FredClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl FredClient {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            api_key: api_key.into(),
            base_url: "https://api.stlouisfed.org".to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn parse_response(body: ObservationsResponse, series_id: &str) -> Result<Vec<MacroObservation>> {
        if let Some(code) = body.error_code {
            return Err(PipelineError::Api {
                provider: PROVIDER,
                status: code,
                message: body.error_message.unwrap_or_default(),
            });
        }

        let mut observations = Vec::with_capacity(body.observations.len());
        for raw in body.observations {
            if raw.value.trim() == MISSING_VALUE {
                continue;
            }
            let date = NaiveDate::parse_from_str(&raw.date, "%Y-%m-%d")
                .map_err(|_| PipelineError::Parse(format!("{} date {:?}", PROVIDER, raw.date)))?;
            observations.push(MacroObservation {
                series_id: series_id.to_string(),
                date,
                value: parse_number(PROVIDER, "value", &raw.value)?,
            });
        }
        Ok(observations)
    }

    /// Observations of `series_id`, optionally starting at `start`.
    #[instrument(skip(self))]
    pub async fn fetch_observations(
        &self,
        series_id: &str,
        start: Option<NaiveDate>,
    ) -> Result<Vec<MacroObservation>> {
        let mut query = vec![
            ("series_id", series_id.to_string()),
            ("api_key", self.api_key.clone()),
            ("file_type", "json".to_string()),
        ];
        if let Some(start) = start {
            query.push(("observation_start", start.format("%Y-%m-%d").to_string()));
        }

        let response = self
            .client
            .get(format!("{}/fred/series/observations", self.base_url))
            .query(&query)
            .send()
            .await?;

        let body: ObservationsResponse = decode_json(PROVIDER, response).await?;
        let observations = Self::parse_response(body, series_id)?;
        if observations.is_empty() {
            return Err(PipelineError::NoData { symbol: series_id.to_string() });
        }
        debug!("Fetched {} observations for {}", observations.len(), series_id);
        Ok(observations)
    }
}
