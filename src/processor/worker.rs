use crate::cache::redis::RedisManager;
use crate::config::AppConfig;
use crate::database::models::{enriched_rows, AssetClass, CandleSeries, EnrichedRow, Interval};
use crate::database::postgres::PostgresManager;
use crate::database::schema::{parse_market_table_name, WriteDisposition};
use crate::error::PipelineError;
use crate::fetchers::{with_retry, FredClient, MarketDataSource, RateLimiter};
use crate::indicators::calculator::{IndicatorCalculator, IndicatorSettings};
use crate::processor::job::SymbolJob;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn};

// Worker configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub cache_ttl_seconds: u64,
    pub retry_max: usize,
    pub retry_delay_ms: u64,
    pub concurrency: usize,
    pub incremental: bool,
    /// Lifetime of the in-progress marker if a run dies before clearing it
    pub in_progress_ttl_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            cache_ttl_seconds: 3600, // 1 hour cache TTL
            retry_max: 3,
            retry_delay_ms: 2000,
            concurrency: 1,
            incremental: true,
            in_progress_ttl_seconds: 600,
        }
    }
}

impl WorkerConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            cache_ttl_seconds: config.redis.ttl_seconds,
            retry_max: config.pipeline.retry_max,
            retry_delay_ms: config.pipeline.retry_delay_ms,
            concurrency: config.pipeline.concurrency,
            incremental: config.pipeline.incremental,
            ..Self::default()
        }
    }

    fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// A cached series never outlives one bar of its interval, so the next
    /// run after a bar closes always reaches the provider.
    pub fn series_cache_ttl(&self, interval: Interval) -> Duration {
        let bar = interval.seconds().max(1) as u64;
        Duration::from_secs(self.cache_ttl_seconds.min(bar).max(1))
    }
}

/// Result of one unit of work that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Written(u64),
    Skipped(String),
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct RunSummary {
    pub succeeded: Vec<String>,
    pub skipped: Vec<(String, String)>,
    pub failed: Vec<(String, String)>,
    pub rows_written: u64,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn record(&mut self, label: impl Into<String>, outcome: Result<JobOutcome>) {
        let label = label.into();
        match outcome {
            Ok(JobOutcome::Written(rows)) => {
                self.rows_written += rows;
                self.succeeded.push(label);
            }
            Ok(JobOutcome::Skipped(reason)) => {
                debug!("Skipped {}: {}", label, reason);
                self.skipped.push((label, reason));
            }
            Err(e) => {
                error!("Failed to process {}: {:#}", label, e);
                self.failed.push((label, format!("{:#}", e)));
            }
        }
    }

    pub fn total(&self) -> usize {
        self.succeeded.len() + self.skipped.len() + self.failed.len()
    }

    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }

    pub fn log(&self) {
        info!("{}", self);
        for (label, reason) in &self.failed {
            warn!("  {} failed: {}", label, reason);
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Run finished in {:.2?}: {} succeeded, {} skipped, {} failed, {} rows written",
            self.elapsed,
            self.succeeded.len(),
            self.skipped.len(),
            self.failed.len(),
            self.rows_written
        )
    }
}

/// Compute indicators for `series` and join them into warehouse rows.
/// With `from`, only bars at or after that datetime become rows; the full
/// history still feeds the indicator windows.
pub fn enrich(
    series: &CandleSeries,
    settings: &IndicatorSettings,
    from: Option<DateTime<Utc>>,
) -> crate::error::Result<(Vec<EnrichedRow>, Vec<String>)> {
    let frame = IndicatorCalculator::compute_all(series, settings)?;
    let start = from.map_or(0, |dt| series.position_from(dt));
    Ok((enriched_rows(series, &frame, start), frame.names().to_vec()))
}

/// Fetches candle series through the cache, the shared rate limiter and the
/// retry policy.
#[derive(Clone)]
pub struct SeriesFetcher {
    source: Arc<dyn MarketDataSource>,
    limiter: Arc<RateLimiter>,
    redis: Option<Arc<RedisManager>>,
    config: WorkerConfig,
}

impl SeriesFetcher {
    pub fn new(
        source: Arc<dyn MarketDataSource>,
        limiter: Arc<RateLimiter>,
        redis: Option<Arc<RedisManager>>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            source,
            limiter,
            redis,
            config,
        }
    }

    pub fn provider(&self) -> &'static str {
        self.source.name()
    }

    pub async fn fetch(&self, job: &SymbolJob) -> crate::error::Result<CandleSeries> {
        let key = job.series_cache_key(self.source.name());

        if let Some(redis) = &self.redis {
            match redis.get::<CandleSeries>(&key).await {
                Ok(Some(series)) => {
                    debug!("Cache hit for key: {}", key);
                    return Ok(series);
                }
                Ok(None) => debug!("Cache miss for key: {}", key),
                Err(e) => warn!("Cache read failed for {}: {}", key, e),
            }
        }

        let source = &self.source;
        let limiter = &self.limiter;
        let label = format!("{} {}", source.name(), job);
        let series = with_retry(&label, self.config.retry_max, self.config.retry_delay(), move || async move {
            limiter.acquire().await;
            source
                .fetch_series(&job.symbol, job.asset_class, job.interval, job.output_size)
                .await
        })
        .await?;

        if series.is_empty() {
            return Err(PipelineError::NoData { symbol: job.symbol.clone() });
        }

        if let Some(redis) = &self.redis {
            let ttl = self.config.series_cache_ttl(job.interval);
            if let Err(e) = redis.set(&key, &series, Some(ttl)).await {
                warn!("Failed to cache series {}: {}", key, e);
            }
        }

        Ok(series)
    }
}

/// Drives fetch, compute and upload for a set of symbol jobs.
#[derive(Clone)]
pub struct Worker {
    pg: Arc<PostgresManager>,
    redis: Option<Arc<RedisManager>>,
    fetcher: SeriesFetcher,
    settings: Arc<IndicatorSettings>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(
        pg: Arc<PostgresManager>,
        redis: Option<Arc<RedisManager>>,
        fetcher: SeriesFetcher,
        settings: IndicatorSettings,
        config: WorkerConfig,
    ) -> Self {
        Self {
            pg,
            redis,
            fetcher,
            settings: Arc::new(settings),
            config,
        }
    }

    /// Process every job. A failing symbol is logged and recorded in the
    /// summary; it never stops the others.
    #[instrument(skip(self, jobs), fields(jobs = jobs.len()))]
    pub async fn run(&self, jobs: Vec<SymbolJob>, disposition: WriteDisposition) -> Result<RunSummary> {
        let started = Instant::now();
        info!(
            "Starting run of {} jobs via {} with concurrency limit: {}",
            jobs.len(),
            self.fetcher.provider(),
            self.config.concurrency
        );

        let columns = IndicatorCalculator::column_names(&self.settings)?;
        let mut tables: Vec<String> = jobs.iter().map(SymbolJob::table).collect();
        tables.sort();
        tables.dedup();

        for table in &tables {
            self.pg
                .ensure_market_table(table)
                .await
                .with_context(|| format!("Failed to prepare table {}", table))?;
            self.pg.ensure_indicator_columns(table, &columns).await?;
            if disposition == WriteDisposition::Truncate {
                self.pg.upload(table, &[], &columns, WriteDisposition::Truncate).await?;
                info!("Truncated {}", table);
            }
        }

        // the table is emptied once up front; each symbol then appends
        let per_job = match disposition {
            WriteDisposition::Truncate => WriteDisposition::Append,
            other => other,
        };

        // Create a semaphore to limit concurrent processing
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let handles: Vec<_> = jobs
            .into_iter()
            .map(|job| {
                let worker = self.clone();
                let semaphore = Arc::clone(&semaphore);
                tokio::spawn(async move {
                    let outcome = match semaphore.acquire_owned().await {
                        Ok(_permit) => worker.process_job(&job, per_job).await,
                        Err(e) => Err(anyhow!("semaphore closed: {}", e)),
                    };
                    (job, outcome)
                })
            })
            .collect();

        let mut summary = RunSummary::default();
        for joined in join_all(handles).await {
            match joined {
                Ok((job, outcome)) => summary.record(job.to_string(), outcome),
                Err(e) => summary.record("worker task", Err(anyhow!("task failed: {}", e))),
            }
        }

        summary.elapsed = started.elapsed();
        summary.log();
        Ok(summary)
    }

    #[instrument(skip(self, job), fields(job = %job))]
    async fn process_job(&self, job: &SymbolJob, disposition: WriteDisposition) -> Result<JobOutcome> {
        let job_key = RedisManager::in_progress_key(&job.cache_key());

        // Check if job is already being processed
        let mut claimed = None;
        if let Some(redis) = &self.redis {
            let ttl = Duration::from_secs(self.config.in_progress_ttl_seconds);
            match redis.claim(&job_key, ttl).await {
                Ok(true) => claimed = Some(redis),
                Ok(false) => {
                    debug!("Job already in progress, skipping: {}", job_key);
                    return Ok(JobOutcome::Skipped("already in progress".to_string()));
                }
                Err(e) => warn!("Failed to mark job in progress: {}", e),
            }
        }

        let outcome = self.fetch_compute_upload(job, disposition).await;

        // only the holder of the marker may clear it
        if let Some(redis) = claimed {
            if let Err(e) = redis.delete(&job_key).await {
                warn!("Failed to clear in-progress marker {}: {}", job_key, e);
            }
        }

        outcome
    }

    async fn fetch_compute_upload(&self, job: &SymbolJob, disposition: WriteDisposition) -> Result<JobOutcome> {
        let series = self
            .fetcher
            .fetch(job)
            .await
            .with_context(|| format!("Failed to fetch {}", job))?;

        let table = job.table();
        let from = if self.config.incremental && disposition != WriteDisposition::Truncate {
            self.pg.latest_datetime(&table, &job.symbol).await?
        } else {
            None
        };

        let settings = Arc::clone(&self.settings);
        let (rows, columns) = tokio::task::spawn_blocking(move || enrich(&series, &settings, from))
            .await
            .context("Indicator task panicked")??;

        if rows.is_empty() {
            info!("{} is up to date in {}", job, table);
            return Ok(JobOutcome::Written(0));
        }

        let written = self
            .pg
            .upload(&table, &rows, &columns, disposition)
            .await
            .with_context(|| format!("Failed to upload {} rows to {}", rows.len(), table))?;

        info!("Successfully processed {}: {} rows into {}", job, written, table);
        Ok(JobOutcome::Written(written))
    }
}

/// Loads FRED series into the macro table.
pub struct MacroWorker {
    pg: Arc<PostgresManager>,
    client: FredClient,
    limiter: Arc<RateLimiter>,
    config: WorkerConfig,
}

impl MacroWorker {
    pub fn new(pg: Arc<PostgresManager>, client: FredClient, limiter: Arc<RateLimiter>, config: WorkerConfig) -> Self {
        Self {
            pg,
            client,
            limiter,
            config,
        }
    }

    #[instrument(skip(self, series_ids), fields(series = series_ids.len()))]
    pub async fn run(&self, series_ids: &[String]) -> Result<RunSummary> {
        let started = Instant::now();
        self.pg.init_macro_table().await?;

        let mut summary = RunSummary::default();
        for series_id in series_ids {
            let outcome = self.process_series(series_id).await;
            summary.record(format!("fred:{}", series_id), outcome);
        }

        summary.elapsed = started.elapsed();
        summary.log();
        Ok(summary)
    }

    async fn process_series(&self, series_id: &str) -> Result<JobOutcome> {
        let start = if self.config.incremental {
            self.pg.latest_macro_date(series_id).await?
        } else {
            None
        };

        let client = &self.client;
        let limiter = &self.limiter;
        let fetched = with_retry(
            &format!("FRED {}", series_id),
            self.config.retry_max,
            self.config.retry_delay(),
            move || async move {
                limiter.acquire().await;
                client.fetch_observations(series_id, start).await
            },
        )
        .await;

        let observations = match fetched {
            Ok(observations) => observations,
            Err(PipelineError::NoData { .. }) if start.is_some() => {
                return Ok(JobOutcome::Skipped("no new observations".to_string()))
            }
            Err(e) => return Err(e).with_context(|| format!("Failed to fetch FRED series {}", series_id)),
        };

        let written = self.pg.upsert_macro_observations(&observations).await?;
        info!("Stored {} observations for {}", written, series_id);
        Ok(JobOutcome::Written(written))
    }
}

/// Reload the stored candles of every symbol in `table`, recompute all
/// indicators in parallel and merge them back.
#[instrument(skip(pg, settings))]
pub async fn recompute(pg: &PostgresManager, table: &str, settings: &IndicatorSettings) -> Result<RunSummary> {
    let started = Instant::now();
    let (asset_class, interval) = parse_market_table_name(table).unwrap_or_else(|| {
        debug!("{} does not follow the market table naming, loading as generic series", table);
        (AssetClass::Stock, Interval::Day1)
    });

    // tables that predate the unique index need it before merging
    pg.init_market_table(table).await?;
    let columns = IndicatorCalculator::column_names(settings)?;
    pg.ensure_indicator_columns(table, &columns).await?;

    let symbols = pg.symbols_in(table).await?;
    info!("Recomputing indicators for {} symbols in {}", symbols.len(), table);

    let mut summary = RunSummary::default();
    let mut loaded = Vec::with_capacity(symbols.len());
    for symbol in &symbols {
        match pg.load_series(table, symbol, asset_class, interval).await {
            Ok(series) => loaded.push(series),
            Err(e) => summary.record(symbol.clone(), Err(anyhow::Error::from(e).context("Failed to load series"))),
        }
    }

    let batch_settings = settings.clone();
    let (loaded, frames) = tokio::task::spawn_blocking(move || {
        let frames = IndicatorCalculator::compute_batch(&loaded, &batch_settings);
        (loaded, frames)
    })
    .await
    .context("Indicator batch panicked")?;

    for (series, frame) in loaded.iter().zip(frames) {
        let outcome = match frame {
            Ok(frame) => {
                let rows = enriched_rows(series, &frame, 0);
                pg.upload(table, &rows, frame.names(), WriteDisposition::Merge)
                    .await
                    .map(JobOutcome::Written)
                    .map_err(anyhow::Error::from)
            }
            Err(e) => Err(anyhow::Error::from(e)),
        };
        summary.record(series.symbol.clone(), outcome);
    }

    summary.elapsed = started.elapsed();
    summary.log();
    Ok(summary)
}
