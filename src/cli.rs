// src/cli.rs
use crate::cache::redis::RedisManager;
use crate::config::AppConfig;
use crate::database::models::{AssetClass, Interval};
use crate::database::postgres::PostgresManager;
use crate::database::schema::{market_table_name, WriteDisposition};
use crate::fetchers::{self, RateLimiter};
use crate::indicators::calculator::IndicatorCalculator;
use crate::processor::job::SymbolJob;
use crate::processor::worker::{enrich, recompute, MacroWorker, RunSummary, SeriesFetcher, Worker, WorkerConfig};
use crate::utils::{format_time, format_value, truncate_string};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Indicator columns shown by `fetch` when none are requested.
const DEFAULT_FETCH_COLUMNS: [&str; 6] = ["rsi_14", "macd", "bb_percent_b", "adx_14", "vp_poc", "elliott_wave"];

#[derive(Parser)]
#[command(name = "market-data-pipeline")]
#[command(about = "Fetch market data, compute technical indicators and load them into the warehouse", long_about = None)]
pub struct Cli {
    /// Config file (defaults to ./pipeline.toml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the market tables and the macro table
    InitDb {
        /// Intervals to create tables for (e.g. "1day,1h")
        #[arg(short, long, value_delimiter = ',', default_value = "1day")]
        intervals: Vec<Interval>,
    },

    /// Fetch, enrich and upload every symbol of an asset class
    Run {
        /// Asset class (stock, crypto, forex, etf, commodity)
        #[arg(short, long)]
        asset_class: AssetClass,

        /// Interval (e.g. "1h", "1day")
        #[arg(short, long, default_value = "1day")]
        interval: Interval,

        /// Symbols to process instead of the configured universe
        #[arg(short, long, value_delimiter = ',')]
        symbols: Vec<String>,

        /// Write disposition (append, truncate, merge)
        #[arg(short, long, default_value = "merge")]
        disposition: WriteDisposition,

        /// Bars requested per symbol
        #[arg(long)]
        output_size: Option<usize>,

        /// Upload every fetched bar, not only the new ones
        #[arg(long)]
        full: bool,
    },

    /// Fetch one symbol and print its last enriched rows without touching the database
    Fetch {
        /// Symbol (e.g. "AAPL", "EUR/USD")
        symbol: String,

        #[arg(short, long, default_value = "stock")]
        asset_class: AssetClass,

        #[arg(short, long, default_value = "1day")]
        interval: Interval,

        /// Number of rows to print
        #[arg(short = 'n', long, default_value = "5")]
        rows: usize,

        /// Indicator columns to print
        #[arg(long, value_delimiter = ',')]
        columns: Vec<String>,
    },

    /// Load FRED series into the macro table
    Macro {
        /// Series ids instead of the configured ones (e.g. "GDP,UNRATE")
        #[arg(short, long, value_delimiter = ',')]
        series: Vec<String>,
    },

    /// Recompute indicators for every symbol stored in a table
    Recompute {
        /// Table name (e.g. "stocks_1d")
        table: String,
    },

    /// Remove duplicate (symbol, datetime) rows from a table
    Dedupe {
        table: String,
    },

    /// List the indicator columns produced with the current settings
    Columns,
}

async fn connect_postgres(config: &AppConfig) -> Result<Arc<PostgresManager>> {
    let pg = PostgresManager::new(&config.database)
        .await
        .context("Failed to connect to PostgreSQL")?
        .with_batch_size(config.pipeline.batch_size);
    Ok(Arc::new(pg))
}

async fn connect_redis(config: &AppConfig) -> Option<Arc<RedisManager>> {
    RedisManager::connect_optional(&config.redis).await.map(Arc::new)
}

fn series_fetcher(config: &AppConfig, redis: Option<Arc<RedisManager>>) -> Result<SeriesFetcher> {
    let source = fetchers::market_source(&config.providers)?;
    let limiter = Arc::new(RateLimiter::from_millis(config.pipeline.request_delay_ms));
    Ok(SeriesFetcher::new(source, limiter, redis, WorkerConfig::from_app_config(config)))
}

fn finish(summary: RunSummary) -> Result<()> {
    println!("{}", summary);
    for (label, reason) in &summary.failed {
        println!("  FAILED {}: {}", label, reason);
    }
    if summary.total() > 0 && summary.failed.len() == summary.total() {
        bail!("every job failed");
    }
    Ok(())
}

/// Execute a command from the CLI
pub async fn execute_command(cli: Cli) -> Result<()> {
    let mut config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::InitDb { intervals } => {
            let pg = connect_postgres(&config).await?;
            for interval in intervals {
                for asset_class in AssetClass::ALL {
                    pg.init_market_table(&market_table_name(asset_class, interval)).await?;
                }
            }
            pg.init_macro_table().await?;
            println!("Database tables initialized.");
        }

        Commands::Run {
            asset_class,
            interval,
            symbols,
            disposition,
            output_size,
            full,
        } => {
            if full {
                config.pipeline.incremental = false;
            }
            let output_size = output_size.unwrap_or(config.pipeline.output_size);
            let symbols = if symbols.is_empty() {
                config.universe.symbols(asset_class).to_vec()
            } else {
                symbols
            };
            if symbols.is_empty() {
                bail!("No symbols configured for {}", asset_class);
            }

            let pg = connect_postgres(&config).await?;
            let redis = connect_redis(&config).await;
            let fetcher = series_fetcher(&config, redis.clone())?;
            let worker = Worker::new(
                pg,
                redis,
                fetcher,
                config.indicators.clone(),
                WorkerConfig::from_app_config(&config),
            );

            let jobs = SymbolJob::for_symbols(&symbols, asset_class, interval, output_size);
            info!("Processing {} {} symbols at {}", jobs.len(), asset_class, interval);
            finish(worker.run(jobs, disposition).await?)?;
        }

        Commands::Fetch {
            symbol,
            asset_class,
            interval,
            rows,
            columns,
        } => {
            let redis = connect_redis(&config).await;
            let fetcher = series_fetcher(&config, redis)?;
            let job = SymbolJob::new(symbol, asset_class, interval, config.pipeline.output_size);

            let series = fetcher.fetch(&job).await?;
            let (enriched, names) = enrich(&series, &config.indicators, None)?;

            let wanted: Vec<String> = if columns.is_empty() {
                DEFAULT_FETCH_COLUMNS.iter().map(|c| c.to_string()).collect()
            } else {
                columns
            };
            let mut selected = Vec::with_capacity(wanted.len());
            for name in &wanted {
                match names.iter().position(|n| n == name) {
                    Some(index) => selected.push((name.as_str(), index)),
                    None => bail!("Unknown indicator column {:?} (see `columns`)", name),
                }
            }

            println!("{} {} via {}: {} bars", job.symbol, interval, fetcher.provider(), series.len());
            print!("{:<20} {:>12}", "datetime", "close");
            for (name, _) in &selected {
                print!(" {:>12}", truncate_string(name, 12));
            }
            println!();

            let start = enriched.len().saturating_sub(rows);
            for row in &enriched[start..] {
                print!("{:<20} {:>12}", format_time(&row.datetime), format_value(Some(row.close), 4));
                for (_, index) in &selected {
                    print!(" {:>12}", format_value(row.indicators[*index], 4));
                }
                println!();
            }
        }

        Commands::Macro { series } => {
            let series = if series.is_empty() {
                config.universe.fred_series.clone()
            } else {
                series
            };
            let pg = connect_postgres(&config).await?;
            let client = fetchers::fred_client(&config.providers)?;
            let limiter = Arc::new(RateLimiter::from_millis(config.pipeline.request_delay_ms));
            let worker = MacroWorker::new(pg, client, limiter, WorkerConfig::from_app_config(&config));
            finish(worker.run(&series).await?)?;
        }

        Commands::Recompute { table } => {
            let pg = connect_postgres(&config).await?;
            finish(recompute(&pg, &table, &config.indicators).await?)?;
        }

        Commands::Dedupe { table } => {
            let pg = connect_postgres(&config).await?;
            let removed = pg.deduplicate(&table).await?;
            println!("Removed {} duplicate rows from {}.", removed, table);
        }

        Commands::Columns => {
            let names = IndicatorCalculator::column_names(&config.indicators)?;
            println!("{} indicator columns:", names.len());
            for name in names {
                println!("  {}", name);
            }
        }
    }

    Ok(())
}
