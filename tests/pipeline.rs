use chrono::{Duration, TimeZone, Utc};
use market_data_pipeline::cache::RedisManager;
use market_data_pipeline::config::{DatabaseConfig, RedisConfig};
use market_data_pipeline::database::models::{AssetClass, Candle, CandleSeries, Interval};
use market_data_pipeline::database::schema::{create_market_table_sql, market_table_name};
use market_data_pipeline::database::{PostgresManager, WriteDisposition};
use market_data_pipeline::fetchers::{FredClient, RateLimiter, TwelveDataClient};
use market_data_pipeline::indicators::{IndicatorCalculator, IndicatorSettings};
use market_data_pipeline::processor::{enrich, recompute, MacroWorker, SeriesFetcher, SymbolJob, Worker, WorkerConfig};
use mockito::Matcher;
use std::sync::Arc;

fn synthetic_series(symbol: &str, bars: usize, with_volume: bool) -> CandleSeries {
    let start = Utc.with_ymd_and_hms(2023, 1, 2, 0, 0, 0).unwrap();
    let candles = (0..bars)
        .map(|i| {
            let x = i as f64;
            let close = 100.0 + x * 0.1 + (x / 5.0).sin() * 3.0;
            Candle {
                datetime: start + Duration::days(i as i64),
                open: close - 0.4,
                high: close + 1.2,
                low: close - 1.3,
                close,
                volume: with_volume.then(|| 10_000.0 + (x * 37.0) % 900.0),
            }
        })
        .collect();
    CandleSeries::from_candles(symbol.to_string(), AssetClass::Stock, Interval::Day1, candles)
}

#[test]
fn enrich_produces_aligned_rows() {
    let series = synthetic_series("TEST", 260, true);
    let settings = IndicatorSettings::default();
    let (rows, names) = enrich(&series, &settings, None).unwrap();

    assert_eq!(rows.len(), 260);
    assert_eq!(names, IndicatorCalculator::column_names(&settings).unwrap());
    assert!(rows.iter().all(|r| r.indicators.len() == names.len()));

    let col = |name: &str| names.iter().position(|n| n == name).unwrap();
    let last = rows.last().unwrap();

    let expected_sma: f64 = series.close[240..].iter().sum::<f64>() / 20.0;
    let sma = last.indicators[col("sma_20")].unwrap();
    assert!((sma - expected_sma).abs() < 1e-9);

    // warm-up bars are NULL, not zero
    assert!(rows[5].indicators[col("sma_20")].is_none());
    assert!(rows[100].indicators[col("sma_200")].is_none());
    assert!(last.indicators[col("sma_200")].is_some());

    for row in &rows {
        if let Some(rsi) = row.indicators[col("rsi_14")] {
            assert!((0.0..=100.0).contains(&rsi));
        }
        if let (Some(upper), Some(lower)) = (row.indicators[col("bb_upper")], row.indicators[col("bb_lower")]) {
            assert!(upper >= lower);
        }
    }
    assert!(last.indicators[col("obv")].is_some());
}

#[test]
fn enrich_from_watermark_keeps_full_history_for_windows() {
    let series = synthetic_series("TEST", 260, true);
    let settings = IndicatorSettings::default();
    let watermark = series.datetime[250];

    let (full, _) = enrich(&series, &settings, None).unwrap();
    let (tail, _) = enrich(&series, &settings, Some(watermark)).unwrap();

    assert_eq!(tail.len(), 10);
    assert_eq!(tail[0].datetime, watermark);
    assert_eq!(tail[0], full[250]);
}

#[test]
fn series_without_volume_leaves_volume_indicators_null() {
    let series = synthetic_series("EURUSD", 120, false);
    let settings = IndicatorSettings::default();
    let (rows, names) = enrich(&series, &settings, None).unwrap();

    let vwap = names.iter().position(|n| n == "vwap").unwrap();
    let atr = names.iter().position(|n| n == "atr_14").unwrap();
    assert!(rows.iter().all(|r| r.indicators[vwap].is_none()));
    assert!(rows.last().unwrap().indicators[atr].is_some());
}

#[test]
fn batch_matches_single_computation() {
    let settings = IndicatorSettings::default();
    let batch = vec![synthetic_series("A", 80, true), synthetic_series("B", 40, false)];
    let frames = IndicatorCalculator::compute_batch(&batch, &settings);

    assert_eq!(frames.len(), 2);
    for (series, frame) in batch.iter().zip(frames) {
        let frame = frame.unwrap();
        let single = IndicatorCalculator::compute_all(series, &settings).unwrap();
        assert_eq!(frame.names(), single.names());
        for i in 0..series.len() {
            assert_eq!(frame.row(i), single.row(i));
        }
    }
}

async fn test_database() -> Option<PostgresManager> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let config = DatabaseConfig {
        url: Some(url),
        ..DatabaseConfig::default()
    };
    Some(PostgresManager::new(&config).await.unwrap().with_batch_size(25))
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn upload_dispositions_round_trip() {
    let Some(pg) = test_database().await else { return };
    let table = format!("stocks_it_{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
    let settings = IndicatorSettings::default();
    let series = synthetic_series("TEST", 90, true);
    let (rows, names) = enrich(&series, &settings, None).unwrap();

    pg.ensure_market_table(&table).await.unwrap();
    assert_eq!(pg.ensure_indicator_columns(&table, &names).await.unwrap(), names.len());
    assert_eq!(pg.ensure_indicator_columns(&table, &names).await.unwrap(), 0);

    let written = pg.upload(&table, &rows, &names, WriteDisposition::Append).await.unwrap();
    assert_eq!(written, 90);
    let again = pg.upload(&table, &rows[80..], &names, WriteDisposition::Append).await.unwrap();
    assert_eq!(again, 0);

    let mut changed = rows[89].clone();
    changed.close += 1.0;
    let merged = pg.upload(&table, &[changed.clone()], &names, WriteDisposition::Merge).await.unwrap();
    assert_eq!(merged, 1);
    let stored = pg.load_series(&table, "TEST", AssetClass::Stock, Interval::Day1).await.unwrap();
    assert_eq!(stored.len(), 90);
    assert_eq!(stored.close[89], changed.close);
    assert_eq!(pg.latest_datetime(&table, "TEST").await.unwrap(), Some(changed.datetime));

    let replaced = pg.upload(&table, &rows[..10], &names, WriteDisposition::Truncate).await.unwrap();
    assert_eq!(replaced, 10);
    assert_eq!(pg.symbols_in(&table).await.unwrap(), vec!["TEST".to_string()]);

    sqlx::query(&format!("DROP TABLE {}", table)).execute(pg.pool()).await.unwrap();
}

fn worker_config() -> WorkerConfig {
    WorkerConfig {
        retry_max: 0,
        retry_delay_ms: 1,
        concurrency: 2,
        ..WorkerConfig::default()
    }
}

/// A TwelveData `/time_series` payload of `bars` daily candles, newest first.
fn time_series_body(bars: usize) -> String {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let values: Vec<String> = (0..bars)
        .rev()
        .map(|i| {
            let close = 50.0 + (i as f64 / 3.0).sin() * 2.0 + i as f64 * 0.05;
            format!(
                r#"{{"datetime":"{}","open":"{:.4}","high":"{:.4}","low":"{:.4}","close":"{:.4}","volume":"{}"}}"#,
                (start + Duration::days(i as i64)).format("%Y-%m-%d"),
                close - 0.2,
                close + 0.8,
                close - 0.9,
                close,
                5_000 + i * 10
            )
        })
        .collect();
    format!(r#"{{"values":[{}],"status":"ok"}}"#, values.join(","))
}

async fn mock_symbol(server: &mut mockito::ServerGuard, symbol: &str, status: usize, body: String) -> mockito::Mock {
    server
        .mock("GET", "/time_series")
        .match_query(Matcher::UrlEncoded("symbol".into(), symbol.into()))
        .with_status(status)
        .with_body(body)
        .create_async()
        .await
}

fn test_worker(pg: Arc<PostgresManager>, redis: Option<Arc<RedisManager>>, url: &str, config: WorkerConfig) -> Worker {
    let source = Arc::new(TwelveDataClient::new("test-key", std::time::Duration::from_secs(5)).unwrap().with_base_url(url));
    let fetcher = SeriesFetcher::new(source, Arc::new(RateLimiter::from_millis(0)), redis.clone(), config.clone());
    Worker::new(pg, redis, fetcher, IndicatorSettings::default(), config)
}

async fn reset_table(pg: &PostgresManager, table: &str) {
    sqlx::query(&format!("DROP TABLE IF EXISTS {}", table))
        .execute(pg.pool())
        .await
        .unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn run_isolates_failing_symbols() {
    let Some(pg) = test_database().await else { return };
    let pg = Arc::new(pg);
    let table = market_table_name(AssetClass::Etf, Interval::Month1);
    reset_table(&pg, &table).await;

    let mut server = mockito::Server::new_async().await;
    let _good = mock_symbol(&mut server, "GOOD", 200, time_series_body(40)).await;
    let _bad = mock_symbol(&mut server, "BAD", 500, "upstream down".to_string()).await;

    let worker = test_worker(Arc::clone(&pg), None, &server.url(), worker_config());
    let jobs = SymbolJob::for_symbols(&["GOOD".to_string(), "BAD".to_string()], AssetClass::Etf, Interval::Month1, 40);
    let summary = worker.run(jobs, WriteDisposition::Merge).await.unwrap();

    assert_eq!(summary.succeeded.len(), 1);
    assert_eq!(summary.failed.len(), 1);
    assert!(summary.failed[0].0.contains("BAD"));
    assert_eq!(summary.rows_written, 40);
    assert_eq!(pg.symbols_in(&table).await.unwrap(), vec!["GOOD".to_string()]);

    reset_table(&pg, &table).await;
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn incremental_run_uploads_only_new_bars() {
    let Some(pg) = test_database().await else { return };
    let pg = Arc::new(pg);
    let table = market_table_name(AssetClass::Commodity, Interval::Week1);
    reset_table(&pg, &table).await;

    let mut server = mockito::Server::new_async().await;
    let first = mock_symbol(&mut server, "GOLD", 200, time_series_body(30)).await;
    let worker = test_worker(Arc::clone(&pg), None, &server.url(), worker_config());
    let job = || vec![SymbolJob::new("GOLD", AssetClass::Commodity, Interval::Week1, 31)];

    let summary = worker.run(job(), WriteDisposition::Append).await.unwrap();
    assert_eq!(summary.rows_written, 30);

    first.remove_async().await;
    let _second = mock_symbol(&mut server, "GOLD", 200, time_series_body(31)).await;

    // the re-sent last stored bar conflicts and is ignored; only the new one lands
    let summary = worker.run(job(), WriteDisposition::Append).await.unwrap();
    assert_eq!(summary.rows_written, 1);
    let stored = pg.load_series(&table, "GOLD", AssetClass::Commodity, Interval::Week1).await.unwrap();
    assert_eq!(stored.len(), 31);

    reset_table(&pg, &table).await;
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn truncate_empties_table_once_then_appends_each_symbol() {
    let Some(pg) = test_database().await else { return };
    let pg = Arc::new(pg);
    let table = market_table_name(AssetClass::Forex, Interval::Week1);
    reset_table(&pg, &table).await;

    let mut server = mockito::Server::new_async().await;
    let _old = mock_symbol(&mut server, "OLD", 200, time_series_body(10)).await;
    let _a = mock_symbol(&mut server, "AAA", 200, time_series_body(12)).await;
    let _b = mock_symbol(&mut server, "BBB", 200, time_series_body(12)).await;
    let worker = test_worker(Arc::clone(&pg), None, &server.url(), worker_config());

    let seed = vec![SymbolJob::new("OLD", AssetClass::Forex, Interval::Week1, 10)];
    worker.run(seed, WriteDisposition::Append).await.unwrap();

    let jobs = SymbolJob::for_symbols(&["AAA".to_string(), "BBB".to_string()], AssetClass::Forex, Interval::Week1, 12);
    let summary = worker.run(jobs, WriteDisposition::Truncate).await.unwrap();

    assert_eq!(summary.succeeded.len(), 2);
    assert_eq!(summary.rows_written, 24);
    assert_eq!(pg.symbols_in(&table).await.unwrap(), vec!["AAA".to_string(), "BBB".to_string()]);

    reset_table(&pg, &table).await;
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn recompute_indexes_legacy_tables_before_merging() {
    let Some(pg) = test_database().await else { return };
    let table = market_table_name(AssetClass::Crypto, Interval::Hour4);
    reset_table(&pg, &table).await;

    // a table from before the unique index, holding a duplicate bar
    sqlx::query(&create_market_table_sql(&table).unwrap())
        .execute(pg.pool())
        .await
        .unwrap();
    let series = synthetic_series("LEGACY", 30, true);
    for i in (0..30).chain(std::iter::once(29)) {
        sqlx::query(&format!(
            "INSERT INTO {} (symbol, datetime, open, high, low, close, volume) VALUES ($1, $2, $3, $4, $5, $6, $7)",
            table
        ))
        .bind("LEGACY")
        .bind(series.datetime[i])
        .bind(series.open[i])
        .bind(series.high[i])
        .bind(series.low[i])
        .bind(series.close[i])
        .bind(series.volume[i])
        .execute(pg.pool())
        .await
        .unwrap();
    }

    let summary = recompute(&pg, &table, &IndicatorSettings::default()).await.unwrap();

    assert_eq!(summary.succeeded, vec!["LEGACY".to_string()]);
    assert!(summary.failed.is_empty());
    let stored = pg.load_series(&table, "LEGACY", AssetClass::Crypto, Interval::Hour4).await.unwrap();
    assert_eq!(stored.len(), 30);
    let (sma,): (Option<f64>,) = sqlx::query_as(&format!(
        "SELECT sma_20 FROM {} WHERE symbol = 'LEGACY' ORDER BY datetime DESC LIMIT 1",
        table
    ))
    .fetch_one(pg.pool())
    .await
    .unwrap();
    assert!(sma.is_some());

    reset_table(&pg, &table).await;
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn macro_run_skips_series_without_new_observations() {
    let Some(pg) = test_database().await else { return };
    let pg = Arc::new(pg);
    let series_id = format!("IT{}", &uuid::Uuid::new_v4().simple().to_string()[..8].to_uppercase());

    let mut server = mockito::Server::new_async().await;
    let first = server
        .mock("GET", "/fred/series/observations")
        .match_query(Matcher::UrlEncoded("series_id".into(), series_id.clone()))
        .with_status(200)
        .with_body(r#"{"observations":[{"date":"2024-01-01","value":"1.5"},{"date":"2024-02-01","value":"1.6"}]}"#)
        .create_async()
        .await;

    let client = FredClient::new("fred-key", std::time::Duration::from_secs(5))
        .unwrap()
        .with_base_url(&server.url());
    let worker = MacroWorker::new(Arc::clone(&pg), client, Arc::new(RateLimiter::from_millis(0)), worker_config());

    let summary = worker.run(&[series_id.clone()]).await.unwrap();
    assert_eq!(summary.rows_written, 2);

    first.remove_async().await;
    let _empty = server
        .mock("GET", "/fred/series/observations")
        .match_query(Matcher::UrlEncoded("observation_start".into(), "2024-02-01".into()))
        .with_status(200)
        .with_body(r#"{"observations":[]}"#)
        .create_async()
        .await;

    let summary = worker.run(&[series_id.clone()]).await.unwrap();
    assert_eq!(summary.skipped.len(), 1);
    assert!(summary.failed.is_empty());

    sqlx::query("DELETE FROM macro_observations WHERE series_id = $1")
        .bind(&series_id)
        .execute(pg.pool())
        .await
        .unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL and REDIS_URL"]
async fn run_leaves_markers_it_does_not_hold() {
    let Some(pg) = test_database().await else { return };
    let Ok(redis_url) = std::env::var("REDIS_URL") else { return };
    let redis_config = RedisConfig {
        url: redis_url,
        ..RedisConfig::default()
    };
    let redis = Arc::new(RedisManager::connect_optional(&redis_config).await.unwrap());

    let symbol = format!("HELD{}", &uuid::Uuid::new_v4().simple().to_string()[..6].to_uppercase());
    let job = SymbolJob::new(symbol.as_str(), AssetClass::Stock, Interval::Month1, 20);
    let marker = RedisManager::in_progress_key(&job.cache_key());
    assert!(redis.claim(&marker, std::time::Duration::from_secs(60)).await.unwrap());

    let mut server = mockito::Server::new_async().await;
    let untouched = server
        .mock("GET", "/time_series")
        .match_query(Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let worker = test_worker(Arc::new(pg), Some(Arc::clone(&redis)), &server.url(), worker_config());
    let summary = worker.run(vec![job], WriteDisposition::Merge).await.unwrap();

    assert_eq!(summary.skipped.len(), 1);
    untouched.assert_async().await;
    assert!(redis.exists(&marker).await.unwrap());

    redis.delete(&marker).await.unwrap();
}
