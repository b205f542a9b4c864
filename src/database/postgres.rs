use crate::config::DatabaseConfig;
use crate::database::models::{AssetClass, Candle, CandleSeries, EnrichedRow, Interval, MacroObservation};
use crate::database::schema::{self, WriteDisposition, BASE_COLUMNS, MACRO_TABLE};
use crate::error::Result;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{postgres::PgPoolOptions, PgConnection, PgPool, Postgres, QueryBuilder, Row};
use std::collections::HashSet;
use tracing::{debug, info, instrument};

pub struct PostgresManager {
    pool: PgPool,
    batch_size: usize,
}

impl PostgresManager {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url())
            .await?;

        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool, batch_size: 1000 }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create a market table if needed and make (symbol, datetime) unique.
    /// Tables created before the index get their duplicates removed first.
    #[instrument(skip(self))]
    pub async fn init_market_table(&self, table: &str) -> Result<()> {
        sqlx::query(&schema::create_market_table_sql(table)?)
            .execute(&self.pool)
            .await?;

        let removed = self.deduplicate(table).await?;
        if removed > 0 {
            info!("Removed {} duplicate rows from {} before indexing", removed, table);
        }

        sqlx::query(&schema::create_unique_index_sql(table)?)
            .execute(&self.pool)
            .await?;

        // Check if the extension is available
        let row = sqlx::query("SELECT COUNT(*) FROM pg_extension WHERE extname = 'timescaledb'")
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.try_get(0)?;

        if count > 0 {
            let res = sqlx::query(
                "SELECT create_hypertable($1::regclass, 'datetime', if_not_exists => TRUE, migrate_data => TRUE)",
            )
            .bind(table)
            .execute(&self.pool)
            .await;

            if let Err(e) = res {
                // If it fails because the table is already a hypertable, that's fine
                if !e.to_string().contains("already a hypertable") {
                    return Err(e.into());
                }
            }
        } else {
            debug!("TimescaleDB extension not available, {} stays a plain table", table);
        }

        info!("Table {} initialized", table);
        Ok(())
    }

    /// Create the table and its unique index without the deduplication pass.
    /// Index creation fails on a table that still holds duplicates.
    pub async fn ensure_market_table(&self, table: &str) -> Result<()> {
        sqlx::query(&schema::create_market_table_sql(table)?)
            .execute(&self.pool)
            .await?;
        sqlx::query(&schema::create_unique_index_sql(table)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn init_macro_table(&self) -> Result<()> {
        sqlx::query(schema::CREATE_MACRO_TABLE).execute(&self.pool).await?;
        info!("Table {} initialized", MACRO_TABLE);
        Ok(())
    }

    pub async fn existing_columns(&self, table: &str) -> Result<Vec<String>> {
        let table = schema::validate_identifier(table)?;
        let rows = sqlx::query(
            "SELECT column_name FROM information_schema.columns
             WHERE table_schema = current_schema() AND table_name = $1
             ORDER BY ordinal_position",
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>(0).map_err(Into::into))
            .collect()
    }

    /// Add any of `names` the table lacks. Returns the number of columns added.
    #[instrument(skip(self, names), fields(columns = names.len()))]
    pub async fn ensure_indicator_columns(&self, table: &str, names: &[String]) -> Result<usize> {
        let existing: HashSet<String> = self.existing_columns(table).await?.into_iter().collect();
        let mut added = 0;

        for name in names.iter().filter(|n| !existing.contains(n.as_str())) {
            sqlx::query(&schema::add_column_sql(table, name)?)
                .execute(&self.pool)
                .await?;
            added += 1;
        }

        if added > 0 {
            info!("Added {} indicator columns to {}", added, table);
        }
        Ok(added)
    }

    /// Write `rows` to `table`. `columns` names the indicator values of each row,
    /// in order. Returns the number of rows inserted or updated.
    #[instrument(skip(self, rows, columns), fields(rows = rows.len()))]
    pub async fn upload(
        &self,
        table: &str,
        rows: &[EnrichedRow],
        columns: &[String],
        disposition: WriteDisposition,
    ) -> Result<u64> {
        if rows.is_empty() && disposition != WriteDisposition::Truncate {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let written = match disposition {
            WriteDisposition::Append => {
                self.insert_rows(&mut tx, table, rows, columns, schema::ON_CONFLICT_DO_NOTHING)
                    .await?
            }
            WriteDisposition::Truncate => {
                sqlx::query(&schema::truncate_sql(table)?).execute(&mut *tx).await?;
                self.insert_rows(&mut tx, table, rows, columns, schema::ON_CONFLICT_DO_NOTHING)
                    .await?
            }
            WriteDisposition::Merge => {
                let temp = schema::temp_table_name();
                sqlx::query(&schema::create_temp_table_sql(&temp, table)?)
                    .execute(&mut *tx)
                    .await?;
                self.insert_rows(&mut tx, &temp, rows, columns, "").await?;
                sqlx::query(&schema::merge_from_temp_sql(table, &temp, columns)?)
                    .execute(&mut *tx)
                    .await?
                    .rows_affected()
            }
        };
        tx.commit().await?;

        debug!("Uploaded {} rows to {} ({})", written, table, disposition);
        Ok(written)
    }

    async fn insert_rows(
        &self,
        conn: &mut PgConnection,
        table: &str,
        rows: &[EnrichedRow],
        columns: &[String],
        suffix: &str,
    ) -> Result<u64> {
        let prefix = schema::insert_prefix(table, columns)?;
        let per_batch = schema::rows_per_batch(BASE_COLUMNS.len() + columns.len(), self.batch_size);
        let mut written = 0;

        for chunk in rows.chunks(per_batch) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(prefix.as_str());
            builder.push_values(chunk, |mut b, row| {
                b.push_bind(row.symbol.clone())
                    .push_bind(row.datetime)
                    .push_bind(row.open)
                    .push_bind(row.high)
                    .push_bind(row.low)
                    .push_bind(row.close)
                    .push_bind(row.volume);
                for value in &row.indicators {
                    b.push_bind(*value);
                }
            });
            builder.push(suffix);

            written += builder.build().execute(&mut *conn).await?.rows_affected();
        }

        Ok(written)
    }

    pub async fn latest_datetime(&self, table: &str, symbol: &str) -> Result<Option<DateTime<Utc>>> {
        let table = schema::validate_identifier(table)?;
        let row = sqlx::query(&format!("SELECT MAX(datetime) FROM {} WHERE symbol = $1", table))
            .bind(symbol)
            .fetch_one(&self.pool)
            .await?;

        Ok(row.try_get(0)?)
    }

    /// Stored OHLCV bars for one symbol, ascending.
    pub async fn load_series(
        &self,
        table: &str,
        symbol: &str,
        asset_class: AssetClass,
        interval: Interval,
    ) -> Result<CandleSeries> {
        let table = schema::validate_identifier(table)?;
        let rows = sqlx::query(&format!(
            "SELECT datetime, open, high, low, close, volume FROM {} WHERE symbol = $1 ORDER BY datetime ASC",
            table
        ))
        .bind(symbol)
        .fetch_all(&self.pool)
        .await?;

        let candles = rows
            .iter()
            .map(|row| {
                Ok(Candle {
                    datetime: row.try_get("datetime")?,
                    open: row.try_get("open")?,
                    high: row.try_get("high")?,
                    low: row.try_get("low")?,
                    close: row.try_get("close")?,
                    volume: row.try_get("volume")?,
                })
            })
            .collect::<std::result::Result<Vec<_>, sqlx::Error>>()?;

        Ok(CandleSeries::from_candles(symbol.to_string(), asset_class, interval, candles))
    }

    pub async fn symbols_in(&self, table: &str) -> Result<Vec<String>> {
        let table = schema::validate_identifier(table)?;
        let rows = sqlx::query(&format!("SELECT DISTINCT symbol FROM {} ORDER BY symbol", table))
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>(0).map_err(Into::into))
            .collect()
    }

    /// Remove duplicate (symbol, datetime) rows. Returns the number removed.
    pub async fn deduplicate(&self, table: &str) -> Result<u64> {
        let result = sqlx::query(&schema::deduplicate_sql(table)?)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn latest_macro_date(&self, series_id: &str) -> Result<Option<NaiveDate>> {
        let row = sqlx::query("SELECT MAX(date) FROM macro_observations WHERE series_id = $1")
            .bind(series_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get(0)?)
    }

    pub async fn upsert_macro_observations(&self, observations: &[MacroObservation]) -> Result<u64> {
        if observations.is_empty() {
            return Ok(0);
        }

        let per_batch = schema::rows_per_batch(3, self.batch_size);
        let mut tx = self.pool.begin().await?;
        let mut written = 0;

        for chunk in observations.chunks(per_batch) {
            let mut builder: QueryBuilder<Postgres> =
                QueryBuilder::new("INSERT INTO macro_observations (series_id, date, value) ");
            builder.push_values(chunk, |mut b, obs| {
                b.push_bind(obs.series_id.clone())
                    .push_bind(obs.date)
                    .push_bind(obs.value);
            });
            builder.push(
                " ON CONFLICT (series_id, date) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()",
            );
            written += builder.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(written)
    }
}
