// SQL statement builders for the warehouse tables.
// Every table and column name goes through `validate_identifier` before it is
// interpolated; values are always bound.

use crate::database::models::{AssetClass, Interval};
use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Postgres caps a statement at 65535 bind parameters.
pub const BIND_LIMIT: usize = 65_535;

/// Longest identifier Postgres keeps without truncation.
pub const MAX_IDENTIFIER_LEN: usize = 63;

pub const MACRO_TABLE: &str = "macro_observations";

/// Columns every market table carries ahead of the indicator columns.
pub const BASE_COLUMNS: [&str; 7] = ["symbol", "datetime", "open", "high", "low", "close", "volume"];

/// How an upload treats rows already in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteDisposition {
    /// Insert new keys, leave existing rows untouched
    Append,
    /// Empty the table, then insert
    Truncate,
    /// Stage into a temp table, then upsert by (symbol, datetime)
    Merge,
}

impl fmt::Display for WriteDisposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteDisposition::Append => write!(f, "append"),
            WriteDisposition::Truncate => write!(f, "truncate"),
            WriteDisposition::Merge => write!(f, "merge"),
        }
    }
}

impl FromStr for WriteDisposition {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "append" => Ok(WriteDisposition::Append),
            "truncate" | "replace" => Ok(WriteDisposition::Truncate),
            "merge" | "upsert" => Ok(WriteDisposition::Merge),
            other => Err(PipelineError::InvalidParameter(format!(
                "unknown write disposition {:?}",
                other
            ))),
        }
    }
}

/// Accept only `[a-z_][a-z0-9_]*` up to 63 characters.
pub fn validate_identifier(name: &str) -> Result<&str> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_lowercase() || first == '_')
                && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
                && name.len() <= MAX_IDENTIFIER_LEN
        }
        None => false,
    };
    if valid {
        Ok(name)
    } else {
        Err(PipelineError::InvalidIdentifier(name.to_string()))
    }
}

/// e.g. `stocks_1d`, `forex_1h`
pub fn market_table_name(asset_class: AssetClass, interval: Interval) -> String {
    format!("{}_{}", asset_class.table_stem(), interval.table_suffix())
}

/// Inverse of `market_table_name`.
pub fn parse_market_table_name(table: &str) -> Option<(AssetClass, Interval)> {
    AssetClass::ALL.iter().find_map(|asset_class| {
        Interval::ALL
            .iter()
            .find(|interval| market_table_name(*asset_class, **interval) == table)
            .map(|interval| (*asset_class, *interval))
    })
}

/// Rows per INSERT so that `columns` binds per row stay under the bind limit.
pub fn rows_per_batch(columns: usize, batch_size: usize) -> usize {
    (BIND_LIMIT / columns.max(1)).min(batch_size).max(1)
}

pub fn temp_table_name() -> String {
    format!("tmp_{}", uuid::Uuid::new_v4().simple())
}

pub fn create_market_table_sql(table: &str) -> Result<String> {
    let table = validate_identifier(table)?;
    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            symbol TEXT NOT NULL,
            datetime TIMESTAMPTZ NOT NULL,
            open DOUBLE PRECISION NOT NULL,
            high DOUBLE PRECISION NOT NULL,
            low DOUBLE PRECISION NOT NULL,
            close DOUBLE PRECISION NOT NULL,
            volume DOUBLE PRECISION,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )"
    ))
}

pub fn create_unique_index_sql(table: &str) -> Result<String> {
    let table = validate_identifier(table)?;
    let index = validate_identifier(&format!("idx_{}_symbol_datetime", table))?.to_string();
    Ok(format!(
        "CREATE UNIQUE INDEX IF NOT EXISTS {index} ON {table} (symbol, datetime)"
    ))
}

pub const CREATE_MACRO_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS macro_observations (
    series_id TEXT NOT NULL,
    date DATE NOT NULL,
    value DOUBLE PRECISION NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (series_id, date)
)
"#;

pub fn add_column_sql(table: &str, column: &str) -> Result<String> {
    let table = validate_identifier(table)?;
    let column = validate_identifier(column)?;
    Ok(format!(
        "ALTER TABLE {table} ADD COLUMN IF NOT EXISTS {column} DOUBLE PRECISION"
    ))
}

/// Keeps the physically newest row of each (symbol, datetime) key.
pub fn deduplicate_sql(table: &str) -> Result<String> {
    let table = validate_identifier(table)?;
    Ok(format!(
        "DELETE FROM {table} a USING {table} b
         WHERE a.symbol = b.symbol AND a.datetime = b.datetime AND a.ctid < b.ctid"
    ))
}

pub fn truncate_sql(table: &str) -> Result<String> {
    Ok(format!("TRUNCATE TABLE {}", validate_identifier(table)?))
}

fn column_list(indicator_columns: &[String]) -> Result<String> {
    let mut columns: Vec<&str> = BASE_COLUMNS.to_vec();
    for column in indicator_columns {
        columns.push(validate_identifier(column)?);
    }
    Ok(columns.join(", "))
}

/// `INSERT INTO t (base..., indicators...) ` ready for `push_values`.
pub fn insert_prefix(table: &str, indicator_columns: &[String]) -> Result<String> {
    let table = validate_identifier(table)?;
    Ok(format!("INSERT INTO {} ({}) ", table, column_list(indicator_columns)?))
}

pub const ON_CONFLICT_DO_NOTHING: &str = " ON CONFLICT (symbol, datetime) DO NOTHING";

fn update_set(indicator_columns: &[String]) -> Result<String> {
    let mut assignments: Vec<String> = BASE_COLUMNS[2..]
        .iter()
        .map(|c| format!("{c} = EXCLUDED.{c}"))
        .collect();
    for column in indicator_columns {
        let c = validate_identifier(column)?;
        assignments.push(format!("{c} = EXCLUDED.{c}"));
    }
    Ok(assignments.join(", "))
}

pub fn create_temp_table_sql(temp: &str, table: &str) -> Result<String> {
    let temp = validate_identifier(temp)?;
    let table = validate_identifier(table)?;
    Ok(format!(
        "CREATE TEMP TABLE {temp} (LIKE {table} INCLUDING DEFAULTS) ON COMMIT DROP"
    ))
}

/// Upsert the staged rows of `temp` into `table`, one row per key.
pub fn merge_from_temp_sql(table: &str, temp: &str, indicator_columns: &[String]) -> Result<String> {
    let table = validate_identifier(table)?;
    let temp = validate_identifier(temp)?;
    let columns = column_list(indicator_columns)?;
    Ok(format!(
        "INSERT INTO {table} ({columns})
         SELECT DISTINCT ON (symbol, datetime) {columns} FROM {temp}
         ORDER BY symbol, datetime
         ON CONFLICT (symbol, datetime) DO UPDATE SET {}",
        update_set(indicator_columns)?
    ))
}
