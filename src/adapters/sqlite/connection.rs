//! SQLite pool creation and shared SQL helpers

use crate::domain::{DeidError, Result};
use serde_json::Value;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteRow,
};
use sqlx::{Column, Row, Sqlite};
use std::str::FromStr;
use std::time::Duration;

/// Pool sizing shared by sources and the control store
#[derive(Debug, Clone, Copy)]
pub struct SqlitePoolSettings {
    /// Maximum open connections
    pub max_connections: u32,
    /// How long `acquire` may wait
    pub acquire_timeout: Duration,
    /// Idle connections are closed after this long
    pub idle_timeout: Duration,
}

/// Opens a pool over an existing database file
///
/// # Errors
///
/// Returns `Connection` if the file does not exist or cannot be opened.
pub async fn open_file_pool(path: &str, settings: SqlitePoolSettings) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(false)
        .journal_mode(SqliteJournalMode::Wal);

    connect(options, settings, false)
        .await
        .map_err(|e| DeidError::Connection(format!("Failed to open SQLite database '{path}': {e}")))
}

/// Opens a pool from a `sqlite:` URL, creating the file if needed
///
/// In-memory URLs get a single connection that is never recycled, otherwise
/// every connection would see its own empty database.
///
/// # Errors
///
/// Returns `Configuration` for a malformed URL and `Connection` if the database
/// cannot be opened.
pub async fn open_url_pool(url: &str, settings: SqlitePoolSettings) -> Result<SqlitePool> {
    let in_memory = url.contains(":memory:") || url.contains("mode=memory");

    let mut options = SqliteConnectOptions::from_str(url)
        .map_err(|e| DeidError::Configuration(format!("Invalid SQLite URL: {e}")))?
        .create_if_missing(true);
    if !in_memory {
        options = options.journal_mode(SqliteJournalMode::Wal);
    }

    connect(options, settings, in_memory)
        .await
        .map_err(|e| DeidError::Connection(format!("Failed to open SQLite control store: {e}")))
}

async fn connect(
    options: SqliteConnectOptions,
    settings: SqlitePoolSettings,
    in_memory: bool,
) -> std::result::Result<SqlitePool, sqlx::Error> {
    let mut pool = SqlitePoolOptions::new().acquire_timeout(settings.acquire_timeout);

    pool = if in_memory {
        pool.max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        pool.max_connections(settings.max_connections.max(1))
            .idle_timeout(settings.idle_timeout)
    };

    pool.connect_with(options).await
}

/// Double-quotes an identifier, doubling embedded quotes
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub(crate) type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// Binds a JSON value using the closest SQLite storage class
pub(crate) fn bind_json<'q>(query: SqliteQuery<'q>, value: &Value) -> SqliteQuery<'q> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                query.bind(i)
            } else if let Some(f) = n.as_f64() {
                query.bind(f)
            } else {
                query.bind(n.to_string())
            }
        }
        Value::String(s) => query.bind(s.clone()),
        other => query.bind(other.to_string()),
    }
}

/// Converts a row into a column → value map
pub(crate) fn row_to_record(row: &SqliteRow) -> serde_json::Map<String, Value> {
    let mut record = serde_json::Map::new();
    for column in row.columns() {
        let name = column.name();
        record.insert(name.to_string(), extract_column_value(row, name));
    }
    record
}

/// Extracts a column value, trying storage classes in order of likelihood
fn extract_column_value(row: &SqliteRow, column_name: &str) -> Value {
    if let Ok(v) = row.try_get::<Option<String>, _>(column_name) {
        return v.map(Value::String).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<i64>, _>(column_name) {
        return v.map(|n| Value::Number(n.into())).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(column_name) {
        return v
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(column_name) {
        return v.map(Value::Bool).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(column_name) {
        return v
            .map(|bytes| {
                use base64::Engine;
                let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
                Value::String(format!("base64:{encoded}"))
            })
            .unwrap_or(Value::Null);
    }

    Value::Null
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("patients"), "\"patients\"");
        assert_eq!(quote_identifier("we\"ird"), "\"we\"\"ird\"");
    }

    #[tokio::test]
    async fn test_missing_file_is_connection_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.db");
        let settings = SqlitePoolSettings {
            max_connections: 1,
            acquire_timeout: Duration::from_secs(2),
            idle_timeout: Duration::from_secs(60),
        };

        let err = open_file_pool(path.to_str().unwrap(), settings)
            .await
            .unwrap_err();
        assert!(matches!(err, DeidError::Connection(_)));
    }

    #[tokio::test]
    async fn test_row_to_record_extracts_storage_classes() {
        let settings = SqlitePoolSettings {
            max_connections: 1,
            acquire_timeout: Duration::from_secs(2),
            idle_timeout: Duration::from_secs(60),
        };
        let pool = open_url_pool("sqlite::memory:", settings).await.unwrap();

        let row = sqlx::query("SELECT 'A1' AS s, 42 AS i, 1.5 AS f, NULL AS n")
            .fetch_one(&pool)
            .await
            .unwrap();
        let record = row_to_record(&row);

        assert_eq!(record["s"], Value::String("A1".into()));
        assert_eq!(record["i"], serde_json::json!(42));
        assert_eq!(record["f"], serde_json::json!(1.5));
        assert_eq!(record["n"], Value::Null);
    }
}
