//! SQLite source backend

use super::connection::{
    bind_json, open_file_pool, quote_identifier, row_to_record, SqlitePoolSettings,
};
use super::type_mapping::map_sqlite_type;
use crate::adapters::database::traits::{
    BatchQuery, BatchWriteResult, Record, SourceBackend, WriteMode, WriteOp, WriteTarget,
};
use crate::domain::{BackendKind, ColumnDescriptor, ColumnType, DeidError, Result};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;

/// Name the rowid is projected under when it serves as the batch key
pub const ROW_LOCATOR_COLUMN: &str = "source_rowid";

/// Expression addressing the key column in a WHERE clause
fn key_expr(key_column: &ColumnDescriptor) -> String {
    if key_column.row_locator {
        "rowid".to_string()
    } else {
        quote_identifier(&key_column.name)
    }
}

/// Source backend over a SQLite database file
pub struct SqliteSource {
    pool: SqlitePool,
    path: String,
}

impl SqliteSource {
    /// Opens the database file; it must already exist
    ///
    /// # Errors
    ///
    /// Returns `Connection` if the file cannot be opened.
    pub async fn open(path: &str, settings: SqlitePoolSettings) -> Result<Self> {
        let pool = open_file_pool(path, settings).await?;
        tracing::debug!(path = %path, "Opened SQLite source");
        Ok(Self {
            pool,
            path: path.to_string(),
        })
    }

    /// Wraps an existing pool
    pub fn from_pool(pool: SqlitePool, path: impl Into<String>) -> Self {
        Self {
            pool,
            path: path.into(),
        }
    }

    fn upsert_sql(target: &WriteTarget) -> String {
        let columns: Vec<String> = target
            .columns
            .iter()
            .map(|c| quote_identifier(&c.name))
            .collect();
        let placeholders = vec!["?"; columns.len()].join(", ");
        let key = quote_identifier(&target.key_column.name);

        let updates: Vec<String> = target
            .columns
            .iter()
            .filter(|c| c.name != target.key_column.name)
            .map(|c| {
                let q = quote_identifier(&c.name);
                format!("{q} = excluded.{q}")
            })
            .collect();

        let conflict = if updates.is_empty() {
            "DO NOTHING".to_string()
        } else {
            format!("DO UPDATE SET {}", updates.join(", "))
        };

        format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) {}",
            quote_identifier(&target.table),
            columns.join(", "),
            placeholders,
            key,
            conflict
        )
    }

    fn update_sql(target: &WriteTarget) -> String {
        let sets: Vec<String> = target
            .columns
            .iter()
            .filter(|c| c.name != target.key_column.name)
            .map(|c| format!("{} = ?", quote_identifier(&c.name)))
            .collect();

        format!(
            "UPDATE {} SET {} WHERE {} = ?",
            quote_identifier(&target.table),
            sets.join(", "),
            key_expr(&target.key_column)
        )
    }

    fn create_sql(target: &WriteTarget) -> String {
        let columns: Vec<String> = target
            .columns
            .iter()
            .map(|c| {
                let mut def = quote_identifier(&c.name);
                if !c.native_type.is_empty() && is_plain_type_name(&c.native_type) {
                    def.push(' ');
                    def.push_str(&c.native_type);
                }
                if c.name == target.key_column.name {
                    def.push_str(" PRIMARY KEY");
                }
                def
            })
            .collect();

        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_identifier(&target.table),
            columns.join(", ")
        )
    }

    /// Columns covered on their own by a full (non-partial) unique index
    async fn unique_columns(&self, table: &str) -> Result<HashSet<String>> {
        let sql = format!("PRAGMA index_list({})", quote_identifier(table));
        let indexes = sqlx::query(&sql).fetch_all(&self.pool).await?;

        let mut unique = HashSet::new();
        for index in &indexes {
            let is_unique: i64 = index.try_get("unique").unwrap_or(0);
            let partial: i64 = index.try_get("partial").unwrap_or(0);
            if is_unique == 0 || partial != 0 {
                continue;
            }
            let name: String = index.try_get("name")?;
            let sql = format!("PRAGMA index_info({})", quote_identifier(&name));
            let parts = sqlx::query(&sql).fetch_all(&self.pool).await?;
            if let [only] = parts.as_slice() {
                // NULL name means an expression index
                if let Ok(Some(column)) = only.try_get::<Option<String>, _>("name") {
                    unique.insert(column);
                }
            }
        }
        Ok(unique)
    }
}

fn is_plain_type_name(native: &str) -> bool {
    native
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '(' | ')' | ','))
}

#[async_trait]
impl SourceBackend for SqliteSource {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    async fn test_connection(&self) -> Result<()> {
        let one: i64 = sqlx::query_scalar("SELECT 1").fetch_one(&self.pool).await?;
        if one != 1 {
            return Err(DeidError::Connection(format!(
                "Unexpected test query result from {}",
                self.path
            )));
        }
        Ok(())
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' \
             ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("name").map_err(DeidError::from))
            .collect()
    }

    async fn list_columns(&self, table: &str) -> Result<Vec<ColumnDescriptor>> {
        let sql = format!("PRAGMA table_info({})", quote_identifier(table));
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        if rows.is_empty() {
            return Err(DeidError::NotFound(format!("Table '{table}' does not exist")));
        }

        let unique = self.unique_columns(table).await?;
        let pk_count = rows
            .iter()
            .filter(|row| row.try_get::<i64, _>("pk").unwrap_or(0) > 0)
            .count();

        let mut columns = Vec::with_capacity(rows.len());
        for row in &rows {
            let name: String = row.try_get("name")?;
            let declared: String = row.try_get("type").unwrap_or_default();
            let not_null: i64 = row.try_get("notnull").unwrap_or(0);
            let pk: i64 = row.try_get("pk").unwrap_or(0);

            let mut column = ColumnDescriptor::new(name, map_sqlite_type(&declared))
                .with_native_type(declared);
            column.nullable = not_null == 0;
            column.unique = unique.contains(&column.name);
            // Composite keys are not usable as a batch key
            if pk > 0 && pk_count == 1 {
                column = column.primary_key();
            }
            columns.push(column);
        }

        Ok(columns)
    }

    async fn row_locator(&self, table: &str) -> Result<Option<ColumnDescriptor>> {
        let ddl: Option<String> =
            sqlx::query_scalar("SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(table)
                .fetch_optional(&self.pool)
                .await?
                .flatten();
        let Some(ddl) = ddl else {
            return Ok(None);
        };
        if ddl.to_ascii_uppercase().contains("WITHOUT ROWID") {
            return Ok(None);
        }
        let columns = self.list_columns(table).await?;
        if columns
            .iter()
            .any(|c| c.name.eq_ignore_ascii_case(ROW_LOCATOR_COLUMN) || c.name.eq_ignore_ascii_case("rowid"))
        {
            return Ok(None);
        }
        Ok(Some(
            ColumnDescriptor::new(ROW_LOCATOR_COLUMN, ColumnType::Numeric)
                .with_native_type("INTEGER")
                .row_locator(),
        ))
    }

    async fn sample_values(&self, table: &str, column: &str, limit: usize) -> Result<Vec<String>> {
        let column = quote_identifier(column);
        let sql = format!(
            "SELECT DISTINCT CAST({column} AS TEXT) FROM {} WHERE {column} IS NOT NULL LIMIT ?",
            quote_identifier(table)
        );
        let values: Vec<Option<String>> = sqlx::query_scalar(&sql)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        Ok(values.into_iter().flatten().collect())
    }

    async fn read_batch(&self, query: &BatchQuery<'_>) -> Result<Vec<Record>> {
        let table = quote_identifier(query.table);
        let key = key_expr(query.key_column);
        let limit = i64::try_from(query.limit).unwrap_or(i64::MAX);
        let projection = if query.key_column.row_locator {
            format!("rowid AS {}, *", quote_identifier(&query.key_column.name))
        } else {
            "*".to_string()
        };

        let rows = match query.after {
            Some(after) => {
                let sql = format!(
                    "SELECT {projection} FROM {table} WHERE {key} > ? ORDER BY {key} LIMIT ?"
                );
                bind_json(sqlx::query(&sql), after)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let sql = format!(
                    "SELECT {projection} FROM {table} WHERE {key} IS NOT NULL ORDER BY {key} LIMIT ?"
                );
                sqlx::query(&sql).bind(limit).fetch_all(&self.pool).await?
            }
        };

        Ok(rows.iter().map(row_to_record).collect())
    }

    async fn write_batch(
        &self,
        target: &WriteTarget,
        ops: &[WriteOp],
    ) -> Result<BatchWriteResult> {
        let mut result = BatchWriteResult::default();
        let mut tx = self.pool.begin().await?;

        if target.mode == WriteMode::CreateAndUpsert {
            sqlx::query(&Self::create_sql(target))
                .execute(&mut *tx)
                .await?;
        }

        let write_sql = match target.mode {
            WriteMode::CreateAndUpsert => Self::upsert_sql(target),
            WriteMode::UpdateInPlace => Self::update_sql(target),
        };
        let delete_sql = format!(
            "DELETE FROM {} WHERE {} = ?",
            quote_identifier(&target.table),
            key_expr(&target.key_column)
        );
        let has_updates = target.columns.len() > 1;

        for op in ops {
            match op {
                WriteOp::Upsert(record) => {
                    let key_value = record
                        .get(&target.key_column.name)
                        .cloned()
                        .unwrap_or(Value::Null);

                    let mut q = sqlx::query(&write_sql);
                    match target.mode {
                        WriteMode::CreateAndUpsert => {
                            for column in &target.columns {
                                q = bind_json(q, record.get(&column.name).unwrap_or(&Value::Null));
                            }
                        }
                        WriteMode::UpdateInPlace => {
                            if !has_updates {
                                continue;
                            }
                            for column in &target.columns {
                                if column.name != target.key_column.name {
                                    q = bind_json(
                                        q,
                                        record.get(&column.name).unwrap_or(&Value::Null),
                                    );
                                }
                            }
                            q = bind_json(q, &key_value);
                        }
                    }
                    q.execute(&mut *tx).await?;
                    result.written += 1;
                }
                WriteOp::Delete(key) => {
                    bind_json(sqlx::query(&delete_sql), key)
                        .execute(&mut *tx)
                        .await?;
                    result.deleted += 1;
                }
            }
        }

        tx.commit().await?;
        Ok(result)
    }
}
