//! PostgreSQL source backend
//!
//! Introspection goes through `information_schema` in the current schema.
//! Rows are fetched as `row_to_json` so every column type arrives as JSON
//! without a per-type decoder; values are written back as text and cast to the
//! column's type on the server.

use super::client::{quote_identifier, PostgreSQLClient};
use crate::adapters::database::traits::{
    BatchQuery, BatchWriteResult, Record, SourceBackend, WriteMode, WriteOp, WriteTarget,
};
use crate::domain::{BackendKind, ColumnDescriptor, ColumnType, DeidError, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio_postgres::types::ToSql;

/// Source backend for a PostgreSQL database
pub struct PostgreSQLSource {
    client: PostgreSQLClient,
}

impl PostgreSQLSource {
    /// Creates a source over a pooled client
    pub fn new(client: PostgreSQLClient) -> Self {
        Self { client }
    }
}

/// Maps `information_schema.columns.data_type` onto the common vocabulary
pub fn map_postgres_type(data_type: &str) -> ColumnType {
    let t = data_type.to_lowercase();

    match t.as_str() {
        "boolean" => ColumnType::Boolean,
        "smallint" | "integer" | "bigint" | "numeric" | "decimal" | "real"
        | "double precision" | "money" => ColumnType::Numeric,
        "date" => ColumnType::Date,
        "text" | "uuid" | "citext" | "name" => ColumnType::Text,
        _ if t.starts_with("timestamp") || t.starts_with("time") => ColumnType::Date,
        _ if t.starts_with("character") || t.contains("char") => ColumnType::Text,
        _ => ColumnType::Unknown,
    }
}

/// Type used when casting a text parameter to the column's type
fn cast_type(column: &ColumnDescriptor) -> &str {
    let native = column.native_type.as_str();
    if !native.is_empty()
        && native
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        native
    } else {
        "text"
    }
}

/// Renders a JSON value as the text parameter sent to the server
fn to_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

fn as_params(values: &[Option<String>]) -> Vec<&(dyn ToSql + Sync)> {
    values.iter().map(|v| v as &(dyn ToSql + Sync)).collect()
}

#[async_trait]
impl SourceBackend for PostgreSQLSource {
    fn kind(&self) -> BackendKind {
        BackendKind::Postgresql
    }

    async fn test_connection(&self) -> Result<()> {
        self.client.test_connection().await
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        let client = self.client.get_connection().await?;
        let rows = client
            .query(
                "SELECT table_name::text FROM information_schema.tables
                 WHERE table_schema = current_schema() AND table_type = 'BASE TABLE'
                 ORDER BY table_name",
                &[],
            )
            .await?;

        rows.iter()
            .map(|row| row.try_get::<_, String>(0).map_err(DeidError::from))
            .collect()
    }

    async fn list_columns(&self, table: &str) -> Result<Vec<ColumnDescriptor>> {
        let client = self.client.get_connection().await?;
        let rows = client
            .query(
                "SELECT c.column_name::text,
                        c.data_type::text,
                        c.udt_name::text,
                        c.is_nullable = 'YES' AS nullable,
                        EXISTS (
                            SELECT 1
                            FROM information_schema.table_constraints tc
                            JOIN information_schema.key_column_usage kcu
                              ON tc.constraint_name = kcu.constraint_name
                             AND tc.table_schema = kcu.table_schema
                            WHERE tc.constraint_type = 'PRIMARY KEY'
                              AND tc.table_schema = c.table_schema
                              AND tc.table_name = c.table_name
                              AND kcu.column_name = c.column_name
                        ) AS primary_key,
                        EXISTS (
                            SELECT 1
                            FROM pg_index i
                            JOIN pg_attribute a
                              ON a.attrelid = i.indrelid AND a.attnum = i.indkey[0]
                            WHERE i.indrelid = (quote_ident(c.table_schema) || '.' || quote_ident(c.table_name))::regclass
                              AND i.indisunique
                              AND i.indnkeyatts = 1
                              AND i.indpred IS NULL
                              AND a.attname = c.column_name
                        ) AS is_unique
                 FROM information_schema.columns c
                 WHERE c.table_schema = current_schema() AND c.table_name = $1
                 ORDER BY c.ordinal_position",
                &[&table],
            )
            .await?;

        if rows.is_empty() {
            return Err(DeidError::NotFound(format!("Table '{table}' does not exist")));
        }

        let pk_count = rows
            .iter()
            .filter(|r| r.try_get::<_, bool>(4).unwrap_or(false))
            .count();

        let mut columns = Vec::with_capacity(rows.len());
        for row in &rows {
            let name: String = row.try_get(0)?;
            let data_type: String = row.try_get(1)?;
            let udt_name: String = row.try_get(2)?;
            let nullable: bool = row.try_get(3)?;
            let primary_key: bool = row.try_get(4)?;
            let unique: bool = row.try_get(5)?;

            let mut column =
                ColumnDescriptor::new(name, map_postgres_type(&data_type)).with_native_type(udt_name);
            column.nullable = nullable;
            column.unique = unique;
            if primary_key && pk_count == 1 {
                column = column.primary_key();
            }
            columns.push(column);
        }

        Ok(columns)
    }

    async fn sample_values(&self, table: &str, column: &str, limit: usize) -> Result<Vec<String>> {
        let column = quote_identifier(column);
        let sql = format!(
            "SELECT DISTINCT {column}::text FROM {} WHERE {column} IS NOT NULL LIMIT $1",
            quote_identifier(table)
        );
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let client = self.client.get_connection().await?;
        let rows = client.query(&sql, &[&limit]).await?;
        rows.iter()
            .map(|row| row.try_get::<_, Option<String>>(0).map_err(DeidError::from))
            .filter_map(|value| value.transpose())
            .collect()
    }

    async fn read_batch(&self, query: &BatchQuery<'_>) -> Result<Vec<Record>> {
        let table = quote_identifier(query.table);
        let key = quote_identifier(&query.key_column.name);
        let limit = i64::try_from(query.limit).unwrap_or(i64::MAX);
        let client = self.client.get_connection().await?;

        let rows = match query.after.and_then(to_text) {
            Some(after) => {
                let sql = format!(
                    "SELECT row_to_json(t) FROM (
                        SELECT * FROM {table} WHERE {key} > CAST($1::text AS {cast})
                        ORDER BY {key} LIMIT $2
                     ) t",
                    cast = cast_type(query.key_column)
                );
                client.query(&sql, &[&after, &limit]).await?
            }
            None => {
                let sql = format!(
                    "SELECT row_to_json(t) FROM (
                        SELECT * FROM {table} WHERE {key} IS NOT NULL
                        ORDER BY {key} LIMIT $1
                     ) t"
                );
                client.query(&sql, &[&limit]).await?
            }
        };

        rows.iter()
            .map(|row| -> Result<Record> {
                match row.try_get::<_, Value>(0)? {
                    Value::Object(map) => Ok(map),
                    other => Err(DeidError::Serialization(format!(
                        "Expected a JSON object per row, got {other}"
                    ))),
                }
            })
            .collect()
    }

    async fn write_batch(
        &self,
        target: &WriteTarget,
        ops: &[WriteOp],
    ) -> Result<BatchWriteResult> {
        let mut client = self.client.get_connection().await?;
        let tx = client.transaction().await?;
        let mut result = BatchWriteResult::default();

        let table = quote_identifier(&target.table);
        let key_name = &target.key_column.name;
        let key = quote_identifier(key_name);
        let key_cast = cast_type(&target.key_column);
        let others: Vec<&ColumnDescriptor> =
            target.columns.iter().filter(|c| &c.name != key_name).collect();

        let write_sql = match target.mode {
            WriteMode::CreateAndUpsert => {
                let mut defs = vec![format!("{key} {key_cast} PRIMARY KEY")];
                defs.extend(others.iter().map(|c| format!("{} TEXT", quote_identifier(&c.name))));
                tx.batch_execute(&format!(
                    "CREATE TABLE IF NOT EXISTS {table} ({})",
                    defs.join(", ")
                ))
                .await?;

                let mut names = vec![key.clone()];
                names.extend(others.iter().map(|c| quote_identifier(&c.name)));
                let mut values = vec![format!("CAST($1::text AS {key_cast})")];
                values.extend((0..others.len()).map(|i| format!("${}::text", i + 2)));
                let conflict = if others.is_empty() {
                    "DO NOTHING".to_string()
                } else {
                    let sets: Vec<String> = others
                        .iter()
                        .map(|c| {
                            let q = quote_identifier(&c.name);
                            format!("{q} = EXCLUDED.{q}")
                        })
                        .collect();
                    format!("DO UPDATE SET {}", sets.join(", "))
                };

                format!(
                    "INSERT INTO {table} ({}) VALUES ({}) ON CONFLICT ({key}) {conflict}",
                    names.join(", "),
                    values.join(", ")
                )
            }
            WriteMode::UpdateInPlace => {
                let sets: Vec<String> = others
                    .iter()
                    .enumerate()
                    .map(|(i, c)| {
                        format!(
                            "{} = CAST(${}::text AS {})",
                            quote_identifier(&c.name),
                            i + 2,
                            cast_type(c)
                        )
                    })
                    .collect();
                format!(
                    "UPDATE {table} SET {} WHERE {key} = CAST($1::text AS {key_cast})",
                    sets.join(", ")
                )
            }
        };
        let delete_sql = format!("DELETE FROM {table} WHERE {key} = CAST($1::text AS {key_cast})");

        // An in-place update with only the key column has nothing to set
        let write_stmt = if target.mode == WriteMode::UpdateInPlace && others.is_empty() {
            None
        } else {
            Some(tx.prepare(&write_sql).await?)
        };

        for op in ops {
            match op {
                WriteOp::Upsert(record) => {
                    let Some(stmt) = &write_stmt else {
                        continue;
                    };
                    let mut values =
                        vec![to_text(record.get(key_name).unwrap_or(&Value::Null))];
                    values.extend(
                        others
                            .iter()
                            .map(|c| to_text(record.get(&c.name).unwrap_or(&Value::Null))),
                    );
                    tx.execute(stmt, &as_params(&values)).await?;
                    result.written += 1;
                }
                WriteOp::Delete(key_value) => {
                    let values = vec![to_text(key_value)];
                    tx.execute(delete_sql.as_str(), &as_params(&values)).await?;
                    result.deleted += 1;
                }
            }
        }

        tx.commit().await?;
        Ok(result)
    }
}
