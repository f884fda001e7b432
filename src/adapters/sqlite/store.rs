//! SQLite control store
//!
//! Catalog entries and run records are stored as JSON documents keyed by id;
//! pseudonym entries and settings are plain columns so the uniqueness
//! constraints can arbitrate concurrent writers.

use super::connection::{open_url_pool, SqlitePoolSettings};
use crate::adapters::database::traits::{CatalogStorage, MappingStorage, RunStorage};
use crate::domain::{
    ConnectionDescriptor, ConnectionId, DeidError, FieldMapping, MappingId, PseudonymEntry,
    Result, Rule, RuleId, RunId, RunRecord, RunStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS connections (
        id TEXT PRIMARY KEY,
        body TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS rules (
        id TEXT PRIMARY KEY,
        body TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS field_mappings (
        id TEXT PRIMARY KEY,
        body TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS pseudonym_entries (
        domain TEXT NOT NULL,
        source_hash TEXT NOT NULL,
        pseudonym TEXT NOT NULL,
        created_at TEXT NOT NULL,
        PRIMARY KEY (domain, source_hash),
        UNIQUE (domain, pseudonym)
    )",
    "CREATE TABLE IF NOT EXISTS runs (
        id TEXT PRIMARY KEY,
        connection_id TEXT NOT NULL,
        status TEXT NOT NULL,
        record TEXT NOT NULL,
        checkpoint TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_runs_status ON runs (status)",
    "CREATE TABLE IF NOT EXISTS settings (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )",
];

/// Control store backed by a SQLite file
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if needed) the store and applies the schema
    ///
    /// # Errors
    ///
    /// Returns `Configuration` for a malformed URL, `Connection` if the file
    /// cannot be opened and `Storage` if the schema cannot be created.
    pub async fn connect(url: &str, settings: SqlitePoolSettings) -> Result<Self> {
        let pool = open_url_pool(url, settings).await?;
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        tracing::debug!("SQLite control store schema ready");
        Ok(())
    }

    async fn put_document<T: Serialize + Sync>(&self, table: &str, id: &str, doc: &T) -> Result<()> {
        let body = serde_json::to_string(doc)?;
        let sql = format!(
            "INSERT INTO {table} (id, body, updated_at) VALUES (?, ?, ?) \
             ON CONFLICT (id) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at"
        );
        sqlx::query(&sql)
            .bind(id)
            .bind(body)
            .bind(timestamp(Utc::now()))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_document<T: DeserializeOwned>(&self, table: &str, id: &str) -> Result<Option<T>> {
        let sql = format!("SELECT body FROM {table} WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| decode(&r.try_get::<String, _>("body")?))
            .transpose()
    }

    async fn list_documents<T: DeserializeOwned>(&self, table: &str) -> Result<Vec<T>> {
        let sql = format!("SELECT body FROM {table} ORDER BY id");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|r| decode(&r.try_get::<String, _>("body")?))
            .collect()
    }

    async fn delete_document(&self, table: &str, id: &str) -> Result<bool> {
        let sql = format!("DELETE FROM {table} WHERE id = ?");
        let done = sqlx::query(&sql).bind(id).execute(&self.pool).await?;
        Ok(done.rows_affected() > 0)
    }

    fn entry_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<PseudonymEntry> {
        let created_at: String = row.try_get("created_at")?;
        Ok(PseudonymEntry {
            domain: row.try_get("domain")?,
            source_hash: row.try_get("source_hash")?,
            pseudonym: row.try_get("pseudonym")?,
            created_at: parse_timestamp(&created_at)?,
        })
    }
}

pub(crate) fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| DeidError::Serialization(format!("Invalid stored timestamp '{value}': {e}")))
}

fn decode<T: DeserializeOwned>(body: &str) -> Result<T> {
    serde_json::from_str(body)
        .map_err(|e| DeidError::Serialization(format!("Corrupt control store document: {e}")))
}

#[async_trait]
impl CatalogStorage for SqliteStore {
    async fn save_connection(&self, descriptor: &ConnectionDescriptor) -> Result<()> {
        self.put_document("connections", descriptor.id.as_str(), descriptor)
            .await
    }

    async fn load_connection(&self, id: &ConnectionId) -> Result<Option<ConnectionDescriptor>> {
        self.get_document("connections", id.as_str()).await
    }

    async fn list_connections(&self) -> Result<Vec<ConnectionDescriptor>> {
        self.list_documents("connections").await
    }

    async fn delete_connection(&self, id: &ConnectionId) -> Result<bool> {
        self.delete_document("connections", id.as_str()).await
    }

    async fn save_rule(&self, rule: &Rule) -> Result<()> {
        self.put_document("rules", rule.id.as_str(), rule).await
    }

    async fn load_rule(&self, id: &RuleId) -> Result<Option<Rule>> {
        self.get_document("rules", id.as_str()).await
    }

    async fn list_rules(&self) -> Result<Vec<Rule>> {
        self.list_documents("rules").await
    }

    async fn delete_rule(&self, id: &RuleId) -> Result<bool> {
        self.delete_document("rules", id.as_str()).await
    }

    async fn save_mapping(&self, mapping: &FieldMapping) -> Result<()> {
        self.put_document("field_mappings", mapping.id.as_str(), mapping)
            .await
    }

    async fn load_mapping(&self, id: &MappingId) -> Result<Option<FieldMapping>> {
        self.get_document("field_mappings", id.as_str()).await
    }

    async fn list_mappings(&self) -> Result<Vec<FieldMapping>> {
        self.list_documents("field_mappings").await
    }
}

#[async_trait]
impl RunStorage for SqliteStore {
    async fn save_run(&self, run: &RunRecord) -> Result<()> {
        let record = serde_json::to_string(run)?;
        let checkpoint = run
            .checkpoint
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            "INSERT INTO runs (id, connection_id, status, record, checkpoint, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (id) DO UPDATE SET
                status = excluded.status,
                record = excluded.record,
                checkpoint = excluded.checkpoint,
                updated_at = excluded.updated_at",
        )
        .bind(run.id.to_string())
        .bind(run.request.connection_id.as_str())
        .bind(run.status.as_str())
        .bind(record)
        .bind(checkpoint)
        .bind(timestamp(run.created_at))
        .bind(timestamp(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_run(&self, id: &RunId) -> Result<Option<RunRecord>> {
        let row = sqlx::query("SELECT record FROM runs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| decode(&r.try_get::<String, _>("record")?))
            .transpose()
    }

    async fn list_runs(&self, limit: usize) -> Result<Vec<RunRecord>> {
        let rows = sqlx::query("SELECT record FROM runs ORDER BY created_at DESC LIMIT ?")
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|r| decode(&r.try_get::<String, _>("record")?))
            .collect()
    }

    async fn runs_with_status(&self, status: RunStatus) -> Result<Vec<RunRecord>> {
        let rows = sqlx::query("SELECT record FROM runs WHERE status = ? ORDER BY created_at")
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|r| decode(&r.try_get::<String, _>("record")?))
            .collect()
    }

    async fn connection_used_by_completed_run(&self, id: &ConnectionId) -> Result<bool> {
        let used: i64 = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM runs WHERE connection_id = ? AND status = ?)",
        )
        .bind(id.as_str())
        .bind(RunStatus::Completed.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(used != 0)
    }
}

#[async_trait]
impl MappingStorage for SqliteStore {
    async fn find_by_source(
        &self,
        domain: &str,
        source_hash: &str,
    ) -> Result<Option<PseudonymEntry>> {
        let row = sqlx::query(
            "SELECT domain, source_hash, pseudonym, created_at FROM pseudonym_entries
             WHERE domain = ? AND source_hash = ?",
        )
        .bind(domain)
        .bind(source_hash)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::entry_from_row).transpose()
    }

    async fn find_by_pseudonym(
        &self,
        domain: &str,
        pseudonym: &str,
    ) -> Result<Option<PseudonymEntry>> {
        let row = sqlx::query(
            "SELECT domain, source_hash, pseudonym, created_at FROM pseudonym_entries
             WHERE domain = ? AND pseudonym = ?",
        )
        .bind(domain)
        .bind(pseudonym)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::entry_from_row).transpose()
    }

    async fn insert_if_absent(&self, entry: &PseudonymEntry) -> Result<bool> {
        let done = sqlx::query(
            "INSERT INTO pseudonym_entries (domain, source_hash, pseudonym, created_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT DO NOTHING",
        )
        .bind(&entry.domain)
        .bind(&entry.source_hash)
        .bind(&entry.pseudonym)
        .bind(timestamp(entry.created_at))
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected() == 1)
    }

    async fn count_domain(&self, domain: &str) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM pseudonym_entries WHERE domain = ?")
                .bind(domain)
                .fetch_one(&self.pool)
                .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let value = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn put_setting_if_absent(&self, key: &str, value: &str) -> Result<String> {
        sqlx::query("INSERT INTO settings (key, value) VALUES (?, ?) ON CONFLICT (key) DO NOTHING")
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;

        self.get_setting(key).await?.ok_or_else(|| {
            DeidError::Storage(format!("Setting '{key}' vanished after insert"))
        })
    }
}
