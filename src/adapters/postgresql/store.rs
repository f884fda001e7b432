//! PostgreSQL control store

use super::client::PostgreSQLClient;
use crate::adapters::database::traits::{CatalogStorage, MappingStorage, RunStorage};
use crate::domain::{
    ConnectionDescriptor, ConnectionId, DeidError, FieldMapping, MappingId, PseudonymEntry,
    Result, Rule, RuleId, RunId, RunRecord, RunStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio_postgres::Row;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS connections (
    id TEXT PRIMARY KEY,
    body JSONB NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE TABLE IF NOT EXISTS rules (
    id TEXT PRIMARY KEY,
    body JSONB NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE TABLE IF NOT EXISTS field_mappings (
    id TEXT PRIMARY KEY,
    body JSONB NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE TABLE IF NOT EXISTS pseudonym_entries (
    domain TEXT NOT NULL,
    source_hash TEXT NOT NULL,
    pseudonym TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    PRIMARY KEY (domain, source_hash),
    UNIQUE (domain, pseudonym)
);
CREATE TABLE IF NOT EXISTS runs (
    id TEXT PRIMARY KEY,
    connection_id TEXT NOT NULL,
    status TEXT NOT NULL,
    record JSONB NOT NULL,
    checkpoint JSONB,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS idx_runs_status ON runs (status);
CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

/// Control store in a PostgreSQL database
pub struct PostgreSQLStore {
    client: PostgreSQLClient,
}

impl PostgreSQLStore {
    /// Wraps a client and applies the schema
    ///
    /// # Errors
    ///
    /// Returns `Connection`/`Timeout` if the database is unreachable and
    /// `Storage` if the schema cannot be created.
    pub async fn connect(client: PostgreSQLClient) -> Result<Self> {
        let store = Self { client };
        let conn = store.client.get_connection().await?;
        conn.batch_execute(SCHEMA).await?;
        tracing::info!(target_db = %store.client.target(), "PostgreSQL control store schema ready");
        Ok(store)
    }

    async fn put_document<T: Serialize + Sync>(&self, table: &str, id: &str, doc: &T) -> Result<()> {
        let body = serde_json::to_value(doc)?;
        let sql = format!(
            "INSERT INTO {table} (id, body, updated_at) VALUES ($1, $2, now())
             ON CONFLICT (id) DO UPDATE SET body = EXCLUDED.body, updated_at = now()"
        );
        let conn = self.client.get_connection().await?;
        conn.execute(sql.as_str(), &[&id, &body]).await?;
        Ok(())
    }

    async fn get_document<T: DeserializeOwned>(&self, table: &str, id: &str) -> Result<Option<T>> {
        let sql = format!("SELECT body FROM {table} WHERE id = $1");
        let conn = self.client.get_connection().await?;
        let row = conn.query_opt(sql.as_str(), &[&id]).await?;
        row.map(|r| decode(r.try_get::<_, Value>(0)?)).transpose()
    }

    async fn list_documents<T: DeserializeOwned>(&self, table: &str) -> Result<Vec<T>> {
        let sql = format!("SELECT body FROM {table} ORDER BY id");
        let conn = self.client.get_connection().await?;
        let rows = conn.query(sql.as_str(), &[]).await?;
        rows.iter()
            .map(|r| decode(r.try_get::<_, Value>(0)?))
            .collect()
    }

    async fn delete_document(&self, table: &str, id: &str) -> Result<bool> {
        let sql = format!("DELETE FROM {table} WHERE id = $1");
        let conn = self.client.get_connection().await?;
        Ok(conn.execute(sql.as_str(), &[&id]).await? > 0)
    }

    async fn records(&self, sql: &str, params: &[&(dyn tokio_postgres::types::ToSql + Sync)]) -> Result<Vec<RunRecord>> {
        let conn = self.client.get_connection().await?;
        let rows = conn.query(sql, params).await?;
        rows.iter()
            .map(|r| decode(r.try_get::<_, Value>(0)?))
            .collect()
    }
}

fn decode<T: DeserializeOwned>(body: Value) -> Result<T> {
    serde_json::from_value(body)
        .map_err(|e| DeidError::Serialization(format!("Corrupt control store document: {e}")))
}

fn entry_from_row(row: &Row) -> Result<PseudonymEntry> {
    Ok(PseudonymEntry {
        domain: row.try_get(0)?,
        source_hash: row.try_get(1)?,
        pseudonym: row.try_get(2)?,
        created_at: row.try_get::<_, DateTime<Utc>>(3)?,
    })
}

#[async_trait]
impl CatalogStorage for PostgreSQLStore {
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
impl RunStorage for PostgreSQLStore {
    async fn save_run(&self, run: &RunRecord) -> Result<()> {
        let record = serde_json::to_value(run)?;
        let checkpoint = run.checkpoint.as_ref().map(serde_json::to_value).transpose()?;
        let id = run.id.to_string();

        let conn = self.client.get_connection().await?;
        conn.execute(
            "INSERT INTO runs (id, connection_id, status, record, checkpoint, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, now())
             ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                record = EXCLUDED.record,
                checkpoint = EXCLUDED.checkpoint,
                updated_at = now()",
            &[
                &id,
                &run.request.connection_id.as_str(),
                &run.status.as_str(),
                &record,
                &checkpoint,
                &run.created_at,
            ],
        )
        .await?;
        Ok(())
    }

    async fn load_run(&self, id: &RunId) -> Result<Option<RunRecord>> {
        let id = id.to_string();
        let conn = self.client.get_connection().await?;
        let row = conn
            .query_opt("SELECT record FROM runs WHERE id = $1", &[&id])
            .await?;
        row.map(|r| decode(r.try_get::<_, Value>(0)?)).transpose()
    }

    async fn list_runs(&self, limit: usize) -> Result<Vec<RunRecord>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.records(
            "SELECT record FROM runs ORDER BY created_at DESC LIMIT $1",
            &[&limit],
        )
        .await
    }

    async fn runs_with_status(&self, status: RunStatus) -> Result<Vec<RunRecord>> {
        self.records(
            "SELECT record FROM runs WHERE status = $1 ORDER BY created_at",
            &[&status.as_str()],
        )
        .await
    }

    async fn connection_used_by_completed_run(&self, id: &ConnectionId) -> Result<bool> {
        let conn = self.client.get_connection().await?;
        let row = conn
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM runs WHERE connection_id = $1 AND status = $2)",
                &[&id.as_str(), &RunStatus::Completed.as_str()],
            )
            .await?;
        Ok(row.try_get(0)?)
    }
}

#[async_trait]
impl MappingStorage for PostgreSQLStore {
    async fn find_by_source(
        &self,
        domain: &str,
        source_hash: &str,
    ) -> Result<Option<PseudonymEntry>> {
        let conn = self.client.get_connection().await?;
        let row = conn
            .query_opt(
                "SELECT domain, source_hash, pseudonym, created_at FROM pseudonym_entries
                 WHERE domain = $1 AND source_hash = $2",
                &[&domain, &source_hash],
            )
            .await?;
        row.as_ref().map(entry_from_row).transpose()
    }

    async fn find_by_pseudonym(
        &self,
        domain: &str,
        pseudonym: &str,
    ) -> Result<Option<PseudonymEntry>> {
        let conn = self.client.get_connection().await?;
        let row = conn
            .query_opt(
                "SELECT domain, source_hash, pseudonym, created_at FROM pseudonym_entries
                 WHERE domain = $1 AND pseudonym = $2",
                &[&domain, &pseudonym],
            )
            .await?;
        row.as_ref().map(entry_from_row).transpose()
    }

    async fn insert_if_absent(&self, entry: &PseudonymEntry) -> Result<bool> {
        let conn = self.client.get_connection().await?;
        let inserted = conn
            .execute(
                "INSERT INTO pseudonym_entries (domain, source_hash, pseudonym, created_at)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT DO NOTHING",
                &[
                    &entry.domain,
                    &entry.source_hash,
                    &entry.pseudonym,
                    &entry.created_at,
                ],
            )
            .await?;
        Ok(inserted == 1)
    }

    async fn count_domain(&self, domain: &str) -> Result<u64> {
        let conn = self.client.get_connection().await?;
        let row = conn
            .query_one(
                "SELECT COUNT(*) FROM pseudonym_entries WHERE domain = $1",
                &[&domain],
            )
            .await?;
        let count: i64 = row.try_get(0)?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.client.get_connection().await?;
        let row = conn
            .query_opt("SELECT value FROM settings WHERE key = $1", &[&key])
            .await?;
        row.map(|r| r.try_get::<_, String>(0).map_err(DeidError::from))
            .transpose()
    }

    async fn put_setting_if_absent(&self, key: &str, value: &str) -> Result<String> {
        let conn = self.client.get_connection().await?;
        conn.execute(
            "INSERT INTO settings (key, value) VALUES ($1, $2) ON CONFLICT (key) DO NOTHING",
            &[&key, &value],
        )
        .await?;
        let row = conn
            .query_one("SELECT value FROM settings WHERE key = $1", &[&key])
            .await?;
        Ok(row.try_get(0)?)
    }
}
