//! Read-only schema introspection and PHI column scans

use crate::core::registry::ConnectionRegistry;
use crate::deidentification::detector::{PhiDetector, TableScan};
use crate::domain::{ColumnDescriptor, ColumnType, ConnectionId, DeidError, Result, TableSchema};
use std::sync::Arc;
use std::time::Instant;

/// Lists tables and columns of registered connections
pub struct SchemaInspector {
    registry: Arc<ConnectionRegistry>,
    detector: Arc<PhiDetector>,
    sample_size: usize,
}

impl SchemaInspector {
    /// Create an inspector over the registry
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        detector: Arc<PhiDetector>,
        sample_size: usize,
    ) -> Self {
        Self {
            registry,
            detector,
            sample_size,
        }
    }

    /// Table names in backend order
    pub async fn list_tables(&self, connection_id: &ConnectionId) -> Result<Vec<String>> {
        let backend = self.registry.resolve(connection_id).await?;
        backend.list_tables().await
    }

    /// Columns of `table` in ordinal order
    ///
    /// The name is checked against the listed tables before any quoted SQL
    /// reaches the backend.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown connection or table.
    pub async fn list_columns(
        &self,
        connection_id: &ConnectionId,
        table: &str,
    ) -> Result<Vec<ColumnDescriptor>> {
        let backend = self.registry.resolve(connection_id).await?;
        let tables = backend.list_tables().await?;
        if !tables.iter().any(|t| t == table) {
            return Err(DeidError::NotFound(format!("Table '{table}' not found")));
        }
        backend.list_columns(table).await
    }

    /// Full snapshot of one table, taken at run start
    ///
    /// The backend row locator is only consulted when no stored column can
    /// serve as a unique batch key.
    pub async fn table_schema(
        &self,
        connection_id: &ConnectionId,
        table: &str,
    ) -> Result<TableSchema> {
        let columns = self.list_columns(connection_id, table).await?;
        let needs_locator = columns.iter().filter(|c| c.primary_key).count() != 1
            && !columns.iter().any(|c| c.is_unique_key());
        let row_locator = if needs_locator {
            let backend = self.registry.resolve(connection_id).await?;
            backend.row_locator(table).await?
        } else {
            None
        };
        Ok(TableSchema {
            table: table.to_string(),
            columns,
            row_locator,
        })
    }
}

impl SchemaInspector {
    /// Samples distinct values of each column and reports likely PHI
    ///
    /// Boolean columns are skipped. Only counts are logged; sampled values
    /// are dropped once the detector has seen them.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown connection or table.
    pub async fn scan(
        &self,
        connection_id: &ConnectionId,
        table: &str,
        sample_size: Option<usize>,
    ) -> Result<TableScan> {
        let columns = self.list_columns(connection_id, table).await?;
        let backend = self.registry.resolve(connection_id).await?;
        let limit = sample_size.unwrap_or(self.sample_size).max(1);
        let started = Instant::now();

        let mut scans = Vec::new();
        for column in columns
            .iter()
            .filter(|c| c.column_type != ColumnType::Boolean)
        {
            let samples = backend.sample_values(table, &column.name, limit).await?;
            let scan = self.detector.analyze_column(column, &samples);
            tracing::debug!(
                table = %table,
                column = %column.name,
                sampled = scan.sampled,
                categories = scan.categories.len(),
                "Column scanned"
            );
            scans.push(scan);
        }

        tracing::info!(
            connection_id = %connection_id,
            table = %table,
            columns = scans.len(),
            flagged = scans.iter().filter(|s| s.phi_detected()).count(),
            duration_ms = started.elapsed().as_millis() as u64,
            "PHI scan complete"
        );

        Ok(TableScan {
            table: table.to_string(),
            sample_size: limit,
            columns: scans,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::database::ControlStore;
    use crate::adapters::sqlite::{SqlitePoolSettings, SqliteStore};
    use crate::config::PoolConfig;
    use crate::deidentification::detector::PhiCategory;
    use crate::domain::{BackendKind, ConnectionDescriptor, RuleKind, SslMode};
    use std::time::Duration;

    async fn inspector() -> (tempfile::TempDir, SchemaInspector) {
        let dir = tempfile::tempdir().unwrap();
        let settings = SqlitePoolSettings {
            max_connections: 2,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(60),
        };
        let state_url = format!("sqlite://{}", dir.path().join("state.db").display());
        let store: Arc<dyn ControlStore> =
            Arc::new(SqliteStore::connect(&state_url, settings).await.unwrap());

        let source = dir.path().join("clinic.db");
        let pool = sqlx::SqlitePool::connect(&format!("sqlite://{}?mode=rwc", source.display()))
            .await
            .unwrap();
        sqlx::query(
            "CREATE TABLE patients (mrn TEXT PRIMARY KEY, dob DATE, name VARCHAR(80), age INTEGER)",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "CREATE TABLE contacts (id INTEGER PRIMARY KEY, phone TEXT, notes TEXT, active BOOLEAN)",
        )
        .execute(&pool)
        .await
        .unwrap();
        for (id, phone, notes) in [
            (1, "555-123-4567", "Called Dr. Jane Smith"),
            (2, "555-987-6543", "reach at jane@example.com"),
            (3, "(555) 222-3333", "no answer"),
        ] {
            sqlx::query("INSERT INTO contacts VALUES (?, ?, ?, 1)")
                .bind(id)
                .bind(phone)
                .bind(notes)
                .execute(&pool)
                .await
                .unwrap();
        }
        pool.close().await;

        let registry = Arc::new(ConnectionRegistry::new(store, PoolConfig::default()));
        registry
            .register(ConnectionDescriptor {
                id: ConnectionId::new("clinic").unwrap(),
                name: "Clinic".to_string(),
                backend: BackendKind::Sqlite,
                host: None,
                port: None,
                database: source.display().to_string(),
                username: None,
                credentials: None,
                ssl_mode: SslMode::Disable,
            })
            .await
            .unwrap();

        let detector = Arc::new(PhiDetector::new().unwrap());
        (dir, SchemaInspector::new(registry, detector, 100))
    }

    #[tokio::test]
    async fn test_list_tables_and_columns() {
        let (_dir, inspector) = inspector().await;
        let id = ConnectionId::new("clinic").unwrap();

        assert_eq!(
            inspector.list_tables(&id).await.unwrap(),
            vec!["contacts", "patients"]
        );

        let schema = inspector.table_schema(&id, "patients").await.unwrap();
        assert_eq!(schema.column_names(), vec!["mrn", "dob", "name", "age"]);
        assert_eq!(schema.column("dob").unwrap().column_type, ColumnType::Date);
        assert_eq!(schema.column("age").unwrap().column_type, ColumnType::Numeric);
        assert!(schema.column("mrn").unwrap().primary_key);
    }

    #[tokio::test]
    async fn test_missing_table_is_not_found() {
        let (_dir, inspector) = inspector().await;
        let id = ConnectionId::new("clinic").unwrap();
        let err = inspector.list_columns(&id, "visits").await.unwrap_err();
        assert!(matches!(err, DeidError::NotFound(ref m) if m.contains("visits")));
    }

    #[tokio::test]
    async fn test_scan_flags_phi_columns() {
        let (_dir, inspector) = inspector().await;
        let id = ConnectionId::new("clinic").unwrap();

        let scan = inspector.scan(&id, "contacts", None).await.unwrap();
        assert_eq!(scan.sample_size, 100);
        let names: Vec<&str> = scan.columns.iter().map(|c| c.column.as_str()).collect();
        assert_eq!(names, vec!["id", "phone", "notes"]);

        let phone = &scan.columns[1];
        assert_eq!(phone.sampled, 3);
        assert_eq!(phone.categories[0].category, PhiCategory::Phone);
        assert_eq!(phone.suggestion.as_ref().unwrap().kind.name(), "MASK");

        let notes = &scan.columns[2];
        assert!(matches!(
            notes.suggestion.as_ref().unwrap().kind,
            RuleKind::Redact { .. }
        ));
        assert!(!scan.columns[0].phi_detected());
    }

    #[tokio::test]
    async fn test_scan_sample_size_override() {
        let (_dir, inspector) = inspector().await;
        let id = ConnectionId::new("clinic").unwrap();
        let scan = inspector.scan(&id, "contacts", Some(1)).await.unwrap();
        assert_eq!(scan.sample_size, 1);
        assert!(scan.columns.iter().all(|c| c.sampled <= 1));
    }
}
