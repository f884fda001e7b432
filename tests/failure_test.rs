//! Row-level errors, systemic failures and recovery
//!
//! These tests verify that:
//! - Row errors are logged and bounded without failing the run
//! - The redact policy never writes text into typed columns
//! - Row suppression omits rows from new tables and deletes them in place
//! - A write that keeps failing fails the run, and resume continues exactly
//!   after the last committed batch
//! - A panicking backend fails the run instead of leaving it RUNNING

mod common;

use async_trait::async_trait;
use common::{request, rows, seed_patients, Fixture, CONNECTION, SHARED_KEY};
use deid::adapters::database::{
    BatchQuery, BatchWriteResult, Record, SourceBackend, WriteOp, WriteTarget,
};
use deid::adapters::sqlite::{SqlitePoolSettings, SqliteSource};
use deid::core::pipeline::PANIC_DETAIL;
use deid::core::service::DeidService;
use deid::domain::{
    BackendKind, ColumnDescriptor, ConnectionId, DeidError, Result, RunStatus,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// SQLite source whose reads and writes can be made to misbehave
struct ScriptedSource {
    inner: SqliteSource,
    reads: AtomicUsize,
    panic_on_read: AtomicUsize,
    writes: AtomicUsize,
    fail_writes_after: AtomicUsize,
    failing: AtomicBool,
    after_keys: Mutex<Vec<Option<Value>>>,
    keys_read: Mutex<Vec<i64>>,
}

impl ScriptedSource {
    async fn open(fixture: &Fixture) -> Arc<Self> {
        let settings = SqlitePoolSettings {
            max_connections: 2,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(60),
        };
        let inner = SqliteSource::open(&fixture.source_path.display().to_string(), settings)
            .await
            .unwrap();
        Arc::new(Self {
            inner,
            reads: AtomicUsize::new(0),
            panic_on_read: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            fail_writes_after: AtomicUsize::new(usize::MAX),
            failing: AtomicBool::new(false),
            after_keys: Mutex::new(Vec::new()),
            keys_read: Mutex::new(Vec::new()),
        })
    }

    async fn attach(self: &Arc<Self>, service: &DeidService) {
        let backend: Arc<dyn SourceBackend> = self.clone();
        service
            .registry()
            .attach(&ConnectionId::new(CONNECTION).unwrap(), backend)
            .await
            .unwrap();
    }

    /// Fails every write once `committed` writes have succeeded
    fn fail_writes_after(&self, committed: usize) {
        self.fail_writes_after.store(committed, Ordering::SeqCst);
        self.failing.store(true, Ordering::SeqCst);
    }

    fn heal(&self) {
        self.failing.store(false, Ordering::SeqCst);
        self.panic_on_read.store(0, Ordering::SeqCst);
        self.after_keys.lock().unwrap().clear();
        self.keys_read.lock().unwrap().clear();
    }
}

#[async_trait]
impl SourceBackend for ScriptedSource {
    fn kind(&self) -> BackendKind {
        self.inner.kind()
    }

    async fn test_connection(&self) -> Result<()> {
        self.inner.test_connection().await
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        self.inner.list_tables().await
    }

    async fn list_columns(&self, table: &str) -> Result<Vec<ColumnDescriptor>> {
        self.inner.list_columns(table).await
    }

    async fn row_locator(&self, table: &str) -> Result<Option<ColumnDescriptor>> {
        self.inner.row_locator(table).await
    }

    async fn sample_values(&self, table: &str, column: &str, limit: usize) -> Result<Vec<String>> {
        self.inner.sample_values(table, column, limit).await
    }

    async fn read_batch(&self, query: &BatchQuery<'_>) -> Result<Vec<Record>> {
        let read = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
        if read == self.panic_on_read.load(Ordering::SeqCst) {
            panic!("read {read} blew up");
        }
        self.after_keys.lock().unwrap().push(query.after.cloned());
        let rows = self.inner.read_batch(query).await?;
        self.keys_read
            .lock()
            .unwrap()
            .extend(rows.iter().filter_map(|r| r["id"].as_i64()));
        Ok(rows)
    }

    async fn write_batch(&self, target: &WriteTarget, ops: &[WriteOp]) -> Result<BatchWriteResult> {
        if self.failing.load(Ordering::SeqCst)
            && self.writes.load(Ordering::SeqCst) >= self.fail_writes_after.load(Ordering::SeqCst)
        {
            return Err(DeidError::Storage("disk full".to_string()));
        }
        let result = self.inner.write_batch(target, ops).await?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(result)
    }
}

#[tokio::test]
async fn test_write_failure_fails_run_and_resume_continues_after_checkpoint() {
    const ROWS: i64 = 10;
    let rules = ["mask-name", "shift-dob", "pseudonymize-mrn"];

    let reference = Fixture::new();
    let reference_source = reference.source().await;
    seed_patients(&reference_source, ROWS).await;
    let service = reference.service(2, Some(SHARED_KEY)).await;
    let id = service
        .coordinator()
        .dispatch(request("patients", &rules))
        .await
        .unwrap();
    let expected_record = service.coordinator().wait(&id).await.unwrap();
    let expected = rows(&reference_source, "patients_deid").await;

    let fixture = Fixture::new();
    let source = fixture.source().await;
    seed_patients(&source, ROWS).await;
    let service = fixture.service(2, Some(SHARED_KEY)).await;
    let scripted = ScriptedSource::open(&fixture).await;
    scripted.attach(&service).await;
    scripted.fail_writes_after(2);

    let coordinator = service.coordinator().clone();
    let id = coordinator
        .dispatch(request("patients", &rules))
        .await
        .unwrap();
    let failed = coordinator.wait(&id).await.unwrap();

    assert_eq!(failed.status, RunStatus::Failed);
    assert!(!failed.is_cancelled());
    assert!(failed.error_detail.is_some());
    let checkpoint = failed.checkpoint.clone().unwrap();
    assert_eq!(checkpoint.batches_committed, 2);
    assert_eq!(checkpoint.last_key, json!(4));
    assert_eq!(failed.counters.rows_scanned, 4);
    assert_eq!(rows(&source, "patients_deid").await.len(), 4);

    scripted.heal();
    coordinator.resume(&id).await.unwrap();
    let resumed = coordinator.wait(&id).await.unwrap();

    assert_eq!(resumed.status, RunStatus::Completed);
    let after_keys = scripted.after_keys.lock().unwrap().clone();
    assert_eq!(after_keys[0], Some(json!(4)));
    let keys_read = scripted.keys_read.lock().unwrap().clone();
    assert_eq!(keys_read, (5..=ROWS).collect::<Vec<_>>());

    assert_eq!(resumed.counters, expected_record.counters);
    assert_eq!(rows(&source, "patients_deid").await, expected);
}

#[tokio::test]
async fn test_panicking_backend_fails_run() {
    let fixture = Fixture::new();
    let source = fixture.source().await;
    seed_patients(&source, 6).await;
    let service = fixture.service(2, None).await;
    let scripted = ScriptedSource::open(&fixture).await;
    scripted.attach(&service).await;
    scripted.panic_on_read.store(2, Ordering::SeqCst);

    let coordinator = service.coordinator().clone();
    let id = coordinator
        .dispatch(request("patients", &["mask-name"]))
        .await
        .unwrap();
    let record = coordinator.wait(&id).await.unwrap();

    assert_eq!(record.status, RunStatus::Failed);
    assert_eq!(record.error_detail.as_deref(), Some(PANIC_DETAIL));
    assert_eq!(record.checkpoint.as_ref().unwrap().batches_committed, 1);
    assert_eq!(coordinator.active_runs().await, 0);

    // Persisted, not only published
    let stored = service.store().load_run(&id).await.unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Failed);

    scripted.heal();
    coordinator.resume(&id).await.unwrap();
    let record = coordinator.wait(&id).await.unwrap();
    assert_eq!(record.status, RunStatus::Completed);
    assert_eq!(record.counters.rows_scanned, 6);
}

/// `visits(id, mrn, name, dob DATE)` with two readable and `bad` unreadable dates
async fn seed_visits(pool: &sqlx::SqlitePool, bad: i64) {
    sqlx::query("CREATE TABLE visits (id INTEGER PRIMARY KEY, mrn TEXT NOT NULL, name TEXT, dob DATE)")
        .execute(pool)
        .await
        .unwrap();
    for i in 1..=(2 + bad) {
        let dob = if i <= 2 { format!("1980-01-0{i}") } else { "unknown".to_string() };
        sqlx::query("INSERT INTO visits (id, mrn, name, dob) VALUES (?, ?, ?, ?)")
            .bind(i)
            .bind(format!("MRN{i:05}"))
            .bind(format!("Patient Doe{i}"))
            .bind(dob)
            .execute(pool)
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_row_errors_are_logged_and_bounded() {
    let fixture = Fixture::new();
    let source = fixture.source().await;
    seed_visits(&source, 4).await;
    let service = fixture
        .service_with(2, None, |toml| {
            toml.replace("batch_size = 2\n", "batch_size = 2\nmax_error_log = 2\n")
        })
        .await;

    let id = service
        .coordinator()
        .dispatch(request("visits", &["shift-dob"]))
        .await
        .unwrap();
    let record = service.coordinator().wait(&id).await.unwrap();

    assert_eq!(record.status, RunStatus::Completed);
    assert_eq!(record.counters.rows_scanned, 6);
    assert_eq!(record.counters.rows_failed, 4);
    assert_eq!(record.errors.len(), 2);
    assert_eq!(record.errors_dropped, 2);
    assert_eq!(record.errors[0].column, "dob");
    assert_eq!(record.errors[0].row_key, json!(3));
    assert_eq!(record.errors[0].kind, "type_mismatch");

    // keep_original leaves the unreadable value as it was
    let dobs: Vec<Option<String>> = sqlx::query_scalar("SELECT dob FROM visits_deid ORDER BY id")
        .fetch_all(&source)
        .await
        .unwrap();
    assert_eq!(dobs[2].as_deref(), Some("unknown"));
}

#[tokio::test]
async fn test_redact_policy_nulls_typed_columns() {
    let fixture = Fixture::new();
    let source = fixture.source().await;
    seed_visits(&source, 1).await;
    let service = fixture
        .service_with(10, None, |toml| {
            toml.replace("[deidentification]\n", "[deidentification]\non_row_error = \"redact\"\n")
        })
        .await;

    let id = service
        .coordinator()
        .dispatch(request("visits", &["shift-dob"]))
        .await
        .unwrap();
    let record = service.coordinator().wait(&id).await.unwrap();
    assert_eq!(record.status, RunStatus::Completed);
    assert_eq!(record.counters.rows_failed, 1);

    let dobs: Vec<Option<String>> = sqlx::query_scalar("SELECT dob FROM visits_deid ORDER BY id")
        .fetch_all(&source)
        .await
        .unwrap();
    assert_eq!(dobs.len(), 3);
    assert!(dobs[0].is_some() && dobs[1].is_some());
    assert_eq!(dobs[2], None);
}

async fn seed_deceased(pool: &sqlx::SqlitePool) {
    sqlx::query("CREATE TABLE registry (id INTEGER PRIMARY KEY, mrn TEXT NOT NULL, name TEXT, deceased TEXT)")
        .execute(pool)
        .await
        .unwrap();
    for (id, deceased) in [(1, None), (2, Some("2020-02-02")), (3, None), (4, Some("2021-03-03"))] {
        sqlx::query("INSERT INTO registry (id, mrn, name, deceased) VALUES (?, ?, ?, ?)")
            .bind(id)
            .bind(format!("MRN{id:05}"))
            .bind(format!("Patient Doe{id}"))
            .bind(deceased)
            .execute(pool)
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_row_suppression_omits_rows_from_new_table() {
    let fixture = Fixture::new();
    let source = fixture.source().await;
    seed_deceased(&source).await;
    let service = fixture.service(3, None).await;

    let id = service
        .coordinator()
        .dispatch(request("registry", &["drop-deceased", "mask-name"]))
        .await
        .unwrap();
    let record = service.coordinator().wait(&id).await.unwrap();
    assert_eq!(record.status, RunStatus::Completed);
    assert_eq!(record.counters.rows_scanned, 4);

    let ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM registry_deid ORDER BY id")
        .fetch_all(&source)
        .await
        .unwrap();
    assert_eq!(ids, vec![1, 3]);
}

#[tokio::test]
async fn test_row_suppression_deletes_rows_in_place() {
    let fixture = Fixture::new();
    let source = fixture.source().await;
    seed_deceased(&source).await;
    let service = fixture
        .service_with(3, None, |toml| {
            toml.replace("mode = \"new_table\"", "mode = \"in_place\"")
        })
        .await;

    let id = service
        .coordinator()
        .dispatch(request("registry", &["drop-deceased", "mask-name"]))
        .await
        .unwrap();
    let record = service.coordinator().wait(&id).await.unwrap();
    assert_eq!(record.status, RunStatus::Completed);

    let remaining: Vec<(i64, String)> =
        sqlx::query_as("SELECT id, name FROM registry ORDER BY id")
            .fetch_all(&source)
            .await
            .unwrap();
    assert_eq!(
        remaining,
        vec![(1, "****e1".to_string()), (3, "****e3".to_string())]
    );
}
