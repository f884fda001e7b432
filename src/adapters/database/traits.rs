//! Database abstraction traits
//!
//! Two families of traits live here:
//!
//! - [`SourceBackend`]: the capability interface every source database kind
//!   implements (introspection plus batch read/write). The pipeline only ever
//!   talks to sources through it.
//! - [`CatalogStorage`], [`RunStorage`], [`MappingStorage`]: the control store
//!   holding connection descriptors, rules, field mappings, run records with
//!   their checkpoints, and pseudonym entries. [`ControlStore`] bundles them.

use crate::domain::{
    BackendKind, ColumnDescriptor, ConnectionDescriptor, ConnectionId, FieldMapping, MappingId,
    PseudonymEntry, Result, Rule, RuleId, RunId, RunRecord, RunStatus,
};
use async_trait::async_trait;
use serde_json::{Map, Value};

/// One source row, column name to JSON value
pub type Record = Map<String, Value>;

/// Keyset-paginated read of one batch
#[derive(Debug, Clone)]
pub struct BatchQuery<'a> {
    /// Table to read
    pub table: &'a str,
    /// Column rows are ordered by
    pub key_column: &'a ColumnDescriptor,
    /// Only rows with a key strictly greater than this
    pub after: Option<&'a Value>,
    /// Maximum number of rows
    pub limit: usize,
}

/// How a batch is written back to the source connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Create the table if needed (all text columns) and upsert by key
    CreateAndUpsert,
    /// Update existing rows of the source table by key
    UpdateInPlace,
}

/// Destination of a batch write
#[derive(Debug, Clone)]
pub struct WriteTarget {
    /// Destination table
    pub table: String,
    /// Key column the upsert/update is keyed by
    pub key_column: ColumnDescriptor,
    /// Columns written, in order (includes the key column)
    pub columns: Vec<ColumnDescriptor>,
    /// Write mode
    pub mode: WriteMode,
}

/// One row-level write
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Insert-or-replace (or update in place) the row
    Upsert(Record),
    /// Remove the row with this key
    Delete(Value),
}

/// Outcome of a committed batch write
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchWriteResult {
    /// Rows upserted or updated
    pub written: usize,
    /// Rows deleted
    pub deleted: usize,
}

/// Capability interface of a source database
///
/// Every method acquires a pooled connection for its own duration only, so a
/// handle is always returned to the pool on every exit path.
#[async_trait]
pub trait SourceBackend: Send + Sync {
    /// Backend kind
    fn kind(&self) -> BackendKind;

    /// Opens a connection and runs a trivial query
    ///
    /// # Errors
    ///
    /// `Connection` if unreachable or credentials are rejected, `Timeout` if
    /// no pooled connection became free in time.
    async fn test_connection(&self) -> Result<()>;

    /// User table names in a stable order
    async fn list_tables(&self) -> Result<Vec<String>>;

    /// Columns of a table in ordinal order
    ///
    /// # Errors
    ///
    /// `NotFound` if the table does not exist.
    async fn list_columns(&self, table: &str) -> Result<Vec<ColumnDescriptor>>;

    /// Backend row address for tables without a unique stored column
    ///
    /// The returned column is marked as a row locator: reads project it under
    /// its name and writes address rows through it.
    async fn row_locator(&self, _table: &str) -> Result<Option<ColumnDescriptor>> {
        Ok(None)
    }

    /// Up to `limit` distinct non-NULL values of a column, rendered as text
    async fn sample_values(&self, table: &str, column: &str, limit: usize) -> Result<Vec<String>>;

    /// Reads the next batch ordered by the key column
    async fn read_batch(&self, query: &BatchQuery<'_>) -> Result<Vec<Record>>;

    /// Applies all operations atomically: either every op commits or none does
    ///
    /// Writes are keyed by the source row identifier, so replaying a batch
    /// leaves the destination unchanged.
    async fn write_batch(&self, target: &WriteTarget, ops: &[WriteOp])
        -> Result<BatchWriteResult>;
}

/// Connection, rule and field mapping catalog
#[async_trait]
pub trait CatalogStorage: Send + Sync {
    /// Inserts or replaces a connection descriptor
    async fn save_connection(&self, descriptor: &ConnectionDescriptor) -> Result<()>;

    /// Loads a connection descriptor
    async fn load_connection(&self, id: &ConnectionId) -> Result<Option<ConnectionDescriptor>>;

    /// All connection descriptors ordered by id
    async fn list_connections(&self) -> Result<Vec<ConnectionDescriptor>>;

    /// Deletes a connection descriptor, returning whether it existed
    async fn delete_connection(&self, id: &ConnectionId) -> Result<bool>;

    /// Inserts or replaces a rule
    async fn save_rule(&self, rule: &Rule) -> Result<()>;

    /// Loads a rule
    async fn load_rule(&self, id: &RuleId) -> Result<Option<Rule>>;

    /// All rules ordered by id
    async fn list_rules(&self) -> Result<Vec<Rule>>;

    /// Deletes a rule, returning whether it existed
    async fn delete_rule(&self, id: &RuleId) -> Result<bool>;

    /// Inserts or replaces a field mapping
    async fn save_mapping(&self, mapping: &FieldMapping) -> Result<()>;

    /// Loads a field mapping
    async fn load_mapping(&self, id: &MappingId) -> Result<Option<FieldMapping>>;

    /// All field mappings ordered by id
    async fn list_mappings(&self) -> Result<Vec<FieldMapping>>;
}

/// Run record persistence, checkpoint included
#[async_trait]
pub trait RunStorage: Send + Sync {
    /// Inserts or replaces a run record
    async fn save_run(&self, run: &RunRecord) -> Result<()>;

    /// Loads a run record
    async fn load_run(&self, id: &RunId) -> Result<Option<RunRecord>>;

    /// Most recent runs first
    async fn list_runs(&self, limit: usize) -> Result<Vec<RunRecord>>;

    /// Runs currently in a given status
    async fn runs_with_status(&self, status: RunStatus) -> Result<Vec<RunRecord>>;

    /// Whether any COMPLETED run used this connection
    async fn connection_used_by_completed_run(&self, id: &ConnectionId) -> Result<bool>;

    /// Whether any COMPLETED run used this rule
    async fn rule_used_by_completed_run(&self, id: &RuleId) -> Result<bool> {
        let completed = self.runs_with_status(RunStatus::Completed).await?;
        Ok(completed
            .iter()
            .any(|run| run.request.rule_ids.iter().any(|r| r == id)))
    }

    /// Persists the run after a committed batch
    async fn checkpoint_run(&self, run: &RunRecord) -> Result<()> {
        tracing::debug!(
            run_id = %run.id,
            rows_scanned = run.counters.rows_scanned,
            batches = run.checkpoint.as_ref().map(|c| c.batches_committed).unwrap_or(0),
            "Checkpointing run"
        );
        self.save_run(run).await
    }
}

/// Pseudonym entry persistence
///
/// Both `(domain, source_hash)` and `(domain, pseudonym)` are unique; the
/// constraints are what arbitrate concurrent allocation.
#[async_trait]
pub trait MappingStorage: Send + Sync {
    /// Entry for a source hash
    async fn find_by_source(&self, domain: &str, source_hash: &str)
        -> Result<Option<PseudonymEntry>>;

    /// Entry owning a pseudonym
    async fn find_by_pseudonym(
        &self,
        domain: &str,
        pseudonym: &str,
    ) -> Result<Option<PseudonymEntry>>;

    /// Atomic insert that does nothing if either unique key already exists.
    /// Returns whether the row was inserted.
    async fn insert_if_absent(&self, entry: &PseudonymEntry) -> Result<bool>;

    /// Number of entries in a domain
    async fn count_domain(&self, domain: &str) -> Result<u64>;

    /// Reads a setting
    async fn get_setting(&self, key: &str) -> Result<Option<String>>;

    /// Stores a setting unless one exists; returns the value now stored
    async fn put_setting_if_absent(&self, key: &str, value: &str) -> Result<String>;
}

/// Everything the control store provides
pub trait ControlStore: CatalogStorage + RunStorage + MappingStorage {}

impl<T: CatalogStorage + RunStorage + MappingStorage> ControlStore for T {}
