//! Run coordinator - dispatches runs and drives their batch loops
//!
//! A run is validated synchronously, persisted as PENDING and then executed on
//! its own task. The task owns the run record: it publishes every committed
//! batch to the [`RunTracker`] and persists counters together with the
//! checkpoint, so a resumed run continues exactly after the last committed
//! batch.

use crate::adapters::database::{BatchQuery, ControlStore};
use crate::config::{PipelineConfig, SinkMode};
use crate::core::pipeline::batch::{BatchProcessor, RunPlan};
use crate::core::pipeline::sink::Sink;
use crate::core::pipeline::summary::RunSummary;
use crate::core::registry::ConnectionRegistry;
use crate::core::retry::{with_retry, RetryPolicy};
use crate::core::schema::SchemaInspector;
use crate::core::tracker::RunTracker;
use crate::deidentification::audit::{AuditLogger, BatchAudit};
use crate::deidentification::{DeidentificationConfig, RuleEngine};
use crate::domain::run::INTERRUPTED_DETAIL;
use crate::domain::{
    Checkpoint, DeidError, FieldMapping, MappingId, PseudonymFormat, Result, RunId, RunRecord,
    RunRequest, RunStatus,
};
use chrono::Utc;
use futures::{FutureExt, StreamExt};
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

/// Id of the mapping used for the patient id field when none is selected
pub const PATIENT_ID_MAPPING: &str = "patient-id";

/// Failure detail recorded when a run task panics
pub const PANIC_DETAIL: &str = "Internal error: the run stopped unexpectedly";

/// How a batch loop ended
enum LoopEnd {
    Finished,
    Cancelled,
}

struct ActiveRun {
    cancel: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

/// Dispatches, resumes and cancels runs
pub struct RunCoordinator {
    store: Arc<dyn ControlStore>,
    registry: Arc<ConnectionRegistry>,
    inspector: Arc<SchemaInspector>,
    engine: Arc<RuleEngine>,
    tracker: Arc<RunTracker>,
    audit: Arc<AuditLogger>,
    pipeline: PipelineConfig,
    deidentification: DeidentificationConfig,
    retry: RetryPolicy,
    active: Mutex<HashMap<RunId, ActiveRun>>,
}

impl RunCoordinator {
    /// Create a coordinator
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn ControlStore>,
        registry: Arc<ConnectionRegistry>,
        inspector: Arc<SchemaInspector>,
        engine: Arc<RuleEngine>,
        tracker: Arc<RunTracker>,
        audit: Arc<AuditLogger>,
        pipeline: PipelineConfig,
        deidentification: DeidentificationConfig,
    ) -> Self {
        let retry = RetryPolicy::from(&pipeline.retry);
        Self {
            store,
            registry,
            inspector,
            engine,
            tracker,
            audit,
            pipeline,
            deidentification,
            retry,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Validates a request, persists it as PENDING and starts it
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown connection, table, column, rule or mapping;
    /// `Validation` for requests the selected sink cannot carry out. Nothing is
    /// persisted when validation fails.
    pub async fn dispatch(self: &Arc<Self>, request: RunRequest) -> Result<RunId> {
        if request.table.trim().is_empty() {
            return Err(DeidError::Validation("A table must be selected".to_string()));
        }
        if request.patient_id_field.trim().is_empty() {
            return Err(DeidError::Validation(
                "A patient id field must be selected".to_string(),
            ));
        }
        if request.rule_ids.is_empty() {
            return Err(DeidError::Validation(
                "At least one rule must be selected".to_string(),
            ));
        }

        self.registry.get(&request.connection_id).await?;
        self.check_destination(&request).await?;
        let schema = self
            .inspector
            .table_schema(&request.connection_id, &request.table)
            .await?;
        let rules = self.engine.resolve(&request.rule_ids).await?;
        let mappings = self.run_mappings(&request).await?;
        RunPlan::build(&schema, &request, rules, &mappings, self.pipeline.sink.mode)?;

        let record = RunRecord::pending(RunId::generate(), request, mappings);
        let id = record.id;
        with_retry(&self.retry, "save_run", || self.store.save_run(&record)).await?;

        tracing::info!(
            run_id = %id,
            connection = %record.request.connection_id,
            table = %record.request.table,
            rules = record.request.rule_ids.len(),
            "Run dispatched"
        );

        self.spawn(record).await;
        Ok(id)
    }

    /// Restarts a FAILED run after its last committed batch
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown run, `Validation` when the run is active or
    /// not FAILED.
    pub async fn resume(self: &Arc<Self>, id: &RunId) -> Result<()> {
        if self.active.lock().await.contains_key(id) {
            return Err(DeidError::Validation(format!("Run {id} is already running")));
        }

        let mut record = self
            .store
            .load_run(id)
            .await?
            .ok_or_else(|| DeidError::NotFound(format!("Run '{id}' not found")))?;
        record.prepare_resume()?;
        with_retry(&self.retry, "save_run", || self.store.save_run(&record)).await?;

        tracing::info!(
            run_id = %id,
            batches_committed = record.checkpoint.as_ref().map(|c| c.batches_committed).unwrap_or(0),
            "Run resumed"
        );

        self.spawn(record).await;
        Ok(())
    }

    /// Asks an active run to stop after its current batch
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown run, `Validation` for a run that is not
    /// executing in this process.
    pub async fn cancel(&self, id: &RunId) -> Result<()> {
        if let Some(active) = self.active.lock().await.get(id) {
            active.cancel.send_replace(true);
            tracing::info!(run_id = %id, "Cancellation requested");
            return Ok(());
        }

        let record = self.tracker.get(id).await?;
        Err(DeidError::Validation(format!(
            "Run {id} is {} and cannot be cancelled",
            record.status
        )))
    }

    /// Waits for a run to reach a terminal status
    pub async fn wait(&self, id: &RunId) -> Result<RunRecord> {
        let mut updates = self.tracker.subscribe(id).await?;
        let mut last = None;
        while let Some(snapshot) = updates.next().await {
            last = Some(snapshot);
        }

        match last {
            Some(record) if record.status.is_terminal() => Ok(record),
            _ => self.tracker.get(id).await,
        }
    }

    /// Marks runs left RUNNING or PENDING by a previous process as FAILED
    ///
    /// Such runs keep their checkpoint and can be resumed.
    pub async fn recover_interrupted(&self) -> Result<usize> {
        let mut recovered = 0;
        for status in [RunStatus::Running, RunStatus::Pending] {
            for mut run in self.store.runs_with_status(status).await? {
                if self.active.lock().await.contains_key(&run.id) {
                    continue;
                }
                run.mark_failed(INTERRUPTED_DETAIL);
                self.store.save_run(&run).await?;
                tracing::warn!(run_id = %run.id, previous = %status, "Marked interrupted run as FAILED");
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    /// Cancels every active run and waits up to `timeout` for them to stop
    pub async fn shutdown(&self, timeout: Duration) {
        let handles: Vec<JoinHandle<()>> = {
            let mut active = self.active.lock().await;
            active
                .values_mut()
                .filter_map(|run| {
                    run.cancel.send_replace(true);
                    run.handle.take()
                })
                .collect()
        };
        if handles.is_empty() {
            return;
        }

        tracing::info!(runs = handles.len(), "Waiting for active runs to stop");
        if tokio::time::timeout(timeout, futures::future::join_all(handles))
            .await
            .is_err()
        {
            tracing::warn!("Active runs did not stop in time; they will be marked interrupted on next start");
        }
    }

    /// Number of runs executing in this process
    pub async fn active_runs(&self) -> usize {
        self.active.lock().await.len()
    }

    /// A separate destination only makes sense for a sink that creates tables
    async fn check_destination(&self, request: &RunRequest) -> Result<()> {
        let Some(destination) = &request.destination_connection_id else {
            return Ok(());
        };
        if self.pipeline.sink.mode != SinkMode::NewTable {
            return Err(DeidError::Validation(
                "A destination connection requires the new_table sink".to_string(),
            ));
        }
        self.registry.get(destination).await?;
        Ok(())
    }

    async fn run_mappings(&self, request: &RunRequest) -> Result<Vec<FieldMapping>> {
        let mut mappings = Vec::with_capacity(request.mapping_ids.len());
        for id in &request.mapping_ids {
            mappings.push(self.engine.mappings().field_mapping(id).await?);
        }

        if mappings.is_empty() && self.deidentification.pseudonymize_patient_id {
            let format = match &request.patient_id_format {
                Some(template) => PseudonymFormat::from_template(template)?,
                None => PseudonymFormat::Opaque,
            };
            mappings.push(FieldMapping {
                id: MappingId::new(PATIENT_ID_MAPPING).map_err(DeidError::Validation)?,
                name: "Patient identifier".to_string(),
                field: None,
                domain: format!("{}.{}", request.table, request.patient_id_field),
                format,
            });
        }

        Ok(mappings)
    }

    async fn spawn(self: &Arc<Self>, record: RunRecord) {
        let id = record.id;
        let (cancel, cancel_rx) = watch::channel(false);
        self.active
            .lock()
            .await
            .insert(id, ActiveRun { cancel, handle: None });

        let updates = self.tracker.track(record.clone()).await;
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let outcome = AssertUnwindSafe(this.execute(record, &updates, cancel_rx))
                .catch_unwind()
                .await;
            if let Err(panic) = outcome {
                this.fail_panicked(&updates, panic).await;
            }
        });

        if let Some(active) = self.active.lock().await.get_mut(&id) {
            active.handle = Some(handle);
        }
    }

    async fn execute(
        &self,
        mut record: RunRecord,
        updates: &watch::Sender<RunRecord>,
        cancel: watch::Receiver<bool>,
    ) {
        record.mark_running();
        if let Err(e) = with_retry(&self.retry, "save_run", || self.store.save_run(&record)).await {
            tracing::error!(run_id = %record.id, error = %e, "Failed to persist run start");
        }
        updates.send_replace(record.clone());

        match self.run_batches(&mut record, updates, cancel).await {
            Ok(LoopEnd::Finished) => record.mark_completed(),
            Ok(LoopEnd::Cancelled) => record.mark_cancelled(),
            Err(e) => {
                tracing::error!(run_id = %record.id, error = %e, "Run failed");
                record.mark_failed(e.public_message());
            }
        }

        self.finish(record, updates).await;
    }

    /// Persists the terminal record and releases the run
    async fn finish(&self, record: RunRecord, updates: &watch::Sender<RunRecord>) {
        if let Err(e) = with_retry(&self.retry, "save_run", || self.store.save_run(&record)).await {
            tracing::error!(run_id = %record.id, error = %e, "Failed to persist final run state");
        }
        updates.send_replace(record.clone());
        RunSummary::from_record(&record).log_summary();

        self.tracker.untrack(&record.id).await;
        self.active.lock().await.remove(&record.id);
    }

    /// A panic in a run task fails the run from its last published snapshot,
    /// which carries the last committed checkpoint
    async fn fail_panicked(&self, updates: &watch::Sender<RunRecord>, panic: Box<dyn Any + Send>) {
        let mut record = updates.borrow().clone();
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        tracing::error!(run_id = %record.id, panic = %message, "Run task panicked");

        if !record.status.is_terminal() {
            record.mark_failed(PANIC_DETAIL);
        }
        self.finish(record, updates).await;
    }

    async fn run_batches(
        &self,
        record: &mut RunRecord,
        updates: &watch::Sender<RunRecord>,
        cancel: watch::Receiver<bool>,
    ) -> Result<LoopEnd> {
        let request = record.request.clone();
        let backend = self.registry.resolve(&request.connection_id).await?;
        let schema = self
            .inspector
            .table_schema(&request.connection_id, &request.table)
            .await?;
        let rules = self.engine.resolve(&request.rule_ids).await?;
        let plan = RunPlan::build(&schema, &request, rules, &record.mappings, self.pipeline.sink.mode)?;
        let destination = match &request.destination_connection_id {
            Some(id) => self.registry.resolve(id).await?,
            None => backend.clone(),
        };
        let sink = Sink::for_run(&self.pipeline.sink, destination, &plan, &schema, &record.id)?;
        let processor = BatchProcessor::new(
            self.engine.clone(),
            self.deidentification.on_row_error,
            self.audit.is_enabled(),
        );

        let (mut after, mut batch) = match &record.checkpoint {
            Some(cp) if cp.key_column != plan.key_column.name => {
                return Err(DeidError::Validation(format!(
                    "Checkpoint key column '{}' no longer matches batch key '{}'",
                    cp.key_column, plan.key_column.name
                )));
            }
            Some(cp) => (Some(cp.last_key.clone()), cp.batches_committed),
            None => (None, 0),
        };

        let run_id = record.id.to_string();
        tracing::info!(
            run_id = %run_id,
            sink = %sink.describe(),
            key_column = %plan.key_column.name,
            columns = plan.fields.len(),
            batches_committed = batch,
            "Processing table"
        );

        loop {
            if *cancel.borrow() {
                return Ok(LoopEnd::Cancelled);
            }

            let started = Instant::now();
            let query = BatchQuery {
                table: &plan.table,
                key_column: &plan.key_column,
                after: after.as_ref(),
                limit: self.pipeline.batch_size,
            };
            let rows = with_retry(&self.retry, "read_batch", || backend.read_batch(&query)).await?;
            if rows.is_empty() {
                break;
            }
            let full = rows.len() >= self.pipeline.batch_size;

            let outcome = processor.process(&plan, rows).await?;
            let Some(last_key) = outcome.last_key.clone() else {
                break;
            };

            batch += 1;
            let written = with_retry(&self.retry, "write_batch", || {
                sink.write(batch, &outcome.ops)
            })
            .await?;

            if self.audit.is_enabled() {
                let entry = BatchAudit {
                    run_id: &run_id,
                    table: &plan.table,
                    batch,
                    rows_dropped: outcome.rows_dropped,
                    processing_time_ms: started.elapsed().as_millis() as u64,
                    changes: &outcome.changes,
                };
                if let Err(e) = self.audit.log_batch(&entry) {
                    tracing::warn!(run_id = %run_id, batch = batch, error = %e, "Failed to write audit entry");
                }
            }

            record.record_batch(
                &outcome.counters,
                outcome.errors,
                Checkpoint {
                    key_column: plan.key_column.name.clone(),
                    last_key: last_key.clone(),
                    batches_committed: batch,
                    updated_at: Utc::now(),
                },
                self.pipeline.max_error_log,
            );
            let committed: &RunRecord = record;
            with_retry(&self.retry, "checkpoint_run", || self.store.checkpoint_run(committed)).await?;
            updates.send_replace(record.clone());

            crate::log_batch_committed!(
                run_id,
                batch,
                outcome.counters.rows_scanned,
                outcome.counters.rows_modified
            );
            tracing::debug!(
                run_id = %run_id,
                batch = batch,
                written = written.written,
                deleted = written.deleted,
                "Sink write"
            );

            after = Some(last_key);
            if !full {
                break;
            }
        }

        Ok(LoopEnd::Finished)
    }
}
