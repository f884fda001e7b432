//! Output sinks
//!
//! Every sink write is idempotent per batch: table sinks upsert or update by
//! key, and the JSONL sink replaces the file named after the batch sequence.
//! Re-running a batch after a crash therefore converges on the same output.

use crate::adapters::database::{
    BatchWriteResult, SourceBackend, WriteMode, WriteOp, WriteTarget,
};
use crate::config::{SinkConfig, SinkMode};
use crate::core::pipeline::batch::RunPlan;
use crate::domain::{DeidError, Result, RunId, TableSchema};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Destination of one run's batches
pub enum Sink {
    /// A table on the source or destination connection
    Table {
        /// Connection the rows are written to
        backend: Arc<dyn SourceBackend>,
        /// Table, key and columns
        target: WriteTarget,
    },
    /// One JSON Lines file per batch
    Jsonl {
        /// Output directory
        dir: PathBuf,
        /// File name prefix, `<run id>-<table>`
        prefix: String,
    },
}

impl Sink {
    /// Chooses the sink for a run
    pub fn for_run(
        config: &SinkConfig,
        backend: Arc<dyn SourceBackend>,
        plan: &RunPlan,
        schema: &TableSchema,
        run_id: &RunId,
    ) -> Result<Self> {
        let columns = plan.write_columns(schema);
        Ok(match config.mode {
            SinkMode::NewTable => {
                if config.table_suffix.is_empty() {
                    return Err(DeidError::Configuration(
                        "new_table sink needs a non-empty table suffix".to_string(),
                    ));
                }
                Sink::Table {
                    backend,
                    target: WriteTarget {
                        table: format!("{}{}", plan.table, config.table_suffix),
                        key_column: plan.key_column.clone(),
                        columns,
                        mode: WriteMode::CreateAndUpsert,
                    },
                }
            }
            SinkMode::InPlace => Sink::Table {
                backend,
                target: WriteTarget {
                    table: plan.table.clone(),
                    key_column: plan.key_column.clone(),
                    columns,
                    mode: WriteMode::UpdateInPlace,
                },
            },
            SinkMode::Jsonl => Sink::Jsonl {
                dir: config.output_dir.clone(),
                prefix: format!("{}-{}", run_id, file_safe(&plan.table)),
            },
        })
    }

    /// Where rows go, for logs
    pub fn describe(&self) -> String {
        match self {
            Sink::Table { target, .. } => match target.mode {
                WriteMode::CreateAndUpsert => format!("table {}", target.table),
                WriteMode::UpdateInPlace => format!("table {} (in place)", target.table),
            },
            Sink::Jsonl { dir, prefix } => format!("{}/{prefix}-*.jsonl", dir.display()),
        }
    }

    /// Writes one batch
    pub async fn write(&self, batch: u64, ops: &[WriteOp]) -> Result<BatchWriteResult> {
        match self {
            Sink::Table { backend, target } => {
                if ops.is_empty() {
                    return Ok(BatchWriteResult::default());
                }
                backend.write_batch(target, ops).await
            }
            Sink::Jsonl { dir, prefix } => write_jsonl(dir, prefix, batch, ops).await,
        }
    }
}

/// Path of the file for one batch
pub fn jsonl_path(dir: &Path, prefix: &str, batch: u64) -> PathBuf {
    dir.join(format!("{prefix}-{batch:06}.jsonl"))
}

async fn write_jsonl(dir: &Path, prefix: &str, batch: u64, ops: &[WriteOp]) -> Result<BatchWriteResult> {
    tokio::fs::create_dir_all(dir).await?;

    let mut buffer = Vec::new();
    let mut written = 0;
    for op in ops {
        if let WriteOp::Upsert(record) = op {
            serde_json::to_writer(&mut buffer, record)?;
            buffer.push(b'\n');
            written += 1;
        }
    }

    let path = jsonl_path(dir, prefix, batch);
    let tmp = path.with_extension("jsonl.tmp");
    tokio::fs::write(&tmp, &buffer).await?;
    tokio::fs::rename(&tmp, &path).await?;

    tracing::debug!(path = %path.display(), rows = written, "Wrote JSONL batch");
    Ok(BatchWriteResult {
        written,
        deleted: 0,
    })
}

fn file_safe(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_jsonl_batch_is_replaced_on_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let record = |name: &str| {
            let mut r = crate::adapters::database::Record::new();
            r.insert("mrn".to_string(), json!("T1"));
            r.insert("name".to_string(), json!(name));
            WriteOp::Upsert(r)
        };

        let first = write_jsonl(dir.path(), "run-patients", 1, &[record("a"), record("b")])
            .await
            .unwrap();
        assert_eq!(first.written, 2);

        write_jsonl(dir.path(), "run-patients", 1, &[record("c")])
            .await
            .unwrap();

        let contents = std::fs::read_to_string(jsonl_path(dir.path(), "run-patients", 1)).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 1);
        let row: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(row["name"], "c");
    }

    #[test]
    fn test_file_safe() {
        assert_eq!(file_safe("public.patients"), "public.patients");
        assert_eq!(file_safe("odd/name here"), "odd_name_here");
    }
}
