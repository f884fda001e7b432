//! Per-batch rule application
//!
//! A [`RunPlan`] is computed once per run from the schema snapshot and the
//! selected rules: for every column, the ordered list of steps applied to it.
//! [`BatchProcessor`] then turns a batch of source records into write
//! operations, counters and row errors.

use crate::adapters::database::{Record, WriteOp};
use crate::config::SinkMode;
use crate::deidentification::audit::FieldChange;
use crate::deidentification::rules::value_text;
use crate::deidentification::{CompiledRule, Outcome, RowErrorPolicy, RuleContext, RuleEngine};
use crate::domain::rule::DEFAULT_PLACEHOLDER;
use crate::domain::{
    ColumnDescriptor, ColumnType, DeidError, FieldMapping, PseudonymFormat, Result, RowError,
    RunCounters, RunRequest, TableSchema,
};
use serde_json::Value;
use std::sync::Arc;

/// One transformation of a column
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Index into [`RunPlan::rules`]
    Rule(usize),
    /// Pseudonymization through a field mapping
    Mapping {
        /// Mapping id, for error logs
        mapping_id: String,
        /// Pseudonym domain
        domain: String,
        /// Format for new pseudonyms
        format: PseudonymFormat,
    },
}

/// Steps for one column, in application order
#[derive(Debug, Clone)]
pub struct FieldPlan {
    /// Column name
    pub column: String,
    /// Column type, to pick a placeholder the column can hold
    pub column_type: ColumnType,
    /// Ordered steps
    pub steps: Vec<Step>,
}

/// Everything a run needs to transform rows, fixed at run start
#[derive(Debug, Clone)]
pub struct RunPlan {
    /// Source table
    pub table: String,
    /// Column used for ordering, checkpoints and idempotent writes
    pub key_column: ColumnDescriptor,
    /// Patient identifier column
    pub patient_id_field: String,
    /// Sink kind the plan was checked against
    pub sink_mode: SinkMode,
    /// Selected rules, in operator order
    pub rules: Vec<CompiledRule>,
    /// Columns with at least one step, in schema order
    pub fields: Vec<FieldPlan>,
}

impl RunPlan {
    /// Matches rules and mappings against the schema
    ///
    /// A mapping only applies to its column when no selected rule targets it.
    ///
    /// # Errors
    ///
    /// `NotFound` for a missing patient id or mapping column; `Validation` when
    /// the table has no unique batch key, nothing matches, or the sink cannot
    /// store what the plan produces.
    pub fn build(
        schema: &TableSchema,
        request: &RunRequest,
        rules: Vec<CompiledRule>,
        mappings: &[FieldMapping],
        sink_mode: SinkMode,
    ) -> Result<Self> {
        let table = schema.table.as_str();
        let patient_id_field = request.patient_id_field.as_str();

        if schema.column(patient_id_field).is_none() {
            return Err(DeidError::NotFound(format!(
                "Column '{patient_id_field}' not found in table '{table}'"
            )));
        }
        for mapping in mappings {
            let field = mapping.target_field(patient_id_field);
            if schema.column(field).is_none() {
                return Err(DeidError::NotFound(format!(
                    "Mapping '{}': column '{field}' not found in table '{table}'",
                    mapping.id
                )));
            }
        }

        let key_column = schema
            .batch_key(patient_id_field)
            .cloned()
            .ok_or_else(|| {
                DeidError::Validation(format!(
                    "Table '{table}' has no primary key or unique NOT NULL column to batch by"
                ))
            })?;

        let mut fields = Vec::new();
        for column in &schema.columns {
            let mut steps: Vec<Step> = rules
                .iter()
                .enumerate()
                .filter(|(_, rule)| rule.targets(table, column))
                .map(|(i, _)| Step::Rule(i))
                .collect();

            if steps.is_empty() {
                steps.extend(
                    mappings
                        .iter()
                        .filter(|m| m.target_field(patient_id_field) == column.name)
                        .map(|m| Step::Mapping {
                            mapping_id: m.id.to_string(),
                            domain: m.domain.clone(),
                            format: m.format.clone(),
                        }),
                );
            }

            if !steps.is_empty() {
                fields.push(FieldPlan {
                    column: column.name.clone(),
                    column_type: column.column_type,
                    steps,
                });
            }
        }

        if fields.is_empty() {
            return Err(DeidError::Validation(format!(
                "No selected rule or mapping matches a column of table '{table}'"
            )));
        }

        let plan = Self {
            table: table.to_string(),
            key_column,
            patient_id_field: patient_id_field.to_string(),
            sink_mode,
            rules,
            fields,
        };
        if sink_mode == SinkMode::InPlace {
            plan.check_in_place(schema)?;
        }
        Ok(plan)
    }

    /// In-place writes keep the batch key and the column types
    fn check_in_place(&self, schema: &TableSchema) -> Result<()> {
        for field in &self.fields {
            if field.column == self.key_column.name {
                return Err(DeidError::Validation(format!(
                    "The in_place sink cannot rewrite the batch key column '{}'; use new_table or jsonl",
                    field.column
                )));
            }

            let Some(column) = schema.column(&field.column) else {
                continue;
            };
            if column.column_type == ColumnType::Text || column.column_type == ColumnType::Unknown {
                continue;
            }
            for step in &field.steps {
                let produces_text = match step {
                    Step::Rule(i) => self.rules[*i].produces_text(),
                    Step::Mapping { .. } => true,
                };
                if produces_text {
                    return Err(DeidError::Validation(format!(
                        "The in_place sink cannot store text output in {} column '{}'; use new_table or jsonl",
                        column.column_type, column.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Columns the sink writes: every column, or for in-place writes the key
    /// plus the transformed columns. A row locator key comes first.
    pub fn write_columns(&self, schema: &TableSchema) -> Vec<ColumnDescriptor> {
        let mut columns: Vec<ColumnDescriptor> = match self.sink_mode {
            SinkMode::InPlace => schema
                .columns
                .iter()
                .filter(|c| {
                    c.name == self.key_column.name || self.fields.iter().any(|f| f.column == c.name)
                })
                .cloned()
                .collect(),
            SinkMode::NewTable | SinkMode::Jsonl => schema.columns.clone(),
        };
        if self.key_column.row_locator {
            columns.insert(0, self.key_column.clone());
        }
        columns
    }

    fn step_label(&self, step: &Step) -> String {
        match step {
            Step::Rule(i) => self.rules[*i].id().to_string(),
            Step::Mapping { mapping_id, .. } => mapping_id.clone(),
        }
    }
}

/// What one batch produced
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Writes for the sink, in row order
    pub ops: Vec<WriteOp>,
    /// Counters for this batch only
    pub counters: RunCounters,
    /// Row-level failures
    pub errors: Vec<RowError>,
    /// Changed fields, for the audit log
    pub changes: Vec<FieldChange>,
    /// Rows removed by row suppression
    pub rows_dropped: usize,
    /// Key of the last row read
    pub last_key: Option<Value>,
}

/// Applies a run plan to batches of records
pub struct BatchProcessor {
    engine: Arc<RuleEngine>,
    on_row_error: RowErrorPolicy,
    collect_changes: bool,
}

impl BatchProcessor {
    /// Create a processor
    pub fn new(engine: Arc<RuleEngine>, on_row_error: RowErrorPolicy, collect_changes: bool) -> Self {
        Self {
            engine,
            on_row_error,
            collect_changes,
        }
    }

    /// Transforms one batch
    ///
    /// # Errors
    ///
    /// Only systemic errors (mapping store unavailable) are returned; row-level
    /// failures are recorded in the outcome.
    pub async fn process(&self, plan: &RunPlan, rows: Vec<Record>) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();

        for mut record in rows {
            let row_key = record
                .get(&plan.key_column.name)
                .cloned()
                .unwrap_or(Value::Null);
            let subject = record.get(&plan.patient_id_field).and_then(value_text);

            let mut changed = false;
            let mut failed = false;
            let mut dropped = false;

            'fields: for field in &plan.fields {
                let Some(original) = record.get(&field.column).cloned() else {
                    continue;
                };
                if original.is_null() {
                    continue;
                }

                let ctx = RuleContext {
                    table: &plan.table,
                    column: &field.column,
                    subject: subject.as_deref(),
                };

                let mut current = original.clone();
                let mut applied = Vec::with_capacity(field.steps.len());
                for step in &field.steps {
                    match self.apply_step(plan, step, &current, &ctx).await {
                        Ok(Outcome::Value(next)) => {
                            current = next;
                            applied.push(plan.step_label(step));
                        }
                        Ok(Outcome::DropRow) => {
                            dropped = true;
                            break 'fields;
                        }
                        Err(e) if e.is_row_level() => {
                            failed = true;
                            outcome.errors.push(RowError {
                                row_key: row_key.clone(),
                                column: field.column.clone(),
                                rule_id: match step {
                                    Step::Rule(i) => Some(plan.rules[*i].id().clone()),
                                    Step::Mapping { .. } => None,
                                },
                                kind: e.kind().to_string(),
                                message: e.public_message(),
                            });
                            current = match self.on_row_error {
                                RowErrorPolicy::KeepOriginal => original.clone(),
                                RowErrorPolicy::Redact => redacted(field.column_type),
                            };
                            applied.push(plan.step_label(step));
                            break;
                        }
                        Err(e) => return Err(e),
                    }
                }

                if current != original {
                    changed = true;
                    *outcome
                        .counters
                        .fields_modified
                        .entry(field.column.clone())
                        .or_insert(0) += 1;
                    if self.collect_changes {
                        outcome.changes.push(FieldChange {
                            row_key: row_key.clone(),
                            column: field.column.clone(),
                            rule_ids: applied,
                            original,
                        });
                    }
                    record.insert(field.column.clone(), current);
                }
            }

            outcome.counters.rows_scanned += 1;
            if failed {
                outcome.counters.rows_failed += 1;
            }

            if dropped {
                outcome.rows_dropped += 1;
                outcome.counters.rows_modified += 1;
                if plan.sink_mode == SinkMode::InPlace {
                    outcome.ops.push(WriteOp::Delete(row_key.clone()));
                }
            } else {
                if changed {
                    outcome.counters.rows_modified += 1;
                }
                if changed || plan.sink_mode != SinkMode::InPlace {
                    outcome.ops.push(WriteOp::Upsert(record));
                }
            }

            outcome.last_key = Some(row_key);
        }

        Ok(outcome)
    }

    async fn apply_step(
        &self,
        plan: &RunPlan,
        step: &Step,
        value: &Value,
        ctx: &RuleContext<'_>,
    ) -> Result<Outcome> {
        match step {
            Step::Rule(i) => self.engine.apply(&plan.rules[*i], value, ctx).await,
            Step::Mapping { domain, format, .. } => {
                let text = value_text(value).unwrap_or_default();
                let pseudonym = self
                    .engine
                    .mappings()
                    .lookup_or_create(domain, &text, format)
                    .await?;
                Ok(Outcome::Value(Value::String(pseudonym)))
            }
        }
    }
}

/// Replacement for a value whose rule failed under the redact policy.
/// Columns that cannot hold text get NULL.
fn redacted(column_type: ColumnType) -> Value {
    match column_type {
        ColumnType::Text | ColumnType::Unknown => Value::String(DEFAULT_PLACEHOLDER.to_string()),
        ColumnType::Numeric | ColumnType::Date | ColumnType::Boolean => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        ColumnSelector, ConnectionId, MappingId, Rule, RuleId, RuleKind, SuppressScope,
    };

    fn schema() -> TableSchema {
        TableSchema {
            table: "patients".to_string(),
            columns: vec![
                ColumnDescriptor::new("id", ColumnType::Numeric).primary_key(),
                ColumnDescriptor::new("mrn", ColumnType::Text),
                ColumnDescriptor::new("dob", ColumnType::Date),
                ColumnDescriptor::new("name", ColumnType::Text),
                ColumnDescriptor::new("age", ColumnType::Numeric),
            ],
            row_locator: None,
        }
    }

    fn request(rule_ids: &[&str]) -> RunRequest {
        RunRequest {
            connection_id: ConnectionId::new("clinic").unwrap(),
            table: "patients".to_string(),
            patient_id_field: "mrn".to_string(),
            rule_ids: rule_ids.iter().map(|r| RuleId::new(*r).unwrap()).collect(),
            mapping_ids: vec![],
            patient_id_format: None,
            name: None,
            destination_connection_id: None,
        }
    }

    fn compiled(id: &str, kind: RuleKind, column: &str) -> CompiledRule {
        CompiledRule::compile(Rule {
            id: RuleId::new(id).unwrap(),
            name: String::new(),
            description: String::new(),
            kind,
            applies_to: vec![],
            selector: ColumnSelector {
                tables: vec![],
                columns: vec![column.to_string()],
            },
        })
        .unwrap()
    }

    fn mask_name() -> CompiledRule {
        compiled(
            "mask-name",
            RuleKind::Mask {
                keep_prefix: 0,
                keep_suffix: 2,
                mask_char: '*',
                mask_width: 4,
                preserve_length: false,
            },
            "name",
        )
    }

    fn patient_mapping() -> FieldMapping {
        FieldMapping {
            id: MappingId::new("patient-id").unwrap(),
            name: String::new(),
            field: None,
            domain: "patients.mrn".to_string(),
            format: PseudonymFormat::Opaque,
        }
    }

    #[test]
    fn test_plan_orders_steps_and_adds_mapping() {
        let rules = vec![
            mask_name(),
            compiled(
                "redact-name",
                RuleKind::Redact {
                    placeholder: "[X]".into(),
                    patterns: vec![],
                },
                "name",
            ),
        ];
        let plan = RunPlan::build(
            &schema(),
            &request(&["mask-name", "redact-name"]),
            rules,
            &[patient_mapping()],
            SinkMode::NewTable,
        )
        .unwrap();

        assert_eq!(plan.key_column.name, "id");
        let columns: Vec<&str> = plan.fields.iter().map(|f| f.column.as_str()).collect();
        assert_eq!(columns, vec!["mrn", "name"]);
        assert_eq!(plan.fields[1].steps, vec![Step::Rule(0), Step::Rule(1)]);
        assert!(matches!(plan.fields[0].steps[0], Step::Mapping { .. }));
    }

    #[test]
    fn test_rule_on_patient_field_replaces_mapping() {
        let rules = vec![compiled(
            "drop-mrn",
            RuleKind::Suppress {
                scope: SuppressScope::Field,
            },
            "mrn",
        )];
        let plan = RunPlan::build(
            &schema(),
            &request(&["drop-mrn"]),
            rules,
            &[patient_mapping()],
            SinkMode::NewTable,
        )
        .unwrap();
        assert_eq!(plan.fields.len(), 1);
        assert_eq!(plan.fields[0].steps, vec![Step::Rule(0)]);
    }

    #[test]
    fn test_missing_patient_field() {
        let mut req = request(&[]);
        req.patient_id_field = "ssn".to_string();
        let err = RunPlan::build(&schema(), &req, vec![mask_name()], &[], SinkMode::NewTable)
            .unwrap_err();
        assert!(matches!(err, DeidError::NotFound(ref m) if m.contains("ssn")));
    }

    #[test]
    fn test_nothing_matches() {
        let rules = vec![compiled(
            "mask-phone",
            RuleKind::Suppress {
                scope: SuppressScope::Field,
            },
            "phone",
        )];
        let err = RunPlan::build(&schema(), &request(&["mask-phone"]), rules, &[], SinkMode::NewTable)
            .unwrap_err();
        assert!(matches!(err, DeidError::Validation(_)));
    }

    #[test]
    fn test_in_place_rejects_text_into_numeric() {
        let rules = vec![compiled(
            "mask-age",
            RuleKind::Mask {
                keep_prefix: 0,
                keep_suffix: 0,
                mask_char: '*',
                mask_width: 2,
                preserve_length: false,
            },
            "age",
        )];
        let err = RunPlan::build(&schema(), &request(&["mask-age"]), rules, &[], SinkMode::InPlace)
            .unwrap_err();
        assert!(matches!(err, DeidError::Validation(ref m) if m.contains("age")));
    }

    #[test]
    fn test_in_place_write_columns() {
        let plan = RunPlan::build(
            &schema(),
            &request(&["mask-name"]),
            vec![mask_name()],
            &[],
            SinkMode::InPlace,
        )
        .unwrap();
        let names: Vec<String> = plan
            .write_columns(&schema())
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["id", "name"]);
    }

    #[test]
    fn test_table_without_unique_key_is_rejected() {
        let table = TableSchema {
            table: "encounters".to_string(),
            columns: vec![
                ColumnDescriptor::new("mrn", ColumnType::Text),
                ColumnDescriptor::new("name", ColumnType::Text),
            ],
            row_locator: None,
        };
        let mut req = request(&["mask-name"]);
        req.table = "encounters".to_string();
        let err = RunPlan::build(&table, &req, vec![mask_name()], &[], SinkMode::NewTable)
            .unwrap_err();
        assert!(matches!(err, DeidError::Validation(ref m) if m.contains("unique")));
    }

    #[test]
    fn test_row_locator_leads_write_columns() {
        let table = TableSchema {
            table: "encounters".to_string(),
            columns: vec![
                ColumnDescriptor::new("mrn", ColumnType::Text),
                ColumnDescriptor::new("name", ColumnType::Text),
            ],
            row_locator: Some(
                ColumnDescriptor::new("source_rowid", ColumnType::Numeric).row_locator(),
            ),
        };
        let mut req = request(&["mask-name"]);
        req.table = "encounters".to_string();
        for (mode, expected) in [
            (SinkMode::NewTable, vec!["source_rowid", "mrn", "name"]),
            (SinkMode::InPlace, vec!["source_rowid", "name"]),
        ] {
            let plan = RunPlan::build(&table, &req, vec![mask_name()], &[], mode).unwrap();
            assert_eq!(plan.key_column.name, "source_rowid");
            let names: Vec<String> = plan
                .write_columns(&table)
                .into_iter()
                .map(|c| c.name)
                .collect();
            assert_eq!(names, expected);
        }
    }

    #[test]
    fn test_redacted_placeholder_only_in_text_columns() {
        assert_eq!(redacted(ColumnType::Text), Value::String(DEFAULT_PLACEHOLDER.to_string()));
        assert_eq!(redacted(ColumnType::Unknown), Value::String(DEFAULT_PLACEHOLDER.to_string()));
        assert_eq!(redacted(ColumnType::Date), Value::Null);
        assert_eq!(redacted(ColumnType::Numeric), Value::Null);
        assert_eq!(redacted(ColumnType::Boolean), Value::Null);
    }
}
