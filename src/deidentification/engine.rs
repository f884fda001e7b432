//! Rule catalog and rule application

use crate::adapters::database::ControlStore;
use crate::core::mapping::MappingStore;
use crate::deidentification::rules::{
    generalize, mask, offset_days, redact, shift_value, suppress, value_text, MaskParams,
    Outcome, DEFAULT_DATE_SHIFT_DOMAIN,
};
use crate::domain::{ColumnDescriptor, DeidError, Result, Rule, RuleId, RuleKind};
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;

/// A validated rule with its selector and redaction patterns compiled
#[derive(Debug, Clone)]
pub struct CompiledRule {
    /// The catalog rule
    pub rule: Rule,
    tables: Vec<Regex>,
    columns: Vec<Regex>,
    patterns: Vec<Regex>,
}

impl CompiledRule {
    /// Validates parameters and compiles every pattern
    ///
    /// # Errors
    ///
    /// `InvalidRuleParameter` naming the rule and the offending parameter.
    pub fn compile(rule: Rule) -> Result<Self> {
        let context = |e: DeidError| match e {
            DeidError::InvalidRuleParameter(msg) => {
                DeidError::InvalidRuleParameter(format!("Rule '{}': {msg}", rule.id))
            }
            other => other,
        };

        rule.kind.validate().map_err(context)?;
        if rule.selector.columns.is_empty() {
            return Err(context(DeidError::InvalidRuleParameter(
                "selector needs at least one column pattern".to_string(),
            )));
        }

        let tables = compile_selectors(&rule.selector.tables).map_err(context)?;
        let columns = compile_selectors(&rule.selector.columns).map_err(context)?;
        let patterns = match &rule.kind {
            RuleKind::Redact { patterns, .. } => patterns
                .iter()
                .map(|p| {
                    Regex::new(p).map_err(|e| {
                        DeidError::InvalidRuleParameter(format!("REDACT pattern '{p}': {e}"))
                    })
                })
                .collect::<Result<Vec<_>>>()
                .map_err(context)?,
            _ => Vec::new(),
        };

        Ok(Self {
            rule,
            tables,
            columns,
            patterns,
        })
    }

    /// Rule id
    pub fn id(&self) -> &RuleId {
        &self.rule.id
    }

    /// Whether the rule targets `column` of `table`
    pub fn targets(&self, table: &str, column: &ColumnDescriptor) -> bool {
        (self.tables.is_empty() || self.tables.iter().any(|re| re.is_match(table)))
            && self.columns.iter().any(|re| re.is_match(&column.name))
            && self.rule.accepts_type(column.column_type)
    }

    /// Whether the rule could produce a value that fails to fit back into a
    /// column of a different type
    pub fn produces_text(&self) -> bool {
        !matches!(self.rule.kind, RuleKind::DateShift { .. } | RuleKind::Suppress { .. })
    }
}

/// Selector patterns are anchored and case-insensitive
fn compile_selectors(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(&format!("(?i)^(?:{p})$")).map_err(|e| {
                DeidError::InvalidRuleParameter(format!("selector pattern '{p}': {e}"))
            })
        })
        .collect()
}

/// Where a value being transformed lives
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    /// Source table
    pub table: &'a str,
    /// Column name
    pub column: &'a str,
    /// The row's patient identifier before pseudonymization
    pub subject: Option<&'a str>,
}

/// Holds the rule catalog and applies rules to field values
pub struct RuleEngine {
    catalog: Arc<dyn ControlStore>,
    mappings: Arc<MappingStore>,
}

impl RuleEngine {
    /// Creates an engine over the control store catalog
    pub fn new(catalog: Arc<dyn ControlStore>, mappings: Arc<MappingStore>) -> Self {
        Self { catalog, mappings }
    }

    /// Mapping store used by PSEUDONYMIZE
    pub fn mappings(&self) -> &Arc<MappingStore> {
        &self.mappings
    }

    /// Checks a rule without storing it
    pub fn validate(rule: &Rule) -> Result<()> {
        CompiledRule::compile(rule.clone()).map(|_| ())
    }

    /// Adds a new rule
    ///
    /// # Errors
    ///
    /// `InvalidRuleParameter` for a bad rule, `Validation` if the id is taken.
    pub async fn create_rule(&self, rule: Rule) -> Result<Rule> {
        Self::validate(&rule)?;
        if self.catalog.load_rule(&rule.id).await?.is_some() {
            return Err(DeidError::Validation(format!(
                "Rule '{}' already exists",
                rule.id
            )));
        }
        self.catalog.save_rule(&rule).await?;
        tracing::info!(rule_id = %rule.id, kind = rule.kind.name(), "Rule created");
        Ok(rule)
    }

    /// Replaces an existing rule
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id, `Validation` when a completed run used it.
    pub async fn update_rule(&self, rule: Rule) -> Result<Rule> {
        Self::validate(&rule)?;
        self.get_rule(&rule.id).await?;
        self.ensure_mutable(&rule.id).await?;
        self.catalog.save_rule(&rule).await?;
        tracing::info!(rule_id = %rule.id, "Rule updated");
        Ok(rule)
    }

    /// Removes a rule
    pub async fn delete_rule(&self, id: &RuleId) -> Result<()> {
        self.get_rule(id).await?;
        self.ensure_mutable(id).await?;
        self.catalog.delete_rule(id).await?;
        tracing::info!(rule_id = %id, "Rule deleted");
        Ok(())
    }

    /// Loads one rule
    pub async fn get_rule(&self, id: &RuleId) -> Result<Rule> {
        self.catalog
            .load_rule(id)
            .await?
            .ok_or_else(|| DeidError::NotFound(format!("Rule '{id}' not found")))
    }

    /// Every catalog rule
    pub async fn list_rules(&self) -> Result<Vec<Rule>> {
        self.catalog.list_rules().await
    }

    /// Loads configured rules into the catalog
    ///
    /// Unchanged rules are skipped; changing a rule a completed run used is an
    /// error.
    pub async fn seed(&self, rules: &[Rule]) -> Result<()> {
        for rule in rules {
            Self::validate(rule)?;
            match self.catalog.load_rule(&rule.id).await? {
                Some(existing) if existing == *rule => continue,
                Some(_) => self.ensure_mutable(&rule.id).await?,
                None => {}
            }
            self.catalog.save_rule(rule).await?;
        }
        tracing::debug!(count = rules.len(), "Seeded rules");
        Ok(())
    }

    /// Loads and compiles the given rules, in order
    ///
    /// # Errors
    ///
    /// `NotFound` naming every missing id; `InvalidRuleParameter` for a stored
    /// rule that no longer compiles.
    pub async fn resolve(&self, ids: &[RuleId]) -> Result<Vec<CompiledRule>> {
        let mut compiled = Vec::with_capacity(ids.len());
        let mut missing = Vec::new();

        for id in ids {
            match self.catalog.load_rule(id).await? {
                Some(rule) => compiled.push(CompiledRule::compile(rule)?),
                None => missing.push(id.to_string()),
            }
        }

        if !missing.is_empty() {
            return Err(DeidError::NotFound(format!(
                "Rule(s) not found: {}",
                missing.join(", ")
            )));
        }
        Ok(compiled)
    }

    async fn ensure_mutable(&self, id: &RuleId) -> Result<()> {
        if self.catalog.rule_used_by_completed_run(id).await? {
            return Err(DeidError::Validation(format!(
                "Rule '{id}' is referenced by a completed run and cannot be changed"
            )));
        }
        Ok(())
    }

    /// Applies one rule to one value
    ///
    /// NULL passes through every rule untouched.
    ///
    /// # Errors
    ///
    /// Row-level `TypeMismatch`/`InvalidRuleParameter` when the value does not
    /// fit the rule; `Storage` from the mapping store.
    pub async fn apply(
        &self,
        compiled: &CompiledRule,
        value: &Value,
        ctx: &RuleContext<'_>,
    ) -> Result<Outcome> {
        if value.is_null() {
            return Ok(Outcome::Value(Value::Null));
        }

        let replaced = match &compiled.rule.kind {
            RuleKind::Redact { placeholder, .. } => redact(value, placeholder, &compiled.patterns),
            RuleKind::Mask {
                keep_prefix,
                keep_suffix,
                mask_char,
                mask_width,
                preserve_length,
            } => {
                let text = value_text(value).unwrap_or_default();
                let params = MaskParams {
                    keep_prefix: *keep_prefix,
                    keep_suffix: *keep_suffix,
                    mask_char: *mask_char,
                    mask_width: *mask_width,
                    preserve_length: *preserve_length,
                };
                Value::String(mask(&text, &params)?)
            }
            RuleKind::Generalize { granularity } => generalize(value, granularity)?,
            RuleKind::DateShift { max_days, domain } => {
                let subject = ctx.subject.ok_or_else(|| {
                    DeidError::TypeMismatch(
                        "DATE_SHIFT needs a patient identifier on the row".to_string(),
                    )
                })?;
                let domain = domain.as_deref().unwrap_or(DEFAULT_DATE_SHIFT_DOMAIN);
                let days = offset_days(self.mappings.key(), domain, subject, *max_days);
                shift_value(value, days)?
            }
            RuleKind::Pseudonymize { domain, format } => {
                let text = value_text(value).unwrap_or_default();
                let domain = domain
                    .clone()
                    .unwrap_or_else(|| format!("{}.{}", ctx.table, ctx.column));
                Value::String(self.mappings.lookup_or_create(&domain, &text, format).await?)
            }
            RuleKind::Suppress { scope } => return Ok(suppress(*scope)),
        };

        Ok(Outcome::Value(replaced))
    }

    /// Applies rules in order, each to the previous output
    ///
    /// Stops early when a rule drops the row.
    pub async fn apply_chain(
        &self,
        rules: &[&CompiledRule],
        value: &Value,
        ctx: &RuleContext<'_>,
    ) -> Result<Outcome> {
        let mut current = value.clone();
        for compiled in rules {
            match self.apply(compiled, &current, ctx).await? {
                Outcome::Value(next) => current = next,
                Outcome::DropRow => return Ok(Outcome::DropRow),
            }
        }
        Ok(Outcome::Value(current))
    }
}
