//! De-identification rules and their application
//!
//! # Architecture
//!
//! - **Rules**: one transform per kind (redact, mask, generalize, date shift,
//!   pseudonymize, suppress), each a pure function of a field value
//! - **Engine**: the rule catalog, selector matching and ordered rule chains
//! - **Key**: the HMAC key behind source hashes, opaque tokens and date offsets
//! - **Audit**: per-batch JSONL with hashed values
//! - **Detector**: regex PHI scan of sampled column values and rule suggestions
//!
//! # Usage
//!
//! ```rust,ignore
//! use deid::deidentification::{CompiledRule, RuleContext, RuleEngine};
//!
//! let rules = engine.resolve(&request.rule_ids).await?;
//! let ctx = RuleContext { table: "patients", column: "name", subject: Some("A1234") };
//! let outcome = engine.apply(&rules[0], &value, &ctx).await?;
//! ```

pub mod audit;
pub mod config;
pub mod detector;
pub mod engine;
pub mod key;
pub mod rules;

pub use audit::AuditLogger;
pub use config::{AuditConfig, DeidentificationConfig, RowErrorPolicy, ScanConfig};
pub use detector::{ColumnScan, PhiCategory, PhiDetector, RuleSuggestion, TableScan};
pub use engine::{CompiledRule, RuleContext, RuleEngine};
pub use key::MappingKey;
pub use rules::Outcome;
