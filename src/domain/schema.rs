//! Table and column descriptions produced by schema introspection
//!
//! These types are derived on every request and never persisted.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Common type vocabulary all backend types are mapped onto
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    /// Character data
    Text,
    /// Integers, decimals, floats
    Numeric,
    /// Dates, timestamps, times
    Date,
    /// Booleans
    Boolean,
    /// Anything else (blobs, arrays, user-defined types)
    Unknown,
}

impl ColumnType {
    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Text => "text",
            ColumnType::Numeric => "numeric",
            ColumnType::Date => "date",
            ColumnType::Boolean => "boolean",
            ColumnType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One column of a source table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Column name as reported by the backend
    pub name: String,

    /// Inferred common type
    #[serde(rename = "type")]
    pub column_type: ColumnType,

    /// Whether NULL is allowed
    pub nullable: bool,

    /// Whether the column is part of the primary key
    #[serde(default)]
    pub primary_key: bool,

    /// Whether a single-column unique constraint covers the column
    #[serde(default)]
    pub unique: bool,

    /// Backend-provided row address (SQLite rowid) rather than a stored column
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub row_locator: bool,

    /// Backend type name, used for casts when writing back
    #[serde(default)]
    pub native_type: String,
}

impl ColumnDescriptor {
    /// Creates a nullable, non-key column
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
            primary_key: false,
            unique: false,
            row_locator: false,
            native_type: String::new(),
        }
    }

    /// Marks the column as primary key (and therefore unique and not nullable)
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.unique = true;
        self.nullable = false;
        self
    }

    /// Marks the column as covered by a single-column unique constraint
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Marks the column as a row address supplied by the backend
    pub fn row_locator(mut self) -> Self {
        self.row_locator = true;
        self.unique = true;
        self.nullable = false;
        self
    }

    /// Unique and never NULL, so usable as a keyset cursor
    pub fn is_unique_key(&self) -> bool {
        self.unique && !self.nullable
    }

    /// Sets the backend type name
    pub fn with_native_type(mut self, native_type: impl Into<String>) -> Self {
        self.native_type = native_type.into();
        self
    }
}

/// Ordered column list for one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name
    pub table: String,
    /// Columns in ordinal order
    pub columns: Vec<ColumnDescriptor>,
    /// Row address offered by the backend when no stored column is unique
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_locator: Option<ColumnDescriptor>,
}

impl TableSchema {
    /// Looks up a column by exact name
    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Column names in ordinal order
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Column to order and resume batches by.
    ///
    /// Keyset pagination skips rows that share a key value, so only a unique
    /// NOT NULL column qualifies. A single-column primary key wins, then the
    /// preferred column (the patient identifier field), then any other unique
    /// column, then the backend row locator. `None` means the table cannot be
    /// paged safely.
    pub fn batch_key(&self, preferred: &str) -> Option<&ColumnDescriptor> {
        let pk: Vec<&ColumnDescriptor> = self.columns.iter().filter(|c| c.primary_key).collect();
        if pk.len() == 1 {
            return Some(pk[0]);
        }
        self.column(preferred)
            .filter(|c| c.is_unique_key())
            .or_else(|| {
                self.columns
                    .iter()
                    .find(|c| c.is_unique_key() && !c.primary_key)
            })
            .or(self.row_locator.as_ref())
    }
}
