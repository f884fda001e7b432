//! Field mappings and pseudonym entries

use crate::domain::ids::MappingId;
use crate::domain::rule::PseudonymFormat;
use crate::domain::{DeidError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Association between an identifier field and the pseudonym domain used for it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    /// Stable identifier
    pub id: MappingId,

    /// Display name
    #[serde(default)]
    pub name: String,

    /// Column pseudonymized by this mapping; `None` means the run's patient id field
    #[serde(default)]
    pub field: Option<String>,

    /// Pseudonym domain
    pub domain: String,

    /// Token format for newly created pseudonyms
    #[serde(default)]
    pub format: PseudonymFormat,
}

impl FieldMapping {
    /// Checks the mapping shape
    ///
    /// # Errors
    ///
    /// Returns `InvalidRuleParameter` for a blank domain or a bad format.
    pub fn validate(&self) -> Result<()> {
        if self.domain.trim().is_empty() {
            return Err(DeidError::InvalidRuleParameter(format!(
                "Mapping '{}': domain cannot be empty",
                self.id
            )));
        }
        if self.field.as_deref().is_some_and(|f| f.trim().is_empty()) {
            return Err(DeidError::InvalidRuleParameter(format!(
                "Mapping '{}': field cannot be blank",
                self.id
            )));
        }
        self.format.validate()
    }

    /// Column this mapping applies to, given the run's patient id field
    pub fn target_field<'a>(&'a self, patient_id_field: &'a str) -> &'a str {
        self.field.as_deref().unwrap_or(patient_id_field)
    }
}

/// One stored pseudonym
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PseudonymEntry {
    /// Mapping domain
    pub domain: String,
    /// Keyed hash of the source value, hex encoded
    pub source_hash: String,
    /// Pseudonym handed out for the source value
    pub pseudonym: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl PseudonymEntry {
    /// Creates an entry stamped with the current time
    pub fn new(
        domain: impl Into<String>,
        source_hash: impl Into<String>,
        pseudonym: impl Into<String>,
    ) -> Self {
        Self {
            domain: domain.into(),
            source_hash: source_hash.into(),
            pseudonym: pseudonym.into(),
            created_at: Utc::now(),
        }
    }
}
