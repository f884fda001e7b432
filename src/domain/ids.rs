//! Domain identifier types with validation
//!
//! Newtype wrappers keep connection, rule, mapping and run identifiers from
//! being mixed up. Catalog identifiers are operator-chosen slugs; run
//! identifiers are generated UUIDs.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

fn validate_slug(kind: &str, id: &str) -> Result<(), String> {
    if id.trim().is_empty() {
        return Err(format!("{kind} ID cannot be empty"));
    }
    if id.len() > 128 {
        return Err(format!("{kind} ID cannot exceed 128 characters"));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(format!(
            "{kind} ID '{id}' may only contain letters, digits, '_', '-' and '.'"
        ));
    }
    Ok(())
}

macro_rules! slug_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier, validating its format
            pub fn new(id: impl Into<String>) -> Result<Self, String> {
                let id = id.into();
                validate_slug($kind, &id)?;
                Ok(Self(id))
            }

            /// Returns the identifier as a string slice
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consumes self and returns the inner String
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = String;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

slug_id!(
    /// Connection identifier
    ///
    /// # Examples
    ///
    /// ```
    /// use deid::domain::ids::ConnectionId;
    /// use std::str::FromStr;
    ///
    /// let id = ConnectionId::from_str("clinic-primary").unwrap();
    /// assert_eq!(id.as_str(), "clinic-primary");
    /// ```
    ConnectionId,
    "Connection"
);

slug_id!(
    /// Rule catalog identifier
    RuleId,
    "Rule"
);

slug_id!(
    /// Saved field mapping identifier
    MappingId,
    "Mapping"
);

/// Run identifier, generated when a run is dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    /// Generates a fresh random run identifier
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RunId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| format!("Invalid run ID '{s}': {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_valid() {
        let id = ConnectionId::new("warehouse_01").unwrap();
        assert_eq!(id.as_str(), "warehouse_01");
        assert_eq!(id.to_string(), "warehouse_01");
    }

    #[test]
    fn test_connection_id_empty() {
        assert!(ConnectionId::new("  ").is_err());
    }

    #[test]
    fn test_rule_id_rejects_sql_characters() {
        let err = RuleId::new("mask'; drop table rules").unwrap_err();
        assert!(err.contains("may only contain"));
    }

    #[test]
    fn test_mapping_id_serde_validates() {
        let ok: MappingId = serde_json::from_str("\"mrn-domain\"").unwrap();
        assert_eq!(ok.as_str(), "mrn-domain");
        assert!(serde_json::from_str::<MappingId>("\"\"").is_err());
    }

    #[test]
    fn test_run_id_roundtrip_through_display() {
        let id = RunId::generate();
        let parsed = RunId::from_str(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_run_id_invalid() {
        assert!(RunId::from_str("not-a-uuid").is_err());
    }
}
