//! Persistent pseudonym mappings
//!
//! [`MappingStore`] hands out one pseudonym per `(domain, source value)` and
//! keeps the association forever. Two rules make that safe under concurrent
//! runs:
//!
//! - the storage primitive is insert-if-absent, arbitrated by uniqueness on
//!   `(domain, source_hash)` and `(domain, pseudonym)`;
//! - whoever loses the race re-reads instead of overwriting.
//!
//! Source values are never stored, only their keyed hash.

use crate::adapters::database::ControlStore;
use crate::config::SecretString;
use crate::core::retry::{with_retry, RetryPolicy};
use crate::deidentification::key::{MappingKey, MAPPING_KEY_SETTING};
use crate::deidentification::rules::{matches_format, opaque_token, sequential_token, source_hash};
use crate::domain::{
    DeidError, FieldMapping, MappingId, PseudonymEntry, PseudonymFormat, Result,
};
use std::sync::Arc;

/// Candidates tried before giving up on a value
pub const MAX_ALLOCATION_ATTEMPTS: u32 = 16;

/// Pseudonym allocation on top of the control store
pub struct MappingStore {
    storage: Arc<dyn ControlStore>,
    key: Arc<MappingKey>,
    retry: RetryPolicy,
}

impl MappingStore {
    /// Opens the store, resolving the mapping key
    ///
    /// A configured key wins. Otherwise the key persisted in the control store
    /// is used, generating and persisting one on first use; concurrent first
    /// uses agree on a single key through `put_setting_if_absent`.
    pub async fn open(
        storage: Arc<dyn ControlStore>,
        configured: Option<&SecretString>,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let key = match configured {
            Some(secret) => MappingKey::from_secret(secret)?,
            None => {
                let generated = MappingKey::generate_encoded();
                let stored = with_retry(&retry, "put_setting_if_absent", || {
                    storage.put_setting_if_absent(MAPPING_KEY_SETTING, &generated)
                })
                .await?;
                if stored == generated {
                    tracing::info!("Generated a new mapping key and stored it in the control store");
                }
                MappingKey::new(stored.as_bytes())
            }
        };

        Ok(Self::with_key(storage, key, retry))
    }

    /// Builds a store around an explicit key
    pub fn with_key(storage: Arc<dyn ControlStore>, key: MappingKey, retry: RetryPolicy) -> Self {
        Self {
            storage,
            key: Arc::new(key),
            retry,
        }
    }

    /// Key shared with date shifting
    pub fn key(&self) -> &Arc<MappingKey> {
        &self.key
    }

    /// Existing pseudonym for `value`, if any
    pub async fn lookup(&self, domain: &str, value: &str) -> Result<Option<String>> {
        let hash = source_hash(&self.key, domain, value);
        let entry = with_retry(&self.retry, "find_by_source", || {
            self.storage.find_by_source(domain, &hash)
        })
        .await?;
        Ok(entry.map(|e| e.pseudonym))
    }

    /// Returns the pseudonym for `value`, creating it if needed
    ///
    /// An opaque token already issued in this domain is returned as is, which
    /// keeps PSEUDONYMIZE idempotent over its own output. Opaque tokens are
    /// keyed HMAC output, so a real identifier cannot collide with one.
    /// Sequential pseudonyms look like ordinary identifiers (`SW0000001`) and
    /// are always mapped by source hash, so two distinct sources never share
    /// a pseudonym.
    ///
    /// # Errors
    ///
    /// `Storage` when no unique candidate could be allocated or the control
    /// store stays unavailable after retries.
    pub async fn lookup_or_create(
        &self,
        domain: &str,
        value: &str,
        format: &PseudonymFormat,
    ) -> Result<String> {
        let hash = source_hash(&self.key, domain, value);

        if let Some(entry) = self.find_by_source(domain, &hash).await? {
            return Ok(entry.pseudonym);
        }

        if matches!(format, PseudonymFormat::Opaque) && matches_format(format, value) {
            let existing = with_retry(&self.retry, "find_by_pseudonym", || {
                self.storage.find_by_pseudonym(domain, value)
            })
            .await?;
            if existing.is_some() {
                return Ok(value.to_string());
            }
        }

        for attempt in 0..MAX_ALLOCATION_ATTEMPTS {
            let candidate = self.candidate(domain, value, format, attempt).await?;
            let entry = PseudonymEntry::new(domain, hash.as_str(), candidate.as_str());

            let inserted = with_retry(&self.retry, "insert_if_absent", || {
                self.storage.insert_if_absent(&entry)
            })
            .await?;
            if inserted {
                return Ok(candidate);
            }

            // Lost a race for this source, or the candidate belongs to someone else
            if let Some(existing) = self.find_by_source(domain, &hash).await? {
                return Ok(existing.pseudonym);
            }
            tracing::debug!(domain = domain, attempt = attempt, "Pseudonym candidate taken");
        }

        Err(DeidError::Storage(format!(
            "Could not allocate a unique pseudonym in domain '{domain}' after {MAX_ALLOCATION_ATTEMPTS} attempts"
        )))
    }

    /// Number of pseudonyms in `domain`
    pub async fn count(&self, domain: &str) -> Result<u64> {
        with_retry(&self.retry, "count_domain", || self.storage.count_domain(domain)).await
    }

    /// Saves a field mapping to the catalog
    pub async fn save_field_mapping(&self, mapping: &FieldMapping) -> Result<()> {
        mapping.validate()?;
        self.storage.save_mapping(mapping).await
    }

    /// Loads configured field mappings into the catalog
    pub async fn seed_field_mappings(&self, mappings: &[FieldMapping]) -> Result<()> {
        for mapping in mappings {
            self.save_field_mapping(mapping).await?;
        }
        tracing::debug!(count = mappings.len(), "Seeded field mappings");
        Ok(())
    }

    /// One catalog field mapping
    pub async fn field_mapping(&self, id: &MappingId) -> Result<FieldMapping> {
        self.storage
            .load_mapping(id)
            .await?
            .ok_or_else(|| DeidError::NotFound(format!("Field mapping '{id}' not found")))
    }

    /// Every catalog field mapping
    pub async fn field_mappings(&self) -> Result<Vec<FieldMapping>> {
        self.storage.list_mappings().await
    }

    async fn find_by_source(&self, domain: &str, hash: &str) -> Result<Option<PseudonymEntry>> {
        with_retry(&self.retry, "find_by_source", || {
            self.storage.find_by_source(domain, hash)
        })
        .await
    }

    async fn candidate(
        &self,
        domain: &str,
        value: &str,
        format: &PseudonymFormat,
        attempt: u32,
    ) -> Result<String> {
        Ok(match format {
            PseudonymFormat::Opaque => opaque_token(&self.key, domain, value, attempt),
            PseudonymFormat::Sequential { prefix, digits } => {
                let next = self.count(domain).await? + 1 + u64::from(attempt);
                sequential_token(prefix, *digits, next)
            }
        })
    }
}
