//! HMAC key shared by source hashing, opaque tokens and date shifting

use crate::config::SecretString;
use crate::domain::{DeidError, Result};
use rand::RngCore;
use ring::hmac;
use secrecy::ExposeSecret;
use std::fmt;

/// Settings key under which a generated key is persisted
pub const MAPPING_KEY_SETTING: &str = "mapping_key";

/// Keyed HMAC-SHA256 over length-prefixed parts
pub struct MappingKey {
    key: hmac::Key,
}

impl MappingKey {
    /// Builds a key from raw bytes
    pub fn new(bytes: &[u8]) -> Self {
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, bytes),
        }
    }

    /// Builds a key from a configured secret
    ///
    /// # Errors
    ///
    /// Returns `Configuration` for an empty secret.
    pub fn from_secret(secret: &SecretString) -> Result<Self> {
        let bytes = secret.expose_secret().as_bytes();
        if bytes.is_empty() {
            return Err(DeidError::Configuration("Mapping key cannot be empty".to_string()));
        }
        Ok(Self::new(bytes))
    }

    /// 32 random bytes, hex encoded, for first-time key creation
    pub fn generate_encoded() -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    /// Signs the concatenation of `parts`, each prefixed with its length so
    /// `("ab", "c")` and `("a", "bc")` never collide
    pub fn sign(&self, parts: &[&[u8]]) -> hmac::Tag {
        let mut ctx = hmac::Context::with_key(&self.key);
        for part in parts {
            ctx.update(&(part.len() as u64).to_be_bytes());
            ctx.update(part);
        }
        ctx.sign()
    }

    /// Hex digest of [`MappingKey::sign`]
    pub fn sign_hex(&self, parts: &[&[u8]]) -> String {
        hex::encode(self.sign(parts).as_ref())
    }
}

impl fmt::Debug for MappingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MappingKey([REDACTED])")
    }
}
