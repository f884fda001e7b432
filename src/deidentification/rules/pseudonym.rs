//! PSEUDONYMIZE token generation
//!
//! Token candidates are pure functions of the key, the domain, the source value
//! and an attempt counter. Whether a candidate is accepted is decided by the
//! mapping store's insert-if-absent arbitration.

use crate::deidentification::key::MappingKey;
use crate::domain::PseudonymFormat;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};

/// First character of every opaque token
pub const OPAQUE_TOKEN_PREFIX: char = 'T';

const OPAQUE_BODY_LEN: usize = 21;

/// Keyed hash identifying `value` inside `domain`; the only form in which a
/// source identifier is stored
pub fn source_hash(key: &MappingKey, domain: &str, value: &str) -> String {
    key.sign_hex(&[b"source", domain.as_bytes(), value.as_bytes()])
}

/// Opaque token candidate for the given attempt
pub fn opaque_token(key: &MappingKey, domain: &str, value: &str, attempt: u32) -> String {
    let tag = key.sign(&[
        b"token",
        domain.as_bytes(),
        value.as_bytes(),
        &attempt.to_be_bytes(),
    ]);
    let encoded = URL_SAFE_NO_PAD.encode(tag.as_ref());

    let mut token = String::with_capacity(OPAQUE_BODY_LEN + 1);
    token.push(OPAQUE_TOKEN_PREFIX);
    token.push_str(&encoded[..OPAQUE_BODY_LEN]);
    token
}

/// `prefix` followed by `n` zero-padded to `digits`
pub fn sequential_token(prefix: &str, digits: usize, n: u64) -> String {
    format!("{prefix}{n:0digits$}")
}

/// Whether `text` has the shape of a token in `format`
pub fn matches_format(format: &PseudonymFormat, text: &str) -> bool {
    match format {
        PseudonymFormat::Opaque => {
            text.len() == OPAQUE_BODY_LEN + 1
                && text.starts_with(OPAQUE_TOKEN_PREFIX)
                && text[1..]
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        }
        PseudonymFormat::Sequential { prefix, digits } => text
            .strip_prefix(prefix.as_str())
            .is_some_and(|rest| {
                rest.len() >= *digits && !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit())
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> MappingKey {
        MappingKey::new(b"pseudonym-test-key")
    }

    #[test]
    fn test_opaque_token_shape() {
        let token = opaque_token(&key(), "mrn", "A1234", 0);
        assert_eq!(token.len(), 22);
        assert!(token.starts_with('T'));
        assert!(matches_format(&PseudonymFormat::Opaque, &token));
    }

    #[test]
    fn test_opaque_token_is_deterministic() {
        let key = key();
        assert_eq!(
            opaque_token(&key, "mrn", "A1234", 0),
            opaque_token(&key, "mrn", "A1234", 0)
        );
    }

    #[test]
    fn test_attempt_and_domain_change_token() {
        let key = key();
        let base = opaque_token(&key, "mrn", "A1234", 0);
        assert_ne!(base, opaque_token(&key, "mrn", "A1234", 1));
        assert_ne!(base, opaque_token(&key, "encounter", "A1234", 0));
    }

    #[test]
    fn test_source_hash_scoped_by_domain() {
        let key = key();
        assert_ne!(
            source_hash(&key, "mrn", "A1234"),
            source_hash(&key, "encounter", "A1234")
        );
        assert!(!source_hash(&key, "mrn", "A1234").contains("A1234"));
    }

    #[test]
    fn test_sequential_token() {
        assert_eq!(sequential_token("SW", 7, 42), "SW0000042");
        assert_eq!(sequential_token("", 3, 12345), "12345");
    }

    #[test]
    fn test_sequential_matches_format() {
        let format = PseudonymFormat::Sequential {
            prefix: "SW".to_string(),
            digits: 7,
        };
        assert!(matches_format(&format, "SW0000042"));
        assert!(!matches_format(&format, "SW42"));
        assert!(!matches_format(&format, "A1234"));
        assert!(!matches_format(&PseudonymFormat::Opaque, "A1234"));
    }
}
