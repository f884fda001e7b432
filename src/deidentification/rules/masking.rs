//! MASK

use crate::domain::{DeidError, Result};

/// MASK parameters
#[derive(Debug, Clone, Copy)]
pub struct MaskParams {
    /// Leading characters kept
    pub keep_prefix: usize,
    /// Trailing characters kept
    pub keep_suffix: usize,
    /// Mask character
    pub mask_char: char,
    /// Fixed mask run length
    pub mask_width: usize,
    /// Mask one-for-one instead of a fixed run
    pub preserve_length: bool,
}

/// Keeps the configured prefix and suffix and masks the rest
///
/// The hidden middle becomes `mask_width` mask characters, or as many as it
/// had characters with `preserve_length`. A value with nothing left to hide is
/// returned unchanged, so masking a masked value is a no-op.
///
/// # Errors
///
/// `InvalidRuleParameter` when `keep_prefix + keep_suffix` exceeds the length.
pub fn mask(value: &str, params: &MaskParams) -> Result<String> {
    let chars: Vec<char> = value.chars().collect();
    let keep = params.keep_prefix + params.keep_suffix;

    if keep > chars.len() {
        return Err(DeidError::InvalidRuleParameter(format!(
            "MASK keeps {keep} characters but the value has only {}",
            chars.len()
        )));
    }

    let hidden = &chars[params.keep_prefix..chars.len() - params.keep_suffix];
    if hidden.is_empty() {
        return Ok(value.to_string());
    }

    let run = if params.preserve_length {
        hidden.len()
    } else {
        params.mask_width
    };

    let mut out = String::with_capacity(value.len() + run);
    out.extend(&chars[..params.keep_prefix]);
    out.extend(std::iter::repeat(params.mask_char).take(run));
    out.extend(&chars[chars.len() - params.keep_suffix..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn params(keep_prefix: usize, keep_suffix: usize) -> MaskParams {
        MaskParams {
            keep_prefix,
            keep_suffix,
            mask_char: '*',
            mask_width: 4,
            preserve_length: false,
        }
    }

    #[test_case("Jane Doe", 0, 2, "****oe" ; "suffix only")]
    #[test_case("Jane Doe", 1, 2, "J****oe" ; "prefix and suffix")]
    #[test_case("555-0100", 0, 0, "****" ; "whole value")]
    #[test_case("ab", 1, 1, "ab" ; "nothing hidden")]
    #[test_case("Zoë Ñuñez", 2, 2, "Zo****ez" ; "multibyte")]
    fn test_mask(value: &str, prefix: usize, suffix: usize, expected: &str) {
        assert_eq!(mask(value, &params(prefix, suffix)).unwrap(), expected);
    }

    #[test]
    fn test_preserve_length() {
        let p = MaskParams {
            preserve_length: true,
            mask_char: '#',
            ..params(0, 4)
        };
        assert_eq!(mask("4111111111111111", &p).unwrap(), "############1111");
    }

    #[test]
    fn test_keep_longer_than_value() {
        let err = mask("Jo", &params(2, 2)).unwrap_err();
        assert!(matches!(err, DeidError::InvalidRuleParameter(_)));
    }

    #[test]
    fn test_idempotent() {
        let p = params(1, 2);
        let once = mask("Jane Doe", &p).unwrap();
        assert_eq!(mask(&once, &p).unwrap(), once);
    }
}
