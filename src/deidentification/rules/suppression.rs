//! SUPPRESS

use super::Outcome;
use crate::domain::SuppressScope;
use serde_json::Value;

/// Field scope nulls the value, row scope drops the row
pub fn suppress(scope: SuppressScope) -> Outcome {
    match scope {
        SuppressScope::Field => Outcome::Value(Value::Null),
        SuppressScope::Row => Outcome::DropRow,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scopes() {
        assert_eq!(suppress(SuppressScope::Field), Outcome::Value(Value::Null));
        assert_eq!(suppress(SuppressScope::Row), Outcome::DropRow);
    }
}
