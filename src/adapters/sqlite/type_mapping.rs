//! SQLite declared-type to [`ColumnType`] mapping
//!
//! SQLite is dynamically typed; the declared column type only carries an
//! affinity. The rules below follow the affinity algorithm, with DATE/TIME and
//! BOOL names recognised before the numeric fallback.

use crate::domain::ColumnType;

/// Maps a declared SQLite column type onto the common vocabulary
///
/// # Examples
///
/// ```
/// use deid::adapters::sqlite::map_sqlite_type;
/// use deid::domain::ColumnType;
///
/// assert_eq!(map_sqlite_type("VARCHAR(255)"), ColumnType::Text);
/// assert_eq!(map_sqlite_type("bigint"), ColumnType::Numeric);
/// ```
pub fn map_sqlite_type(declared: &str) -> ColumnType {
    let upper = declared.to_uppercase();
    let base = upper.split('(').next().unwrap_or("").trim();

    if base.is_empty() {
        return ColumnType::Unknown;
    }

    if base.contains("BOOL") {
        return ColumnType::Boolean;
    }

    if base.contains("DATE") || base.contains("TIME") {
        return ColumnType::Date;
    }

    if base.contains("INT") {
        return ColumnType::Numeric;
    }

    if base.contains("CHAR") || base.contains("CLOB") || base.contains("TEXT") {
        return ColumnType::Text;
    }

    if base.contains("BLOB") {
        return ColumnType::Unknown;
    }

    if base.contains("REAL")
        || base.contains("FLOA")
        || base.contains("DOUB")
        || base.contains("NUM")
        || base.contains("DEC")
    {
        return ColumnType::Numeric;
    }

    match base {
        "STRING" | "UUID" | "GUID" => ColumnType::Text,
        _ => ColumnType::Unknown,
    }
}
