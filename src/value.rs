//! Dynamically typed row cell, shared by the schema, data-access and LWW
//! layers so that a column value never needs a per-component representation.

use crate::errors::{AppError, AppResult};
use chrono::NaiveDate;
use rusqlite::types::{ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::ToSql;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Declared type affinity for a column (schema-level, see `schema::Column`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeAffinity {
    Integer,
    Real,
    Text,
    Blob,
    Date,
}

impl TypeAffinity {
    pub fn as_str(self) -> &'static str {
        match self {
            TypeAffinity::Integer => "INTEGER",
            TypeAffinity::Real => "REAL",
            TypeAffinity::Text => "TEXT",
            TypeAffinity::Blob => "BLOB",
            TypeAffinity::Date => "DATE",
        }
    }
}

/// A dynamically typed cell value. Encoding/decoding against the underlying
/// engine happens only at the data-access boundary (C3); every other
/// component passes `Value` around untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    Date(NaiveDate),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Encode for storage/PK serialization: dates become ISO-8601 strings,
    /// blobs become hex, matching spec.md §3 "Primary-key serialization".
    pub fn encode_for_identity(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Integer(i) => i.to_string(),
            Value::Real(r) => r.to_string(),
            Value::Text(s) => s.clone(),
            Value::Blob(b) => hex_encode(b),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
        }
    }

    /// Coerce a raw value read back from SQLite into the declared affinity.
    pub fn from_sql_with_affinity(raw: SqlValue, affinity: TypeAffinity) -> AppResult<Value> {
        Ok(match (raw, affinity) {
            (SqlValue::Null, _) => Value::Null,
            (SqlValue::Integer(i), TypeAffinity::Integer) => Value::Integer(i),
            (SqlValue::Integer(i), TypeAffinity::Real) => Value::Real(i as f64),
            (SqlValue::Real(r), _) => Value::Real(r),
            (SqlValue::Integer(i), _) => Value::Integer(i),
            (SqlValue::Text(s), TypeAffinity::Date) => {
                let d = NaiveDate::parse_from_str(&s, "%Y-%m-%d").map_err(|e| {
                    AppError::engine(format!("invalid date value '{}': {}", s, e))
                })?;
                Value::Date(d)
            }
            (SqlValue::Text(s), _) => Value::Text(s),
            (SqlValue::Blob(b), _) => Value::Blob(b),
        })
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(SqlValue::Null),
            Value::Integer(i) => ToSqlOutput::Owned(SqlValue::Integer(*i)),
            Value::Real(r) => ToSqlOutput::Owned(SqlValue::Real(*r)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
            Value::Date(d) => {
                ToSqlOutput::Owned(SqlValue::Text(d.format("%Y-%m-%d").to_string()))
            }
        })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode_for_identity())
    }
}

/// Total order for primary-key components; not used for LWW conflict
/// resolution (that uses `Hlc`), only for deterministic `ORDER BY` support
/// and dedup in tests.
impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => a.partial_cmp(b),
            (Value::Real(a), Value::Real(b)) => a.partial_cmp(b),
            (Value::Text(a), Value::Text(b)) => a.partial_cmp(b),
            (Value::Date(a), Value::Date(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{:02x}", b);
    }
    s
}

/// Serialize a primary key for identity purposes (cache keys, the
/// `_lww_column_timestamps` store). A single-column PK serializes as its
/// encoded scalar; a composite PK serializes as `col1:val1|col2:val2|...`
/// with columns in schema order (spec.md §3).
pub fn serialize_pk(pk_columns: &[String], values: &[Value]) -> AppResult<String> {
    if pk_columns.len() != values.len() {
        return Err(AppError::usage(format!(
            "primary key arity mismatch: schema declares {} column(s), got {}",
            pk_columns.len(),
            values.len()
        )));
    }
    if pk_columns.len() == 1 {
        return Ok(values[0].encode_for_identity());
    }
    let mut parts = Vec::with_capacity(pk_columns.len());
    for (col, val) in pk_columns.iter().zip(values.iter()) {
        parts.push(format!("{}:{}", col, val.encode_for_identity()));
    }
    Ok(parts.join("|"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_pk_map_and_list_agree() {
        let cols = vec!["site".to_string(), "code".to_string()];
        let by_list = serialize_pk(
            &cols,
            &[Value::Text("north".into()), Value::Integer(7)],
        )
        .unwrap();
        assert_eq!(by_list, "site:north|code:7");
    }

    #[test]
    fn single_column_pk_is_bare_scalar() {
        let cols = vec!["id".to_string()];
        let s = serialize_pk(&cols, &[Value::Text("abc-123".into())]).unwrap();
        assert_eq!(s, "abc-123");
    }

    #[test]
    fn arity_mismatch_is_usage_error() {
        let cols = vec!["a".to_string(), "b".to_string()];
        let err = serialize_pk(&cols, &[Value::Integer(1)]).unwrap_err();
        assert!(matches!(err, AppError::Usage { .. }));
    }
}
