//! Primary-key handling shared between the data-access core (C3) and the
//! LWW engine (C4): normalizing scalar/map/list inputs into an ordered
//! value vector, and building `col = ? AND col = ?` WHERE clauses.

use crate::errors::{AppError, AppResult};
use crate::schema::Table;
use crate::value::Value;
use std::collections::HashMap;

/// A caller-supplied primary key, in any of the three shapes spec.md §4.3
/// allows: a single scalar, a map by column name, or an ordered list.
#[derive(Debug, Clone)]
pub enum PrimaryKey {
    Scalar(Value),
    Map(HashMap<String, Value>),
    List(Vec<Value>),
}

impl From<Value> for PrimaryKey {
    fn from(v: Value) -> Self {
        PrimaryKey::Scalar(v)
    }
}

impl From<i64> for PrimaryKey {
    fn from(v: i64) -> Self {
        PrimaryKey::Scalar(Value::Integer(v))
    }
}

impl From<&str> for PrimaryKey {
    fn from(v: &str) -> Self {
        PrimaryKey::Scalar(Value::Text(v.to_string()))
    }
}

impl From<String> for PrimaryKey {
    fn from(v: String) -> Self {
        PrimaryKey::Scalar(Value::Text(v))
    }
}

/// Normalize a `PrimaryKey` into values ordered per `table.primary_key`
/// (schema order). A list or map of mismatched arity fails with a usage
/// error, per spec.md §4.3.
pub fn normalize(table: &Table, pk: &PrimaryKey) -> AppResult<Vec<Value>> {
    let pk_columns = pk_columns_for(table);
    match pk {
        PrimaryKey::Scalar(v) => {
            if pk_columns.len() != 1 {
                return Err(AppError::usage(format!(
                    "table '{}' has a composite primary key; a scalar value is not enough",
                    table.name
                )));
            }
            Ok(vec![v.clone()])
        }
        PrimaryKey::List(values) => {
            if values.len() != pk_columns.len() {
                return Err(AppError::usage(format!(
                    "primary key arity mismatch on table '{}': expected {} value(s), got {}",
                    table.name,
                    pk_columns.len(),
                    values.len()
                )));
            }
            Ok(values.clone())
        }
        PrimaryKey::Map(map) => {
            if map.len() != pk_columns.len() {
                return Err(AppError::usage(format!(
                    "primary key arity mismatch on table '{}': expected {} value(s), got {}",
                    table.name,
                    pk_columns.len(),
                    map.len()
                )));
            }
            let mut values = Vec::with_capacity(pk_columns.len());
            for col in &pk_columns {
                let v = map.get(col).ok_or_else(|| {
                    AppError::usage(format!(
                        "primary key map on table '{}' is missing column '{}'",
                        table.name, col
                    ))
                })?;
                values.push(v.clone());
            }
            Ok(values)
        }
    }
}

/// Returns the table's primary-key column names in schema order; for a
/// single-column auto-increment key this is `table.primary_key` verbatim.
pub fn pk_columns_for(table: &Table) -> Vec<String> {
    table.primary_key.clone()
}

/// Build `col1 = ?1 AND col2 = ?2 ...` ANDed in schema order, plus the
/// matching argument vector.
pub fn build_where_clause(table: &Table, values: &[Value]) -> (String, Vec<Value>) {
    let columns = pk_columns_for(table);
    let clause = columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{} = ?{}", c, i + 1))
        .collect::<Vec<_>>()
        .join(" AND ");
    (clause, values.to_vec())
}
