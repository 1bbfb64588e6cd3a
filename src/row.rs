//! Row decoding shared between the data-access core (C3) and the LWW
//! engine (C4), so both read the same way off a raw `rusqlite::Row`.

use crate::errors::AppResult;
use crate::schema::Table;
use crate::value::Value;
use rusqlite::Row;
use std::collections::HashMap;

pub type RowMap = HashMap<String, Value>;

pub fn select_columns_sql(table: &Table) -> String {
    table
        .columns
        .iter()
        .map(|c| c.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn decode_row(row: &Row<'_>, table: &Table) -> AppResult<RowMap> {
    let mut out = HashMap::with_capacity(table.columns.len());
    for (idx, column) in table.columns.iter().enumerate() {
        let raw: rusqlite::types::Value = row.get(idx)?;
        let value = Value::from_sql_with_affinity(raw, column.affinity)?;
        out.insert(column.name.clone(), value);
    }
    Ok(out)
}
