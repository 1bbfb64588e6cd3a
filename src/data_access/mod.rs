//! Data Access Core (C3): the narrow CRUD surface the rest of the system
//! builds on. Every operation is validated against the schema; arguments
//! failing validation yield a usage error.

use crate::database::Database;
use crate::errors::{AppError, AppResult};
use crate::lww::{LwwEngine, UpdateLwwOptions};
use crate::pk::{self as pkmod, PrimaryKey};
use crate::row::{decode_row, select_columns_sql, RowMap};
use crate::schema::{Schema, Table, SYSTEM_ID_COLUMN, SYSTEM_VERSION_COLUMN};
use crate::value::Value;
use log::debug;
use rusqlite::{Connection, OptionalExtension};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Ordering/pagination/filter options for `get_all_where` / `count`.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub where_clause: Option<String>,
    pub args: Vec<Value>,
    pub order_by: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_where(mut self, clause: impl Into<String>, args: Vec<Value>) -> Self {
        self.where_clause = Some(clause.into());
        self.args = args;
        self
    }

    pub fn with_order_by(mut self, order_by: impl Into<String>) -> Self {
        self.order_by = Some(order_by.into());
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// Reflection surface for a table: primary key, required/unique columns,
/// indices and per-column type affinity.
#[derive(Debug, Clone)]
pub struct TableMetadata {
    pub primary_key: Vec<String>,
    pub required_columns: Vec<String>,
    pub unique_columns: Vec<String>,
    pub indices: Vec<String>,
    pub column_affinities: HashMap<String, &'static str>,
}

/// Options governing `bulk_load` (spec.md §6 defaults).
#[derive(Debug, Clone)]
pub struct BulkLoadOptions {
    pub batch_size: usize,
    pub clear_table_first: bool,
    pub upsert_mode: bool,
    pub allow_partial_data: bool,
    pub collect_errors: bool,
    pub validate_data: bool,
    /// Per-row LWW timestamps, keyed by row index into the input slice.
    pub lww_timestamps: Option<HashMap<usize, HashMap<String, String>>>,
    pub is_from_server: bool,
}

impl Default for BulkLoadOptions {
    fn default() -> Self {
        Self {
            batch_size: 500,
            clear_table_first: false,
            upsert_mode: false,
            allow_partial_data: false,
            collect_errors: false,
            validate_data: true,
            lww_timestamps: None,
            is_from_server: false,
        }
    }
}

impl BulkLoadOptions {
    pub fn with_batch_size(mut self, n: usize) -> Self {
        self.batch_size = n;
        self
    }

    pub fn with_upsert_mode(mut self, on: bool) -> Self {
        self.upsert_mode = on;
        self
    }

    pub fn with_allow_partial_data(mut self, on: bool) -> Self {
        self.allow_partial_data = on;
        self
    }

    pub fn with_lww_timestamps(mut self, ts: HashMap<usize, HashMap<String, String>>) -> Self {
        self.lww_timestamps = Some(ts);
        self
    }

    pub fn with_is_from_server(mut self, on: bool) -> Self {
        self.is_from_server = on;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct BulkLoadResult {
    pub processed: usize,
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
}

/// The CRUD surface. Carries optional LWW capability (C4) by composition,
/// per the design note in spec.md §9: no `LwwDataAccess extends DataAccess`
/// subclass, just an `Option<Arc<LwwEngine>>` checked explicitly at each
/// call site that needs it.
pub struct DataAccess {
    db: Arc<Database>,
    schema: Arc<Schema>,
    lww: Option<Arc<LwwEngine>>,
}

impl DataAccess {
    pub fn new(db: Arc<Database>, schema: Arc<Schema>) -> Self {
        Self {
            db,
            schema,
            lww: None,
        }
    }

    /// Attach LWW capability (C4). After this call, single-row
    /// inserts/updates route LWW-flagged columns through the LWW engine.
    pub fn with_lww(mut self, lww: Arc<LwwEngine>) -> Self {
        self.lww = Some(lww);
        self
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    fn table(&self, name: &str) -> AppResult<&Table> {
        self.schema
            .table(name)
            .ok_or_else(|| AppError::usage(format!("unknown table '{}'", name)))
    }

    pub fn table_metadata(&self, table: &str) -> AppResult<TableMetadata> {
        let t = self.table(table)?;
        Ok(TableMetadata {
            primary_key: t.primary_key.clone(),
            required_columns: t.required_columns().map(|c| c.name.clone()).collect(),
            unique_columns: t.unique_columns().map(|c| c.name.clone()).collect(),
            indices: t.indices.iter().map(|i| i.name.clone()).collect(),
            column_affinities: t
                .columns
                .iter()
                .map(|c| (c.name.clone(), c.affinity.as_str()))
                .collect(),
        })
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn get_by_primary_key(&self, table: &str, pk: &PrimaryKey) -> AppResult<Option<RowMap>> {
        let t = self.table(table)?;
        let values = pkmod::normalize(t, pk)?;
        let (clause, args) = pkmod::build_where_clause(t, &values);
        let sql = format!(
            "SELECT {} FROM {} WHERE {} LIMIT 1",
            select_columns_sql(t),
            t.name,
            clause
        );
        let conn = self.db.get_connection()?;
        let result = Self::query_one(&conn, &sql, &args, t)?;
        self.db.return_connection(conn);
        Ok(result)
    }

    pub fn get_all_where(&self, table: &str, options: &QueryOptions) -> AppResult<Vec<RowMap>> {
        let t = self.table(table)?;
        let mut sql = format!("SELECT {} FROM {}", select_columns_sql(t), t.name);
        if let Some(w) = &options.where_clause {
            sql.push_str(&format!(" WHERE {}", w));
        }
        if let Some(order) = &options.order_by {
            sql.push_str(&format!(" ORDER BY {}", order));
        }
        if let Some(limit) = options.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        if let Some(offset) = options.offset {
            sql.push_str(&format!(" OFFSET {}", offset));
        }
        let conn = self.db.get_connection()?;
        let rows = Self::query_many(&conn, &sql, &options.args, t)?;
        self.db.return_connection(conn);
        Ok(rows)
    }

    pub fn count(&self, table: &str, where_clause: Option<&str>, args: &[Value]) -> AppResult<i64> {
        let t = self.table(table)?;
        let mut sql = format!("SELECT COUNT(*) FROM {}", t.name);
        if let Some(w) = where_clause {
            sql.push_str(&format!(" WHERE {}", w));
        }
        let conn = self.db.get_connection()?;
        let count: i64 = conn.query_row(&sql, rusqlite::params_from_iter(args), |row| row.get(0))?;
        self.db.return_connection(conn);
        Ok(count)
    }

    pub fn exists_by_primary_key(&self, table: &str, pk: &PrimaryKey) -> AppResult<bool> {
        Ok(self.get_by_primary_key(table, pk)?.is_some())
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    pub fn insert(&self, table: &str, mut values: RowMap) -> AppResult<i64> {
        let t = self.table(table)?.clone();
        self.validate_insert(&t, &values)?;
        self.fill_system_columns_for_insert(&mut values);

        let lww_for_insert: Vec<(String, Value)> = t
            .lww_columns()
            .filter_map(|c| values.get(&c.name).map(|v| (c.name.clone(), v.clone())))
            .collect();

        self.db.with_transaction(|conn| {
            let rowid = Self::execute_insert(conn, &t, &values)?;
            if let Some(lww) = &self.lww {
                if !lww_for_insert.is_empty() {
                    let pk_values = self.pk_values_after_insert(&t, &values)?;
                    lww.record_initial_timestamps(conn, &t, &pk_values, &lww_for_insert, false)?;
                }
            }
            Ok(rowid)
        })
    }

    fn pk_values_after_insert(&self, table: &Table, values: &RowMap) -> AppResult<Vec<Value>> {
        let mut out = Vec::with_capacity(table.primary_key.len());
        for col in &table.primary_key {
            let v = values
                .get(col)
                .cloned()
                .ok_or_else(|| AppError::usage(format!("missing primary key column '{}'", col)))?;
            out.push(v);
        }
        Ok(out)
    }

    fn validate_insert(&self, table: &Table, values: &RowMap) -> AppResult<()> {
        for key in values.keys() {
            if !table.has_column(key) {
                return Err(AppError::usage(format!(
                    "unknown column '{}' on table '{}'",
                    key, table.name
                )));
            }
        }
        for required in table.required_columns() {
            if !values.contains_key(&required.name) {
                return Err(AppError::usage(format!(
                    "missing required column '{}' on table '{}'",
                    required.name, table.name
                )));
            }
        }
        Ok(())
    }

    fn fill_system_columns_for_insert(&self, values: &mut RowMap) {
        values
            .entry(SYSTEM_ID_COLUMN.to_string())
            .or_insert_with(|| Value::Text(Uuid::new_v4().to_string()));
        values
            .entry(SYSTEM_VERSION_COLUMN.to_string())
            .or_insert_with(|| Value::Text(crate::lww::hlc::HlcClock::stamp()));
    }

    fn execute_insert(conn: &Connection, table: &Table, values: &RowMap) -> AppResult<i64> {
        let mut columns = Vec::with_capacity(values.len());
        let mut args: Vec<&Value> = Vec::with_capacity(values.len());
        for column in &table.columns {
            if let Some(v) = values.get(&column.name) {
                columns.push(column.name.as_str());
                args.push(v);
            }
        }
        let placeholders = (1..=columns.len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table.name,
            columns.join(", "),
            placeholders
        );
        conn.execute(&sql, rusqlite::params_from_iter(args))?;
        Ok(conn.last_insert_rowid())
    }

    pub fn update_by_primary_key(
        &self,
        table: &str,
        pk: &PrimaryKey,
        values: RowMap,
    ) -> AppResult<()> {
        if values.is_empty() {
            return Err(AppError::usage("update requires at least one column"));
        }
        let t = self.table(table)?.clone();
        for key in values.keys() {
            if !t.has_column(key) {
                return Err(AppError::usage(format!(
                    "unknown column '{}' on table '{}'",
                    key, t.name
                )));
            }
        }
        let pk_values = pkmod::normalize(&t, pk)?;

        let (lww_updates, plain_updates): (Vec<_>, Vec<_>) = values
            .into_iter()
            .partition(|(col, _)| t.column(col).map(|c| c.lww).unwrap_or(false));

        if !lww_updates.is_empty() && self.lww.is_none() {
            return Err(AppError::usage(format!(
                "table '{}' has LWW columns but this DataAccess has no LWW capability attached",
                t.name
            )));
        }

        if let Some(lww) = &self.lww {
            for (column, value) in &lww_updates {
                lww.update_lww_column(
                    &t,
                    &pk_values,
                    column,
                    value.clone(),
                    UpdateLwwOptions::default(),
                )?;
            }
        }

        if !plain_updates.is_empty() || lww_updates.is_empty() {
            self.db.with_transaction(|conn| {
                Self::execute_plain_update(conn, &t, &pk_values, &plain_updates)
            })?;
        }
        Ok(())
    }

    fn execute_plain_update(
        conn: &Connection,
        table: &Table,
        pk_values: &[Value],
        updates: &[(String, Value)],
    ) -> AppResult<()> {
        let mut set_clauses: Vec<String> = updates
            .iter()
            .enumerate()
            .map(|(i, (col, _))| format!("{} = ?{}", col, i + 1))
            .collect();
        set_clauses.push(format!("{} = ?{}", SYSTEM_VERSION_COLUMN, updates.len() + 1));

        let (where_clause, pk_args) = pkmod::build_where_clause(table, pk_values);
        let where_offset = updates.len() + 2;
        let where_clause = rebase_placeholders(&where_clause, where_offset);

        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            table.name,
            set_clauses.join(", "),
            where_clause
        );

        let mut args: Vec<Value> = updates.iter().map(|(_, v)| v.clone()).collect();
        args.push(Value::Text(crate::lww::hlc::HlcClock::stamp()));
        args.extend(pk_args);

        conn.execute(&sql, rusqlite::params_from_iter(args.iter()))?;
        Ok(())
    }

    pub fn update_where(
        &self,
        table: &str,
        where_clause: &str,
        where_args: &[Value],
        values: RowMap,
    ) -> AppResult<usize> {
        if values.is_empty() {
            return Err(AppError::usage("update requires at least one column"));
        }
        let t = self.table(table)?.clone();
        for key in values.keys() {
            if !t.has_column(key) {
                return Err(AppError::usage(format!(
                    "unknown column '{}' on table '{}'",
                    key, t.name
                )));
            }
        }

        self.db.with_transaction(|conn| {
            let mut columns: Vec<&str> = values.keys().map(|s| s.as_str()).collect();
            columns.sort_unstable();
            let mut set_clauses: Vec<String> = columns
                .iter()
                .enumerate()
                .map(|(i, c)| format!("{} = ?{}", c, i + 1))
                .collect();
            set_clauses.push(format!("{} = ?{}", SYSTEM_VERSION_COLUMN, columns.len() + 1));

            let rebased_where = rebase_placeholders(where_clause, columns.len() + 2);
            let sql = format!(
                "UPDATE {} SET {} WHERE {}",
                t.name,
                set_clauses.join(", "),
                rebased_where
            );

            let mut args: Vec<Value> = columns
                .iter()
                .map(|c| values.get(*c).cloned().unwrap())
                .collect();
            args.push(Value::Text(crate::lww::hlc::HlcClock::stamp()));
            args.extend(where_args.iter().cloned());

            let affected = conn.execute(&sql, rusqlite::params_from_iter(args.iter()))?;
            Ok(affected)
        })
    }

    pub fn delete_by_primary_key(&self, table: &str, pk: &PrimaryKey) -> AppResult<()> {
        let t = self.table(table)?.clone();
        let pk_values = pkmod::normalize(&t, pk)?;
        let (clause, args) = pkmod::build_where_clause(&t, &pk_values);
        let sql = format!("DELETE FROM {} WHERE {}", t.name, clause);
        self.db.with_transaction(|conn| {
            conn.execute(&sql, rusqlite::params_from_iter(args.iter()))?;
            Ok(())
        })
    }

    pub fn delete_where(&self, table: &str, where_clause: &str, args: &[Value]) -> AppResult<usize> {
        let t = self.table(table)?;
        let sql = format!("DELETE FROM {} WHERE {}", t.name, where_clause);
        self.db.with_transaction(|conn| {
            let affected = conn.execute(&sql, rusqlite::params_from_iter(args.iter()))?;
            Ok(affected)
        })
    }

    // ------------------------------------------------------------------
    // Bulk load
    // ------------------------------------------------------------------

    /// Bulk-load semantics per spec.md §4.3/§4.4. When any LWW column is
    /// touched, delegates to `LwwEngine::bulk_load_with_lww` for the
    /// per-row conflict resolution; otherwise runs the plain path here.
    pub fn bulk_load(
        &self,
        table: &str,
        rows: Vec<RowMap>,
        options: BulkLoadOptions,
    ) -> AppResult<BulkLoadResult> {
        let t = self.table(table)?.clone();
        let touches_lww = t.lww_columns().next().is_some()
            && rows.iter().any(|r| t.lww_columns().any(|c| r.contains_key(&c.name)));

        if touches_lww {
            let lww = self.lww.clone().ok_or_else(|| {
                AppError::usage(format!(
                    "bulk load on '{}' touches LWW columns but no LWW capability is attached",
                    t.name
                ))
            })?;
            return lww.bulk_load_with_lww(&t, rows, &options);
        }

        self.db.with_transaction(|conn| {
            if options.clear_table_first {
                conn.execute(&format!("DELETE FROM {}", t.name), [])?;
            }
            let mut result = BulkLoadResult::default();
            for batch in rows.chunks(options.batch_size.max(1)) {
                for row in batch {
                    result.processed += 1;
                    match self.bulk_load_one_row(conn, &t, row, &options) {
                        Ok(Outcome::Inserted) => result.inserted += 1,
                        Ok(Outcome::Updated) => result.updated += 1,
                        Ok(Outcome::Skipped(msg)) => {
                            result.skipped += 1;
                            if options.collect_errors {
                                result.errors.push(msg);
                            }
                        }
                        Err(e) => {
                            if options.allow_partial_data {
                                result.skipped += 1;
                                result.errors.push(e.to_string());
                            } else {
                                return Err(e);
                            }
                        }
                    }
                }
            }
            Ok(result)
        })
    }

    fn bulk_load_one_row(
        &self,
        conn: &Connection,
        table: &Table,
        row: &RowMap,
        options: &BulkLoadOptions,
    ) -> AppResult<Outcome> {
        let mut projected: RowMap = row
            .iter()
            .filter(|(k, _)| table.has_column(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        if options.validate_data {
            for required in table.required_columns() {
                if !projected.contains_key(&required.name) {
                    let msg = format!(
                        "row missing required column '{}' on table '{}'",
                        required.name, table.name
                    );
                    if options.allow_partial_data {
                        return Ok(Outcome::Skipped(msg));
                    }
                    return Err(AppError::usage(msg));
                }
            }
        }

        if options.upsert_mode {
            let pk_values = self.bulk_pk_values(table, &projected)?;
            let existing = {
                let (clause, args) = pkmod::build_where_clause(table, &pk_values);
                let sql = format!("SELECT 1 FROM {} WHERE {} LIMIT 1", table.name, clause);
                conn.query_row(&sql, rusqlite::params_from_iter(args.iter()), |_| Ok(()))
                    .optional()?
            };
            if existing.is_some() {
                projected.remove(&table.primary_key[0].clone());
                for col in &table.primary_key {
                    projected.remove(col);
                }
                let mut set_clauses: Vec<String> = projected
                    .keys()
                    .enumerate()
                    .map(|(i, c)| format!("{} = ?{}", c, i + 1))
                    .collect();
                set_clauses.push(format!("{} = ?{}", SYSTEM_VERSION_COLUMN, projected.len() + 1));
                let (where_clause, pk_args) = pkmod::build_where_clause(table, &pk_values);
                let where_clause = rebase_placeholders(&where_clause, projected.len() + 2);
                let sql = format!(
                    "UPDATE {} SET {} WHERE {}",
                    table.name,
                    set_clauses.join(", "),
                    where_clause
                );
                let mut args: Vec<Value> = projected.values().cloned().collect();
                args.push(Value::Text(crate::lww::hlc::HlcClock::stamp()));
                args.extend(pk_args);
                conn.execute(&sql, rusqlite::params_from_iter(args.iter()))?;
                debug!("bulk_load upsert: updated row on '{}'", table.name);
                return Ok(Outcome::Updated);
            }
        }

        self.fill_system_columns_for_insert(&mut projected);
        Self::execute_insert(conn, table, &projected)?;
        Ok(Outcome::Inserted)
    }

    fn bulk_pk_values(&self, table: &Table, row: &RowMap) -> AppResult<Vec<Value>> {
        let mut out = Vec::with_capacity(table.primary_key.len());
        for col in &table.primary_key {
            let v = row.get(col).cloned().ok_or_else(|| {
                AppError::usage(format!(
                    "upsert requires primary key column '{}' to be present",
                    col
                ))
            })?;
            out.push(v);
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Shared query helpers
    // ------------------------------------------------------------------

    fn query_one(
        conn: &Connection,
        sql: &str,
        args: &[Value],
        table: &Table,
    ) -> AppResult<Option<RowMap>> {
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(args.iter()))?;
        if let Some(row) = rows.next()? {
            Ok(Some(decode_row(row, table)?))
        } else {
            Ok(None)
        }
    }

    fn query_many(
        conn: &Connection,
        sql: &str,
        args: &[Value],
        table: &Table,
    ) -> AppResult<Vec<RowMap>> {
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(args.iter()))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(decode_row(row, table)?);
        }
        Ok(out)
    }
}

enum Outcome {
    Inserted,
    Updated,
    Skipped(String),
}

/// Rewrites `?1`, `?2`, ... placeholders in a fragment to start counting
/// from `start`, so fragments built independently can be concatenated into
/// one parameterized statement without colliding parameter numbers.
fn rebase_placeholders(fragment: &str, start: usize) -> String {
    let mut out = String::with_capacity(fragment.len());
    let mut chars = fragment.char_indices().peekable();
    while let Some((_, ch)) = chars.next() {
        if ch == '?' {
            let mut digits = String::new();
            while let Some(&(_, d)) = chars.peek() {
                if d.is_ascii_digit() {
                    digits.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            if digits.is_empty() {
                out.push('?');
            } else {
                let n: usize = digits.parse().unwrap_or(1);
                out.push_str(&format!("?{}", n + start - 1));
            }
        } else {
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, Table};
    use crate::value::TypeAffinity;

    fn test_schema() -> Schema {
        let table = Table::builder("tasks")
            .auto_increment_primary_key("id")
            .column(Column::new("title", TypeAffinity::Text).with_constraint(
                crate::schema::ColumnConstraint::NotNull,
            ))
            .column(Column::new("hours", TypeAffinity::Real))
            .build()
            .unwrap();
        Schema::builder().table(table).build().unwrap()
    }

    fn test_da() -> DataAccess {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let schema = Arc::new(test_schema());
        crate::database::Migrator::new().migrate(&db, &schema).unwrap();
        DataAccess::new(db, schema)
    }

    #[test]
    fn insert_then_get_round_trips_and_fills_system_columns() {
        let da = test_da();
        let mut values = HashMap::new();
        values.insert("title".to_string(), Value::Text("write report".into()));
        values.insert("hours".to_string(), Value::Real(2.5));
        let rowid = da.insert("tasks", values).unwrap();
        assert!(rowid > 0);

        let row = da
            .get_by_primary_key("tasks", &PrimaryKey::Scalar(Value::Integer(rowid)))
            .unwrap()
            .unwrap();
        assert_eq!(row.get("title"), Some(&Value::Text("write report".into())));
        match row.get(SYSTEM_ID_COLUMN) {
            Some(Value::Text(s)) => assert_eq!(s.len(), 36),
            other => panic!("expected systemId, got {:?}", other),
        }
        assert!(matches!(row.get(SYSTEM_VERSION_COLUMN), Some(Value::Text(_))));
    }

    #[test]
    fn insert_rejects_unknown_column() {
        let da = test_da();
        let mut values = HashMap::new();
        values.insert("title".to_string(), Value::Text("x".into()));
        values.insert("nope".to_string(), Value::Integer(1));
        let err = da.insert("tasks", values).unwrap_err();
        assert!(matches!(err, AppError::Usage { .. }));
    }

    #[test]
    fn insert_rejects_missing_required_column() {
        let da = test_da();
        let values = HashMap::new();
        let err = da.insert("tasks", values).unwrap_err();
        assert!(matches!(err, AppError::Usage { .. }));
    }

    #[test]
    fn update_rejects_empty_value_map() {
        let da = test_da();
        let mut values = HashMap::new();
        values.insert("title".to_string(), Value::Text("x".into()));
        let rowid = da.insert("tasks", values).unwrap();
        let err = da
            .update_by_primary_key("tasks", &PrimaryKey::Scalar(Value::Integer(rowid)), HashMap::new())
            .unwrap_err();
        assert!(matches!(err, AppError::Usage { .. }));
    }

    #[test]
    fn update_bumps_system_version() {
        let da = test_da();
        let mut values = HashMap::new();
        values.insert("title".to_string(), Value::Text("x".into()));
        let rowid = da.insert("tasks", values).unwrap();
        let before = da
            .get_by_primary_key("tasks", &PrimaryKey::Scalar(Value::Integer(rowid)))
            .unwrap()
            .unwrap();

        let mut update = HashMap::new();
        update.insert("title".to_string(), Value::Text("y".into()));
        da.update_by_primary_key("tasks", &PrimaryKey::Scalar(Value::Integer(rowid)), update)
            .unwrap();

        let after = da
            .get_by_primary_key("tasks", &PrimaryKey::Scalar(Value::Integer(rowid)))
            .unwrap()
            .unwrap();
        assert_ne!(
            before.get(SYSTEM_VERSION_COLUMN),
            after.get(SYSTEM_VERSION_COLUMN)
        );
        assert_eq!(after.get("title"), Some(&Value::Text("y".into())));
    }

    #[test]
    fn bulk_load_reports_counts() {
        let da = test_da();
        let rows = vec![
            HashMap::from([("title".to_string(), Value::Text("a".into()))]),
            HashMap::from([("title".to_string(), Value::Text("b".into()))]),
        ];
        let result = da.bulk_load("tasks", rows, BulkLoadOptions::default()).unwrap();
        assert_eq!(result.processed, 2);
        assert_eq!(result.inserted, 2);
        assert_eq!(da.count("tasks", None, &[]).unwrap(), 2);
    }
}
