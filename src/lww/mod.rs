//! LWW (Last-Writer-Wins) Column Engine (C4): per-column conflict
//! resolution keyed by HLC timestamps, an in-memory write cache, a
//! persisted per-column timestamp index, and a pending-operations queue
//! feeding the sync manager.
//!
//! Holds its own `Database`/`Schema` handles rather than depending on
//! `DataAccess`, so `DataAccess` can hold an optional `LwwEngine` as a
//! capability without a circular module dependency.

pub mod hlc;

use crate::data_access::{BulkLoadOptions, BulkLoadResult};
use crate::database::Database;
use crate::errors::{AppError, AppResult};
use crate::pk;
use crate::row::{decode_row, select_columns_sql, RowMap};
use crate::schema::{Schema, Table, SYSTEM_ID_COLUMN, SYSTEM_VERSION_COLUMN};
use crate::value::{serialize_pk, Value};
use hlc::HlcClock;
use log::{debug, warn};
use rusqlite::{params, Connection};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

const TIMESTAMP_TABLE: &str = "_lww_column_timestamps";

/// A single column's last-known value and provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct LwwColumnValue {
    pub column: String,
    pub value: Value,
    pub timestamp: String,
    pub is_from_server: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingKind {
    Insert,
    Update,
    Delete,
}

/// A locally originated write awaiting upload (C7 drains this queue).
#[derive(Debug, Clone)]
pub struct PendingOperation {
    pub id: String,
    pub table: String,
    pub kind: PendingKind,
    pub primary_key: Vec<Value>,
    pub column_updates: HashMap<String, LwwColumnValue>,
    pub created_timestamp: String,
    pub synced: bool,
}

/// Per-call override for `update_lww_column`.
#[derive(Debug, Clone, Default)]
pub struct UpdateLwwOptions {
    pub explicit_timestamp: Option<String>,
    pub is_from_server: bool,
}

type CacheKey = (String, String);

pub struct LwwEngine {
    db: Arc<Database>,
    #[allow(dead_code)]
    schema: Arc<Schema>,
    clock: HlcClock,
    cache: RwLock<HashMap<CacheKey, HashMap<String, LwwColumnValue>>>,
    pending: RwLock<Vec<PendingOperation>>,
}

impl LwwEngine {
    /// Initialization (spec.md §4.4.7): creates `_lww_column_timestamps`
    /// if absent and loads the persisted HLC clock state, if any.
    pub fn new(db: Arc<Database>, schema: Arc<Schema>) -> AppResult<Self> {
        let conn = db.get_connection()?;
        ensure_timestamp_table(&conn)?;
        let clock = HlcClock::load(&conn)?;
        db.return_connection(conn);
        Ok(Self {
            db,
            schema,
            clock,
            cache: RwLock::new(HashMap::new()),
            pending: RwLock::new(Vec::new()),
        })
    }

    fn cache_key(table: &str, serialized_pk: &str) -> CacheKey {
        (table.to_string(), serialized_pk.to_string())
    }

    // ------------------------------------------------------------------
    // 1. update-lww-column
    // ------------------------------------------------------------------

    pub fn update_lww_column(
        &self,
        table: &Table,
        pk_values: &[Value],
        column: &str,
        value: Value,
        options: UpdateLwwOptions,
    ) -> AppResult<Value> {
        let col = table.column(column).ok_or_else(|| {
            AppError::usage(format!("unknown column '{}' on table '{}'", column, table.name))
        })?;
        if !col.lww {
            return Err(AppError::usage(format!(
                "column '{}' on table '{}' is not an LWW column",
                column, table.name
            )));
        }

        let serialized_pk = serialize_pk(&table.primary_key, pk_values)?;
        let timestamp = options
            .explicit_timestamp
            .clone()
            .unwrap_or_else(|| self.clock.next());
        let incoming = LwwColumnValue {
            column: column.to_string(),
            value,
            timestamp,
            is_from_server: options.is_from_server,
        };

        let existing = self.existing_value(table, pk_values, &serialized_pk, column)?;
        let incoming_wins = match &existing {
            None => true,
            Some(e) => hlc::compare(&incoming.timestamp, &e.timestamp) == Ordering::Greater,
        };

        let winner = if incoming_wins {
            self.db.with_transaction(|conn| {
                Self::upsert_timestamp_row(conn, &table.name, &serialized_pk, &incoming)?;
                if let Err(e) = Self::write_base_column(conn, table, pk_values, column, &incoming.value) {
                    warn!(
                        "base-table LWW write failed for {}.{} ({}): {}",
                        table.name, column, serialized_pk, e
                    );
                }
                Ok(())
            })?;
            self.store_cache_entry(&serialized_pk, table, incoming.clone());
            if !incoming.is_from_server {
                self.enqueue_pending_update(table, pk_values, incoming.clone());
            }
            incoming
        } else {
            let winner = existing.expect("incoming_wins is false only when existing is Some");
            self.store_cache_entry(&serialized_pk, table, winner.clone());
            winner
        };

        Ok(winner.value)
    }

    fn store_cache_entry(&self, serialized_pk: &str, table: &Table, value: LwwColumnValue) {
        let mut cache = self.cache.write().expect("lww cache lock poisoned");
        cache
            .entry(Self::cache_key(&table.name, serialized_pk))
            .or_default()
            .insert(value.column.clone(), value);
    }

    fn enqueue_pending_update(&self, table: &Table, pk_values: &[Value], value: LwwColumnValue) {
        let mut updates = HashMap::new();
        updates.insert(value.column.clone(), value.clone());
        let op = PendingOperation {
            id: Uuid::new_v4().to_string(),
            table: table.name.clone(),
            kind: PendingKind::Update,
            primary_key: pk_values.to_vec(),
            column_updates: updates,
            created_timestamp: value.timestamp,
            synced: false,
        };
        self.pending.write().expect("pending queue lock poisoned").push(op);
    }

    /// Cache lookup, falling back to (base-row value, timestamp-store
    /// entry). Absent either, this column has no prior LWW history.
    fn existing_value(
        &self,
        table: &Table,
        pk_values: &[Value],
        serialized_pk: &str,
        column: &str,
    ) -> AppResult<Option<LwwColumnValue>> {
        {
            let cache = self.cache.read().expect("lww cache lock poisoned");
            if let Some(hit) = cache
                .get(&Self::cache_key(&table.name, serialized_pk))
                .and_then(|m| m.get(column))
            {
                return Ok(Some(hit.clone()));
            }
        }

        let conn = self.db.get_connection()?;
        let stored = conn
            .query_row(
                &format!(
                    "SELECT timestamp, is_from_server FROM {} \
                     WHERE table_name = ?1 AND primary_key_value = ?2 AND column_name = ?3",
                    TIMESTAMP_TABLE
                ),
                params![table.name, serialized_pk, column],
                |row| {
                    let ts: String = row.get(0)?;
                    let is_from_server: i64 = row.get(1)?;
                    Ok((ts, is_from_server != 0))
                },
            )
            .ok();

        let result = match stored {
            None => None,
            Some((timestamp, is_from_server)) => {
                let value = Self::read_base_column(&conn, table, pk_values, column)?;
                value.map(|v| LwwColumnValue {
                    column: column.to_string(),
                    value: v,
                    timestamp,
                    is_from_server,
                })
            }
        };
        self.db.return_connection(conn);
        Ok(result)
    }

    fn read_base_column(
        conn: &Connection,
        table: &Table,
        pk_values: &[Value],
        column: &str,
    ) -> AppResult<Option<Value>> {
        let (clause, args) = pk::build_where_clause(table, pk_values);
        let sql = format!("SELECT {} FROM {} WHERE {} LIMIT 1", column, table.name, clause);
        let col_affinity = table
            .column(column)
            .ok_or_else(|| AppError::usage(format!("unknown column '{}' on table '{}'", column, table.name)))?
            .affinity;
        conn.query_row(&sql, rusqlite::params_from_iter(args.iter()), |row| {
            let raw: rusqlite::types::Value = row.get(0)?;
            Ok(raw)
        })
        .ok()
        .map(|raw| Value::from_sql_with_affinity(raw, col_affinity))
        .transpose()
    }

    fn write_base_column(
        conn: &Connection,
        table: &Table,
        pk_values: &[Value],
        column: &str,
        value: &Value,
    ) -> AppResult<()> {
        let (where_clause, pk_args) = pk::build_where_clause(table, pk_values);
        let where_clause = rebase(&where_clause, 3);
        let sql = format!(
            "UPDATE {} SET {} = ?1, {} = ?2 WHERE {}",
            table.name, column, SYSTEM_VERSION_COLUMN, where_clause
        );
        let mut args: Vec<Value> = vec![value.clone(), Value::Text(HlcClock::stamp())];
        args.extend(pk_args);
        conn.execute(&sql, rusqlite::params_from_iter(args.iter()))?;
        Ok(())
    }

    fn upsert_timestamp_row(
        conn: &Connection,
        table_name: &str,
        serialized_pk: &str,
        value: &LwwColumnValue,
    ) -> AppResult<()> {
        conn.execute(
            &format!(
                "INSERT INTO {} (table_name, primary_key_value, column_name, timestamp, is_from_server) \
                 VALUES (?1, ?2, ?3, ?4, ?5) \
                 ON CONFLICT(table_name, primary_key_value, column_name) \
                 DO UPDATE SET timestamp = excluded.timestamp, is_from_server = excluded.is_from_server",
                TIMESTAMP_TABLE
            ),
            params![
                table_name,
                serialized_pk,
                value.column,
                value.timestamp,
                value.is_from_server as i64
            ],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // 2/3. get-lww-column-value / get-lww-row
    // ------------------------------------------------------------------

    pub fn get_lww_column_value(&self, table: &Table, pk_values: &[Value], column: &str) -> AppResult<Option<Value>> {
        let serialized_pk = serialize_pk(&table.primary_key, pk_values)?;
        {
            let cache = self.cache.read().expect("lww cache lock poisoned");
            if let Some(hit) = cache
                .get(&Self::cache_key(&table.name, &serialized_pk))
                .and_then(|m| m.get(column))
            {
                return Ok(Some(hit.value.clone()));
            }
        }
        let conn = self.db.get_connection()?;
        let value = Self::read_base_column(&conn, table, pk_values, column)?;
        self.db.return_connection(conn);
        Ok(value)
    }

    pub fn get_lww_row(&self, table: &Table, pk_values: &[Value]) -> AppResult<Option<RowMap>> {
        let serialized_pk = serialize_pk(&table.primary_key, pk_values)?;
        let conn = self.db.get_connection()?;
        let (clause, args) = pk::build_where_clause(table, pk_values);
        let sql = format!(
            "SELECT {} FROM {} WHERE {} LIMIT 1",
            select_columns_sql(table),
            table.name,
            clause
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(args.iter()))?;
        let base = match rows.next()? {
            Some(row) => Some(decode_row(row, table)?),
            None => None,
        };
        drop(stmt);
        self.db.return_connection(conn);

        let mut base = match base {
            Some(b) => b,
            None => return Ok(None),
        };

        let cache = self.cache.read().expect("lww cache lock poisoned");
        if let Some(overrides) = cache.get(&Self::cache_key(&table.name, &serialized_pk)) {
            for (column, lww_value) in overrides {
                base.insert(column.clone(), lww_value.value.clone());
            }
        }
        Ok(Some(base))
    }

    // ------------------------------------------------------------------
    // 4. apply-server-update
    // ------------------------------------------------------------------

    pub fn apply_server_update(
        &self,
        table: &Table,
        pk_values: &[Value],
        server_values: RowMap,
        server_timestamp: &str,
    ) -> AppResult<RowMap> {
        let mut effective = RowMap::new();
        let mut direct_updates: Vec<(String, Value)> = Vec::new();

        for (column, value) in server_values {
            if column == SYSTEM_ID_COLUMN || column == SYSTEM_VERSION_COLUMN {
                continue;
            }
            let is_lww = table.column(&column).map(|c| c.lww).unwrap_or(false);
            if is_lww {
                let winner = self.update_lww_column(
                    table,
                    pk_values,
                    &column,
                    value,
                    UpdateLwwOptions {
                        explicit_timestamp: Some(server_timestamp.to_string()),
                        is_from_server: true,
                    },
                )?;
                effective.insert(column, winner);
            } else {
                effective.insert(column.clone(), value.clone());
                direct_updates.push((column, value));
            }
        }

        if !direct_updates.is_empty() {
            let (where_clause, pk_args) = pk::build_where_clause(table, pk_values);
            self.db.with_transaction(|conn| {
                let mut set_clauses: Vec<String> = direct_updates
                    .iter()
                    .enumerate()
                    .map(|(i, (c, _))| format!("{} = ?{}", c, i + 1))
                    .collect();
                set_clauses.push(format!("{} = ?{}", SYSTEM_VERSION_COLUMN, direct_updates.len() + 1));
                let rebased = rebase(&where_clause, direct_updates.len() + 2);
                let sql = format!("UPDATE {} SET {} WHERE {}", table.name, set_clauses.join(", "), rebased);
                let mut args: Vec<Value> = direct_updates.iter().map(|(_, v)| v.clone()).collect();
                args.push(Value::Text(HlcClock::stamp()));
                args.extend(pk_args.clone());
                conn.execute(&sql, rusqlite::params_from_iter(args.iter()))?;
                Ok(())
            })?;
        }

        Ok(effective)
    }

    // ------------------------------------------------------------------
    // Insert-time initialization (called by DataAccess::insert)
    // ------------------------------------------------------------------

    /// Records initial timestamp-store rows for a freshly inserted row's
    /// LWW columns, in the same transaction as the INSERT (spec.md §4.4.7).
    pub fn record_initial_timestamps(
        &self,
        conn: &Connection,
        table: &Table,
        pk_values: &[Value],
        lww_values: &[(String, Value)],
        is_from_server: bool,
    ) -> AppResult<()> {
        let serialized_pk = serialize_pk(&table.primary_key, pk_values)?;
        let timestamp = self.clock.next();
        for (column, value) in lww_values {
            let lww_value = LwwColumnValue {
                column: column.clone(),
                value: value.clone(),
                timestamp: timestamp.clone(),
                is_from_server,
            };
            Self::upsert_timestamp_row(conn, &table.name, &serialized_pk, &lww_value)?;
            self.store_cache_entry(&serialized_pk, table, lww_value);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // 5. bulk-load with LWW
    // ------------------------------------------------------------------

    pub fn bulk_load_with_lww(
        &self,
        table: &Table,
        rows: Vec<RowMap>,
        options: &BulkLoadOptions,
    ) -> AppResult<BulkLoadResult> {
        let timestamps = options.lww_timestamps.as_ref().ok_or_else(|| {
            AppError::usage(format!(
                "bulk load on '{}' touches LWW columns but no per-row lww_timestamps were supplied",
                table.name
            ))
        })?;

        self.db.with_transaction(|conn| {
            let mut result = BulkLoadResult::default();
            if options.clear_table_first {
                conn.execute(&format!("DELETE FROM {}", table.name), [])?;
            }

            for (index, row) in rows.iter().enumerate() {
                result.processed += 1;
                match self.bulk_load_one_row_lww(conn, table, row, index, timestamps, options) {
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
            Ok(result)
        })
    }

    fn bulk_load_one_row_lww(
        &self,
        conn: &Connection,
        table: &Table,
        row: &RowMap,
        index: usize,
        timestamps: &HashMap<usize, HashMap<String, String>>,
        options: &BulkLoadOptions,
    ) -> AppResult<Outcome> {
        let projected: RowMap = row
            .iter()
            .filter(|(k, _)| table.has_column(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let row_timestamps = timestamps.get(&index);
        for col in table.lww_columns() {
            if projected.contains_key(&col.name)
                && row_timestamps.and_then(|m| m.get(&col.name)).is_none()
            {
                let msg = format!(
                    "row {} is missing an lww timestamp for column '{}' on table '{}'",
                    index, col.name, table.name
                );
                if options.allow_partial_data {
                    return Ok(Outcome::Skipped(msg));
                }
                return Err(AppError::usage(msg));
            }
        }

        if options.validate_data {
            for required in table.required_columns() {
                if !projected.contains_key(&required.name) {
                    let msg = format!(
                        "row {} missing required column '{}' on table '{}'",
                        index, required.name, table.name
                    );
                    if options.allow_partial_data {
                        return Ok(Outcome::Skipped(msg));
                    }
                    return Err(AppError::usage(msg));
                }
            }
        }

        let pk_values: Option<Vec<Value>> = table
            .primary_key
            .iter()
            .map(|c| projected.get(c).cloned())
            .collect();

        if options.upsert_mode {
            let pk_values = pk_values.ok_or_else(|| {
                AppError::usage(format!(
                    "upsert requires the full primary key to be present on row {}",
                    index
                ))
            })?;
            let serialized_pk = serialize_pk(&table.primary_key, &pk_values)?;
            let (clause, args) = pk::build_where_clause(table, &pk_values);
            let exists = conn
                .query_row(
                    &format!("SELECT 1 FROM {} WHERE {} LIMIT 1", table.name, clause),
                    rusqlite::params_from_iter(args.iter()),
                    |_| Ok(()),
                )
                .is_ok();

            if exists {
                for col in table.lww_columns() {
                    if let Some(value) = projected.get(&col.name) {
                        let supplied_ts = row_timestamps
                            .and_then(|m| m.get(&col.name))
                            .expect("presence checked above")
                            .clone();
                        let existing = self.existing_value(table, &pk_values, &serialized_pk, &col.name)?;
                        let wins = match &existing {
                            None => true,
                            Some(e) => hlc::compare(&supplied_ts, &e.timestamp) == Ordering::Greater,
                        };
                        let winning_value = LwwColumnValue {
                            column: col.name.clone(),
                            value: if wins {
                                value.clone()
                            } else {
                                existing.as_ref().unwrap().value.clone()
                            },
                            timestamp: if wins {
                                supplied_ts
                            } else {
                                existing.as_ref().unwrap().timestamp.clone()
                            },
                            is_from_server: options.is_from_server,
                        };
                        Self::upsert_timestamp_row(conn, &table.name, &serialized_pk, &winning_value)?;
                        self.store_cache_entry(&serialized_pk, table, winning_value.clone());
                        if wins {
                            Self::write_base_column(conn, table, &pk_values, &col.name, &value.clone())?;
                        }
                    }
                }

                let non_lww: Vec<(String, Value)> = projected
                    .iter()
                    .filter(|(k, _)| !table.lww_columns().any(|c| &c.name == *k) && !table.primary_key.contains(*k))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                if !non_lww.is_empty() {
                    let mut set_clauses: Vec<String> = non_lww
                        .iter()
                        .enumerate()
                        .map(|(i, (c, _))| format!("{} = ?{}", c, i + 1))
                        .collect();
                    set_clauses.push(format!("{} = ?{}", SYSTEM_VERSION_COLUMN, non_lww.len() + 1));
                    let rebased = rebase(&clause, non_lww.len() + 2);
                    let sql = format!("UPDATE {} SET {} WHERE {}", table.name, set_clauses.join(", "), rebased);
                    let mut update_args: Vec<Value> = non_lww.iter().map(|(_, v)| v.clone()).collect();
                    update_args.push(Value::Text(HlcClock::stamp()));
                    update_args.extend(args.clone());
                    conn.execute(&sql, rusqlite::params_from_iter(update_args.iter()))?;
                } else {
                    conn.execute(
                        &format!(
                            "UPDATE {} SET {} = ?1 WHERE {}",
                            table.name,
                            SYSTEM_VERSION_COLUMN,
                            rebase(&clause, 2)
                        ),
                        rusqlite::params_from_iter(
                            std::iter::once(Value::Text(HlcClock::stamp())).chain(args.clone()),
                        ),
                    )?;
                }
                debug!("bulk_load_with_lww: updated row on '{}'", table.name);
                return Ok(Outcome::Updated);
            }
        }

        let mut insert_values = projected.clone();
        insert_values
            .entry(SYSTEM_ID_COLUMN.to_string())
            .or_insert_with(|| Value::Text(Uuid::new_v4().to_string()));
        insert_values
            .entry(SYSTEM_VERSION_COLUMN.to_string())
            .or_insert_with(|| Value::Text(HlcClock::stamp()));
        Self::execute_insert(conn, table, &insert_values)?;

        let inserted_pk: Vec<Value> = table
            .primary_key
            .iter()
            .map(|c| insert_values.get(c).cloned().unwrap_or(Value::Null))
            .collect();
        let serialized_pk = serialize_pk(&table.primary_key, &inserted_pk)?;
        for col in table.lww_columns() {
            if let Some(value) = projected.get(&col.name) {
                let ts = row_timestamps
                    .and_then(|m| m.get(&col.name))
                    .expect("presence checked above")
                    .clone();
                let lww_value = LwwColumnValue {
                    column: col.name.clone(),
                    value: value.clone(),
                    timestamp: ts,
                    is_from_server: options.is_from_server,
                };
                Self::upsert_timestamp_row(conn, &table.name, &serialized_pk, &lww_value)?;
                self.store_cache_entry(&serialized_pk, table, lww_value);
            }
        }
        Ok(Outcome::Inserted)
    }

    fn execute_insert(conn: &Connection, table: &Table, values: &RowMap) -> AppResult<()> {
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
        Ok(())
    }

    // ------------------------------------------------------------------
    // 6. pending-queue operations
    // ------------------------------------------------------------------

    pub fn pending_operations(&self) -> Vec<PendingOperation> {
        self.pending
            .read()
            .expect("pending queue lock poisoned")
            .iter()
            .filter(|op| !op.synced)
            .cloned()
            .collect()
    }

    pub fn mark_synced(&self, id: &str) {
        let mut queue = self.pending.write().expect("pending queue lock poisoned");
        if let Some(op) = queue.iter_mut().find(|op| op.id == id) {
            op.synced = true;
        }
    }

    pub fn remove_synced(&self) {
        let mut queue = self.pending.write().expect("pending queue lock poisoned");
        queue.retain(|op| !op.synced);
    }

    pub fn clear_pending(&self) {
        self.pending.write().expect("pending queue lock poisoned").clear();
    }
}

enum Outcome {
    Inserted,
    Updated,
    Skipped(String),
}

fn ensure_timestamp_table(conn: &Connection) -> AppResult<()> {
    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS {} (
                table_name TEXT NOT NULL,
                primary_key_value TEXT NOT NULL,
                column_name TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                is_from_server INTEGER NOT NULL,
                PRIMARY KEY (table_name, primary_key_value, column_name)
            )",
            TIMESTAMP_TABLE
        ),
        [],
    )?;
    Ok(())
}

fn rebase(fragment: &str, start: usize) -> String {
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
    use crate::schema::{Column, ColumnConstraint, Schema, Table};
    use crate::value::TypeAffinity;

    fn test_table() -> Table {
        Table::builder("tasks")
            .auto_increment_primary_key("id")
            .column(
                Column::new("title", TypeAffinity::Text).with_constraint(ColumnConstraint::NotNull),
            )
            .column(Column::new("hours", TypeAffinity::Real).lww())
            .column(Column::new("rate", TypeAffinity::Real).lww())
            .build()
            .unwrap()
    }

    fn setup() -> (Arc<Database>, Arc<Schema>, LwwEngine) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let table = test_table();
        let schema = Arc::new(Schema::builder().table(table).build().unwrap());
        crate::database::Migrator::new().migrate(&db, &schema).unwrap();
        let engine = LwwEngine::new(db.clone(), schema.clone()).unwrap();
        (db, schema, engine)
    }

    fn insert_row(db: &Database, table: &Table, hours: f64) -> i64 {
        db.with_transaction(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO {} (title, hours, systemId, systemVersion) VALUES (?1, ?2, ?3, ?4)",
                    table.name
                ),
                params!["write report", hours, Uuid::new_v4().to_string(), "0-0-x"],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .unwrap()
    }

    #[test]
    fn s1_basic_lww_resolution() {
        let (db, schema, engine) = setup();
        let table = schema.table("tasks").unwrap();
        let rowid = insert_row(&db, table, 10.0);
        let pk = vec![Value::Integer(rowid)];

        engine
            .update_lww_column(
                table,
                &pk,
                "hours",
                Value::Real(20.0),
                UpdateLwwOptions {
                    explicit_timestamp: Some("2000-0-node".to_string()),
                    is_from_server: false,
                },
            )
            .unwrap();
        engine
            .update_lww_column(
                table,
                &pk,
                "hours",
                Value::Real(15.0),
                UpdateLwwOptions {
                    explicit_timestamp: Some("1500-0-node".to_string()),
                    is_from_server: false,
                },
            )
            .unwrap();

        let value = engine.get_lww_column_value(table, &pk, "hours").unwrap();
        assert_eq!(value, Some(Value::Real(20.0)));
    }

    #[test]
    fn update_on_non_lww_column_is_usage_error() {
        let (db, schema, engine) = setup();
        let table = schema.table("tasks").unwrap();
        let rowid = insert_row(&db, table, 10.0);
        let err = engine
            .update_lww_column(
                table,
                &[Value::Integer(rowid)],
                "title",
                Value::Text("x".into()),
                UpdateLwwOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(err, AppError::Usage { .. }));
    }

    #[test]
    fn apply_server_update_overwrites_non_lww_column_unconditionally() {
        let (db, schema, engine) = setup();
        let table = schema.table("tasks").unwrap();
        let rowid = insert_row(&db, table, 10.0);
        let pk = vec![Value::Integer(rowid)];

        let mut server_values = RowMap::new();
        server_values.insert("title".to_string(), Value::Text("server title".into()));
        server_values.insert("hours".to_string(), Value::Real(99.0));

        let effective = engine
            .apply_server_update(table, &pk, server_values, "5000-0-server")
            .unwrap();
        assert_eq!(effective.get("title"), Some(&Value::Text("server title".into())));
        assert_eq!(effective.get("hours"), Some(&Value::Real(99.0)));

        let row = engine.get_lww_row(table, &pk).unwrap().unwrap();
        assert_eq!(row.get("title"), Some(&Value::Text("server title".into())));
    }

    #[test]
    fn s3_bulk_load_upsert_mixed_lww_outcomes() {
        let (db, schema, engine) = setup();
        let table = schema.table("tasks").unwrap().clone();
        let rowid = insert_row(&db, &table, 0.0);
        db.with_transaction(|conn| {
            conn.execute(
                &format!("UPDATE {} SET rate = ?1 WHERE id = ?2", table.name),
                params![20.0, rowid],
            )?;
            Ok(())
        })
        .unwrap();

        let conn = db.get_connection().unwrap();
        conn.execute(
            &format!(
                "INSERT INTO {} (table_name, primary_key_value, column_name, timestamp, is_from_server) VALUES (?1,?2,'hours',?3,0)",
                TIMESTAMP_TABLE
            ),
            params![table.name, rowid.to_string(), "100-0-a"],
        )
        .unwrap();
        conn.execute(
            &format!(
                "INSERT INTO {} (table_name, primary_key_value, column_name, timestamp, is_from_server) VALUES (?1,?2,'rate',?3,0)",
                TIMESTAMP_TABLE
            ),
            params![table.name, rowid.to_string(), "100-0-a"],
        )
        .unwrap();
        db.return_connection(conn);

        let mut row = RowMap::new();
        row.insert("id".to_string(), Value::Integer(rowid));
        row.insert("title".to_string(), Value::Text("write report".into()));
        row.insert("hours".to_string(), Value::Real(7.0));
        row.insert("rate".to_string(), Value::Real(25.0));

        let mut timestamps = HashMap::new();
        timestamps.insert(
            0usize,
            HashMap::from([
                ("hours".to_string(), "50-0-server".to_string()),
                ("rate".to_string(), "200-0-server".to_string()),
            ]),
        );

        let options = BulkLoadOptions::default()
            .with_upsert_mode(true)
            .with_is_from_server(true)
            .with_lww_timestamps(timestamps);

        let result = engine.bulk_load_with_lww(&table, vec![row], &options).unwrap();
        assert_eq!(result.updated, 1);

        let pk = vec![Value::Integer(rowid)];
        assert_eq!(
            engine.get_lww_column_value(&table, &pk, "hours").unwrap(),
            Some(Value::Real(0.0))
        );
        assert_eq!(
            engine.get_lww_column_value(&table, &pk, "rate").unwrap(),
            Some(Value::Real(25.0))
        );
    }

    #[test]
    fn pending_queue_enqueues_only_local_writes() {
        let (db, schema, engine) = setup();
        let table = schema.table("tasks").unwrap();
        let rowid = insert_row(&db, table, 1.0);
        let pk = vec![Value::Integer(rowid)];

        engine
            .update_lww_column(
                table,
                &pk,
                "hours",
                Value::Real(5.0),
                UpdateLwwOptions::default(),
            )
            .unwrap();
        assert_eq!(engine.pending_operations().len(), 1);

        engine
            .update_lww_column(
                table,
                &pk,
                "hours",
                Value::Real(6.0),
                UpdateLwwOptions {
                    explicit_timestamp: None,
                    is_from_server: true,
                },
            )
            .unwrap();
        // server-originated writes never enqueue
        assert_eq!(engine.pending_operations().len(), 1);

        let id = engine.pending_operations()[0].id.clone();
        engine.mark_synced(&id);
        assert_eq!(engine.pending_operations().len(), 0);
        engine.remove_synced();
        engine.clear_pending();
    }
}
