//! Migrator (C2): brings a live database to match the declared schema
//! additively. No column type changes, column drops or table drops — that
//! is explicitly out of scope (spec.md §4.2).

use crate::database::core::Database;
use crate::errors::AppResult;
use crate::schema::Schema;
use log::{debug, info};
use rusqlite::{params, Connection};
use std::collections::HashSet;

/// What `plan` found missing relative to the live database.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationPlan {
    pub tables_to_create: Vec<String>,
    /// (table, index_name) pairs that must be created.
    pub indices_to_create: Vec<(String, String)>,
}

impl MigrationPlan {
    pub fn is_empty(&self) -> bool {
        self.tables_to_create.is_empty() && self.indices_to_create.is_empty()
    }
}

pub struct Migrator;

impl Migrator {
    pub fn new() -> Self {
        Self
    }

    /// Pre-flight checks: empty tables, indices referencing unknown
    /// columns. Read-only; never touches the database.
    pub fn validate(&self, schema: &Schema) -> Vec<String> {
        let mut errors = Vec::new();
        for table in schema.tables() {
            if table.columns.is_empty() {
                errors.push(format!("table '{}' has no columns", table.name));
            }
            for index in &table.indices {
                for col in &index.columns {
                    if !table.has_column(col) {
                        errors.push(format!(
                            "index '{}' on table '{}' references unknown column '{}'",
                            index.name, table.name, col
                        ));
                    }
                }
            }
        }
        errors
    }

    /// Read-only introspection against `sqlite_master` to determine what
    /// is missing. Never mutates the database.
    pub fn plan(&self, db: &Database, schema: &Schema) -> AppResult<MigrationPlan> {
        let conn = db.get_connection()?;
        let plan = self.plan_with_connection(&conn, schema)?;
        db.return_connection(conn);
        Ok(plan)
    }

    fn plan_with_connection(&self, conn: &Connection, schema: &Schema) -> AppResult<MigrationPlan> {
        let existing_tables = Self::existing_names(conn, "table")?;
        let existing_indices = Self::existing_names(conn, "index")?;

        let mut plan = MigrationPlan::default();
        for table in schema.tables() {
            if !existing_tables.contains(&table.name) {
                plan.tables_to_create.push(table.name.clone());
                for index in &table.indices {
                    plan.indices_to_create
                        .push((table.name.clone(), index.name.clone()));
                }
            } else {
                for index in &table.indices {
                    if !existing_indices.contains(&index.name) {
                        plan.indices_to_create
                            .push((table.name.clone(), index.name.clone()));
                    }
                }
            }
        }
        Ok(plan)
    }

    fn existing_names(conn: &Connection, kind: &str) -> AppResult<HashSet<String>> {
        let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type = ?1")?;
        let rows = stmt.query_map([kind], |row| row.get::<_, String>(0))?;
        let mut names = HashSet::new();
        for row in rows {
            names.insert(row?);
        }
        Ok(names)
    }

    /// Idempotent: create missing tables with their indices; for existing
    /// tables, create only the indices that are absent. Views are created
    /// unconditionally with `IF NOT EXISTS`, same idempotency guarantee.
    pub fn migrate(&self, db: &Database, schema: &Schema) -> AppResult<MigrationPlan> {
        db.with_transaction(|conn| {
            let plan = self.plan_with_connection(conn, schema)?;

            let to_create: HashSet<&str> =
                plan.tables_to_create.iter().map(String::as_str).collect();

            for table in schema.tables() {
                if to_create.contains(table.name.as_str()) {
                    info!("creating table '{}'", table.name);
                    conn.execute(&table.create_table_sql(), [])?;
                }
            }

            let indices_needed: HashSet<(&str, &str)> = plan
                .indices_to_create
                .iter()
                .map(|(t, i)| (t.as_str(), i.as_str()))
                .collect();

            for table in schema.tables() {
                for index in &table.indices {
                    if indices_needed.contains(&(table.name.as_str(), index.name.as_str())) {
                        debug!("creating index '{}' on '{}'", index.name, table.name);
                        conn.execute(&index.create_index_sql(&table.name), [])?;
                    }
                }
            }

            for view in schema.views() {
                conn.execute(&view.create_view_sql()?, [])?;
            }

            Self::record_applied(conn, schema)?;
            Ok(plan)
        })
    }

    /// Diagnostic-only bookkeeping table; never consulted to decide what
    /// to create (`plan`'s live introspection is the source of truth), so
    /// re-running `migrate` after a manual schema edit stays correct.
    fn record_applied(conn: &Connection, schema: &Schema) -> AppResult<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS _schema_migrations (
                schema_name TEXT PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;
        for table in schema.tables() {
            conn.execute(
                "INSERT INTO _schema_migrations (schema_name, applied_at)
                 VALUES (?1, datetime('now'))
                 ON CONFLICT(schema_name) DO NOTHING",
                params![&table.name],
            )?;
        }
        Ok(())
    }
}

impl Default for Migrator {
    fn default() -> Self {
        Self::new()
    }
}
