use super::{SYSTEM_ID_COLUMN, SYSTEM_VERSION_COLUMN};
use crate::errors::{AppError, AppResult};
use crate::value::TypeAffinity;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnConstraint {
    PrimaryKey,
    Unique,
    NotNull,
}

#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub affinity: TypeAffinity,
    pub constraints: Vec<ColumnConstraint>,
    pub default: Option<String>,
    /// Whether writes to this column are arbitrated by the LWW engine (C4).
    pub lww: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, affinity: TypeAffinity) -> Self {
        Self {
            name: name.into(),
            affinity,
            constraints: Vec::new(),
            default: None,
            lww: false,
        }
    }

    pub fn with_constraint(mut self, c: ColumnConstraint) -> Self {
        self.constraints.push(c);
        self
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn lww(mut self) -> Self {
        self.lww = true;
        self
    }

    pub fn not_null(&self) -> bool {
        self.constraints.contains(&ColumnConstraint::NotNull)
    }

    pub fn unique(&self) -> bool {
        self.constraints.contains(&ColumnConstraint::Unique)
    }

    pub fn is_primary_key(&self) -> bool {
        self.constraints.contains(&ColumnConstraint::PrimaryKey)
    }

    fn column_def_sql(&self) -> String {
        let mut parts = vec![self.name.clone(), self.affinity.as_str().to_string()];
        if self.is_primary_key() {
            parts.push("PRIMARY KEY".to_string());
        }
        if self.not_null() {
            parts.push("NOT NULL".to_string());
        }
        if self.unique() && !self.is_primary_key() {
            parts.push("UNIQUE".to_string());
        }
        if let Some(default) = &self.default {
            parts.push(format!("DEFAULT {}", default));
        }
        parts.join(" ")
    }
}

#[derive(Debug, Clone)]
pub struct Index {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

impl Index {
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn create_index_sql(&self, table: &str) -> String {
        format!(
            "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
            if self.unique { "UNIQUE " } else { "" },
            self.name,
            table,
            self.columns.join(", ")
        )
    }
}

#[derive(Debug, Clone)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    pub indices: Vec<Index>,
    pub primary_key: Vec<String>,
    pub auto_increment: bool,
}

impl Table {
    pub fn builder(name: impl Into<String>) -> TableBuilder {
        TableBuilder::new(name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn lww_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| c.lww)
    }

    pub fn required_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns
            .iter()
            .filter(|c| c.not_null() && c.default.is_none() && !c.is_primary_key())
    }

    pub fn unique_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| c.unique())
    }

    pub fn create_table_sql(&self) -> String {
        let mut defs: Vec<String> = self.columns.iter().map(|c| c.column_def_sql()).collect();
        if self.primary_key.len() > 1 {
            defs.push(format!("PRIMARY KEY ({})", self.primary_key.join(", ")));
        }
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.name,
            defs.join(", ")
        )
    }
}

/// Builds a `Table`, auto-injecting `systemId`/`systemVersion` and
/// validating the invariants in spec.md §4.1.
pub struct TableBuilder {
    name: String,
    columns: Vec<Column>,
    indices: Vec<Index>,
    primary_key: Vec<String>,
    auto_increment: bool,
}

impl TableBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            indices: Vec::new(),
            primary_key: Vec::new(),
            auto_increment: false,
        }
    }

    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    pub fn index(mut self, index: Index) -> Self {
        self.indices.push(index);
        self
    }

    /// Declares a single auto-increment primary key column (must already
    /// exist among `column()` calls, or be added here for convenience).
    pub fn auto_increment_primary_key(mut self, column_name: impl Into<String>) -> Self {
        let name = column_name.into();
        self.primary_key = vec![name.clone()];
        self.auto_increment = true;
        if !self.columns.iter().any(|c| c.name == name) {
            self.columns.push(
                Column::new(name, TypeAffinity::Integer).with_constraint(ColumnConstraint::PrimaryKey),
            );
        }
        self
    }

    /// Declares a composite primary key over already-added columns.
    pub fn composite_primary_key(mut self, columns: Vec<String>) -> Self {
        self.primary_key = columns;
        self.auto_increment = false;
        self
    }

    pub fn build(self) -> AppResult<Table> {
        if self.auto_increment && self.primary_key.len() > 1 {
            return Err(AppError::validation(format!(
                "table '{}' cannot have both an auto-increment primary key and a composite primary key",
                self.name
            )));
        }

        let mut columns = self.columns;
        let mut seen: HashSet<String> = HashSet::new();
        for c in &columns {
            if c.name == SYSTEM_ID_COLUMN || c.name == SYSTEM_VERSION_COLUMN {
                return Err(AppError::validation(format!(
                    "column name '{}' is reserved for system use",
                    c.name
                )));
            }
            if !seen.insert(c.name.clone()) {
                return Err(AppError::validation(format!(
                    "duplicate column name '{}' on table '{}'",
                    c.name, self.name
                )));
            }
        }

        for pk_col in &self.primary_key {
            if !columns.iter().any(|c| &c.name == pk_col) {
                return Err(AppError::validation(format!(
                    "primary key column '{}' is not defined on table '{}'",
                    pk_col, self.name
                )));
            }
        }

        for idx in &self.indices {
            for col in &idx.columns {
                if !columns.iter().any(|c| &c.name == col) {
                    return Err(AppError::validation(format!(
                        "index '{}' references unknown column '{}' on table '{}'",
                        idx.name, col, self.name
                    )));
                }
            }
        }

        columns.push(
            Column::new(SYSTEM_ID_COLUMN, TypeAffinity::Text)
                .with_constraint(ColumnConstraint::NotNull)
                .with_constraint(ColumnConstraint::Unique),
        );
        columns.push(
            Column::new(SYSTEM_VERSION_COLUMN, TypeAffinity::Text)
                .with_constraint(ColumnConstraint::NotNull),
        );

        Ok(Table {
            name: self.name,
            columns,
            indices: self.indices,
            primary_key: self.primary_key,
            auto_increment: self.auto_increment,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_column_name_rejected() {
        let err = Table::builder("widgets")
            .column(Column::new(SYSTEM_ID_COLUMN, TypeAffinity::Text))
            .build()
            .unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }

    #[test]
    fn index_on_unknown_column_rejected() {
        let err = Table::builder("widgets")
            .index(Index::new("idx_missing", vec!["nope".to_string()]))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn composite_and_autoincrement_are_mutually_exclusive() {
        let t = Table::builder("widgets")
            .column(Column::new("a", TypeAffinity::Text))
            .column(Column::new("b", TypeAffinity::Text))
            .auto_increment_primary_key("id")
            .composite_primary_key(vec!["a".to_string(), "b".to_string()]);
        // last call wins in the builder; simulate genuine conflict instead:
        let conflicting = TableBuilder {
            name: "widgets".to_string(),
            columns: vec![
                Column::new("id", TypeAffinity::Integer),
                Column::new("a", TypeAffinity::Text),
            ],
            indices: vec![],
            primary_key: vec!["id".to_string(), "a".to_string()],
            auto_increment: true,
        };
        assert!(conflicting.build().is_err());
        let _ = t; // composite_primary_key call above is a legitimate builder use
    }
}
