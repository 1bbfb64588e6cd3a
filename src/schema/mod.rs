//! Declarative schema model (C1): tables, columns, indices, composite keys,
//! views and relationships. Immutable once built; downstream components
//! (migrator, data-access, dependency tracker) only ever read it.

mod relationship;
mod table;
mod view;

pub use relationship::{CascadeAction, Relationship, RelationshipKind};
pub use table::{Column, ColumnConstraint, Index, Table, TableBuilder};
pub use view::{OrderDirection, SelectView, View, ViewBody};

use crate::errors::{AppError, AppResult};
use std::collections::HashSet;

/// Engine-managed columns auto-appended to every user table.
pub const SYSTEM_ID_COLUMN: &str = "systemId";
pub const SYSTEM_VERSION_COLUMN: &str = "systemVersion";

/// An immutable, validated schema: tables, views and relationships.
#[derive(Debug, Clone)]
pub struct Schema {
    tables: Vec<Table>,
    views: Vec<View>,
    relationships: Vec<Relationship>,
}

/// Accumulates a schema from tables/views/relationships, surfacing every
/// validation conflict as a list rather than failing on the first one.
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    tables: Vec<Table>,
    views: Vec<View>,
    relationships: Vec<Relationship>,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(mut self, table: Table) -> Self {
        self.tables.push(table);
        self
    }

    pub fn view(mut self, view: View) -> Self {
        self.views.push(view);
        self
    }

    pub fn relationship(mut self, relationship: Relationship) -> Self {
        self.relationships.push(relationship);
        self
    }

    pub fn build(self) -> AppResult<Schema> {
        let mut errors = Vec::new();

        let mut table_names = HashSet::new();
        for t in &self.tables {
            if !table_names.insert(t.name.clone()) {
                errors.push(format!("duplicate table name '{}'", t.name));
            }
        }

        let mut view_names = HashSet::new();
        for v in &self.views {
            if !view_names.insert(v.name.clone()) {
                errors.push(format!("duplicate view name '{}'", v.name));
            }
            if table_names.contains(&v.name) {
                errors.push(format!(
                    "view '{}' shadows a table of the same name",
                    v.name
                ));
            }
        }

        let mut relationship_names = HashSet::new();
        for r in &self.relationships {
            if !relationship_names.insert(r.name.clone()) {
                errors.push(format!("duplicate relationship name '{}'", r.name));
            }
            if !table_names.contains(&r.parent_table) {
                errors.push(format!(
                    "relationship '{}' references unknown parent table '{}'",
                    r.name, r.parent_table
                ));
            }
            if !table_names.contains(&r.child_table) {
                errors.push(format!(
                    "relationship '{}' references unknown child table '{}'",
                    r.name, r.child_table
                ));
            }
            if let Some(junction) = &r.junction_table {
                if !table_names.contains(junction) {
                    errors.push(format!(
                        "relationship '{}' references unknown junction table '{}'",
                        r.name, junction
                    ));
                }
            }
        }

        if !errors.is_empty() {
            return Err(AppError::validation(errors.join("; ")));
        }

        Ok(Schema {
            tables: self.tables,
            views: self.views,
            relationships: self.relationships,
        })
    }
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::new()
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn views(&self) -> &[View] {
        &self.views
    }

    pub fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn view(&self, name: &str) -> Option<&View> {
        self.views.iter().find(|v| v.name == name)
    }

    pub fn relationship(&self, name: &str) -> Option<&Relationship> {
        self.relationships.iter().find(|r| r.name == name)
    }

    pub fn relationships_for_parent<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a Relationship> {
        self.relationships.iter().filter(move |r| r.parent_table == table)
    }

    pub fn relationships_for_child<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a Relationship> {
        self.relationships.iter().filter(move |r| r.child_table == table)
    }

    pub fn relationships_touching<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a Relationship> {
        self.relationships
            .iter()
            .filter(move |r| r.parent_table == table || r.child_table == table)
    }

    /// Emit the ordered list of DDL statements to materialize this schema:
    /// tables (with their indices) first, then views. Fails if any
    /// structured view has an empty `SELECT` (see `AppError::State`).
    pub fn to_ddl_statements(&self) -> AppResult<Vec<String>> {
        let mut statements = Vec::new();
        for table in &self.tables {
            statements.push(table.create_table_sql());
            for index in &table.indices {
                statements.push(index.create_index_sql(&table.name));
            }
        }
        for view in &self.views {
            statements.push(view.create_view_sql()?);
        }
        Ok(statements)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_table_names_fail_validation() {
        let t1 = Table::builder("widgets").build().unwrap();
        let t2 = Table::builder("widgets").build().unwrap();
        let err = Schema::builder().table(t1).table(t2).build().unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }

    #[test]
    fn view_shadowing_table_fails_validation() {
        let t = Table::builder("widgets").build().unwrap();
        let v = View::opaque("widgets", "SELECT 1");
        let err = Schema::builder().table(t).view(v).build().unwrap_err();
        assert!(err.to_string().contains("shadows"));
    }

    #[test]
    fn relationship_with_missing_table_fails_validation() {
        let parent = Table::builder("parents").build().unwrap();
        let rel = Relationship::one_to_many(
            "parent_children",
            "parents",
            "id",
            "children",
            "parent_id",
        );
        let err = Schema::builder()
            .table(parent)
            .relationship(rel)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("children"));
    }

    #[test]
    fn system_columns_are_always_present() {
        let t = Table::builder("widgets").build().unwrap();
        assert!(t.column(SYSTEM_ID_COLUMN).is_some());
        assert!(t.column(SYSTEM_VERSION_COLUMN).is_some());
    }
}
