//! Shared test fixtures: a small two-table schema (notes + comments) wired
//! up through the full stack, so component tests and integration tests
//! don't each hand-roll their own schema.

use crate::data_access::DataAccess;
use crate::database::{Database, Migrator};
use crate::errors::AppResult;
use crate::lww::LwwEngine;
use crate::reactive::ReactiveStreamManager;
use crate::schema::{CascadeAction, Column, ColumnConstraint, Relationship, Schema, Table};
use crate::value::TypeAffinity;
use std::sync::Arc;

/// `notes(id, title[lww], body[lww], created_by)` and
/// `comments(id, note_id, text[lww])`, related one-to-many, mirroring the
/// shape spec.md's worked examples use throughout.
pub fn fixture_schema() -> AppResult<Schema> {
    let notes = Table::builder("notes")
        .auto_increment_primary_key("id")
        .column(Column::new("title", TypeAffinity::Text).lww())
        .column(Column::new("body", TypeAffinity::Text).lww())
        .column(Column::new("created_by", TypeAffinity::Text).with_constraint(ColumnConstraint::NotNull))
        .build()?;

    let comments = Table::builder("comments")
        .auto_increment_primary_key("id")
        .column(Column::new("note_id", TypeAffinity::Integer).with_constraint(ColumnConstraint::NotNull))
        .column(Column::new("text", TypeAffinity::Text).lww())
        .build()?;

    Schema::builder()
        .table(notes)
        .table(comments)
        .relationship(
            Relationship::one_to_many("note_comments", "notes", "id", "comments", "note_id")
                .on_delete(CascadeAction::Cascade),
        )
        .build()
}

/// Everything a test usually wants: an in-memory, migrated database plus
/// the data-access, LWW and reactive capabilities layered on top.
pub struct TestStack {
    pub schema: Arc<Schema>,
    pub db: Arc<Database>,
    pub lww: Arc<LwwEngine>,
    pub data_access: Arc<DataAccess>,
    pub streams: Arc<ReactiveStreamManager>,
}

impl TestStack {
    pub fn new() -> AppResult<Self> {
        let schema = Arc::new(fixture_schema()?);
        let db = Arc::new(Database::open_in_memory()?);
        Migrator::new().migrate(&db, &schema)?;
        let lww = Arc::new(LwwEngine::new(db.clone(), schema.clone())?);
        let data_access = Arc::new(DataAccess::new(db.clone(), schema.clone()).with_lww(lww.clone()));
        let streams = Arc::new(ReactiveStreamManager::new(schema.clone()));
        Ok(Self {
            schema,
            db,
            lww,
            data_access,
            streams,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixture_schema_builds_and_migrates() {
        let stack = TestStack::new().unwrap();
        assert!(stack.schema.table("notes").is_some());
        assert!(stack.schema.table("comments").is_some());
    }
}
