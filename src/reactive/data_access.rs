//! Wraps the Data Access Core so every mutating call also issues the
//! matching `DatabaseChange` to the reactive stream manager; reads pass
//! straight through (spec.md §4.6 "ReactiveDataAccess").

use crate::data_access::{BulkLoadOptions, BulkLoadResult, DataAccess, QueryOptions, TableMetadata};
use crate::errors::AppResult;
use crate::pk::PrimaryKey;
use crate::reactive::dependency::{ChangeOperation, DatabaseChange};
use crate::reactive::stream::ReactiveStreamManager;
use crate::row::RowMap;
use crate::value::Value;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct ReactiveDataAccessOptions {
    /// When true (default), bulk-load emits one aggregate `DatabaseChange`
    /// for the whole batch rather than one per row (spec.md §5: "a single
    /// `DatabaseChange` summarizing the batch is emitted on commit").
    pub summarize_bulk_changes: bool,
}

impl ReactiveDataAccessOptions {
    pub fn new() -> Self {
        Self {
            summarize_bulk_changes: true,
        }
    }
}

pub struct ReactiveDataAccess {
    inner: Arc<DataAccess>,
    manager: Arc<ReactiveStreamManager>,
    options: ReactiveDataAccessOptions,
}

impl ReactiveDataAccess {
    pub fn new(inner: Arc<DataAccess>, manager: Arc<ReactiveStreamManager>) -> Self {
        Self {
            inner,
            manager,
            options: ReactiveDataAccessOptions::new(),
        }
    }

    pub fn with_options(mut self, options: ReactiveDataAccessOptions) -> Self {
        self.options = options;
        self
    }

    // ------------------------------------------------------------------
    // Reads — pass through untouched.
    // ------------------------------------------------------------------

    pub fn get_by_primary_key(&self, table: &str, pk: &PrimaryKey) -> AppResult<Option<RowMap>> {
        self.inner.get_by_primary_key(table, pk)
    }

    pub fn get_all_where(&self, table: &str, options: &QueryOptions) -> AppResult<Vec<RowMap>> {
        self.inner.get_all_where(table, options)
    }

    pub fn count(&self, table: &str, where_clause: Option<&str>, args: &[Value]) -> AppResult<i64> {
        self.inner.count(table, where_clause, args)
    }

    pub fn exists_by_primary_key(&self, table: &str, pk: &PrimaryKey) -> AppResult<bool> {
        self.inner.exists_by_primary_key(table, pk)
    }

    pub fn table_metadata(&self, table: &str) -> AppResult<TableMetadata> {
        self.inner.table_metadata(table)
    }

    // ------------------------------------------------------------------
    // Writes — commit, then notify.
    // ------------------------------------------------------------------

    pub async fn insert(&self, table: &str, values: RowMap) -> AppResult<i64> {
        let columns: HashSet<String> = values.keys().cloned().collect();
        let rowid = self.inner.insert(table, values.clone())?;
        let change = DatabaseChange::new(table, ChangeOperation::Insert)
            .with_columns(columns)
            .with_new_values(values);
        self.manager.notify_change(change).await;
        Ok(rowid)
    }

    pub async fn update_by_primary_key(&self, table: &str, pk: &PrimaryKey, values: RowMap) -> AppResult<()> {
        let columns: HashSet<String> = values.keys().cloned().collect();
        let old = self.inner.get_by_primary_key(table, pk)?;
        self.inner.update_by_primary_key(table, pk, values.clone())?;
        let mut change = DatabaseChange::new(table, ChangeOperation::Update)
            .with_columns(columns)
            .with_new_values(values);
        if let Some(old) = old {
            change = change.with_old_values(old);
        }
        self.manager.notify_change(change).await;
        Ok(())
    }

    pub async fn update_where(
        &self,
        table: &str,
        where_clause: &str,
        where_args: &[Value],
        values: RowMap,
    ) -> AppResult<usize> {
        let columns: HashSet<String> = values.keys().cloned().collect();
        let old_rows = self
            .inner
            .get_all_where(table, &QueryOptions::new().with_where(where_clause, where_args.to_vec()))?;
        let affected = self.inner.update_where(table, where_clause, where_args, values.clone())?;
        let mut change = DatabaseChange::new(table, ChangeOperation::Update)
            .with_columns(columns)
            .with_new_values(values);
        // Multiple rows can match; only a single old-value snapshot can be
        // carried on one `DatabaseChange`, so a unique matched row's prior
        // state is attached and the multi-row case stays conservative
        // (`old_values: None`), which the dependency tracker treats as
        // "assume match" rather than risk a false negative.
        if old_rows.len() == 1 {
            change = change.with_old_values(old_rows.into_iter().next().unwrap());
        }
        change.where_clause = Some(where_clause.to_string());
        change.where_args = Some(where_args.to_vec());
        self.manager.notify_change(change).await;
        Ok(affected)
    }

    pub async fn delete_by_primary_key(&self, table: &str, pk: &PrimaryKey) -> AppResult<()> {
        let old = self.inner.get_by_primary_key(table, pk)?;
        self.inner.delete_by_primary_key(table, pk)?;
        let mut change = DatabaseChange::new(table, ChangeOperation::Delete);
        if let Some(old) = old {
            change = change.with_old_values(old);
        }
        self.manager.notify_change(change).await;
        Ok(())
    }

    pub async fn delete_where(&self, table: &str, where_clause: &str, args: &[Value]) -> AppResult<usize> {
        let old_rows = self
            .inner
            .get_all_where(table, &QueryOptions::new().with_where(where_clause, args.to_vec()))?;
        let affected = self.inner.delete_where(table, where_clause, args)?;
        let mut change = DatabaseChange::new(table, ChangeOperation::Delete);
        if old_rows.len() == 1 {
            change = change.with_old_values(old_rows.into_iter().next().unwrap());
        }
        change.where_clause = Some(where_clause.to_string());
        change.where_args = Some(args.to_vec());
        self.manager.notify_change(change).await;
        Ok(affected)
    }

    pub async fn bulk_load(
        &self,
        table: &str,
        rows: Vec<RowMap>,
        options: BulkLoadOptions,
    ) -> AppResult<BulkLoadResult> {
        let upsert = options.upsert_mode;
        let result = self.inner.bulk_load(table, rows, options)?;
        if self.options.summarize_bulk_changes {
            let operation = if upsert {
                ChangeOperation::BulkUpdate
            } else {
                ChangeOperation::BulkInsert
            };
            self.manager.notify_change(DatabaseChange::new(table, operation)).await;
        }
        Ok(result)
    }
}
