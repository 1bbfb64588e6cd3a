//! Offline-first local data layer atop SQLite: a declarative schema model
//! and additive migrator (C1/C2), a CRUD data-access core (C3), a
//! last-writer-wins column engine keyed by hybrid logical clocks (C4), a
//! dependency-tracked reactive query engine (C5/C6), and a batched
//! retrying server sync manager (C7).

pub mod data_access;
pub mod database;
pub mod errors;
pub mod lww;
pub mod pk;
pub mod reactive;
pub mod row;
pub mod schema;
pub mod sync;
pub mod value;

/// Shared fixtures for unit tests and for the crate-level `tests/`
/// integration test. Gated behind a feature (rather than plain
/// `#[cfg(test)]`) because `tests/` binaries link the library compiled
/// without `--cfg test`; `dev-dependencies` below enables the feature for
/// both.
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use data_access::{BulkLoadOptions, BulkLoadResult, DataAccess, QueryOptions, TableMetadata};
pub use database::{Database, MigrationPlan, Migrator};
pub use errors::{AppError, AppResult};
pub use lww::{LwwColumnValue, LwwEngine, PendingKind, PendingOperation, UpdateLwwOptions};
pub use pk::PrimaryKey;
pub use reactive::{
    ChangeOperation, DatabaseChange, DependencyTracker, QuerySpec, ReactiveDataAccess, ReactiveStream,
    ReactiveStreamManager, ReactiveStreamOptions, RegistrationSpec, StreamEvent,
};
pub use row::RowMap;
pub use schema::{Column, ColumnConstraint, Index, Relationship, Schema, SchemaBuilder, Table, TableBuilder};
pub use sync::{ServerSyncOptions, SyncManager, SyncResult, UploadFn};
pub use value::Value;
