//! Core database module: connection pooling and transaction execution over
//! an embedded SQLite-compatible engine. Mirrors the teacher's
//! `DatabasePool`/`Database` shape, trimmed to what the rest of the crate
//! (C3/C4) actually calls through.

use crate::errors::{AppError, AppResult};
use log::info;
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

const POOL_SIZE: usize = 10;

/// A small fixed-size pool of `rusqlite::Connection`s. The underlying
/// engine serializes its own writes (spec.md §5), so pooling here exists
/// only to amortize connection setup cost across concurrent readers.
pub struct DatabasePool {
    connections: Arc<Mutex<Vec<Connection>>>,
    db_path: PathBuf,
}

impl DatabasePool {
    pub fn new(db_path: PathBuf) -> AppResult<Self> {
        let mut connections = Vec::with_capacity(POOL_SIZE);
        for _ in 0..POOL_SIZE {
            connections.push(Self::create_connection(&db_path)?);
        }
        Ok(Self {
            connections: Arc::new(Mutex::new(connections)),
            db_path,
        })
    }

    pub fn new_in_memory() -> AppResult<Self> {
        let mut connections = Vec::with_capacity(POOL_SIZE);
        for _ in 0..POOL_SIZE {
            connections.push(Self::create_in_memory_connection()?);
        }
        Ok(Self {
            connections: Arc::new(Mutex::new(connections)),
            db_path: PathBuf::from(":memory:"),
        })
    }

    fn create_connection(db_path: &Path) -> AppResult<Connection> {
        let conn = Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        conn.execute("PRAGMA journal_mode = WAL", [])?;
        conn.execute("PRAGMA synchronous = NORMAL", [])?;
        Ok(conn)
    }

    fn create_in_memory_connection() -> AppResult<Connection> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        conn.execute("PRAGMA synchronous = NORMAL", [])?;
        Ok(conn)
    }

    pub fn get_connection(&self) -> AppResult<Connection> {
        let mut pool = self
            .connections
            .lock()
            .map_err(|_| AppError::engine("failed to acquire connection pool lock"))?;
        if let Some(conn) = pool.pop() {
            Ok(conn)
        } else if self.db_path.to_str() == Some(":memory:") {
            Self::create_in_memory_connection()
        } else {
            Self::create_connection(&self.db_path)
        }
    }

    pub fn return_connection(&self, conn: Connection) {
        if let Ok(mut pool) = self.connections.lock() {
            if pool.len() < POOL_SIZE {
                pool.push(conn);
            }
        }
    }
}

/// The shared, transaction-capable handle C3/C4 hold (spec.md §5). Callers
/// must not interleave raw access with operations sharing a primary key
/// inside one transaction.
pub struct Database {
    pool: DatabasePool,
}

impl Database {
    pub fn open(db_path: Option<PathBuf>) -> AppResult<Self> {
        let db_path = db_path.unwrap_or_else(|| {
            let mut path = std::env::current_dir().unwrap_or_default();
            path.push("store.db");
            path
        });
        info!("opening database at {:?}", db_path);
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AppError::engine(format!("failed to create database directory: {}", e))
            })?;
        }
        Ok(Self {
            pool: DatabasePool::new(db_path)?,
        })
    }

    pub fn open_in_memory() -> AppResult<Self> {
        info!("opening in-memory database");
        Ok(Self {
            pool: DatabasePool::new_in_memory()?,
        })
    }

    /// Run `f` inside a transaction, committing on `Ok` and rolling back on
    /// `Err`. No lock is held across a suspension point beyond the
    /// engine's own write lock for the transaction's duration.
    pub fn with_transaction<F, R>(&self, f: F) -> AppResult<R>
    where
        F: FnOnce(&Connection) -> AppResult<R>,
    {
        let conn = self.pool.get_connection()?;
        let tx = conn.unchecked_transaction()?;
        match f(&conn) {
            Ok(result) => {
                tx.commit()?;
                self.pool.return_connection(conn);
                Ok(result)
            }
            Err(err) => {
                let _ = tx.rollback();
                self.pool.return_connection(conn);
                Err(err)
            }
        }
    }

    pub fn get_connection(&self) -> AppResult<Connection> {
        self.pool.get_connection()
    }

    pub fn return_connection(&self, conn: Connection) {
        self.pool.return_connection(conn);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn file_backed_database_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");

        let db = Database::open(Some(path.clone())).unwrap();
        db.with_transaction(|conn| {
            conn.execute("CREATE TABLE kv (k TEXT PRIMARY KEY, v TEXT)", [])?;
            conn.execute("INSERT INTO kv (k, v) VALUES ('a', '1')", [])?;
            Ok(())
        })
        .unwrap();
        drop(db);

        let reopened = Database::open(Some(path)).unwrap();
        let value: String = reopened
            .with_transaction(|conn| Ok(conn.query_row("SELECT v FROM kv WHERE k = 'a'", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(value, "1");
    }

    #[test]
    fn transaction_rolls_back_on_error() {
        let db = Database::open_in_memory().unwrap();
        db.with_transaction(|conn| {
            conn.execute("CREATE TABLE kv (k TEXT PRIMARY KEY)", [])?;
            Ok(())
        })
        .unwrap();

        let err = db.with_transaction(|conn| {
            conn.execute("INSERT INTO kv (k) VALUES ('x')", [])?;
            Err(AppError::usage("forced rollback"))
        });
        assert_matches!(err, Err(AppError::Usage { .. }));

        let count: i64 = db
            .with_transaction(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM kv", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(count, 0);
    }
}
