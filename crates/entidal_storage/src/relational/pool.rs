//! SQLite connection pool with scoped acquisition.
//!
//! Connections come from an `r2d2` pool; pragmas are applied once per
//! connection when the manager opens it. Writes run inside a
//! [`UnitOfWork`], which opens a transaction lazily on the first write and
//! commits or rolls back when the unit finishes.

use crate::config::RelationalStoreConfig;
use crate::error::{StorageError, StorageResult};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OpenFlags};
use std::time::Duration;
use tracing::{debug, warn};

/// A connection checked out of a [`ConnectionPool`]; returned on drop.
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// A fixed-size pool of SQLite connections for one named database.
pub struct ConnectionPool {
    name: String,
    inner: r2d2::Pool<SqliteConnectionManager>,
}

impl ConnectionPool {
    /// Opens `pool_size` connections to the configured database.
    ///
    /// Each in-memory SQLite connection is its own database, so in-memory
    /// stores always get a single connection that is never recycled.
    ///
    /// # Errors
    ///
    /// Returns an error if a connection cannot be opened or configured.
    pub fn open(config: &RelationalStoreConfig) -> StorageResult<Self> {
        let in_memory = config.is_in_memory();
        let busy_timeout = config.acquire_timeout;
        let manager = if in_memory {
            SqliteConnectionManager::memory()
        } else {
            SqliteConnectionManager::file(&config.database).with_flags(
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
        };
        let manager = manager.with_init(move |conn| configure(conn, busy_timeout, in_memory));

        let size = if in_memory { 1 } else { config.pool_size.max(1) };
        let mut builder = r2d2::Pool::builder()
            .max_size(u32::try_from(size).unwrap_or(u32::MAX))
            .connection_timeout(config.acquire_timeout);
        if in_memory {
            builder = builder.idle_timeout(None).max_lifetime(None);
        }
        let inner = builder
            .build(manager)
            .map_err(|e| StorageError::PoolTimeout(format!("{}: {e}", config.name)))?;
        debug!(store = %config.name, size, "opened relational pool");
        Ok(Self {
            name: config.name.clone(),
            inner,
        })
    }

    /// Store name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of idle connections.
    pub fn idle_count(&self) -> usize {
        self.inner.state().idle_connections as usize
    }

    /// Checks a connection out, waiting up to the configured timeout.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::PoolTimeout`] if no connection frees up.
    pub fn acquire(&self) -> StorageResult<PooledConnection> {
        self.inner.get().map_err(|e| {
            debug!(store = %self.name, error = %e, "pool checkout failed");
            StorageError::PoolTimeout(self.name.clone())
        })
    }

    /// Runs `work` as one unit of work on one connection.
    ///
    /// The transaction opened by the first write is committed when `work`
    /// succeeds and rolled back when it fails.
    ///
    /// # Errors
    ///
    /// Returns the error of `work`, or a commit failure.
    pub fn with_unit<T>(
        &self,
        work: impl FnOnce(&mut UnitOfWork) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let mut unit = UnitOfWork {
            store: self.name.clone(),
            conn: self.acquire()?,
            written: false,
        };
        let value = work(&mut unit)?;
        unit.commit()?;
        Ok(value)
    }
}

fn configure(conn: &mut Connection, busy_timeout: Duration, in_memory: bool) -> rusqlite::Result<()> {
    conn.busy_timeout(busy_timeout)?;
    // Text matchers must be case sensitive like their regex counterparts.
    conn.pragma_update(None, "case_sensitive_like", true)?;
    if !in_memory {
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    }
    Ok(())
}

/// One logical unit of work on a pooled connection.
///
/// An open transaction is rolled back when the unit is dropped without
/// committing, so a failed call never leaks it back into the pool.
pub struct UnitOfWork {
    store: String,
    conn: PooledConnection,
    written: bool,
}

impl UnitOfWork {
    /// Connection for reads; does not open a transaction.
    pub fn read(&self) -> &Connection {
        &self.conn
    }

    /// Connection for writes; opens the transaction on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction cannot be started.
    pub fn write(&mut self) -> StorageResult<&Connection> {
        if !self.written {
            self.conn.execute_batch("BEGIN IMMEDIATE")?;
            self.written = true;
        }
        Ok(&self.conn)
    }

    /// Whether a transaction has been opened.
    pub fn has_written(&self) -> bool {
        self.written
    }

    fn commit(&mut self) -> StorageResult<()> {
        if self.written {
            self.conn.execute_batch("COMMIT")?;
            self.written = false;
        }
        Ok(())
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        if self.written {
            if let Err(err) = self.conn.execute_batch("ROLLBACK") {
                warn!(store = %self.store, error = %err, "rollback failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn file_config(dir: &TempDir, pool_size: usize) -> RelationalStoreConfig {
        RelationalStoreConfig::new("main", dir.path().join("pool.db").to_string_lossy())
            .pool_size(pool_size)
            .acquire_timeout(Duration::from_millis(50))
    }

    #[test]
    fn connections_return_on_drop() {
        let dir = TempDir::new().unwrap();
        let pool = ConnectionPool::open(&file_config(&dir, 2)).unwrap();
        assert_eq!(pool.idle_count(), 2);
        {
            let _a = pool.acquire().unwrap();
            let _b = pool.acquire().unwrap();
            assert_eq!(pool.idle_count(), 0);
            assert!(matches!(pool.acquire(), Err(StorageError::PoolTimeout(_))));
        }
        assert_eq!(pool.idle_count(), 2);
    }

    #[test]
    fn pragmas_apply_to_every_connection() {
        let dir = TempDir::new().unwrap();
        let pool = ConnectionPool::open(&file_config(&dir, 2)).unwrap();
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        for conn in [&a, &b] {
            let mode: String = conn
                .query_row("PRAGMA journal_mode", [], |r| r.get(0))
                .unwrap();
            assert_eq!(mode, "wal");
            let like: i64 = conn
                .query_row("SELECT 'A' LIKE 'a'", [], |r| r.get(0))
                .unwrap();
            assert_eq!(like, 0);
        }
    }

    #[test]
    fn memory_store_uses_one_connection() {
        let pool = ConnectionPool::open(&RelationalStoreConfig::in_memory("mem").pool_size(4)).unwrap();
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn unit_commits_on_success() {
        let pool = ConnectionPool::open(&RelationalStoreConfig::in_memory("mem")).unwrap();
        pool.with_unit(|unit| {
            unit.write()?.execute_batch("CREATE TABLE t (x INTEGER)")?;
            unit.write()?.execute("INSERT INTO t VALUES (1)", [])?;
            Ok(())
        })
        .unwrap();
        let count: i64 = pool
            .acquire()
            .unwrap()
            .query_row("SELECT COUNT(1) FROM t", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn unit_rolls_back_on_error() {
        let pool = ConnectionPool::open(&RelationalStoreConfig::in_memory("mem")).unwrap();
        pool.acquire()
            .unwrap()
            .execute_batch("CREATE TABLE t (x INTEGER)")
            .unwrap();
        let result: StorageResult<()> = pool.with_unit(|unit| {
            unit.write()?.execute("INSERT INTO t VALUES (1)", [])?;
            Err(StorageError::UnboundedDelete)
        });
        assert!(result.is_err());
        let conn = pool.acquire().unwrap();
        assert!(conn.is_autocommit());
        let count: i64 = conn
            .query_row("SELECT COUNT(1) FROM t", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn reads_do_not_open_transactions() {
        let pool = ConnectionPool::open(&RelationalStoreConfig::in_memory("mem")).unwrap();
        pool.with_unit(|unit| {
            let one: i64 = unit.read().query_row("SELECT 1", [], |r| r.get(0))?;
            assert_eq!(one, 1);
            assert!(!unit.has_written());
            Ok(())
        })
        .unwrap();
    }
}
