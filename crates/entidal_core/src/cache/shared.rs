//! Cache store shared by every process of a cluster.
//!
//! Entries and bus messages live in one SQLite file. Each process opens its
//! own connection; SQLite's file locking serializes writers.

use super::CacheStore;
use crate::config::SharedCacheConfig;
use crate::error::{CoreError, CoreResult};
use entidal_storage::now_millis;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS cache_entries (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS cache_messages (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    origin TEXT NOT NULL,
    payload TEXT NOT NULL,
    created_on INTEGER NOT NULL
);
";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// [`CacheStore`] backed by a shared SQLite file.
#[derive(Debug)]
pub struct SharedCache {
    path: PathBuf,
    conn: Mutex<Connection>,
}

fn sqlite_err(err: rusqlite::Error) -> CoreError {
    CoreError::cache(err)
}

/// Escapes `LIKE` wildcards with `\`.
fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

impl SharedCache {
    /// Opens (or creates) the shared cache file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or initialized.
    pub fn open(config: &SharedCacheConfig) -> CoreResult<Self> {
        Self::open_path(&config.path)
    }

    /// Opens (or creates) the shared cache at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or initialized.
    pub fn open_path(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path).map_err(sqlite_err)?;
        conn.busy_timeout(BUSY_TIMEOUT).map_err(sqlite_err)?;
        let _mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .map_err(sqlite_err)?;
        conn.execute_batch(SCHEMA).map_err(sqlite_err)?;
        debug!(path = %path.display(), "opened shared cache");
        Ok(Self {
            path,
            conn: Mutex::new(conn),
        })
    }

    /// Location of the cache file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of cached entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn len(&self) -> CoreResult<u64> {
        self.conn
            .lock()
            .query_row("SELECT COUNT(1) FROM cache_entries", [], |row| row.get(0))
            .map_err(sqlite_err)
    }

    /// Appends a bus message and returns its sequence number.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be written.
    pub fn publish(&self, origin: &str, payload: &str) -> CoreResult<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO cache_messages (origin, payload, created_on) VALUES (?1, ?2, ?3)",
            params![origin, payload, now_millis()],
        )
        .map_err(sqlite_err)?;
        Ok(conn.last_insert_rowid())
    }

    /// Messages after `cursor` that did not come from `origin`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the messages cannot be read.
    pub fn messages_after(&self, cursor: i64, origin: &str) -> CoreResult<Vec<(i64, String)>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT seq, payload FROM cache_messages \
                 WHERE seq > ?1 AND origin <> ?2 ORDER BY seq",
            )
            .map_err(sqlite_err)?;
        let rows = stmt
            .query_map(params![cursor, origin], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(sqlite_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(sqlite_err)
    }

    /// Highest sequence number published so far, or 0.
    ///
    /// # Errors
    ///
    /// Returns an error if the messages cannot be read.
    pub fn latest_seq(&self) -> CoreResult<i64> {
        self.conn
            .lock()
            .query_row("SELECT COALESCE(MAX(seq), 0) FROM cache_messages", [], |row| {
                row.get(0)
            })
            .map_err(sqlite_err)
    }

    /// Drops messages older than `ttl` and returns how many were dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the messages cannot be deleted.
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn prune(&self, ttl: Duration) -> CoreResult<usize> {
        let cutoff = now_millis() - ttl.as_millis() as i64;
        self.conn
            .lock()
            .execute("DELETE FROM cache_messages WHERE created_on < ?1", params![cutoff])
            .map_err(sqlite_err)
    }
}

impl CacheStore for SharedCache {
    fn get(&self, key: &str) -> CoreResult<Option<String>> {
        self.conn
            .lock()
            .query_row(
                "SELECT value FROM cache_entries WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(sqlite_err)
    }

    fn set(&self, key: &str, value: &str) -> CoreResult<()> {
        self.conn
            .lock()
            .execute(
                "INSERT INTO cache_entries (key, value) VALUES (?1, ?2) \
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .map_err(sqlite_err)?;
        Ok(())
    }

    fn unset(&self, key: &str) -> CoreResult<()> {
        let below = format!("{}{}%", escape_like(key), super::KEY_SEPARATOR);
        self.conn
            .lock()
            .execute(
                "DELETE FROM cache_entries WHERE key = ?1 OR key LIKE ?2 ESCAPE '\\'",
                params![key, below],
            )
            .map_err(sqlite_err)?;
        Ok(())
    }

    fn clear_all(&self) -> CoreResult<()> {
        self.conn
            .lock()
            .execute("DELETE FROM cache_entries", [])
            .map_err(sqlite_err)?;
        Ok(())
    }
}
