//! `SQLite` implementation of [`LocalStore`]

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use tracing::debug;

use super::LocalStore;
use crate::error::{Error, Result};
use crate::util::unix_millis_now;

/// Current schema version
const CURRENT_VERSION: i32 = 1;

const SCHEMA_V1: &str = "
    CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER PRIMARY KEY
    );
    CREATE TABLE IF NOT EXISTS kv (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        updated_at INTEGER NOT NULL
    );
    INSERT OR IGNORE INTO schema_version (version) VALUES (1);
";

/// Key-value store in a single `SQLite` file with an optional byte quota
pub struct SqliteStore {
    conn: Mutex<Connection>,
    capacity_bytes: Option<u64>,
}

impl SqliteStore {
    /// Open (or create) the store at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        debug!(path = %path.display(), "Opened local store");
        Self::from_connection(conn)
    }

    /// Open a transient store, used by tests and ephemeral sessions
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Bound the total bytes held by the store
    #[must_use]
    pub const fn with_capacity_bytes(mut self, capacity_bytes: Option<u64>) -> Self {
        self.capacity_bytes = capacity_bytes;
        self
    }

    /// Schema version recorded in the database
    pub fn schema_version(&self) -> Result<i32> {
        let conn = self.lock()?;
        let version = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )?;
        Ok(version)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            capacity_bytes: None,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Database("local store lock poisoned".to_string()))
    }
}

fn migrate(conn: &Connection) -> Result<()> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;
    let version: i32 = if exists {
        conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )?
    } else {
        0
    };

    if version < 1 {
        conn.execute_batch(SCHEMA_V1)?;
    }
    if version > CURRENT_VERSION {
        return Err(Error::Database(format!(
            "local store schema version {version} is newer than supported {CURRENT_VERSION}"
        )));
    }
    Ok(())
}

fn entry_bytes(key: &str, value: &str) -> u64 {
    (key.len() + value.len()) as u64
}

impl LocalStore for SqliteStore {
    fn read(&self, key: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.lock()?;
        let bytes = value.len();

        if let Some(capacity) = self.capacity_bytes {
            let others: i64 = conn.query_row(
                "SELECT COALESCE(SUM(LENGTH(CAST(key AS BLOB)) + LENGTH(CAST(value AS BLOB))), 0)
                 FROM kv WHERE key != ?1",
                params![key],
                |row| row.get(0),
            )?;
            let used = u64::try_from(others).unwrap_or(0) + entry_bytes(key, value);
            if used > capacity {
                return Err(Error::StorageFull {
                    key: key.to_string(),
                    bytes,
                });
            }
        }

        conn.execute(
            "INSERT OR REPLACE INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![key, value, unix_millis_now()],
        )
        .map_err(|error| match error {
            rusqlite::Error::SqliteFailure(failure, _) if failure.code == ErrorCode::DiskFull => {
                Error::StorageFull {
                    key: key.to_string(),
                    bytes,
                }
            }
            other => Error::Sqlite(other),
        })?;
        Ok(())
    }

    fn clear(&self, keys: &[&str]) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        for key in keys {
            tx.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        }
        tx.commit()?;
        Ok(())
    }

    fn size_bytes(&self) -> Result<u64> {
        let conn = self.lock()?;
        let total: i64 = conn.query_row(
            "SELECT COALESCE(SUM(LENGTH(CAST(key AS BLOB)) + LENGTH(CAST(value AS BLOB))), 0) FROM kv",
            [],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(total).unwrap_or(0))
    }
}
