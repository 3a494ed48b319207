//! Durable on-device key-value store.
//!
//! Every logical collection is a single JSON document under a fixed key.
//! Reads of missing or corrupt documents are cache misses, never failures.

mod sqlite;

pub use sqlite::SqliteStore;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::error::Result;

/// Logical keys held by the local store
pub mod keys {
    /// Users snapshot with its `cachedAt` stamp
    pub const USERS: &str = "users";
    /// Tasks snapshot
    pub const TASKS: &str = "tasks";
    /// Unix ms of the last completed sync
    pub const LAST_SYNC: &str = "last_sync";
    /// Identifier of this installation
    pub const DEVICE_ID: &str = "device_id";
    /// Outbound operations awaiting remote acknowledgement
    pub const PENDING: &str = "pending";

    /// Keys removed by a local cache reset; the device id survives
    pub const RESETTABLE: [&str; 4] = [USERS, TASKS, LAST_SYNC, PENDING];
}

/// Synchronous key-value persistence
pub trait LocalStore: Send + Sync + 'static {
    /// Raw document stored under `key`
    fn read(&self, key: &str) -> Result<Option<String>>;

    /// Replace the document under `key`
    ///
    /// Fails with [`crate::Error::StorageFull`] when the quota would be exceeded.
    fn write(&self, key: &str, value: &str) -> Result<()>;

    /// Remove the given keys
    fn clear(&self, keys: &[&str]) -> Result<()>;

    /// Bytes currently held
    fn size_bytes(&self) -> Result<u64>;
}

/// Decode the document under `key`, treating unreadable data as absent.
pub fn read_json<T: DeserializeOwned>(store: &dyn LocalStore, key: &str) -> Option<T> {
    let raw = match store.read(key) {
        Ok(raw) => raw?,
        Err(error) => {
            warn!(key, %error, "Local store read failed; treating as cache miss");
            return None;
        }
    };
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(error) => {
            warn!(key, %error, "Corrupt local document; treating as cache miss");
            None
        }
    }
}

/// Encode `value` and store it under `key`.
pub fn write_json<T: Serialize + ?Sized>(store: &dyn LocalStore, key: &str, value: &T) -> Result<()> {
    let raw = serde_json::to_string(value)?;
    store.write(key, &raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corrupt_json_reads_as_none() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.write(keys::TASKS, "{not json").unwrap();
        let tasks: Option<Vec<String>> = read_json(&store, keys::TASKS);
        assert!(tasks.is_none());
    }

    #[test]
    fn json_helpers_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        write_json(&store, keys::LAST_SYNC, &1_700_000_000_000_i64).unwrap();
        assert_eq!(read_json::<i64>(&store, keys::LAST_SYNC), Some(1_700_000_000_000));
        assert_eq!(read_json::<i64>(&store, keys::DEVICE_ID), None);
    }
}
