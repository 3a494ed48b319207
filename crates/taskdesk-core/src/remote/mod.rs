//! Remote store contract and clients.
//!
//! The remote store is a single JSON endpoint taking `{action, data}` requests.
//! It is authoritative for users and a TTL-bounded relay for tasks: rows whose
//! `synced_at` is older than the TTL are swept server-side.

mod http;
mod memory;

use std::future::Future;

pub use http::HttpRemoteClient;
pub use memory::MemoryRemote;

use thiserror::Error;

use crate::models::{RemoteSyncStats, Task, TaskId, User, UserId};

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Invalid remote configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Remote request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Remote request timed out")]
    Timeout,
    #[error("Remote API error: {message} ({status})")]
    Api { status: u16, message: String },
    #[error("Invalid remote payload: {0}")]
    InvalidPayload(String),
    #[error("Remote store is unreachable")]
    Offline,
}

impl RemoteError {
    /// Transport failures and server-side errors may succeed on a later cycle;
    /// client errors and malformed payloads will not.
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) | Self::Timeout | Self::Offline => true,
            Self::Api { status, .. } => *status >= 500 || *status == 429 || *status == 408,
            Self::InvalidConfiguration(_) | Self::InvalidPayload(_) => false,
        }
    }

    /// The endpoint could not be reached at all, as opposed to refusing one request
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Timeout | Self::Offline)
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Operations offered by the remote store
///
/// Implementations own no cache state. Every method maps to one remote action.
pub trait RemoteStore: Send + Sync + 'static {
    /// Create the remote schema if missing (`init`)
    fn init(&self) -> impl Future<Output = RemoteResult<()>> + Send;

    /// All users, with plaintext credentials (`getUsers`)
    fn get_users(&self) -> impl Future<Output = RemoteResult<Vec<User>>> + Send;

    /// Insert a user; an existing id is left untouched (`addUser`)
    fn add_user(&self, user: &User) -> impl Future<Output = RemoteResult<()>> + Send;

    /// Overwrite a user's mutable fields; `user.password` must be set (`updateUser`)
    fn update_user(&self, user: &User) -> impl Future<Output = RemoteResult<()>> + Send;

    /// Delete a user and every task referencing it (`deleteUser`)
    fn delete_user(&self, id: &UserId) -> impl Future<Output = RemoteResult<()>> + Send;

    /// Exact credential match; `Ok(None)` on mismatch (`login`)
    fn login(
        &self,
        username: &str,
        password: &str,
    ) -> impl Future<Output = RemoteResult<Option<User>>> + Send;

    /// Tasks not yet evicted by the TTL sweep, newest first (`getTasks`)
    fn get_tasks(&self) -> impl Future<Output = RemoteResult<Vec<Task>>> + Send;

    /// Upsert by id, resetting the row's TTL marker (`saveTask`)
    fn save_task(&self, task: &Task) -> impl Future<Output = RemoteResult<()>> + Send;

    /// Upsert many tasks; returns the saved count (`batchSaveTasks`)
    fn batch_save_tasks(&self, tasks: &[Task])
        -> impl Future<Output = RemoteResult<usize>> + Send;

    fn delete_task(&self, id: &TaskId) -> impl Future<Output = RemoteResult<()>> + Send;

    /// Run the TTL sweep now; returns the evicted count (`cleanup`)
    fn cleanup(&self) -> impl Future<Output = RemoteResult<u64>> + Send;

    /// Retention summary (`getSyncStats`)
    fn sync_stats(&self) -> impl Future<Output = RemoteResult<RemoteSyncStats>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(RemoteError::Timeout.is_retryable());
        assert!(RemoteError::Offline.is_retryable());
        assert!(RemoteError::Api {
            status: 503,
            message: "Database error".to_string()
        }
        .is_retryable());
        assert!(!RemoteError::Api {
            status: 400,
            message: "Unknown action".to_string()
        }
        .is_retryable());
        assert!(!RemoteError::InvalidPayload("missing id".to_string()).is_retryable());
    }

    #[test]
    fn server_errors_are_not_transport_failures() {
        assert!(RemoteError::Offline.is_transport());
        assert!(RemoteError::Timeout.is_transport());
        assert!(!RemoteError::Api {
            status: 500,
            message: "duplicate username 'nvan'".to_string()
        }
        .is_transport());
    }
}
