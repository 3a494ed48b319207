//! Error types for taskdesk-core

use thiserror::Error;

use crate::remote::RemoteError;

/// Result type alias using taskdesk-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in taskdesk-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Entity not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Local store quota exceeded
    #[error("Local storage full while writing '{key}' ({bytes} bytes)")]
    StorageFull { key: String, bytes: usize },

    /// Remote store error
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// No cached data and the remote could not be reached
    #[error("Data unavailable: {0}")]
    Unavailable(String),
}

impl Error {
    /// Whether retrying the same operation later may succeed.
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Remote(error) => error.is_retryable(),
            Self::Unavailable(_) => true,
            _ => false,
        }
    }
}
