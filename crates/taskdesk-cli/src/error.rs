use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] taskdesk_core::Error),
    #[error("Configuration error: {0}")]
    Config(#[from] taskdesk_core::ConfigError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Login failed for '{0}'. Check the username and password.")]
    LoginFailed(String),
    #[error("Task title cannot be empty")]
    EmptyTitle,
    #[error("Task ID cannot be empty")]
    EmptyTaskId,
    #[error("Task not found for id/prefix: {0}")]
    TaskNotFound(String),
    #[error("{0}")]
    AmbiguousTaskId(String),
    #[error("User not found: {0}")]
    UserNotFound(String),
    #[error("Invalid date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),
    #[error("This command needs an acting user. Pass --as USERNAME or set TASKDESK_USER.")]
    NoActingUser,
}
