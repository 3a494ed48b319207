//! taskdesk-core - Core library for TaskDesk
//!
//! This crate contains the shared models, local store, remote client, and the
//! cache/sync engine used by all TaskDesk interfaces.

pub mod config;
pub mod error;
pub mod models;
pub mod remote;
pub mod services;
pub mod state;
pub mod store;
pub mod sync;
pub mod util;

pub use config::{ConfigError, SyncSettings};
pub use error::{Error, Result};
pub use models::{Task, TaskId, User, UserId};
pub use services::TaskDesk;
pub use state::CacheState;
pub use sync::SyncEngine;
