//! Data models for TaskDesk

mod stats;
mod task;
mod user;

pub use stats::{DashboardStats, RemoteSyncStats, SyncReport, SyncStats};
pub use task::{RecurringType, Task, TaskId, TaskPriority, TaskStatus};
pub use user::{avatar_url_for, password_digest, User, UserId, UserRole};
