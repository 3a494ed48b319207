//! Telemetry and summary types

use serde::{Deserialize, Serialize};

use crate::state::CacheState;

/// Health of the local cache on this device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStats {
    pub device_id: String,
    pub cached_users: usize,
    pub cached_tasks: usize,
    /// Last completed sync (Unix ms)
    pub last_sync: Option<i64>,
    /// Milliseconds until the next forced sync; zero when overdue
    pub next_sync_in_ms: Option<i64>,
    /// No successful sync within the offline-warning threshold
    pub offline_too_long: bool,
    pub ttl_days: u32,
    /// Approximate bytes held by the snapshots
    pub bytes_used: u64,
    /// Outbound operations not yet acknowledged by the remote
    pub pending_ops: usize,
    pub users_state: CacheState,
    pub tasks_state: CacheState,
}

/// Remote store retention summary (`getSyncStats`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSyncStats {
    pub total_tasks: u64,
    /// Rows already past the TTL and awaiting the next sweep
    pub old_tasks: u64,
    pub ttl_days: u32,
    #[serde(default)]
    pub next_cleanup: Option<String>,
}

/// Outcome of one completed sync cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// Tasks returned by the remote
    pub pulled: usize,
    /// Remote-only tasks added locally
    pub added: usize,
    /// Shared tasks where the remote copy won
    pub updated: usize,
    /// Tasks sent in the batch upsert
    pub pushed: usize,
    /// Queued deletes acknowledged by the remote
    pub deleted: usize,
    /// Queued user changes acknowledged by the remote
    pub users_flushed: usize,
    pub finished_at: i64,
}

/// Per-status task counts for a dashboard
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
}
