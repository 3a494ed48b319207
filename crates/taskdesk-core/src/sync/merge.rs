//! Bidirectional task merge keyed by id.

use std::collections::{HashMap, HashSet};

use crate::models::{Task, TaskId};

/// Timestamp that decides which copy of a shared task wins
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FreshnessKey {
    /// Creation instant; matches the hosted deployment's behaviour
    #[default]
    CreatedAt,
    /// Last local modification, falling back to creation
    UpdatedAt,
}

impl FreshnessKey {
    pub fn stamp(self, task: &Task) -> i64 {
        match self {
            Self::CreatedAt => task.created_at,
            Self::UpdatedAt => task.updated_at.unwrap_or(task.created_at),
        }
    }
}

/// Result of reconciling the local and remote task sets
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Union of both sides, newest first
    pub merged: Vec<Task>,
    /// Remote-only tasks added locally
    pub added: usize,
    /// Shared tasks where the remote copy replaced the local one
    pub updated: usize,
    /// Local tasks the remote does not have
    pub to_push: Vec<Task>,
}

/// Merge `remote` into `local`.
///
/// Every id from either side survives. For shared ids the remote copy wins only
/// when its stamp is strictly greater, so ties keep the local copy. Tasks missing
/// remotely are never dropped; they are returned in `to_push`.
pub fn merge_tasks(local: Vec<Task>, remote: Vec<Task>, key: FreshnessKey) -> MergeOutcome {
    let mut merged: Vec<Task> = Vec::with_capacity(local.len() + remote.len());
    let mut positions: HashMap<TaskId, usize> = HashMap::with_capacity(local.len());

    for task in local {
        if let Some(&position) = positions.get(&task.id) {
            merged[position] = task;
        } else {
            positions.insert(task.id.clone(), merged.len());
            merged.push(task);
        }
    }

    let mut remote_ids: HashSet<TaskId> = HashSet::with_capacity(remote.len());
    let mut added = 0;
    let mut updated = 0;

    for mut incoming in remote {
        remote_ids.insert(incoming.id.clone());
        if let Some(&position) = positions.get(&incoming.id) {
            let current = &merged[position];
            if key.stamp(&incoming) > key.stamp(current) {
                // The remote store does not keep advisory steps
                if incoming.ai_suggested_steps.is_none() {
                    incoming.ai_suggested_steps.clone_from(&current.ai_suggested_steps);
                }
                merged[position] = incoming;
                updated += 1;
            }
        } else {
            positions.insert(incoming.id.clone(), merged.len());
            merged.push(incoming);
            added += 1;
        }
    }

    let to_push = merged
        .iter()
        .filter(|task| !remote_ids.contains(&task.id))
        .cloned()
        .collect();

    merged.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    MergeOutcome {
        merged,
        added,
        updated,
        to_push,
    }
}
