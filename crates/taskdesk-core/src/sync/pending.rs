//! Outbound operations awaiting remote acknowledgement.
//!
//! Each queued entry carries a sequence number. An acknowledgement only clears
//! the entry when the number still matches, so a newer local change queued while
//! the older one was in flight stays queued.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::{TaskId, User, UserId};

/// A queued user write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedUser {
    pub seq: u64,
    /// Carries the plaintext credential when one must be sent
    pub user: User,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingOps {
    #[serde(default)]
    next_seq: u64,
    #[serde(default)]
    pub task_upserts: BTreeMap<TaskId, u64>,
    #[serde(default)]
    pub task_deletes: BTreeMap<TaskId, u64>,
    #[serde(default)]
    pub user_adds: BTreeMap<UserId, QueuedUser>,
    #[serde(default)]
    pub user_updates: BTreeMap<UserId, QueuedUser>,
    #[serde(default)]
    pub user_deletes: BTreeMap<UserId, u64>,
}

impl PendingOps {
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn len(&self) -> usize {
        self.task_upserts.len()
            + self.task_deletes.len()
            + self.user_adds.len()
            + self.user_updates.len()
            + self.user_deletes.len()
    }

    /// An empty queue that keeps counting from where this one stopped
    #[must_use]
    pub fn restarted(&self) -> Self {
        Self {
            next_seq: self.next_seq,
            ..Self::default()
        }
    }

    fn bump(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    pub fn queue_task_upsert(&mut self, id: &TaskId) -> u64 {
        let seq = self.bump();
        self.task_deletes.remove(id);
        self.task_upserts.insert(id.clone(), seq);
        seq
    }

    pub fn queue_task_delete(&mut self, id: &TaskId) -> u64 {
        let seq = self.bump();
        self.task_upserts.remove(id);
        self.task_deletes.insert(id.clone(), seq);
        seq
    }

    pub fn queue_user_add(&mut self, user: User) -> u64 {
        let seq = self.bump();
        self.user_deletes.remove(&user.id);
        self.user_adds
            .insert(user.id.clone(), QueuedUser { seq, user });
        seq
    }

    /// Queue an update; folds into a still-unsent add for the same user
    pub fn queue_user_update(&mut self, mut user: User) -> u64 {
        let seq = self.bump();
        if let Some(queued) = self.user_adds.get_mut(&user.id) {
            if user.password.is_none() {
                user.password = queued.user.password.take();
            }
            *queued = QueuedUser { seq, user };
            return seq;
        }
        if let Some(queued) = self.user_updates.get(&user.id) {
            if user.password.is_none() {
                user.password.clone_from(&queued.user.password);
            }
        }
        self.user_updates
            .insert(user.id.clone(), QueuedUser { seq, user });
        seq
    }

    pub fn queue_user_delete(&mut self, id: &UserId) -> u64 {
        let seq = self.bump();
        self.user_adds.remove(id);
        self.user_updates.remove(id);
        self.user_deletes.insert(id.clone(), seq);
        seq
    }

    /// Drop queued upserts for tasks removed as a side effect of another delete
    pub fn forget_task_upserts<'a>(&mut self, ids: impl IntoIterator<Item = &'a TaskId>) {
        for id in ids {
            self.task_upserts.remove(id);
        }
    }

    pub fn ack_task_upsert(&mut self, id: &TaskId, seq: u64) -> bool {
        remove_if_current(&mut self.task_upserts, id, seq)
    }

    pub fn ack_task_delete(&mut self, id: &TaskId, seq: u64) -> bool {
        remove_if_current(&mut self.task_deletes, id, seq)
    }

    pub fn ack_user_add(&mut self, id: &UserId, seq: u64) -> bool {
        if self.user_adds.get(id).is_some_and(|queued| queued.seq == seq) {
            self.user_adds.remove(id);
            return true;
        }
        false
    }

    pub fn ack_user_update(&mut self, id: &UserId, seq: u64) -> bool {
        if self
            .user_updates
            .get(id)
            .is_some_and(|queued| queued.seq == seq)
        {
            self.user_updates.remove(id);
            return true;
        }
        false
    }

    pub fn ack_user_delete(&mut self, id: &UserId, seq: u64) -> bool {
        remove_if_current(&mut self.user_deletes, id, seq)
    }
}

fn remove_if_current<K: Ord>(entries: &mut BTreeMap<K, u64>, key: &K, seq: u64) -> bool {
    if entries.get(key) == Some(&seq) {
        entries.remove(key);
        true
    } else {
        false
    }
}
