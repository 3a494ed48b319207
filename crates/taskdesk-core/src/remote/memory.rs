//! In-process remote store with the hosted endpoint's semantics.
//!
//! Used for tests and offline demos: TTL eviction keyed on `synced_at`,
//! cascade deletes, `ON CONFLICT DO NOTHING` inserts and an offline switch.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{RemoteError, RemoteResult, RemoteStore};
use crate::models::{RemoteSyncStats, Task, TaskId, User, UserId};
use crate::sync::clock::Clock;
use crate::sync::ttl::is_expired;
use crate::util::DAY_MS;

#[derive(Debug, Clone)]
struct StoredTask {
    task: Task,
    synced_at: i64,
}

#[derive(Default)]
struct RemoteState {
    users: Vec<User>,
    tasks: HashMap<TaskId, StoredTask>,
    calls: HashMap<&'static str, usize>,
}

pub struct MemoryRemote {
    state: Mutex<RemoteState>,
    clock: Arc<dyn Clock>,
    ttl_days: u32,
    offline: AtomicBool,
}

impl MemoryRemote {
    pub fn new(clock: Arc<dyn Clock>, ttl_days: u32) -> Self {
        Self {
            state: Mutex::new(RemoteState::default()),
            clock,
            ttl_days,
            offline: AtomicBool::new(false),
        }
    }

    /// Make every subsequent call fail with [`RemoteError::Offline`]
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Seed a row with an explicit TTL marker
    pub fn insert_task_synced_at(&self, task: Task, synced_at: i64) {
        if let Ok(mut state) = self.state.lock() {
            state
                .tasks
                .insert(task.id.clone(), StoredTask { task, synced_at });
        }
    }

    /// Seed a user directly, bypassing the offline switch
    pub fn insert_user(&self, user: User) {
        if let Ok(mut state) = self.state.lock() {
            state.users.retain(|existing| existing.id != user.id);
            state.users.push(user);
        }
    }

    /// Stored copy of a task regardless of TTL
    pub fn stored_task(&self, id: &TaskId) -> Option<Task> {
        let state = self.state.lock().ok()?;
        state.tasks.get(id).map(|stored| stored.task.clone())
    }

    pub fn stored_user(&self, id: &UserId) -> Option<User> {
        let state = self.state.lock().ok()?;
        state.users.iter().find(|user| &user.id == id).cloned()
    }

    pub fn task_count(&self) -> usize {
        self.state.lock().map_or(0, |state| state.tasks.len())
    }

    /// Successful calls of `action` so far
    pub fn calls(&self, action: &str) -> usize {
        self.state
            .lock()
            .map_or(0, |state| state.calls.get(action).copied().unwrap_or(0))
    }

    fn ttl_ms(&self) -> i64 {
        i64::from(self.ttl_days) * DAY_MS
    }

    fn begin(&self, action: &'static str) -> RemoteResult<MutexGuard<'_, RemoteState>> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(RemoteError::Offline);
        }
        let mut state = self.state.lock().map_err(|_| RemoteError::Api {
            status: 500,
            message: "remote state poisoned".to_string(),
        })?;
        *state.calls.entry(action).or_default() += 1;
        Ok(state)
    }

    fn sweep(&self, state: &mut RemoteState) -> u64 {
        let now = self.clock.now_ms();
        let ttl_ms = self.ttl_ms();
        let before = state.tasks.len();
        state
            .tasks
            .retain(|_, stored| !is_expired(stored.synced_at, now, ttl_ms));
        (before - state.tasks.len()) as u64
    }

    fn upsert(&self, state: &mut RemoteState, task: &Task) {
        let synced_at = self.clock.now_ms();
        match state.tasks.get_mut(&task.id) {
            // Updates keep the original creator and creation time
            Some(stored) => {
                let creator_id = stored.task.creator_id.clone();
                let created_at = stored.task.created_at;
                stored.task = task.clone();
                stored.task.creator_id = creator_id;
                stored.task.created_at = created_at;
                stored.synced_at = synced_at;
            }
            None => {
                state.tasks.insert(
                    task.id.clone(),
                    StoredTask {
                        task: task.clone(),
                        synced_at,
                    },
                );
            }
        }
    }
}

impl RemoteStore for MemoryRemote {
    async fn init(&self) -> RemoteResult<()> {
        self.begin("init").map(|_| ())
    }

    async fn get_users(&self) -> RemoteResult<Vec<User>> {
        let state = self.begin("getUsers")?;
        Ok(state.users.clone())
    }

    async fn add_user(&self, user: &User) -> RemoteResult<()> {
        let mut state = self.begin("addUser")?;
        if state.users.iter().any(|existing| existing.username == user.username && existing.id != user.id) {
            return Err(RemoteError::Api {
                status: 500,
                message: format!("duplicate username '{}'", user.username),
            });
        }
        if !state.users.iter().any(|existing| existing.id == user.id) {
            state.users.push(user.clone());
        }
        Ok(())
    }

    async fn update_user(&self, user: &User) -> RemoteResult<()> {
        let mut state = self.begin("updateUser")?;
        let Some(password) = user.password.clone() else {
            return Err(RemoteError::Api {
                status: 500,
                message: "null value in column \"password\"".to_string(),
            });
        };
        if let Some(existing) = state.users.iter_mut().find(|existing| existing.id == user.id) {
            existing.password = Some(password);
            existing.is_first_login = user.is_first_login;
            existing.full_name.clone_from(&user.full_name);
            existing.role = user.role;
            existing.avatar_url.clone_from(&user.avatar_url);
        }
        Ok(())
    }

    async fn delete_user(&self, id: &UserId) -> RemoteResult<()> {
        let mut state = self.begin("deleteUser")?;
        state.tasks.retain(|_, stored| !stored.task.references(id));
        state.users.retain(|user| &user.id != id);
        Ok(())
    }

    async fn login(&self, username: &str, password: &str) -> RemoteResult<Option<User>> {
        let state = self.begin("login")?;
        Ok(state
            .users
            .iter()
            .find(|user| user.username == username && user.password.as_deref() == Some(password))
            .cloned())
    }

    async fn get_tasks(&self) -> RemoteResult<Vec<Task>> {
        let mut state = self.begin("getTasks")?;
        self.sweep(&mut state);
        let mut tasks: Vec<Task> = state.tasks.values().map(|stored| stored.task.clone()).collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tasks)
    }

    async fn save_task(&self, task: &Task) -> RemoteResult<()> {
        let mut state = self.begin("saveTask")?;
        self.upsert(&mut state, task);
        Ok(())
    }

    async fn batch_save_tasks(&self, tasks: &[Task]) -> RemoteResult<usize> {
        let mut state = self.begin("batchSaveTasks")?;
        for task in tasks {
            self.upsert(&mut state, task);
        }
        Ok(tasks.len())
    }

    async fn delete_task(&self, id: &TaskId) -> RemoteResult<()> {
        let mut state = self.begin("deleteTask")?;
        state.tasks.remove(id);
        Ok(())
    }

    async fn cleanup(&self) -> RemoteResult<u64> {
        let mut state = self.begin("cleanup")?;
        Ok(self.sweep(&mut state))
    }

    async fn sync_stats(&self) -> RemoteResult<RemoteSyncStats> {
        let state = self.begin("getSyncStats")?;
        let now = self.clock.now_ms();
        let ttl_ms = self.ttl_ms();
        let old_tasks = state
            .tasks
            .values()
            .filter(|stored| is_expired(stored.synced_at, now, ttl_ms))
            .count();
        let next_cleanup = chrono::DateTime::from_timestamp_millis(now + DAY_MS)
            .map(|instant| instant.to_rfc3339_opts(chrono::SecondsFormat::Millis, true));
        Ok(RemoteSyncStats {
            total_tasks: state.tasks.len() as u64,
            old_tasks: old_tasks as u64,
            ttl_days: self.ttl_days,
            next_cleanup,
        })
    }
}
