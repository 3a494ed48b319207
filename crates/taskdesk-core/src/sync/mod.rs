//! Cache and sync engine.
//!
//! `SyncEngine` sits between the local store and the remote store. Reads are
//! served from the local copy and refreshed according to its [`CacheState`].
//! Writes land locally first and are then sent to the remote in the background.
//! Failed sends stay in the persisted outbound queue until a sync cycle
//! delivers them.
//!
//! A sync cycle flushes queued user changes and task deletes, pulls the remote
//! task set, merges it into the local set by id, pushes local-only and queued
//! tasks in one batch and finally refreshes the users snapshot. Overlapping
//! cycles are coalesced by an in-flight flag.

pub mod clock;
mod merge;
mod pending;
mod scheduler;
pub mod ttl;

pub use clock::{Clock, ManualClock, SystemClock};
pub use merge::{merge_tasks, FreshnessKey, MergeOutcome};
pub use pending::{PendingOps, QueuedUser};
pub use scheduler::BackgroundSync;

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::{duration_ms, SyncSettings};
use crate::error::{Error, Result};
use crate::models::{RemoteSyncStats, SyncReport, SyncStats, Task, TaskId, User, UserId};
use crate::remote::{RemoteResult, RemoteStore};
use crate::state::CacheState;
use crate::store::{keys, read_json, write_json, LocalStore};

/// Users cached locally together with the instant they were fetched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsersSnapshot {
    pub data: Vec<User>,
    /// Unix ms of the last refresh; zero when never refreshed
    pub cached_at: i64,
}

/// Optional engine collaborators
#[derive(Clone)]
pub struct EngineOptions {
    pub clock: Arc<dyn Clock>,
    pub freshness_key: FreshnessKey,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            freshness_key: FreshnessKey::default(),
        }
    }
}

pub struct SyncEngine<R> {
    inner: Arc<Inner<R>>,
}

impl<R> Clone for SyncEngine<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<R> {
    store: Arc<dyn LocalStore>,
    remote: Arc<R>,
    clock: Arc<dyn Clock>,
    settings: SyncSettings,
    freshness_key: FreshnessKey,
    device_id: String,
    /// Serializes read-modify-write sequences on the local store
    local: Mutex<()>,
    syncing: InFlight,
    refreshing_users: InFlight,
    tombstones: Mutex<Tombstones>,
    jobs: Mutex<JoinSet<()>>,
}

/// Ids deleted locally whose remote delete is not yet confirmed; a pull must
/// not bring them back
#[derive(Default)]
struct Tombstones {
    tasks: HashSet<TaskId>,
    users: HashSet<UserId>,
}

impl Tombstones {
    /// Keep only ids whose delete is still queued. Tasks removed by a user
    /// cascade stay while any user delete is queued.
    fn prune(&mut self, pending: &PendingOps, prune_users: bool) {
        let cascade_queued = !pending.user_deletes.is_empty();
        self.tasks
            .retain(|id| cascade_queued || pending.task_deletes.contains_key(id));
        if prune_users {
            self.users.retain(|id| pending.user_deletes.contains_key(id));
        }
    }
}

/// Work that runs at most once at a time; waiters are woken when it ends
#[derive(Default)]
struct InFlight {
    flag: AtomicBool,
    done: Notify,
}

impl InFlight {
    fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Wait until the current run ends; returns at once when nothing runs
    async fn wait(&self) {
        let notified = self.done.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_set() {
            notified.await;
        }
    }
}

/// Clears an in-flight flag when dropped
struct FlagGuard<'a>(&'a InFlight);

impl<'a> FlagGuard<'a> {
    fn acquire(in_flight: &'a InFlight) -> Option<Self> {
        in_flight
            .flag
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(in_flight))
    }
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.0.flag.store(false, Ordering::SeqCst);
        self.0.done.notify_waiters();
    }
}

impl<R: RemoteStore> SyncEngine<R> {
    pub fn new(store: Arc<dyn LocalStore>, remote: Arc<R>, settings: SyncSettings) -> Result<Self> {
        Self::with_options(store, remote, settings, EngineOptions::default())
    }

    pub fn with_options(
        store: Arc<dyn LocalStore>,
        remote: Arc<R>,
        settings: SyncSettings,
        options: EngineOptions,
    ) -> Result<Self> {
        let device_id = ensure_device_id(store.as_ref(), options.clock.now_ms())?;
        debug!(%device_id, "Sync engine ready");
        Ok(Self {
            inner: Arc::new(Inner {
                store,
                remote,
                clock: options.clock,
                settings,
                freshness_key: options.freshness_key,
                device_id,
                local: Mutex::new(()),
                syncing: InFlight::default(),
                refreshing_users: InFlight::default(),
                tombstones: Mutex::new(Tombstones::default()),
                jobs: Mutex::new(JoinSet::new()),
            }),
        })
    }

    pub fn device_id(&self) -> &str {
        &self.inner.device_id
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.inner.settings
    }

    pub fn remote(&self) -> &R {
        &self.inner.remote
    }

    pub fn now_ms(&self) -> i64 {
        self.inner.clock.now_ms()
    }

    // -----------------------------------------------------------------------
    // Cache state
    // -----------------------------------------------------------------------

    pub fn users_state(&self) -> CacheState {
        let Some(snapshot) = self.read_users() else {
            return CacheState::Cold;
        };
        if self.inner.refreshing_users.is_set() {
            return CacheState::Syncing;
        }
        let age = self.now_ms() - snapshot.cached_at;
        if age >= duration_ms(self.inner.settings.user_freshness) {
            CacheState::Stale
        } else {
            CacheState::Fresh
        }
    }

    /// Tasks are locally authoritative; they only go stale once the force
    /// threshold has passed without a completed sync.
    pub fn tasks_state(&self) -> CacheState {
        if self.read_tasks().is_none() {
            return CacheState::Cold;
        }
        if self.inner.syncing.is_set() {
            return CacheState::Syncing;
        }
        if self.sync_overdue() {
            CacheState::Stale
        } else {
            CacheState::Fresh
        }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Users for display, never carrying plaintext credentials
    pub async fn users(&self) -> Result<Vec<User>> {
        match self.users_state() {
            CacheState::Cold => {
                debug!("Users cache cold; fetching before first read");
                self.refresh_users().await.map_err(|error| {
                    if error.is_retryable() {
                        Error::Unavailable(format!("no cached users and {error}"))
                    } else {
                        error
                    }
                })
            }
            CacheState::Stale => {
                debug!("Users cache stale; serving cached copy");
                self.spawn_users_refresh();
                Ok(self.cached_users())
            }
            CacheState::Fresh | CacheState::Syncing => Ok(self.cached_users()),
        }
    }

    pub fn cached_users(&self) -> Vec<User> {
        self.read_users().map(|snapshot| snapshot.data).unwrap_or_default()
    }

    /// Replace the users snapshot with the remote list, keeping queued local changes
    pub async fn refresh_users(&self) -> Result<Vec<User>> {
        let remote_users = self.inner.remote.get_users().await?;
        self.store_users_snapshot(remote_users)
    }

    pub async fn tasks(&self) -> Result<Vec<Task>> {
        match self.tasks_state() {
            CacheState::Cold => {
                debug!("Tasks cache cold; syncing before first read");
                let mut outcome = self.sync_now().await;
                if matches!(outcome, Ok(None)) {
                    debug!("Waiting for the in-flight cycle to populate tasks");
                    self.inner.syncing.wait().await;
                    if self.read_tasks().is_none() {
                        outcome = self.sync_now().await;
                    }
                }
                if let Some(tasks) = self.read_tasks() {
                    return Ok(tasks);
                }
                match outcome {
                    Ok(_) => Ok(Vec::new()),
                    Err(error) if error.is_retryable() => Err(Error::Unavailable(format!(
                        "no cached tasks and {error}"
                    ))),
                    Err(error) => Err(error),
                }
            }
            CacheState::Stale => {
                debug!("Tasks cache stale; serving cached copy");
                self.spawn_sync();
                Ok(self.cached_tasks())
            }
            CacheState::Fresh | CacheState::Syncing => Ok(self.cached_tasks()),
        }
    }

    pub fn cached_tasks(&self) -> Vec<Task> {
        self.read_tasks().unwrap_or_default()
    }

    pub fn pending_ops(&self) -> PendingOps {
        self.read_pending()
    }

    pub fn last_sync(&self) -> Option<i64> {
        read_json(self.inner.store.as_ref(), keys::LAST_SYNC)
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Upsert a task locally, then send it to the remote in the background
    pub fn save_task(&self, task: Task) -> Result<()> {
        let seq = {
            let _guard = self.lock_local()?;
            let mut tasks = self.read_tasks().unwrap_or_default();
            match tasks.iter_mut().find(|existing| existing.id == task.id) {
                Some(existing) => *existing = task.clone(),
                None => tasks.insert(0, task.clone()),
            }
            self.persist_tasks(&mut tasks)?;
            self.forget_tombstone_task(&task.id);
            self.queue(|pending| pending.queue_task_upsert(&task.id))?
        };
        debug!(task_id = %task.id, seq, "Task saved locally");

        let engine = self.clone();
        self.spawn_job(async move {
            let result = engine.inner.remote.save_task(&task).await;
            engine.finish_remote_write("saveTask", result, |pending| {
                pending.ack_task_upsert(&task.id, seq)
            });
        });
        Ok(())
    }

    /// Remove a task locally and remotely; returns whether it was held locally
    pub fn delete_task(&self, id: &TaskId) -> Result<bool> {
        let (existed, seq) = {
            let _guard = self.lock_local()?;
            let mut tasks = self.read_tasks().unwrap_or_default();
            let before = tasks.len();
            tasks.retain(|task| &task.id != id);
            let existed = tasks.len() != before;
            if existed {
                self.persist_tasks(&mut tasks)?;
            }
            self.tombstone_tasks([id.clone()]);
            let seq = self.queue(|pending| pending.queue_task_delete(id))?;
            (existed, seq)
        };
        debug!(task_id = %id, existed, "Task deleted locally");

        let engine = self.clone();
        let id = id.clone();
        self.spawn_job(async move {
            let result = engine.inner.remote.delete_task(&id).await;
            engine.finish_remote_write("deleteTask", result, |pending| {
                pending.ack_task_delete(&id, seq)
            });
        });
        Ok(existed)
    }

    /// Cache a new user and create it remotely; `user.password` is the plaintext credential
    pub fn add_user(&self, user: User) -> Result<()> {
        let seq = {
            let _guard = self.lock_local()?;
            let mut snapshot = self.read_users().unwrap_or_default();
            upsert_user(&mut snapshot.data, user.clone().sealed());
            self.persist(keys::USERS, &snapshot)?;
            self.queue(|pending| pending.queue_user_add(user.clone()))?
        };
        debug!(user_id = %user.id, "User added locally");

        let engine = self.clone();
        self.spawn_job(async move {
            let result = engine.send_user_add(&user).await;
            engine.finish_remote_write("addUser", result, |pending| {
                pending.ack_user_add(&user.id, seq)
            });
        });
        Ok(())
    }

    /// Overwrite a cached user; `user.password` is only set when the credential changes
    pub fn update_user(&self, user: User) -> Result<()> {
        let (queued, seq, folded) = {
            let _guard = self.lock_local()?;
            let mut snapshot = self.read_users().unwrap_or_default();
            let mut queued = user;
            if queued.password.is_none() {
                queued.password_digest = snapshot
                    .data
                    .iter()
                    .find(|existing| existing.id == queued.id)
                    .and_then(|existing| existing.password_digest.clone());
            }
            upsert_user(&mut snapshot.data, queued.clone().sealed());
            self.persist(keys::USERS, &snapshot)?;

            let mut pending = self.read_pending();
            let folded = pending.user_adds.contains_key(&queued.id);
            let seq = pending.queue_user_update(queued.clone());
            let queued = if folded {
                pending.user_adds[&queued.id].user.clone()
            } else {
                queued
            };
            self.persist(keys::PENDING, &pending)?;
            (queued, seq, folded)
        };
        debug!(user_id = %queued.id, folded, "User updated locally");

        let engine = self.clone();
        self.spawn_job(async move {
            if folded {
                let result = engine.send_user_add(&queued).await;
                engine.finish_remote_write("addUser", result, |pending| {
                    pending.ack_user_add(&queued.id, seq)
                });
            } else {
                let result = engine.send_user_update(queued.clone()).await;
                engine.finish_remote_write("updateUser", result, |pending| {
                    pending.ack_user_update(&queued.id, seq)
                });
            }
        });
        Ok(())
    }

    /// Remove a user and every task referencing it; returns whether it was cached
    pub fn delete_user(&self, id: &UserId) -> Result<bool> {
        let (existed, seq) = {
            let _guard = self.lock_local()?;
            let mut existed = false;
            if let Some(mut snapshot) = self.read_users() {
                let before = snapshot.data.len();
                snapshot.data.retain(|user| &user.id != id);
                existed = snapshot.data.len() != before;
                if existed {
                    self.persist(keys::USERS, &snapshot)?;
                }
            }

            let mut tasks = self.read_tasks().unwrap_or_default();
            let removed: Vec<TaskId> = tasks
                .iter()
                .filter(|task| task.references(id))
                .map(|task| task.id.clone())
                .collect();
            if !removed.is_empty() {
                tasks.retain(|task| !task.references(id));
                self.persist_tasks(&mut tasks)?;
            }

            if let Ok(mut tombstones) = self.inner.tombstones.lock() {
                tombstones.users.insert(id.clone());
            }
            self.tombstone_tasks(removed.iter().cloned());
            let seq = self.queue(|pending| {
                pending.forget_task_upserts(&removed);
                pending.queue_user_delete(id)
            })?;
            (existed, seq)
        };
        debug!(user_id = %id, existed, "User deleted locally");

        let engine = self.clone();
        let id = id.clone();
        self.spawn_job(async move {
            let result = engine.inner.remote.delete_user(&id).await;
            engine.finish_remote_write("deleteUser", result, |pending| {
                pending.ack_user_delete(&id, seq)
            });
        });
        Ok(existed)
    }

    // -----------------------------------------------------------------------
    // Login
    // -----------------------------------------------------------------------

    /// Check credentials; `Ok(None)` is a normal negative result.
    ///
    /// The remote decides when reachable, unless this device holds an unsent
    /// change for the user. When the remote is unreachable the cached digest
    /// decides; with no cached users the login is unavailable.
    pub async fn login(&self, username: &str, password: &str) -> Result<Option<User>> {
        let username = username.trim();
        if self.has_queued_user_change(username) {
            debug!(username, "Unsent local change; verifying credentials locally");
            return Ok(self.verify_cached(username, password));
        }

        match self.inner.remote.login(username, password).await {
            Ok(Some(user)) => {
                let user = user.sealed();
                self.cache_logged_in_user(&user)?;
                info!(username, "Login succeeded");
                Ok(Some(user))
            }
            Ok(None) => {
                info!(username, "Login rejected");
                Ok(None)
            }
            Err(error) if error.is_retryable() => {
                warn!(%error, "Remote login unavailable; using cached credentials");
                if self.read_users().is_none() {
                    return Err(Error::Unavailable(format!(
                        "cannot verify credentials offline before users are cached: {error}"
                    )));
                }
                Ok(self.verify_cached(username, password))
            }
            Err(error) => Err(error.into()),
        }
    }

    // -----------------------------------------------------------------------
    // Sync
    // -----------------------------------------------------------------------

    /// Run one full sync cycle; `Ok(None)` when another cycle is already running
    pub async fn sync_now(&self) -> Result<Option<SyncReport>> {
        let Some(_in_flight) = FlagGuard::acquire(&self.inner.syncing) else {
            debug!("Sync already in flight; coalescing");
            return Ok(None);
        };

        match self.run_cycle().await {
            Ok(report) => {
                info!(
                    pulled = report.pulled,
                    added = report.added,
                    updated = report.updated,
                    pushed = report.pushed,
                    deleted = report.deleted,
                    users_flushed = report.users_flushed,
                    "Sync completed"
                );
                Ok(Some(report))
            }
            Err(error) => {
                warn!(%error, "Sync cycle failed");
                Err(error)
            }
        }
    }

    /// Whether a scheduler tick should run a cycle
    pub fn sync_due(&self) -> bool {
        self.sync_overdue() || !self.read_pending().is_empty()
    }

    pub(crate) async fn background_tick(&self) -> Result<Option<SyncReport>> {
        if !self.sync_due() {
            debug!("Background tick: nothing due");
            return Ok(None);
        }
        self.sync_now().await
    }

    /// Start the periodic scheduler; stops when the handle is stopped or dropped
    pub fn start_background_sync(&self) -> BackgroundSync {
        BackgroundSync::spawn(self.clone(), self.inner.settings.sync_interval)
    }

    /// Wait for in-flight background writes and refreshes
    pub async fn settle(&self) {
        loop {
            let mut jobs = self.take_jobs();
            if jobs.is_empty() {
                return;
            }
            while jobs.join_next().await.is_some() {}
        }
    }

    // -----------------------------------------------------------------------
    // Telemetry and maintenance
    // -----------------------------------------------------------------------

    pub fn stats(&self) -> Result<SyncStats> {
        let now = self.now_ms();
        let settings = &self.inner.settings;
        let last_sync = self.last_sync();
        let force_ms = duration_ms(settings.force_sync_after);

        Ok(SyncStats {
            device_id: self.inner.device_id.clone(),
            cached_users: self.read_users().map_or(0, |snapshot| snapshot.data.len()),
            cached_tasks: self.read_tasks().map_or(0, |tasks| tasks.len()),
            last_sync,
            next_sync_in_ms: last_sync.map(|last| (last + force_ms - now).max(0)),
            offline_too_long: last_sync
                .map_or(true, |last| now - last > duration_ms(settings.offline_warning)),
            ttl_days: settings.ttl_days,
            bytes_used: self.inner.store.size_bytes()?,
            pending_ops: self.read_pending().len(),
            users_state: self.users_state(),
            tasks_state: self.tasks_state(),
        })
    }

    pub async fn remote_stats(&self) -> Result<RemoteSyncStats> {
        Ok(self.inner.remote.sync_stats().await?)
    }

    /// Ask the remote to sweep rows past the TTL now
    pub async fn remote_cleanup(&self) -> Result<u64> {
        let evicted = self.inner.remote.cleanup().await?;
        info!(evicted, "Remote TTL sweep finished");
        Ok(evicted)
    }

    pub async fn init_remote(&self) -> Result<()> {
        Ok(self.inner.remote.init().await?)
    }

    /// Drop every cached collection and queued operation; the device id survives
    pub fn reset_local_cache(&self) -> Result<()> {
        let _guard = self.lock_local()?;
        // Writes still in flight ack by sequence; new entries must not reuse theirs
        let restarted = self.read_pending().restarted();
        self.inner.store.clear(&keys::RESETTABLE)?;
        self.persist(keys::PENDING, &restarted)?;
        info!("Local cache cleared");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Cycle internals
    // -----------------------------------------------------------------------

    async fn run_cycle(&self) -> Result<SyncReport> {
        let users_flushed = self.flush_user_ops().await?;
        let deleted = self.flush_task_deletes().await?;
        self.prune_tombstones()?;

        let remote_tasks = self.inner.remote.get_tasks().await?;
        let pulled = remote_tasks.len();
        let (added, updated, batch) = self.apply_merge(remote_tasks)?;

        let pushed = if batch.is_empty() {
            0
        } else {
            let tasks: Vec<Task> = batch.iter().map(|(task, _)| task.clone()).collect();
            self.inner.remote.batch_save_tasks(&tasks).await?;
            self.update_pending(|pending| {
                batch.iter().fold(false, |changed, (task, seq)| {
                    seq.is_some_and(|seq| pending.ack_task_upsert(&task.id, seq)) || changed
                })
            })?;
            tasks.len()
        };

        self.refresh_users().await?;

        let finished_at = self.now_ms();
        {
            let _guard = self.lock_local()?;
            self.persist(keys::LAST_SYNC, &finished_at)?;
        }

        Ok(SyncReport {
            pulled,
            added,
            updated,
            pushed,
            deleted,
            users_flushed,
            finished_at,
        })
    }

    async fn flush_user_ops(&self) -> Result<usize> {
        let pending = self.read_pending();
        let mut flushed = 0;

        for (id, queued) in pending.user_adds {
            let result = self.send_user_add(&queued.user).await;
            flushed += self.settle_flushed("addUser", result, |p| p.ack_user_add(&id, queued.seq))?;
        }
        for (id, queued) in pending.user_updates {
            let result = self.send_user_update(queued.user).await;
            flushed +=
                self.settle_flushed("updateUser", result, |p| p.ack_user_update(&id, queued.seq))?;
        }
        for (id, seq) in pending.user_deletes {
            let result = self.inner.remote.delete_user(&id).await;
            flushed += self.settle_flushed("deleteUser", result, |p| p.ack_user_delete(&id, seq))?;
        }
        Ok(flushed)
    }

    async fn flush_task_deletes(&self) -> Result<usize> {
        let pending = self.read_pending();
        let mut deleted = 0;
        for (id, seq) in pending.task_deletes {
            let result = self.inner.remote.delete_task(&id).await;
            deleted += self.settle_flushed("deleteTask", result, |p| p.ack_task_delete(&id, seq))?;
        }
        Ok(deleted)
    }

    /// Merge under the local lock; returns counts and the batch to push with
    /// the queue sequence of each entry that was queued.
    fn apply_merge(&self, remote_tasks: Vec<Task>) -> Result<(usize, usize, Vec<(Task, Option<u64>)>)> {
        let _guard = self.lock_local()?;
        let mut pending = self.read_pending();
        let tombstoned = self.tombstoned_tasks();

        let remote_tasks: Vec<Task> = remote_tasks
            .into_iter()
            .filter(|task| {
                !pending.task_deletes.contains_key(&task.id) && !tombstoned.contains(&task.id)
            })
            .collect();
        let local = self.read_tasks().unwrap_or_default();
        let outcome = merge_tasks(local, remote_tasks, self.inner.freshness_key);

        let mut batch: Vec<(Task, Option<u64>)> = outcome
            .to_push
            .into_iter()
            .map(|task| {
                let seq = pending.task_upserts.get(&task.id).copied();
                (task, seq)
            })
            .collect();
        let mut batched: HashSet<TaskId> = batch.iter().map(|(task, _)| task.id.clone()).collect();

        let mut orphaned = Vec::new();
        for (id, seq) in &pending.task_upserts {
            if batched.contains(id) {
                continue;
            }
            match outcome.merged.iter().find(|task| &task.id == id) {
                Some(task) => {
                    batched.insert(id.clone());
                    batch.push((task.clone(), Some(*seq)));
                }
                None => orphaned.push(id.clone()),
            }
        }
        if !orphaned.is_empty() {
            debug!(count = orphaned.len(), "Dropping queued upserts for tasks no longer held");
            pending.forget_task_upserts(&orphaned);
            self.persist(keys::PENDING, &pending)?;
        }

        let mut merged = outcome.merged;
        self.persist_tasks(&mut merged)?;
        Ok((outcome.added, outcome.updated, batch))
    }

    async fn send_user_add(&self, user: &User) -> RemoteResult<()> {
        // addUser ignores existing ids; the update carries later edits
        self.inner.remote.add_user(user).await?;
        self.inner.remote.update_user(user).await
    }

    async fn send_user_update(&self, mut user: User) -> RemoteResult<()> {
        if user.password.is_none() {
            let remote_users = self.inner.remote.get_users().await?;
            let Some(current) = remote_users.into_iter().find(|remote| remote.id == user.id) else {
                debug!(user_id = %user.id, "User no longer exists remotely; skipping update");
                return Ok(());
            };
            user.password = current.password;
        }
        self.inner.remote.update_user(&user).await
    }

    /// Outcome of a flushed queue entry: acked on success or permanent failure.
    /// Only an unreachable endpoint aborts the cycle.
    fn settle_flushed(
        &self,
        action: &str,
        result: RemoteResult<()>,
        ack: impl FnOnce(&mut PendingOps) -> bool,
    ) -> Result<usize> {
        match result {
            Ok(()) => {
                self.update_pending(ack)?;
                Ok(1)
            }
            Err(error) if error.is_transport() => Err(error.into()),
            Err(error) if error.is_retryable() => {
                warn!(action, %error, "Remote refused queued operation; keeping it for the next sync");
                Ok(0)
            }
            Err(error) => {
                warn!(action, %error, "Remote rejected queued operation; dropping it");
                self.update_pending(ack)?;
                Ok(0)
            }
        }
    }

    /// Outcome of a fire-and-forget write
    fn finish_remote_write(
        &self,
        action: &str,
        result: RemoteResult<()>,
        ack: impl FnOnce(&mut PendingOps) -> bool,
    ) {
        let acknowledged = match result {
            Ok(()) => {
                debug!(action, "Remote write acknowledged");
                true
            }
            Err(error) if error.is_retryable() => {
                warn!(action, %error, "Remote write failed; retrying on next sync");
                false
            }
            Err(error) => {
                warn!(action, %error, "Remote rejected write; dropping it");
                true
            }
        };
        if acknowledged {
            if let Err(error) = self.update_pending(ack) {
                warn!(action, %error, "Failed to clear outbound queue entry");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Background work
    // -----------------------------------------------------------------------

    fn spawn_sync(&self) {
        if self.inner.syncing.is_set() {
            return;
        }
        let engine = self.clone();
        self.spawn_job(async move {
            let _ = engine.sync_now().await;
        });
    }

    fn spawn_users_refresh(&self) {
        let engine = self.clone();
        self.spawn_job(async move {
            let Some(_in_flight) = FlagGuard::acquire(&engine.inner.refreshing_users) else {
                return;
            };
            if let Err(error) = engine.refresh_users().await {
                warn!(%error, "Background users refresh failed");
            }
        });
    }

    fn spawn_job<F>(&self, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("No async runtime; remote work stays queued for the next sync");
            return;
        };
        match self.inner.jobs.lock() {
            Ok(mut jobs) => {
                while jobs.try_join_next().is_some() {}
                jobs.spawn_on(job, &handle);
            }
            Err(_) => {
                handle.spawn(job);
            }
        }
    }

    fn take_jobs(&self) -> JoinSet<()> {
        self.inner
            .jobs
            .lock()
            .map(|mut jobs| std::mem::take(&mut *jobs))
            .unwrap_or_default()
    }

    // -----------------------------------------------------------------------
    // Local store access
    // -----------------------------------------------------------------------

    fn lock_local(&self) -> Result<MutexGuard<'_, ()>> {
        self.inner
            .local
            .lock()
            .map_err(|_| Error::Database("local cache lock poisoned".to_string()))
    }

    fn read_tasks(&self) -> Option<Vec<Task>> {
        read_json(self.inner.store.as_ref(), keys::TASKS)
    }

    fn read_users(&self) -> Option<UsersSnapshot> {
        read_json(self.inner.store.as_ref(), keys::USERS)
    }

    fn read_pending(&self) -> PendingOps {
        read_json(self.inner.store.as_ref(), keys::PENDING).unwrap_or_default()
    }

    fn sync_overdue(&self) -> bool {
        let force_ms = duration_ms(self.inner.settings.force_sync_after);
        self.last_sync()
            .map_or(true, |last| self.now_ms() - last >= force_ms)
    }

    /// Queue an outbound operation; caller holds the local lock
    fn queue(&self, op: impl FnOnce(&mut PendingOps) -> u64) -> Result<u64> {
        let mut pending = self.read_pending();
        let seq = op(&mut pending);
        self.persist(keys::PENDING, &pending)?;
        Ok(seq)
    }

    fn update_pending(&self, change: impl FnOnce(&mut PendingOps) -> bool) -> Result<()> {
        let _guard = self.lock_local()?;
        let mut pending = self.read_pending();
        if change(&mut pending) {
            self.persist(keys::PENDING, &pending)?;
        }
        Ok(())
    }

    fn store_users_snapshot(&self, remote_users: Vec<User>) -> Result<Vec<User>> {
        let _guard = self.lock_local()?;
        let pending = self.read_pending();
        let tombstoned = self.tombstoned_users();

        let mut users: Vec<User> = remote_users
            .into_iter()
            .filter(|user| {
                !pending.user_deletes.contains_key(&user.id) && !tombstoned.contains(&user.id)
            })
            .map(User::sealed)
            .collect();

        for queued in pending.user_adds.values().chain(pending.user_updates.values()) {
            let mut local = queued.user.clone().sealed();
            if local.password_digest.is_none() {
                local.password_digest = users
                    .iter()
                    .find(|user| user.id == local.id)
                    .and_then(|user| user.password_digest.clone());
            }
            upsert_user(&mut users, local);
        }

        let snapshot = UsersSnapshot {
            data: users,
            cached_at: self.now_ms(),
        };
        self.persist(keys::USERS, &snapshot)?;
        debug!(count = snapshot.data.len(), "Users snapshot refreshed");
        Ok(snapshot.data)
    }

    fn cache_logged_in_user(&self, user: &User) -> Result<()> {
        let _guard = self.lock_local()?;
        let pending = self.read_pending();
        if pending.user_adds.contains_key(&user.id) || pending.user_updates.contains_key(&user.id) {
            return Ok(());
        }
        let mut snapshot = self.read_users().unwrap_or_default();
        upsert_user(&mut snapshot.data, user.clone());
        self.persist(keys::USERS, &snapshot)
    }

    fn has_queued_user_change(&self, username: &str) -> bool {
        let pending = self.read_pending();
        pending
            .user_adds
            .values()
            .chain(pending.user_updates.values())
            .any(|queued| queued.user.username == username)
    }

    fn verify_cached(&self, username: &str, password: &str) -> Option<User> {
        self.cached_users()
            .into_iter()
            .find(|user| user.username == username && user.verify_password(password))
    }

    /// Write a task snapshot; under quota pressure evict tasks past the local
    /// retention horizon and retry once, then drop the write.
    fn persist_tasks(&self, tasks: &mut Vec<Task>) -> Result<()> {
        match write_json(self.inner.store.as_ref(), keys::TASKS, &*tasks) {
            Err(Error::StorageFull { .. }) => {
                let evicted = evict_past_retention(tasks, self.retention_cutoff());
                warn!(evicted, "Local store full; evicted tasks past retention");
                retry_or_drop(
                    keys::TASKS,
                    write_json(self.inner.store.as_ref(), keys::TASKS, &*tasks),
                )
            }
            other => other,
        }
    }

    /// Write any other key with the same quota policy as [`Self::persist_tasks`]
    fn persist<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        match write_json(self.inner.store.as_ref(), key, value) {
            Err(Error::StorageFull { .. }) => {
                if let Some(mut tasks) = self.read_tasks() {
                    let evicted = evict_past_retention(&mut tasks, self.retention_cutoff());
                    warn!(key, evicted, "Local store full; evicted tasks past retention");
                    if evicted > 0 {
                        if let Err(error) = write_json(self.inner.store.as_ref(), keys::TASKS, &tasks) {
                            warn!(%error, "Failed to shrink task snapshot");
                        }
                    }
                }
                retry_or_drop(key, write_json(self.inner.store.as_ref(), key, value))
            }
            other => other,
        }
    }

    fn retention_cutoff(&self) -> i64 {
        self.now_ms() - duration_ms(self.inner.settings.local_retention)
    }

    fn tombstone_tasks(&self, ids: impl IntoIterator<Item = TaskId>) {
        if let Ok(mut tombstones) = self.inner.tombstones.lock() {
            tombstones.tasks.extend(ids);
        }
    }

    fn forget_tombstone_task(&self, id: &TaskId) {
        if let Ok(mut tombstones) = self.inner.tombstones.lock() {
            tombstones.tasks.remove(id);
        }
    }

    /// Drop tombstones whose delete the remote has confirmed. Runs before the
    /// cycle pulls, so a confirmed delete cannot be in the pulled set.
    fn prune_tombstones(&self) -> Result<()> {
        let _guard = self.lock_local()?;
        let pending = self.read_pending();
        let prune_users = !self.inner.refreshing_users.is_set();
        if let Ok(mut tombstones) = self.inner.tombstones.lock() {
            tombstones.prune(&pending, prune_users);
        }
        Ok(())
    }

    fn tombstoned_tasks(&self) -> HashSet<TaskId> {
        self.inner
            .tombstones
            .lock()
            .map(|tombstones| tombstones.tasks.clone())
            .unwrap_or_default()
    }

    fn tombstoned_users(&self) -> HashSet<UserId> {
        self.inner
            .tombstones
            .lock()
            .map(|tombstones| tombstones.users.clone())
            .unwrap_or_default()
    }
}

fn upsert_user(users: &mut Vec<User>, user: User) {
    match users.iter_mut().find(|existing| existing.id == user.id) {
        Some(existing) => *existing = user,
        None => users.push(user),
    }
}

fn retry_or_drop(key: &str, retried: Result<()>) -> Result<()> {
    match retried {
        Err(Error::StorageFull { bytes, .. }) => {
            error!(key, bytes, "Local store still full after eviction; write dropped");
            Ok(())
        }
        other => other,
    }
}

fn evict_past_retention(tasks: &mut Vec<Task>, cutoff: i64) -> usize {
    let before = tasks.len();
    tasks.retain(|task| task.created_at >= cutoff);
    before - tasks.len()
}

/// Device id for this installation, generated on first use
fn ensure_device_id(store: &dyn LocalStore, now_ms: i64) -> Result<String> {
    if let Some(device_id) = read_json::<String>(store, keys::DEVICE_ID) {
        return Ok(device_id);
    }
    let suffix = uuid::Uuid::now_v7().simple().to_string();
    let device_id = format!("device_{now_ms}_{}", &suffix[suffix.len() - 9..]);
    write_json(store, keys::DEVICE_ID, &device_id)?;
    info!(%device_id, "Generated device id");
    Ok(device_id)
}

#[cfg(test)]
mod tests;
