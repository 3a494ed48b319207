//! Task desk service shared by all clients.
//!
//! Maps user-level operations onto the sync engine. The only logic added here
//! is defaulting (assignee, due date, passwords) and role-based views.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::SyncSettings;
use crate::models::{
    DashboardStats, RecurringType, RemoteSyncStats, SyncReport, SyncStats, Task, TaskId,
    TaskPriority, TaskStatus, User, UserId, UserRole,
};
use crate::remote::{HttpRemoteClient, RemoteStore};
use crate::store::{LocalStore, SqliteStore};
use crate::sync::{BackgroundSync, SyncEngine};
use crate::util::{normalize_text_option, DAY_MS};
use crate::{Error, Result};

/// Minimum length accepted by [`TaskDesk::change_password`].
const MIN_PASSWORD_CHARS: usize = 6;

/// Days until a new task is due when no date is given.
const DEFAULT_DUE_DAYS: i64 = 7;

/// Input for [`TaskDesk::create_task`].
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub dispatch_number: Option<String>,
    pub issuing_authority: Option<String>,
    pub issue_date: Option<String>,
    pub recurring: RecurringType,
    pub priority: TaskPriority,
    /// Defaults to the first officer
    pub assignee_id: Option<UserId>,
    /// Defaults to seven days from now
    pub due_date: Option<DateTime<Utc>>,
}

/// Input for [`TaskDesk::create_user`].
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub full_name: String,
    pub role: UserRole,
    /// Defaults to the configured default password
    pub password: Option<String>,
}

/// Manager-side task list filter. Ignored for officers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    pub assignee: Option<UserId>,
    pub status: Option<TaskStatus>,
}

/// Thread-safe task desk service.
pub struct TaskDesk<R> {
    engine: SyncEngine<R>,
}

impl<R> Clone for TaskDesk<R> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
        }
    }
}

impl TaskDesk<HttpRemoteClient> {
    /// Open the desk with a local store at `db_path` and the configured remote endpoint.
    pub fn open(settings: SyncSettings, db_path: impl AsRef<Path>) -> Result<Self> {
        let store = SqliteStore::open(db_path)?.with_capacity_bytes(settings.capacity_bytes);
        let remote = HttpRemoteClient::from_settings(&settings)?;
        let store: Arc<dyn LocalStore> = Arc::new(store);
        let engine = SyncEngine::new(store, Arc::new(remote), settings)?;
        Ok(Self { engine })
    }
}

impl<R: RemoteStore> TaskDesk<R> {
    pub const fn with_engine(engine: SyncEngine<R>) -> Self {
        Self { engine }
    }

    pub const fn engine(&self) -> &SyncEngine<R> {
        &self.engine
    }

    /// Prepare the remote schema and run a first sync.
    ///
    /// Failures are logged and absorbed; the desk keeps working from the local copy.
    pub async fn initialize(&self) {
        if let Err(error) = self.engine.init_remote().await {
            tracing::warn!(%error, "Remote init failed; continuing offline");
        }
        if let Err(error) = self.engine.sync_now().await {
            tracing::warn!(%error, "Initial sync failed; serving local data");
        }
    }

    // -----------------------------------------------------------------------
    // Accounts
    // -----------------------------------------------------------------------

    pub async fn login(&self, username: &str, password: &str) -> Result<Option<User>> {
        if username.trim().is_empty() || password.is_empty() {
            return Ok(None);
        }
        self.engine.login(username, password).await
    }

    /// Set a new password for `user` and clear the first-login flag.
    pub fn change_password(&self, user: &User, new_password: &str) -> Result<User> {
        if new_password.chars().count() < MIN_PASSWORD_CHARS {
            return Err(Error::InvalidInput(format!(
                "password must be at least {MIN_PASSWORD_CHARS} characters"
            )));
        }
        let mut updated = user.clone();
        updated.password = Some(new_password.to_string());
        updated.is_first_login = false;
        self.engine.update_user(updated.clone())?;
        tracing::info!(user_id = %user.id, "Password changed");
        Ok(updated.sealed())
    }

    /// Restore the default password and force a change on next login.
    pub fn reset_password(&self, id: &UserId) -> Result<User> {
        let mut user = self.cached_user(id)?;
        user.password = Some(self.engine.settings().default_password.clone());
        user.is_first_login = true;
        self.engine.update_user(user.clone())?;
        tracing::info!(user_id = %id, "Password reset to default");
        Ok(user.sealed())
    }

    pub async fn create_user(&self, new_user: NewUser) -> Result<User> {
        let username = new_user.username.trim().to_string();
        let full_name = new_user.full_name.trim().to_string();
        if username.is_empty() || full_name.is_empty() {
            return Err(Error::InvalidInput(
                "username and full name are required".to_string(),
            ));
        }
        if self
            .engine
            .users()
            .await?
            .iter()
            .any(|user| user.username == username)
        {
            return Err(Error::InvalidInput(format!(
                "username '{username}' is already taken"
            )));
        }

        let password = normalize_text_option(new_user.password)
            .unwrap_or_else(|| self.engine.settings().default_password.clone());
        let user = User::new(username, full_name, new_user.role, password);
        self.engine.add_user(user.clone())?;
        tracing::info!(user_id = %user.id, role = %user.role, "User created");
        Ok(user.sealed())
    }

    /// Save profile changes; the avatar follows the name and role.
    pub fn update_user(&self, mut user: User) -> Result<User> {
        user.refresh_avatar();
        self.engine.update_user(user.clone())?;
        Ok(user.sealed())
    }

    pub fn delete_user(&self, id: &UserId) -> Result<bool> {
        self.engine.delete_user(id)
    }

    pub async fn users(&self) -> Result<Vec<User>> {
        self.engine.users().await
    }

    fn cached_user(&self, id: &UserId) -> Result<User> {
        self.engine
            .cached_users()
            .into_iter()
            .find(|user| &user.id == id)
            .ok_or_else(|| Error::NotFound(format!("user {id}")))
    }

    // -----------------------------------------------------------------------
    // Tasks
    // -----------------------------------------------------------------------

    pub async fn create_task(&self, creator: &User, draft: NewTask) -> Result<Task> {
        let title = draft.title.trim();
        if title.is_empty() {
            return Err(Error::InvalidInput("task title cannot be empty".to_string()));
        }

        let assignee_id = match draft.assignee_id {
            Some(assignee_id) => assignee_id,
            None => self
                .engine
                .users()
                .await?
                .into_iter()
                .find(|user| user.role == UserRole::Officer)
                .map(|user| user.id)
                .ok_or_else(|| {
                    Error::InvalidInput("no officer available to assign the task".to_string())
                })?,
        };

        let now = self.engine.now_ms();
        let due_date = draft.due_date.unwrap_or_else(|| {
            DateTime::from_timestamp_millis(now + DEFAULT_DUE_DAYS * DAY_MS).unwrap_or_else(Utc::now)
        });

        let mut task = Task::new(
            title,
            draft.description.trim(),
            assignee_id,
            creator.id.clone(),
            due_date,
        );
        task.created_at = now;
        task.dispatch_number = normalize_text_option(draft.dispatch_number);
        task.issuing_authority = normalize_text_option(draft.issuing_authority);
        task.issue_date = normalize_text_option(draft.issue_date);
        task.recurring = draft.recurring;
        task.priority = draft.priority;

        self.engine.save_task(task.clone())?;
        tracing::info!(task_id = %task.id, assignee = %task.assignee_id, "Task created");
        Ok(task)
    }

    /// Save an edited task.
    pub fn update_task(&self, mut task: Task) -> Result<Task> {
        if task.title.trim().is_empty() {
            return Err(Error::InvalidInput("task title cannot be empty".to_string()));
        }
        task.touch(self.engine.now_ms());
        self.engine.save_task(task.clone())?;
        Ok(task)
    }

    pub fn set_task_status(&self, id: &TaskId, status: TaskStatus) -> Result<Task> {
        let mut task = self
            .engine
            .cached_tasks()
            .into_iter()
            .find(|task| &task.id == id)
            .ok_or_else(|| Error::NotFound(format!("task {id}")))?;
        task.status = status;
        self.update_task(task)
    }

    pub fn delete_task(&self, id: &TaskId) -> Result<bool> {
        self.engine.delete_task(id)
    }

    pub async fn tasks(&self) -> Result<Vec<Task>> {
        self.engine.tasks().await
    }

    /// Tasks `viewer` may see, newest first.
    ///
    /// Officers only see tasks assigned to them. Managers see everything and
    /// may narrow by assignee. Both may narrow by status.
    pub async fn visible_tasks(&self, viewer: &User, filter: &TaskFilter) -> Result<Vec<Task>> {
        Ok(visible_to(self.engine.tasks().await?, viewer, filter))
    }

    pub async fn dashboard_stats(&self, viewer: &User) -> Result<DashboardStats> {
        let tasks = visible_to(self.engine.tasks().await?, viewer, &TaskFilter::default());
        Ok(dashboard_of(&tasks))
    }

    /// Open recurring tasks; empty for anyone but managers.
    pub async fn recurring_alerts(&self, viewer: &User) -> Result<Vec<Task>> {
        if !viewer.is_manager() {
            return Ok(Vec::new());
        }
        Ok(self
            .engine
            .tasks()
            .await?
            .into_iter()
            .filter(|task| task.is_recurring() && task.is_open())
            .collect())
    }

    // -----------------------------------------------------------------------
    // Sync
    // -----------------------------------------------------------------------

    /// Run a sync cycle now; `None` when one was already running.
    pub async fn force_sync(&self) -> Result<Option<SyncReport>> {
        self.engine.sync_now().await
    }

    pub fn stats(&self) -> Result<SyncStats> {
        self.engine.stats()
    }

    pub async fn remote_stats(&self) -> Result<RemoteSyncStats> {
        self.engine.remote_stats().await
    }

    pub async fn remote_cleanup(&self) -> Result<u64> {
        self.engine.remote_cleanup().await
    }

    pub fn reset_local_cache(&self) -> Result<()> {
        self.engine.reset_local_cache()
    }

    pub fn start_background_sync(&self) -> BackgroundSync {
        self.engine.start_background_sync()
    }

    /// Wait for background remote writes to finish.
    pub async fn settle(&self) {
        self.engine.settle().await;
    }
}

fn visible_to(tasks: Vec<Task>, viewer: &User, filter: &TaskFilter) -> Vec<Task> {
    let mut visible: Vec<Task> = tasks
        .into_iter()
        .filter(|task| {
            if viewer.is_manager() {
                filter
                    .assignee
                    .as_ref()
                    .map_or(true, |assignee| &task.assignee_id == assignee)
            } else {
                task.assignee_id == viewer.id
            }
        })
        .filter(|task| filter.status.map_or(true, |status| task.status == status))
        .collect();
    visible.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    visible
}

fn dashboard_of(tasks: &[Task]) -> DashboardStats {
    let count = |status: TaskStatus| tasks.iter().filter(|task| task.status == status).count();
    DashboardStats {
        total: tasks.len(),
        pending: count(TaskStatus::Pending),
        in_progress: count(TaskStatus::InProgress),
        completed: count(TaskStatus::Completed),
    }
}
