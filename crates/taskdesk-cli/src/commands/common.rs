use std::env;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use taskdesk_core::models::{Task, TaskId, User};
use taskdesk_core::remote::{HttpRemoteClient, RemoteStore};
use taskdesk_core::{SyncSettings, TaskDesk};

use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct TaskListItem {
    pub id: String,
    pub title: String,
    pub status: String,
    pub priority: String,
    pub recurring: String,
    pub assignee: String,
    pub due_date: String,
    pub created_at: i64,
    pub relative_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispatch_number: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UserListItem {
    pub id: String,
    pub username: String,
    pub full_name: String,
    pub role: String,
    pub is_first_login: bool,
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("TASKDESK_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(env::temp_dir)
        .join("taskdesk")
        .join("taskdesk.db")
}

pub fn open_desk(db_path: &Path) -> Result<TaskDesk<HttpRemoteClient>, CliError> {
    let settings = SyncSettings::from_env()?;
    tracing::debug!(db_path = %db_path.display(), endpoint = %settings.api_url, "Opening task desk");
    Ok(TaskDesk::open(settings, db_path)?)
}

/// Resolve a username to a cached or freshly fetched user.
pub async fn find_user<R: RemoteStore>(
    desk: &TaskDesk<R>,
    username: &str,
) -> Result<User, CliError> {
    let username = username.trim();
    desk.users()
        .await?
        .into_iter()
        .find(|user| user.username == username)
        .ok_or_else(|| CliError::UserNotFound(username.to_string()))
}

pub async fn acting_user<R: RemoteStore>(
    desk: &TaskDesk<R>,
    username: Option<&str>,
) -> Result<User, CliError> {
    let username = username.ok_or(CliError::NoActingUser)?;
    find_user(desk, username).await
}

pub fn normalize_task_identifier(id: &str) -> Result<String, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        return Err(CliError::EmptyTaskId);
    }
    Ok(trimmed.to_string())
}

/// Resolve an exact task id or a unique id prefix.
pub async fn resolve_task<R: RemoteStore>(
    desk: &TaskDesk<R>,
    task_query: &str,
) -> Result<Task, CliError> {
    let task_query = normalize_task_identifier(task_query)?;
    let tasks = desk.tasks().await?;

    if let Some(task) = tasks.iter().find(|task| task.id.as_str() == task_query) {
        return Ok(task.clone());
    }

    let matching: Vec<&Task> = tasks
        .iter()
        .filter(|task| task.id.as_str().starts_with(&task_query))
        .collect();

    match matching.as_slice() {
        [] => Err(CliError::TaskNotFound(task_query)),
        [task] => Ok((*task).clone()),
        _ => {
            let options = matching
                .iter()
                .take(3)
                .map(|task| task.id.as_str().chars().take(13).collect::<String>())
                .collect::<Vec<_>>()
                .join(", ");
            Err(CliError::AmbiguousTaskId(format!(
                "Task ID prefix '{task_query}' is ambiguous. Matches: {options}"
            )))
        }
    }
}

pub fn parse_due_date(value: &str) -> Result<DateTime<Utc>, CliError> {
    let trimmed = value.trim();
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|date_time| date_time.and_utc())
        .ok_or_else(|| CliError::InvalidDate(trimmed.to_string()))
}

pub fn task_to_list_item(task: &Task, users: &[User], now_ms: i64) -> TaskListItem {
    TaskListItem {
        id: task.id.to_string(),
        title: task.title.clone(),
        status: task.status.to_string(),
        priority: task.priority.to_string(),
        recurring: task.recurring.to_string(),
        assignee: display_name(users, task),
        due_date: task.due_date.format("%Y-%m-%d").to_string(),
        created_at: task.created_at,
        relative_time: format_relative_time(task.created_at, now_ms),
        dispatch_number: task.dispatch_number.clone(),
    }
}

pub fn user_to_list_item(user: &User) -> UserListItem {
    UserListItem {
        id: user.id.to_string(),
        username: user.username.clone(),
        full_name: user.full_name.clone(),
        role: user.role.to_string(),
        is_first_login: user.is_first_login,
    }
}

pub fn format_task_lines(tasks: &[Task], users: &[User], now_ms: i64) -> Vec<String> {
    tasks
        .iter()
        .map(|task| {
            let recurring = if task.is_recurring() {
                format!(" [{}]", task.recurring)
            } else {
                String::new()
            };
            format!(
                "{}  {:<11} {:<6} {}{}  -> {} (due {}, {})",
                short_id(&task.id),
                task.status.as_str(),
                task.priority.as_str(),
                task.title,
                recurring,
                display_name(users, task),
                task.due_date.format("%Y-%m-%d"),
                format_relative_time(task.created_at, now_ms)
            )
        })
        .collect()
}

pub fn format_user_lines(users: &[User]) -> Vec<String> {
    users
        .iter()
        .map(|user| {
            let first_login = if user.is_first_login {
                "  (must change password)"
            } else {
                ""
            };
            format!(
                "{:<16} {:<8} {}{}",
                user.username,
                user.role.as_str(),
                user.full_name,
                first_login
            )
        })
        .collect()
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}

fn short_id(id: &TaskId) -> String {
    id.as_str().chars().take(13).collect()
}

fn display_name(users: &[User], task: &Task) -> String {
    users
        .iter()
        .find(|user| user.id == task.assignee_id)
        .map_or_else(|| task.assignee_id.to_string(), |user| user.full_name.clone())
}
