use taskdesk_core::models::{RecurringType, Task, TaskPriority, TaskStatus, User};
use taskdesk_core::remote::RemoteStore;
use taskdesk_core::services::{NewTask, TaskFilter};
use taskdesk_core::TaskDesk;

use crate::commands::common::{
    acting_user, find_user, format_task_lines, parse_due_date, resolve_task, task_to_list_item,
    TaskListItem,
};
use crate::error::CliError;

/// Options for `tasks add` beyond the title.
#[derive(Debug, Default)]
pub struct TaskDraftArgs {
    pub description: String,
    pub assignee: Option<String>,
    pub priority: TaskPriority,
    pub recurring: RecurringType,
    pub due: Option<String>,
    pub dispatch_number: Option<String>,
    pub authority: Option<String>,
    pub issue_date: Option<String>,
}

pub async fn run_list<R: RemoteStore>(
    desk: &TaskDesk<R>,
    acting: Option<&str>,
    assignee: Option<&str>,
    status: Option<TaskStatus>,
    as_json: bool,
) -> Result<Vec<Task>, CliError> {
    let tasks = list_tasks(desk, acting, assignee, status).await?;
    let users = desk.users().await.unwrap_or_default();
    let now_ms = desk.engine().now_ms();

    if as_json {
        let json_items = tasks
            .iter()
            .map(|task| task_to_list_item(task, &users, now_ms))
            .collect::<Vec<TaskListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else if tasks.is_empty() {
        println!("No tasks.");
    } else {
        for line in format_task_lines(&tasks, &users, now_ms) {
            println!("{line}");
        }
    }

    if let Some(viewer) = viewer_for_alerts(desk, acting).await {
        let alerts = desk.recurring_alerts(&viewer).await?;
        if !alerts.is_empty() && !as_json {
            println!(
                "{} recurring task(s) still open; check their progress.",
                alerts.len()
            );
        }
    }
    Ok(tasks)
}

/// Tasks for the acting user, or every task when no user is given.
pub async fn list_tasks<R: RemoteStore>(
    desk: &TaskDesk<R>,
    acting: Option<&str>,
    assignee: Option<&str>,
    status: Option<TaskStatus>,
) -> Result<Vec<Task>, CliError> {
    let assignee = match assignee {
        Some(username) => Some(find_user(desk, username).await?.id),
        None => None,
    };
    let filter = TaskFilter { assignee, status };

    match acting {
        Some(username) => {
            let viewer = find_user(desk, username).await?;
            Ok(desk.visible_tasks(&viewer, &filter).await?)
        }
        None => {
            let mut tasks: Vec<Task> = desk
                .tasks()
                .await?
                .into_iter()
                .filter(|task| {
                    filter
                        .assignee
                        .as_ref()
                        .map_or(true, |assignee| &task.assignee_id == assignee)
                        && filter.status.map_or(true, |status| task.status == status)
                })
                .collect();
            tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(tasks)
        }
    }
}

async fn viewer_for_alerts<R: RemoteStore>(
    desk: &TaskDesk<R>,
    acting: Option<&str>,
) -> Option<User> {
    find_user(desk, acting?).await.ok()
}

pub async fn run_add<R: RemoteStore>(
    desk: &TaskDesk<R>,
    acting: Option<&str>,
    title_parts: &[String],
    args: TaskDraftArgs,
) -> Result<Task, CliError> {
    let title = title_parts.join(" ").trim().to_string();
    if title.is_empty() {
        return Err(CliError::EmptyTitle);
    }
    let creator = acting_user(desk, acting).await?;
    let assignee_id = match args.assignee.as_deref() {
        Some(username) => Some(find_user(desk, username).await?.id),
        None => None,
    };
    let due_date = args.due.as_deref().map(parse_due_date).transpose()?;

    let task = desk
        .create_task(
            &creator,
            NewTask {
                title,
                description: args.description,
                dispatch_number: args.dispatch_number,
                issuing_authority: args.authority,
                issue_date: args.issue_date,
                recurring: args.recurring,
                priority: args.priority,
                assignee_id,
                due_date,
            },
        )
        .await?;

    println!("{}", task.id);
    Ok(task)
}

pub async fn run_status<R: RemoteStore>(
    desk: &TaskDesk<R>,
    id: &str,
    status: TaskStatus,
) -> Result<Task, CliError> {
    let task = resolve_task(desk, id).await?;
    let task = desk.set_task_status(&task.id, status)?;
    println!("{} {}", task.id, task.status);
    Ok(task)
}

pub async fn run_delete<R: RemoteStore>(desk: &TaskDesk<R>, id: &str) -> Result<(), CliError> {
    let task = resolve_task(desk, id).await?;
    desk.delete_task(&task.id)?;
    println!("{}", task.id);
    Ok(())
}
