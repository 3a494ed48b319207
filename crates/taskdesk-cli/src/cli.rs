use std::path::PathBuf;

use clap::{Parser, Subcommand};
use taskdesk_core::models::{RecurringType, TaskPriority, TaskStatus, UserRole};

#[derive(Parser)]
#[command(name = "taskdesk")]
#[command(about = "Assign and track dispatched tasks from the command line")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local cache database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Username acting on tasks (officers only see their own)
    #[arg(long = "as", global = true, value_name = "USERNAME", env = "TASKDESK_USER")]
    pub acting_user: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check credentials against the remote store or the local cache
    Login {
        username: String,
        #[arg(long, value_name = "PASSWORD")]
        password: String,
        /// Set a new password after a successful login
        #[arg(long, value_name = "PASSWORD")]
        new_password: Option<String>,
    },
    /// Manage tasks
    Tasks {
        #[command(subcommand)]
        command: TaskCommands,
    },
    /// Manage users
    Users {
        #[command(subcommand)]
        command: UserCommands,
    },
    /// Run a sync cycle with the remote store now
    Sync {
        /// Also ask the remote to sweep rows past the TTL
        #[arg(long)]
        cleanup: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show local cache and sync health
    Stats {
        /// Include remote store statistics
        #[arg(long)]
        remote: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Drop cached users, tasks and queued changes (keeps the device id)
    ResetCache,
}

#[derive(Subcommand)]
pub enum TaskCommands {
    /// List tasks visible to the acting user, newest first
    List {
        /// Only tasks assigned to this username (managers)
        #[arg(long, value_name = "USERNAME")]
        assignee: Option<String>,
        /// Only tasks in this status
        #[arg(long)]
        status: Option<TaskStatus>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Create a task
    #[command(alias = "new")]
    Add {
        /// Task title
        title: Vec<String>,
        #[arg(short, long, default_value = "")]
        description: String,
        /// Assignee username; defaults to the first officer
        #[arg(long, value_name = "USERNAME")]
        assignee: Option<String>,
        #[arg(long, default_value = "medium")]
        priority: TaskPriority,
        #[arg(long, default_value = "none")]
        recurring: RecurringType,
        /// Due date (YYYY-MM-DD); defaults to seven days from now
        #[arg(long, value_name = "DATE")]
        due: Option<String>,
        /// Dispatch number of the originating document
        #[arg(long, value_name = "NUMBER")]
        dispatch_number: Option<String>,
        /// Authority that issued the originating document
        #[arg(long, value_name = "NAME")]
        authority: Option<String>,
        /// Issue date of the originating document
        #[arg(long, value_name = "DATE")]
        issue_date: Option<String>,
    },
    /// Change the status of a task
    Status {
        /// Task ID or unique ID prefix
        id: String,
        status: TaskStatus,
    },
    /// Delete a task
    Delete {
        /// Task ID or unique ID prefix
        id: String,
    },
}

#[derive(Subcommand)]
pub enum UserCommands {
    /// List users
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Create a user
    Add {
        username: String,
        /// Display name
        full_name: Vec<String>,
        #[arg(long, default_value = "officer")]
        role: UserRole,
        /// Initial password; defaults to the configured default
        #[arg(long, value_name = "PASSWORD")]
        password: Option<String>,
    },
    /// Restore a user's default password
    ResetPassword { username: String },
    /// Delete a user and every task referencing them
    Delete { username: String },
}
