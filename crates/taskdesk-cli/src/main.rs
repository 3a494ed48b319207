//! TaskDesk CLI - Command-line interface for dispatched task tracking
//!
//! Works from the local cache and syncs with the remote store when reachable.

mod cli;
mod commands;
mod error;


use clap::Parser;
use taskdesk_core::remote::RemoteStore;
use taskdesk_core::TaskDesk;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands, TaskCommands, UserCommands};
use crate::commands::common::{open_desk, resolve_db_path};
use crate::commands::login::run_login;
use crate::commands::sync::{run_reset_cache, run_stats, run_sync};
use crate::commands::tasks::TaskDraftArgs;
use crate::commands::{tasks, users};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("taskdesk=info,taskdesk_core=info")),
        )
        .init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);
    let desk = open_desk(&db_path)?;

    let result = dispatch(&desk, cli.command, cli.acting_user.as_deref()).await;
    // Give fire-and-forget remote writes their chance before exiting
    desk.settle().await;
    result
}

async fn dispatch<R: RemoteStore>(
    desk: &TaskDesk<R>,
    command: Commands,
    acting: Option<&str>,
) -> Result<(), CliError> {
    match command {
        Commands::Login {
            username,
            password,
            new_password,
        } => {
            run_login(desk, &username, &password, new_password.as_deref()).await?;
        }
        Commands::Tasks { command } => match command {
            TaskCommands::List {
                assignee,
                status,
                json,
            } => {
                tasks::run_list(desk, acting, assignee.as_deref(), status, json).await?;
            }
            TaskCommands::Add {
                title,
                description,
                assignee,
                priority,
                recurring,
                due,
                dispatch_number,
                authority,
                issue_date,
            } => {
                let args = TaskDraftArgs {
                    description,
                    assignee,
                    priority,
                    recurring,
                    due,
                    dispatch_number,
                    authority,
                    issue_date,
                };
                tasks::run_add(desk, acting, &title, args).await?;
            }
            TaskCommands::Status { id, status } => {
                tasks::run_status(desk, &id, status).await?;
            }
            TaskCommands::Delete { id } => tasks::run_delete(desk, &id).await?,
        },
        Commands::Users { command } => match command {
            UserCommands::List { json } => users::run_list(desk, json).await?,
            UserCommands::Add {
                username,
                full_name,
                role,
                password,
            } => {
                users::run_add(desk, &username, &full_name, role, password).await?;
            }
            UserCommands::ResetPassword { username } => {
                users::run_reset_password(desk, &username).await?;
            }
            UserCommands::Delete { username } => users::run_delete(desk, &username).await?,
        },
        Commands::Sync { cleanup, json } => {
            run_sync(desk, cleanup, json).await?;
        }
        Commands::Stats { remote, json } => run_stats(desk, remote, json).await?,
        Commands::ResetCache => run_reset_cache(desk)?,
    }
    Ok(())
}
