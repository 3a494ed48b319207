use taskdesk_core::models::{User, UserRole};
use taskdesk_core::remote::RemoteStore;
use taskdesk_core::services::NewUser;
use taskdesk_core::TaskDesk;

use crate::commands::common::{find_user, format_user_lines, user_to_list_item, UserListItem};
use crate::error::CliError;

pub async fn run_list<R: RemoteStore>(desk: &TaskDesk<R>, as_json: bool) -> Result<(), CliError> {
    let users = desk.users().await?;

    if as_json {
        let json_items = users
            .iter()
            .map(user_to_list_item)
            .collect::<Vec<UserListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else {
        for line in format_user_lines(&users) {
            println!("{line}");
        }
    }
    Ok(())
}

pub async fn run_add<R: RemoteStore>(
    desk: &TaskDesk<R>,
    username: &str,
    full_name_parts: &[String],
    role: UserRole,
    password: Option<String>,
) -> Result<User, CliError> {
    let user = desk
        .create_user(NewUser {
            username: username.to_string(),
            full_name: full_name_parts.join(" "),
            role,
            password,
        })
        .await?;
    println!("{} {}", user.id, user.username);
    Ok(user)
}

pub async fn run_reset_password<R: RemoteStore>(
    desk: &TaskDesk<R>,
    username: &str,
) -> Result<(), CliError> {
    let user = find_user(desk, username).await?;
    desk.reset_password(&user.id)?;
    println!("Password for {} reset to the default", user.username);
    Ok(())
}

pub async fn run_delete<R: RemoteStore>(desk: &TaskDesk<R>, username: &str) -> Result<(), CliError> {
    let user = find_user(desk, username).await?;
    desk.delete_user(&user.id)?;
    println!("{}", user.id);
    Ok(())
}
