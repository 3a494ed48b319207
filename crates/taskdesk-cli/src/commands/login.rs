use taskdesk_core::models::User;
use taskdesk_core::remote::RemoteStore;
use taskdesk_core::TaskDesk;

use crate::error::CliError;

pub async fn run_login<R: RemoteStore>(
    desk: &TaskDesk<R>,
    username: &str,
    password: &str,
    new_password: Option<&str>,
) -> Result<User, CliError> {
    let user = desk
        .login(username, password)
        .await?
        .ok_or_else(|| CliError::LoginFailed(username.trim().to_string()))?;

    let user = match new_password {
        Some(new_password) => {
            let updated = desk.change_password(&user, new_password)?;
            println!("Password changed");
            updated
        }
        None => user,
    };

    println!("Logged in as {} ({})", user.full_name, user.role);
    if user.is_first_login {
        println!("Password change required: rerun with --new-password");
    }
    Ok(user)
}
