//! User model

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

const AVATAR_BASE_URL: &str = "https://ui-avatars.com/api/";
const DIGEST_CONTEXT: &str = "taskdesk:v1";

/// A unique identifier for a user
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Create a new unique user ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for UserId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Role of a user within the organization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    /// Assigns and reviews tasks
    Manager,
    /// Works on assigned tasks
    Officer,
}

impl UserRole {
    /// Wire name of the role
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Manager => "MANAGER",
            Self::Officer => "OFFICER",
        }
    }

    const fn avatar_background(self) -> &'static str {
        match self {
            Self::Manager => "ef4444",
            Self::Officer => "059669",
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MANAGER" => Ok(Self::Manager),
            "OFFICER" => Ok(Self::Officer),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

/// A user account
///
/// `password` holds a plaintext credential only while it is in transit to
/// the remote store. Copies kept in the local store are sealed: the
/// plaintext is replaced by `password_digest`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Unique identifier
    pub id: UserId,
    /// Unique login name
    pub username: String,
    /// Plaintext credential (remote contract only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Username-keyed SHA-256 digest of the credential
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_digest: Option<String>,
    /// Forces a password change on next login
    #[serde(default)]
    pub is_first_login: bool,
    /// Display name
    pub full_name: String,
    /// Role
    pub role: UserRole,
    /// Derived avatar image URL
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl User {
    /// Create a new user that must rotate `password` on first login
    #[must_use]
    pub fn new(
        username: impl Into<String>,
        full_name: impl Into<String>,
        role: UserRole,
        password: impl Into<String>,
    ) -> Self {
        let full_name = full_name.into();
        Self {
            id: UserId::new(),
            username: username.into(),
            password: Some(password.into()),
            password_digest: None,
            is_first_login: true,
            avatar_url: Some(avatar_url_for(&full_name, role)),
            full_name,
            role,
        }
    }

    /// Replace the plaintext credential with its digest
    #[must_use]
    pub fn sealed(mut self) -> Self {
        if let Some(password) = self.password.take() {
            self.password_digest = Some(password_digest(&self.username, &password));
        }
        self
    }

    /// Check a login attempt against this user's credential
    pub fn verify_password(&self, attempt: &str) -> bool {
        if let Some(password) = &self.password {
            return password == attempt;
        }
        self.password_digest
            .as_deref()
            .is_some_and(|digest| digest == password_digest(&self.username, attempt))
    }

    /// Re-derive the avatar URL from the current name and role
    pub fn refresh_avatar(&mut self) {
        self.avatar_url = Some(avatar_url_for(&self.full_name, self.role));
    }

    pub const fn is_manager(&self) -> bool {
        matches!(self.role, UserRole::Manager)
    }
}

impl fmt::Debug for User {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("User")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field(
                "password_digest",
                &self.password_digest.as_ref().map(|_| "[REDACTED]"),
            )
            .field("is_first_login", &self.is_first_login)
            .field("full_name", &self.full_name)
            .field("role", &self.role)
            .field("avatar_url", &self.avatar_url)
            .finish()
    }
}

/// Avatar URL derived from a display name and role colour
pub fn avatar_url_for(full_name: &str, role: UserRole) -> String {
    format!(
        "{AVATAR_BASE_URL}?name={}&background={}&color=fff&size=128",
        urlencoding::encode(full_name.trim()),
        role.avatar_background()
    )
}

/// SHA-256 of a credential keyed by a fixed context and the username, hex
/// encoded. Deterministic, so any device holding the cache can verify it.
pub fn password_digest(username: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(DIGEST_CONTEXT.as_bytes());
    hasher.update(b":");
    hasher.update(username.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_user_requires_rotation_and_has_avatar() {
        let user = User::new("ptadao", "Phan Thi Anh Dao", UserRole::Officer, "123123");
        assert!(user.is_first_login);
        let avatar = user.avatar_url.unwrap();
        assert!(avatar.contains("name=Phan%20Thi%20Anh%20Dao"));
        assert!(avatar.contains("background=059669"));
    }

    #[test]
    fn sealed_user_drops_plaintext_but_still_verifies() {
        let user = User::new("ldthang", "Le Dinh Thang", UserRole::Manager, "secret").sealed();
        assert!(user.password.is_none());
        assert!(user.password_digest.is_some());
        assert!(user.verify_password("secret"));
        assert!(!user.verify_password("Secret"));
    }

    #[test]
    fn digest_is_keyed_by_username() {
        assert_ne!(password_digest("a", "pw"), password_digest("b", "pw"));
        assert_eq!(password_digest("a", "pw"), password_digest("a", "pw"));
        assert_eq!(password_digest("a", "pw").len(), 64);
    }

    #[test]
    fn sealed_user_json_never_contains_plaintext() {
        let user = User::new("nthao", "Nguyen Thi Hao", UserRole::Manager, "hunter2").sealed();
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("hunter2"));
        assert!(json.contains("passwordDigest"));
        assert!(json.contains("\"role\":\"MANAGER\""));
    }

    #[test]
    fn debug_redacts_credentials() {
        let user = User::new("u", "User", UserRole::Officer, "hunter2");
        let debug = format!("{user:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn role_parses_case_insensitively() {
        assert_eq!("manager".parse::<UserRole>(), Ok(UserRole::Manager));
        assert_eq!(" OFFICER ".parse::<UserRole>(), Ok(UserRole::Officer));
        assert!("admin".parse::<UserRole>().is_err());
    }
}
