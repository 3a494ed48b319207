//! HTTP client for the remote action endpoint.

use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use super::{RemoteError, RemoteResult, RemoteStore};
use crate::config::SyncSettings;
use crate::models::{
    RecurringType, RemoteSyncStats, Task, TaskId, TaskPriority, TaskStatus, User, UserId, UserRole,
};
use crate::util::{compact_text, is_http_url, normalize_text_option};

#[derive(Clone)]
pub struct HttpRemoteClient {
    endpoint: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpRemoteClient {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpRemoteClient")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl HttpRemoteClient {
    /// Client for `endpoint` with a per-request timeout
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> RemoteResult<Self> {
        let endpoint = normalize_endpoint(endpoint.into())?;
        Ok(Self {
            endpoint,
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }

    pub fn from_settings(settings: &SyncSettings) -> RemoteResult<Self> {
        Self::new(settings.api_url.clone(), settings.request_timeout)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn call<T: DeserializeOwned>(&self, action: &'static str, data: Value) -> RemoteResult<T> {
        let request = ActionRequest { action, data };
        let response = self
            .client
            .post(&self.endpoint)
            .header("Accept", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(RemoteError::Api {
                status: status.as_u16(),
                message: parse_api_error(status, &body),
            });
        }

        debug!(action, bytes = body.len(), "Remote action completed");
        serde_json::from_str(&body).map_err(|error| {
            RemoteError::InvalidPayload(format!(
                "{action}: {error} in '{}'",
                compact_text(&body)
            ))
        })
    }

    async fn write(&self, action: &'static str, data: Value) -> RemoteResult<()> {
        let ack: WriteAck = self.call(action, data).await?;
        if ack.success {
            Ok(())
        } else {
            Err(RemoteError::InvalidPayload(format!(
                "{action} was not acknowledged"
            )))
        }
    }
}

impl RemoteStore for HttpRemoteClient {
    async fn init(&self) -> RemoteResult<()> {
        self.write("init", Value::Null).await
    }

    async fn get_users(&self) -> RemoteResult<Vec<User>> {
        let rows: Vec<UserRow> = self.call("getUsers", Value::Null).await?;
        rows.into_iter().map(User::try_from).collect()
    }

    async fn add_user(&self, user: &User) -> RemoteResult<()> {
        self.write("addUser", user_payload(user)?).await
    }

    async fn update_user(&self, user: &User) -> RemoteResult<()> {
        self.write("updateUser", user_payload(user)?).await
    }

    async fn delete_user(&self, id: &UserId) -> RemoteResult<()> {
        self.write("deleteUser", json!({ "id": id })).await
    }

    async fn login(&self, username: &str, password: &str) -> RemoteResult<Option<User>> {
        let row: Option<UserRow> = self
            .call(
                "login",
                json!({ "username": username, "password": password }),
            )
            .await?;
        row.map(User::try_from).transpose()
    }

    async fn get_tasks(&self) -> RemoteResult<Vec<Task>> {
        let rows: Vec<TaskRow> = self.call("getTasks", Value::Null).await?;
        rows.into_iter().map(Task::try_from).collect()
    }

    async fn save_task(&self, task: &Task) -> RemoteResult<()> {
        self.write("saveTask", to_payload(task)?).await
    }

    async fn batch_save_tasks(&self, tasks: &[Task]) -> RemoteResult<usize> {
        let response: BatchSaveResponse = self
            .call("batchSaveTasks", json!({ "tasks": to_payload(tasks)? }))
            .await?;
        let saved = response.saved.to_i64().ok_or_else(|| {
            RemoteError::InvalidPayload("batchSaveTasks: non-numeric saved count".to_string())
        })?;
        Ok(usize::try_from(saved).unwrap_or(0))
    }

    async fn delete_task(&self, id: &TaskId) -> RemoteResult<()> {
        self.write("deleteTask", json!({ "id": id })).await
    }

    async fn cleanup(&self) -> RemoteResult<u64> {
        let response: CleanupResponse = self.call("cleanup", Value::Null).await?;
        Ok(response
            .deleted_count
            .and_then(|count| count.to_i64())
            .and_then(|count| u64::try_from(count).ok())
            .unwrap_or(0))
    }

    async fn sync_stats(&self) -> RemoteResult<RemoteSyncStats> {
        let response: SyncStatsResponse = self.call("getSyncStats", Value::Null).await?;
        let count = |value: FlexibleInt, field: &str| {
            value
                .to_i64()
                .and_then(|count| u64::try_from(count).ok())
                .ok_or_else(|| RemoteError::InvalidPayload(format!("getSyncStats: bad {field}")))
        };
        Ok(RemoteSyncStats {
            total_tasks: count(response.total_tasks, "totalTasks")?,
            old_tasks: count(response.old_tasks, "oldTasks")?,
            ttl_days: response.ttl_days,
            next_cleanup: response.next_cleanup,
        })
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ActionRequest {
    action: &'static str,
    #[serde(skip_serializing_if = "Value::is_null")]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct WriteAck {
    #[serde(default)]
    success: bool,
}

#[derive(Debug, Deserialize)]
struct BatchSaveResponse {
    saved: FlexibleInt,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CleanupResponse {
    #[serde(default)]
    deleted_count: Option<FlexibleInt>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SyncStatsResponse {
    total_tasks: FlexibleInt,
    old_tasks: FlexibleInt,
    ttl_days: u32,
    #[serde(default)]
    next_cleanup: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

/// The remote database serializes BIGINT columns and counts as strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum FlexibleInt {
    Int(i64),
    Float(f64),
    Text(String),
}

impl FlexibleInt {
    #[allow(clippy::cast_possible_truncation)]
    fn to_i64(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            Self::Float(value) if value.is_finite() => Some(value.trunc() as i64),
            Self::Float(_) => None,
            Self::Text(value) => value.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct UserRow {
    id: String,
    username: String,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    is_first_login: Option<bool>,
    full_name: String,
    role: String,
    #[serde(default)]
    avatar_url: Option<String>,
}

impl TryFrom<UserRow> for User {
    type Error = RemoteError;

    fn try_from(row: UserRow) -> RemoteResult<Self> {
        let role = row
            .role
            .parse::<UserRole>()
            .map_err(|error| RemoteError::InvalidPayload(format!("user {}: {error}", row.id)))?;
        Ok(Self {
            id: UserId::from(row.id),
            username: row.username,
            password: row.password,
            password_digest: None,
            is_first_login: row.is_first_login.unwrap_or(false),
            full_name: row.full_name,
            role,
            avatar_url: normalize_text_option(row.avatar_url),
        })
    }
}

#[derive(Debug, Deserialize)]
struct TaskRow {
    id: String,
    title: String,
    description: String,
    #[serde(default)]
    dispatch_number: Option<String>,
    #[serde(default)]
    issuing_authority: Option<String>,
    #[serde(default)]
    issue_date: Option<String>,
    #[serde(default)]
    recurring: Option<String>,
    assignee_id: String,
    creator_id: String,
    status: String,
    priority: String,
    due_date: String,
    created_at: FlexibleInt,
    #[serde(default)]
    ai_suggested_steps: Option<Vec<String>>,
}

impl TryFrom<TaskRow> for Task {
    type Error = RemoteError;

    fn try_from(row: TaskRow) -> RemoteResult<Self> {
        let invalid = |detail: String| RemoteError::InvalidPayload(format!("task {}: {detail}", row.id));

        let status = row.status.parse::<TaskStatus>().map_err(invalid)?;
        let priority = row.priority.parse::<TaskPriority>().map_err(invalid)?;
        let recurring = match normalize_text_option(row.recurring) {
            Some(value) => value.parse::<RecurringType>().map_err(invalid)?,
            None => RecurringType::None,
        };
        let due_date = parse_timestamp(&row.due_date)
            .ok_or_else(|| invalid(format!("unparseable due_date '{}'", row.due_date)))?;
        let created_at = row
            .created_at
            .to_i64()
            .ok_or_else(|| invalid("non-numeric created_at".to_string()))?;

        Ok(Self {
            id: TaskId::from(row.id),
            title: row.title,
            description: row.description,
            dispatch_number: normalize_text_option(row.dispatch_number),
            issuing_authority: normalize_text_option(row.issuing_authority),
            issue_date: normalize_text_option(row.issue_date),
            recurring,
            assignee_id: UserId::from(row.assignee_id),
            creator_id: UserId::from(row.creator_id),
            status,
            priority,
            due_date,
            created_at,
            updated_at: None,
            ai_suggested_steps: row.ai_suggested_steps,
        })
    }
}

/// Plaintext user payload expected by `addUser`/`updateUser`
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UserPayload<'a> {
    id: &'a UserId,
    username: &'a str,
    password: &'a str,
    is_first_login: bool,
    full_name: &'a str,
    role: UserRole,
    avatar_url: Option<&'a str>,
}

fn user_payload(user: &User) -> RemoteResult<Value> {
    let password = user.password.as_deref().ok_or_else(|| {
        RemoteError::InvalidPayload(format!("user {} has no credential to send", user.id))
    })?;
    to_payload(&UserPayload {
        id: &user.id,
        username: &user.username,
        password,
        is_first_login: user.is_first_login,
        full_name: &user.full_name,
        role: user.role,
        avatar_url: user.avatar_url.as_deref(),
    })
}

fn to_payload<T: Serialize + ?Sized>(value: &T) -> RemoteResult<Value> {
    serde_json::to_value(value).map_err(|error| RemoteError::InvalidPayload(error.to_string()))
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn transport_error(error: reqwest::Error) -> RemoteError {
    if error.is_timeout() {
        RemoteError::Timeout
    } else {
        RemoteError::Http(error)
    }
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        match (payload.error, payload.message) {
            (Some(error), Some(message)) => {
                return format!("{}: {}", error.trim(), compact_text(&message));
            }
            (Some(text), None) | (None, Some(text)) => return compact_text(&text),
            (None, None) => {}
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        trimmed
    }
}

fn normalize_endpoint(raw: String) -> RemoteResult<String> {
    let endpoint = normalize_text_option(Some(raw)).ok_or_else(|| {
        RemoteError::InvalidConfiguration("endpoint must not be empty".to_string())
    })?;
    if is_http_url(&endpoint) {
        Ok(endpoint.trim_end_matches('/').to_string())
    } else {
        Err(RemoteError::InvalidConfiguration(
            "endpoint must include http:// or https://".to_string(),
        ))
    }
}

/// Accepts RFC 3339, `SQL` timestamps without zone (read as UTC) and bare dates.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    use super::*;

    /// Serve one canned response and hand back the raw request.
    async fn spawn_one_shot_server(
        status_line: &str,
        body: &str,
    ) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test server");
        let address = listener.local_addr().expect("local address");
        let response = format!(
            "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        let (sender, receiver) = oneshot::channel();

        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let request = read_request(&mut socket).await;
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = sender.send(request);
            }
        });

        (format!("http://{address}/api/db"), receiver)
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
        let mut buffer = Vec::new();
        let mut chunk = [0_u8; 4096];
        loop {
            let Ok(read) = socket.read(&mut chunk).await else {
                break;
            };
            if read == 0 {
                break;
            }
            buffer.extend_from_slice(&chunk[..read]);
            let text = String::from_utf8_lossy(&buffer);
            if let Some(header_end) = text.find("\r\n\r\n") {
                let content_length = text[..header_end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if buffer.len() >= header_end + 4 + content_length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }

    fn client(url: &str) -> HttpRemoteClient {
        HttpRemoteClient::new(url, Duration::from_secs(5)).expect("client")
    }

    #[test]
    fn normalize_endpoint_rejects_invalid_values() {
        assert!(normalize_endpoint(String::new()).is_err());
        assert!(normalize_endpoint("tasks.example.org".to_string()).is_err());
        assert_eq!(
            normalize_endpoint(" https://tasks.example.org/api/db/ ".to_string()).unwrap(),
            "https://tasks.example.org/api/db"
        );
    }

    #[test]
    fn parse_timestamp_accepts_server_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 5, 22)
            .unwrap()
            .and_hms_opt(10, 30, 0)
            .unwrap()
            .and_utc();
        assert_eq!(parse_timestamp("2024-05-22T10:30:00.000Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-05-22 10:30:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-05-22T10:30"), Some(expected));
        assert!(parse_timestamp("2024-05-22").is_some());
        assert_eq!(parse_timestamp("next week"), None);
    }

    #[test]
    fn parse_api_error_prefers_structured_body() {
        assert_eq!(
            parse_api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                r#"{"error":"Database error","message":"relation \"tasks\" does not exist"}"#
            ),
            "Database error: relation \"tasks\" does not exist"
        );
        assert_eq!(
            parse_api_error(StatusCode::BAD_REQUEST, r#"{"error":"Unknown action"}"#),
            "Unknown action"
        );
        assert_eq!(parse_api_error(StatusCode::BAD_GATEWAY, "  "), "HTTP 502");
    }

    #[tokio::test]
    async fn get_tasks_decodes_snake_case_rows() {
        let body = r#"[{
            "id": "t1",
            "title": "Submit budget report",
            "description": "Q3 figures",
            "dispatch_number": "123/UBND",
            "issuing_authority": "",
            "issue_date": null,
            "recurring": "MONTHLY",
            "assignee_id": "u4",
            "creator_id": "u1",
            "status": "IN_PROGRESS",
            "priority": "HIGH",
            "due_date": "2024-05-22T00:00:00.000Z",
            "created_at": "1716300000000",
            "synced_at": "1716300000500"
        }]"#;
        let (url, request) = spawn_one_shot_server("200 OK", body).await;

        let tasks = client(&url).get_tasks().await.expect("getTasks");

        assert_eq!(tasks.len(), 1);
        let task = &tasks[0];
        assert_eq!(task.id.as_str(), "t1");
        assert_eq!(task.created_at, 1_716_300_000_000);
        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(task.recurring, RecurringType::Monthly);
        assert_eq!(task.dispatch_number.as_deref(), Some("123/UBND"));
        assert_eq!(task.issuing_authority, None);

        let request = request.await.expect("request captured");
        assert!(request.starts_with("POST /api/db"));
        assert!(request.contains(r#""action":"getTasks""#));
        assert!(!request.contains(r#""data""#));
    }

    #[tokio::test]
    async fn login_returns_none_on_null_body() {
        let (url, request) = spawn_one_shot_server("200 OK", "null").await;

        let user = client(&url).login("ldthang", "wrong").await.expect("login");

        assert!(user.is_none());
        let request = request.await.expect("request captured");
        assert!(request.contains(r#""action":"login""#));
        assert!(request.contains(r#""username":"ldthang""#));
    }

    #[tokio::test]
    async fn add_user_sends_plaintext_payload_without_digest() {
        let (url, request) = spawn_one_shot_server("200 OK", r#"{"success":true}"#).await;
        let user = User::new("nvan", "Nguyen Van An", UserRole::Officer, "123123");

        client(&url).add_user(&user).await.expect("addUser");

        let request = request.await.expect("request captured");
        assert!(request.contains(r#""fullName":"Nguyen Van An""#));
        assert!(request.contains(r#""isFirstLogin":true"#));
        assert!(request.contains(r#""password":"123123""#));
        assert!(!request.contains("passwordDigest"));
    }

    #[tokio::test]
    async fn update_user_without_credential_is_rejected_locally() {
        let user = User::new("nvan", "Nguyen Van An", UserRole::Officer, "123123").sealed();
        let error = client("http://127.0.0.1:9")
            .update_user(&user)
            .await
            .expect_err("no credential");
        assert!(matches!(error, RemoteError::InvalidPayload(_)));
    }

    #[tokio::test]
    async fn sync_stats_accepts_string_counts() {
        let body = r#"{"totalTasks":"12","oldTasks":"3","ttlDays":3,"nextCleanup":"2024-05-23T00:00:00.000Z"}"#;
        let (url, _request) = spawn_one_shot_server("200 OK", body).await;

        let stats = client(&url).sync_stats().await.expect("getSyncStats");

        assert_eq!(
            stats,
            RemoteSyncStats {
                total_tasks: 12,
                old_tasks: 3,
                ttl_days: 3,
                next_cleanup: Some("2024-05-23T00:00:00.000Z".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn server_error_is_retryable_api_error() {
        let (url, _request) = spawn_one_shot_server(
            "500 Internal Server Error",
            r#"{"error":"Database error","message":"connection reset"}"#,
        )
        .await;

        let error = client(&url).get_users().await.expect_err("getUsers fails");

        match &error {
            RemoteError::Api { status, message } => {
                assert_eq!(*status, 500);
                assert_eq!(message, "Database error: connection reset");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(error.is_retryable());
    }

    #[tokio::test]
    async fn unknown_action_is_not_retryable() {
        let (url, _request) =
            spawn_one_shot_server("400 Bad Request", r#"{"error":"Unknown action"}"#).await;

        let error = client(&url).cleanup().await.expect_err("cleanup fails");

        assert!(!error.is_retryable());
    }

    #[tokio::test]
    async fn slow_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("address");
        tokio::spawn(async move {
            if let Ok((socket, _)) = listener.accept().await {
                tokio::time::sleep(Duration::from_secs(5)).await;
                drop(socket);
            }
        });

        let client = HttpRemoteClient::new(format!("http://{address}"), Duration::from_millis(200))
            .expect("client");
        let error = client.get_tasks().await.expect_err("times out");

        assert!(matches!(error, RemoteError::Timeout));
        assert!(error.is_retryable());
    }
}
