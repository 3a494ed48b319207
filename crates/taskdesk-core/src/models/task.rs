//! Task model

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::UserId;

/// A unique identifier for a task; the sole merge key between devices
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Create a new unique task ID using UUID v7 (time-sortable)
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

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Workflow status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

/// Urgency of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

/// Recurrence of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecurringType {
    #[default]
    None,
    Weekly,
    Monthly,
    Quarterly,
}

macro_rules! wire_enum {
    ($ty:ty { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            /// Wire name of the value
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let normalized = s.trim().to_ascii_uppercase().replace(['-', ' '], "_");
                match normalized.as_str() {
                    $($name => Ok(Self::$variant),)+
                    other => Err(format!(
                        "unknown {} '{other}'",
                        stringify!($ty)
                    )),
                }
            }
        }
    };
}

wire_enum!(TaskStatus {
    Pending => "PENDING",
    InProgress => "IN_PROGRESS",
    Completed => "COMPLETED",
    Cancelled => "CANCELLED",
});

wire_enum!(TaskPriority {
    Low => "LOW",
    Medium => "MEDIUM",
    High => "HIGH",
    Urgent => "URGENT",
});

wire_enum!(RecurringType {
    None => "NONE",
    Weekly => "WEEKLY",
    Monthly => "MONTHLY",
    Quarterly => "QUARTERLY",
});

/// A dispatched task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Unique identifier
    pub id: TaskId,
    pub title: String,
    pub description: String,
    /// Official dispatch number of the originating document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispatch_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuing_authority: Option<String>,
    /// Issue date of the originating document, as written on it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_date: Option<String>,
    #[serde(default)]
    pub recurring: RecurringType,
    /// Weak reference to the assigned user
    pub assignee_id: UserId,
    /// Weak reference to the creating user
    pub creator_id: UserId,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: TaskPriority,
    pub due_date: DateTime<Utc>,
    /// Creation timestamp (Unix ms), immutable once set
    pub created_at: i64,
    /// Last local modification timestamp (Unix ms)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
    /// Advisory steps suggested by the enrichment service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_suggested_steps: Option<Vec<String>>,
}

impl Task {
    /// Create a new pending task with the given content
    #[must_use]
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        assignee_id: UserId,
        creator_id: UserId,
        due_date: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TaskId::new(),
            title: title.into(),
            description: description.into(),
            dispatch_number: None,
            issuing_authority: None,
            issue_date: None,
            recurring: RecurringType::None,
            assignee_id,
            creator_id,
            status: TaskStatus::Pending,
            priority: TaskPriority::Medium,
            due_date,
            created_at: Utc::now().timestamp_millis(),
            updated_at: None,
            ai_suggested_steps: None,
        }
    }

    /// Record a local modification at `now_ms`
    pub fn touch(&mut self, now_ms: i64) {
        self.updated_at = Some(now_ms.max(self.created_at));
    }

    /// Neither completed nor cancelled
    pub const fn is_open(&self) -> bool {
        !matches!(self.status, TaskStatus::Completed | TaskStatus::Cancelled)
    }

    pub const fn is_recurring(&self) -> bool {
        !matches!(self.recurring, RecurringType::None)
    }

    /// Whether `user_id` is assignee or creator
    pub fn references(&self, user_id: &UserId) -> bool {
        &self.assignee_id == user_id || &self.creator_id == user_id
    }
}
