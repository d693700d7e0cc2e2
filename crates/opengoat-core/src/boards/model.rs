use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Board {
    pub id: Uuid,
    pub title: String,
    pub owner: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    Doing,
    Pending,
    Blocked,
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::Doing => "doing",
            TaskStatus::Pending => "pending",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Done => "done",
        }
    }

    pub fn from_str(raw: &str) -> Option<Self> {
        match raw {
            "todo" => Some(Self::Todo),
            "doing" => Some(Self::Doing),
            "pending" => Some(Self::Pending),
            "blocked" => Some(Self::Blocked),
            "done" => Some(Self::Done),
            _ => None,
        }
    }

    pub fn requires_reason(&self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::Blocked)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskNote {
    pub content: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub board_id: Uuid,
    pub title: String,
    pub description: String,
    pub project: String,
    pub owner: String,
    pub assigned_to: String,
    pub status: TaskStatus,
    pub status_reason: Option<String>,
    pub blockers: Vec<String>,
    pub artifacts: Vec<TaskNote>,
    pub worklog: Vec<TaskNote>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const DEFAULT_PROJECT: &str = "~";

#[derive(Debug, Clone, Default)]
pub struct CreateTaskOptions {
    pub title: String,
    pub description: String,
    pub project: Option<String>,
    pub assigned_to: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ListTasksOptions {
    pub assignee_filter: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct ListBoardsOptions {
    pub owner_filter: Option<String>,
}
