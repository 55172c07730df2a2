use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use tasklane_shared::{TaskCreate, TaskDto};

use crate::datetime::parse_created_at;
use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(TaskId)
            .map_err(|_| anyhow!("invalid task id: {s}"))
    }
}

/// Completion-status partition shown in the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Filter {
    #[default]
    Pending,
    Completed,
}

impl Filter {
    pub const ALL: [Filter; 2] = [Filter::Pending, Filter::Completed];

    /// Value sent as the `completed` query parameter.
    pub fn completed_flag(self) -> bool {
        matches!(self, Filter::Completed)
    }

    pub fn admits(self, task: &Task) -> bool {
        task.completed == self.completed_flag()
    }

    /// Tab caption.
    pub fn label(self) -> &'static str {
        match self {
            Filter::Pending => "New",
            Filter::Completed => "Completed",
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Pending => f.write_str("pending"),
            Filter::Completed => f.write_str("completed"),
        }
    }
}

impl FromStr for Filter {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "new" | "pending" | "open" => Ok(Filter::Pending),
            "completed" | "done" => Ok(Filter::Completed),
            other => Err(anyhow!("unknown filter: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<TaskDto> for Task {
    type Error = SyncError;

    fn try_from(dto: TaskDto) -> Result<Self, Self::Error> {
        let id = dto
            .id
            .ok_or_else(|| SyncError::Protocol("task without id in response".to_string()))?;
        let title = dto
            .title
            .ok_or_else(|| SyncError::Protocol(format!("task {id} has no title")))?;
        let raw_created = dto
            .created_at
            .ok_or_else(|| SyncError::Protocol(format!("task {id} has no createdAt")))?;
        let created_at = parse_created_at(&raw_created).map_err(SyncError::Protocol)?;

        Ok(Self {
            id: TaskId(id),
            title,
            // the backend only enforces a title
            description: dto.description.unwrap_or_default(),
            completed: dto.completed,
            created_at,
        })
    }
}

/// A validated create request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub title: String,
    pub description: String,
}

impl From<&NewTask> for TaskCreate {
    fn from(task: &NewTask) -> Self {
        TaskCreate::pending(task.title.clone(), task.description.clone())
    }
}

pub const EMPTY_FORM_MESSAGE: &str = "Task title and description cannot be empty.";

/// Input buffers of the "add task" form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskForm {
    title: String,
    description: String,
}

impl TaskForm {
    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
    }

    pub fn clear(&mut self) {
        self.title.clear();
        self.description.clear();
    }

    pub fn validate(&self) -> Result<NewTask, SyncError> {
        if self.title.trim().is_empty() || self.description.trim().is_empty() {
            return Err(SyncError::Validation(EMPTY_FORM_MESSAGE.to_string()));
        }
        Ok(NewTask {
            title: self.title.clone(),
            description: self.description.clone(),
        })
    }
}
