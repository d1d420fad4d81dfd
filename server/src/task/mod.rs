use chrono::{DateTime, NaiveDateTime, Utc};
use std::fmt;
use std::str::FromStr;

use crate::entities::task;

pub mod api;
pub mod store;
pub mod web;

use store::{NewTaskRecord, TaskChangeSet, TaskStore};

const MAX_TITLE_CHARS: usize = 200;

/// Lifecycle state of a task.
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy, Hash)]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
}

impl TaskStatus {
    /// Returns the wire/storage representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = TaskServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            other => Err(TaskServiceError::Validation(format!(
                "'{}' is not a valid status",
                other
            ))),
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct Task {
    id: i32,
    owner: i32,
    title: String,
    description: Option<String>,
    due_date: Option<DateTime<Utc>>,
    status: TaskStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Task {
    /// Returns the ID of the task.
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Returns the ID of the user owning the task.
    pub fn owner(&self) -> i32 {
        self.owner
    }

    /// Returns the title of the task.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Returns the description of the task, if any.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Returns the due date of the task, if any.
    pub fn due_date(&self) -> Option<DateTime<Utc>> {
        self.due_date
    }

    /// Returns the status of the task.
    pub fn status(&self) -> TaskStatus {
        self.status
    }

    /// Returns the creation time of the task.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the time of the last mutation of the task.
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

impl From<task::Model> for Task {
    fn from(model: task::Model) -> Self {
        Task {
            id: model.id,
            owner: model.user_id,
            title: model.title,
            description: model.description,
            due_date: model.due_date,
            // Rows are only written through the service, which stores
            // known statuses exclusively.
            status: model.status.parse().unwrap_or_default(),
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

/// Error type for task operations.
#[derive(Debug, thiserror::Error)]
pub enum TaskServiceError {
    /// Represents malformed or missing input.
    #[error("{0}")]
    Validation(String),
    /// Represents a task that does not exist for the calling user.
    /// Ownership mismatches are reported identically, so tasks of other
    /// users stay indistinguishable from absent ones.
    #[error("Task with ID {0} not found")]
    TaskNotFound(i32),
    /// Represents a database error.
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),
}

/// Raw input for creating a task, as received from either surface.
#[derive(Debug, Default)]
pub struct NewTask {
    pub title: Option<String>,
    pub description: Option<String>,
    pub due_date: Option<String>,
    pub status: Option<String>,
}

/// Raw input for updating a task. `title` is required; the other fields
/// keep their stored value when omitted.
#[derive(Debug, Default)]
pub struct TaskChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub due_date: Option<String>,
    pub status: Option<String>,
}

/// Validation and orchestration layer between the HTTP surfaces and the
/// task store. Every operation takes the authenticated owner explicitly;
/// the caller identity is never read from ambient state.
pub struct TaskService<'a> {
    store: TaskStore<'a>,
}

impl TaskService<'_> {
    pub fn new(db: &sea_orm::DatabaseConnection) -> TaskService {
        TaskService {
            store: TaskStore::new(db),
        }
    }

    /// Creates a new task owned by `owner`.
    ///
    /// # Returns
    ///
    /// A `Result` containing the created `Task` if successful, or an error
    /// otherwise. Status defaults to `pending` when omitted.
    #[tracing::instrument(skip(self))]
    pub async fn create_task(&self, owner: i32, input: NewTask) -> Result<Task, TaskServiceError> {
        let record = NewTaskRecord {
            title: validate_title(input.title.as_deref())?,
            description: normalize_description(input.description),
            due_date: parse_optional_due_date(input.due_date.as_deref())?,
            status: parse_optional_status(input.status.as_deref())?.unwrap_or_default(),
        };
        self.store.insert(owner, record).await
    }

    /// Retrieves a task by its ID, scoped to `owner`.
    #[tracing::instrument(skip(self))]
    pub async fn get_task(&self, owner: i32, id: i32) -> Result<Task, TaskServiceError> {
        self.store.find(owner, id).await
    }

    /// Retrieves all tasks owned by `owner`, in ascending ID order.
    #[tracing::instrument(skip(self))]
    pub async fn list_tasks(&self, owner: i32) -> Result<Vec<Task>, TaskServiceError> {
        self.store.find_all(owner).await
    }

    /// Applies a partial update to a task, scoped to `owner`. Only the
    /// supplied fields change; `updated_at` is always refreshed.
    #[tracing::instrument(skip(self))]
    pub async fn update_task(
        &self,
        owner: i32,
        id: i32,
        changes: TaskChanges,
    ) -> Result<Task, TaskServiceError> {
        let change_set = TaskChangeSet {
            title: Some(validate_title(changes.title.as_deref())?),
            description: normalize_description(changes.description),
            due_date: parse_optional_due_date(changes.due_date.as_deref())?,
            status: parse_optional_status(changes.status.as_deref())?,
        };
        self.store.update(owner, id, change_set).await
    }

    /// Deletes a task, scoped to `owner`. Deleting an already-deleted task
    /// fails with `TaskNotFound` rather than silently succeeding.
    #[tracing::instrument(skip(self))]
    pub async fn delete_task(&self, owner: i32, id: i32) -> Result<(), TaskServiceError> {
        self.store.delete(owner, id).await
    }
}

fn validate_title(raw: Option<&str>) -> Result<String, TaskServiceError> {
    let title = raw.map(str::trim).unwrap_or_default();
    if title.is_empty() {
        return Err(TaskServiceError::Validation(
            "Title is required and must not be empty".to_string(),
        ));
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(TaskServiceError::Validation(format!(
            "Title must be {} characters or less",
            MAX_TITLE_CHARS
        )));
    }
    Ok(title.to_string())
}

// HTML forms submit empty strings for fields the user left blank.
fn normalize_description(raw: Option<String>) -> Option<String> {
    raw.filter(|description| !description.trim().is_empty())
}

fn parse_optional_status(raw: Option<&str>) -> Result<Option<TaskStatus>, TaskServiceError> {
    match raw.map(str::trim).filter(|status| !status.is_empty()) {
        Some(status) => Ok(Some(status.parse()?)),
        None => Ok(None),
    }
}

fn parse_optional_due_date(
    raw: Option<&str>,
) -> Result<Option<DateTime<Utc>>, TaskServiceError> {
    match raw.map(str::trim).filter(|due_date| !due_date.is_empty()) {
        Some(due_date) => Ok(Some(parse_due_date(due_date)?)),
        None => Ok(None),
    }
}

/// Accepts RFC 3339 as well as the formats produced by
/// `<input type="datetime-local">`. Timestamps without an offset are
/// interpreted as UTC.
fn parse_due_date(raw: &str) -> Result<DateTime<Utc>, TaskServiceError> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(parsed.and_utc());
        }
    }
    Err(TaskServiceError::Validation(format!(
        "'{}' is not a valid due date",
        raw
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_reject_missing_title() {
        let result = validate_title(None);
        assert!(matches!(result, Err(TaskServiceError::Validation(_))));
    }

    #[test]
    fn can_reject_whitespace_only_title() {
        let result = validate_title(Some("   "));
        assert!(matches!(result, Err(TaskServiceError::Validation(_))));
    }

    #[test]
    fn can_reject_overlong_title() {
        let title = "x".repeat(MAX_TITLE_CHARS + 1);
        let result = validate_title(Some(&title));
        assert!(matches!(result, Err(TaskServiceError::Validation(_))));
    }

    #[test]
    fn can_trim_title() {
        let title = validate_title(Some("  Buy milk  ")).unwrap();
        assert_eq!(title, "Buy milk");
    }

    #[test]
    fn can_parse_all_statuses() {
        assert_eq!("pending".parse::<TaskStatus>().unwrap(), TaskStatus::Pending);
        assert_eq!(
            "in_progress".parse::<TaskStatus>().unwrap(),
            TaskStatus::InProgress
        );
        assert_eq!(
            "completed".parse::<TaskStatus>().unwrap(),
            TaskStatus::Completed
        );
    }

    #[test]
    fn can_reject_unknown_status() {
        let result = "done".parse::<TaskStatus>();
        assert!(matches!(result, Err(TaskServiceError::Validation(_))));
    }

    #[test]
    fn status_defaults_to_pending_when_omitted() {
        let status = parse_optional_status(None).unwrap();
        assert_eq!(status, None);
        assert_eq!(TaskStatus::default(), TaskStatus::Pending);
    }

    #[test]
    fn can_parse_rfc3339_due_date() {
        let parsed = parse_due_date("2026-09-01T12:30:00Z").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2026-09-01T12:30:00+00:00");
    }

    #[test]
    fn can_parse_datetime_local_due_date() {
        let parsed = parse_due_date("2026-09-01T12:30").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2026-09-01T12:30:00+00:00");
    }

    #[test]
    fn can_reject_malformed_due_date() {
        let result = parse_due_date("next tuesday");
        assert!(matches!(result, Err(TaskServiceError::Validation(_))));
    }

    #[test]
    fn empty_form_fields_are_treated_as_absent() {
        assert_eq!(normalize_description(Some("".to_string())), None);
        assert_eq!(parse_optional_due_date(Some("")).unwrap(), None);
        assert_eq!(parse_optional_status(Some("")).unwrap(), None);
    }
}
