use chrono::{DateTime, Utc};
use sea_orm::*;

use crate::entities::task;
use crate::task::{Task, TaskServiceError, TaskStatus};

/// Validated input for inserting a task row.
#[derive(Debug)]
pub struct NewTaskRecord {
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub status: TaskStatus,
}

/// Validated partial update. `None` fields keep their stored value.
#[derive(Debug, Default)]
pub struct TaskChangeSet {
    pub title: Option<String>,
    pub description: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub status: Option<TaskStatus>,
}

/// Executes task CRUD statements against the `tasks` table. Every query
/// is scoped by the owning user; a row belonging to another user is
/// indistinguishable from a missing one.
pub struct TaskStore<'a> {
    db: &'a sea_orm::DatabaseConnection,
}

impl TaskStore<'_> {
    pub fn new(db: &sea_orm::DatabaseConnection) -> TaskStore {
        TaskStore { db }
    }

    /// Inserts a new task row with a server-assigned ID. Both timestamps
    /// are set to the same instant.
    #[tracing::instrument(skip(self))]
    pub async fn insert(&self, owner: i32, record: NewTaskRecord) -> Result<Task, TaskServiceError> {
        let now = Utc::now();
        let active_model = task::ActiveModel {
            user_id: ActiveValue::Set(owner),
            title: ActiveValue::Set(record.title),
            description: ActiveValue::Set(record.description),
            due_date: ActiveValue::Set(record.due_date),
            status: ActiveValue::Set(record.status.to_string()),
            created_at: ActiveValue::Set(now),
            updated_at: ActiveValue::Set(now),
            ..Default::default()
        };
        let created_model = active_model.insert(self.db).await?;
        Ok(Task::from(created_model))
    }

    /// Retrieves the task with the given ID owned by `owner`.
    #[tracing::instrument(skip(self))]
    pub async fn find(&self, owner: i32, id: i32) -> Result<Task, TaskServiceError> {
        let model = self.find_model(owner, id).await?;
        Ok(Task::from(model))
    }

    /// Retrieves all tasks owned by `owner`, ascending by ID.
    #[tracing::instrument(skip(self))]
    pub async fn find_all(&self, owner: i32) -> Result<Vec<Task>, TaskServiceError> {
        let tasks = task::Entity::find()
            .filter(task::Column::UserId.eq(owner))
            .order_by_asc(task::Column::Id)
            .all(self.db)
            .await?
            .into_iter()
            .map(Task::from)
            .collect();
        Ok(tasks)
    }

    /// Applies the supplied changes to the task with the given ID owned by
    /// `owner` and refreshes `updated_at`.
    #[tracing::instrument(skip(self))]
    pub async fn update(
        &self,
        owner: i32,
        id: i32,
        changes: TaskChangeSet,
    ) -> Result<Task, TaskServiceError> {
        let model = self.find_model(owner, id).await?;

        let mut active_model: task::ActiveModel = model.into();
        if let Some(title) = changes.title {
            active_model.title = ActiveValue::Set(title);
        }
        if let Some(description) = changes.description {
            active_model.description = ActiveValue::Set(Some(description));
        }
        if let Some(due_date) = changes.due_date {
            active_model.due_date = ActiveValue::Set(Some(due_date));
        }
        if let Some(status) = changes.status {
            active_model.status = ActiveValue::Set(status.to_string());
        }
        active_model.updated_at = ActiveValue::Set(Utc::now());
        let updated_model = active_model.update(self.db).await?;

        Ok(Task::from(updated_model))
    }

    /// Deletes the task with the given ID owned by `owner`. Reports
    /// `TaskNotFound` when no row was removed, so a repeated delete fails
    /// rather than succeeding silently.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, owner: i32, id: i32) -> Result<(), TaskServiceError> {
        let result = task::Entity::delete_many()
            .filter(task::Column::Id.eq(id))
            .filter(task::Column::UserId.eq(owner))
            .exec(self.db)
            .await?;
        if result.rows_affected == 0 {
            return Err(TaskServiceError::TaskNotFound(id));
        }
        Ok(())
    }

    async fn find_model(&self, owner: i32, id: i32) -> Result<task::Model, TaskServiceError> {
        task::Entity::find()
            .filter(task::Column::Id.eq(id))
            .filter(task::Column::UserId.eq(owner))
            .one(self.db)
            .await?
            .ok_or(TaskServiceError::TaskNotFound(id))
    }
}
