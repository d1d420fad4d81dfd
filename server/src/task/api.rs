use axum::{
    Router,
    extract::{Extension, Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

use crate::auth::CurrentUser;
use crate::task::web::TaskState;
use crate::task::{NewTask, Task, TaskChanges, TaskService, TaskServiceError};
use crate::web::api::ErrorResponse;

/// JSON representation of a task for API responses.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TaskJson {
    /// Unique identifier for the task
    id: i32,
    /// Short title of the task
    title: String,
    /// Optional free-text description
    description: Option<String>,
    /// Optional due date, ISO-8601
    due_date: Option<DateTime<Utc>>,
    /// Current lifecycle status
    status: String,
    /// Creation time, ISO-8601
    created_at: DateTime<Utc>,
    /// Time of the last mutation, ISO-8601
    updated_at: DateTime<Utc>,
}

impl From<Task> for TaskJson {
    fn from(task: Task) -> Self {
        Self {
            id: task.id(),
            title: task.title().to_string(),
            description: task.description().map(str::to_string),
            due_date: task.due_date(),
            status: task.status().to_string(),
            created_at: task.created_at(),
            updated_at: task.updated_at(),
        }
    }
}

/// Request payload for creating or updating a task. On update, omitted
/// optional fields keep their stored value.
#[derive(Debug, Deserialize, ToSchema)]
pub struct TaskRequest {
    /// Short title of the task; required
    title: Option<String>,
    /// Optional free-text description
    description: Option<String>,
    /// Optional due date, ISO-8601
    due_date: Option<String>,
    /// Optional status: pending, in_progress or completed
    status: Option<String>,
}

impl TaskRequest {
    fn into_new_task(self) -> NewTask {
        NewTask {
            title: self.title,
            description: self.description,
            due_date: self.due_date,
            status: self.status,
        }
    }

    fn into_changes(self) -> TaskChanges {
        TaskChanges {
            title: self.title,
            description: self.description,
            due_date: self.due_date,
            status: self.status,
        }
    }
}

/// API response for listing all tasks of the caller.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TasksResponse {
    /// Tasks owned by the caller, ascending by ID
    tasks: Vec<TaskJson>,
}

/// API response for a successful task creation.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TaskCreatedResponse {
    /// ID assigned to the new task
    id: i32,
    /// Confirmation message
    message: String,
}

/// API response carrying only a confirmation message.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    /// Confirmation message
    message: String,
}

/// Maps service errors onto API status codes and the JSON error shape.
#[derive(Debug)]
pub struct ApiError(TaskServiceError);

impl From<TaskServiceError> for ApiError {
    fn from(err: TaskServiceError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            TaskServiceError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            TaskServiceError::TaskNotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            TaskServiceError::Database(err) => {
                tracing::error!("Database error while handling task request: {}", err);
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse::new("INTERNAL_ERROR", "Internal server error")),
                )
                    .into_response();
            }
        };
        (status, Json(ErrorResponse::new(code, &self.0.to_string()))).into_response()
    }
}

// Malformed JSON bodies surface through the same error shape as
// validation failures instead of axum's plain-text rejection.
fn extract_payload(payload: Result<Json<TaskRequest>, JsonRejection>) -> Result<TaskRequest, ApiError> {
    match payload {
        Ok(Json(payload)) => Ok(payload),
        Err(rejection) => Err(ApiError(TaskServiceError::Validation(format!(
            "Invalid request body: {}",
            rejection.body_text()
        )))),
    }
}

/// Handler for GET /api/tasks/ - Returns all tasks of the caller.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    get,
    path = "/api/tasks/",
    responses(
        (status = 200, description = "Successfully retrieved tasks", body = TasksResponse),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    security(("bearer_token" = [])),
    tag = "Tasks"
)]
pub async fn list_tasks_handler(
    State(state): State<Arc<TaskState>>,
    Extension(current_user): Extension<CurrentUser>,
) -> Result<Json<TasksResponse>, ApiError> {
    let service = TaskService::new(&state.db);
    let tasks = service.list_tasks(current_user.id).await?;
    Ok(Json(TasksResponse {
        tasks: tasks.into_iter().map(TaskJson::from).collect(),
    }))
}

/// Handler for POST /api/tasks/ - Creates a new task owned by the caller.
#[tracing::instrument(skip(state, payload))]
#[utoipa::path(
    post,
    path = "/api/tasks/",
    request_body = TaskRequest,
    responses(
        (status = 201, description = "Task created", body = TaskCreatedResponse),
        (status = 400, description = "Invalid input", body = ErrorResponse),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    security(("bearer_token" = [])),
    tag = "Tasks"
)]
pub async fn create_task_handler(
    State(state): State<Arc<TaskState>>,
    Extension(current_user): Extension<CurrentUser>,
    payload: Result<Json<TaskRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<TaskCreatedResponse>), ApiError> {
    let payload = extract_payload(payload)?;
    let service = TaskService::new(&state.db);
    let task = service
        .create_task(current_user.id, payload.into_new_task())
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(TaskCreatedResponse {
            id: task.id(),
            message: "Task created".to_string(),
        }),
    ))
}

/// Handler for GET /api/tasks/{id}/ - Returns a single task of the caller.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    get,
    path = "/api/tasks/{id}/",
    params(
        ("id" = i32, Path, description = "ID of the task")
    ),
    responses(
        (status = 200, description = "Successfully retrieved task", body = TaskJson),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
        (status = 404, description = "No such task for this user", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    security(("bearer_token" = [])),
    tag = "Tasks"
)]
pub async fn get_task_handler(
    State(state): State<Arc<TaskState>>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<i32>,
) -> Result<Json<TaskJson>, ApiError> {
    let service = TaskService::new(&state.db);
    let task = service.get_task(current_user.id, id).await?;
    Ok(Json(TaskJson::from(task)))
}

/// Handler for PUT /api/tasks/{id}/ - Updates a task of the caller.
#[tracing::instrument(skip(state, payload))]
#[utoipa::path(
    put,
    path = "/api/tasks/{id}/",
    params(
        ("id" = i32, Path, description = "ID of the task")
    ),
    request_body = TaskRequest,
    responses(
        (status = 200, description = "Task updated", body = MessageResponse),
        (status = 400, description = "Invalid input", body = ErrorResponse),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
        (status = 404, description = "No such task for this user", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    security(("bearer_token" = [])),
    tag = "Tasks"
)]
pub async fn update_task_handler(
    State(state): State<Arc<TaskState>>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<i32>,
    payload: Result<Json<TaskRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let payload = extract_payload(payload)?;
    let service = TaskService::new(&state.db);
    service
        .update_task(current_user.id, id, payload.into_changes())
        .await?;
    Ok(Json(MessageResponse {
        message: "Task updated".to_string(),
    }))
}

/// Handler for DELETE /api/tasks/{id}/ - Deletes a task of the caller.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    delete,
    path = "/api/tasks/{id}/",
    params(
        ("id" = i32, Path, description = "ID of the task")
    ),
    responses(
        (status = 200, description = "Task deleted", body = MessageResponse),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
        (status = 404, description = "No such task for this user", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    security(("bearer_token" = [])),
    tag = "Tasks"
)]
pub async fn delete_task_handler(
    State(state): State<Arc<TaskState>>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<i32>,
) -> Result<Json<MessageResponse>, ApiError> {
    let service = TaskService::new(&state.db);
    service.delete_task(current_user.id, id).await?;
    Ok(Json(MessageResponse {
        message: "Task deleted".to_string(),
    }))
}

/// Creates and returns the tasks API router.
pub fn create_api_router(state: Arc<TaskState>) -> Router {
    Router::new()
        .route(
            "/tasks/",
            get(list_tasks_handler).post(create_task_handler),
        )
        .route(
            "/tasks/{id}/",
            get(get_task_handler)
                .put(update_task_handler)
                .delete(delete_task_handler),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn can_map_validation_error_to_bad_request() {
        let error = ApiError(TaskServiceError::Validation("Title is required".to_string()));
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let parsed: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.error, "VALIDATION_ERROR");
        assert_eq!(parsed.message, "Title is required");
    }

    #[tokio::test]
    async fn can_map_not_found_error_to_not_found() {
        let error = ApiError(TaskServiceError::TaskNotFound(7));
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let parsed: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.error, "NOT_FOUND");
        assert_eq!(parsed.message, "Task with ID 7 not found");
    }
}
