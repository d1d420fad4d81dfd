use askama::Template;
use axum::{
    Form, Router,
    extract::{Extension, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::Html,
    routing::get,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::auth::CurrentUser;
use crate::task::{NewTask, Task, TaskChanges, TaskService, TaskServiceError};

#[derive(Debug, Deserialize)]
pub struct CreateTaskForm {
    title: Option<String>,
    description: Option<String>,
    due_date: Option<String>,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EditTaskForm {
    title: Option<String>,
    description: Option<String>,
    due_date: Option<String>,
    status: Option<String>,
}

#[derive(Clone, Debug)]
pub struct TaskState {
    pub db: Arc<sea_orm::DatabaseConnection>,
}

/// Helper function to get the caller's tasks and render them as a table
/// fragment. This reduces code duplication across handlers that need to
/// display the refreshed task list.
#[tracing::instrument(skip(task_service))]
async fn render_tasks_table(
    task_service: &TaskService<'_>,
    owner: i32,
) -> Result<String, TaskWebError> {
    let tasks = task_service.list_tasks(owner).await?;
    let table_template = TasksTableTemplate::new(tasks);
    table_template.render().map_err(TaskWebError::from)
}

/// Custom error type for task handler operations.
#[derive(Debug, thiserror::Error)]
enum TaskWebError {
    /// Represents an error during template rendering.
    #[error("Template rendering failed")]
    Template(#[from] askama::Error),
    /// Represents a task service error.
    #[error("Task service error")]
    Service(#[from] TaskServiceError),
}

impl axum::response::IntoResponse for TaskWebError {
    fn into_response(self) -> axum::response::Response {
        let (status_code, user_facing_error_message) = match &self {
            TaskWebError::Service(TaskServiceError::Validation(message)) => {
                (StatusCode::UNPROCESSABLE_ENTITY, message.clone())
            }
            TaskWebError::Service(TaskServiceError::TaskNotFound(_)) => (
                StatusCode::NOT_FOUND,
                "This task does not exist.".to_string(),
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "An unexpected error occurred while processing your request. Please try again later."
                    .to_string(),
            ),
        };

        let error_template = ErrorMessageTemplate::new(user_facing_error_message);
        let Ok(rendered) = error_template.render() else {
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        };

        let mut response = (status_code, Html(rendered)).into_response();
        // Retarget the rendered message to the error div on the tasks page
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("hx-retarget"),
            HeaderValue::from_static("#task-error"),
        );
        headers.insert(
            HeaderName::from_static("hx-reswap"),
            HeaderValue::from_static("innerHTML"),
        );
        response.headers_mut().extend(headers);
        response
    }
}

#[derive(Template)]
#[template(path = "tasks.html")]
struct TasksTemplate {
    username: String,
}

impl TasksTemplate {
    pub fn new(username: String) -> Self {
        Self { username }
    }
}

#[derive(Template)]
#[template(path = "tasks/add_task_form.html")]
struct AddTaskFormTemplate;

#[derive(Template)]
#[template(path = "tasks/tasks_table.html")]
struct TasksTableTemplate {
    tasks: Vec<Task>,
}

impl TasksTableTemplate {
    pub fn new(tasks: Vec<Task>) -> Self {
        Self { tasks }
    }
}

#[derive(Template)]
#[template(path = "tasks/error_message.html")]
struct ErrorMessageTemplate {
    message: String,
}

impl ErrorMessageTemplate {
    pub fn new(message: String) -> Self {
        Self { message }
    }
}

#[derive(Template)]
#[template(path = "tasks/edit_task_form.html")]
struct EditTaskFormTemplate {
    task: Task,
}

impl EditTaskFormTemplate {
    pub fn new(task: Task) -> Self {
        Self { task }
    }
}

#[derive(Template)]
#[template(path = "tasks/task_row.html")]
struct TaskRowTemplate {
    task: Task,
}

impl TaskRowTemplate {
    pub fn new(task: Task) -> Self {
        Self { task }
    }
}

/// Handler for the /tasks endpoint that displays the tasks page.
#[tracing::instrument]
async fn tasks_handler(
    Extension(current_user): Extension<CurrentUser>,
) -> Result<Html<String>, TaskWebError> {
    let template = TasksTemplate::new(current_user.username);
    template.render().map(Html).map_err(TaskWebError::from)
}

/// Handler for creating a new task via POST request.
#[tracing::instrument(skip(state))]
async fn create_task_handler(
    State(state): State<Arc<TaskState>>,
    Extension(current_user): Extension<CurrentUser>,
    Form(form): Form<CreateTaskForm>,
) -> Result<Html<String>, TaskWebError> {
    let task_service = TaskService::new(&state.db);

    let input = NewTask {
        title: form.title,
        description: form.description,
        due_date: form.due_date,
        status: form.status,
    };
    task_service.create_task(current_user.id, input).await?;

    // Get updated tasks for the table and render
    let table_html = render_tasks_table(&task_service, current_user.id).await?;
    Ok(Html(table_html))
}

/// Handler for serving the add task form.
#[tracing::instrument]
async fn add_task_form_handler() -> Result<Html<String>, TaskWebError> {
    let template = AddTaskFormTemplate;
    template.render().map(Html).map_err(TaskWebError::from)
}

/// Handler for deleting a task via DELETE request.
#[tracing::instrument(skip(state))]
async fn delete_task_handler(
    State(state): State<Arc<TaskState>>,
    Extension(current_user): Extension<CurrentUser>,
    axum::extract::Path(id): axum::extract::Path<i32>,
) -> Result<Html<String>, TaskWebError> {
    let task_service = TaskService::new(&state.db);

    task_service.delete_task(current_user.id, id).await?;

    // Get updated tasks for the table and render
    let table_html = render_tasks_table(&task_service, current_user.id).await?;
    Ok(Html(table_html))
}

/// Handler for serving the edit task form.
#[tracing::instrument(skip(state))]
async fn edit_task_handler(
    State(state): State<Arc<TaskState>>,
    Extension(current_user): Extension<CurrentUser>,
    axum::extract::Path(id): axum::extract::Path<i32>,
) -> Result<Html<String>, TaskWebError> {
    let task_service = TaskService::new(&state.db);

    let task = task_service.get_task(current_user.id, id).await?;
    let template = EditTaskFormTemplate::new(task);
    template.render().map(Html).map_err(TaskWebError::from)
}

/// Handler for updating a task via PUT request.
#[tracing::instrument(skip(state))]
async fn update_task_handler(
    State(state): State<Arc<TaskState>>,
    Extension(current_user): Extension<CurrentUser>,
    axum::extract::Path(id): axum::extract::Path<i32>,
    Form(form): Form<EditTaskForm>,
) -> Result<Html<String>, TaskWebError> {
    let task_service = TaskService::new(&state.db);

    let changes = TaskChanges {
        title: form.title,
        description: form.description,
        due_date: form.due_date,
        status: form.status,
    };
    let updated_task = task_service
        .update_task(current_user.id, id, changes)
        .await?;

    // Render only the updated task row
    let row_template = TaskRowTemplate::new(updated_task);
    let row_html = row_template.render().map_err(TaskWebError::from)?;

    Ok(Html(row_html))
}

/// Handler for GET /tasks/{id} that returns a single task row.
#[tracing::instrument(skip(state))]
async fn get_task_row_handler(
    State(state): State<Arc<TaskState>>,
    Extension(current_user): Extension<CurrentUser>,
    axum::extract::Path(id): axum::extract::Path<i32>,
) -> Result<Html<String>, TaskWebError> {
    let task_service = TaskService::new(&state.db);

    let task = task_service.get_task(current_user.id, id).await?;
    let template = TaskRowTemplate::new(task);
    template.render().map(Html).map_err(TaskWebError::from)
}

/// Handler for GET /tasks/table that returns just the tasks table fragment.
#[tracing::instrument(skip(state))]
async fn tasks_table_handler(
    State(state): State<Arc<TaskState>>,
    Extension(current_user): Extension<CurrentUser>,
) -> Result<Html<String>, TaskWebError> {
    let task_service = TaskService::new(&state.db);
    let table_html = render_tasks_table(&task_service, current_user.id).await?;
    Ok(Html(table_html))
}

/// Creates and returns the task router with all task-related routes.
pub fn create_task_router(state: Arc<TaskState>) -> Router {
    Router::new()
        .route("/tasks", get(tasks_handler).post(create_task_handler))
        .route("/tasks/add", get(add_task_form_handler))
        .route("/tasks/table", get(tasks_table_handler))
        .route(
            "/tasks/{id}",
            get(get_task_row_handler)
                .put(update_task_handler)
                .delete(delete_task_handler),
        )
        .route("/tasks/{id}/edit", get(edit_task_handler))
        .with_state(state)
}
