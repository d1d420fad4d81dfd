use std::sync::Arc;

use crate::{
    auth::{self, AuthState},
    task::{self, web::TaskState},
};

use axum::{
    Router,
    middleware::{from_fn, from_fn_with_state},
};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi, ToSchema};

/// JSON error payload shared across the API surface.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Machine-readable error code
    pub error: String,
    /// Human-readable description
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        task::api::list_tasks_handler,
        task::api::create_task_handler,
        task::api::get_task_handler,
        task::api::update_task_handler,
        task::api::delete_task_handler,
    ),
    components(schemas(
        task::api::TaskJson,
        task::api::TaskRequest,
        task::api::TasksResponse,
        task::api::TaskCreatedResponse,
        task::api::MessageResponse,
        ErrorResponse,
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "Tasks", description = "Task management endpoints")
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_token",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// Creates the API routes for JSON API endpoints.
pub fn create_api_router(auth_state: Arc<AuthState>, task_state: Arc<TaskState>) -> axum::Router {
    let login_router = auth::api::create_api_router(auth_state.clone());
    let tasks_router = task::api::create_api_router(task_state);
    let protected_routes =
        tasks_router.layer(ServiceBuilder::new().layer(from_fn(auth::api::require_auth_middleware)));
    let public_routes = login_router;
    let api_routes = public_routes.merge(protected_routes);
    Router::new()
        .nest("/api", api_routes)
        .layer(ServiceBuilder::new().layer(from_fn_with_state(
            auth_state,
            auth::api::auth_user_middleware,
        )))
}
