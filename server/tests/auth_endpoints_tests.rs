use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::middleware::from_fn_with_state;
use sea_orm::DatabaseConnection;
use serde_json::json;
use std::sync::Arc;
use taskboard_server::auth::{
    AuthState, UserService, UserServiceError, auth_user_middleware, create_auth_router, decode_jwt,
};
use testcontainers_modules::{postgres, testcontainers};
use tower::ServiceExt;

mod common;

const JWT_SECRET: &str = "test_secret";

pub struct TestContext {
    #[allow(dead_code)] // container is kept to ensure it's not dropped
    pub container: testcontainers::ContainerAsync<postgres::Postgres>,
    pub db: DatabaseConnection,
}

async fn setup() -> anyhow::Result<TestContext> {
    // Allow multiple calls to init for tests.
    let _ = tracing_subscriber::fmt().try_init();
    let container = common::setup_container().await?;
    let db = common::setup_db(&container).await?;
    Ok(TestContext { db, container })
}

fn auth_state(db: &DatabaseConnection) -> Arc<AuthState> {
    Arc::new(AuthState {
        db: Arc::new(db.clone()),
        jwt_secret: JWT_SECRET.to_string(),
    })
}

/// Test helper to create the auth app with cookie middleware applied.
fn build_app(state: Arc<AuthState>) -> axum::Router {
    create_auth_router(state.clone()).layer(from_fn_with_state(state, auth_user_middleware))
}

fn form_request(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Extracts the auth token value from a `set-cookie` header.
fn auth_token_from_cookie(response: &axum::response::Response) -> Option<String> {
    let set_cookie = response.headers().get("set-cookie")?.to_str().ok()?;
    set_cookie
        .split(';')
        .next()?
        .strip_prefix("auth_token=")
        .map(str::to_string)
}

#[tokio::test]
async fn can_register_new_user() {
    let state = setup().await.expect("Failed to setup test context");
    let auth_state = auth_state(&state.db);
    let app = build_app(auth_state);

    let response = app
        .oneshot(form_request(
            "/register",
            "username=alice&email=alice%40example.com&password=testpassword&confirm_password=testpassword",
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let token = auth_token_from_cookie(&response).expect("Registration should set auth cookie");
    let claims = decode_jwt(&token, JWT_SECRET).await.unwrap();
    assert_eq!(claims.username, "alice");

    let body = common::response_body_text(response).await;
    assert!(body.contains("Welcome"));

    // The account is usable right away
    let service = UserService::new(&state.db);
    let user = service
        .authenticate("alice", "testpassword")
        .await
        .expect("Registered user should authenticate");
    assert_eq!(user.username(), "alice");
}

#[tokio::test]
async fn can_reject_mismatched_passwords() {
    let state = setup().await.expect("Failed to setup test context");
    let app = build_app(auth_state(&state.db));

    let response = app
        .oneshot(form_request(
            "/register",
            "username=alice&email=alice%40example.com&password=testpassword&confirm_password=different",
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = common::response_body_text(response).await;
    assert!(body.contains("Passwords do not match."));

    // Nothing was persisted
    let service = UserService::new(&state.db);
    let result = service.authenticate("alice", "testpassword").await;
    assert!(matches!(result, Err(UserServiceError::InvalidCredentials)));
}

#[tokio::test]
async fn can_reject_short_password() {
    let state = setup().await.expect("Failed to setup test context");
    let app = build_app(auth_state(&state.db));

    let response = app
        .oneshot(form_request(
            "/register",
            "username=alice&email=alice%40example.com&password=pass&confirm_password=pass",
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = common::response_body_text(response).await;
    assert!(body.contains("at least 8 characters"));
}

#[tokio::test]
async fn can_reject_duplicate_username() {
    let state = setup().await.expect("Failed to setup test context");
    common::create_test_user(&state.db, "alice").await;
    let app = build_app(auth_state(&state.db));

    let response = app
        .oneshot(form_request(
            "/register",
            "username=alice&email=alice%40example.com&password=testpassword&confirm_password=testpassword",
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = common::response_body_text(response).await;
    assert!(body.contains("already taken"));
}

#[tokio::test]
async fn can_login_with_valid_credentials() {
    let state = setup().await.expect("Failed to setup test context");
    let user = common::create_test_user(&state.db, "alice").await;
    let app = build_app(auth_state(&state.db));

    let response = app
        .oneshot(form_request(
            "/login",
            &format!("username=alice&password={}", common::TEST_PASSWORD),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let token = auth_token_from_cookie(&response).expect("Login should set auth cookie");
    let claims = decode_jwt(&token, JWT_SECRET).await.unwrap();
    assert_eq!(claims.sub, user.id());
    assert_eq!(claims.username, "alice");

    let body = common::response_body_text(response).await;
    assert!(body.contains("Welcome back"));
}

#[tokio::test]
async fn can_reject_invalid_credentials() {
    let state = setup().await.expect("Failed to setup test context");
    common::create_test_user(&state.db, "alice").await;
    let app = build_app(auth_state(&state.db));

    let response = app
        .oneshot(form_request("/login", "username=alice&password=wrongpass"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(auth_token_from_cookie(&response).is_none());
    let body = common::response_body_text(response).await;
    assert!(body.contains("Invalid username or password."));
}

#[tokio::test]
async fn can_display_login_and_register_pages() {
    let state = setup().await.expect("Failed to setup test context");
    let app = build_app(auth_state(&state.db));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/login")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = common::response_body_text(response).await;
    assert!(body.contains("User Login"));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/register")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = common::response_body_text(response).await;
    assert!(body.contains("User Registration"));
}

#[tokio::test]
async fn can_logout_and_clear_cookie() {
    let state = setup().await.expect("Failed to setup test context");
    let app = build_app(auth_state(&state.db));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/logout")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(response.headers().get("location").unwrap(), "/");
    let set_cookie = response
        .headers()
        .get("set-cookie")
        .expect("Logout should clear the auth cookie")
        .to_str()
        .unwrap();
    assert!(set_cookie.starts_with("auth_token="));
}

#[tokio::test]
async fn can_login_via_json_api() {
    let state = setup().await.expect("Failed to setup test context");
    common::create_test_user(&state.db, "alice").await;
    let app = taskboard_server::auth::api::create_api_router(auth_state(&state.db));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/login")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({"username": "alice", "password": common::TEST_PASSWORD}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = common::response_body_text(response).await;
    let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
    let token = parsed["token"].as_str().expect("token should be a string");
    let claims = decode_jwt(token, JWT_SECRET).await.unwrap();
    assert_eq!(claims.username, "alice");

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/login")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({"username": "alice", "password": "wrongpass"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
