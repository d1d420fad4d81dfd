use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use migration::MigratorTrait;
use sea_orm::{Database, DatabaseConnection};
use std::future::Future;
use std::pin::Pin;
use taskboard_server::auth::{CurrentUser, User, UserService};
use testcontainers_modules::testcontainers::runners::AsyncRunner;
use testcontainers_modules::{postgres, testcontainers};

#[allow(dead_code)]
pub const TEST_PASSWORD: &str = "testpassword";

pub async fn setup_container() -> anyhow::Result<testcontainers::ContainerAsync<postgres::Postgres>>
{
    let container = postgres::Postgres::default().start().await?;
    Ok(container)
}

pub async fn setup_db(
    container: &testcontainers::ContainerAsync<postgres::Postgres>,
) -> anyhow::Result<DatabaseConnection> {
    let host = container.get_host().await?;
    let port = container.get_host_port_ipv4(5432).await?;
    let db_url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);
    let db = Database::connect(&db_url).await?;
    migration::Migrator::up(&db, None).await?;
    Ok(db)
}

/// Test helper to register a user account and return it.
#[allow(dead_code)]
pub async fn create_test_user(db: &DatabaseConnection, username: &str) -> User {
    let service = UserService::new(db);
    service
        .register_user(username, &format!("{}@example.com", username), TEST_PASSWORD)
        .await
        .expect("Failed to create test user")
}

/// Middleware factory that injects a fixed CurrentUser extension,
/// standing in for cookie authentication in endpoint tests.
#[allow(dead_code)]
pub fn create_stub_user_middleware(
    current_user: CurrentUser,
) -> impl Fn(Request, Next) -> Pin<Box<dyn Future<Output = Response> + Send>> + Clone {
    move |mut request: Request, next: Next| {
        let current_user = current_user.clone();
        Box::pin(async move {
            request.extensions_mut().insert(current_user);
            next.run(request).await
        })
    }
}

/// Collects a response body into a string for content assertions.
#[allow(dead_code)]
pub async fn response_body_text(response: Response) -> String {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(body.to_vec()).unwrap()
}
