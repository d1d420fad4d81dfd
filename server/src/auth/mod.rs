use askama::Template;
use axum::Router;
use axum::extract::{Extension, Form, Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum_extra::extract::CookieJar;
use bcrypt::{DEFAULT_COST, hash, verify};
use jsonwebtoken::encode;
use sea_orm::*;
use std::sync::Arc;

use crate::config::Config;
use crate::entities::user;

pub mod api;

const MIN_PASSWORD_CHARS: usize = 8;

/// Represents the currently authenticated user.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: i32,
    pub username: String,
}

impl CurrentUser {
    /// Creates a new CurrentUser instance.
    pub fn new(id: i32, username: String) -> Self {
        Self { id, username }
    }
}

/// Authentication state shared by the login/register handlers and the
/// middlewares: the user store connection and the JWT secret.
#[derive(Clone)]
pub struct AuthState {
    pub db: Arc<sea_orm::DatabaseConnection>,
    pub jwt_secret: String,
}

impl AuthState {
    /// Creates a new AuthState from the application config.
    pub fn new(db: Arc<sea_orm::DatabaseConnection>, config: &Config) -> Self {
        Self {
            db,
            jwt_secret: config.jwt_secret.clone(),
        }
    }
}

/// A registered account, as exposed to the rest of the application. The
/// task domain references it only by ID.
#[derive(Debug, PartialEq, Clone)]
pub struct User {
    id: i32,
    username: String,
}

impl User {
    /// Returns the ID of the user.
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Returns the username of the user.
    pub fn username(&self) -> &str {
        &self.username
    }
}

impl From<user::Model> for User {
    fn from(model: user::Model) -> Self {
        User {
            id: model.id,
            username: model.username,
        }
    }
}

/// Error type for user account operations.
#[derive(Debug, thiserror::Error)]
pub enum UserServiceError {
    /// Represents malformed or missing registration input.
    #[error("{0}")]
    Validation(String),
    /// Represents a registration attempt with a username that exists.
    #[error("Username '{0}' is already taken")]
    UsernameTaken(String),
    /// Represents a failed credential check. Unknown usernames and wrong
    /// passwords are reported identically.
    #[error("Invalid username or password")]
    InvalidCredentials,
    /// Represents a password hashing error.
    #[error("Password hashing failed")]
    PasswordHash(#[from] bcrypt::BcryptError),
    /// Represents a database error.
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),
}

/// Registration and credential verification against the `users` table.
pub struct UserService<'a> {
    db: &'a sea_orm::DatabaseConnection,
}

impl UserService<'_> {
    pub fn new(db: &sea_orm::DatabaseConnection) -> UserService {
        UserService { db }
    }

    /// Creates a new user account with a bcrypt-hashed password.
    ///
    /// # Returns
    ///
    /// A `Result` containing the created `User` if successful, or an error
    /// otherwise.
    #[tracing::instrument(skip(self, password))]
    pub async fn register_user(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<User, UserServiceError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(UserServiceError::Validation(
                "Username must not be empty".to_string(),
            ));
        }
        if password.chars().count() < MIN_PASSWORD_CHARS {
            return Err(UserServiceError::Validation(format!(
                "Password must be at least {} characters long",
                MIN_PASSWORD_CHARS
            )));
        }

        let existing_user = user::Entity::find()
            .filter(user::Column::Username.eq(username))
            .one(self.db)
            .await?;
        if existing_user.is_some() {
            return Err(UserServiceError::UsernameTaken(username.to_string()));
        }

        let password_hash = hash(password, DEFAULT_COST)?;
        let active_model = user::ActiveModel {
            username: ActiveValue::Set(username.to_string()),
            email: ActiveValue::Set(email.trim().to_string()),
            password_hash: ActiveValue::Set(password_hash),
            created_at: ActiveValue::Set(chrono::Utc::now()),
            ..Default::default()
        };
        let created_model = active_model.insert(self.db).await?;
        tracing::info!("User {} registered successfully", created_model.username);
        Ok(User::from(created_model))
    }

    /// Verifies a username/password pair against the stored hash.
    #[tracing::instrument(skip(self, password))]
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<User, UserServiceError> {
        let Some(model) = user::Entity::find()
            .filter(user::Column::Username.eq(username.trim()))
            .one(self.db)
            .await?
        else {
            return Err(UserServiceError::InvalidCredentials);
        };

        if !verify(password, &model.password_hash)? {
            return Err(UserServiceError::InvalidCredentials);
        }

        Ok(User::from(model))
    }
}

/// Creates a router with the login, registration and logout routes.
pub fn create_auth_router(state: Arc<AuthState>) -> Router<()> {
    Router::new()
        .route(
            "/login",
            axum::routing::get(login_page_handler).post(login_handler),
        )
        .route(
            "/register",
            axum::routing::get(register_page_handler).post(register_handler),
        )
        .route("/logout", axum::routing::get(logout_handler))
        .with_state(state)
}

/// Authentication middleware that checks for a valid JWT cookie and sets
/// the CurrentUser extension. This middleware only populates the
/// extension and does not perform redirects.
pub async fn auth_user_middleware(
    State(state): State<Arc<AuthState>>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some(token_cookie) = jar.get("auth_token") {
        if let Ok(claims) = decode_jwt(token_cookie.value(), &state.jwt_secret).await {
            let current_user = CurrentUser::new(claims.sub, claims.username);
            request.extensions_mut().insert(current_user);
        }
    }

    next.run(request).await
}

/// Login redirect middleware that redirects unauthenticated users to the
/// login page. This middleware should be applied after
/// auth_user_middleware to check for the CurrentUser extension.
pub async fn login_redirect_middleware(request: Request, next: Next) -> Response {
    let is_authenticated = request.extensions().get::<CurrentUser>().is_some();

    if !is_authenticated {
        return Redirect::to("/login").into_response();
    }

    next.run(request).await
}

/// Represents the login request payload.
#[derive(serde::Deserialize, Debug)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Represents the registration request payload.
#[derive(serde::Deserialize, Debug)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

#[derive(serde::Serialize, serde::Deserialize, Debug)]
pub struct Claims {
    pub exp: usize,       // Expiry time of the token
    pub iat: usize,       // Issued at time of the token
    pub sub: i32,         // ID of the authenticated user
    pub username: String, // Username of the authenticated user
}

/// Custom error type for authentication operations.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Represents an error during template rendering.
    /// The specific `askama::Error` is captured as the source of this error.
    #[error("Template rendering failed")]
    Template(#[from] askama::Error),
    /// Represents an error during JWT operations.
    #[error("JWT operation failed")]
    JwtError,
    /// Represents an unexpected user service failure. Expected failures
    /// (bad credentials, taken usernames) are handled in the handlers.
    #[error("User service error")]
    Service(#[from] UserServiceError),
}

impl axum::response::IntoResponse for AuthError {
    fn into_response(self) -> axum::response::Response {
        let user_facing_error_message =
            "An unexpected error occurred while processing your request. Please try again later.";
        (
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            Html(format!(
                "<h1>Internal Server Error</h1><p>{}</p>",
                user_facing_error_message
            )),
        )
            .into_response()
    }
}

/// Handles the login request.
/// Checks submitted credentials against the user store.
/// If a user is already logged in, returns a success message.
pub async fn login_handler(
    State(state): State<Arc<AuthState>>,
    jar: CookieJar,
    current_user: Option<Extension<CurrentUser>>,
    Form(payload): Form<LoginRequest>,
) -> Result<(CookieJar, Response), AuthError> {
    if let Some(Extension(user)) = current_user {
        return handle_already_logged_in_user(jar, &user).await;
    }

    handle_login_attempt(state, jar, payload).await
}

/// Handles the case when a user is already logged in.
/// Returns a success response with the current user's information.
#[tracing::instrument(skip(jar))]
async fn handle_already_logged_in_user(
    jar: CookieJar,
    user: &CurrentUser,
) -> Result<(CookieJar, Response), AuthError> {
    let html = LoginSuccessTemplate {
        name: &user.username,
    }
    .render()
    .map_err(AuthError::from)?;

    Ok((jar, Html(html).into_response()))
}

/// Handles a login attempt when the user is not logged in.
/// Verifies credentials and either returns success with a JWT cookie or
/// an error response.
#[tracing::instrument(skip(state, jar, payload))]
async fn handle_login_attempt(
    state: Arc<AuthState>,
    jar: CookieJar,
    payload: LoginRequest,
) -> Result<(CookieJar, Response), AuthError> {
    let service = UserService::new(&state.db);
    match service
        .authenticate(&payload.username, &payload.password)
        .await
    {
        Ok(user) => {
            let jwt_token = encode_jwt(&user, &state.jwt_secret)
                .await
                .map_err(|_| AuthError::JwtError)?;

            let updated_jar = jar.add(build_auth_cookie(jwt_token));

            let html = LoginSuccessTemplate {
                name: user.username(),
            }
            .render()
            .map_err(AuthError::from)?;

            Ok((updated_jar, Html(html).into_response()))
        }
        Err(UserServiceError::InvalidCredentials) => {
            tracing::warn!("Failed login attempt for username: {}", payload.username);
            let error_message = LoginErrorMessageTemplate
                .render()
                .map_err(AuthError::from)?;

            let mut response = Html(error_message).into_response();
            response.headers_mut().extend(retarget_headers("#login-message"));
            Ok((jar, response))
        }
        Err(err) => Err(AuthError::Service(err)),
    }
}

/// Handles the registration request. A successful registration logs the
/// new user in right away.
pub async fn register_handler(
    State(state): State<Arc<AuthState>>,
    jar: CookieJar,
    current_user: Option<Extension<CurrentUser>>,
    Form(payload): Form<RegisterRequest>,
) -> Result<(CookieJar, Response), AuthError> {
    if current_user.is_some() {
        return Ok((jar, Redirect::to("/").into_response()));
    }

    if payload.password != payload.confirm_password {
        return register_error(jar, "Passwords do not match.".to_string());
    }

    let service = UserService::new(&state.db);
    match service
        .register_user(&payload.username, &payload.email, &payload.password)
        .await
    {
        Ok(user) => {
            let jwt_token = encode_jwt(&user, &state.jwt_secret)
                .await
                .map_err(|_| AuthError::JwtError)?;

            let updated_jar = jar.add(build_auth_cookie(jwt_token));

            let html = RegisterSuccessTemplate {
                name: user.username(),
            }
            .render()
            .map_err(AuthError::from)?;

            Ok((updated_jar, Html(html).into_response()))
        }
        Err(UserServiceError::UsernameTaken(username)) => register_error(
            jar,
            format!("The username '{}' is already taken.", username),
        ),
        Err(UserServiceError::Validation(message)) => register_error(jar, message),
        Err(err) => Err(AuthError::Service(err)),
    }
}

fn register_error(jar: CookieJar, message: String) -> Result<(CookieJar, Response), AuthError> {
    let error_message = RegisterErrorMessageTemplate { message }
        .render()
        .map_err(AuthError::from)?;

    let mut response = Html(error_message).into_response();
    response
        .headers_mut()
        .extend(retarget_headers("#register-message"));
    Ok((jar, response))
}

/// Handles logout by clearing the auth cookie.
#[tracing::instrument(skip(jar))]
pub async fn logout_handler(jar: CookieJar) -> (CookieJar, Redirect) {
    let cookie = axum_extra::extract::cookie::Cookie::build(("auth_token", ""))
        .path("/")
        .build();
    (jar.remove(cookie), Redirect::to("/"))
}

fn build_auth_cookie(jwt_token: String) -> axum_extra::extract::cookie::Cookie<'static> {
    axum_extra::extract::cookie::Cookie::build(("auth_token", jwt_token))
        .http_only(true)
        .secure(false) // Set to true in production with HTTPS
        .same_site(axum_extra::extract::cookie::SameSite::Lax)
        .max_age(time::Duration::hours(24))
        .path("/")
        .build()
}

// htmx headers that swap the rendered fragment into the given element.
fn retarget_headers(target: &'static str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        HeaderName::from_static("hx-retarget"),
        HeaderValue::from_static(target),
    );
    headers.insert(
        HeaderName::from_static("hx-reswap"),
        HeaderValue::from_static("outerHTML"),
    );
    headers
}

pub async fn encode_jwt(user: &User, jwt_secret: &str) -> anyhow::Result<String> {
    let now = chrono::Utc::now();
    let expire = chrono::Duration::hours(24);
    let exp = (now + expire).timestamp() as usize;
    let iat = now.timestamp() as usize;
    let claims = Claims {
        exp,
        iat,
        sub: user.id(),
        username: user.username().to_string(),
    };
    let jwt = encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(jwt_secret.as_bytes()),
    )?;
    Ok(jwt)
}

pub async fn decode_jwt(token: &str, jwt_secret: &str) -> anyhow::Result<Claims> {
    let token_data = jsonwebtoken::decode(
        token,
        &jsonwebtoken::DecodingKey::from_secret(jwt_secret.as_bytes()),
        &jsonwebtoken::Validation::default(),
    )?;
    Ok(token_data.claims)
}

#[derive(Template)]
#[template(path = "login/login_success.html")]
pub struct LoginSuccessTemplate<'a> {
    pub name: &'a str,
}

#[derive(Template)]
#[template(path = "login/login_error_message.html")]
pub struct LoginErrorMessageTemplate;

#[derive(Template)]
#[template(path = "login.html")]
pub struct LoginTemplate {
    pub username: Option<String>,
}

#[derive(Template)]
#[template(path = "register/register_success.html")]
pub struct RegisterSuccessTemplate<'a> {
    pub name: &'a str,
}

#[derive(Template)]
#[template(path = "register/register_error_message.html")]
pub struct RegisterErrorMessageTemplate {
    pub message: String,
}

#[derive(Template)]
#[template(path = "register.html")]
pub struct RegisterTemplate {
    pub username: Option<String>,
}

/// Handles GET requests to display the login page.
#[tracing::instrument]
pub async fn login_page_handler(
    current_user: Option<Extension<CurrentUser>>,
) -> Result<Html<String>, AuthError> {
    let username = current_user.map(|Extension(user)| user.username);

    let template = LoginTemplate { username };
    template.render().map(Html).map_err(AuthError::from)
}

/// Handles GET requests to display the registration page.
#[tracing::instrument]
pub async fn register_page_handler(
    current_user: Option<Extension<CurrentUser>>,
) -> Result<Html<String>, AuthError> {
    let username = current_user.map(|Extension(user)| user.username);

    let template = RegisterTemplate { username };
    template.render().map(Html).map_err(AuthError::from)
}
