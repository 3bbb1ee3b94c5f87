/// Application state and router builder
///
/// This module defines the shared application state and provides
/// a function to build the Axum router with all routes and middleware.
///
/// # Example
///
/// ```no_run
/// use tasktrail_api::{app::AppState, config::Config};
/// use sqlx::PgPool;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = Config::from_env()?;
/// let pool = PgPool::connect(&config.database.url).await?;
/// let state = AppState::new(pool, config);
/// let app = tasktrail_api::app::build_router(state);
/// # Ok(())
/// # }
/// ```

use crate::{
    config::Config,
    middleware::{auth::require_identity, security::SecurityHeadersLayer},
    routes,
};
use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post, put},
    Router,
};
use sqlx::PgPool;
use std::sync::Arc;
use tasktrail_shared::auth::{identity::TokenVerifier, jwt::JwtVerifier};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

/// Shared application state
///
/// Cloned for each request handler via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: PgPool,

    /// Application configuration
    pub config: Arc<Config>,

    /// Bearer token verifier
    pub verifier: Arc<dyn TokenVerifier>,
}

impl AppState {
    /// Creates state with the HS256 verifier for the configured secret
    pub fn new(db: PgPool, config: Config) -> Self {
        let verifier = Arc::new(JwtVerifier::new(config.jwt.secret.clone()));
        Self::with_verifier(db, config, verifier)
    }

    /// Creates state with a custom token verifier
    pub fn with_verifier(db: PgPool, config: Config, verifier: Arc<dyn TokenVerifier>) -> Self {
        Self {
            db,
            config: Arc::new(config),
            verifier,
        }
    }

    /// Gets JWT secret for token operations
    pub fn jwt_secret(&self) -> &str {
        &self.config.jwt.secret
    }
}

/// Builds the complete Axum router with all routes and middleware
///
/// # Architecture
///
/// ```text
/// /
/// ├── /health                         # Health check (public)
/// └── /v1/
///     ├── /auth/                      # register, login, refresh (public), me
///     ├── /organization               # GET, PUT
///     ├── /users/                     # list, invite, get, role, deactivate
///     ├── /tasks/                     # CRUD + status
///     ├── /sprints/                   # CRUD + status
///     └── /audit/logs/                # list, summary, export, verify
/// ```
///
/// Everything below `/v1` except the public auth routes passes through
/// [`require_identity`].
///
/// # Middleware Stack
///
/// Applied in order (bottom to top):
/// 1. Logging (tower-http TraceLayer)
/// 2. CORS (tower-http CorsLayer)
/// 3. Security headers
/// 4. Authentication (protected routes only)
pub fn build_router(state: AppState) -> Router {
    let health_routes = Router::new().route("/health", get(routes::health::health_check));

    let public_auth_routes = Router::new()
        .route("/register", post(routes::auth::register))
        .route("/login", post(routes::auth::login))
        .route("/refresh", post(routes::auth::refresh));

    let protected_routes = Router::new()
        .route("/auth/me", get(routes::auth::me))
        .route(
            "/organization",
            get(routes::organization::get_organization).put(routes::organization::update_organization),
        )
        .route("/users", get(routes::users::list_users).post(routes::users::invite_user))
        .route("/users/:id", get(routes::users::get_user).put(routes::users::update_user))
        .route("/users/:id/role", put(routes::users::change_role))
        .route("/users/:id/deactivate", post(routes::users::deactivate_user))
        .route("/tasks", get(routes::tasks::list_tasks).post(routes::tasks::create_task))
        .route(
            "/tasks/:id",
            get(routes::tasks::get_task)
                .put(routes::tasks::update_task)
                .delete(routes::tasks::delete_task),
        )
        .route("/tasks/:id/status", put(routes::tasks::change_status))
        .route("/sprints", get(routes::sprints::list_sprints).post(routes::sprints::create_sprint))
        .route(
            "/sprints/:id",
            get(routes::sprints::get_sprint)
                .put(routes::sprints::update_sprint)
                .delete(routes::sprints::delete_sprint),
        )
        .route("/sprints/:id/status", put(routes::sprints::change_status))
        .route("/audit/logs", get(routes::audit::list_logs))
        .route("/audit/logs/summary", get(routes::audit::summary))
        .route("/audit/logs/export", get(routes::audit::export))
        .route("/audit/logs/verify", get(routes::audit::verify))
        .route_layer(axum::middleware::from_fn_with_state(state.clone(), require_identity));

    let v1_routes = Router::new()
        .nest("/auth", public_auth_routes)
        .merge(protected_routes);

    Router::new()
        .merge(health_routes)
        .nest("/v1", v1_routes)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_layer(&state.config))
        .layer(SecurityHeadersLayer::new(state.config.api.production))
        .with_state(state)
}

/// CORS policy from `CORS_ORIGINS`; `*` is permissive (development)
fn cors_layer(config: &Config) -> CorsLayer {
    if config.api.cors_origins.iter().any(|origin| origin == "*") {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = config
        .api
        .cors_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
        .max_age(std::time::Duration::from_secs(3600))
}
