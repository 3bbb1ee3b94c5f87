/// Authentication endpoints
///
/// # Endpoints
///
/// - `POST /v1/auth/register` - Create an organization and its owner
/// - `POST /v1/auth/login` - Login and get tokens
/// - `POST /v1/auth/refresh` - Refresh access token
/// - `GET /v1/auth/me` - Current identity
///
/// Registration and login are recorded in the audit trail; a failed login
/// is only logged.

use crate::{
    app::AppState,
    error::{validate_request, ApiError, ApiResult},
    routes::common::request_metadata,
};
use axum::{extract::State, http::HeaderMap, Extension, Json};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tasktrail_shared::{
    audit::{self, AuditRecord},
    auth::{
        identity::{CallerIdentity, UserDirectory},
        jwt::{self, Claims, TokenType},
        password,
        permissions::{ResourceKind, Verb},
    },
    models::{
        organization::{CreateOrganization, Organization},
        user::{CreateUser, Role, User},
    },
};
use validator::Validate;

/// Register request
#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    /// Checked against the password policy after field validation
    pub password: String,

    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: String,

    #[validate(length(min = 1, max = 200, message = "Organization name must be 1-200 characters"))]
    pub organization_name: String,
}

/// Login request
#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    pub password: String,
}

/// Refresh token request
#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Issued tokens plus the identity they belong to
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: User,
    pub organization: Organization,
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    /// Access token lifetime in seconds
    pub expires_in: i64,
}

/// Refresh token response
#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
}

/// Current identity response
#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user: User,
    pub organization: Organization,
}

fn issue_tokens(state: &AppState, user: User, organization: Organization) -> ApiResult<AuthResponse> {
    let ttl = state.config.access_ttl();
    let access_claims = Claims::with_expiration(user.id, TokenType::Access, ttl);
    let refresh_claims = Claims::new(user.id, TokenType::Refresh);

    Ok(AuthResponse {
        access_token: jwt::create_token(&access_claims, state.jwt_secret())?,
        refresh_token: jwt::create_token(&refresh_claims, state.jwt_secret())?,
        token_type: "Bearer",
        expires_in: ttl.num_seconds(),
        user,
        organization,
    })
}

/// Register a new organization with its owner
///
/// Organization, owner and the single `organization:create` audit entry are
/// written in one transaction.
///
/// # Endpoint
///
/// ```text
/// POST /v1/auth/register
/// Content-Type: application/json
///
/// {
///   "email": "owner@example.com",
///   "password": "SecurePass123",
///   "name": "Ada Owner",
///   "organization_name": "Acme"
/// }
/// ```
///
/// # Errors
///
/// - `409 Conflict`: Email already exists
/// - `422 Unprocessable Entity`: Validation failed
pub async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<Json<AuthResponse>> {
    validate_request(&req)?;
    password::validate_password_strength(&req.password)?;

    let password_hash = password::hash_password(&req.password)?;

    let mut tx = state.db.begin().await?;

    let organization = Organization::create(
        &mut *tx,
        CreateOrganization {
            name: req.organization_name.trim().to_string(),
        },
    )
    .await?;

    let owner = User::create(
        &mut *tx,
        CreateUser {
            organization_id: organization.id,
            email: req.email,
            name: req.name.trim().to_string(),
            password_hash,
            role: Role::Owner,
        },
    )
    .await?;

    let caller = CallerIdentity::from_user(&owner)?;
    let entry = AuditRecord::new(&caller, Verb::Create, ResourceKind::Organization, organization.id)
        .after(&organization)?
        .with_metadata(json!({
            "owner_id": owner.id,
            "owner_email": &owner.email,
            "request": request_metadata(&headers),
        }));
    audit::record(&mut tx, entry).await?;

    tx.commit().await?;

    tracing::info!(
        organization_id = %organization.id,
        user_id = %owner.id,
        "Organization registered"
    );

    Ok(Json(issue_tokens(&state, owner, organization)?))
}

/// Login endpoint
///
/// # Errors
///
/// - `401 Unauthorized`: Unknown email or wrong password
/// - `403 Forbidden`: Account deactivated
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    validate_request(&req)?;

    let invalid = || ApiError::Unauthorized("Invalid email or password".to_string());

    let user = User::find_by_email(&state.db, &req.email).await?.ok_or_else(|| {
        tracing::warn!("Login failed: unknown email");
        invalid()
    })?;

    if !password::verify_password(&req.password, &user.password_hash)? {
        tracing::warn!(user_id = %user.id, "Login failed: wrong password");
        return Err(invalid());
    }

    // Only reveal deactivation once the password has been proven
    let caller = CallerIdentity::from_user(&user)?;

    let organization = state
        .db
        .get_organization(user.organization_id)
        .await?
        .ok_or_else(|| ApiError::InternalError(format!("User {} has no organization", user.id)))?;

    let mut tx = state.db.begin().await?;
    User::update_last_login(&mut *tx, user.id).await?;
    let entry = AuditRecord::new(&caller, Verb::Login, ResourceKind::User, user.id)
        .with_metadata(request_metadata(&headers));
    audit::record(&mut tx, entry).await?;
    tx.commit().await?;

    tracing::info!(user_id = %user.id, organization_id = %user.organization_id, "User logged in");

    Ok(Json(issue_tokens(&state, user, organization)?))
}

/// Token refresh endpoint
///
/// Exchanges a refresh token for a new access token. The account must
/// still exist and be active.
///
/// # Errors
///
/// - `401 Unauthorized`: Invalid or expired refresh token
/// - `403 Forbidden`: Account deactivated
pub async fn refresh(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> ApiResult<Json<RefreshResponse>> {
    let ttl = state.config.access_ttl();
    let (access_token, claims) = jwt::refresh_access_token(&req.refresh_token, state.jwt_secret(), ttl)?;

    let user = state
        .db
        .get_user(claims.sub)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Unknown user".to_string()))?;
    CallerIdentity::from_user(&user)?;

    Ok(Json(RefreshResponse {
        access_token,
        token_type: "Bearer",
        expires_in: ttl.num_seconds(),
    }))
}

/// Returns the authenticated user and organization
pub async fn me(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
) -> ApiResult<Json<MeResponse>> {
    let user = state
        .db
        .get_user(caller.user_id)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Unknown user".to_string()))?;
    let organization = state
        .db
        .get_organization(caller.organization_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Organization not found".to_string()))?;

    Ok(Json(MeResponse { user, organization }))
}
