/// User management endpoints
///
/// # Endpoints
///
/// - `GET /v1/users` - List users (`user:view`)
/// - `POST /v1/users` - Invite a user (`user:create`)
/// - `GET /v1/users/:id` - Get a user (`user:view`)
/// - `PUT /v1/users/:id` - Update name/email (`user:update`)
/// - `PUT /v1/users/:id/role` - Change role (`user:role_change`)
/// - `POST /v1/users/:id/deactivate` - Deactivate (`user:deactivate`)
///
/// On top of the table minimum, nobody acts on an account ranked above
/// them, grants a role above their own, or changes their own role or
/// activation.

use crate::{
    app::AppState,
    error::{validate_request, ApiError, ApiResult},
    routes::common::{request_metadata, Page, Pagination},
};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Extension, Json,
};
use serde::Deserialize;
use sqlx::PgConnection;
use tasktrail_shared::{
    audit::{self, AuditRecord},
    auth::{
        identity::CallerIdentity,
        password,
        permissions::{check_can_manage, check_role_assignment, require, Action, ResourceKind, Verb},
    },
    models::user::{CreateUser, Role, UpdateUser, User},
};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize)]
pub struct ListUsersQuery {
    pub role: Option<Role>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct InviteUserRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: String,

    /// Initial password, checked against the password policy
    pub password: String,

    #[serde(default = "default_invite_role")]
    pub role: Role,
}

fn default_invite_role() -> Role {
    Role::Employee
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateUserRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: Option<String>,

    #[validate(email(message = "Invalid email format"))]
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChangeRoleRequest {
    pub role: Role,
}

/// Loads a user and authorizes `verb` against its organization
async fn load_authorized(
    conn: &mut PgConnection,
    caller: &CallerIdentity,
    id: Uuid,
    verb: Verb,
) -> ApiResult<User> {
    let user = User::find_by_id(conn, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    require(caller, Action::new(ResourceKind::User, verb), user.organization_id, Some(id))?;

    Ok(user)
}

/// Locks a user for the rest of the transaction and authorizes `verb` on it
async fn lock_authorized(
    conn: &mut PgConnection,
    caller: &CallerIdentity,
    id: Uuid,
    verb: Verb,
) -> ApiResult<User> {
    let user = User::find_for_update(conn, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    require(caller, Action::new(ResourceKind::User, verb), user.organization_id, Some(id))?;

    Ok(user)
}

/// Refuses to strip the last active owner of an organization
fn ensure_other_owner(owners: &[Uuid], target: &User) -> ApiResult<()> {
    if target.role == Role::Owner && target.is_active && !owners.iter().any(|id| *id != target.id) {
        return Err(ApiError::Conflict(
            "Organization must keep at least one active owner".to_string(),
        ));
    }
    Ok(())
}

pub async fn list_users(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Query(query): Query<ListUsersQuery>,
) -> ApiResult<Json<Page<User>>> {
    require(
        &caller,
        Action::new(ResourceKind::User, Verb::View),
        caller.organization_id,
        None,
    )?;

    let pagination = Pagination {
        page: query.page,
        per_page: query.per_page,
    };

    let users = User::list_by_organization(
        &state.db,
        caller.organization_id,
        query.role,
        pagination.per_page(),
        pagination.offset(),
    )
    .await?;

    // Total ignores the role filter
    let total = match query.role {
        None => Some(User::count_by_organization(&state.db, caller.organization_id).await?),
        Some(_) => None,
    };

    Ok(Json(Page::new(users, &pagination, total)))
}

pub async fn invite_user(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    headers: HeaderMap,
    Json(req): Json<InviteUserRequest>,
) -> ApiResult<(StatusCode, Json<User>)> {
    validate_request(&req)?;
    require(
        &caller,
        Action::new(ResourceKind::User, Verb::Create),
        caller.organization_id,
        None,
    )?;
    check_role_assignment(&caller, req.role, req.role)?;
    password::validate_password_strength(&req.password)?;

    let password_hash = password::hash_password(&req.password)?;

    let mut tx = state.db.begin().await?;

    let user = User::create(
        &mut *tx,
        CreateUser {
            organization_id: caller.organization_id,
            email: req.email,
            name: req.name.trim().to_string(),
            password_hash,
            role: req.role,
        },
    )
    .await?;

    let entry = AuditRecord::new(&caller, Verb::Create, ResourceKind::User, user.id)
        .after(&user)?
        .with_metadata(request_metadata(&headers));
    audit::record(&mut tx, entry).await?;

    tx.commit().await?;

    tracing::info!(
        organization_id = %caller.organization_id,
        user_id = %user.id,
        role = %user.role,
        invited_by = %caller.user_id,
        "User invited"
    );

    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn get_user(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<User>> {
    let mut conn = state.db.acquire().await?;
    let user = load_authorized(&mut conn, &caller, id, Verb::View).await?;
    Ok(Json(user))
}

pub async fn update_user(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(req): Json<UpdateUserRequest>,
) -> ApiResult<Json<User>> {
    validate_request(&req)?;

    let mut tx = state.db.begin().await?;
    let before = lock_authorized(&mut tx, &caller, id, Verb::Update).await?;
    if before.id != caller.user_id {
        check_can_manage(&caller, before.role)?;
    }

    let changes = UpdateUser {
        name: req.name.map(|n| n.trim().to_string()),
        email: req.email,
    };
    if changes.name.is_none() && changes.email.is_none() {
        return Ok(Json(before));
    }

    let after = User::update(&mut *tx, id, changes)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    let entry = AuditRecord::new(&caller, Verb::Update, ResourceKind::User, id)
        .in_organization(after.organization_id)
        .before(&before)?
        .after(&after)?
        .with_metadata(request_metadata(&headers));
    audit::record(&mut tx, entry).await?;

    tx.commit().await?;

    Ok(Json(after))
}

pub async fn change_role(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(req): Json<ChangeRoleRequest>,
) -> ApiResult<Json<User>> {
    let mut tx = state.db.begin().await?;
    let owners = User::lock_active_owners(&mut *tx, caller.organization_id).await?;
    let before = lock_authorized(&mut tx, &caller, id, Verb::RoleChange).await?;

    if before.id == caller.user_id {
        return Err(ApiError::BadRequest("You cannot change your own role".to_string()));
    }
    check_role_assignment(&caller, before.role, req.role)?;

    if before.role == req.role {
        return Ok(Json(before));
    }
    if req.role != Role::Owner {
        ensure_other_owner(&owners, &before)?;
    }

    let after = User::set_role(&mut *tx, id, req.role)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    let entry = AuditRecord::new(&caller, Verb::RoleChange, ResourceKind::User, id)
        .in_organization(after.organization_id)
        .before(&before)?
        .after(&after)?
        .with_metadata(request_metadata(&headers));
    audit::record(&mut tx, entry).await?;

    tx.commit().await?;

    tracing::info!(
        user_id = %id,
        from = %before.role,
        to = %after.role,
        changed_by = %caller.user_id,
        "User role changed"
    );

    Ok(Json(after))
}

pub async fn deactivate_user(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<Json<User>> {
    let mut tx = state.db.begin().await?;
    let owners = User::lock_active_owners(&mut *tx, caller.organization_id).await?;
    let before = lock_authorized(&mut tx, &caller, id, Verb::Deactivate).await?;

    if before.id == caller.user_id {
        return Err(ApiError::BadRequest("You cannot deactivate your own account".to_string()));
    }
    check_can_manage(&caller, before.role)?;

    if !before.is_active {
        return Err(ApiError::Conflict("User is already deactivated".to_string()));
    }
    ensure_other_owner(&owners, &before)?;

    let after = User::deactivate(&mut *tx, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    let entry = AuditRecord::new(&caller, Verb::Deactivate, ResourceKind::User, id)
        .in_organization(after.organization_id)
        .before(&before)?
        .after(&after)?
        .with_metadata(request_metadata(&headers));
    audit::record(&mut tx, entry).await?;

    tx.commit().await?;

    tracing::info!(user_id = %id, deactivated_by = %caller.user_id, "User deactivated");

    Ok(Json(after))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invite_defaults_to_employee() {
        let req: InviteUserRequest = serde_json::from_str(
            r#"{"email": "new@example.com", "name": "New Hire", "password": "Welcome123"}"#,
        )
        .unwrap();
        assert_eq!(req.role, Role::Employee);
    }

    #[test]
    fn test_update_user_validation() {
        let req = UpdateUserRequest {
            name: Some(String::new()),
            email: Some("nope".to_string()),
        };
        assert!(matches!(validate_request(&req), Err(ApiError::ValidationError(d)) if d.len() == 2));

        let req = UpdateUserRequest {
            name: None,
            email: None,
        };
        assert!(validate_request(&req).is_ok());
    }

    fn member(role: Role) -> User {
        let now = chrono::Utc::now();
        User {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            email: "member@example.com".to_string(),
            name: "Member".to_string(),
            password_hash: String::new(),
            role,
            is_active: true,
            deactivated_at: None,
            created_at: now,
            updated_at: now,
            last_login_at: None,
        }
    }

    #[test]
    fn test_last_owner_is_kept() {
        let owner = member(Role::Owner);
        assert!(matches!(
            ensure_other_owner(&[owner.id], &owner),
            Err(ApiError::Conflict(_))
        ));
        assert!(ensure_other_owner(&[owner.id, Uuid::new_v4()], &owner).is_ok());

        let manager = member(Role::Manager);
        assert!(ensure_other_owner(&[], &manager).is_ok());
    }

    #[test]
    fn test_unknown_role_rejected() {
        assert!(serde_json::from_str::<ChangeRoleRequest>(r#"{"role": "admin"}"#).is_err());
        assert_eq!(
            serde_json::from_str::<ChangeRoleRequest>(r#"{"role": "manager"}"#).unwrap().role,
            Role::Manager
        );
    }
}
