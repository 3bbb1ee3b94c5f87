/// Sprint endpoints
///
/// - `GET /v1/sprints` - `sprint:view`
/// - `POST /v1/sprints` - `sprint:create`
/// - `GET /v1/sprints/:id` - `sprint:view`
/// - `PUT /v1/sprints/:id` - `sprint:update`
/// - `PUT /v1/sprints/:id/status` - `sprint:status_change`
/// - `DELETE /v1/sprints/:id` - `sprint:delete`; refused while tasks remain in the sprint

use crate::{
    app::AppState,
    error::{validate_request, ApiError, ApiResult},
    routes::common::{double_option, request_metadata, Page, Pagination},
};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Extension, Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;
use sqlx::PgConnection;
use tasktrail_shared::{
    audit::{self, AuditRecord},
    auth::{
        identity::CallerIdentity,
        permissions::{require, Action, ResourceKind, Verb},
    },
    models::sprint::{CreateSprint, Sprint, SprintStatus, UpdateSprint},
};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize)]
pub struct ListSprintsQuery {
    pub status: Option<SprintStatus>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateSprintRequest {
    #[validate(length(min = 1, max = 255, message = "Name must be 1-255 characters"))]
    pub name: String,

    #[validate(length(max = 2000, message = "Goal must be at most 2000 characters"))]
    pub goal: Option<String>,

    pub start_date: NaiveDate,

    pub end_date: NaiveDate,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateSprintRequest {
    #[validate(length(min = 1, max = 255, message = "Name must be 1-255 characters"))]
    pub name: Option<String>,

    #[serde(default, deserialize_with = "double_option")]
    pub goal: Option<Option<String>>,

    pub start_date: Option<NaiveDate>,

    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct ChangeStatusRequest {
    pub status: SprintStatus,
}

fn invalid_dates() -> ApiError {
    ApiError::invalid_field("end_date", "End date must not be before start date")
}

async fn lock_authorized(
    conn: &mut PgConnection,
    caller: &CallerIdentity,
    id: Uuid,
    verb: Verb,
) -> ApiResult<Sprint> {
    let sprint = Sprint::find_for_update(conn, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Sprint not found".to_string()))?;

    require(caller, Action::new(ResourceKind::Sprint, verb), sprint.organization_id, Some(id))?;

    Ok(sprint)
}

pub async fn list_sprints(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Query(query): Query<ListSprintsQuery>,
) -> ApiResult<Json<Page<Sprint>>> {
    require(
        &caller,
        Action::new(ResourceKind::Sprint, Verb::View),
        caller.organization_id,
        None,
    )?;

    let pagination = Pagination {
        page: query.page,
        per_page: query.per_page,
    };

    let sprints = Sprint::list_by_organization(
        &state.db,
        caller.organization_id,
        query.status,
        pagination.per_page(),
        pagination.offset(),
    )
    .await?;

    Ok(Json(Page::new(sprints, &pagination, None)))
}

pub async fn create_sprint(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    headers: HeaderMap,
    Json(req): Json<CreateSprintRequest>,
) -> ApiResult<(StatusCode, Json<Sprint>)> {
    validate_request(&req)?;
    if req.end_date < req.start_date {
        return Err(invalid_dates());
    }
    require(
        &caller,
        Action::new(ResourceKind::Sprint, Verb::Create),
        caller.organization_id,
        None,
    )?;

    let mut tx = state.db.begin().await?;

    let sprint = Sprint::create(
        &mut *tx,
        CreateSprint {
            organization_id: caller.organization_id,
            name: req.name.trim().to_string(),
            goal: req.goal,
            start_date: req.start_date,
            end_date: req.end_date,
            created_by: caller.user_id,
        },
    )
    .await?;

    let entry = AuditRecord::new(&caller, Verb::Create, ResourceKind::Sprint, sprint.id)
        .after(&sprint)?
        .with_metadata(request_metadata(&headers));
    audit::record(&mut tx, entry).await?;

    tx.commit().await?;

    Ok((StatusCode::CREATED, Json(sprint)))
}

pub async fn get_sprint(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Sprint>> {
    let sprint = Sprint::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Sprint not found".to_string()))?;

    require(&caller, Action::new(ResourceKind::Sprint, Verb::View), sprint.organization_id, Some(id))?;

    Ok(Json(sprint))
}

pub async fn update_sprint(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(req): Json<UpdateSprintRequest>,
) -> ApiResult<Json<Sprint>> {
    validate_request(&req)?;

    let mut tx = state.db.begin().await?;
    let before = lock_authorized(&mut tx, &caller, id, Verb::Update).await?;

    let changes = UpdateSprint {
        name: req.name.map(|n| n.trim().to_string()),
        goal: req.goal,
        start_date: req.start_date,
        end_date: req.end_date,
    };
    if changes.is_empty() {
        return Ok(Json(before));
    }

    let mut updated = before.clone();
    changes.apply(&mut updated);
    if !updated.has_valid_dates() {
        return Err(invalid_dates());
    }
    let after = Sprint::save(&mut *tx, &updated).await?;

    let entry = AuditRecord::new(&caller, Verb::Update, ResourceKind::Sprint, id)
        .in_organization(after.organization_id)
        .before(&before)?
        .after(&after)?
        .with_metadata(request_metadata(&headers));
    audit::record(&mut tx, entry).await?;

    tx.commit().await?;

    Ok(Json(after))
}

pub async fn change_status(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(req): Json<ChangeStatusRequest>,
) -> ApiResult<Json<Sprint>> {
    let mut tx = state.db.begin().await?;
    let before = lock_authorized(&mut tx, &caller, id, Verb::StatusChange).await?;

    if !before.status.can_transition_to(req.status) {
        return Err(ApiError::Conflict(format!(
            "Cannot move sprint from {} to {}",
            before.status.as_str(),
            req.status.as_str()
        )));
    }

    let after = Sprint::set_status(&mut *tx, id, req.status)
        .await?
        .ok_or_else(|| ApiError::NotFound("Sprint not found".to_string()))?;

    let entry = AuditRecord::new(&caller, Verb::StatusChange, ResourceKind::Sprint, id)
        .in_organization(after.organization_id)
        .before(&before)?
        .after(&after)?
        .with_metadata(json!({
            "from": before.status.as_str(),
            "to": after.status.as_str(),
            "request": request_metadata(&headers),
        }));
    audit::record(&mut tx, entry).await?;

    tx.commit().await?;

    tracing::info!(sprint_id = %id, status = after.status.as_str(), "Sprint status changed");

    Ok(Json(after))
}

pub async fn delete_sprint(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    let mut tx = state.db.begin().await?;
    let before = lock_authorized(&mut tx, &caller, id, Verb::Delete).await?;

    let scheduled = Sprint::task_count(&mut *tx, id).await?;
    if scheduled > 0 {
        return Err(ApiError::Conflict(format!(
            "Cannot delete sprint with {} task(s); move or delete them first",
            scheduled
        )));
    }

    if !Sprint::delete(&mut *tx, id).await? {
        return Err(ApiError::NotFound("Sprint not found".to_string()));
    }

    let entry = AuditRecord::new(&caller, Verb::Delete, ResourceKind::Sprint, id)
        .in_organization(before.organization_id)
        .before(&before)?
        .with_metadata(request_metadata(&headers));
    audit::record(&mut tx, entry).await?;

    tx.commit().await?;

    tracing::info!(sprint_id = %id, deleted_by = %caller.user_id, "Sprint deleted");

    Ok(StatusCode::NO_CONTENT)
}
