/// Task endpoints
///
/// # Endpoints
///
/// - `GET /v1/tasks` - List tasks (`task:view`)
/// - `POST /v1/tasks` - Create a task (`task:create`)
/// - `GET /v1/tasks/:id` - Get a task (`task:view`)
/// - `PUT /v1/tasks/:id` - Edit a task (`task:update`)
/// - `PUT /v1/tasks/:id/status` - Move a task (`task:status_change`)
/// - `DELETE /v1/tasks/:id` - Delete a task (`task:delete`)
///
/// Assignees and sprints named in a request body must belong to the
/// caller's organization.

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
use serde::Deserialize;
use serde_json::json;
use sqlx::PgConnection;
use tasktrail_shared::{
    audit::{self, AuditRecord},
    auth::{
        identity::CallerIdentity,
        permissions::{require, require_same_organization, Action, ResourceKind, Verb},
    },
    models::{
        sprint::Sprint,
        task::{CreateTask, Task, TaskFilter, TaskPriority, TaskStatus, UpdateTask},
        user::User,
    },
};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize)]
pub struct ListTasksQuery {
    pub status: Option<TaskStatus>,
    pub assignee_id: Option<Uuid>,
    pub sprint_id: Option<Uuid>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateTaskRequest {
    #[validate(length(min = 1, max = 200, message = "Title must be 1-200 characters"))]
    pub title: String,

    #[validate(length(max = 10000, message = "Description must be at most 10000 characters"))]
    pub description: Option<String>,

    #[serde(default)]
    pub priority: TaskPriority,

    pub assignee_id: Option<Uuid>,

    pub sprint_id: Option<Uuid>,

    #[validate(range(min = 0.0, max = 10000.0, message = "Estimated hours must be 0-10000"))]
    pub estimated_hours: Option<f64>,
}

/// Partial task edit; `null` clears a nullable field
#[derive(Debug, Default, Deserialize)]
pub struct UpdateTaskRequest {
    pub title: Option<String>,

    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,

    pub priority: Option<TaskPriority>,

    #[serde(default, deserialize_with = "double_option")]
    pub assignee_id: Option<Option<Uuid>>,

    #[serde(default, deserialize_with = "double_option")]
    pub sprint_id: Option<Option<Uuid>>,

    #[serde(default, deserialize_with = "double_option")]
    pub estimated_hours: Option<Option<f64>>,
}

impl UpdateTaskRequest {
    fn validate_fields(&self) -> ApiResult<()> {
        if let Some(title) = &self.title {
            let len = title.trim().chars().count();
            if len == 0 || len > 200 {
                return Err(ApiError::invalid_field("title", "Title must be 1-200 characters"));
            }
        }
        if let Some(Some(description)) = &self.description {
            if description.chars().count() > 10000 {
                return Err(ApiError::invalid_field(
                    "description",
                    "Description must be at most 10000 characters",
                ));
            }
        }
        if let Some(Some(hours)) = self.estimated_hours {
            if !(0.0..=10000.0).contains(&hours) {
                return Err(ApiError::invalid_field("estimated_hours", "Estimated hours must be 0-10000"));
            }
        }
        Ok(())
    }

    fn into_changes(self) -> UpdateTask {
        UpdateTask {
            title: self.title.map(|t| t.trim().to_string()),
            description: self.description,
            priority: self.priority,
            assignee_id: self.assignee_id,
            sprint_id: self.sprint_id,
            estimated_hours: self.estimated_hours,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChangeStatusRequest {
    pub status: TaskStatus,
}

/// Checks that a referenced assignee and sprint exist in the caller's organization
async fn check_references(
    conn: &mut PgConnection,
    caller: &CallerIdentity,
    assignee_id: Option<Uuid>,
    sprint_id: Option<Uuid>,
) -> ApiResult<()> {
    if let Some(assignee_id) = assignee_id {
        let assignee = User::find_by_id(&mut *conn, assignee_id)
            .await?
            .ok_or_else(|| ApiError::invalid_field("assignee_id", "Assignee does not exist"))?;
        require_same_organization(caller, assignee.organization_id)?;
        if !assignee.is_active {
            return Err(ApiError::invalid_field("assignee_id", "Assignee is deactivated"));
        }
    }

    if let Some(sprint_id) = sprint_id {
        let sprint = Sprint::find_by_id(&mut *conn, sprint_id)
            .await?
            .ok_or_else(|| ApiError::invalid_field("sprint_id", "Sprint does not exist"))?;
        require_same_organization(caller, sprint.organization_id)?;
    }

    Ok(())
}

/// Locks a task for the rest of the transaction and authorizes `verb` on it
async fn lock_authorized(
    conn: &mut PgConnection,
    caller: &CallerIdentity,
    id: Uuid,
    verb: Verb,
) -> ApiResult<Task> {
    let task = Task::find_for_update(conn, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Task not found".to_string()))?;

    require(caller, Action::new(ResourceKind::Task, verb), task.organization_id, Some(id))?;

    Ok(task)
}

pub async fn list_tasks(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Query(query): Query<ListTasksQuery>,
) -> ApiResult<Json<Page<Task>>> {
    require(
        &caller,
        Action::new(ResourceKind::Task, Verb::View),
        caller.organization_id,
        None,
    )?;

    let pagination = Pagination {
        page: query.page,
        per_page: query.per_page,
    };
    let filter = TaskFilter {
        status: query.status,
        assignee_id: query.assignee_id,
        sprint_id: query.sprint_id,
    };
    let unfiltered = filter.status.is_none() && filter.assignee_id.is_none() && filter.sprint_id.is_none();

    let tasks = Task::list_by_organization(
        &state.db,
        caller.organization_id,
        &filter,
        pagination.per_page(),
        pagination.offset(),
    )
    .await?;

    let total = if unfiltered {
        Some(Task::count_by_organization(&state.db, caller.organization_id).await?)
    } else {
        None
    };

    Ok(Json(Page::new(tasks, &pagination, total)))
}

pub async fn create_task(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    headers: HeaderMap,
    Json(req): Json<CreateTaskRequest>,
) -> ApiResult<(StatusCode, Json<Task>)> {
    validate_request(&req)?;
    require(
        &caller,
        Action::new(ResourceKind::Task, Verb::Create),
        caller.organization_id,
        None,
    )?;

    let mut tx = state.db.begin().await?;
    check_references(&mut tx, &caller, req.assignee_id, req.sprint_id).await?;

    let task = Task::create(
        &mut *tx,
        CreateTask {
            organization_id: caller.organization_id,
            sprint_id: req.sprint_id,
            title: req.title.trim().to_string(),
            description: req.description,
            priority: req.priority,
            assignee_id: req.assignee_id,
            created_by: caller.user_id,
            estimated_hours: req.estimated_hours,
        },
    )
    .await?;

    let entry = AuditRecord::new(&caller, Verb::Create, ResourceKind::Task, task.id)
        .after(&task)?
        .with_metadata(request_metadata(&headers));
    audit::record(&mut tx, entry).await?;

    tx.commit().await?;

    tracing::debug!(task_id = %task.id, organization_id = %task.organization_id, "Task created");

    Ok((StatusCode::CREATED, Json(task)))
}

pub async fn get_task(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Task>> {
    let task = Task::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Task not found".to_string()))?;

    require(&caller, Action::new(ResourceKind::Task, Verb::View), task.organization_id, Some(id))?;

    Ok(Json(task))
}

pub async fn update_task(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(req): Json<UpdateTaskRequest>,
) -> ApiResult<Json<Task>> {
    req.validate_fields()?;

    let mut tx = state.db.begin().await?;
    let before = lock_authorized(&mut tx, &caller, id, Verb::Update).await?;

    let changes = req.into_changes();
    if changes.is_empty() {
        return Ok(Json(before));
    }
    check_references(
        &mut tx,
        &caller,
        changes.assignee_id.flatten(),
        changes.sprint_id.flatten(),
    )
    .await?;

    let mut updated = before.clone();
    changes.apply(&mut updated);
    let after = Task::save(&mut *tx, &updated).await?;

    let entry = AuditRecord::new(&caller, Verb::Update, ResourceKind::Task, id)
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
) -> ApiResult<Json<Task>> {
    let mut tx = state.db.begin().await?;
    let before = lock_authorized(&mut tx, &caller, id, Verb::StatusChange).await?;

    if !before.status.can_transition_to(req.status) {
        return Err(ApiError::Conflict(format!(
            "Cannot move task from {} to {}",
            before.status.as_str(),
            req.status.as_str()
        )));
    }

    let after = Task::set_status(&mut *tx, id, req.status)
        .await?
        .ok_or_else(|| ApiError::NotFound("Task not found".to_string()))?;

    let entry = AuditRecord::new(&caller, Verb::StatusChange, ResourceKind::Task, id)
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

    Ok(Json(after))
}

pub async fn delete_task(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    let mut tx = state.db.begin().await?;
    let before = lock_authorized(&mut tx, &caller, id, Verb::Delete).await?;

    if !Task::delete(&mut *tx, id).await? {
        return Err(ApiError::NotFound("Task not found".to_string()));
    }

    let entry = AuditRecord::new(&caller, Verb::Delete, ResourceKind::Task, id)
        .in_organization(before.organization_id)
        .before(&before)?
        .with_metadata(request_metadata(&headers));
    audit::record(&mut tx, entry).await?;

    tx.commit().await?;

    tracing::info!(task_id = %id, deleted_by = %caller.user_id, "Task deleted");

    Ok(StatusCode::NO_CONTENT)
}
