/// The caller's organization
///
/// - `GET /v1/organization` - `organization:view`
/// - `PUT /v1/organization` - `organization:update` (owners)

use crate::{
    app::AppState,
    error::{validate_request, ApiError, ApiResult},
    routes::common::request_metadata,
};
use axum::{extract::State, http::HeaderMap, Extension, Json};
use serde::{Deserialize, Serialize};
use tasktrail_shared::{
    audit::{self, AuditRecord},
    auth::{
        identity::{CallerIdentity, UserDirectory},
        permissions::{require, Action, ResourceKind, Verb},
    },
    models::{
        organization::{Organization, UpdateOrganization},
        user::User,
    },
};
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateOrganizationRequest {
    #[validate(length(min = 1, max = 200, message = "Organization name must be 1-200 characters"))]
    pub name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct OrganizationResponse {
    #[serde(flatten)]
    pub organization: Organization,
    pub member_count: i64,
}

pub async fn get_organization(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
) -> ApiResult<Json<OrganizationResponse>> {
    require(
        &caller,
        Action::new(ResourceKind::Organization, Verb::View),
        caller.organization_id,
        Some(caller.organization_id),
    )?;

    let organization = state
        .db
        .get_organization(caller.organization_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Organization not found".to_string()))?;
    let member_count = User::count_by_organization(&state.db, organization.id).await?;

    Ok(Json(OrganizationResponse {
        organization,
        member_count,
    }))
}

pub async fn update_organization(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    headers: HeaderMap,
    Json(req): Json<UpdateOrganizationRequest>,
) -> ApiResult<Json<Organization>> {
    validate_request(&req)?;
    require(
        &caller,
        Action::new(ResourceKind::Organization, Verb::Update),
        caller.organization_id,
        Some(caller.organization_id),
    )?;

    let mut tx = state.db.begin().await?;

    let before = Organization::find_by_id(&mut *tx, caller.organization_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Organization not found".to_string()))?;

    let changes = UpdateOrganization {
        name: req.name.map(|n| n.trim().to_string()),
    };
    if changes.name.is_none() {
        return Ok(Json(before));
    }

    let after = Organization::update(&mut *tx, before.id, changes)
        .await?
        .ok_or_else(|| ApiError::NotFound("Organization not found".to_string()))?;

    let entry = AuditRecord::new(&caller, Verb::Update, ResourceKind::Organization, after.id)
        .before(&before)?
        .after(&after)?
        .with_metadata(request_metadata(&headers));
    audit::record(&mut tx, entry).await?;

    tx.commit().await?;

    Ok(Json(after))
}
