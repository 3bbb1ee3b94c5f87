/// Audit trail endpoints (read-only)
///
/// # Endpoints
///
/// - `GET /v1/audit/logs` - Paginated entries (`audit_log:view`)
/// - `GET /v1/audit/logs/summary` - Counts over the last `days` (`audit_log:view`)
/// - `GET /v1/audit/logs/export` - Bulk export as a JSON download (`audit_log:export`)
/// - `GET /v1/audit/logs/verify` - Hash chain check (`audit_log:view`)
///
/// # Filters
///
/// `from`, `to` (RFC 3339, `to` exclusive), `actor_id`, `action`,
/// `resource_type`, `resource_id`, `after_seq` (export cursor). Entries
/// come back in sequence order.
///
/// Reading the trail is not itself audited.

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};
use axum::{
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tasktrail_shared::{
    audit::export::{self as audit_export, clamp_page_size, AuditPage, AuditSummary, ChainReport},
    auth::{
        identity::CallerIdentity,
        permissions::{require, Action, ResourceKind, Verb},
    },
    models::audit_log::{AuditLogEntry, AuditQuery},
};
use uuid::Uuid;

/// Longest summary window in days
pub const MAX_SUMMARY_DAYS: i64 = 365;

const DEFAULT_SUMMARY_DAYS: i64 = 30;

#[derive(Debug, Default, Deserialize)]
pub struct AuditFilterParams {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub actor_id: Option<Uuid>,
    pub action: Option<String>,
    pub resource_type: Option<String>,
    pub resource_id: Option<Uuid>,
    pub after_seq: Option<i64>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl AuditFilterParams {
    /// Checks the window and vocabulary, then builds the query filter
    fn to_query(&self) -> ApiResult<AuditQuery> {
        if let (Some(from), Some(to)) = (self.from, self.to) {
            if from >= to {
                return Err(ApiError::invalid_field("from", "`from` must be before `to`"));
            }
        }

        if let Some(action) = &self.action {
            if let Err(err) = action.parse::<Verb>() {
                return Err(ApiError::invalid_field("action", err.to_string()));
            }
        }

        if let Some(resource_type) = &self.resource_type {
            if let Err(err) = resource_type.parse::<ResourceKind>() {
                return Err(ApiError::invalid_field("resource_type", err.to_string()));
            }
        }

        Ok(AuditQuery {
            from: self.from,
            to: self.to,
            actor_id: self.actor_id,
            action: self.action.clone(),
            resource_type: self.resource_type.clone(),
            resource_id: self.resource_id,
            after_seq: self.after_seq,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct SummaryParams {
    pub days: Option<i64>,
}

/// Export download body
#[derive(Debug, Serialize)]
pub struct AuditExport {
    pub organization_id: Uuid,
    pub exported_at: DateTime<Utc>,
    pub count: usize,
    /// More entries match; continue with `after_seq=next_after_seq`
    pub truncated: bool,
    pub next_after_seq: Option<i64>,
    pub entries: Vec<AuditLogEntry>,
}

fn authorize(caller: &CallerIdentity, verb: Verb) -> ApiResult<()> {
    require(
        caller,
        Action::new(ResourceKind::AuditLog, verb),
        caller.organization_id,
        None,
    )?;
    Ok(())
}

pub async fn list_logs(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Query(params): Query<AuditFilterParams>,
) -> ApiResult<Json<AuditPage>> {
    authorize(&caller, Verb::View)?;
    let filter = params.to_query()?;

    let page = audit_export::list(
        &state.db,
        caller.organization_id,
        &filter,
        params.page.unwrap_or(1),
        clamp_page_size(params.per_page),
    )
    .await?;

    Ok(Json(page))
}

pub async fn summary(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Query(params): Query<SummaryParams>,
) -> ApiResult<Json<AuditSummary>> {
    authorize(&caller, Verb::View)?;

    let days = params.days.unwrap_or(DEFAULT_SUMMARY_DAYS);
    if !(1..=MAX_SUMMARY_DAYS).contains(&days) {
        return Err(ApiError::invalid_field(
            "days",
            format!("days must be between 1 and {}", MAX_SUMMARY_DAYS),
        ));
    }

    let summary = audit_export::summary(&state.db, caller.organization_id, days).await?;

    Ok(Json(summary))
}

pub async fn export(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Query(params): Query<AuditFilterParams>,
) -> ApiResult<Response> {
    authorize(&caller, Verb::Export)?;
    let filter = params.to_query()?;

    let batch = audit_export::export(&state.db, caller.organization_id, &filter).await?;
    let exported_at = Utc::now();

    tracing::info!(
        organization_id = %caller.organization_id,
        exported_by = %caller.user_id,
        rows = batch.entries.len(),
        truncated = batch.truncated,
        "Audit export downloaded"
    );

    let body = AuditExport {
        organization_id: caller.organization_id,
        exported_at,
        count: batch.entries.len(),
        truncated: batch.truncated,
        next_after_seq: batch.next_after_seq,
        entries: batch.entries,
    };

    let disposition = format!(
        "attachment; filename=\"audit-{}-{}.json\"",
        caller.organization_id,
        exported_at.format("%Y%m%dT%H%M%SZ")
    );

    Ok(([(header::CONTENT_DISPOSITION, disposition)], Json(body)).into_response())
}

pub async fn verify(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
) -> ApiResult<Json<ChainReport>> {
    authorize(&caller, Verb::View)?;

    let report = audit_export::verify(&state.db, caller.organization_id).await?;

    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_filter_passes_through() {
        let actor = Uuid::new_v4();
        let params = AuditFilterParams {
            actor_id: Some(actor),
            action: Some("status_change".to_string()),
            resource_type: Some("task".to_string()),
            after_seq: Some(41),
            ..Default::default()
        };

        let query = params.to_query().unwrap();
        assert_eq!(query.after_seq, Some(41));
        assert_eq!(query.actor_id, Some(actor));
        assert_eq!(query.action.as_deref(), Some("status_change"));
        assert_eq!(query.resource_type.as_deref(), Some("task"));
    }

    #[test]
    fn test_inverted_window_rejected() {
        let now = Utc::now();
        let params = AuditFilterParams {
            from: Some(now),
            to: Some(now - Duration::hours(1)),
            ..Default::default()
        };
        assert!(matches!(params.to_query(), Err(ApiError::ValidationError(_))));
    }

    #[test]
    fn test_unknown_vocabulary_rejected() {
        let params = AuditFilterParams {
            action: Some("explode".to_string()),
            ..Default::default()
        };
        assert!(params.to_query().is_err());

        let params = AuditFilterParams {
            resource_type: Some("invoice".to_string()),
            ..Default::default()
        };
        assert!(params.to_query().is_err());
    }

    #[test]
    fn test_login_is_a_filterable_action() {
        let params = AuditFilterParams {
            action: Some("login".to_string()),
            ..Default::default()
        };
        assert!(params.to_query().is_ok());
    }
}
