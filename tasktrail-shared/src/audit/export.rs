/// Read-only access to the audit trail
///
/// All queries are scoped to one organization. Callers authorize with
/// `audit_log:view` or `audit_log:export` before calling in here; nothing in
/// this module writes.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::audit_log::{AuditGrouping, AuditLogEntry, AuditQuery, GroupCount};

/// Default page size for listings
pub const DEFAULT_PAGE_SIZE: i64 = 50;

/// Largest page a caller may request
pub const MAX_PAGE_SIZE: i64 = 500;

/// Highest page number a listing accepts
pub const MAX_PAGE: i64 = 1_000_000;

/// Largest batch a single export returns
pub const MAX_EXPORT_ROWS: i64 = 10_000;

/// One page of entries
#[derive(Debug, Clone, Serialize)]
pub struct AuditPage {
    pub entries: Vec<AuditLogEntry>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub pages: i64,
}

/// Aggregate view of activity in a window
#[derive(Debug, Clone, Serialize)]
pub struct AuditSummary {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub total: i64,
    pub by_action: Vec<GroupCount>,
    pub by_resource_type: Vec<GroupCount>,
    pub by_actor: Vec<GroupCount>,
    pub by_day: Vec<GroupCount>,
}

/// Outcome of a chain verification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChainReport {
    pub valid: bool,
    pub entries: i64,
    /// Sequence number of the first entry that failed, if any
    pub first_invalid_seq: Option<i64>,
}

/// Clamps a requested page size into `1..=MAX_PAGE_SIZE`
pub fn clamp_page_size(per_page: Option<i64>) -> i64 {
    per_page.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
}

/// Number of pages needed for `total` rows
pub fn page_count(total: i64, per_page: i64) -> i64 {
    if total <= 0 {
        0
    } else {
        (total + per_page - 1) / per_page
    }
}

/// Clamps a 1-based page and returns it with its row offset
pub fn page_offset(page: i64, per_page: i64) -> (i64, i64) {
    let page = page.clamp(1, MAX_PAGE);
    (page, (page - 1).saturating_mul(per_page.max(0)))
}

/// Lists entries, ascending by sequence
///
/// `page` is 1-based and clamped into `1..=MAX_PAGE`.
pub async fn list(
    pool: &PgPool,
    organization_id: Uuid,
    filter: &AuditQuery,
    page: i64,
    per_page: i64,
) -> Result<AuditPage, sqlx::Error> {
    let (page, offset) = page_offset(page, per_page);

    let entries = AuditLogEntry::list(pool, organization_id, filter, per_page, offset).await?;
    let total = AuditLogEntry::count(pool, organization_id, filter).await?;

    Ok(AuditPage {
        entries,
        total,
        page,
        per_page,
        pages: page_count(total, per_page),
    })
}

/// One export batch
#[derive(Debug, Clone, Serialize)]
pub struct ExportBatch {
    pub entries: Vec<AuditLogEntry>,
    /// More entries match the filter beyond this batch
    pub truncated: bool,
    /// Pass as `after_seq` to fetch the next batch
    pub next_after_seq: Option<i64>,
}

impl ExportBatch {
    /// Splits a `limit + 1` lookahead fetch into a batch of at most `limit`
    fn from_lookahead(mut entries: Vec<AuditLogEntry>, limit: usize) -> Self {
        let truncated = entries.len() > limit;
        entries.truncate(limit);
        let next_after_seq = if truncated { entries.last().map(|e| e.seq) } else { None };

        Self {
            entries,
            truncated,
            next_after_seq,
        }
    }
}

/// Exports entries in a window, ascending by sequence
///
/// Returns at most [`MAX_EXPORT_ROWS`]. Larger windows are read batch by
/// batch with `filter.after_seq` set to the previous `next_after_seq`.
pub async fn export(
    pool: &PgPool,
    organization_id: Uuid,
    filter: &AuditQuery,
) -> Result<ExportBatch, sqlx::Error> {
    let lookahead = AuditLogEntry::list(pool, organization_id, filter, MAX_EXPORT_ROWS + 1, 0).await?;
    let batch = ExportBatch::from_lookahead(lookahead, MAX_EXPORT_ROWS as usize);

    tracing::info!(
        organization_id = %organization_id,
        rows = batch.entries.len(),
        truncated = batch.truncated,
        from = ?filter.from,
        to = ?filter.to,
        after_seq = ?filter.after_seq,
        "Audit log exported"
    );

    Ok(batch)
}

/// Summarizes the last `days` days of activity
pub async fn summary(pool: &PgPool, organization_id: Uuid, days: i64) -> Result<AuditSummary, sqlx::Error> {
    let to = Utc::now();
    let from = to - Duration::days(days.max(1));
    let filter = AuditQuery {
        from: Some(from),
        to: Some(to),
        ..Default::default()
    };

    let total = AuditLogEntry::count(pool, organization_id, &filter).await?;
    let by_action = AuditLogEntry::count_grouped(pool, organization_id, AuditGrouping::Action, &filter).await?;
    let by_resource_type =
        AuditLogEntry::count_grouped(pool, organization_id, AuditGrouping::ResourceType, &filter).await?;
    let by_actor = AuditLogEntry::count_grouped(pool, organization_id, AuditGrouping::Actor, &filter).await?;
    let by_day = AuditLogEntry::count_grouped(pool, organization_id, AuditGrouping::Day, &filter).await?;

    Ok(AuditSummary {
        from,
        to,
        total,
        by_action,
        by_resource_type,
        by_actor,
        by_day,
    })
}

/// Re-walks the organization's hash chain
pub async fn verify(pool: &PgPool, organization_id: Uuid) -> Result<ChainReport, sqlx::Error> {
    let chain = AuditLogEntry::query_chain(pool, organization_id).await?;
    let first_invalid_seq = crate::models::audit_log::first_broken_link(&chain);

    if let Some(seq) = first_invalid_seq {
        tracing::error!(
            organization_id = %organization_id,
            seq,
            "Audit hash chain broken"
        );
    }

    Ok(ChainReport {
        valid: first_invalid_seq.is_none(),
        entries: chain.len() as i64,
        first_invalid_seq,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_page_size() {
        assert_eq!(clamp_page_size(None), DEFAULT_PAGE_SIZE);
        assert_eq!(clamp_page_size(Some(0)), 1);
        assert_eq!(clamp_page_size(Some(-5)), 1);
        assert_eq!(clamp_page_size(Some(20)), 20);
        assert_eq!(clamp_page_size(Some(100_000)), MAX_PAGE_SIZE);
    }

    #[test]
    fn test_page_count() {
        assert_eq!(page_count(0, 50), 0);
        assert_eq!(page_count(1, 50), 1);
        assert_eq!(page_count(50, 50), 1);
        assert_eq!(page_count(51, 50), 2);
    }

    #[test]
    fn test_page_offset_is_bounded() {
        assert_eq!(page_offset(1, 50), (1, 0));
        assert_eq!(page_offset(3, 50), (3, 100));
        assert_eq!(page_offset(-7, 50), (1, 0));

        let (page, offset) = page_offset(i64::MAX, MAX_PAGE_SIZE);
        assert_eq!(page, MAX_PAGE);
        assert_eq!(offset, (MAX_PAGE - 1) * MAX_PAGE_SIZE);
    }

    fn entry(seq: i64) -> AuditLogEntry {
        AuditLogEntry {
            id: Uuid::new_v4(),
            organization_id: Uuid::nil(),
            seq,
            ts: Utc::now(),
            actor_id: Uuid::nil(),
            action: "update".to_string(),
            resource_type: "task".to_string(),
            resource_id: Uuid::nil(),
            before_state: None,
            after_state: None,
            metadata: serde_json::json!({}),
            hash_prev: None,
            hash_curr: vec![0; 32],
        }
    }

    #[test]
    fn test_batch_exactly_at_limit_is_complete() {
        let batch = ExportBatch::from_lookahead((0..3).map(entry).collect(), 3);
        assert_eq!(batch.entries.len(), 3);
        assert!(!batch.truncated);
        assert_eq!(batch.next_after_seq, None);
    }

    #[test]
    fn test_batch_over_limit_carries_cursor() {
        let batch = ExportBatch::from_lookahead((10..14).map(entry).collect(), 3);
        assert_eq!(batch.entries.len(), 3);
        assert!(batch.truncated);
        assert_eq!(batch.next_after_seq, Some(12));
    }

    #[test]
    fn test_chain_report_serializes() {
        let report = ChainReport {
            valid: false,
            entries: 4,
            first_invalid_seq: Some(2),
        };
        let json = serde_json::to_value(report).unwrap();
        assert_eq!(json["valid"], false);
        assert_eq!(json["first_invalid_seq"], 2);
    }
}
