/// Audit recorder
///
/// Records one [`AuditLogEntry`] per successful mutation. The recorder runs
/// on the same connection as the mutation, normally an open transaction,
/// so either both the change and its entry commit or neither does.
///
/// # Modules
///
/// - [`export`]: Read-only queries over recorded entries
///
/// # Example
///
/// ```no_run
/// use tasktrail_shared::audit::{record, AuditRecord};
/// use tasktrail_shared::auth::identity::CallerIdentity;
/// use tasktrail_shared::auth::permissions::{ResourceKind, Verb};
/// use tasktrail_shared::models::task::{Task, TaskStatus};
/// use sqlx::PgPool;
///
/// # async fn example(pool: PgPool, caller: CallerIdentity, before: Task) -> Result<(), Box<dyn std::error::Error>> {
/// let mut tx = pool.begin().await?;
///
/// let after = Task::set_status(&mut *tx, before.id, TaskStatus::Done).await?.unwrap();
/// let entry = AuditRecord::new(&caller, Verb::StatusChange, ResourceKind::Task, after.id)
///     .in_organization(after.organization_id)
///     .before(&before)?
///     .after(&after)?;
/// record(&mut tx, entry).await?;
///
/// tx.commit().await?;
/// # Ok(())
/// # }
/// ```

pub mod export;

use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::auth::identity::CallerIdentity;
use crate::auth::permissions::{ResourceKind, Verb};
use crate::models::audit_log::{AppendAuditEntry, AuditLogEntry};

/// Audit recorder failures
///
/// Every variant means the surrounding mutation must not commit.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// Entry targets an organization other than the actor's
    #[error("Audit entry for organization {target_org} recorded by actor from {actor_org}")]
    CrossOrganizationAccess { actor_org: Uuid, target_org: Uuid },

    /// Entry could not be written
    #[error("Audit log write failed: {0}")]
    PersistenceFailure(#[from] sqlx::Error),

    /// Before/after state could not be captured
    #[error("Failed to serialize audit state: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A pending audit entry
///
/// Built from the caller identity so actor and organization can't be mixed
/// up; [`AuditRecord::in_organization`] names the resource's organization
/// when it has been loaded separately.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    actor_id: Uuid,
    actor_org: Uuid,
    organization_id: Uuid,
    verb: Verb,
    resource: ResourceKind,
    resource_id: Uuid,
    before_state: Option<JsonValue>,
    after_state: Option<JsonValue>,
    metadata: JsonValue,
}

impl AuditRecord {
    pub fn new(caller: &CallerIdentity, verb: Verb, resource: ResourceKind, resource_id: Uuid) -> Self {
        Self {
            actor_id: caller.user_id,
            actor_org: caller.organization_id,
            organization_id: caller.organization_id,
            verb,
            resource,
            resource_id,
            before_state: None,
            after_state: None,
            metadata: json!({}),
        }
    }

    /// Sets the organization the affected resource belongs to
    pub fn in_organization(mut self, organization_id: Uuid) -> Self {
        self.organization_id = organization_id;
        self
    }

    /// Captures the resource state before the mutation
    pub fn before<T: Serialize>(mut self, state: &T) -> Result<Self, AuditError> {
        self.before_state = Some(serde_json::to_value(state)?);
        Ok(self)
    }

    /// Captures the resource state after the mutation
    pub fn after<T: Serialize>(mut self, state: &T) -> Result<Self, AuditError> {
        self.after_state = Some(serde_json::to_value(state)?);
        Ok(self)
    }

    /// Attaches free-form context (client address, reason, ...)
    pub fn with_metadata(mut self, metadata: JsonValue) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn organization_id(&self) -> Uuid {
        self.organization_id
    }

    /// Checks the entry before anything is written
    pub fn validate(&self) -> Result<(), AuditError> {
        if self.actor_org != self.organization_id {
            return Err(AuditError::CrossOrganizationAccess {
                actor_org: self.actor_org,
                target_org: self.organization_id,
            });
        }

        Ok(())
    }

    fn into_append(self) -> AppendAuditEntry {
        AppendAuditEntry {
            organization_id: self.organization_id,
            actor_id: self.actor_id,
            action: self.verb.as_str().to_string(),
            resource_type: self.resource.as_str().to_string(),
            resource_id: self.resource_id,
            before_state: self.before_state,
            after_state: self.after_state,
            metadata: self.metadata,
        }
    }
}

/// Appends an audit entry on the mutation's connection
///
/// Pass the open transaction (`&mut tx`) the mutation ran on. A failure
/// here must abort that transaction; the caller returns the error and the
/// dropped transaction rolls back.
///
/// # Errors
///
/// - [`AuditError::CrossOrganizationAccess`] if the entry's organization
///   isn't the actor's
/// - [`AuditError::PersistenceFailure`] if the write fails
pub async fn record(conn: &mut PgConnection, entry: AuditRecord) -> Result<AuditLogEntry, AuditError> {
    entry.validate()?;

    let append = entry.into_append();
    let organization_id = append.organization_id;
    let action = append.action.clone();
    let resource_type = append.resource_type.clone();
    let resource_id = append.resource_id;

    let stored = AuditLogEntry::append(conn, append).await.map_err(|e| {
        tracing::error!(
            organization_id = %organization_id,
            action = %action,
            resource_type = %resource_type,
            resource_id = %resource_id,
            error = %e,
            "Audit append failed, aborting mutation"
        );
        AuditError::PersistenceFailure(e)
    })?;

    tracing::debug!(
        organization_id = %stored.organization_id,
        seq = stored.seq,
        action = %stored.action,
        resource_type = %stored.resource_type,
        resource_id = %stored.resource_id,
        "Audit entry recorded"
    );

    Ok(stored)
}
