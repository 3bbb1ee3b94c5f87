/// Audit log model and database operations
///
/// Audit entries are append-only and hash chained per organization. Each
/// entry carries:
/// - `seq`: gap-free sequence within the organization, starting at 0
/// - `hash_prev`: `hash_curr` of the entry before it (NULL for seq=0)
/// - `hash_curr`: SHA-256 over the previous hash and every recorded field
///
/// Rewriting or dropping any stored entry breaks the chain, and
/// [`AuditLogEntry::verify_chain`] reports it. The table itself rejects
/// UPDATE, DELETE and TRUNCATE through triggers.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE audit_logs (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     organization_id UUID NOT NULL REFERENCES organizations(id),
///     seq BIGINT NOT NULL,
///     ts TIMESTAMPTZ NOT NULL,
///     actor_id UUID NOT NULL REFERENCES users(id),
///     action VARCHAR(50) NOT NULL,
///     resource_type VARCHAR(50) NOT NULL,
///     resource_id UUID NOT NULL,
///     before_state JSONB,
///     after_state JSONB,
///     metadata JSONB NOT NULL DEFAULT '{}',
///     hash_prev BYTEA,
///     hash_curr BYTEA NOT NULL,
///     UNIQUE (organization_id, seq)
/// );
/// ```
///
/// Writes go through [`crate::audit::record`], which validates the entry
/// before calling [`AuditLogEntry::append`].

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

const AUDIT_COLUMNS: &str = "id, organization_id, seq, ts, actor_id, action, resource_type, \
                             resource_id, before_state, after_state, metadata, hash_prev, hash_curr";

/// Binds filter values in the order [`where_clause`] numbered them
macro_rules! bind_filter {
    ($q:expr, $filter:expr) => {{
        let mut q = $q;
        if let Some(from) = $filter.from {
            q = q.bind(from);
        }
        if let Some(to) = $filter.to {
            q = q.bind(to);
        }
        if let Some(actor_id) = $filter.actor_id {
            q = q.bind(actor_id);
        }
        if let Some(action) = $filter.action.clone() {
            q = q.bind(action);
        }
        if let Some(resource_type) = $filter.resource_type.clone() {
            q = q.bind(resource_type);
        }
        if let Some(resource_id) = $filter.resource_id {
            q = q.bind(resource_id);
        }
        if let Some(after_seq) = $filter.after_seq {
            q = q.bind(after_seq);
        }
        q
    }};
}

/// One recorded mutation
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuditLogEntry {
    pub id: Uuid,

    pub organization_id: Uuid,

    /// Sequence number (monotonic within organization, starting at 0)
    pub seq: i64,

    /// Never earlier than the previous entry's timestamp
    pub ts: DateTime<Utc>,

    pub actor_id: Uuid,

    /// Verb, e.g. `create`, `status_change`
    pub action: String,

    /// Resource kind, e.g. `task`, `sprint`
    pub resource_type: String,

    pub resource_id: Uuid,

    pub before_state: Option<JsonValue>,

    pub after_state: Option<JsonValue>,

    pub metadata: JsonValue,

    #[serde(with = "hex_opt")]
    pub hash_prev: Option<Vec<u8>>,

    #[serde(with = "hex_bytes")]
    pub hash_curr: Vec<u8>,
}

/// Input for appending a new entry
#[derive(Debug, Clone)]
pub struct AppendAuditEntry {
    pub organization_id: Uuid,
    pub actor_id: Uuid,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Uuid,
    pub before_state: Option<JsonValue>,
    pub after_state: Option<JsonValue>,
    pub metadata: JsonValue,
}

/// Field set covered by the chain hash
#[derive(Debug, Clone, Copy)]
pub struct HashInput<'a> {
    pub organization_id: Uuid,
    pub seq: i64,
    pub ts: DateTime<Utc>,
    pub actor_id: Uuid,
    pub action: &'a str,
    pub resource_type: &'a str,
    pub resource_id: Uuid,
    pub before_state: Option<&'a JsonValue>,
    pub after_state: Option<&'a JsonValue>,
    pub metadata: &'a JsonValue,
}

/// Read filters; every field narrows the result
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    /// Inclusive lower bound on `ts`
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `ts`
    pub to: Option<DateTime<Utc>>,
    pub actor_id: Option<Uuid>,
    pub action: Option<String>,
    pub resource_type: Option<String>,
    pub resource_id: Option<Uuid>,
    /// Exclusive lower bound on `seq`; the export cursor
    pub after_seq: Option<i64>,
}

/// Grouping key for summary counts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditGrouping {
    Action,
    ResourceType,
    Actor,
    Day,
}

impl AuditGrouping {
    fn sql_expr(&self) -> &'static str {
        match self {
            AuditGrouping::Action => "action",
            AuditGrouping::ResourceType => "resource_type",
            AuditGrouping::Actor => "actor_id::text",
            AuditGrouping::Day => "to_char(date_trunc('day', ts AT TIME ZONE 'UTC'), 'YYYY-MM-DD')",
        }
    }
}

/// One bucket of a grouped count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct GroupCount {
    pub key: String,
    pub count: i64,
}

impl AuditLogEntry {
    /// Computes the chain hash for an entry
    ///
    /// Variable-length text fields are NUL terminated so adjacent fields
    /// cannot be shifted into each other.
    ///
    /// # Example
    ///
    /// ```
    /// use tasktrail_shared::models::audit_log::{AuditLogEntry, HashInput};
    /// use chrono::Utc;
    /// use serde_json::json;
    /// use uuid::Uuid;
    ///
    /// let metadata = json!({});
    /// let hash = AuditLogEntry::compute_hash(None, &HashInput {
    ///     organization_id: Uuid::new_v4(),
    ///     seq: 0,
    ///     ts: Utc::now(),
    ///     actor_id: Uuid::new_v4(),
    ///     action: "create",
    ///     resource_type: "task",
    ///     resource_id: Uuid::new_v4(),
    ///     before_state: None,
    ///     after_state: None,
    ///     metadata: &metadata,
    /// });
    /// assert_eq!(hash.len(), 32);
    /// ```
    pub fn compute_hash(hash_prev: Option<&[u8]>, input: &HashInput<'_>) -> Vec<u8> {
        let mut hasher = Sha256::new();

        if let Some(prev) = hash_prev {
            hasher.update(prev);
        }

        hasher.update(input.seq.to_le_bytes());
        hasher.update(input.organization_id.as_bytes());
        hasher.update(input.ts.timestamp_micros().to_le_bytes());
        hasher.update(input.actor_id.as_bytes());
        hasher.update(input.action.as_bytes());
        hasher.update([0u8]);
        hasher.update(input.resource_type.as_bytes());
        hasher.update([0u8]);
        hasher.update(input.resource_id.as_bytes());

        for state in [input.before_state, input.after_state] {
            match state {
                Some(value) => {
                    hasher.update([1u8]);
                    hasher.update(serde_json::to_vec(value).unwrap_or_default());
                }
                None => hasher.update([0u8]),
            }
        }

        hasher.update(serde_json::to_vec(input.metadata).unwrap_or_default());

        hasher.finalize().to_vec()
    }

    /// Hash input view of a stored entry
    pub fn hash_input(&self) -> HashInput<'_> {
        HashInput {
            organization_id: self.organization_id,
            seq: self.seq,
            ts: self.ts,
            actor_id: self.actor_id,
            action: &self.action,
            resource_type: &self.resource_type,
            resource_id: self.resource_id,
            before_state: self.before_state.as_ref(),
            after_state: self.after_state.as_ref(),
            metadata: &self.metadata,
        }
    }

    /// Appends an entry on the caller's connection
    ///
    /// Takes a transaction-scoped advisory lock on the organization so
    /// concurrent appenders serialize, then:
    /// - determines the next sequence number
    /// - clamps the timestamp so it never goes backwards
    /// - chains the hash onto the previous entry
    ///
    /// Run it on the same transaction as the mutation it describes; the
    /// lock and the row both disappear if that transaction rolls back.
    pub async fn append(conn: &mut PgConnection, data: AppendAuditEntry) -> Result<Self, sqlx::Error> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1::text, 0))")
            .bind(data.organization_id)
            .execute(&mut *conn)
            .await?;

        let last: Option<(i64, DateTime<Utc>, Vec<u8>)> = sqlx::query_as(
            "SELECT seq, ts, hash_curr FROM audit_logs WHERE organization_id = $1 \
             ORDER BY seq DESC LIMIT 1",
        )
        .bind(data.organization_id)
        .fetch_optional(&mut *conn)
        .await?;

        // Postgres stores microseconds; hash what will be read back.
        let now = Utc::now().trunc_subsecs(6);
        let (seq, ts, hash_prev) = match last {
            Some((last_seq, last_ts, last_hash)) => (last_seq + 1, now.max(last_ts), Some(last_hash)),
            None => (0, now, None),
        };

        let hash_curr = Self::compute_hash(
            hash_prev.as_deref(),
            &HashInput {
                organization_id: data.organization_id,
                seq,
                ts,
                actor_id: data.actor_id,
                action: &data.action,
                resource_type: &data.resource_type,
                resource_id: data.resource_id,
                before_state: data.before_state.as_ref(),
                after_state: data.after_state.as_ref(),
                metadata: &data.metadata,
            },
        );

        let query = format!(
            "INSERT INTO audit_logs (organization_id, seq, ts, actor_id, action, resource_type, \
             resource_id, before_state, after_state, metadata, hash_prev, hash_curr) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) RETURNING {}",
            AUDIT_COLUMNS
        );

        sqlx::query_as::<_, AuditLogEntry>(&query)
            .bind(data.organization_id)
            .bind(seq)
            .bind(ts)
            .bind(data.actor_id)
            .bind(data.action)
            .bind(data.resource_type)
            .bind(data.resource_id)
            .bind(data.before_state)
            .bind(data.after_state)
            .bind(data.metadata)
            .bind(hash_prev)
            .bind(hash_curr)
            .fetch_one(&mut *conn)
            .await
    }

    /// Lists entries of one organization in ascending sequence order
    pub async fn list(
        pool: &PgPool,
        organization_id: Uuid,
        filter: &AuditQuery,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let (clause, next_bind) = where_clause(filter);
        let query = format!(
            "SELECT {} FROM audit_logs WHERE organization_id = $1{} \
             ORDER BY seq ASC LIMIT ${} OFFSET ${}",
            AUDIT_COLUMNS,
            clause,
            next_bind,
            next_bind + 1
        );

        let q = sqlx::query_as::<_, AuditLogEntry>(&query).bind(organization_id);
        let q = bind_filter!(q, filter);

        q.bind(limit).bind(offset).fetch_all(pool).await
    }

    /// Counts entries matching a filter
    pub async fn count(
        pool: &PgPool,
        organization_id: Uuid,
        filter: &AuditQuery,
    ) -> Result<i64, sqlx::Error> {
        let (clause, _) = where_clause(filter);
        let query = format!(
            "SELECT COUNT(*) FROM audit_logs WHERE organization_id = $1{}",
            clause
        );

        let q = sqlx::query_as::<_, (i64,)>(&query).bind(organization_id);
        let q = bind_filter!(q, filter);

        let (count,) = q.fetch_one(pool).await?;
        Ok(count)
    }

    /// Counts entries per group, largest first
    pub async fn count_grouped(
        pool: &PgPool,
        organization_id: Uuid,
        grouping: AuditGrouping,
        filter: &AuditQuery,
    ) -> Result<Vec<GroupCount>, sqlx::Error> {
        let (clause, _) = where_clause(filter);
        let expr = grouping.sql_expr();
        let order = if grouping == AuditGrouping::Day {
            "key ASC"
        } else {
            "count DESC, key ASC"
        };
        let query = format!(
            "SELECT {expr} AS key, COUNT(*) AS count FROM audit_logs \
             WHERE organization_id = $1{clause} GROUP BY {expr} ORDER BY {order}"
        );

        let q = sqlx::query_as::<_, GroupCount>(&query).bind(organization_id);
        let q = bind_filter!(q, filter);

        q.fetch_all(pool).await
    }

    /// Loads the full chain of an organization
    pub async fn query_chain(pool: &PgPool, organization_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {} FROM audit_logs WHERE organization_id = $1 ORDER BY seq ASC",
            AUDIT_COLUMNS
        );

        sqlx::query_as::<_, AuditLogEntry>(&query)
            .bind(organization_id)
            .fetch_all(pool)
            .await
    }

    /// Verifies hash chain integrity for an organization
    ///
    /// Returns the sequence number of the first broken entry, or None if the
    /// whole chain checks out.
    pub async fn verify_chain(pool: &PgPool, organization_id: Uuid) -> Result<Option<i64>, sqlx::Error> {
        let entries = Self::query_chain(pool, organization_id).await?;
        Ok(first_broken_link(&entries))
    }
}

/// Walks a chain in sequence order and returns the first entry that fails
pub fn first_broken_link(entries: &[AuditLogEntry]) -> Option<i64> {
    let mut prev_hash: Option<&[u8]> = None;
    let mut prev_ts: Option<DateTime<Utc>> = None;

    for (expected_seq, entry) in entries.iter().enumerate() {
        if entry.seq != expected_seq as i64 {
            return Some(expected_seq as i64);
        }

        if entry.hash_prev.as_deref() != prev_hash {
            return Some(entry.seq);
        }

        if prev_ts.is_some_and(|ts| entry.ts < ts) {
            return Some(entry.seq);
        }

        let computed = AuditLogEntry::compute_hash(prev_hash, &entry.hash_input());
        if computed != entry.hash_curr {
            return Some(entry.seq);
        }

        prev_hash = Some(&entry.hash_curr);
        prev_ts = Some(entry.ts);
    }

    None
}

/// Builds the filter part of a WHERE clause; `$1` is always the organization
///
/// Returns the clause and the next free bind index.
fn where_clause(filter: &AuditQuery) -> (String, usize) {
    let mut clause = String::new();
    let mut bind_count = 1;

    if filter.from.is_some() {
        bind_count += 1;
        clause.push_str(&format!(" AND ts >= ${}", bind_count));
    }
    if filter.to.is_some() {
        bind_count += 1;
        clause.push_str(&format!(" AND ts < ${}", bind_count));
    }
    if filter.actor_id.is_some() {
        bind_count += 1;
        clause.push_str(&format!(" AND actor_id = ${}", bind_count));
    }
    if filter.action.is_some() {
        bind_count += 1;
        clause.push_str(&format!(" AND action = ${}", bind_count));
    }
    if filter.resource_type.is_some() {
        bind_count += 1;
        clause.push_str(&format!(" AND resource_type = ${}", bind_count));
    }
    if filter.resource_id.is_some() {
        bind_count += 1;
        clause.push_str(&format!(" AND resource_id = ${}", bind_count));
    }
    if filter.after_seq.is_some() {
        bind_count += 1;
        clause.push_str(&format!(" AND seq > ${}", bind_count));
    }

    (clause, bind_count + 1)
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

mod hex_opt {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => s.serialize_some(&hex::encode(b)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(d)?
            .map(|s| hex::decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
