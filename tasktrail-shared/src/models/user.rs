/// User model and database operations
///
/// Every user belongs to exactly one organization and carries exactly one
/// role within it. Users are never physically deleted; deactivation flips
/// `is_active` so audit entries keep pointing at a real row.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE users (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     organization_id UUID NOT NULL REFERENCES organizations(id),
///     email VARCHAR(255) NOT NULL UNIQUE,
///     name VARCHAR(255) NOT NULL,
///     password_hash VARCHAR(255) NOT NULL,
///     role user_role NOT NULL DEFAULT 'employee',
///     is_active BOOLEAN NOT NULL DEFAULT TRUE,
///     deactivated_at TIMESTAMPTZ,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     last_login_at TIMESTAMPTZ
/// );
/// ```
///
/// # Example
///
/// ```no_run
/// use tasktrail_shared::models::user::{CreateUser, Role, User};
/// use tasktrail_shared::db::pool::{create_pool, DatabaseConfig};
/// use uuid::Uuid;
///
/// # async fn example(organization_id: Uuid) -> Result<(), Box<dyn std::error::Error>> {
/// let pool = create_pool(DatabaseConfig::default()).await?;
///
/// let user = User::create(&pool, CreateUser {
///     organization_id,
///     email: "dana@example.com".to_string(),
///     name: "Dana".to_string(),
///     password_hash: "$argon2id$...".to_string(),
///     role: Role::Employee,
/// }).await?;
///
/// let found = User::find_by_email(&pool, "Dana@Example.com").await?;
/// assert_eq!(found.map(|u| u.id), Some(user.id));
/// # Ok(())
/// # }
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgExecutor, PgPool};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

const USER_COLUMNS: &str = "id, organization_id, email, name, password_hash, role, is_active, \
                            deactivated_at, created_at, updated_at, last_login_at";

/// Organization roles, ordered Owner > Manager > Employee
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Full control of the organization, including settings and ownership grants
    Owner,

    /// Manages people, sprints and audit review
    Manager,

    /// Works on tasks
    Employee,
}

impl Role {
    /// All roles, highest first
    pub const ALL: [Role; 3] = [Role::Owner, Role::Manager, Role::Employee];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Manager => "manager",
            Role::Employee => "employee",
        }
    }

    /// Checks if this role meets or exceeds the required role
    pub fn has_permission(&self, required: &Role) -> bool {
        self.permission_level() >= required.permission_level()
    }

    /// Numeric level used for ordering; only relative values matter
    pub fn permission_level(&self) -> u8 {
        match self {
            Role::Owner => 3,
            Role::Manager => 2,
            Role::Employee => 1,
        }
    }
}

/// Error parsing a role name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown role '{0}'")]
pub struct ParseRoleError(pub String);

impl FromStr for Role {
    type Err = ParseRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner" => Ok(Role::Owner),
            "manager" => Ok(Role::Manager),
            "employee" => Ok(Role::Employee),
            _ => Err(ParseRoleError(s.to_string())),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User account scoped to a single organization
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,

    /// Owning organization; fixed for the lifetime of the account
    pub organization_id: Uuid,

    /// Lowercased email address, unique across all organizations
    pub email: String,

    pub name: String,

    /// Argon2id hash, never serialized out
    #[serde(skip_serializing)]
    pub password_hash: String,

    pub role: Role,

    /// Deactivated users cannot authenticate
    pub is_active: bool,

    pub deactivated_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    pub last_login_at: Option<DateTime<Utc>>,
}

/// Input for creating a new user
#[derive(Debug, Clone)]
pub struct CreateUser {
    pub organization_id: Uuid,

    /// Normalized to lowercase before insert
    pub email: String,

    pub name: String,

    /// Argon2id password hash (NOT plaintext password!)
    pub password_hash: String,

    pub role: Role,
}

/// Profile fields a manager may change on a user
///
/// Role and activation have their own operations so they can be
/// authorized and audited separately.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateUser {
    pub name: Option<String>,
    pub email: Option<String>,
}

/// Normalizes an email address for storage and lookup
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

impl User {
    /// Creates a new user
    ///
    /// # Errors
    ///
    /// Returns an error if the email already exists or the organization
    /// does not exist.
    pub async fn create<'e, E>(executor: E, data: CreateUser) -> Result<Self, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let query = format!(
            "INSERT INTO users (organization_id, email, name, password_hash, role) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {}",
            USER_COLUMNS
        );

        sqlx::query_as::<_, User>(&query)
            .bind(data.organization_id)
            .bind(normalize_email(&data.email))
            .bind(data.name)
            .bind(data.password_hash)
            .bind(data.role)
            .fetch_one(executor)
            .await
    }

    /// Finds a user by ID
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use tasktrail_shared::models::user::User;
    /// # use sqlx::PgPool;
    /// # use uuid::Uuid;
    /// # async fn example(pool: PgPool, user_id: Uuid) -> Result<(), sqlx::Error> {
    /// if let Some(user) = User::find_by_id(&pool, user_id).await? {
    ///     println!("{} is {}", user.email, user.role);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn find_by_id<'e, E>(executor: E, id: Uuid) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let query = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);

        sqlx::query_as::<_, User>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    /// Finds a user and locks the row until the transaction ends
    pub async fn find_for_update<'e, E>(executor: E, id: Uuid) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let query = format!("SELECT {} FROM users WHERE id = $1 FOR UPDATE", USER_COLUMNS);

        sqlx::query_as::<_, User>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    /// Locks every active owner of an organization, in id order
    ///
    /// Returns their ids. Taken before any single user row is locked so
    /// concurrent demotions serialize instead of deadlocking.
    pub async fn lock_active_owners<'e, E>(executor: E, organization_id: Uuid) -> Result<Vec<Uuid>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM users WHERE organization_id = $1 AND role = 'owner' AND is_active \
             ORDER BY id FOR UPDATE",
        )
        .bind(organization_id)
        .fetch_all(executor)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Finds a user by email address (case-insensitive)
    pub async fn find_by_email(pool: &PgPool, email: &str) -> Result<Option<Self>, sqlx::Error> {
        let query = format!("SELECT {} FROM users WHERE email = $1", USER_COLUMNS);

        sqlx::query_as::<_, User>(&query)
            .bind(normalize_email(email))
            .fetch_optional(pool)
            .await
    }

    /// Lists users of one organization, optionally filtered by role
    ///
    /// Ordered by name so pages are stable for directory views.
    pub async fn list_by_organization(
        pool: &PgPool,
        organization_id: Uuid,
        role: Option<Role>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let users = if let Some(role) = role {
            let query = format!(
                "SELECT {} FROM users WHERE organization_id = $1 AND role = $2 \
                 ORDER BY name ASC, id ASC LIMIT $3 OFFSET $4",
                USER_COLUMNS
            );
            sqlx::query_as::<_, User>(&query)
                .bind(organization_id)
                .bind(role)
                .bind(limit)
                .bind(offset)
                .fetch_all(pool)
                .await?
        } else {
            let query = format!(
                "SELECT {} FROM users WHERE organization_id = $1 \
                 ORDER BY name ASC, id ASC LIMIT $2 OFFSET $3",
                USER_COLUMNS
            );
            sqlx::query_as::<_, User>(&query)
                .bind(organization_id)
                .bind(limit)
                .bind(offset)
                .fetch_all(pool)
                .await?
        };

        Ok(users)
    }

    /// Counts users in an organization
    pub async fn count_by_organization(
        pool: &PgPool,
        organization_id: Uuid,
    ) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM users WHERE organization_id = $1")
                .bind(organization_id)
                .fetch_one(pool)
                .await?;

        Ok(count)
    }

    /// Updates profile fields
    ///
    /// Only non-None fields in `data` are written. Returns None if the user
    /// doesn't exist.
    pub async fn update<'e, E>(
        executor: E,
        id: Uuid,
        data: UpdateUser,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        // Build dynamic update query based on which fields are present
        let mut query = String::from("UPDATE users SET updated_at = NOW()");
        let mut bind_count = 1;

        if data.name.is_some() {
            bind_count += 1;
            query.push_str(&format!(", name = ${}", bind_count));
        }
        if data.email.is_some() {
            bind_count += 1;
            query.push_str(&format!(", email = ${}", bind_count));
        }

        query.push_str(&format!(" WHERE id = $1 RETURNING {}", USER_COLUMNS));

        let mut q = sqlx::query_as::<_, User>(&query).bind(id);

        if let Some(name) = data.name {
            q = q.bind(name);
        }
        if let Some(email) = data.email {
            q = q.bind(normalize_email(&email));
        }

        q.fetch_optional(executor).await
    }

    /// Changes a user's role
    pub async fn set_role<'e, E>(executor: E, id: Uuid, role: Role) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let query = format!(
            "UPDATE users SET role = $2, updated_at = NOW() WHERE id = $1 RETURNING {}",
            USER_COLUMNS
        );

        sqlx::query_as::<_, User>(&query)
            .bind(id)
            .bind(role)
            .fetch_optional(executor)
            .await
    }

    /// Soft-deactivates a user
    ///
    /// Idempotent on the row, but callers should reject deactivating an
    /// already inactive user so no empty audit entry is written.
    pub async fn deactivate<'e, E>(executor: E, id: Uuid) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let query = format!(
            "UPDATE users SET is_active = FALSE, deactivated_at = COALESCE(deactivated_at, NOW()), \
             updated_at = NOW() WHERE id = $1 RETURNING {}",
            USER_COLUMNS
        );

        sqlx::query_as::<_, User>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    /// Updates the last login timestamp for a user
    pub async fn update_last_login<'e, E>(executor: E, id: Uuid) -> Result<bool, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query("UPDATE users SET last_login_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(executor)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_ordering() {
        assert!(Role::Owner.has_permission(&Role::Manager));
        assert!(Role::Owner.has_permission(&Role::Employee));
        assert!(Role::Manager.has_permission(&Role::Employee));
        assert!(Role::Manager.has_permission(&Role::Manager));

        assert!(!Role::Manager.has_permission(&Role::Owner));
        assert!(!Role::Employee.has_permission(&Role::Manager));
    }

    #[test]
    fn test_role_all_is_highest_first() {
        let levels: Vec<u8> = Role::ALL.iter().map(|r| r.permission_level()).collect();
        assert_eq!(levels, vec![3, 2, 1]);
    }

    #[test]
    fn test_role_string_conversion() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>(), Ok(role));
            assert_eq!(role.to_string(), role.as_str());
        }
        assert_eq!("admin".parse::<Role>(), Err(ParseRoleError("admin".to_string())));
        assert!("Owner".parse::<Role>().is_err());
    }

    #[test]
    fn test_role_serde_lowercase() {
        let json = serde_json::to_string(&Role::Manager).unwrap();
        assert_eq!(json, "\"manager\"");
        let parsed: Role = serde_json::from_str("\"employee\"").unwrap();
        assert_eq!(parsed, Role::Employee);
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Dana@Example.COM "), "dana@example.com");
    }

    #[test]
    fn test_password_hash_not_serialized() {
        let user = User {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            email: "dana@example.com".to_string(),
            name: "Dana".to_string(),
            password_hash: "$argon2id$secret".to_string(),
            role: Role::Employee,
            is_active: true,
            deactivated_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_login_at: None,
        };

        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["role"], "employee");
    }

    #[test]
    fn test_update_user_default() {
        let update = UpdateUser::default();
        assert!(update.name.is_none());
        assert!(update.email.is_none());
    }
}
