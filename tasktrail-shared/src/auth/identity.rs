/// Identity resolution
///
/// Turns a bearer credential into a [`CallerIdentity`]: who is calling,
/// which organization they belong to and what role they hold there.
///
/// # Flow
///
/// 1. The [`TokenVerifier`] checks the credential and yields a user ID
/// 2. The [`UserDirectory`] loads the user record
/// 3. Inactive users are rejected with [`IdentityError::AccountDisabled`]
///
/// Organization and role always come from the directory, never from the
/// credential, so every request sees the current role.
///
/// # Example
///
/// ```no_run
/// use tasktrail_shared::auth::identity::resolve;
/// use tasktrail_shared::auth::jwt::JwtVerifier;
/// use sqlx::PgPool;
///
/// # async fn example(pool: PgPool, token: &str) -> Result<(), Box<dyn std::error::Error>> {
/// let verifier = JwtVerifier::new("secret-at-least-32-characters-long");
/// let caller = resolve(&verifier, &pool, token).await?;
/// println!("{} acts as {} in {}", caller.user_id, caller.role, caller.organization_id);
/// # Ok(())
/// # }
/// ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use super::jwt::JwtError;
use crate::models::organization::Organization;
use crate::models::user::{Role, User};

/// The authenticated caller of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    pub user_id: Uuid,
    pub organization_id: Uuid,
    pub role: Role,
}

impl CallerIdentity {
    /// Builds an identity from a user record
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::AccountDisabled`] for inactive users.
    pub fn from_user(user: &User) -> Result<Self, IdentityError> {
        if !user.is_active {
            return Err(IdentityError::AccountDisabled(user.id));
        }

        Ok(Self {
            user_id: user.id,
            organization_id: user.organization_id,
            role: user.role,
        })
    }
}

/// Identity resolution failures
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// Credential missing, malformed, expired, or naming no known user
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// User exists but has been deactivated
    #[error("Account {0} is disabled")]
    AccountDisabled(Uuid),

    /// User store unreachable
    #[error("Identity lookup failed: {0}")]
    PersistenceFailure(#[from] sqlx::Error),
}

impl From<JwtError> for IdentityError {
    fn from(err: JwtError) -> Self {
        IdentityError::Unauthenticated(err.to_string())
    }
}

/// A credential that passed verification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifiedToken {
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// Verifies bearer credentials
pub trait TokenVerifier: Send + Sync {
    /// Checks signature and expiry and returns the subject
    fn verify(&self, token: &str) -> Result<VerifiedToken, JwtError>;
}

/// Read access to users and organizations
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, sqlx::Error>;

    async fn get_organization(&self, organization_id: Uuid) -> Result<Option<Organization>, sqlx::Error>;
}

#[async_trait]
impl UserDirectory for PgPool {
    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, sqlx::Error> {
        User::find_by_id(self, user_id).await
    }

    async fn get_organization(&self, organization_id: Uuid) -> Result<Option<Organization>, sqlx::Error> {
        Organization::find_by_id(self, organization_id).await
    }
}

/// Resolves a bearer credential to the calling identity
///
/// # Errors
///
/// - [`IdentityError::Unauthenticated`] if the credential fails verification
///   or names a user that doesn't exist
/// - [`IdentityError::AccountDisabled`] if the user is inactive
/// - [`IdentityError::PersistenceFailure`] if the directory lookup fails
pub async fn resolve<V, D>(verifier: &V, directory: &D, token: &str) -> Result<CallerIdentity, IdentityError>
where
    V: TokenVerifier + ?Sized,
    D: UserDirectory + ?Sized,
{
    let verified = verifier.verify(token)?;

    let user = directory
        .get_user(verified.user_id)
        .await?
        .ok_or_else(|| IdentityError::Unauthenticated("Unknown user".to_string()))?;

    let identity = CallerIdentity::from_user(&user)?;

    tracing::debug!(
        user_id = %identity.user_id,
        organization_id = %identity.organization_id,
        role = %identity.role,
        "Resolved caller identity"
    );

    Ok(identity)
}
