/// Authentication and authorization
///
/// # Modules
///
/// - [`password`]: Argon2id password hashing and strength policy
/// - [`jwt`]: JWT token generation and validation
/// - [`identity`]: Resolves a bearer token to user, organization and role
/// - [`permissions`]: Static permission table and the authorization decision
///
/// # Example
///
/// ```no_run
/// use tasktrail_shared::auth::identity::resolve;
/// use tasktrail_shared::auth::jwt::JwtVerifier;
/// use tasktrail_shared::auth::permissions::{require, Action, ResourceKind, Verb};
/// use sqlx::PgPool;
/// use uuid::Uuid;
///
/// # async fn example(pool: PgPool, token: &str, task_org: Uuid) -> Result<(), Box<dyn std::error::Error>> {
/// let caller = resolve(&JwtVerifier::new("secret-at-least-32-characters-long"), &pool, token).await?;
/// require(&caller, Action::new(ResourceKind::Task, Verb::Update), task_org, None)?;
/// # Ok(())
/// # }
/// ```

pub mod identity;
pub mod jwt;
pub mod password;
pub mod permissions;
