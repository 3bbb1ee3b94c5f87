/// API route handlers
///
/// Handlers are organized by resource:
///
/// - `health`: Health check endpoint
/// - `auth`: Registration, login, token refresh, current identity
/// - `organization`: The caller's organization
/// - `users`: Directory, invitations, roles, deactivation
/// - `tasks`: Task CRUD and status changes
/// - `sprints`: Sprint CRUD and status changes
/// - `audit`: Read-only audit trail access
///
/// Mutating handlers follow one shape: authorize, open a transaction,
/// mutate, record the audit entry on the same transaction, commit.

pub mod audit;
pub mod auth;
pub mod health;
pub mod organization;
pub mod sprints;
pub mod tasks;
pub mod users;

mod common;
