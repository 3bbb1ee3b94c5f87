/// Database models for TaskTrail
///
/// # Models
///
/// - `organization`: Tenant boundary
/// - `user`: Accounts, roles and activation
/// - `task`: Work items
/// - `sprint`: Time boxes grouping tasks
/// - `audit_log`: Append-only, hash-chained record of mutations
///
/// Write operations take any `PgExecutor`, so they run equally on the pool
/// or inside a transaction next to the audit append.

pub mod audit_log;
pub mod organization;
pub mod sprint;
pub mod task;
pub mod user;
