/// Middleware for the API server
///
/// - `auth`: Bearer token resolution into a `CallerIdentity`
/// - `security`: Security response headers

pub mod auth;
pub mod security;
