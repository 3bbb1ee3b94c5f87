/// Bearer authentication
///
/// Resolves the `Authorization: Bearer <token>` header to a
/// [`CallerIdentity`] and stores it in the request extensions, where
/// handlers pick it up with `Extension<CallerIdentity>`. Role and
/// organization come from the user store on every request.

use crate::{app::AppState, error::ApiError};
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use tasktrail_shared::auth::identity::{self, CallerIdentity};

/// Extracts the bearer token from the request headers
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| ApiError::Unauthorized("Missing authorization header".to_string()))?
        .to_str()
        .map_err(|_| ApiError::Unauthorized("Malformed authorization header".to_string()))?;

    let token = value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::Unauthorized("Expected Bearer token".to_string()))?;

    Ok(token)
}

/// Authentication middleware for protected routes
pub async fn require_identity(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    // Owned so the request isn't borrowed across the lookup
    let token = bearer_token(req.headers())?.to_owned();
    let path = req.uri().path().to_owned();

    let caller: CallerIdentity = identity::resolve(&*state.verifier, &state.db, &token)
        .await
        .map_err(|e| {
            tracing::debug!(error = %e, path = %path, "Authentication failed");
            ApiError::from(e)
        })?;

    req.extensions_mut().insert(caller);

    Ok(next.run(req).await)
}
