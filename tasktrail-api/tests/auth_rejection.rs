/// Bearer token rejection at the router edge
///
/// None of these requests reach the database: the token is rejected before
/// the user directory is consulted.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Duration;
use common::{offline_app, TEST_SECRET};
use serde_json::Value;
use tasktrail_shared::auth::jwt::{create_token, Claims, TokenType};
use tower::Service as _;
use uuid::Uuid;

async fn get(uri: &str, authorization: Option<String>) -> (StatusCode, axum::http::HeaderMap, Value) {
    let mut builder = Request::builder().uri(uri);
    if let Some(value) = authorization {
        builder = builder.header("authorization", value);
    }

    let response = offline_app()
        .call(builder.body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, headers, body)
}

#[tokio::test]
async fn test_missing_header_is_unauthorized() {
    let (status, _, body) = get("/v1/tasks", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");
}

#[tokio::test]
async fn test_wrong_scheme_is_unauthorized() {
    let (status, _, _) = get("/v1/audit/logs", Some("Basic dXNlcjpwYXNz".to_string())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_malformed_token_is_unauthorized() {
    let (status, _, _) = get("/v1/organization", Some("Bearer not-a-jwt".to_string())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_expired_token_is_unauthorized() {
    let claims = Claims::with_expiration(Uuid::new_v4(), TokenType::Access, Duration::hours(-2));
    let token = create_token(&claims, TEST_SECRET).unwrap();

    let (status, _, _) = get("/v1/users", Some(format!("Bearer {}", token))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_refresh_token_cannot_authenticate() {
    let claims = Claims::new(Uuid::new_v4(), TokenType::Refresh);
    let token = create_token(&claims, TEST_SECRET).unwrap();

    let (status, _, _) = get("/v1/tasks", Some(format!("Bearer {}", token))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_token_signed_with_other_secret() {
    let claims = Claims::new(Uuid::new_v4(), TokenType::Access);
    let token = create_token(&claims, "some-other-secret-that-is-also-32-bytes-long").unwrap();

    let (status, _, _) = get("/v1/tasks", Some(format!("Bearer {}", token))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_rejections_carry_security_headers() {
    let (status, headers, _) = get("/v1/sprints", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(headers["x-content-type-options"], "nosniff");
    assert_eq!(headers["x-frame-options"], "DENY");
    assert!(headers.get("strict-transport-security").is_none());
}
