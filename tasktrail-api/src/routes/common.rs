//! Request helpers shared by the resource handlers

use axum::http::{header, HeaderMap};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value as JsonValue};

pub const DEFAULT_PER_PAGE: i64 = 20;
pub const MAX_PER_PAGE: i64 = 100;
pub const MAX_PAGE: i64 = 100_000;

/// `?page=&per_page=` query parameters (1-based pages)
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Pagination {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl Pagination {
    pub fn page(&self) -> i64 {
        self.page.unwrap_or(1).clamp(1, MAX_PAGE)
    }

    pub fn per_page(&self) -> i64 {
        self.per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE)
    }

    pub fn offset(&self) -> i64 {
        (self.page() - 1).saturating_mul(self.per_page())
    }
}

/// A page of results
#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: i64,
    pub per_page: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<i64>,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, pagination: &Pagination, total: Option<i64>) -> Self {
        Self {
            items,
            page: pagination.page(),
            per_page: pagination.per_page(),
            total,
        }
    }
}

/// Distinguishes an absent field from an explicit `null`
///
/// Use with `#[serde(default, deserialize_with = "double_option")]` on an
/// `Option<Option<T>>`: missing leaves `None`, `null` gives `Some(None)`.
pub fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Client context stored as audit metadata
pub fn request_metadata(headers: &HeaderMap) -> JsonValue {
    let user_agent = headers.get(header::USER_AGENT).and_then(|v| v.to_str().ok());

    // First hop is the original client
    let client_ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim);

    json!({
        "user_agent": user_agent,
        "client_ip": client_ip,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[derive(Debug, Deserialize)]
    struct Patch {
        #[serde(default, deserialize_with = "double_option")]
        description: Option<Option<String>>,
    }

    #[test]
    fn test_pagination_defaults_and_bounds() {
        let p = Pagination::default();
        assert_eq!((p.page(), p.per_page(), p.offset()), (1, DEFAULT_PER_PAGE, 0));

        let p = Pagination {
            page: Some(3),
            per_page: Some(1000),
        };
        assert_eq!(p.per_page(), MAX_PER_PAGE);
        assert_eq!(p.offset(), 2 * MAX_PER_PAGE);

        let p = Pagination {
            page: Some(-4),
            per_page: Some(0),
        };
        assert_eq!((p.page(), p.per_page(), p.offset()), (1, 1, 0));
    }

    #[test]
    fn test_huge_page_does_not_overflow() {
        let p = Pagination {
            page: Some(i64::MAX),
            per_page: Some(MAX_PER_PAGE),
        };
        assert_eq!(p.page(), MAX_PAGE);
        assert_eq!(p.offset(), (MAX_PAGE - 1) * MAX_PER_PAGE);
    }

    #[test]
    fn test_double_option() {
        let absent: Patch = serde_json::from_str("{}").unwrap();
        assert_eq!(absent.description, None);

        let cleared: Patch = serde_json::from_str(r#"{"description": null}"#).unwrap();
        assert_eq!(cleared.description, Some(None));

        let set: Patch = serde_json::from_str(r#"{"description": "x"}"#).unwrap();
        assert_eq!(set.description, Some(Some("x".to_string())));
    }

    #[test]
    fn test_request_metadata() {
        let mut headers = HeaderMap::new();
        headers.insert(header::USER_AGENT, HeaderValue::from_static("curl/8.0"));
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));

        let meta = request_metadata(&headers);
        assert_eq!(meta["user_agent"], "curl/8.0");
        assert_eq!(meta["client_ip"], "203.0.113.7");

        let empty = request_metadata(&HeaderMap::new());
        assert!(empty["user_agent"].is_null());
    }
}
