//! # HTTP Response
//!
//! Response value built by handlers and adjusted by middleware.

use crate::error::Result;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::StatusCode;
use serde::Serialize;
use std::collections::HashMap;

/// HTTP response
#[derive(Debug, Clone)]
pub struct Response {
    /// HTTP status code
    pub status: u16,
    /// Response body
    pub body: String,
    /// Content type
    pub content_type: String,
    /// Response headers
    pub headers: HashMap<String, String>,
}

impl Default for Response {
    fn default() -> Self {
        Self {
            status: 200,
            body: String::new(),
            content_type: "application/json".to_string(),
            headers: HashMap::new(),
        }
    }
}

impl Response {
    fn with_body(body: impl Into<String>, content_type: &str) -> Self {
        Self {
            body: body.into(),
            content_type: content_type.to_string(),
            ..Self::default()
        }
    }

    /// Serialize `value` as a JSON response
    ///
    /// # Errors
    ///
    /// Returns `Error::Json` when `value` cannot be serialized.
    pub fn json<T: Serialize>(value: &T) -> Result<Self> {
        Ok(Self::with_body(crate::json::to_json(value)?, "application/json"))
    }

    /// JSON response from an already encoded body
    #[must_use]
    pub fn raw_json(body: impl Into<String>) -> Self {
        Self::with_body(body, "application/json")
    }

    /// Create a text response
    #[must_use]
    pub fn text(body: impl Into<String>) -> Self {
        Self::with_body(body, "text/plain; charset=utf-8")
    }

    /// Create an HTML response
    #[must_use]
    pub fn html(body: impl Into<String>) -> Self {
        Self::with_body(body, "text/html; charset=utf-8")
    }

    /// `302 Found` pointing at `location`
    #[must_use]
    pub fn redirect(location: &str) -> Self {
        Self::with_body("", "text/plain; charset=utf-8")
            .with_status(302)
            .with_header("Location", location)
    }

    /// `{"error": message}` with the given status
    #[must_use]
    pub fn error(status: u16, message: &str) -> Self {
        let body = serde_json::json!({ "error": message }).to_string();
        Self::raw_json(body).with_status(status)
    }

    /// Set status code
    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Set a header
    #[must_use]
    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.set_header(key, value);
        self
    }

    /// Set or override a header
    pub fn set_header(&mut self, key: &str, value: &str) {
        if key.eq_ignore_ascii_case("content-type") {
            self.content_type = value.to_string();
        } else {
            self.headers.insert(key.to_string(), value.to_string());
        }
    }

    /// Header value by name (case-insensitive)
    #[must_use]
    pub fn header(&self, key: &str) -> Option<&str> {
        if key.eq_ignore_ascii_case("content-type") {
            return Some(&self.content_type);
        }
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Whether the status is 5xx
    #[must_use]
    pub const fn is_server_error(&self) -> bool {
        self.status >= 500
    }

    /// Convert to a hyper response; invalid headers are dropped
    pub(crate) fn into_hyper(self) -> hyper::Response<Full<Bytes>> {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut builder = hyper::Response::builder()
            .status(status)
            .header("Content-Type", &self.content_type);
        for (k, v) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                hyper::header::HeaderName::from_bytes(k.as_bytes()),
                hyper::header::HeaderValue::from_str(v),
            ) {
                builder = builder.header(name, value);
            }
        }

        builder
            .body(Full::new(Bytes::from(self.body)))
            .unwrap_or_else(|_| {
                let mut fallback = hyper::Response::new(Full::new(Bytes::from_static(
                    b"Internal Server Error",
                )));
                *fallback.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                fallback
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_response() {
        let resp = Response::json(&serde_json::json!({"status": "ok"})).unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.content_type, "application/json");
        assert_eq!(resp.body, r#"{"status":"ok"}"#);
    }

    #[test]
    fn test_with_status_and_headers() {
        let resp = Response::text("Not Found")
            .with_status(404)
            .with_header("X-Trace", "abc")
            .with_header("content-type", "text/csv");
        assert_eq!(resp.status, 404);
        assert_eq!(resp.header("x-trace"), Some("abc"));
        assert_eq!(resp.content_type, "text/csv");
    }

    #[test]
    fn test_redirect() {
        let resp = Response::redirect("/login");
        assert_eq!(resp.status, 302);
        assert_eq!(resp.header("Location"), Some("/login"));
    }

    #[test]
    fn test_into_hyper_keeps_status_and_content_type() {
        let hyper_resp = Response::error(503, "down").into_hyper();
        assert_eq!(hyper_resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            hyper_resp.headers().get("content-type").map(|v| v.to_str().unwrap()),
            Some("application/json")
        );
    }
}
