//! # HTTP Request
//!
//! Owned request data handed to middleware and handlers.
//!
//! The body is collected once, up to the configured size limit, and the
//! query string is decoded on construction.

use crate::error::{Error, Result};
use crate::router::Method;
use crate::types::ParamValue;
use http_body_util::BodyExt;
use hyper::body::Bytes;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

/// HTTP request
#[derive(Debug, Clone)]
pub struct Request {
    /// HTTP method
    pub method: Method,
    /// Request path (without query string)
    pub path: String,
    query_string: Option<String>,
    query_params: HashMap<String, String>,
    /// Typed path parameters
    pub params: HashMap<String, ParamValue>,
    headers: hyper::HeaderMap,
    body: Option<Bytes>,
    /// Peer address of the connection
    pub remote_addr: Option<SocketAddr>,
    /// Validated JWT claims
    pub claims: Option<Value>,
    /// When the request was received
    pub received_at: Instant,
}

impl Request {
    /// Create a request manually (tests and `Server::test_request`)
    #[must_use]
    pub fn new(
        method: Method,
        path: &str,
        headers_map: HashMap<String, String>,
        body: Option<Bytes>,
    ) -> Self {
        let (path, query_string) = match path.split_once('?') {
            Some((p, q)) => (p.to_string(), Some(q.to_string())),
            None => (path.to_string(), None),
        };

        let mut request = Self {
            method,
            path,
            query_params: parse_query_string(query_string.as_deref()),
            query_string,
            params: HashMap::new(),
            headers: hyper::HeaderMap::new(),
            body,
            remote_addr: None,
            claims: None,
            received_at: Instant::now(),
        };
        for (k, v) in headers_map {
            request.set_header(&k, &v);
        }
        request
    }

    /// Create from a hyper request, enforcing a body size limit
    ///
    /// # Errors
    ///
    /// Returns `Error::PayloadTooLarge` when the declared or actual body
    /// exceeds `max_body_size`, and `Error::InvalidRoutePattern` for
    /// methods the router cannot serve.
    pub async fn from_hyper(
        req: hyper::Request<hyper::body::Incoming>,
        max_body_size: usize,
    ) -> Result<Self> {
        let method = Method::from_hyper(req.method()).ok_or_else(|| Error::InvalidRoutePattern {
            pattern: req.uri().path().to_string(),
            reason: format!("unsupported method {}", req.method()),
        })?;

        let path = req.uri().path().to_string();
        let query_string = req.uri().query().map(String::from);
        let headers = req.headers().clone();

        let declared = headers
            .get(hyper::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        if let Some(content_len) = declared.filter(|len| *len > max_body_size) {
            return Err(Error::PayloadTooLarge {
                limit: max_body_size,
                actual: content_len,
            });
        }

        let body = match req.into_body().collect().await {
            Ok(collected) => {
                let bytes = collected.to_bytes();
                if bytes.len() > max_body_size {
                    return Err(Error::PayloadTooLarge {
                        limit: max_body_size,
                        actual: bytes.len(),
                    });
                }
                Some(bytes)
            }
            Err(_) => None,
        };

        Ok(Self {
            method,
            path,
            query_params: parse_query_string(query_string.as_deref()),
            query_string,
            params: HashMap::new(),
            headers,
            body,
            remote_addr: None,
            claims: None,
            received_at: Instant::now(),
        })
    }

    /// Get a header value by name (case-insensitive)
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Set or override a header
    pub fn set_header(&mut self, name: &str, value: &str) {
        if let (Ok(n), Ok(v)) = (
            hyper::header::HeaderName::from_bytes(name.as_bytes()),
            hyper::header::HeaderValue::from_str(value),
        ) {
            self.headers.insert(n, v);
        }
    }

    /// Get all headers as a `HashMap`
    #[must_use]
    pub fn headers_map(&self) -> HashMap<String, String> {
        self.headers
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|val| (k.as_str().to_string(), val.to_string()))
            })
            .collect()
    }

    /// Decoded query parameters
    #[must_use]
    pub const fn query_map(&self) -> &HashMap<String, String> {
        &self.query_params
    }

    /// Raw query string
    #[must_use]
    pub fn query_string(&self) -> Option<&str> {
        self.query_string.as_deref()
    }

    /// Request body bytes
    #[must_use]
    pub fn body_bytes(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// Request body as UTF-8
    #[must_use]
    pub fn body_str(&self) -> Option<&str> {
        self.body_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    /// Deserialize the body as JSON
    ///
    /// # Errors
    ///
    /// Returns `Error::Json` when the body is missing or malformed.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        let mut bytes = self
            .body_bytes()
            .ok_or_else(|| Error::Json {
                reason: "empty request body".to_string(),
            })?
            .to_vec();
        crate::json::parse_json_bytes(&mut bytes)
    }

    /// Client address: `X-Forwarded-For` (first hop), then `X-Real-IP`,
    /// then the connection peer.
    #[must_use]
    pub fn client_ip(&self) -> Option<String> {
        if let Some(forwarded) = self.header("x-forwarded-for") {
            if let Some(first) = forwarded.split(',').map(str::trim).find(|s| !s.is_empty()) {
                return Some(first.to_string());
            }
        }
        if let Some(real_ip) = self.header("x-real-ip").filter(|s| !s.is_empty()) {
            return Some(real_ip.to_string());
        }
        self.remote_addr.map(|addr| addr.ip().to_string())
    }
}

/// Parse query string into a map; duplicate keys keep the last value.
fn parse_query_string(query: Option<&str>) -> HashMap<String, String> {
    query
        .map(|q| {
            q.split('&')
                .filter(|pair| !pair.is_empty())
                .map(|pair| {
                    let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                    (url_decode(key), url_decode(value))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Percent-decoding with `+` as space; invalid escapes are kept verbatim.
fn url_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..=i + 2]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(byte) => {
                        out.push(byte);
                        i += 2;
                    }
                    None => out.push(b'%'),
                }
            }
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query_string_simple() {
        let result = parse_query_string(Some("page=1&limit=10"));
        assert_eq!(result.get("page"), Some(&"1".to_string()));
        assert_eq!(result.get("limit"), Some(&"10".to_string()));
    }

    #[test]
    fn test_parse_query_string_url_encoded() {
        let result = parse_query_string(Some("name=John+Doe&city=New%20York&flag"));
        assert_eq!(result.get("name"), Some(&"John Doe".to_string()));
        assert_eq!(result.get("city"), Some(&"New York".to_string()));
        assert_eq!(result.get("flag"), Some(&String::new()));
    }

    #[test]
    fn test_url_decode() {
        assert_eq!(url_decode("100%25"), "100%");
        assert_eq!(url_decode("caf%C3%A9"), "café");
        assert_eq!(url_decode("bad%zz"), "bad%zz");
        assert_eq!(url_decode("end%2"), "end%2");
    }

    #[test]
    fn test_new_splits_query() {
        let req = Request::new(Method::Get, "/search?q=rust", HashMap::new(), None);
        assert_eq!(req.path, "/search");
        assert_eq!(req.query_string(), Some("q=rust"));
        assert_eq!(req.query_map().get("q"), Some(&"rust".to_string()));
    }

    #[test]
    fn test_client_ip_prefers_forwarded_for() {
        let mut headers = HashMap::new();
        headers.insert("X-Forwarded-For".to_string(), "10.0.0.1, 10.0.0.2".to_string());
        headers.insert("X-Real-IP".to_string(), "10.0.0.9".to_string());
        let mut req = Request::new(Method::Get, "/", headers, None);
        req.remote_addr = Some(([127, 0, 0, 1], 9000).into());
        assert_eq!(req.client_ip().as_deref(), Some("10.0.0.1"));

        let mut req = Request::new(Method::Get, "/", HashMap::new(), None);
        req.remote_addr = Some(([127, 0, 0, 1], 9000).into());
        assert_eq!(req.client_ip().as_deref(), Some("127.0.0.1"));
    }

    #[test]
    fn test_json_body() {
        #[derive(serde::Deserialize)]
        struct Payload {
            name: String,
        }
        let req = Request::new(
            Method::Post,
            "/users",
            HashMap::new(),
            Some(Bytes::from_static(br#"{"name":"ada"}"#)),
        );
        let payload: Payload = req.json().unwrap();
        assert_eq!(payload.name, "ada");

        let empty = Request::new(Method::Post, "/users", HashMap::new(), None);
        assert!(empty.json::<Payload>().is_err());
    }
}
