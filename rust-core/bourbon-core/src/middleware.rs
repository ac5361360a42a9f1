//! # Middleware System
//!
//! Request/response interception for logging, panic recovery, timing and
//! CORS.
//!
//! ## Design Principles (SOLID)
//!
//! - **S**: Each middleware has a single responsibility
//! - **O**: Extensible via Middleware trait and [`MiddlewareRegistry`]
//! - **D**: Server depends on abstract trait, not concrete implementations

use crate::error::{Error, Result};
use crate::error_store::{ErrorLog, ErrorStore};
use crate::request::Request;
use crate::response::Response;
use crate::router::Method;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Middleware trait for request/response interception
///
/// Middlewares are called in order before the handler, and in reverse order after.
pub trait Middleware: Send + Sync {
    /// Called before routing and the handler
    ///
    /// Can return early with a response.
    fn before_request(&self, _req: &Request) -> MiddlewareResult {
        MiddlewareResult::Continue
    }

    /// Called after the handler, or after an early response
    fn after_response(&self, _req: &Request, _res: &mut Response) {}

    /// Called when the handler panicked, before the 500 response is sent
    fn on_panic(&self, _req: &Request, _message: &str) {}

    /// Middleware name for logging
    fn name(&self) -> &'static str;
}

/// Result of middleware execution
#[derive(Debug)]
pub enum MiddlewareResult {
    /// Continue to next middleware/handler
    Continue,
    /// Short-circuit with this response (skip handler)
    Respond(Response),
}

/// Middleware chain for processing requests
#[derive(Default, Clone)]
pub struct MiddlewareChain {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    /// Create a new empty middleware chain
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a middleware to the chain
    pub fn add<M: Middleware + 'static>(&mut self, middleware: M) {
        self.middlewares.push(Arc::new(middleware));
    }

    /// Add a shared middleware to the chain
    pub fn add_arc(&mut self, middleware: Arc<dyn Middleware>) {
        self.middlewares.push(middleware);
    }

    /// Execute `before_request` for all middlewares
    pub fn run_before(&self, req: &Request) -> MiddlewareResult {
        for mw in &self.middlewares {
            match mw.before_request(req) {
                MiddlewareResult::Continue => continue,
                result => return result,
            }
        }
        MiddlewareResult::Continue
    }

    /// Execute `after_response` for all middlewares (in reverse order)
    pub fn run_after(&self, req: &Request, res: &mut Response) {
        for mw in self.middlewares.iter().rev() {
            mw.after_response(req, res);
        }
    }

    /// Notify every middleware of a handler panic
    pub fn run_panic(&self, req: &Request, message: &str) {
        for mw in &self.middlewares {
            mw.on_panic(req, message);
        }
    }

    /// Names in execution order
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.middlewares.iter().map(|m| m.name()).collect()
    }

    /// Get the number of middlewares
    #[must_use]
    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    /// Check if chain is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }
}

impl std::fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

fn error_log(req: &Request, level: &str, message: String, status: u16) -> ErrorLog {
    ErrorLog {
        timestamp: Utc::now(),
        level: level.to_string(),
        message,
        method: req.method.to_string(),
        path: req.path.clone(),
        status,
        ip: req.client_ip().unwrap_or_default(),
        user_agent: req.header("user-agent").unwrap_or_default().to_string(),
        stack: None,
    }
}

/// Hand `log` to the store without blocking the response
fn store_in_background(store: &ErrorStore, log: ErrorLog) {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        warn!("No async runtime, error log dropped");
        return;
    };
    let store = store.clone();
    handle.spawn(async move {
        if let Err(e) = store.store(&log).await {
            warn!(error = %e, "Failed to store error log");
        }
    });
}

/// Request logger - method, path, status and duration of every request
///
/// 5xx responses are also written to the error store when one is set.
#[derive(Debug, Clone, Default)]
pub struct LoggerMiddleware {
    error_store: Option<ErrorStore>,
}

impl LoggerMiddleware {
    /// Create a new logger middleware
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward server errors to `store`
    #[must_use]
    pub fn with_error_store(mut self, store: ErrorStore) -> Self {
        self.error_store = Some(store);
        self
    }
}

impl Middleware for LoggerMiddleware {
    fn after_response(&self, req: &Request, res: &mut Response) {
        let duration_ms = req.received_at.elapsed().as_millis();
        let request_id = req.header("x-request-id").unwrap_or("-");
        let ip = req.client_ip().unwrap_or_else(|| "-".to_string());

        if res.is_server_error() {
            error!(
                method = %req.method,
                path = %req.path,
                status = res.status,
                duration_ms = %duration_ms,
                request_id = %request_id,
                ip = %ip,
                "Request failed"
            );
            if let Some(store) = &self.error_store {
                let message = format!("HTTP {}: {} {}", res.status, req.method, req.path);
                store_in_background(store, error_log(req, "error", message, res.status));
            }
        } else {
            info!(
                method = %req.method,
                path = %req.path,
                status = res.status,
                duration_ms = %duration_ms,
                request_id = %request_id,
                ip = %ip,
                "Request completed"
            );
        }
    }

    fn name(&self) -> &'static str {
        "Logger"
    }
}

/// Panic recovery - logs handler panics and records them in the error store
///
/// The server itself turns the panic into a 500 response.
#[derive(Debug, Clone, Default)]
pub struct RecoveryMiddleware {
    error_store: Option<ErrorStore>,
}

impl RecoveryMiddleware {
    /// Create a new recovery middleware
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record panics in `store`
    #[must_use]
    pub fn with_error_store(mut self, store: ErrorStore) -> Self {
        self.error_store = Some(store);
        self
    }
}

impl Middleware for RecoveryMiddleware {
    fn on_panic(&self, req: &Request, message: &str) {
        error!(
            method = %req.method,
            path = %req.path,
            panic = %message,
            "Panic recovered"
        );
        if let Some(store) = &self.error_store {
            let mut log = error_log(req, "panic", format!("Panic: {message}"), 500);
            log.stack = Some(message.to_string());
            store_in_background(store, log);
        }
    }

    fn name(&self) -> &'static str {
        "Recovery"
    }
}

/// Timing middleware - adds `X-Response-Time` in milliseconds
#[derive(Debug, Clone, Copy, Default)]
pub struct TimingMiddleware;

impl TimingMiddleware {
    /// Create a new timing middleware
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Middleware for TimingMiddleware {
    fn after_response(&self, req: &Request, res: &mut Response) {
        let elapsed = req.received_at.elapsed();
        res.set_header(
            "X-Response-Time",
            &format!("{:.3}ms", elapsed.as_secs_f64() * 1000.0),
        );
    }

    fn name(&self) -> &'static str {
        "Timing"
    }
}

/// CORS middleware - adds Cross-Origin Resource Sharing headers and answers
/// preflight requests
#[derive(Debug, Clone)]
pub struct CorsMiddleware {
    allowed_origins: Vec<String>,
    allow_methods: String,
    allow_headers: String,
}

impl Default for CorsMiddleware {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            allow_methods: "GET, POST, PUT, DELETE, PATCH, OPTIONS".to_string(),
            allow_headers: "Content-Type, Authorization".to_string(),
        }
    }
}

impl CorsMiddleware {
    /// Create a new CORS middleware allowing any origin
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to `origins`; empty or `*` allows any origin
    #[must_use]
    pub fn allow_origins<I, S>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_origins = origins.into_iter().map(Into::into).collect();
        self
    }

    /// Set allowed methods
    #[must_use]
    pub fn allow_methods(mut self, methods: impl Into<String>) -> Self {
        self.allow_methods = methods.into();
        self
    }

    /// Set allowed headers
    #[must_use]
    pub fn allow_headers(mut self, headers: impl Into<String>) -> Self {
        self.allow_headers = headers.into();
        self
    }

    /// `Access-Control-Allow-Origin` value for a request from `origin`
    #[must_use]
    pub fn origin_for(&self, origin: Option<&str>) -> Option<String> {
        if self.allowed_origins.is_empty() || self.allowed_origins.iter().any(|o| o == "*") {
            return Some("*".to_string());
        }
        origin
            .filter(|o| self.allowed_origins.iter().any(|allowed| allowed == o))
            .map(ToString::to_string)
    }

    fn apply(&self, req: &Request, res: &mut Response) {
        if let Some(origin) = self.origin_for(req.header("origin")) {
            if origin != "*" {
                res.set_header("Vary", "Origin");
            }
            res.set_header("Access-Control-Allow-Origin", &origin);
            res.set_header("Access-Control-Allow-Methods", &self.allow_methods);
            res.set_header("Access-Control-Allow-Headers", &self.allow_headers);
        }
    }
}

impl Middleware for CorsMiddleware {
    fn before_request(&self, req: &Request) -> MiddlewareResult {
        if req.method == Method::Options && req.header("access-control-request-method").is_some() {
            return MiddlewareResult::Respond(Response::text("").with_status(204));
        }
        MiddlewareResult::Continue
    }

    fn after_response(&self, req: &Request, res: &mut Response) {
        self.apply(req, res);
    }

    fn name(&self) -> &'static str {
        "Cors"
    }
}

/// Middlewares available by name (case-insensitive)
#[derive(Clone, Default)]
pub struct MiddlewareRegistry {
    entries: BTreeMap<String, Arc<dyn Middleware>>,
}

impl MiddlewareRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding `logger`, `recovery`, `timing` and `cors`
    #[must_use]
    pub fn with_builtins(cors_origins: &[String], error_store: Option<&ErrorStore>) -> Self {
        let mut logger = LoggerMiddleware::new();
        let mut recovery = RecoveryMiddleware::new();
        if let Some(store) = error_store {
            logger = logger.with_error_store(store.clone());
            recovery = recovery.with_error_store(store.clone());
        }

        let mut registry = Self::new();
        registry.register("logger", logger);
        registry.register("recovery", recovery);
        registry.register("timing", TimingMiddleware::new());
        registry.register("cors", CorsMiddleware::new().allow_origins(cors_origins.iter().cloned()));
        registry
    }

    /// Register `middleware` under `name`, replacing any previous entry
    pub fn register<M: Middleware + 'static>(&mut self, name: &str, middleware: M) {
        self.entries
            .insert(name.to_ascii_lowercase(), Arc::new(middleware));
    }

    /// Take every entry of `other`, replacing same-named ones
    pub fn extend(&mut self, other: Self) {
        self.entries.extend(other.entries);
    }

    /// Middleware registered under `name`
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Middleware>> {
        self.entries.get(&name.to_ascii_lowercase()).cloned()
    }

    /// Whether `name` is registered
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_lowercase())
    }

    /// Registered names, sorted
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    /// Build a chain from `names` in order
    ///
    /// # Errors
    ///
    /// Returns `Error::MiddlewareNotRegistered` for the first unknown name.
    pub fn chain<S: AsRef<str>>(&self, names: &[S]) -> Result<MiddlewareChain> {
        let mut chain = MiddlewareChain::new();
        for name in names {
            let name = name.as_ref();
            let middleware = self.get(name).ok_or_else(|| Error::MiddlewareNotRegistered {
                name: name.to_string(),
            })?;
            chain.add_arc(middleware);
        }
        Ok(chain)
    }
}

impl std::fmt::Debug for MiddlewareRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
