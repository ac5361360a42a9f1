//! # HTTP Server
//!
//! HTTP server built on Hyper and Tokio.
//! Implements graceful shutdown with signal handling.
//!
//! ## Key Features
//!
//! - Async request handling with Tokio runtime
//! - Graceful shutdown on SIGINT, draining open connections
//! - Handler panics become `500` responses
//! - Request ids on every response

use crate::context::{Context, Handler};
use crate::database::DatabasePool;
use crate::error::{Error, Result};
use crate::middleware::{MiddlewareChain, MiddlewareResult};
use crate::request::Request;
use crate::response::Response;
use crate::router::{HandlerId, Method, Router};
use crate::state::AppState;
use http_body_util::Full;
pub use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Authentication Configuration (JWT)
#[derive(Clone)]
pub struct AuthConfig {
    /// JWT decoding key
    pub decoding_key: DecodingKey,
    /// JWT validation settings
    pub validation: Validation,
}

impl AuthConfig {
    /// Create auth config from shared secret
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("algorithms", &self.validation.algorithms)
            .finish_non_exhaustive()
    }
}

/// HTTP Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to
    pub address: SocketAddr,
    /// Enable keep-alive connections
    pub keep_alive: bool,
    /// Shutdown timeout for graceful shutdown (default: 30 seconds)
    pub shutdown_timeout: Duration,
    /// Max request body size in bytes
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: ([127, 0, 0, 1], 8000).into(),
            keep_alive: true,
            shutdown_timeout: Duration::from_secs(30),
            max_body_size: 1024 * 1024,
        }
    }
}

/// Everything a request needs, shared across connections
struct Shared {
    router: Router,
    handlers: HashMap<HandlerId, Handler>,
    auth_config: Option<AuthConfig>,
    middleware: MiddlewareChain,
    state: AppState,
    db: Option<DatabasePool>,
}

/// HTTP server
pub struct Server {
    config: ServerConfig,
    router: Router,
    handlers: HashMap<HandlerId, Handler>,
    auth_config: Option<AuthConfig>,
    middleware: MiddlewareChain,
    state: AppState,
    db: Option<DatabasePool>,
}

impl Server {
    /// Create a new server; an empty `secret` disables JWT routes
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self {
            config: ServerConfig::default(),
            router: Router::new(),
            handlers: HashMap::new(),
            auth_config: (!secret.is_empty()).then(|| AuthConfig::new(secret)),
            middleware: MiddlewareChain::new(),
            state: AppState::new(),
            db: None,
        }
    }

    /// Bind the server to an address
    #[must_use]
    pub const fn bind(mut self, addr: SocketAddr) -> Self {
        self.config.address = addr;
        self
    }

    /// Set max request body size
    pub fn set_max_body_size(&mut self, bytes: usize) {
        self.config.max_body_size = bytes;
    }

    /// Set the graceful shutdown timeout
    pub fn set_shutdown_timeout(&mut self, timeout: Duration) {
        self.config.shutdown_timeout = timeout;
    }

    /// Enable JWT authentication
    pub fn enable_auth(&mut self, secret: &str) {
        self.auth_config = Some(AuthConfig::new(secret));
    }

    /// Replace the middleware chain
    pub fn set_middleware(&mut self, chain: MiddlewareChain) {
        self.middleware = chain;
    }

    /// Add a middleware to the chain
    pub fn add_middleware<M: crate::middleware::Middleware + 'static>(&mut self, middleware: M) {
        self.middleware.add(middleware);
    }

    /// Share application state with handlers
    pub fn set_state(&mut self, state: AppState) {
        self.state = state;
    }

    /// Give handlers access to `db`
    pub fn set_database(&mut self, db: DatabasePool) {
        self.db = Some(db);
    }

    /// Current configuration
    #[must_use]
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The route table
    #[must_use]
    pub const fn router(&self) -> &Router {
        &self.router
    }

    /// Add a route and its handler
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` for malformed or conflicting
    /// patterns.
    pub fn add_route(
        &mut self,
        method: Method,
        path: &str,
        handler: Handler,
        auth_required: bool,
    ) -> Result<()> {
        let id = self.router.add_route(method, path, auth_required)?;
        self.handlers.insert(id, handler);
        Ok(())
    }

    fn shared(&self) -> Shared {
        Shared {
            router: self.router.clone(),
            handlers: self.handlers.clone(),
            auth_config: self.auth_config.clone(),
            middleware: self.middleware.clone(),
            state: self.state.clone(),
            db: self.db.clone(),
        }
    }

    /// Start the server with graceful shutdown
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` / `Error::BindError` when the socket cannot be
    /// bound or accepting fails.
    pub async fn serve(&self) -> Result<()> {
        let addr = self.config.address;

        let socket = if addr.is_ipv4() {
            tokio::net::TcpSocket::new_v4()?
        } else {
            tokio::net::TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        #[cfg(not(windows))]
        {
            socket.set_reuseport(true)?;
        }
        socket.bind(addr).map_err(|e| Error::BindError {
            address: addr.to_string(),
            source: e,
        })?;

        let listener = socket.listen(1024)?;

        info!("Server listening on http://{}", addr);

        let shared = Arc::new(self.shared());
        let active = Arc::new(AtomicUsize::new(0));
        let max_body_size = self.config.max_body_size;
        let keep_alive = self.config.keep_alive;

        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    let (stream, remote_addr) = match accept_result {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!(error = %e, "Failed to accept connection");
                            continue;
                        }
                    };
                    let io = TokioIo::new(stream);
                    let shared = shared.clone();
                    let active = active.clone();

                    tokio::task::spawn(async move {
                        active.fetch_add(1, Ordering::Relaxed);

                        let service = service_fn(move |req| {
                            let shared = shared.clone();
                            async move {
                                handle_request(req, &shared, remote_addr, max_body_size).await
                            }
                        });
                        if let Err(err) = http1::Builder::new()
                            .keep_alive(keep_alive)
                            .serve_connection(io, service)
                            .await
                        {
                            debug!("Error serving connection: {:?}", err);
                        }
                        active.fetch_sub(1, Ordering::Relaxed);
                    });
                }
                () = &mut shutdown => {
                    info!("Shutdown signal received, stopping server...");
                    break;
                }
            }
        }

        let timeout = self.config.shutdown_timeout;
        let drain = async {
            while active.load(Ordering::Relaxed) > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };
        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!(
                open = active.load(Ordering::Relaxed),
                "Shutdown timeout reached with connections still open"
            );
        }
        info!("Server stopped");
        Ok(())
    }

    /// Execute a test request directly without network stack
    pub async fn test_request(
        &self,
        method: Method,
        path: &str,
        headers: HashMap<String, String>,
        body: Option<Bytes>,
    ) -> Response {
        if let Some(b) = body.as_ref() {
            if b.len() > self.config.max_body_size {
                return Response::error(413, "Payload Too Large");
            }
        }
        let mut req = Request::new(method, path, headers, body);
        req.set_header("x-client-ip", "127.0.0.1");

        process_request(req, &self.shared()).await
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install CTRL+C signal handler");
        std::future::pending::<()>().await;
    }
}

fn status_for(err: &Error) -> u16 {
    match err {
        Error::InvalidParam { .. } | Error::Json { .. } => 400,
        Error::PayloadTooLarge { .. } => 413,
        _ => 500,
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "handler panicked".to_string())
}

fn authenticate(req: &mut Request, auth_config: Option<&AuthConfig>) -> Option<Response> {
    let Some(config) = auth_config else {
        error!("Route requires auth but server has no JWT secret configured");
        return Some(Response::error(
            500,
            "Server misconfigured: Auth required but no secret set",
        ));
    };
    let Some(token) = req
        .header("authorization")
        .and_then(|h| h.strip_prefix("Bearer "))
    else {
        return Some(Response::error(401, "Missing or invalid Authorization header"));
    };
    match decode::<serde_json::Value>(token, &config.decoding_key, &config.validation) {
        Ok(token_data) => {
            req.claims = Some(token_data.claims);
            None
        }
        Err(e) => {
            warn!("JWT validation failed: {}", e);
            Some(Response::error(401, "Unauthorized"))
        }
    }
}

/// Route, authenticate and run the handler for `req`
async fn dispatch(req: &mut Request, shared: &Shared) -> Response {
    let Ok(matched) = shared.router.match_route(req.method, &req.path) else {
        return Response::error(404, "Not Found");
    };
    req.params = matched.params;

    if matched.auth_required {
        if let Some(denied) = authenticate(req, shared.auth_config.as_ref()) {
            return denied;
        }
    }

    let Some(handler) = shared.handlers.get(&matched.handler_id) else {
        error!(handler_id = matched.handler_id, "Route has no handler");
        return Response::error(500, "Internal Server Error");
    };

    let ctx = Context::new(req.clone(), shared.state.clone(), shared.db.clone());
    match tokio::spawn(handler(ctx)).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            let status = status_for(&e);
            if status >= 500 {
                error!(path = %req.path, error = %e, "Handler failed");
            }
            Response::error(status, &e.to_string())
        }
        Err(join_err) if join_err.is_panic() => {
            let message = panic_message(join_err.into_panic().as_ref());
            shared.middleware.run_panic(req, &message);
            Response::error(500, "Internal Server Error")
        }
        Err(join_err) => {
            error!(error = %join_err, "Handler task cancelled");
            Response::error(500, "Internal Server Error")
        }
    }
}

/// Core request processing logic (network agnostic)
async fn process_request(mut req: Request, shared: &Shared) -> Response {
    if req.header("x-request-id").is_none() {
        let request_id = generate_request_id();
        req.set_header("x-request-id", &request_id);
    }

    let mut response = match shared.middleware.run_before(&req) {
        MiddlewareResult::Continue => dispatch(&mut req, shared).await,
        MiddlewareResult::Respond(resp) => resp,
    };

    if let Some(request_id) = req.header("x-request-id") {
        response.set_header("X-Request-ID", request_id);
    }
    shared.middleware.run_after(&req, &mut response);
    response
}

async fn handle_request(
    req: hyper::Request<hyper::body::Incoming>,
    shared: &Shared,
    remote_addr: SocketAddr,
    max_body_size: usize,
) -> std::result::Result<hyper::Response<Full<Bytes>>, hyper::Error> {
    let mut request = match Request::from_hyper(req, max_body_size).await {
        Ok(r) => r,
        Err(Error::PayloadTooLarge { limit, actual }) => {
            warn!(limit, actual, "Request body rejected");
            return Ok(Response::error(413, "Payload Too Large").into_hyper());
        }
        Err(e) => {
            warn!("Failed to parse request: {}", e);
            return Ok(Response::error(400, "Bad Request").into_hyper());
        }
    };

    request.remote_addr = Some(remote_addr);
    request.set_header("x-client-ip", &remote_addr.ip().to_string());
    let response = process_request(request, shared).await;
    Ok(response.into_hyper())
}

static REQUEST_COUNTER: AtomicUsize = AtomicUsize::new(1);

fn generate_request_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let counter = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{:x}-{:x}", now.as_nanos(), counter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::handler;
    use crate::middleware::{CorsMiddleware, Middleware};
    use std::sync::atomic::AtomicBool;

    fn server() -> Server {
        let mut server = Server::new("");
        server
            .add_route(
                Method::Get,
                "/users/{id:int}",
                handler(|ctx: Context| async move {
                    let id = ctx.param_int("id")?;
                    Response::json(&serde_json::json!({ "id": id }))
                }),
                false,
            )
            .unwrap();
        server
            .add_route(
                Method::Get,
                "/boom",
                handler(|_ctx: Context| async move {
                    if true {
                        panic!("kaboom");
                    }
                    Ok(Response::text("unreachable"))
                }),
                false,
            )
            .unwrap();
        server
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.address.port(), 8000);
        assert!(config.keep_alive);
    }

    #[tokio::test]
    async fn test_routes_to_handler() {
        let resp = server()
            .test_request(Method::Get, "/users/7", HashMap::new(), None)
            .await;
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, r#"{"id":7}"#);
        assert!(resp.header("X-Request-ID").is_some());
    }

    #[tokio::test]
    async fn test_not_found() {
        let resp = server()
            .test_request(Method::Get, "/nope", HashMap::new(), None)
            .await;
        assert_eq!(resp.status, 404);
        assert_eq!(resp.body, r#"{"error":"Not Found"}"#);
    }

    #[tokio::test]
    async fn test_request_id_is_preserved() {
        let mut headers = HashMap::new();
        headers.insert("X-Request-ID".to_string(), "abc-123".to_string());
        let resp = server()
            .test_request(Method::Get, "/users/1", headers, None)
            .await;
        assert_eq!(resp.header("x-request-id"), Some("abc-123"));
    }

    struct PanicFlag(Arc<AtomicBool>);

    impl Middleware for PanicFlag {
        fn on_panic(&self, _req: &Request, message: &str) {
            assert_eq!(message, "kaboom");
            self.0.store(true, Ordering::SeqCst);
        }

        fn name(&self) -> &'static str {
            "PanicFlag"
        }
    }

    #[tokio::test]
    async fn test_panic_becomes_500() {
        let flag = Arc::new(AtomicBool::new(false));
        let mut server = server();
        server.add_middleware(PanicFlag(flag.clone()));

        let resp = server
            .test_request(Method::Get, "/boom", HashMap::new(), None)
            .await;
        assert_eq!(resp.status, 500);
        assert!(flag.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_auth_required() {
        let mut server = Server::new("secret");
        server
            .add_route(
                Method::Get,
                "/me",
                handler(|_ctx: Context| async move { Ok(Response::text("me")) }),
                true,
            )
            .unwrap();

        let resp = server
            .test_request(Method::Get, "/me", HashMap::new(), None)
            .await;
        assert_eq!(resp.status, 401);

        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), "Bearer not-a-jwt".to_string());
        let resp = server.test_request(Method::Get, "/me", headers, None).await;
        assert_eq!(resp.status, 401);
    }

    #[tokio::test]
    async fn test_payload_too_large() {
        let mut server = server();
        server.set_max_body_size(4);
        let resp = server
            .test_request(
                Method::Get,
                "/users/1",
                HashMap::new(),
                Some(Bytes::from_static(b"too long")),
            )
            .await;
        assert_eq!(resp.status, 413);
    }

    #[tokio::test]
    async fn test_cors_preflight_skips_routing() {
        let mut server = server();
        server.add_middleware(CorsMiddleware::new());
        let mut headers = HashMap::new();
        headers.insert("Access-Control-Request-Method".to_string(), "GET".to_string());
        let resp = server
            .test_request(Method::Options, "/users/1", headers, None)
            .await;
        assert_eq!(resp.status, 204);
        assert_eq!(resp.header("Access-Control-Allow-Origin"), Some("*"));
    }
}
