//! # Request Context
//!
//! What a handler receives: the request with its typed path parameters,
//! the application state, the database pool if one is connected, and a
//! small per-request key/value store.

use crate::database::DatabasePool;
use crate::error::{Error, Result};
use crate::request::Request;
use crate::response::Response;
use crate::state::AppState;
use crate::types::ParamValue;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Future returned by a [`Handler`]
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Response>> + Send>>;

/// Route handler
pub type Handler = Arc<dyn Fn(Context) -> HandlerFuture + Send + Sync>;

/// Wrap an async function as a [`Handler`]
///
/// ```ignore
/// app.get("/users/{id:int}", handler(|ctx| async move {
///     let id = ctx.param_int("id")?;
///     Response::json(&serde_json::json!({ "id": id }))
/// }))?;
/// ```
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

/// Per-request handler context
#[derive(Debug, Clone)]
pub struct Context {
    /// The request
    pub request: Request,
    state: AppState,
    db: Option<DatabasePool>,
    store: HashMap<String, Value>,
}

impl Context {
    /// Context for `request`
    #[must_use]
    pub fn new(request: Request, state: AppState, db: Option<DatabasePool>) -> Self {
        Self {
            request,
            state,
            db,
            store: HashMap::new(),
        }
    }

    /// Typed path parameter
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&ParamValue> {
        self.request.params.get(name)
    }

    /// Integer path parameter
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidParam` when the parameter is missing or not
    /// an integer.
    pub fn param_int(&self, name: &str) -> Result<i64> {
        let value = self.param(name).ok_or_else(|| Error::InvalidParam {
            value: name.to_string(),
            reason: "missing path parameter".to_string(),
        })?;
        value.as_int().ok_or_else(|| Error::InvalidParam {
            value: value.to_string(),
            reason: format!("parameter `{name}` is not an integer"),
        })
    }

    /// Query parameter, or `default` when absent
    #[must_use]
    pub fn query(&self, key: &str, default: &str) -> String {
        self.request
            .query_map()
            .get(key)
            .map_or_else(|| default.to_string(), Clone::clone)
    }

    /// Request header (case-insensitive)
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.request.header(name)
    }

    /// Client address, honouring proxy headers
    #[must_use]
    pub fn client_ip(&self) -> Option<String> {
        self.request.client_ip()
    }

    /// Deserialize the JSON body
    ///
    /// # Errors
    ///
    /// Returns `Error::Json` for a missing or malformed body.
    pub fn bind<T: DeserializeOwned>(&self) -> Result<T> {
        self.request.json()
    }

    /// Validated JWT claims of an authenticated route
    #[must_use]
    pub fn claims(&self) -> Option<&Value> {
        self.request.claims.as_ref()
    }

    /// Store a per-request value
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.store.insert(key.into(), value.into());
    }

    /// Per-request value
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.store.get(key)
    }

    /// Application state
    #[must_use]
    pub const fn state(&self) -> &AppState {
        &self.state
    }

    /// Clone a registered service out of the application state
    #[must_use]
    pub fn service<T: Clone + Send + Sync + 'static>(&self, key: &str) -> Option<T> {
        self.state.get(key)
    }

    /// The database pool
    ///
    /// # Errors
    ///
    /// Returns `Error::DatabaseNotConnected` when no pool is configured.
    pub fn db(&self) -> Result<&DatabasePool> {
        self.db.as_ref().ok_or(Error::DatabaseNotConnected)
    }
}
