//! # Bourbon Core
//!
//! Core runtime library for the Bourbon web framework.
//! Provides the HTTP server, routing, middleware, models and the migration
//! system.
//!
//! ## Architecture
//!
//! An [`Application`] collects configuration, routes and middleware and
//! turns them into a [`Server`] running on Tokio. Models are plain structs
//! deriving [`Model`]; `make:migration` scans their source, diffs it
//! against the persisted state and writes SQL migrations that the
//! [`Migrator`] applies and rolls back.
//!
//! ## Modules
//!
//! - `app` - Application wiring and route groups
//! - `server` - HTTP server built on Hyper
//! - `router` - Routing using matchit (radix trie)
//! - `route` - Route metadata and information
//! - `request` / `response` - HTTP request and response values
//! - `context` - Handler context and the handler type
//! - `middleware` - Request/response middleware system
//! - `json` - JSON parsing with simd-json
//! - `state` - Thread-safe application state
//! - `database` - SQLx database connectivity (SQLite, PostgreSQL, MySQL)
//! - `models` - `BaseModel` and the `Model` trait
//! - `migrate` - Change detection, generation and the migration tracker
//! - `error_store` - Persisted server errors
//! - `config` / `logging` - Settings file and tracing setup
//! - `types` - Path parameter types and conversion
//! - `error` - Error types and handling

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

extern crate self as bourbon_core;

pub mod app;
pub mod config;
pub mod context;
pub mod database;
pub mod error;
pub mod error_store;
pub mod json;
pub mod logging;
pub mod middleware;
pub mod migrate;
pub mod models;
pub mod request;
pub mod response;
pub mod route;
pub mod router;
pub mod server;
pub mod state;
pub mod types;

pub use app::{Application, RouteGroup};
pub use bourbon_macros::Model;
pub use config::Config;
pub use context::{handler, Context, Handler};
pub use database::{DatabasePool, DbValue, Dialect};
pub use error::{Error, Result};
pub use error_store::{ErrorLog, ErrorStore};
pub use json::{parse_json, to_json};
pub use middleware::{
    CorsMiddleware, LoggerMiddleware, Middleware, MiddlewareChain, MiddlewareRegistry,
    MiddlewareResult, RecoveryMiddleware, TimingMiddleware,
};
pub use migrate::{MigrationGenerator, MigrationRegistry, Migrator};
pub use models::{BaseModel, Model};
pub use request::Request;
pub use response::Response;
pub use route::RouteInfo;
pub use router::{Method, Router};
pub use server::Server;
pub use state::AppState;
pub use types::{ParamType, ParamValue};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
