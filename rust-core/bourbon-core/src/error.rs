//! # Error Handling
//!
//! Centralized error types for Bourbon core.
//! Uses `thiserror` for ergonomic error definitions.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Bourbon operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for the Bourbon runtime
#[derive(Error, Debug)]
pub enum Error {
    /// Server failed to bind to the specified address
    #[error("Failed to bind server to {address}: {source}")]
    BindError {
        /// The address we tried to bind to
        address: String,
        /// The underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Router failed to match the requested path
    #[error("No route found for path: {path}")]
    RouteNotFound {
        /// The path that wasn't matched
        path: String,
    },

    /// Invalid route pattern provided
    #[error("Invalid route pattern: {pattern}: {reason}")]
    InvalidRoutePattern {
        /// The invalid pattern
        pattern: String,
        /// Reason for invalidity
        reason: String,
    },

    /// A path parameter could not be converted to its declared type
    #[error("Invalid parameter '{value}': {reason}")]
    InvalidParam {
        /// Raw value from the path
        value: String,
        /// Reason for the failure
        reason: String,
    },

    /// JSON serialization/deserialization error
    #[error("JSON error: {reason}")]
    Json {
        /// Parser or serializer message
        reason: String,
    },

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {message}")]
    Config {
        /// What went wrong
        message: String,
    },

    /// Database error
    #[error("Database error: {message}")]
    Database {
        /// Error message from database
        message: String,
    },

    /// Database access was requested but no pool is configured
    #[error("Database not connected")]
    DatabaseNotConnected,

    /// Request payload too large
    #[error("Payload too large: limit={limit} bytes, received={actual} bytes")]
    PayloadTooLarge {
        /// Max allowed size
        limit: usize,
        /// Actual size
        actual: usize,
    },

    /// Middleware name was never registered
    #[error("Middleware not registered: {name}")]
    MiddlewareNotRegistered {
        /// Requested middleware name
        name: String,
    },

    /// Handler returned an error
    #[error("Handler error: {message}")]
    Handler {
        /// Message returned to the client
        message: String,
    },

    /// Model source could not be parsed
    #[error("Failed to parse models in {}: {message}", path.display())]
    ModelParse {
        /// Source file that failed to parse
        path: PathBuf,
        /// Parser message
        message: String,
    },

    /// No models were found for an application
    #[error("No models found for app '{app}'")]
    NoModels {
        /// Application name
        app: String,
    },

    /// No application directory exists
    #[error("App not found: {app}")]
    AppNotFound {
        /// Application name
        app: String,
    },

    /// Persisted migration state could not be read or written
    #[error("Migration state error at {}: {message}", path.display())]
    StateFile {
        /// Location of the state document
        path: PathBuf,
        /// What went wrong
        message: String,
    },

    /// A migration file is malformed
    #[error("Invalid migration file {}: {reason}", path.display())]
    InvalidMigrationFile {
        /// Offending file
        path: PathBuf,
        /// Reason for invalidity
        reason: String,
    },

    /// Two migrations were registered with the same id
    #[error("Duplicate migration id: {id}")]
    DuplicateMigration {
        /// The duplicated id
        id: String,
    },

    /// A migration id is not registered
    #[error("Unknown migration: {id}")]
    UnknownMigration {
        /// The requested id
        id: String,
    },

    /// Applying a migration failed
    #[error("Migration {id} failed: {message}")]
    MigrationFailed {
        /// Migration id
        id: String,
        /// Underlying error
        message: String,
    },

    /// Rolling back a migration failed
    #[error("Rollback of {id} failed: {message}")]
    RollbackFailed {
        /// Migration id
        id: String,
        /// Underlying error
        message: String,
    },

    /// Logging could not be initialized
    #[error("Logging error: {message}")]
    Logging {
        /// What went wrong
        message: String,
    },
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Json {
            reason: err.to_string(),
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Self::Database {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_not_found_error() {
        let err = Error::RouteNotFound {
            path: "/unknown".to_string(),
        };
        assert!(err.to_string().contains("/unknown"));
    }

    #[test]
    fn test_bind_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::AddrInUse, "address in use");
        let err = Error::BindError {
            address: "0.0.0.0:8000".to_string(),
            source: io_err,
        };
        assert!(err.to_string().contains("0.0.0.0:8000"));
    }

    #[test]
    fn test_model_parse_error_names_file() {
        let err = Error::ModelParse {
            path: PathBuf::from("apps/users/models.rs"),
            message: "expected `;`".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("apps/users/models.rs"));
        assert!(text.contains("expected `;`"));
    }

    #[test]
    fn test_json_error_conversion() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: Error = parse_err.into();
        assert!(matches!(err, Error::Json { .. }));
    }
}
