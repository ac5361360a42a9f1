//! # Route Metadata
//!
//! Parsed route patterns and the path helpers used by route groups.

use crate::router::{HandlerId, Method};
use crate::types::ParamType;
use std::collections::HashMap;

/// Route metadata containing handler and type information
#[derive(Debug, Clone)]
pub struct RouteInfo {
    /// Unique handler identifier
    pub handler_id: HandlerId,
    /// HTTP method the route answers to
    pub method: Method,
    /// Original path pattern (e.g., "/users/{id:int}" or "/users/:id")
    pub path_pattern: String,
    /// Normalized path for matchit (e.g., "/users/{id}")
    pub match_pattern: String,
    /// Parameter name to type mapping
    pub param_types: HashMap<String, ParamType>,
    /// Whether authentication is required for this route
    pub auth_required: bool,
}

impl RouteInfo {
    /// Create a new `RouteInfo` from a path pattern
    #[must_use]
    pub fn new(handler_id: HandlerId, method: Method, path: &str, auth_required: bool) -> Self {
        let (match_pattern, param_types) = Self::parse_path_pattern(path);

        Self {
            handler_id,
            method,
            path_pattern: path.to_string(),
            match_pattern,
            param_types,
            auth_required,
        }
    }

    /// Converts `{name:type}` and `:name` to `{name}` and collects the types.
    fn parse_path_pattern(path: &str) -> (String, HashMap<String, ParamType>) {
        let mut param_types = HashMap::new();
        let mut normalized_parts = Vec::new();

        for segment in path.split('/').filter(|s| !s.is_empty()) {
            if let Some((name, param_type)) = crate::types::parse_param_pattern(segment) {
                normalized_parts.push(format!("{{{name}}}"));
                param_types.insert(name, param_type);
            } else {
                normalized_parts.push(segment.to_string());
            }
        }

        let normalized = if normalized_parts.is_empty() {
            "/".to_string()
        } else {
            format!("/{}", normalized_parts.join("/"))
        };

        (normalized, param_types)
    }

    /// Get the type for a parameter by name, `ParamType::String` if unknown
    #[must_use]
    pub fn get_param_type(&self, name: &str) -> ParamType {
        self.param_types.get(name).copied().unwrap_or_default()
    }
}

/// Join a group prefix and a route path into a clean absolute path
///
/// Duplicate and trailing slashes are removed; the root stays `/`.
#[must_use]
pub fn join_paths(prefix: &str, path: &str) -> String {
    let joined: Vec<&str> = prefix
        .split('/')
        .chain(path.split('/'))
        .filter(|s| !s.is_empty())
        .collect();

    if joined.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", joined.join("/"))
    }
}
