//! # Router
//!
//! Radix-trie based router using `matchit`, one trie per HTTP method.
//!
//! ## Features
//!
//! - Path parameter extraction (`/users/{id}` or `/users/:id`)
//! - Typed parameters (`/users/{id:int}`)
//! - Catch-all routes (`/files/{*path}`)

use crate::error::{Error, Result};
use crate::route::RouteInfo;
use crate::types::{convert_param, ParamValue};
use matchit::Router as MatchitRouter;
use std::collections::HashMap;

/// HTTP methods supported by the router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// HTTP GET
    Get,
    /// HTTP POST
    Post,
    /// HTTP PUT
    Put,
    /// HTTP DELETE
    Delete,
    /// HTTP PATCH
    Patch,
    /// HTTP HEAD
    Head,
    /// HTTP OPTIONS
    Options,
}

impl Method {
    /// Map a hyper method, `None` for methods the router does not serve
    #[must_use]
    pub fn from_hyper(method: &hyper::Method) -> Option<Self> {
        match *method {
            hyper::Method::GET => Some(Self::Get),
            hyper::Method::POST => Some(Self::Post),
            hyper::Method::PUT => Some(Self::Put),
            hyper::Method::DELETE => Some(Self::Delete),
            hyper::Method::PATCH => Some(Self::Patch),
            hyper::Method::HEAD => Some(Self::Head),
            hyper::Method::OPTIONS => Some(Self::Options),
            _ => None,
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
        })
    }
}

/// Route handler identifier
pub type HandlerId = usize;

/// Matched route with converted parameters
#[derive(Debug)]
pub struct Match {
    /// The handler ID for this route
    pub handler_id: HandlerId,
    /// Typed path parameters
    pub params: HashMap<String, ParamValue>,
    /// Whether authentication is required
    pub auth_required: bool,
}

impl Match {
    /// Get a parameter as i64
    #[must_use]
    pub fn get_int(&self, name: &str) -> Option<i64> {
        self.params.get(name).and_then(ParamValue::as_int)
    }

    /// Get a parameter as f64
    #[must_use]
    pub fn get_float(&self, name: &str) -> Option<f64> {
        self.params.get(name).and_then(ParamValue::as_float)
    }

    /// Get a parameter as bool
    #[must_use]
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.params.get(name).and_then(ParamValue::as_bool)
    }
}

#[derive(Clone)]
struct MethodRoutes {
    router: MatchitRouter<HandlerId>,
    routes: HashMap<HandlerId, RouteInfo>,
}

impl MethodRoutes {
    fn new() -> Self {
        Self {
            router: MatchitRouter::new(),
            routes: HashMap::new(),
        }
    }
}

/// HTTP router over per-method radix tries
#[derive(Clone, Default)]
pub struct Router {
    method_routes: HashMap<Method, MethodRoutes>,
    next_handler_id: HandlerId,
}

impl Router {
    /// Create a new empty router
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a route and return its handler id
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` if the pattern is malformed or
    /// conflicts with an existing route.
    pub fn add_route(
        &mut self,
        method: Method,
        path: &str,
        auth_required: bool,
    ) -> Result<HandlerId> {
        let handler_id = self.next_handler_id;
        let route_info = RouteInfo::new(handler_id, method, path, auth_required);

        let method_routes = self
            .method_routes
            .entry(method)
            .or_insert_with(MethodRoutes::new);

        method_routes
            .router
            .insert(route_info.match_pattern.clone(), handler_id)
            .map_err(|e| Error::InvalidRoutePattern {
                pattern: path.to_string(),
                reason: e.to_string(),
            })?;

        method_routes.routes.insert(handler_id, route_info);
        self.next_handler_id += 1;

        Ok(handler_id)
    }

    /// Match a request path against registered routes
    ///
    /// Parameters that fail their declared conversion are kept as strings.
    ///
    /// # Errors
    ///
    /// Returns `Error::RouteNotFound` if no matching route exists
    pub fn match_route(&self, method: Method, path: &str) -> Result<Match> {
        let not_found = || Error::RouteNotFound {
            path: path.to_string(),
        };

        let method_routes = self.method_routes.get(&method).ok_or_else(not_found)?;
        let matched = method_routes.router.at(path).map_err(|_| not_found())?;
        let handler_id = *matched.value;
        let route_info = method_routes.routes.get(&handler_id).ok_or_else(not_found)?;

        let params = matched
            .params
            .iter()
            .map(|(name, value)| {
                let typed = convert_param(value, route_info.get_param_type(name))
                    .unwrap_or_else(|_| ParamValue::String(value.to_string()));
                (name.to_string(), typed)
            })
            .collect();

        Ok(Match {
            handler_id,
            params,
            auth_required: route_info.auth_required,
        })
    }

    /// All registered routes ordered by handler id
    #[must_use]
    pub fn routes(&self) -> Vec<&RouteInfo> {
        let mut routes: Vec<&RouteInfo> = self
            .method_routes
            .values()
            .flat_map(|m| m.routes.values())
            .collect();
        routes.sort_by_key(|r| r.handler_id);
        routes
    }

    /// Number of registered routes
    #[must_use]
    pub const fn len(&self) -> usize {
        self.next_handler_id
    }

    /// Whether no routes are registered
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.next_handler_id == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_routing() {
        let mut router = Router::new();

        let id1 = router.add_route(Method::Get, "/", false).unwrap();
        let id2 = router.add_route(Method::Get, "/users", false).unwrap();
        let id3 = router.add_route(Method::Post, "/users", false).unwrap();

        assert_eq!((id1, id2, id3), (0, 1, 2));
        assert_eq!(router.match_route(Method::Get, "/users").unwrap().handler_id, 1);
        assert_eq!(router.match_route(Method::Post, "/users").unwrap().handler_id, 2);
    }

    #[test]
    fn test_typed_and_colon_parameters() {
        let mut router = Router::new();
        router
            .add_route(Method::Get, "/orders/{id:int}/status/{active:bool}", false)
            .unwrap();
        router.add_route(Method::Get, "/users/:name", false).unwrap();

        let m = router
            .match_route(Method::Get, "/orders/42/status/true")
            .unwrap();
        assert_eq!(m.get_int("id"), Some(42));
        assert_eq!(m.get_bool("active"), Some(true));

        let m = router.match_route(Method::Get, "/users/alice").unwrap();
        assert_eq!(
            m.params.get("name"),
            Some(&ParamValue::String("alice".to_string()))
        );
    }

    #[test]
    fn test_invalid_type_falls_back_to_string() {
        let mut router = Router::new();
        router.add_route(Method::Get, "/users/{id:int}", false).unwrap();

        let m = router.match_route(Method::Get, "/users/abc").unwrap();
        assert_eq!(m.params.get("id"), Some(&ParamValue::String("abc".to_string())));
    }

    #[test]
    fn test_unmatched_method_and_path() {
        let mut router = Router::new();
        router.add_route(Method::Get, "/users", false).unwrap();

        assert!(router.match_route(Method::Post, "/users").is_err());
        assert!(router.match_route(Method::Get, "/nope").is_err());
    }

    #[test]
    fn test_conflicting_route_keeps_ids_dense() {
        let mut router = Router::new();
        router.add_route(Method::Get, "/users/{id}", false).unwrap();
        assert!(router.add_route(Method::Get, "/users/{id}", false).is_err());
        assert_eq!(router.add_route(Method::Get, "/posts", false).unwrap(), 1);
        assert_eq!(router.routes().len(), 2);
    }
}
