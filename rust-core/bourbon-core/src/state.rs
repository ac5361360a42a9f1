//! # Application State
//!
//! Named service registry shared by the application and every handler.
//!
//! Values are type-erased and cloned out on lookup, so store cheap handles
//! (`Arc`, pools, config structs) rather than large values.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

type Services = HashMap<String, Box<dyn Any + Send + Sync>>;

/// Thread-safe registry of named values
#[derive(Clone, Default)]
pub struct AppState {
    data: Arc<RwLock<Services>>,
}

impl AppState {
    /// Create a new empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a value under `key`, replacing any previous value
    pub fn set<T: Send + Sync + 'static>(&self, key: impl Into<String>, value: T) {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        data.insert(key.into(), Box::new(value));
    }

    /// Clone out the value under `key`
    ///
    /// Returns `None` if the key is missing or holds another type.
    #[must_use]
    pub fn get<T: Clone + Send + Sync + 'static>(&self, key: &str) -> Option<T> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        data.get(key)
            .and_then(|boxed| boxed.downcast_ref::<T>())
            .cloned()
    }

    /// Check if a key exists
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        data.contains_key(key)
    }

    /// Remove a value by key
    pub fn remove(&self, key: &str) -> bool {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        data.remove(key).is_some()
    }

    /// Registered keys, sorted
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        let mut keys: Vec<String> = data.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of registered values
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Check if the registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("keys", &self.keys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get() {
        let state = AppState::new();
        state.set("count", 42i32);
        state.set("name", "test".to_string());

        assert_eq!(state.get::<i32>("count"), Some(42));
        assert_eq!(state.get::<String>("name"), Some("test".to_string()));
        assert_eq!(state.keys(), vec!["count", "name"]);
    }

    #[test]
    fn test_type_mismatch_and_missing() {
        let state = AppState::new();
        state.set("count", 42i32);

        assert_eq!(state.get::<String>("count"), None);
        assert_eq!(state.get::<i32>("missing"), None);
    }

    #[test]
    fn test_remove() {
        let state = AppState::new();
        state.set("key", "value".to_string());
        assert!(state.remove("key"));
        assert!(!state.contains("key"));
        assert!(state.is_empty());
    }

    #[test]
    fn test_shared_across_threads() {
        let state = AppState::new();
        let state_clone = state.clone();

        std::thread::spawn(move || state_clone.set("thread", 123i32))
            .join()
            .unwrap();
        assert_eq!(state.get::<i32>("thread"), Some(123));
    }
}
