//! # JSON Serialization
//!
//! Parsing goes through simd-json; serialization through `serde_json`.
//! Request bodies and the persisted migration state both use these helpers.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Parse a JSON string into a typed value
///
/// # Errors
///
/// Returns `Error::Json` if parsing fails
pub fn parse_json<T: DeserializeOwned>(json_str: &str) -> Result<T> {
    let mut bytes = json_str.as_bytes().to_vec();
    parse_json_bytes(&mut bytes)
}

/// Parse JSON bytes in place into a typed value
///
/// simd-json mutates the buffer while parsing.
///
/// # Errors
///
/// Returns `Error::Json` if parsing fails
pub fn parse_json_bytes<T: DeserializeOwned>(bytes: &mut [u8]) -> Result<T> {
    simd_json::from_slice(bytes).map_err(|e| Error::Json {
        reason: format!("parse error: {e}"),
    })
}

/// Serialize a value to a compact JSON string
///
/// # Errors
///
/// Returns `Error::Json` if the value cannot be serialized
pub fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(Error::from)
}

/// Serialize a value to a pretty-printed JSON string
///
/// # Errors
///
/// Returns `Error::Json` if the value cannot be serialized
pub fn to_json_pretty<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::collections::BTreeMap;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Snapshot {
        name: String,
        fields: Vec<String>,
    }

    #[test]
    fn test_parse_json_object() {
        let data: Snapshot = parse_json(r#"{"name": "User", "fields": ["email"]}"#).unwrap();
        assert_eq!(data.name, "User");
        assert_eq!(data.fields, vec!["email".to_string()]);
    }

    #[test]
    fn test_pretty_output_parses_back() {
        let mut map = BTreeMap::new();
        map.insert("users".to_string(), 3);
        let text = to_json_pretty(&map).unwrap();
        assert!(text.contains('\n'));
        let back: BTreeMap<String, i32> = parse_json(&text).unwrap();
        assert_eq!(back, map);
    }

    #[test]
    fn test_invalid_json() {
        let result: Result<Snapshot> = parse_json("not valid json");
        assert!(matches!(result, Err(Error::Json { .. })));
    }
}
