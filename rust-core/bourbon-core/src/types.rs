//! # Path Parameter Types
//!
//! Conversion of raw path segments into typed values.
//!
//! Route patterns declare a parameter either as `{name}` / `{name:type}`
//! or with the shorthand `:name`. Everything without a type converts to
//! [`ParamValue::String`].

use crate::error::{Error, Result};
use serde::Serialize;
use std::fmt;

/// Supported path parameter types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ParamType {
    /// No conversion
    #[default]
    String,
    /// Parses to i64
    Int,
    /// Parses to f64
    Float,
    /// Parses "true"/"false", "1"/"0", "yes"/"no"
    Bool,
}

impl ParamType {
    /// Parse type specifier from route pattern (e.g., "int" from "{id:int}")
    #[must_use]
    pub fn from_specifier(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "int" | "integer" | "i64" | "uint" => Self::Int,
            "float" | "f64" | "number" => Self::Float,
            "bool" | "boolean" => Self::Bool,
            _ => Self::String,
        }
    }

    /// Get the type name for error messages
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Converted parameter value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// String value (no conversion performed)
    String(String),
    /// Integer value (i64)
    Int(i64),
    /// Float value (f64)
    Float(f64),
    /// Boolean value
    Bool(bool),
}

impl ParamValue {
    /// Get as i64 if Int variant, or parse a String variant
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Get as f64 if Float variant
    #[must_use]
    pub const fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Get as bool if Bool variant
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Borrow the raw text if this is a String variant
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// Convert raw string to typed value based on `ParamType`
///
/// # Errors
///
/// Returns `Error::InvalidParam` if conversion fails.
pub fn convert_param(raw: &str, param_type: ParamType) -> Result<ParamValue> {
    let invalid = || Error::InvalidParam {
        value: raw.to_string(),
        reason: format!("expected {param_type}"),
    };

    match param_type {
        ParamType::String => Ok(ParamValue::String(raw.to_string())),
        ParamType::Int => raw.parse::<i64>().map(ParamValue::Int).map_err(|_| invalid()),
        ParamType::Float => raw
            .parse::<f64>()
            .map(ParamValue::Float)
            .map_err(|_| invalid()),
        ParamType::Bool => match raw.to_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(ParamValue::Bool(true)),
            "false" | "0" | "no" => Ok(ParamValue::Bool(false)),
            _ => Err(invalid()),
        },
    }
}

/// Parse a path segment pattern to extract name and type
///
/// - `{id}` -> ("id", String)
/// - `{id:int}` -> ("id", Int)
/// - `:id` -> ("id", String)
///
/// Returns `None` for static segments.
#[must_use]
pub fn parse_param_pattern(segment: &str) -> Option<(String, ParamType)> {
    if let Some(inner) = segment
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
    {
        return Some(match inner.split_once(':') {
            Some((name, type_spec)) => (name.to_string(), ParamType::from_specifier(type_spec)),
            None => (inner.to_string(), ParamType::String),
        });
    }

    segment
        .strip_prefix(':')
        .filter(|name| !name.is_empty())
        .map(|name| (name.to_string(), ParamType::String))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_type_from_specifier() {
        assert_eq!(ParamType::from_specifier("int"), ParamType::Int);
        assert_eq!(ParamType::from_specifier("INT"), ParamType::Int);
        assert_eq!(ParamType::from_specifier("float"), ParamType::Float);
        assert_eq!(ParamType::from_specifier("bool"), ParamType::Bool);
        assert_eq!(ParamType::from_specifier("slug"), ParamType::String);
    }

    #[test]
    fn test_convert_int() {
        assert_eq!(convert_param("-456", ParamType::Int).unwrap(), ParamValue::Int(-456));
        assert!(convert_param("abc", ParamType::Int).is_err());
    }

    #[test]
    fn test_convert_bool() {
        assert_eq!(convert_param("yes", ParamType::Bool).unwrap(), ParamValue::Bool(true));
        assert_eq!(convert_param("0", ParamType::Bool).unwrap(), ParamValue::Bool(false));
        assert!(convert_param("maybe", ParamType::Bool).is_err());
    }

    #[test]
    fn test_parse_param_pattern() {
        assert_eq!(
            parse_param_pattern("{id:int}"),
            Some(("id".to_string(), ParamType::Int))
        );
        assert_eq!(
            parse_param_pattern(":slug"),
            Some(("slug".to_string(), ParamType::String))
        );
        assert_eq!(parse_param_pattern(":"), None);
        assert_eq!(parse_param_pattern("static"), None);
    }

    #[test]
    fn test_string_value_parses_as_int() {
        let value = ParamValue::String("42".to_string());
        assert_eq!(value.as_int(), Some(42));
        assert_eq!(value.to_string(), "42");
    }
}
