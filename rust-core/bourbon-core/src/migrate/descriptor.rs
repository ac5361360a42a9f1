//! # Model Descriptors
//!
//! Structural fingerprints of model definitions.
//!
//! A [`FieldDescriptor`] is identified by its name; two descriptors with the
//! same name describe the same column, and they differ when either the
//! type signature or the tag metadata differs. A [`ModelDescriptor`] carries
//! a content hash over its fields sorted by name, so reordering fields in
//! source never registers as a change. Whether the model embeds `BaseModel`
//! is part of the hash: it decides whether the table gets the standard
//! `id`, `created_at`, `updated_at` and `deleted_at` columns.

use super::naming;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// One field of a model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Field name as written in source
    pub name: String,
    /// Canonical type signature, e.g. `Option<String>`
    #[serde(rename = "type")]
    pub type_signature: String,
    /// Canonical `#[orm(...)]` metadata, empty when absent
    #[serde(default)]
    pub tag: String,
}

impl FieldDescriptor {
    /// Create a field descriptor
    pub fn new(
        name: impl Into<String>,
        type_signature: impl Into<String>,
        tag: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            type_signature: type_signature.into(),
            tag: tag.into(),
        }
    }

    /// Whether `other` has the same type and tag
    #[must_use]
    pub fn same_definition(&self, other: &Self) -> bool {
        self.type_signature == other.type_signature && self.tag == other.tag
    }

    /// Parsed tag metadata
    #[must_use]
    pub fn tag(&self) -> FieldTag {
        FieldTag::parse(&self.tag)
    }

    /// Column name: the `column` tag if present, else the snake-cased name
    #[must_use]
    pub fn column_name(&self) -> String {
        self.tag()
            .get("column")
            .map_or_else(|| naming::snake_case(&self.name), ToString::to_string)
    }

    /// `Option<T>` fields map to nullable columns
    #[must_use]
    pub fn is_nullable(&self) -> bool {
        unwrap_option(&self.type_signature).is_some()
    }

    fn hash_line(&self) -> String {
        format!("{}:{}:{}\n", self.name, self.type_signature, self.tag)
    }
}

/// Inner type of an `Option<T>` signature
#[must_use]
pub fn unwrap_option(type_signature: &str) -> Option<&str> {
    ["Option<", "std::option::Option<", "core::option::Option<"]
        .iter()
        .find_map(|prefix| type_signature.strip_prefix(prefix))
        .and_then(|rest| rest.strip_suffix('>'))
}

/// One model with its fields and content hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Model (struct) name
    pub name: String,
    /// Fields in declaration order
    pub fields: Vec<FieldDescriptor>,
    /// Whether the struct embeds `BaseModel`
    #[serde(default = "embeds_base_model")]
    pub base_model: bool,
    /// Content hash over the fields sorted by name
    #[serde(default)]
    pub hash: String,
}

// documents written before the flag existed always had the base columns
const fn embeds_base_model() -> bool {
    true
}

impl ModelDescriptor {
    /// Create a descriptor for a model embedding `BaseModel`
    pub fn new(name: impl Into<String>, fields: Vec<FieldDescriptor>) -> Self {
        let hash = model_hash(&fields, true);
        Self {
            name: name.into(),
            fields,
            base_model: true,
            hash,
        }
    }

    /// Set whether the model embeds `BaseModel`, recomputing the hash
    #[must_use]
    pub fn with_base_model(mut self, base_model: bool) -> Self {
        self.base_model = base_model;
        self.hash = self.computed_hash();
        self
    }

    /// Look up a field by name
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Table backing this model
    #[must_use]
    pub fn table_name(&self) -> String {
        naming::table_name(&self.name)
    }

    /// Hash recomputed from the fields, ignoring the stored value
    #[must_use]
    pub fn computed_hash(&self) -> String {
        model_hash(&self.fields, self.base_model)
    }
}

fn hash_fields(hasher: &mut Sha256, fields: &[FieldDescriptor]) {
    let mut sorted: Vec<&FieldDescriptor> = fields.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));
    for field in sorted {
        hasher.update(field.hash_line().as_bytes());
    }
}

/// SHA-256 over `name:type:tag` lines of the fields sorted by name
#[must_use]
pub fn content_hash(fields: &[FieldDescriptor]) -> String {
    let mut hasher = Sha256::new();
    hash_fields(&mut hasher, fields);
    format!("{:x}", hasher.finalize())
}

/// [`content_hash`] extended with a `+BaseModel` line for embedding models
#[must_use]
pub fn model_hash(fields: &[FieldDescriptor], base_model: bool) -> String {
    let mut hasher = Sha256::new();
    hash_fields(&mut hasher, fields);
    if base_model {
        hasher.update(b"+BaseModel\n");
    }
    format!("{:x}", hasher.finalize())
}

/// SHA-256 over every model (sorted by name) and its fields
#[must_use]
pub fn models_hash(models: &[ModelDescriptor]) -> String {
    let mut sorted: Vec<&ModelDescriptor> = models.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));

    let mut hasher = Sha256::new();
    for model in sorted {
        hasher.update(format!("model {}\n", model.name).as_bytes());
        hasher.update(model.computed_hash().as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

/// Parsed `#[orm(...)]` metadata
///
/// Entries are kept sorted by key so that the rendered form is canonical:
/// `#[orm(unique, size = 64)]` and `#[orm(size = 64, unique)]` both render
/// as `size = 64, unique`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldTag {
    entries: BTreeMap<String, Option<String>>,
}

impl FieldTag {
    /// Empty tag
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a flag (`unique`) or a key/value pair (`size = 64`)
    pub fn insert(&mut self, key: impl Into<String>, value: Option<String>) {
        self.entries.insert(key.into(), value);
    }

    /// Parse the canonical text form; malformed pieces are skipped
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let mut tag = Self::new();
        for part in split_top_level(raw) {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            match part.split_once('=') {
                Some((key, value)) => {
                    tag.insert(key.trim(), Some(unquote(value.trim())));
                }
                None => tag.insert(part, None),
            }
        }
        tag
    }

    /// Value of a key/value entry
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).and_then(Option::as_deref)
    }

    /// Whether the key is present, as flag or pair
    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// `size = N`
    #[must_use]
    pub fn size(&self) -> Option<u32> {
        self.get("size").and_then(|s| s.parse().ok())
    }

    /// Whether there are no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for FieldTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match value {
                None => f.write_str(key)?,
                Some(v) if is_bare(v) => write!(f, "{key} = {v}")?,
                Some(v) => write!(f, "{key} = \"{}\"", v.replace('\\', "\\\\").replace('"', "\\\""))?,
            }
        }
        Ok(())
    }
}

fn is_bare(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-')
}

fn unquote(value: &str) -> String {
    match value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
        Some(inner) => inner.replace("\\\"", "\"").replace("\\\\", "\\"),
        None => value.to_string(),
    }
}

/// Split on commas that are not inside double quotes
fn split_top_level(raw: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut escaped = false;
    let mut start = 0;

    for (i, c) in raw.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(&raw[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&raw[start..]);
    parts
}
