//! # Models
//!
//! [`BaseModel`] carries the standard columns every table gets; the
//! [`Model`] trait is implemented with `#[derive(Model)]`.

use crate::migrate::naming;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Standard columns: primary key, timestamps and the soft-delete marker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseModel {
    /// Primary key
    pub id: i64,
    /// Insert time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
    /// Soft-delete time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl BaseModel {
    /// Column names, in table order
    pub const COLUMNS: &'static [&'static str] = &["id", "created_at", "updated_at", "deleted_at"];

    /// Unsaved row stamped with the current time
    #[must_use]
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Bump `updated_at`
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Mark as soft-deleted
    pub fn soft_delete(&mut self) {
        let now = Utc::now();
        self.deleted_at = Some(now);
        self.updated_at = now;
    }

    /// Whether the row is soft-deleted
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

impl Default for BaseModel {
    fn default() -> Self {
        Self::new()
    }
}

/// A struct backed by a table
pub trait Model {
    /// Struct name
    const NAME: &'static str;

    /// Table name, `users` for `User`
    fn table_name() -> String {
        naming::table_name(Self::NAME)
    }

    /// Column names in declaration order
    fn columns() -> Vec<&'static str>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Category;

    impl Model for Category {
        const NAME: &'static str = "Category";

        fn columns() -> Vec<&'static str> {
            vec!["name"]
        }
    }

    #[test]
    fn test_default_table_name() {
        assert_eq!(Category::table_name(), "categorys");
        assert_eq!(Category::columns(), vec!["name"]);
    }

    #[test]
    fn test_soft_delete() {
        let mut base = BaseModel::new();
        assert!(!base.is_deleted());
        base.soft_delete();
        assert!(base.is_deleted());
        assert!(base.updated_at >= base.created_at);
    }

    #[test]
    fn test_serde_skips_missing_deleted_at() {
        let base = BaseModel::new();
        let json = serde_json::to_value(&base).unwrap();
        assert!(json.get("deleted_at").is_none());
        let back: BaseModel = serde_json::from_value(json).unwrap();
        assert_eq!(back, base);
    }
}
