//! # Migration Ledger
//!
//! The `bourbon_migrations` table. A row means the migration is applied;
//! no row means pending. Nothing else decides whether a migration ran.
//!
//! [`Ledger::insert_statement`] and [`Ledger::delete_statement`] let a
//! migration write its row in the same transaction as its schema change.

use crate::database::{DatabasePool, DbValue, Statement};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::debug;

/// Ledger table name
pub const LEDGER_TABLE: &str = "bourbon_migrations";

/// One applied migration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRecord {
    /// Migration id
    pub id: String,
    /// Owning application
    pub app: String,
    /// When it was applied
    pub applied_at: DateTime<Utc>,
}

impl MigrationRecord {
    /// Record of `id` applied at the current time
    #[must_use]
    pub fn now(id: &str, app: &str) -> Self {
        Self {
            id: id.to_string(),
            app: app.to_string(),
            applied_at: Utc::now(),
        }
    }

    fn from_row(row: &HashMap<String, DbValue>) -> Result<Self> {
        let text = |column: &str| -> Result<String> {
            row.get(column)
                .and_then(DbValue::as_str)
                .map(ToString::to_string)
                .ok_or_else(|| Error::Database {
                    message: format!("{LEDGER_TABLE}.{column} is missing or not text"),
                })
        };

        let applied_at = text("applied_at")?;
        let applied_at = DateTime::parse_from_rfc3339(&applied_at)
            .map_err(|e| Error::Database {
                message: format!("{LEDGER_TABLE}.applied_at `{applied_at}` is invalid: {e}"),
            })?
            .with_timezone(&Utc);

        Ok(Self {
            id: text("id")?,
            app: text("app_name")?,
            applied_at,
        })
    }
}

/// Access to the ledger table
#[derive(Debug, Clone)]
pub struct Ledger {
    db: DatabasePool,
}

impl Ledger {
    /// Ledger stored in `db`
    #[must_use]
    pub const fn new(db: DatabasePool) -> Self {
        Self { db }
    }

    /// Create the table if it does not exist
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` when the statement fails.
    pub async fn ensure_table(&self) -> Result<()> {
        self.db
            .execute(&format!(
                "CREATE TABLE IF NOT EXISTS {LEDGER_TABLE} (\
                 id VARCHAR(255) PRIMARY KEY, \
                 app_name VARCHAR(255) NOT NULL, \
                 applied_at VARCHAR(64) NOT NULL)"
            ))
            .await?;
        Ok(())
    }

    /// Mark `id` as applied now
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` when the insert fails, including when the
    /// id is already recorded.
    pub async fn record(&self, id: &str, app: &str) -> Result<MigrationRecord> {
        let record = MigrationRecord::now(id, app);
        let insert = self.insert_statement(&record);
        self.db.execute_with(&insert.sql, &insert.params).await?;
        debug!(id = %id, app = %app, "Migration recorded");
        Ok(record)
    }

    /// Insert of `record`, for callers running it in their own transaction
    #[must_use]
    pub fn insert_statement(&self, record: &MigrationRecord) -> Statement {
        let dialect = self.db.dialect();
        Statement::with_params(
            format!(
                "INSERT INTO {LEDGER_TABLE} (id, app_name, applied_at) VALUES ({}, {}, {})",
                dialect.placeholder(1),
                dialect.placeholder(2),
                dialect.placeholder(3)
            ),
            vec![
                DbValue::from(record.id.as_str()),
                DbValue::from(record.app.as_str()),
                DbValue::from(record.applied_at.to_rfc3339()),
            ],
        )
    }

    /// Delete of the record of `id`
    #[must_use]
    pub fn delete_statement(&self, id: &str) -> Statement {
        Statement::with_params(
            format!(
                "DELETE FROM {LEDGER_TABLE} WHERE id = {}",
                self.db.dialect().placeholder(1)
            ),
            vec![DbValue::from(id)],
        )
    }

    /// Remove the record of `id`; returns whether one existed
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` when the delete fails.
    pub async fn remove(&self, id: &str) -> Result<bool> {
        let delete = self.delete_statement(id);
        let removed = self.db.execute_with(&delete.sql, &delete.params).await?;
        debug!(id = %id, removed, "Migration record removed");
        Ok(removed > 0)
    }

    /// Whether `id` is recorded
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` when the query fails.
    pub async fn is_applied(&self, id: &str) -> Result<bool> {
        let rows = self
            .db
            .fetch_all_with(
                &format!(
                    "SELECT id FROM {LEDGER_TABLE} WHERE id = {}",
                    self.db.dialect().placeholder(1)
                ),
                &[DbValue::from(id)],
            )
            .await?;
        Ok(!rows.is_empty())
    }

    /// Every record, ordered by id
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` when the query fails or a row is malformed.
    pub async fn applied(&self) -> Result<Vec<MigrationRecord>> {
        self.db
            .fetch_all(&format!(
                "SELECT id, app_name, applied_at FROM {LEDGER_TABLE} ORDER BY id"
            ))
            .await?
            .iter()
            .map(MigrationRecord::from_row)
            .collect()
    }

    /// Records of one application, ordered by id
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` when the query fails or a row is malformed.
    pub async fn applied_by_app(&self, app: &str) -> Result<Vec<MigrationRecord>> {
        self.db
            .fetch_all_with(
                &format!(
                    "SELECT id, app_name, applied_at FROM {LEDGER_TABLE} WHERE app_name = {} ORDER BY id",
                    self.db.dialect().placeholder(1)
                ),
                &[DbValue::from(app)],
            )
            .await?
            .iter()
            .map(MigrationRecord::from_row)
            .collect()
    }
}
