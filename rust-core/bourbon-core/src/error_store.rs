//! # Error Store
//!
//! Optional `error_logs` table receiving server errors and recovered
//! panics, enabled by `logging.store_errors_db`.

use crate::database::{DatabasePool, DbValue, Dialect};
use crate::error::Result;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

/// Table name
pub const ERROR_TABLE: &str = "error_logs";

/// One stored error
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorLog {
    /// When it happened
    pub timestamp: DateTime<Utc>,
    /// `error` for 5xx responses, `panic` for recovered panics
    pub level: String,
    /// Summary line
    pub message: String,
    /// HTTP method
    pub method: String,
    /// Request path
    pub path: String,
    /// Response status
    pub status: u16,
    /// Client address
    pub ip: String,
    /// `User-Agent` header
    pub user_agent: String,
    /// Panic location or backtrace, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ErrorLog {
    fn from_row(row: &HashMap<String, DbValue>) -> Option<Self> {
        let text = |column: &str| row.get(column).and_then(DbValue::as_str).map(ToString::to_string);
        Some(Self {
            timestamp: DateTime::parse_from_rfc3339(&text("timestamp")?)
                .ok()?
                .with_timezone(&Utc),
            level: text("level")?,
            message: text("message")?,
            method: text("method").unwrap_or_default(),
            path: text("path").unwrap_or_default(),
            status: row
                .get("status")
                .and_then(DbValue::as_int)
                .and_then(|s| u16::try_from(s).ok())
                .unwrap_or_default(),
            ip: text("ip").unwrap_or_default(),
            user_agent: text("user_agent").unwrap_or_default(),
            stack: text("stack"),
        })
    }
}

/// Fixed-width UTC text, so stored timestamps sort lexically
fn stamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Writes and queries [`ErrorLog`]s
#[derive(Debug, Clone)]
pub struct ErrorStore {
    db: DatabasePool,
}

impl ErrorStore {
    /// Store backed by `db`
    #[must_use]
    pub const fn new(db: DatabasePool) -> Self {
        Self { db }
    }

    /// Create the table and its indexes if missing
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` when a statement fails.
    pub async fn migrate(&self) -> Result<()> {
        let columns = "message TEXT NOT NULL, \
                       method TEXT, \
                       path TEXT, \
                       status INTEGER, \
                       ip TEXT, \
                       user_agent TEXT, \
                       stack TEXT";
        let indexes = [
            format!("CREATE INDEX IF NOT EXISTS idx_{ERROR_TABLE}_timestamp ON {ERROR_TABLE} (timestamp)"),
            format!("CREATE INDEX IF NOT EXISTS idx_{ERROR_TABLE}_status ON {ERROR_TABLE} (status)"),
        ];

        let id = match self.db.dialect() {
            Dialect::Sqlite => "INTEGER PRIMARY KEY AUTOINCREMENT",
            Dialect::Postgres => "BIGSERIAL PRIMARY KEY",
            Dialect::MySql => "BIGINT AUTO_INCREMENT PRIMARY KEY",
        };

        let statements = match self.db.dialect() {
            Dialect::Sqlite | Dialect::Postgres => {
                let mut statements = vec![format!(
                    "CREATE TABLE IF NOT EXISTS {ERROR_TABLE} (\
                     id {id}, \
                     timestamp TEXT NOT NULL, \
                     level TEXT NOT NULL, \
                     {columns})"
                )];
                statements.extend(indexes);
                statements
            }
            // no `CREATE INDEX IF NOT EXISTS`, and TEXT cannot be indexed
            Dialect::MySql => vec![format!(
                "CREATE TABLE IF NOT EXISTS {ERROR_TABLE} (\
                 id {id}, \
                 timestamp VARCHAR(32) NOT NULL, \
                 level VARCHAR(16) NOT NULL, \
                 {columns}, \
                 INDEX idx_{ERROR_TABLE}_timestamp (timestamp), \
                 INDEX idx_{ERROR_TABLE}_status (status))"
            )],
        };
        self.db.execute_batch(&statements).await
    }

    /// Insert one entry
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` when the insert fails.
    pub async fn store(&self, log: &ErrorLog) -> Result<()> {
        let dialect = self.db.dialect();
        let placeholders: Vec<String> = (1..=9).map(|n| dialect.placeholder(n)).collect();
        self.db
            .execute_with(
                &format!(
                    "INSERT INTO {ERROR_TABLE} \
                     (timestamp, level, message, method, path, status, ip, user_agent, stack) \
                     VALUES ({})",
                    placeholders.join(", ")
                ),
                &[
                    DbValue::from(stamp(log.timestamp)),
                    DbValue::from(log.level.as_str()),
                    DbValue::from(log.message.as_str()),
                    DbValue::from(log.method.as_str()),
                    DbValue::from(log.path.as_str()),
                    DbValue::Int(i64::from(log.status)),
                    DbValue::from(log.ip.as_str()),
                    DbValue::from(log.user_agent.as_str()),
                    log.stack.as_deref().map_or(DbValue::Null, DbValue::from),
                ],
            )
            .await?;
        debug!(status = log.status, path = %log.path, "Error stored");
        Ok(())
    }

    /// Delete entries older than `age`; returns how many were removed
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` when the delete fails.
    pub async fn clean(&self, age: Duration) -> Result<u64> {
        let cutoff = stamp(Utc::now() - age);
        self.db
            .execute_with(
                &format!(
                    "DELETE FROM {ERROR_TABLE} WHERE timestamp < {}",
                    self.db.dialect().placeholder(1)
                ),
                &[DbValue::from(cutoff)],
            )
            .await
    }

    /// Newest entries first
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` when the query fails.
    pub async fn recent(&self, limit: i64) -> Result<Vec<ErrorLog>> {
        self.query("", &[], limit).await
    }

    /// Newest entries with `status`
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` when the query fails.
    pub async fn by_status(&self, status: u16, limit: i64) -> Result<Vec<ErrorLog>> {
        let filter = format!("WHERE status = {}", self.db.dialect().placeholder(1));
        self.query(&filter, &[DbValue::Int(i64::from(status))], limit)
            .await
    }

    /// Newest 5xx entries
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` when the query fails.
    pub async fn server_errors(&self, limit: i64) -> Result<Vec<ErrorLog>> {
        self.query("WHERE status >= 500", &[], limit).await
    }

    async fn query(&self, filter: &str, params: &[DbValue], limit: i64) -> Result<Vec<ErrorLog>> {
        let mut bound = params.to_vec();
        bound.push(DbValue::Int(limit));
        let sql = format!(
            "SELECT timestamp, level, message, method, path, status, ip, user_agent, stack \
             FROM {ERROR_TABLE} {filter} ORDER BY timestamp DESC, id DESC LIMIT {}",
            self.db.dialect().placeholder(bound.len())
        );
        let rows = self.db.fetch_all_with(&sql, &bound).await?;
        Ok(rows.iter().filter_map(ErrorLog::from_row).collect())
    }
}
