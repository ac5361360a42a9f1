//! # Database Module
//!
//! Async database connectivity with SQLx for PostgreSQL, MySQL and SQLite.
//!
//! ## Design Principles (SOLID)
//!
//! - **S**: Only handles database operations
//! - **O**: `DatabasePool` enum extensible for new backends
//! - **D**: Callers see `DbValue` rows, never driver row types

use crate::error::{Error, Result};
use serde::Serialize;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row, TypeInfo};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

/// SQL dialect of a connection, used by the migration SQL renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Dialect {
    /// SQLite
    #[default]
    Sqlite,
    /// PostgreSQL
    Postgres,
    /// MySQL and MariaDB
    MySql,
}

impl Dialect {
    /// Resolve a driver name from configuration
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for unsupported drivers.
    pub fn from_driver(driver: &str) -> Result<Self> {
        match driver.to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(Self::Sqlite),
            "postgres" | "postgresql" | "pg" => Ok(Self::Postgres),
            "mysql" | "mariadb" => Ok(Self::MySql),
            other => Err(Error::Config {
                message: format!("unsupported database driver: {other}"),
            }),
        }
    }

    /// Bind placeholder for the `n`th (1-based) parameter
    #[must_use]
    pub fn placeholder(self, n: usize) -> String {
        match self {
            Self::Sqlite | Self::MySql => "?".to_string(),
            Self::Postgres => format!("${n}"),
        }
    }

    /// Quote an identifier: backticks on MySQL, double quotes elsewhere
    #[must_use]
    pub fn quote_ident(self, name: &str) -> String {
        match self {
            Self::MySql => format!("`{}`", name.replace('`', "``")),
            Self::Sqlite | Self::Postgres => format!("\"{}\"", name.replace('"', "\"\"")),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sqlite => "sqlite",
            Self::Postgres => "postgres",
            Self::MySql => "mysql",
        })
    }
}

/// Database connection pool supporting multiple backends
#[derive(Clone, Debug)]
pub enum DatabasePool {
    /// SQLite connection pool
    Sqlite(SqlitePool),
    /// PostgreSQL connection pool
    Postgres(PgPool),
    /// MySQL connection pool
    MySql(MySqlPool),
}

/// One SQL statement with its bound parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// SQL text
    pub sql: String,
    /// Values for the placeholders, in order
    pub params: Vec<DbValue>,
}

impl Statement {
    /// Statement without parameters
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Statement with bound parameters
    pub fn with_params(sql: impl Into<String>, params: Vec<DbValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

macro_rules! bind_params {
    ($query:expr, $params:expr) => {{
        let mut query = $query;
        for param in $params {
            query = match param {
                DbValue::Null => query.bind(None::<String>),
                DbValue::Int(v) => query.bind(*v),
                DbValue::Float(v) => query.bind(*v),
                DbValue::String(v) => query.bind(v.clone()),
                DbValue::Bool(v) => query.bind(*v),
                DbValue::Bytes(v) => query.bind(v.clone()),
            };
        }
        query
    }};
}

fn query_error(e: &sqlx::Error) -> Error {
    Error::Database {
        message: format!("Query error: {e}"),
    }
}

impl DatabasePool {
    /// Connect using the URL scheme to pick the backend
    ///
    /// `sqlite:` URLs open SQLite, `postgres://` and `postgresql://` open
    /// PostgreSQL, `mysql://` and `mariadb://` open MySQL.
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` when the scheme is unknown or the
    /// connection fails.
    pub async fn connect(url: &str, max_connections: Option<u32>) -> Result<Self> {
        if url.starts_with("sqlite:") {
            Self::connect_sqlite(url, max_connections).await
        } else if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Self::connect_postgres(url, max_connections).await
        } else if url.starts_with("mysql://") || url.starts_with("mariadb://") {
            Self::connect_mysql(url, max_connections).await
        } else {
            Err(Error::Database {
                message: format!("unsupported database URL: {url}"),
            })
        }
    }

    /// Connect to a SQLite database
    ///
    /// # Example
    ///
    /// ```ignore
    /// let pool = DatabasePool::connect_sqlite("sqlite::memory:", Some(1)).await?;
    /// let pool = DatabasePool::connect_sqlite("sqlite:storage/database.db?mode=rwc", None).await?;
    /// ```
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` if the connection fails.
    pub async fn connect_sqlite(url: &str, max_connections: Option<u32>) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.unwrap_or(10))
            .connect(url)
            .await
            .map_err(|e| Error::Database {
                message: format!("SQLite connection failed: {e}"),
            })?;

        Ok(Self::Sqlite(pool))
    }

    /// Connect to a PostgreSQL database
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` if the connection fails.
    pub async fn connect_postgres(url: &str, max_connections: Option<u32>) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.unwrap_or(10))
            .connect(url)
            .await
            .map_err(|e| Error::Database {
                message: format!("PostgreSQL connection failed: {e}"),
            })?;

        Ok(Self::Postgres(pool))
    }

    /// Connect to a MySQL database
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` if the connection fails.
    pub async fn connect_mysql(url: &str, max_connections: Option<u32>) -> Result<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(max_connections.unwrap_or(10))
            .connect(url)
            .await
            .map_err(|e| Error::Database {
                message: format!("MySQL connection failed: {e}"),
            })?;

        Ok(Self::MySql(pool))
    }

    /// Dialect of the underlying backend
    #[must_use]
    pub const fn dialect(&self) -> Dialect {
        match self {
            Self::Sqlite(_) => Dialect::Sqlite,
            Self::Postgres(_) => Dialect::Postgres,
            Self::MySql(_) => Dialect::MySql,
        }
    }

    /// Execute a statement that doesn't return rows
    ///
    /// Returns the number of affected rows.
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` if the statement fails.
    pub async fn execute(&self, query: &str) -> Result<u64> {
        self.execute_with(query, &[]).await
    }

    /// Execute a statement with bound parameters
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` if the statement fails.
    pub async fn execute_with(&self, query: &str, params: &[DbValue]) -> Result<u64> {
        debug!(query = %query, params = params.len(), "execute");
        let affected = match self {
            Self::Sqlite(pool) => bind_params!(sqlx::query(query), params)
                .execute(pool)
                .await
                .map_err(|e| query_error(&e))?
                .rows_affected(),
            Self::Postgres(pool) => bind_params!(sqlx::query(query), params)
                .execute(pool)
                .await
                .map_err(|e| query_error(&e))?
                .rows_affected(),
            Self::MySql(pool) => bind_params!(sqlx::query(query), params)
                .execute(pool)
                .await
                .map_err(|e| query_error(&e))?
                .rows_affected(),
        };
        Ok(affected)
    }

    /// Execute several statements inside one transaction
    ///
    /// Nothing is committed unless every statement succeeds.
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` naming the failing statement.
    pub async fn execute_batch<S: AsRef<str>>(&self, statements: &[S]) -> Result<()> {
        let statements: Vec<Statement> = statements
            .iter()
            .map(|s| Statement::new(s.as_ref()))
            .collect();
        self.execute_transaction(&statements).await
    }

    /// Execute parameterised statements inside one transaction
    ///
    /// MySQL commits implicitly after DDL, so there a failure only undoes
    /// the data changes made since the last schema statement.
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` naming the failing statement.
    pub async fn execute_transaction(&self, statements: &[Statement]) -> Result<()> {
        let failed = |stmt: &str, e: &sqlx::Error| Error::Database {
            message: format!("statement `{stmt}` failed: {e}"),
        };

        macro_rules! run_in_transaction {
            ($pool:expr) => {{
                let mut tx = $pool.begin().await?;
                for stmt in statements {
                    debug!(query = %stmt.sql, params = stmt.params.len(), "execute in transaction");
                    bind_params!(sqlx::query(&stmt.sql), &stmt.params)
                        .execute(&mut *tx)
                        .await
                        .map_err(|e| failed(&stmt.sql, &e))?;
                }
                tx.commit().await?;
            }};
        }

        match self {
            Self::Sqlite(pool) => run_in_transaction!(pool),
            Self::Postgres(pool) => run_in_transaction!(pool),
            Self::MySql(pool) => run_in_transaction!(pool),
        }
        Ok(())
    }

    /// Fetch all rows from a query
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` if the query fails.
    pub async fn fetch_all(&self, query: &str) -> Result<Vec<HashMap<String, DbValue>>> {
        self.fetch_all_with(query, &[]).await
    }

    /// Fetch all rows from a query with bound parameters
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` if the query fails.
    pub async fn fetch_all_with(
        &self,
        query: &str,
        params: &[DbValue],
    ) -> Result<Vec<HashMap<String, DbValue>>> {
        match self {
            Self::Sqlite(pool) => {
                let rows: Vec<SqliteRow> = bind_params!(sqlx::query(query), params)
                    .fetch_all(pool)
                    .await
                    .map_err(|e| query_error(&e))?;
                Ok(rows.iter().map(sqlite_row_to_map).collect())
            }
            Self::Postgres(pool) => {
                let rows: Vec<PgRow> = bind_params!(sqlx::query(query), params)
                    .fetch_all(pool)
                    .await
                    .map_err(|e| query_error(&e))?;
                Ok(rows.iter().map(pg_row_to_map).collect())
            }
            Self::MySql(pool) => {
                let rows: Vec<MySqlRow> = bind_params!(sqlx::query(query), params)
                    .fetch_all(pool)
                    .await
                    .map_err(|e| query_error(&e))?;
                Ok(rows.iter().map(mysql_row_to_map).collect())
            }
        }
    }

    /// Fetch a single row (optional)
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` if the query fails.
    pub async fn fetch_optional(&self, query: &str) -> Result<Option<HashMap<String, DbValue>>> {
        match self {
            Self::Sqlite(pool) => {
                let row: Option<SqliteRow> = sqlx::query(query)
                    .fetch_optional(pool)
                    .await
                    .map_err(|e| query_error(&e))?;
                Ok(row.map(|r| sqlite_row_to_map(&r)))
            }
            Self::Postgres(pool) => {
                let row: Option<PgRow> = sqlx::query(query)
                    .fetch_optional(pool)
                    .await
                    .map_err(|e| query_error(&e))?;
                Ok(row.map(|r| pg_row_to_map(&r)))
            }
            Self::MySql(pool) => {
                let row: Option<MySqlRow> = sqlx::query(query)
                    .fetch_optional(pool)
                    .await
                    .map_err(|e| query_error(&e))?;
                Ok(row.map(|r| mysql_row_to_map(&r)))
            }
        }
    }

    /// Fetch exactly one row
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` if the query fails or returns no row.
    pub async fn fetch_one(&self, query: &str) -> Result<HashMap<String, DbValue>> {
        self.fetch_optional(query).await?.ok_or_else(|| Error::Database {
            message: format!("Query returned no rows: {query}"),
        })
    }

    /// Close the database connection pool
    pub async fn close(&self) {
        match self {
            Self::Sqlite(pool) => pool.close().await,
            Self::Postgres(pool) => pool.close().await,
            Self::MySql(pool) => pool.close().await,
        }
    }
}

/// Database value for bound parameters and fetched rows
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DbValue {
    /// Null value
    Null,
    /// Integer value
    Int(i64),
    /// Float value
    Float(f64),
    /// String value
    String(String),
    /// Boolean value
    Bool(bool),
    /// Binary data
    Bytes(Vec<u8>),
}

impl DbValue {
    /// Borrow the text of a String value
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Integer value, if any
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<&str> for DbValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for DbValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for DbValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

/// Convert SQLite row to `HashMap`
fn sqlite_row_to_map(row: &SqliteRow) -> HashMap<String, DbValue> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, column)| {
            let value = match column.type_info().name() {
                "INTEGER" | "BIGINT" | "INT8" => row.try_get::<i64, _>(i).map(DbValue::Int),
                "REAL" => row.try_get::<f64, _>(i).map(DbValue::Float),
                "BOOLEAN" => row.try_get::<bool, _>(i).map(DbValue::Bool),
                "BLOB" => row.try_get::<Vec<u8>, _>(i).map(DbValue::Bytes),
                "NULL" => row
                    .try_get::<i64, _>(i)
                    .map(DbValue::Int)
                    .or_else(|_| row.try_get::<String, _>(i).map(DbValue::String)),
                _ => row.try_get::<String, _>(i).map(DbValue::String),
            }
            .unwrap_or(DbValue::Null);
            (column.name().to_string(), value)
        })
        .collect()
}

/// Convert PostgreSQL row to `HashMap`
fn pg_row_to_map(row: &PgRow) -> HashMap<String, DbValue> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, column)| {
            let value = match column.type_info().name() {
                "INT2" => row.try_get::<i16, _>(i).map(|v| DbValue::Int(v.into())),
                "INT4" => row.try_get::<i32, _>(i).map(|v| DbValue::Int(v.into())),
                "INT8" => row.try_get::<i64, _>(i).map(DbValue::Int),
                "FLOAT4" => row.try_get::<f32, _>(i).map(|v| DbValue::Float(v.into())),
                "FLOAT8" => row.try_get::<f64, _>(i).map(DbValue::Float),
                "BOOL" => row.try_get::<bool, _>(i).map(DbValue::Bool),
                "BYTEA" => row.try_get::<Vec<u8>, _>(i).map(DbValue::Bytes),
                _ => row.try_get::<String, _>(i).map(DbValue::String),
            }
            .unwrap_or(DbValue::Null);
            (column.name().to_string(), value)
        })
        .collect()
}

/// Convert MySQL row to `HashMap`
fn mysql_row_to_map(row: &MySqlRow) -> HashMap<String, DbValue> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, column)| {
            let value = match column.type_info().name() {
                "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
                    row.try_get::<i64, _>(i).map(DbValue::Int)
                }
                "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED"
                | "INT UNSIGNED" | "BIGINT UNSIGNED" => row
                    .try_get::<u64, _>(i)
                    .map(|v| i64::try_from(v).map_or(DbValue::Null, DbValue::Int)),
                "FLOAT" => row.try_get::<f32, _>(i).map(|v| DbValue::Float(v.into())),
                "DOUBLE" => row.try_get::<f64, _>(i).map(DbValue::Float),
                "BOOLEAN" => row.try_get::<bool, _>(i).map(DbValue::Bool),
                "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BINARY" | "VARBINARY" => {
                    row.try_get::<Vec<u8>, _>(i).map(DbValue::Bytes)
                }
                _ => row.try_get::<String, _>(i).map(DbValue::String),
            }
            .unwrap_or(DbValue::Null);
            (column.name().to_string(), value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_pool() -> DatabasePool {
        DatabasePool::connect_sqlite("sqlite::memory:", Some(1))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_connect_dispatches_on_scheme() {
        let pool = DatabasePool::connect("sqlite::memory:", Some(1)).await.unwrap();
        assert_eq!(pool.dialect(), Dialect::Sqlite);

        assert!(DatabasePool::connect("oracle://localhost/db", None).await.is_err());
    }

    #[tokio::test]
    async fn test_insert_and_fetch_with_params() {
        let pool = memory_pool().await;

        pool.execute("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)")
            .await
            .unwrap();
        pool.execute_with(
            "INSERT INTO users (id, name) VALUES (?, ?)",
            &[DbValue::Int(1), DbValue::from("Alice")],
        )
        .await
        .unwrap();
        pool.execute("INSERT INTO users (id, name) VALUES (2, 'Bob')")
            .await
            .unwrap();

        let rows = pool
            .fetch_all_with("SELECT * FROM users WHERE name = ?", &[DbValue::from("Alice")])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("id"), Some(&DbValue::Int(1)));
    }

    #[tokio::test]
    async fn test_execute_batch_rolls_back_on_failure() {
        let pool = memory_pool().await;
        pool.execute("CREATE TABLE items (id INTEGER PRIMARY KEY)")
            .await
            .unwrap();

        let result = pool
            .execute_batch(&[
                "INSERT INTO items (id) VALUES (1)",
                "INSERT INTO missing_table (id) VALUES (1)",
            ])
            .await;
        assert!(result.is_err());

        let rows = pool.fetch_all("SELECT id FROM items").await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_execute_transaction_binds_params() {
        let pool = memory_pool().await;
        pool.execute_transaction(&[
            Statement::new("CREATE TABLE tags (id INTEGER PRIMARY KEY, label TEXT)"),
            Statement::with_params(
                "INSERT INTO tags (id, label) VALUES (?, ?)",
                vec![DbValue::Int(7), DbValue::from("rust")],
            ),
        ])
        .await
        .unwrap();

        let rows = pool.fetch_all("SELECT label FROM tags WHERE id = 7").await.unwrap();
        assert_eq!(rows[0].get("label"), Some(&DbValue::from("rust")));
    }

    #[tokio::test]
    async fn test_fetch_one_without_rows_is_error() {
        let pool = memory_pool().await;
        pool.execute("CREATE TABLE config (key TEXT, value TEXT)")
            .await
            .unwrap();

        assert!(pool.fetch_one("SELECT * FROM config").await.is_err());
        assert!(pool
            .fetch_optional("SELECT * FROM config")
            .await
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_quote_ident_per_dialect() {
        assert_eq!(Dialect::Sqlite.quote_ident("users"), "\"users\"");
        assert_eq!(Dialect::Postgres.quote_ident("a\"b"), "\"a\"\"b\"");
        assert_eq!(Dialect::MySql.quote_ident("order"), "`order`");
        assert_eq!(Dialect::MySql.quote_ident("a`b"), "`a``b`");
    }

    #[test]
    fn test_dialect_placeholders() {
        assert_eq!(Dialect::Sqlite.placeholder(3), "?");
        assert_eq!(Dialect::Postgres.placeholder(3), "$3");
        assert_eq!(Dialect::MySql.placeholder(3), "?");
        assert_eq!(Dialect::from_driver("PostgreSQL").unwrap(), Dialect::Postgres);
        assert_eq!(Dialect::from_driver("mysql").unwrap(), Dialect::MySql);
        assert_eq!(Dialect::MySql.to_string(), "mysql");
        assert!(Dialect::from_driver("oracle").is_err());
    }
}
