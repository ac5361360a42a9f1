//! Runnable migrations.

use super::sql::MigrationScript;
use crate::database::{DatabasePool, Statement};
use crate::error::{Error, Result};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

/// Future returned by [`Migration::up`] and [`Migration::down`]
pub type MigrationFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// A named schema change with its rollback
///
/// Ids are unique across all applications and order migrations
/// chronologically.
pub trait Migration: Send + Sync {
    /// Unique, time-ordered id
    fn id(&self) -> &str;

    /// Owning application
    fn app(&self) -> &str;

    /// Apply the change
    fn up<'a>(&'a self, db: &'a DatabasePool) -> MigrationFuture<'a>;

    /// Undo the change
    fn down<'a>(&'a self, db: &'a DatabasePool) -> MigrationFuture<'a>;

    /// Apply the change and write its ledger row
    ///
    /// The default runs `record` after `up` succeeds. Implementations that
    /// own their statements run both in one transaction.
    fn up_recorded<'a>(&'a self, db: &'a DatabasePool, record: Statement) -> MigrationFuture<'a> {
        Box::pin(async move {
            self.up(db).await?;
            db.execute_transaction(std::slice::from_ref(&record)).await
        })
    }

    /// Undo the change and delete its ledger row, as [`up_recorded`](Self::up_recorded)
    fn down_recorded<'a>(&'a self, db: &'a DatabasePool, forget: Statement) -> MigrationFuture<'a> {
        Box::pin(async move {
            self.down(db).await?;
            db.execute_transaction(std::slice::from_ref(&forget)).await
        })
    }
}

/// Migration loaded from a generated `.sql` file
///
/// Each direction runs in a single transaction, together with the ledger
/// row it writes or deletes.
#[derive(Debug, Clone)]
pub struct SqlMigration {
    id: String,
    app: String,
    path: Option<PathBuf>,
    script: MigrationScript,
}

impl SqlMigration {
    /// Migration from already parsed statements
    pub fn new(id: impl Into<String>, app: impl Into<String>, script: MigrationScript) -> Self {
        Self {
            id: id.into(),
            app: app.into(),
            path: None,
            script,
        }
    }

    /// Load `path`; the id is the file stem
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` when the file cannot be read and
    /// `Error::InvalidMigrationFile` when it is malformed.
    pub fn from_file(app: impl Into<String>, path: &Path) -> Result<Self> {
        let id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| Error::InvalidMigrationFile {
                path: path.to_path_buf(),
                reason: "file name is not a valid id".to_string(),
            })?
            .to_string();
        let text = std::fs::read_to_string(path)?;
        let script = MigrationScript::parse(&text, path)?;
        Ok(Self {
            id,
            app: app.into(),
            path: Some(path.to_path_buf()),
            script,
        })
    }

    /// Source file, if loaded from disk
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Parsed statements
    #[must_use]
    pub fn script(&self) -> &MigrationScript {
        &self.script
    }
}

impl Migration for SqlMigration {
    fn id(&self) -> &str {
        &self.id
    }

    fn app(&self) -> &str {
        &self.app
    }

    fn up<'a>(&'a self, db: &'a DatabasePool) -> MigrationFuture<'a> {
        Box::pin(async move {
            let statements: Vec<&str> = self.script.up_statements().collect();
            db.execute_batch(&statements).await
        })
    }

    fn down<'a>(&'a self, db: &'a DatabasePool) -> MigrationFuture<'a> {
        Box::pin(async move {
            let statements: Vec<&str> = self.script.down_statements().collect();
            db.execute_batch(&statements).await
        })
    }

    fn up_recorded<'a>(&'a self, db: &'a DatabasePool, record: Statement) -> MigrationFuture<'a> {
        Box::pin(async move {
            let mut statements: Vec<Statement> =
                self.script.up_statements().map(Statement::new).collect();
            statements.push(record);
            db.execute_transaction(&statements).await
        })
    }

    fn down_recorded<'a>(&'a self, db: &'a DatabasePool, forget: Statement) -> MigrationFuture<'a> {
        Box::pin(async move {
            let mut statements: Vec<Statement> =
                self.script.down_statements().map(Statement::new).collect();
            statements.push(forget);
            db.execute_transaction(&statements).await
        })
    }
}
