//! # Migration Runner
//!
//! Applies and rolls back registered migrations against a database,
//! consulting the [`Ledger`] for what already ran.
//!
//! - `migrate` is idempotent: recorded ids are skipped.
//! - A migration's ledger row is written together with its `up`; a failed
//!   `up` or insert leaves neither behind and stops the run.
//! - Rolling back an id that is not recorded is a no-op reported as
//!   [`RollbackOutcome::NotApplied`].
//! - A record is removed together with a successful `down`.

use super::ledger::{Ledger, MigrationRecord};
use super::migration::Migration;
use super::registry::MigrationRegistry;
use crate::database::DatabasePool;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Result of a forward run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrateReport {
    /// Ids applied by this run, in order
    pub applied: Vec<String>,
    /// Registered ids that were already recorded
    pub skipped: usize,
}

/// Result of rolling back one id
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackOutcome {
    /// `down` ran and the record was removed
    RolledBack(String),
    /// The id was not recorded; nothing ran
    NotApplied(String),
}

/// State of one migration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatus {
    /// Migration id
    pub id: String,
    /// Owning application
    pub app: String,
    /// When it was applied, `None` while pending
    pub applied_at: Option<DateTime<Utc>>,
    /// Whether a migration with this id is registered; `false` for ledger
    /// records without a migration
    pub registered: bool,
}

impl MigrationStatus {
    /// Whether the migration is recorded as applied
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        self.applied_at.is_some()
    }
}

/// Runs registered migrations against one database
#[derive(Debug, Clone)]
pub struct Migrator {
    db: DatabasePool,
    registry: MigrationRegistry,
    ledger: Ledger,
}

impl Migrator {
    /// Migrator for `registry` over `db`
    #[must_use]
    pub fn new(db: DatabasePool, registry: MigrationRegistry) -> Self {
        let ledger = Ledger::new(db.clone());
        Self {
            db,
            registry,
            ledger,
        }
    }

    /// The ledger in use
    #[must_use]
    pub const fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Apply every pending migration in id order
    ///
    /// # Errors
    ///
    /// Returns `Error::MigrationFailed` for the first migration whose `up`
    /// fails; migrations before it stay applied.
    pub async fn migrate(&self) -> Result<MigrateReport> {
        self.apply(self.registry.sorted()).await
    }

    /// Apply pending migrations up to and including `target`
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownMigration` when `target` is not registered,
    /// otherwise as [`migrate`](Self::migrate).
    pub async fn migrate_to(&self, target: &str) -> Result<MigrateReport> {
        if !self.registry.contains(target) {
            return Err(Error::UnknownMigration {
                id: target.to_string(),
            });
        }
        let selected = self
            .registry
            .sorted()
            .into_iter()
            .filter(|m| m.id() <= target)
            .collect();
        self.apply(selected).await
    }

    async fn apply(&self, migrations: Vec<Arc<dyn Migration>>) -> Result<MigrateReport> {
        self.ledger.ensure_table().await?;
        let applied: HashSet<String> = self
            .ledger
            .applied()
            .await?
            .into_iter()
            .map(|r| r.id)
            .collect();

        let mut report = MigrateReport::default();
        for migration in migrations {
            let id = migration.id();
            if applied.contains(id) {
                report.skipped += 1;
                continue;
            }

            info!(id = %id, app = %migration.app(), "Applying migration");
            let record = self
                .ledger
                .insert_statement(&MigrationRecord::now(id, migration.app()));
            if let Err(e) = migration.up_recorded(&self.db, record).await {
                warn!(id = %id, error = %e, "Migration failed");
                return Err(Error::MigrationFailed {
                    id: id.to_string(),
                    message: e.to_string(),
                });
            }
            report.applied.push(id.to_string());
        }

        info!(applied = report.applied.len(), skipped = report.skipped, "Migrations complete");
        Ok(report)
    }

    /// Roll back one migration
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownMigration` when `id` is recorded but not
    /// registered and `Error::RollbackFailed` when its `down` fails; the
    /// record is kept in both cases.
    pub async fn rollback(&self, id: &str) -> Result<RollbackOutcome> {
        self.ledger.ensure_table().await?;
        if !self.ledger.is_applied(id).await? {
            info!(id = %id, "Migration is not applied, nothing to roll back");
            return Ok(RollbackOutcome::NotApplied(id.to_string()));
        }

        let migration = self.registry.get(id).ok_or_else(|| Error::UnknownMigration {
            id: id.to_string(),
        })?;

        info!(id = %id, app = %migration.app(), "Rolling back migration");
        let forget = self.ledger.delete_statement(id);
        if let Err(e) = migration.down_recorded(&self.db, forget).await {
            warn!(id = %id, error = %e, "Rollback failed");
            return Err(Error::RollbackFailed {
                id: id.to_string(),
                message: e.to_string(),
            });
        }
        Ok(RollbackOutcome::RolledBack(id.to_string()))
    }

    /// Roll back the applied migration with the greatest id
    ///
    /// Returns the rolled back id, or `None` when nothing is applied.
    ///
    /// # Errors
    ///
    /// As [`rollback`](Self::rollback).
    pub async fn rollback_last(&self) -> Result<Option<String>> {
        self.ledger.ensure_table().await?;
        let Some(last) = self.ledger.applied().await?.pop() else {
            return Ok(None);
        };
        self.rollback(&last.id).await?;
        Ok(Some(last.id))
    }

    /// Roll back every applied migration newer than `target`, newest first
    ///
    /// `target` itself stays applied. Returns the rolled back ids.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownMigration` when `target` is neither registered
    /// nor recorded; otherwise stops at the first failing rollback.
    pub async fn rollback_to(&self, target: &str) -> Result<Vec<String>> {
        self.ledger.ensure_table().await?;
        let records = self.ledger.applied().await?;
        if !self.registry.contains(target) && !records.iter().any(|r| r.id == target) {
            return Err(Error::UnknownMigration {
                id: target.to_string(),
            });
        }

        let mut rolled_back = Vec::new();
        for record in records.iter().rev().filter(|r| r.id.as_str() > target) {
            self.rollback(&record.id).await?;
            rolled_back.push(record.id.clone());
        }
        Ok(rolled_back)
    }

    /// Every registered migration with its state, plus ledger records that
    /// have no registered migration, ordered by id
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` when the ledger cannot be read.
    pub async fn status(&self) -> Result<Vec<MigrationStatus>> {
        self.ledger.ensure_table().await?;
        let records = self.ledger.applied().await?;

        let mut statuses: Vec<MigrationStatus> = self
            .registry
            .sorted()
            .iter()
            .map(|m| MigrationStatus {
                id: m.id().to_string(),
                app: m.app().to_string(),
                applied_at: records
                    .iter()
                    .find(|r| r.id == m.id())
                    .map(|r| r.applied_at),
                registered: true,
            })
            .collect();

        statuses.extend(
            records
                .iter()
                .filter(|r| !self.registry.contains(&r.id))
                .map(|r| MigrationStatus {
                    id: r.id.clone(),
                    app: r.app.clone(),
                    applied_at: Some(r.applied_at),
                    registered: false,
                }),
        );
        statuses.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(statuses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::migration::{MigrationFuture, SqlMigration};
    use crate::migrate::sql::MigrationScript;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sql(id: &str, up: &str, down: &str) -> SqlMigration {
        SqlMigration::new(
            id,
            "users",
            MigrationScript {
                up: vec![up.to_string()],
                down: vec![down.to_string()],
            },
        )
    }

    async fn migrator(migrations: Vec<SqlMigration>) -> Migrator {
        let db = DatabasePool::connect_sqlite("sqlite::memory:", Some(1))
            .await
            .unwrap();
        let mut registry = MigrationRegistry::new();
        for m in migrations {
            registry.register(m).unwrap();
        }
        Migrator::new(db, registry)
    }

    fn two_tables() -> Vec<SqlMigration> {
        vec![
            sql("20240101000000_a", "CREATE TABLE a (x INTEGER)", "DROP TABLE a"),
            sql("20240102000000_b", "CREATE TABLE b (x INTEGER)", "DROP TABLE b"),
        ]
    }

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let migrator = migrator(two_tables()).await;

        let first = migrator.migrate().await.unwrap();
        assert_eq!(first.applied, vec!["20240101000000_a", "20240102000000_b"]);

        let second = migrator.migrate().await.unwrap();
        assert!(second.applied.is_empty());
        assert_eq!(second.skipped, 2);
    }

    #[tokio::test]
    async fn test_failed_migration_is_not_recorded() {
        let mut migrations = two_tables();
        migrations.insert(1, sql("20240101120000_bad", "CREATE TABLE a (x INTEGER)", "SELECT 1"));
        let migrator = migrator(migrations).await;

        let result = migrator.migrate().await;
        assert!(matches!(result, Err(Error::MigrationFailed { ref id, .. }) if id == "20240101120000_bad"));

        let ledger = migrator.ledger();
        assert!(ledger.is_applied("20240101000000_a").await.unwrap());
        assert!(!ledger.is_applied("20240101120000_bad").await.unwrap());
        assert!(!ledger.is_applied("20240102000000_b").await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_ledger_insert_undoes_the_schema_change() {
        let conflicting = SqlMigration::new(
            "20240101000000_a",
            "users",
            MigrationScript {
                up: vec![
                    "CREATE TABLE a (x INTEGER)".to_string(),
                    "INSERT INTO bourbon_migrations (id, app_name, applied_at) \
                     VALUES ('20240101000000_a', 'users', '2024-01-01T00:00:00+00:00')"
                        .to_string(),
                ],
                down: vec!["DROP TABLE a".to_string()],
            },
        );
        let migrator = migrator(vec![conflicting]).await;

        let result = migrator.migrate().await;
        assert!(matches!(result, Err(Error::MigrationFailed { .. })));

        let tables = migrator
            .db
            .fetch_all("SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'a'")
            .await
            .unwrap();
        assert!(tables.is_empty());
        assert!(!migrator.ledger().is_applied("20240101000000_a").await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_down_keeps_schema_and_record() {
        let migration = SqlMigration::new(
            "20240101000000_a",
            "users",
            MigrationScript {
                up: vec!["CREATE TABLE a (x INTEGER)".to_string()],
                down: vec!["DROP TABLE a".to_string(), "DROP TABLE missing".to_string()],
            },
        );
        let migrator = migrator(vec![migration]).await;
        migrator.migrate().await.unwrap();

        assert!(matches!(
            migrator.rollback("20240101000000_a").await,
            Err(Error::RollbackFailed { .. })
        ));
        assert!(migrator.db.fetch_all("SELECT x FROM a").await.is_ok());
        assert!(migrator.ledger().is_applied("20240101000000_a").await.unwrap());
    }

    #[tokio::test]
    async fn test_migrate_to_stops_at_target() {
        let migrator = migrator(two_tables()).await;
        let report = migrator.migrate_to("20240101000000_a").await.unwrap();
        assert_eq!(report.applied, vec!["20240101000000_a"]);

        assert!(matches!(
            migrator.migrate_to("nope").await,
            Err(Error::UnknownMigration { .. })
        ));
    }

    #[tokio::test]
    async fn test_rollback_not_applied_is_not_an_error() {
        let migrator = migrator(two_tables()).await;
        let outcome = migrator.rollback("20240101000000_a").await.unwrap();
        assert_eq!(outcome, RollbackOutcome::NotApplied("20240101000000_a".to_string()));
    }

    #[tokio::test]
    async fn test_rollback_last_and_to() {
        let mut migrations = two_tables();
        migrations.push(sql("20240103000000_c", "CREATE TABLE c (x INTEGER)", "DROP TABLE c"));
        let migrator = migrator(migrations).await;
        migrator.migrate().await.unwrap();

        assert_eq!(
            migrator.rollback_last().await.unwrap(),
            Some("20240103000000_c".to_string())
        );
        migrator.migrate().await.unwrap();

        let rolled = migrator.rollback_to("20240101000000_a").await.unwrap();
        assert_eq!(rolled, vec!["20240103000000_c", "20240102000000_b"]);

        let status = migrator.status().await.unwrap();
        let applied: Vec<bool> = status.iter().map(MigrationStatus::is_applied).collect();
        assert_eq!(applied, vec![true, false, false]);
    }

    struct FailingDown {
        downs: AtomicUsize,
    }

    impl Migration for FailingDown {
        fn id(&self) -> &str {
            "20240101000000_failing"
        }

        fn app(&self) -> &str {
            "users"
        }

        fn up<'a>(&'a self, _db: &'a DatabasePool) -> MigrationFuture<'a> {
            Box::pin(async { Ok(()) })
        }

        fn down<'a>(&'a self, _db: &'a DatabasePool) -> MigrationFuture<'a> {
            Box::pin(async move {
                self.downs.fetch_add(1, Ordering::SeqCst);
                Err(Error::Handler {
                    message: "cannot undo".to_string(),
                })
            })
        }
    }

    #[tokio::test]
    async fn test_failed_rollback_keeps_record() {
        let db = DatabasePool::connect_sqlite("sqlite::memory:", Some(1))
            .await
            .unwrap();
        let failing = Arc::new(FailingDown {
            downs: AtomicUsize::new(0),
        });
        let mut registry = MigrationRegistry::new();
        registry.register_arc(failing.clone()).unwrap();
        let migrator = Migrator::new(db, registry);

        migrator.migrate().await.unwrap();
        let result = migrator.rollback("20240101000000_failing").await;
        assert!(matches!(result, Err(Error::RollbackFailed { .. })));
        assert_eq!(failing.downs.load(Ordering::SeqCst), 1);
        assert!(migrator.ledger().is_applied("20240101000000_failing").await.unwrap());
    }

    #[tokio::test]
    async fn test_status_reports_orphans() {
        let migrator = migrator(two_tables()).await;
        migrator.migrate().await.unwrap();
        migrator.ledger().record("20231231000000_old", "legacy").await.unwrap();

        let status = migrator.status().await.unwrap();
        assert_eq!(status.len(), 3);
        assert_eq!(status[0].id, "20231231000000_old");
        assert!(!status[0].registered);
        assert!(status[0].is_applied());
    }

    #[tokio::test]
    async fn test_rollback_of_unregistered_record_is_an_error() {
        let migrator = migrator(vec![]).await;
        migrator.ledger().ensure_table().await.unwrap();
        migrator.ledger().record("1", "users").await.unwrap();

        assert!(matches!(
            migrator.rollback("1").await,
            Err(Error::UnknownMigration { .. })
        ));
        assert!(migrator.ledger().is_applied("1").await.unwrap());
    }
}
