//! Registered migrations, keyed by id.

use super::generator::{migration_files, MIGRATIONS_DIR};
use super::migration::{Migration, SqlMigration};
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Every migration known to the application, ordered by id
#[derive(Clone, Default)]
pub struct MigrationRegistry {
    migrations: BTreeMap<String, Arc<dyn Migration>>,
}

impl MigrationRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a migration
    ///
    /// # Errors
    ///
    /// Returns `Error::DuplicateMigration` when the id is already taken.
    pub fn register(&mut self, migration: impl Migration + 'static) -> Result<()> {
        self.register_arc(Arc::new(migration))
    }

    /// Register a shared migration
    ///
    /// # Errors
    ///
    /// Returns `Error::DuplicateMigration` when the id is already taken.
    pub fn register_arc(&mut self, migration: Arc<dyn Migration>) -> Result<()> {
        let id = migration.id().to_string();
        if self.migrations.contains_key(&id) {
            return Err(Error::DuplicateMigration { id });
        }
        debug!(id = %id, app = %migration.app(), "Migration registered");
        self.migrations.insert(id, migration);
        Ok(())
    }

    /// Load `<apps_dir>/<app>/migrations/*.sql` for each of `apps`
    ///
    /// Returns how many migrations were registered.
    ///
    /// # Errors
    ///
    /// Fails on unreadable or malformed files and on duplicate ids.
    pub fn discover_sql<S: AsRef<str>>(&mut self, apps_dir: &Path, apps: &[S]) -> Result<usize> {
        let mut count = 0;
        for app in apps {
            let app = app.as_ref();
            let dir = apps_dir.join(app).join(MIGRATIONS_DIR);
            for (_, path) in migration_files(&dir)? {
                self.register(SqlMigration::from_file(app, &path)?)?;
                count += 1;
            }
        }
        Ok(count)
    }

    /// All migrations in id order
    #[must_use]
    pub fn sorted(&self) -> Vec<Arc<dyn Migration>> {
        self.migrations.values().cloned().collect()
    }

    /// Migration by id
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<dyn Migration>> {
        self.migrations.get(id).cloned()
    }

    /// Migrations of one application in id order
    #[must_use]
    pub fn by_app(&self, app: &str) -> Vec<Arc<dyn Migration>> {
        self.migrations
            .values()
            .filter(|m| m.app() == app)
            .cloned()
            .collect()
    }

    /// Whether `id` is registered
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.migrations.contains_key(id)
    }

    /// Number of migrations
    #[must_use]
    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    /// Whether no migration is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }
}

impl std::fmt::Debug for MigrationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationRegistry")
            .field("ids", &self.migrations.keys().collect::<Vec<_>>())
            .finish()
    }
}
