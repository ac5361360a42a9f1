//! # Migration Generator
//!
//! The `make:migration` pipeline for one application:
//!
//! 1. scan `apps/<app>/models.rs`
//! 2. diff against the persisted snapshot
//! 3. ask the [`ConfirmGate`] when the diff drops models or fields
//! 4. allocate an id newer than every id already issued
//! 5. write `apps/<app>/migrations/<id>.sql`
//! 6. record the scanned models in the state document
//!
//! Failing to save the state document does not undo step 5; the outcome
//! reports it and a warning is logged.

use super::changes::ChangeSet;
use super::confirm::ConfirmGate;
use super::descriptor::ModelDescriptor;
use super::id;
use super::scanner;
use super::snapshot::StateStore;
use super::sql::{render_migration, MigrationScript};
use crate::database::Dialect;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Directory holding an application's migration files
pub const MIGRATIONS_DIR: &str = "migrations";

/// Extension of migration files
pub const MIGRATION_EXT: &str = "sql";

/// Scanned models and the migration they would produce
#[derive(Debug, Clone)]
pub struct MigrationPlan {
    /// Application name
    pub app: String,
    /// Models currently in source
    pub models: Vec<ModelDescriptor>,
    /// Difference to the persisted snapshot
    pub changes: ChangeSet,
    /// Rendered statements
    pub script: MigrationScript,
}

/// A migration file written by [`MigrationGenerator::generate`]
#[derive(Debug, Clone)]
pub struct GeneratedMigration {
    /// Application name
    pub app: String,
    /// Allocated id
    pub id: String,
    /// Path of the written file
    pub path: PathBuf,
    /// Changes the file applies
    pub changes: ChangeSet,
    /// Whether the state document was updated
    pub state_saved: bool,
}

/// Result of one generation attempt
#[derive(Debug, Clone)]
pub enum GenerateOutcome {
    /// Models match the snapshot
    NoChanges,
    /// Destructive changes were not confirmed; nothing was written
    Cancelled(ChangeSet),
    /// A migration file was written
    Created(GeneratedMigration),
}

/// Generates migration files from model source
#[derive(Debug)]
pub struct MigrationGenerator {
    apps_dir: PathBuf,
    store: StateStore,
    dialect: Dialect,
}

impl MigrationGenerator {
    /// Generator over `apps_dir`, tracking state in `store`
    pub fn new(apps_dir: impl Into<PathBuf>, store: StateStore, dialect: Dialect) -> Self {
        Self {
            apps_dir: apps_dir.into(),
            store,
            dialect,
        }
    }

    /// Root directory of the applications
    #[must_use]
    pub fn apps_dir(&self) -> &Path {
        &self.apps_dir
    }

    /// Migrations directory of `app`
    #[must_use]
    pub fn migrations_dir(&self, app: &str) -> PathBuf {
        self.apps_dir.join(app).join(MIGRATIONS_DIR)
    }

    /// Application directories, sorted by name
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` when the apps directory exists but cannot be read.
    pub fn apps(&self) -> Result<Vec<String>> {
        list_apps(&self.apps_dir)
    }

    /// The first application by name, used when none is given
    ///
    /// # Errors
    ///
    /// Returns `Error::AppNotFound` when there are no applications.
    pub fn default_app(&self) -> Result<String> {
        self.apps()?
            .into_iter()
            .next()
            .ok_or_else(|| Error::AppNotFound {
                app: self.apps_dir.display().to_string(),
            })
    }

    /// Scan and diff `app` without writing anything
    ///
    /// # Errors
    ///
    /// Returns `Error::AppNotFound` for an unknown application,
    /// `Error::NoModels` when it defines no models, `Error::ModelParse` when
    /// its models do not parse, and `Error::StateFile` when the state
    /// document is unreadable.
    pub fn plan(&mut self, app: &str) -> Result<MigrationPlan> {
        let app_dir = self.apps_dir.join(app);
        if !app_dir.is_dir() {
            return Err(Error::AppNotFound {
                app: app.to_string(),
            });
        }

        let models = scanner::scan_app(&app_dir)?;
        if models.is_empty() {
            return Err(Error::NoModels {
                app: app.to_string(),
            });
        }
        debug!(app = %app, models = models.len(), "Models scanned");

        let changes = ChangeSet::detect(&models, self.store.app(app)?);
        let script = render_migration(&changes, self.dialect);
        Ok(MigrationPlan {
            app: app.to_string(),
            models,
            changes,
            script,
        })
    }

    /// Generate a migration for `app` named `name`
    ///
    /// # Errors
    ///
    /// See [`plan`](Self::plan); also `Error::Io` when the migration file
    /// cannot be written.
    pub fn generate(
        &mut self,
        app: &str,
        name: &str,
        gate: &mut dyn ConfirmGate,
    ) -> Result<GenerateOutcome> {
        self.generate_at(app, name, gate, Utc::now())
    }

    /// [`generate`](Self::generate) with an explicit clock reading
    ///
    /// # Errors
    ///
    /// See [`generate`](Self::generate).
    pub fn generate_at(
        &mut self,
        app: &str,
        name: &str,
        gate: &mut dyn ConfirmGate,
        now: DateTime<Utc>,
    ) -> Result<GenerateOutcome> {
        let plan = self.plan(app)?;
        if !plan.changes.has_changes() {
            info!(app = %app, "No model changes detected");
            return Ok(GenerateOutcome::NoChanges);
        }

        if plan.changes.is_destructive() && !gate.confirm(&plan.changes) {
            warn!(
                app = %app,
                changes = ?plan.changes.destructive_summary(),
                "Destructive migration cancelled"
            );
            return Ok(GenerateOutcome::Cancelled(plan.changes));
        }

        let existing = self.existing_ids()?;
        let id = id::allocate(now, name, existing.iter().map(String::as_str));
        let path = self.write(&plan, &id, now)?;
        info!(app = %app, id = %id, path = %path.display(), changes = %plan.changes.summary(), "Migration created");

        let saved = self
            .store
            .record(app, &plan.models, &id)
            .and_then(|()| self.store.save());
        if let Err(e) = &saved {
            warn!(app = %app, id = %id, error = %e, "Migration written but state was not saved");
        }

        Ok(GenerateOutcome::Created(GeneratedMigration {
            app: plan.app,
            id,
            path,
            changes: plan.changes,
            state_saved: saved.is_ok(),
        }))
    }

    /// Generate for every application that defines models
    ///
    /// Applications without models are skipped.
    ///
    /// # Errors
    ///
    /// Stops at the first application that fails.
    pub fn generate_all(
        &mut self,
        name: &str,
        gate: &mut dyn ConfirmGate,
    ) -> Result<Vec<(String, GenerateOutcome)>> {
        let mut outcomes = Vec::new();
        for app in self.apps()? {
            match self.generate(&app, name, gate) {
                Ok(outcome) => outcomes.push((app, outcome)),
                Err(Error::NoModels { .. }) => debug!(app = %app, "Skipping application without models"),
                Err(e) => return Err(e),
            }
        }
        Ok(outcomes)
    }

    /// Every id issued so far: migration files of all applications plus
    /// the ids remembered in the state document
    fn existing_ids(&mut self) -> Result<Vec<String>> {
        let mut ids = self.store.last_migrations()?;
        for app in self.apps()? {
            ids.extend(migration_files(&self.migrations_dir(&app))?.into_iter().map(|(id, _)| id));
        }
        Ok(ids)
    }

    fn write(&self, plan: &MigrationPlan, id: &str, now: DateTime<Utc>) -> Result<PathBuf> {
        let dir = self.migrations_dir(&plan.app);
        std::fs::create_dir_all(&dir)?;

        let path = dir.join(format!("{id}.{MIGRATION_EXT}"));
        if path.exists() {
            return Err(Error::DuplicateMigration { id: id.to_string() });
        }

        let mut header = vec![
            format!("Migration: {id}"),
            format!("App: {}", plan.app),
            format!("Generated: {}", now.to_rfc3339()),
            format!("Changes: {}", plan.changes.summary()),
        ];
        header.extend(
            plan.changes
                .destructive_summary()
                .into_iter()
                .map(|line| format!("Destructive: {line}")),
        );

        std::fs::write(&path, plan.script.render(&header))?;
        Ok(path)
    }
}

/// Sorted subdirectory names of `apps_dir`; a missing directory is empty
///
/// # Errors
///
/// Returns `Error::Io` when the directory cannot be read.
pub fn list_apps(apps_dir: &Path) -> Result<Vec<String>> {
    let entries = match std::fs::read_dir(apps_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut apps = Vec::new();
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') {
                    apps.push(name.to_string());
                }
            }
        }
    }
    apps.sort();
    Ok(apps)
}

/// `(id, path)` of every migration file in `dir`, sorted by id
///
/// # Errors
///
/// Returns `Error::Io` when the directory exists but cannot be read.
pub fn migration_files(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(MIGRATION_EXT) {
            continue;
        }
        if let Some(id) = path.file_stem().and_then(|s| s.to_str()) {
            files.push((id.to_string(), path.clone()));
        }
    }
    files.sort();
    Ok(files)
}
