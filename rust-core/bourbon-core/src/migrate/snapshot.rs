//! # Persisted Model State
//!
//! The JSON document (`.bourbon/migration_state.json` by default) that
//! remembers, per application, the models seen when the last migration was
//! generated. It only feeds change detection; whether a migration is
//! applied is decided by the ledger.
//!
//! ```json
//! {
//!   "apps": {
//!     "users": {
//!       "last_hash": "…",
//!       "last_migration": "20240101120000_init",
//!       "models": { "User": { "name": "User", "fields": [ … ], "hash": "…" } }
//!     }
//!   }
//! }
//! ```

use super::descriptor::{models_hash, ModelDescriptor};
use crate::error::{Error, Result};
use crate::json;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Whole state document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    /// Snapshot per application name
    #[serde(default)]
    pub apps: BTreeMap<String, AppSnapshot>,
}

/// Last recorded models of one application
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSnapshot {
    /// Hash over all models
    #[serde(default)]
    pub last_hash: String,
    /// Id of the migration generated from this snapshot
    #[serde(default)]
    pub last_migration: String,
    /// Models by name
    #[serde(default)]
    pub models: BTreeMap<String, ModelDescriptor>,
}

impl AppSnapshot {
    /// Snapshot of `models` as of `migration_id`
    #[must_use]
    pub fn from_models(models: &[ModelDescriptor], migration_id: &str) -> Self {
        Self {
            last_hash: models_hash(models),
            last_migration: migration_id.to_string(),
            models: models
                .iter()
                .map(|m| (m.name.clone(), m.clone()))
                .collect(),
        }
    }
}

/// Lazily loaded state document
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    state: Option<PersistedState>,
}

impl StateStore {
    /// Store backed by `path`; nothing is read until first use
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: None,
        }
    }

    /// Location of the document
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The loaded document, reading it on first access
    ///
    /// A missing or empty file yields an empty document.
    ///
    /// # Errors
    ///
    /// Returns `Error::StateFile` when the file cannot be read or parsed.
    pub fn state(&mut self) -> Result<&mut PersistedState> {
        if self.state.is_none() {
            let loaded = self.read()?;
            debug!(path = %self.path.display(), apps = loaded.apps.len(), "Migration state loaded");
            self.state = Some(loaded);
        }
        Ok(self.state.get_or_insert_with(PersistedState::default))
    }

    fn read(&self) -> Result<PersistedState> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(PersistedState::default()),
            Err(e) => return Err(self.error(format!("read failed: {e}"))),
        };
        if text.trim().is_empty() {
            return Ok(PersistedState::default());
        }
        json::parse_json(&text).map_err(|e| self.error(e.to_string()))
    }

    /// Snapshot of one application
    ///
    /// # Errors
    ///
    /// Returns `Error::StateFile` when the document cannot be loaded.
    pub fn app(&mut self, app: &str) -> Result<Option<&AppSnapshot>> {
        Ok(self.state()?.apps.get(app))
    }

    /// Every migration id recorded as the latest for some application
    ///
    /// # Errors
    ///
    /// Returns `Error::StateFile` when the document cannot be loaded.
    pub fn last_migrations(&mut self) -> Result<Vec<String>> {
        Ok(self
            .state()?
            .apps
            .values()
            .map(|a| a.last_migration.clone())
            .filter(|id| !id.is_empty())
            .collect())
    }

    /// Replace the application's snapshot with `models` (in memory only)
    ///
    /// Models missing from `models` are dropped from the snapshot.
    ///
    /// # Errors
    ///
    /// Returns `Error::StateFile` when the document cannot be loaded.
    pub fn record(&mut self, app: &str, models: &[ModelDescriptor], migration_id: &str) -> Result<()> {
        self.state()?
            .apps
            .insert(app.to_string(), AppSnapshot::from_models(models, migration_id));
        Ok(())
    }

    /// Write the document, creating its directory
    ///
    /// The file is replaced through a temporary sibling so a failed write
    /// never truncates the previous document.
    ///
    /// # Errors
    ///
    /// Returns `Error::StateFile` when the document cannot be written.
    pub fn save(&self) -> Result<()> {
        let Some(state) = &self.state else {
            return Ok(());
        };

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .map_err(|e| self.error(format!("cannot create {}: {e}", dir.display())))?;
        }

        let text = json::to_json_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, text).map_err(|e| self.error(format!("write failed: {e}")))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| self.error(format!("rename failed: {e}")))?;
        Ok(())
    }

    fn error(&self, message: String) -> Error {
        Error::StateFile {
            path: self.path.clone(),
            message,
        }
    }
}
