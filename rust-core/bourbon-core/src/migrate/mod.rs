//! # Migrations
//!
//! Change detection, migration generation and the runtime tracker.
//!
//! ## Generation (`make:migration`)
//!
//! [`scanner`] reads each application's `models.rs` into
//! [`ModelDescriptor`]s, [`ChangeSet::detect`] diffs them against the
//! [`StateStore`] snapshot, and [`MigrationGenerator`] writes an SQL file
//! rendered by [`sql`] after destructive changes pass a [`ConfirmGate`].
//!
//! ## Tracking (`migrate`, `migrate:rollback`)
//!
//! [`MigrationRegistry`] holds every known [`Migration`]; [`Migrator`]
//! applies and rolls them back, recording each applied id in the
//! [`Ledger`] table.

pub mod changes;
pub mod confirm;
pub mod descriptor;
pub mod generator;
pub mod id;
pub mod ledger;
pub mod migration;
pub mod naming;
pub mod registry;
pub mod runner;
pub mod scanner;
pub mod snapshot;
pub mod sql;

pub use changes::{ChangeSet, FieldChange, ModelChange};
pub use confirm::{AssumeYes, ConfirmGate, Deny};
pub use descriptor::{
    content_hash, model_hash, models_hash, FieldDescriptor, FieldTag, ModelDescriptor,
};
pub use generator::{GenerateOutcome, GeneratedMigration, MigrationGenerator, MigrationPlan};
pub use ledger::{Ledger, MigrationRecord, LEDGER_TABLE};
pub use migration::{Migration, MigrationFuture, SqlMigration};
pub use registry::MigrationRegistry;
pub use runner::{MigrateReport, MigrationStatus, Migrator, RollbackOutcome};
pub use snapshot::{AppSnapshot, PersistedState, StateStore};
pub use sql::{render_migration, MigrationScript};
