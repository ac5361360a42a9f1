//! # Change Detection
//!
//! Classifies the difference between the current models of an application
//! and its last persisted snapshot.
//!
//! Models and fields are matched by name only. A renamed field is therefore
//! one deletion plus one addition, never a modification. Models whose
//! content hash matches the snapshot are skipped without a field diff. A
//! model that starts or stops embedding `BaseModel` is replaced as a whole.

use super::descriptor::{FieldDescriptor, ModelDescriptor};
use super::snapshot::AppSnapshot;
use std::collections::{BTreeMap, HashMap};

/// A field whose type or tag changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    /// Definition recorded in the snapshot
    pub before: FieldDescriptor,
    /// Definition found in source
    pub after: FieldDescriptor,
}

/// A model whose table is rebuilt because its `BaseModel` embedding changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelChange {
    /// Model recorded in the snapshot
    pub before: ModelDescriptor,
    /// Model found in source
    pub after: ModelDescriptor,
}

/// Classified schema changes for one application
///
/// Per-model maps are keyed by model name and ordered, so rendering a
/// change set is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Models absent from the snapshot
    pub new_models: Vec<ModelDescriptor>,
    /// Snapshot models absent from source, as last recorded
    pub deleted_models: Vec<ModelDescriptor>,
    /// Fields added to existing models
    pub new_fields: BTreeMap<String, Vec<FieldDescriptor>>,
    /// Fields removed from existing models, as last recorded
    pub deleted_fields: BTreeMap<String, Vec<FieldDescriptor>>,
    /// Fields whose type or tag changed
    pub modified_fields: BTreeMap<String, Vec<FieldChange>>,
    /// Models whose table is dropped and created again
    pub replaced_models: Vec<ModelChange>,
}

impl ChangeSet {
    /// Diff `current` against the persisted snapshot of the same application
    ///
    /// Without a snapshot every current model is new and nothing is deleted.
    #[must_use]
    pub fn detect(current: &[ModelDescriptor], snapshot: Option<&AppSnapshot>) -> Self {
        let mut changes = Self::default();

        let Some(snapshot) = snapshot else {
            changes.new_models = sorted_by_name(current.iter().cloned().collect());
            return changes;
        };

        for model in current {
            let Some(previous) = snapshot.models.get(&model.name) else {
                changes.new_models.push(model.clone());
                continue;
            };

            if !previous.hash.is_empty() && previous.hash == model.hash {
                continue;
            }

            if previous.base_model != model.base_model {
                changes.replaced_models.push(ModelChange {
                    before: previous.clone(),
                    after: model.clone(),
                });
                continue;
            }

            let before: HashMap<&str, &FieldDescriptor> = previous
                .fields
                .iter()
                .map(|f| (f.name.as_str(), f))
                .collect();
            let after: HashMap<&str, &FieldDescriptor> =
                model.fields.iter().map(|f| (f.name.as_str(), f)).collect();

            let mut added = Vec::new();
            let mut modified = Vec::new();
            for field in &model.fields {
                match before.get(field.name.as_str()) {
                    None => added.push(field.clone()),
                    Some(old) if !old.same_definition(field) => modified.push(FieldChange {
                        before: (*old).clone(),
                        after: field.clone(),
                    }),
                    Some(_) => {}
                }
            }

            let removed: Vec<FieldDescriptor> = previous
                .fields
                .iter()
                .filter(|f| !after.contains_key(f.name.as_str()))
                .cloned()
                .collect();

            if !added.is_empty() {
                changes.new_fields.insert(model.name.clone(), added);
            }
            if !removed.is_empty() {
                changes.deleted_fields.insert(model.name.clone(), removed);
            }
            if !modified.is_empty() {
                changes.modified_fields.insert(model.name.clone(), modified);
            }
        }

        let current_names: Vec<&str> = current.iter().map(|m| m.name.as_str()).collect();
        changes.deleted_models = snapshot
            .models
            .values()
            .filter(|m| !current_names.contains(&m.name.as_str()))
            .cloned()
            .collect();

        changes.new_models = sorted_by_name(changes.new_models);
        changes.deleted_models = sorted_by_name(changes.deleted_models);
        changes
            .replaced_models
            .sort_by(|a, b| a.after.name.cmp(&b.after.name));
        changes
    }

    /// Whether anything changed
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.new_models.is_empty()
            || !self.deleted_models.is_empty()
            || !self.new_fields.is_empty()
            || !self.deleted_fields.is_empty()
            || !self.modified_fields.is_empty()
            || !self.replaced_models.is_empty()
    }

    /// Whether any table or column would be dropped
    #[must_use]
    pub fn is_destructive(&self) -> bool {
        !self.deleted_models.is_empty()
            || !self.deleted_fields.is_empty()
            || !self.replaced_models.is_empty()
    }

    /// Names of deleted models
    #[must_use]
    pub fn deleted_model_names(&self) -> Vec<&str> {
        self.deleted_models.iter().map(|m| m.name.as_str()).collect()
    }

    /// Human readable lines describing every destructive change
    #[must_use]
    pub fn destructive_summary(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .deleted_models
            .iter()
            .map(|m| format!("drop model {} (table {})", m.name, m.table_name()))
            .collect();
        for (model, fields) in &self.deleted_fields {
            for field in fields {
                lines.push(format!(
                    "drop field {model}.{} (column {})",
                    field.name,
                    field.column_name()
                ));
            }
        }
        for change in &self.replaced_models {
            let what = if change.after.base_model { "added" } else { "removed" };
            lines.push(format!(
                "rebuild model {} (table {}): BaseModel columns {what}",
                change.after.name,
                change.after.table_name()
            ));
        }
        lines
    }

    /// One-line summary such as `1 new model, 2 new fields`
    #[must_use]
    pub fn summary(&self) -> String {
        let count = |total: usize, what: &str| -> Option<String> {
            let plural = if total == 1 { "" } else { "s" };
            (total > 0).then(|| format!("{total} {what}{plural}"))
        };
        let fields = |map: &BTreeMap<String, Vec<FieldDescriptor>>| -> usize {
            map.values().map(Vec::len).sum()
        };

        let parts: Vec<String> = [
            count(self.new_models.len(), "new model"),
            count(self.deleted_models.len(), "deleted model"),
            count(fields(&self.new_fields), "new field"),
            count(fields(&self.deleted_fields), "deleted field"),
            count(
                self.modified_fields.values().map(Vec::len).sum(),
                "modified field",
            ),
            count(self.replaced_models.len(), "replaced model"),
        ]
        .into_iter()
        .flatten()
        .collect();

        if parts.is_empty() {
            "no changes".to_string()
        } else {
            parts.join(", ")
        }
    }
}

fn sorted_by_name(mut models: Vec<ModelDescriptor>) -> Vec<ModelDescriptor> {
    models.sort_by(|a, b| a.name.cmp(&b.name));
    models
}
