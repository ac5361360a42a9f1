//! Confirmation of destructive changes.

use super::changes::ChangeSet;

/// Decides whether a destructive change set may be generated
///
/// Only consulted when [`ChangeSet::is_destructive`] holds. Anything but
/// an explicit yes must return `false`.
pub trait ConfirmGate {
    /// Whether generation may proceed
    fn confirm(&mut self, changes: &ChangeSet) -> bool;
}

/// Always proceeds (`--yes`)
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeYes;

impl ConfirmGate for AssumeYes {
    fn confirm(&mut self, _changes: &ChangeSet) -> bool {
        true
    }
}

/// Never proceeds; used for non-interactive runs
#[derive(Debug, Clone, Copy, Default)]
pub struct Deny;

impl ConfirmGate for Deny {
    fn confirm(&mut self, _changes: &ChangeSet) -> bool {
        false
    }
}

impl<F> ConfirmGate for F
where
    F: FnMut(&ChangeSet) -> bool,
{
    fn confirm(&mut self, changes: &ChangeSet) -> bool {
        self(changes)
    }
}
