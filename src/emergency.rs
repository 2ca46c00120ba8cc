//! Emergency rollback: restore every currently-applied change at once.
//!
//! The big red switch. Independent of the normal lifecycle flow and callable
//! at any time — including after a crash, since both the change store and
//! the snapshots are durable. Callers are expected to pause the pipeline
//! first; this module does not coordinate with in-flight batches.

use crate::approval::{ChangeState, ProposedChange};
use crate::backup::BackupManager;
use crate::error::Result;
use crate::store::ChangeStore;
use uuid::Uuid;

/// Outcome of a sweep. A missing snapshot or unwritable file fails only that
/// change's rollback, never the whole operation.
#[derive(Debug, Default)]
pub struct RollbackAllOutcome {
    pub rolled_back: usize,
    pub failed: Vec<(Uuid, String)>,
}

pub struct EmergencyRollback<'a> {
    store: &'a ChangeStore,
    backups: &'a BackupManager,
}

impl<'a> EmergencyRollback<'a> {
    pub fn new(store: &'a ChangeStore, backups: &'a BackupManager) -> Self {
        EmergencyRollback { store, backups }
    }

    /// Restore every change in state applied or validated from its snapshot
    /// and mark it rolled back.
    pub fn rollback_all(&self) -> Result<RollbackAllOutcome> {
        let mut outcome = RollbackAllOutcome::default();

        for change in self.store.list()? {
            if !matches!(
                change.state,
                ChangeState::Applied | ChangeState::Validated
            ) {
                continue;
            }
            match self.rollback_one(&change) {
                Ok(()) => outcome.rolled_back += 1,
                Err(reason) => {
                    tracing::error!(id = %change.id, %reason, "emergency rollback failed for change");
                    outcome.failed.push((change.id, reason));
                }
            }
        }

        tracing::warn!(
            rolled_back = outcome.rolled_back,
            failed = outcome.failed.len(),
            "emergency rollback sweep finished"
        );
        Ok(outcome)
    }

    fn rollback_one(&self, change: &ProposedChange) -> std::result::Result<(), String> {
        let snapshot_id = change
            .snapshot_id
            .ok_or_else(|| "change has no recorded snapshot".to_string())?;
        let snapshot = self
            .backups
            .load(snapshot_id)
            .map_err(|e| e.to_string())?;
        let restore = self.backups.restore(&snapshot);
        if !restore.all_ok() {
            return Err(format!(
                "{} file(s) could not be restored",
                restore.failed.len()
            ));
        }

        let mut updated = change.clone();
        updated
            .advance(ChangeState::RolledBack)
            .map_err(|e| e.to_string())?;
        updated.applied = false;
        self.store.update(&updated).map_err(|e| e.to_string())?;
        Ok(())
    }
}
