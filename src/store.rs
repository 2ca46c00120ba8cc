//! Durable store for proposed changes.
//!
//! Changes live in `.patchguard/changes.json` so the approval lifecycle and
//! emergency rollback survive a process restart. Every read-modify-write
//! holds an exclusive advisory lock on a sidecar lock file, and each change
//! carries a version counter checked on update, so two racing approval
//! actions cannot both win.

use crate::approval::ProposedChange;
use crate::config::STATE_DIR;
use crate::error::{PipelineError, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use uuid::Uuid;

const CHANGES_FILE: &str = "changes.json";
const LOCK_FILE: &str = "changes.lock";
const LOCK_TIMEOUT_SECS: u64 = 5;
const LOCK_RETRY_MS: u64 = 50;

#[derive(Debug, Default, Serialize, Deserialize)]
struct ChangeSet {
    changes: BTreeMap<Uuid, ProposedChange>,
}

struct StoreLock {
    file: std::fs::File,
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

pub struct ChangeStore {
    state_dir: PathBuf,
}

impl ChangeStore {
    pub fn new(repo_root: &Path) -> Self {
        ChangeStore {
            state_dir: repo_root.join(STATE_DIR),
        }
    }

    fn changes_path(&self) -> PathBuf {
        self.state_dir.join(CHANGES_FILE)
    }

    fn lock(&self) -> Result<StoreLock> {
        fs::create_dir_all(&self.state_dir)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.state_dir.join(LOCK_FILE))?;

        let start = Instant::now();
        loop {
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => break,
                Err(err) => {
                    if err.kind() != ErrorKind::WouldBlock {
                        return Err(err.into());
                    }
                    if start.elapsed() >= Duration::from_secs(LOCK_TIMEOUT_SECS) {
                        return Err(PipelineError::internal(format!(
                            "timed out waiting for change store lock ({}s)",
                            LOCK_TIMEOUT_SECS
                        )));
                    }
                    std::thread::sleep(Duration::from_millis(LOCK_RETRY_MS));
                }
            }
        }
        Ok(StoreLock { file })
    }

    fn read_set(&self) -> Result<ChangeSet> {
        match fs::read_to_string(self.changes_path()) {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(ChangeSet::default()),
            Err(err) => Err(err.into()),
        }
    }

    fn write_set(&self, set: &ChangeSet) -> Result<()> {
        let path = self.changes_path();
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_string_pretty(set)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Insert a freshly drafted change. Its id must be new.
    pub fn insert(&self, change: &ProposedChange) -> Result<()> {
        let _lock = self.lock()?;
        let mut set = self.read_set()?;
        if set.changes.contains_key(&change.id) {
            return Err(PipelineError::internal(format!(
                "change {} already exists",
                change.id
            )));
        }
        set.changes.insert(change.id, change.clone());
        self.write_set(&set)
    }

    pub fn get(&self, id: Uuid) -> Result<Option<ProposedChange>> {
        let _lock = self.lock()?;
        Ok(self.read_set()?.changes.remove(&id))
    }

    /// All changes, oldest first.
    pub fn list(&self) -> Result<Vec<ProposedChange>> {
        let _lock = self.lock()?;
        let set = self.read_set()?;
        let mut changes: Vec<ProposedChange> = set.changes.into_values().collect();
        changes.sort_by_key(|c| c.created_at);
        Ok(changes)
    }

    /// Compare-and-swap update: succeeds only when the stored version still
    /// matches `change.version`, then persists with the version bumped.
    /// Returns the stored copy.
    pub fn update(&self, change: &ProposedChange) -> Result<ProposedChange> {
        let _lock = self.lock()?;
        let mut set = self.read_set()?;
        let current = set.changes.get(&change.id).ok_or_else(|| {
            PipelineError::internal(format!("change {} not found", change.id))
        })?;
        if current.version != change.version {
            return Err(PipelineError::internal(format!(
                "version conflict on change {}: expected {}, store has {}",
                change.id, change.version, current.version
            )));
        }
        let mut updated = change.clone();
        updated.version += 1;
        updated.updated_at = chrono::Utc::now();
        set.changes.insert(updated.id, updated.clone());
        self.write_set(&set)?;
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::{ChangeState, ProposedChange, RiskTier};
    use tempfile::TempDir;

    fn draft(file: &str) -> ProposedChange {
        ProposedChange::draft(
            PathBuf::from(file),
            "old".to_string(),
            "new".to_string(),
            RiskTier::Low,
            "test change".to_string(),
        )
    }

    #[test]
    fn test_insert_get_list_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = ChangeStore::new(dir.path());
        let change = draft("src/a.rs");
        store.insert(&change).unwrap();

        let loaded = store.get(change.id).unwrap().unwrap();
        assert_eq!(loaded.id, change.id);
        assert_eq!(loaded.state, ChangeState::Drafted);
        assert_eq!(store.list().unwrap().len(), 1);
        assert!(store.get(Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn test_double_insert_rejected() {
        let dir = TempDir::new().unwrap();
        let store = ChangeStore::new(dir.path());
        let change = draft("src/a.rs");
        store.insert(&change).unwrap();
        assert!(store.insert(&change).is_err());
    }

    #[test]
    fn test_update_bumps_version() {
        let dir = TempDir::new().unwrap();
        let store = ChangeStore::new(dir.path());
        let change = draft("src/a.rs");
        store.insert(&change).unwrap();

        let updated = store.update(&change).unwrap();
        assert_eq!(updated.version, change.version + 1);
    }

    #[test]
    fn test_stale_version_loses_the_race() {
        let dir = TempDir::new().unwrap();
        let store = ChangeStore::new(dir.path());
        let change = draft("src/a.rs");
        store.insert(&change).unwrap();

        // First writer wins and bumps the version.
        let _winner = store.update(&change).unwrap();
        // Second writer still holds the stale copy.
        let err = store.update(&change).unwrap_err();
        assert!(err.to_string().contains("version conflict"));
    }

    #[test]
    fn test_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let change = draft("src/a.rs");
        ChangeStore::new(dir.path()).insert(&change).unwrap();

        let reopened = ChangeStore::new(dir.path());
        assert_eq!(reopened.list().unwrap().len(), 1);
    }
}
