//! Backup/rollback manager.
//!
//! Snapshots arbitrary file sets into `.patchguard/backups/<uuid>/` with a
//! JSON manifest, so a snapshot taken before a batch or change survives a
//! process restart and can still be restored afterwards. Snapshots are
//! immutable once written.

use crate::config::STATE_DIR;
use crate::error::{PipelineError, Result};
use crate::util::resolve_in_repo;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const BACKUPS_DIR: &str = "backups";
const MANIFEST_FILE: &str = "manifest.json";

/// Saved contents of a file set, keyed by repo-relative original path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSnapshot {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    /// Repo-relative original path → saved file name inside the snapshot dir.
    pub files: BTreeMap<PathBuf, String>,
}

impl BackupSnapshot {
    pub fn contains(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }
}

/// Per-file restore results. One failed file never aborts the rest.
#[derive(Debug, Default)]
pub struct RestoreOutcome {
    pub restored: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

impl RestoreOutcome {
    pub fn all_ok(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Creates and restores snapshots under the repo's state directory.
pub struct BackupManager {
    repo_root: PathBuf,
    backups_dir: PathBuf,
}

impl BackupManager {
    pub fn new(repo_root: &Path) -> Self {
        BackupManager {
            repo_root: repo_root.to_path_buf(),
            backups_dir: repo_root.join(STATE_DIR).join(BACKUPS_DIR),
        }
    }

    /// Snapshot every existing path in `paths` (repo-relative). Missing paths
    /// are skipped without error: a strategy may edit a file that another
    /// batch already deleted, and the snapshot should still cover the rest.
    pub fn snapshot(&self, paths: &[PathBuf]) -> Result<BackupSnapshot> {
        let id = Uuid::new_v4();
        let dir = self.backups_dir.join(id.to_string());
        fs::create_dir_all(&dir)?;

        let mut files = BTreeMap::new();
        for (n, path) in paths.iter().enumerate() {
            let absolute = resolve_in_repo(&self.repo_root, path)
                .map_err(PipelineError::internal)?;
            if !absolute.is_file() {
                continue;
            }
            let saved_name = format!("{}.saved", n);
            fs::copy(&absolute, dir.join(&saved_name))?;
            files.insert(path.clone(), saved_name);
        }

        let snapshot = BackupSnapshot {
            id,
            created_at: Utc::now(),
            files,
        };
        let manifest = serde_json::to_string_pretty(&snapshot)?;
        fs::write(dir.join(MANIFEST_FILE), manifest)?;
        tracing::debug!(id = %snapshot.id, files = snapshot.files.len(), "snapshot created");
        Ok(snapshot)
    }

    /// Restore every file recorded in the snapshot. Paths not in the snapshot
    /// are untouched; restoring is idempotent. Failures are collected per
    /// file so one unwritable path never blocks the rest.
    pub fn restore(&self, snapshot: &BackupSnapshot) -> RestoreOutcome {
        let dir = self.backups_dir.join(snapshot.id.to_string());
        let mut outcome = RestoreOutcome::default();

        for (path, saved_name) in &snapshot.files {
            let result = resolve_in_repo(&self.repo_root, path)
                .and_then(|absolute| {
                    if let Some(parent) = absolute.parent() {
                        fs::create_dir_all(parent).map_err(|e| e.to_string())?;
                    }
                    fs::copy(dir.join(saved_name), &absolute)
                        .map(|_| ())
                        .map_err(|e| e.to_string())
                });
            match result {
                Ok(()) => outcome.restored.push(path.clone()),
                Err(reason) => outcome.failed.push((path.clone(), reason)),
            }
        }

        tracing::debug!(
            id = %snapshot.id,
            restored = outcome.restored.len(),
            failed = outcome.failed.len(),
            "snapshot restored"
        );
        outcome
    }

    /// Re-read a snapshot manifest from disk. Needed after a restart, when
    /// the in-memory snapshot handed out at apply time is gone.
    pub fn load(&self, id: Uuid) -> Result<BackupSnapshot> {
        let manifest = self
            .backups_dir
            .join(id.to_string())
            .join(MANIFEST_FILE);
        let content = fs::read_to_string(&manifest).map_err(|e| {
            PipelineError::internal(format!(
                "missing snapshot manifest {}: {}",
                manifest.display(),
                e
            ))
        })?;
        Ok(serde_json::from_str(&content)?)
    }
}
