//! # Checkpoints
//!
//! File-level snapshots taken before risky mutations, plus rollback.
//!
//! Layout under the backup root:
//!
//! ```text
//! <backup_root>/<checkpoint_id>/checkpoint.json
//! <backup_root>/<checkpoint_id>/files/<relative path>
//! ```
//!
//! Checkpoints are never deleted automatically; use [`CheckpointManager::remove`].
//! A restored checkpoint records `rolledBackAt` in its metadata and cannot be
//! restored again, even from another process.

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

use crate::error::ConductorError;
use crate::models::{CheckpointRecord, RollbackResult};
use crate::state::io::{load_or_default, write_json, Loaded};
use crate::tools::git::VersionControl;

const METADATA_FILE: &str = "checkpoint.json";
const FILES_DIR: &str = "files";

/// Creates, restores and tracks checkpoints
pub struct CheckpointManager {
    backup_root: PathBuf,
    vcs: Arc<dyn VersionControl>,
    /// Insertion ordered
    history: Mutex<Vec<CheckpointRecord>>,
}

impl CheckpointManager {
    pub fn new(backup_root: impl Into<PathBuf>, vcs: Arc<dyn VersionControl>) -> Self {
        Self {
            backup_root: backup_root.into(),
            vcs,
            history: Mutex::new(Vec::new()),
        }
    }

    /// Snapshot `files` (relative to `root`) before a mutation
    ///
    /// The VCS stash is best effort. Files that do not exist are skipped.
    #[tracing::instrument(skip(self, files), fields(files = files.len()))]
    pub async fn create_checkpoint(
        &self,
        root: &Path,
        files: &[String],
    ) -> Result<CheckpointRecord, ConductorError> {
        let timestamp = Utc::now();
        let id = format!(
            "ckpt_{}_{}",
            timestamp.format("%Y%m%d_%H%M%S"),
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );

        let vcs_stash_ref = match self.vcs.stash(root, &format!("conductor {}", id)).await {
            Ok(stash) => stash,
            Err(e) => {
                tracing::warn!(checkpoint_id = %id, error = %e, "VCS stash failed, continuing with file backup");
                None
            }
        };

        let checkpoint_dir = self.backup_root.join(&id);
        let files_dir = checkpoint_dir.join(FILES_DIR);
        tokio::fs::create_dir_all(&files_dir)
            .await
            .map_err(|e| ConductorError::CheckpointFailed(format!("{}: {}", files_dir.display(), e)))?;

        let mut files_backed_up = Vec::new();
        for file in files {
            let Some(relative) = relative_to(root, file) else {
                tracing::warn!(file = %file, "Skipping file outside the checkpoint root");
                continue;
            };
            let source = root.join(&relative);
            if !tokio::fs::metadata(&source).await.map(|m| m.is_file()).unwrap_or(false) {
                tracing::debug!(file = %file, "Skipping missing file");
                continue;
            }

            let dest = files_dir.join(&relative);
            copy_file(&source, &dest)
                .await
                .map_err(|e| ConductorError::CheckpointFailed(format!("{:#}", e)))?;
            files_backed_up.push(to_slash(&relative));
        }

        let record = CheckpointRecord {
            id: id.clone(),
            timestamp,
            files_backed_up,
            vcs_stash_ref,
            rolled_back_at: None,
        };

        write_json(&checkpoint_dir.join(METADATA_FILE), &record)
            .map_err(|e| ConductorError::CheckpointFailed(format!("{:#}", e)))?;

        self.history.lock().push(record.clone());
        tracing::info!(
            checkpoint_id = %id,
            files = record.files_backed_up.len(),
            stashed = record.vcs_stash_ref.is_some(),
            "Checkpoint created"
        );
        Ok(record)
    }

    /// Restore checkpoint `id` into `root`
    ///
    /// Never returns an error: unknown ids, a stash that cannot be restored
    /// and copy failures are reported through `RollbackResult::success` and
    /// `message`. The metadata file is consulted before in-memory history.
    #[tracing::instrument(skip(self))]
    pub async fn rollback(&self, id: &str, root: &Path) -> RollbackResult {
        let Some(mut record) = self.read_record(id).or_else(|| self.get(id)) else {
            return RollbackResult {
                success: false,
                checkpoint_id: id.to_string(),
                restored_files: Vec::new(),
                message: format!("Checkpoint not found: {}", id),
            };
        };

        if let Some(at) = record.rolled_back_at {
            return RollbackResult {
                success: false,
                checkpoint_id: id.to_string(),
                restored_files: Vec::new(),
                message: format!("Checkpoint {} was already rolled back at {}", id, at.to_rfc3339()),
            };
        }

        let mut failures = Vec::new();
        if let Some(stash) = &record.vcs_stash_ref {
            if let Err(pop_err) = self.vcs.stash_pop(root, stash).await {
                tracing::warn!(error = %pop_err, "Stash pop failed, trying apply");
                if let Err(apply_err) = self.vcs.stash_apply(root, stash).await {
                    failures.push(format!("stash {} not restored: {:#}", stash, apply_err));
                }
            }
        }

        let files_dir = self.backup_root.join(id).join(FILES_DIR);
        let mut restored_files = Vec::new();

        for relative in &record.files_backed_up {
            let source = files_dir.join(relative);
            if !source.is_file() {
                tracing::debug!(file = %relative, "Backup copy missing, skipping");
                continue;
            }
            match copy_file(&source, &root.join(relative)).await {
                Ok(()) => restored_files.push(relative.clone()),
                Err(e) => failures.push(format!("{}: {:#}", relative, e)),
            }
        }

        if !failures.is_empty() {
            let err = ConductorError::RollbackFailed(failures.join("; "));
            tracing::error!(checkpoint_id = %id, error = %err, "Rollback incomplete");
            return RollbackResult {
                success: false,
                checkpoint_id: id.to_string(),
                restored_files,
                message: err.to_string(),
            };
        }

        record.rolled_back_at = Some(Utc::now());
        self.mark_rolled_back(record);
        tracing::info!(checkpoint_id = %id, restored = restored_files.len(), "Rollback complete");
        RollbackResult {
            success: true,
            checkpoint_id: id.to_string(),
            message: format!("Restored {} file(s)", restored_files.len()),
            restored_files,
        }
    }

    fn mark_rolled_back(&self, record: CheckpointRecord) {
        let path = self.backup_root.join(&record.id).join(METADATA_FILE);
        if let Err(e) = write_json(&path, &record) {
            tracing::warn!(checkpoint_id = %record.id, error = %e, "Failed to persist rollback marker");
        }

        let mut history = self.history.lock();
        match history.iter_mut().find(|r| r.id == record.id) {
            Some(entry) => *entry = record,
            None => {
                history.push(record);
                history.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
            }
        }
    }

    /// Checkpoints in creation order
    pub fn list(&self) -> Vec<CheckpointRecord> {
        self.history.lock().clone()
    }

    pub fn get(&self, id: &str) -> Option<CheckpointRecord> {
        self.history.lock().iter().find(|r| r.id == id).cloned()
    }

    /// Delete checkpoint `id` from disk and history
    pub fn remove(&self, id: &str) -> Result<bool> {
        let dir = self.backup_root.join(id);
        let known = {
            let mut history = self.history.lock();
            let before = history.len();
            history.retain(|r| r.id != id);
            before != history.len()
        };

        if dir.is_dir() {
            std::fs::remove_dir_all(&dir)
                .with_context(|| format!("Failed to remove checkpoint directory: {:?}", dir))?;
            tracing::info!(checkpoint_id = %id, "Checkpoint removed");
            return Ok(true);
        }
        Ok(known)
    }

    /// Rebuild history from metadata files under the backup root
    pub fn load_history(&self) -> Result<usize> {
        if !self.backup_root.exists() {
            return Ok(0);
        }

        let mut found = Vec::new();
        for entry in WalkDir::new(&self.backup_root)
            .min_depth(2)
            .max_depth(2)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if entry.file_name() != METADATA_FILE {
                continue;
            }
            if let Loaded::Found(record) =
                load_or_default::<Option<CheckpointRecord>>(entry.path())
            {
                found.extend(record);
            }
        }
        found.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

        let mut history = self.history.lock();
        let mut added = 0;
        for record in found {
            if !history.iter().any(|r| r.id == record.id) {
                history.push(record);
                added += 1;
            }
        }
        history.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

        tracing::debug!(added, "Checkpoint history loaded");
        Ok(added)
    }

    fn read_record(&self, id: &str) -> Option<CheckpointRecord> {
        let path = self.backup_root.join(id).join(METADATA_FILE);
        match load_or_default::<Option<CheckpointRecord>>(&path) {
            Loaded::Found(record) => record,
            Loaded::Defaulted(..) => None,
        }
    }
}

async fn copy_file(source: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create directory: {:?}", parent))?;
    }
    tokio::fs::copy(source, dest)
        .await
        .with_context(|| format!("Failed to copy {:?} to {:?}", source, dest))?;
    Ok(())
}

/// Lexically resolve `file` against `root`; `None` if it escapes the root
fn relative_to(root: &Path, file: &str) -> Option<PathBuf> {
    let path = Path::new(file);
    let path = if path.is_absolute() {
        path.strip_prefix(root).ok()?
    } else {
        path
    };

    let mut relative = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !relative.pop() {
                    return None;
                }
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }

    if relative.as_os_str().is_empty() {
        None
    } else {
        Some(relative)
    }
}

fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
