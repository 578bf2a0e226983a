//! # Version Control Adapter
//!
//! Stash support for checkpoints. `GitVcs` talks to the repository through
//! `git2` on a blocking thread; `NoopVcs` is used outside of repositories.

use anyhow::{Context, Result};
use async_trait::async_trait;
use git2::build::CheckoutBuilder;
use git2::{
    Commit, Delta, ErrorCode, ObjectType, Oid, Repository, Signature, StashFlags, TreeWalkMode,
    TreeWalkResult,
};
use std::path::{Path, PathBuf};

/// Stash operations the checkpoint manager relies on
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Record the working tree without changing it; `None` when nothing to stash
    async fn stash(&self, root: &Path, message: &str) -> Result<Option<String>>;

    /// Put the working tree back to the stashed state and drop the stash
    ///
    /// Paths the stash touches are reset first, so later edits to them are
    /// discarded rather than reported as conflicts.
    async fn stash_pop(&self, root: &Path, stash_ref: &str) -> Result<()>;

    /// Same as `stash_pop`, keeping the stash
    async fn stash_apply(&self, root: &Path, stash_ref: &str) -> Result<()>;
}

/// Version control that does nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopVcs;

#[async_trait]
impl VersionControl for NoopVcs {
    async fn stash(&self, _root: &Path, _message: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn stash_pop(&self, _root: &Path, _stash_ref: &str) -> Result<()> {
        Ok(())
    }

    async fn stash_apply(&self, _root: &Path, _stash_ref: &str) -> Result<()> {
        Ok(())
    }
}

/// Git stash via libgit2
#[derive(Debug, Default, Clone, Copy)]
pub struct GitVcs;

impl GitVcs {
    /// Whether `root` sits inside a git repository
    pub fn is_repository(root: &Path) -> bool {
        Repository::discover(root).is_ok()
    }
}

#[async_trait]
impl VersionControl for GitVcs {
    async fn stash(&self, root: &Path, message: &str) -> Result<Option<String>> {
        let root = root.to_path_buf();
        let message = message.to_string();
        tokio::task::spawn_blocking(move || stash_blocking(&root, &message))
            .await
            .context("Stash task panicked")?
    }

    async fn stash_pop(&self, root: &Path, stash_ref: &str) -> Result<()> {
        let root = root.to_path_buf();
        let stash_ref = stash_ref.to_string();
        tokio::task::spawn_blocking(move || restore_blocking(&root, &stash_ref, true))
            .await
            .context("Stash pop task panicked")?
    }

    async fn stash_apply(&self, root: &Path, stash_ref: &str) -> Result<()> {
        let root = root.to_path_buf();
        let stash_ref = stash_ref.to_string();
        tokio::task::spawn_blocking(move || restore_blocking(&root, &stash_ref, false))
            .await
            .context("Stash apply task panicked")?
    }
}

fn open(root: &Path) -> Result<Repository> {
    Repository::discover(root)
        .with_context(|| format!("Failed to open repository at {:?}", root))
}

fn stash_blocking(root: &Path, message: &str) -> Result<Option<String>> {
    let mut repo = open(root)?;
    let signature = repo
        .signature()
        .or_else(|_| Signature::now("conductor", "conductor@localhost"))
        .context("Failed to build stash signature")?;

    let oid = match repo.stash_save(&signature, message, Some(StashFlags::INCLUDE_UNTRACKED)) {
        Ok(oid) => oid,
        Err(e) if e.code() == ErrorCode::NotFound => {
            tracing::debug!(root = ?root, "Nothing to stash");
            return Ok(None);
        }
        Err(e) => return Err(e).context("git stash save failed"),
    };

    // Saving a stash resets the tree; put the changes straight back
    repo.stash_apply(0, None)
        .context("Failed to re-apply stash after saving")?;

    tracing::info!(stash = %oid, "Working tree stashed");
    Ok(Some(oid.to_string()))
}

fn restore_blocking(root: &Path, stash_ref: &str, pop: bool) -> Result<()> {
    let mut repo = open(root)?;
    let target = Oid::from_str(stash_ref).context("Invalid stash reference")?;

    let mut index = None;
    repo.stash_foreach(|i, _message, oid| {
        if *oid == target {
            index = Some(i);
            false
        } else {
            true
        }
    })?;

    let index = index.ok_or_else(|| anyhow::anyhow!("Stash {} not found", stash_ref))?;
    {
        let stash = repo.find_commit(target).context("Failed to read stash commit")?;
        clear_stashed_paths(&repo, &stash)?;
    }

    if pop {
        repo.stash_pop(index, None).context("git stash pop failed")
    } else {
        repo.stash_apply(index, None).context("git stash apply failed")
    }
}

/// Reset every path `stash` records to HEAD and delete the ones HEAD lacks
fn clear_stashed_paths(repo: &Repository, stash: &Commit<'_>) -> Result<()> {
    let workdir = repo
        .workdir()
        .ok_or_else(|| anyhow::anyhow!("Repository has no working directory"))?
        .to_path_buf();

    let base = stash.parent(0).context("Stash has no base commit")?;
    let diff = repo
        .diff_tree_to_tree(Some(&base.tree()?), Some(&stash.tree()?), None)
        .context("Failed to diff stash against its base")?;

    let mut tracked: Vec<PathBuf> = Vec::new();
    let mut created: Vec<PathBuf> = Vec::new();
    for delta in diff.deltas() {
        let Some(path) = delta.new_file().path().or_else(|| delta.old_file().path()) else {
            continue;
        };
        match delta.status() {
            Delta::Added => created.push(path.to_path_buf()),
            _ => tracked.push(path.to_path_buf()),
        }
    }

    // Untracked files are kept in the third parent
    if let Ok(untracked) = stash.parent(2) {
        untracked.tree()?.walk(TreeWalkMode::PreOrder, |dir, entry| {
            if entry.kind() == Some(ObjectType::Blob) {
                if let Some(name) = entry.name() {
                    created.push(PathBuf::from(format!("{}{}", dir, name)));
                }
            }
            TreeWalkResult::Ok
        })?;
    }

    if !tracked.is_empty() {
        let mut checkout = CheckoutBuilder::new();
        checkout.force();
        for path in &tracked {
            checkout.path(path.as_path());
        }
        repo.checkout_head(Some(&mut checkout))
            .context("Failed to reset stashed paths")?;
    }

    if !created.is_empty() {
        let mut index = repo.index()?;
        for path in &created {
            if index.get_path(path, 0).is_some() {
                index.remove_path(path)?;
            }
            let file = workdir.join(path);
            if file.is_file() {
                std::fs::remove_file(&file)
                    .with_context(|| format!("Failed to remove {:?}", file))?;
            }
        }
        index.write()?;
    }

    tracing::debug!(
        reset = tracked.len(),
        removed = created.len(),
        "Stashed paths cleared"
    );
    Ok(())
}
