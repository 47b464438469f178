//! Immutability lock
//!
//! Locking trades storage redundancy for tamper resistance. While the live
//! tree matches the current snapshot, every blob that merely duplicates a live
//! file is deleted from the store, and the live tree is made read/execute only
//! at the OS level. Unlocking copies the live files back into the store under
//! their original content ids and restores write access.
//!
//! ## Ordering
//!
//! - Lock restricts bottom-up: files in reverse walk order, then directories in
//!   reverse walk order, then the root. The metadata directory is left
//!   writable so the sentinel can be written.
//! - Unlock grants top-down: the root, then directories, then files, metadata
//!   directory included.
//!
//! The sentinel file `.bak/locked` is the only lock state.

use crate::diff::ChangeDetector;
use crate::error::{BakError, Result};
use crate::file_tracking::{list_tree, WalkMode};
use crate::index::SnapshotIndex;
use crate::permissions::PermissionEnforcer;
use crate::storage::ContentStore;
use crate::types::{BakConfig, LockResult, RepoPaths, UnlockResult};
use std::fs;
use std::time::Instant;
use tracing::{debug, info, instrument};

/// Runs lock and unlock against one repository's state
pub struct LockManager<'a> {
    paths: &'a RepoPaths,
    config: &'a BakConfig,
    store: &'a ContentStore,
    index: &'a SnapshotIndex,
    enforcer: &'a dyn PermissionEnforcer,
}

impl<'a> LockManager<'a> {
    /// Borrow the pieces of a repository needed to lock or unlock it
    pub fn new(
        paths: &'a RepoPaths,
        config: &'a BakConfig,
        store: &'a ContentStore,
        index: &'a SnapshotIndex,
        enforcer: &'a dyn PermissionEnforcer,
    ) -> Self {
        Self {
            paths,
            config,
            store,
            index,
            enforcer,
        }
    }

    /// Lock the repository
    ///
    /// # Errors
    ///
    /// - [`BakError::AlreadyLocked`] if the sentinel exists
    /// - [`BakError::PendingChanges`] if the live tree differs from the
    ///   current snapshot, or no snapshot exists
    /// - [`BakError::Io`] if a blob, permission or the sentinel cannot be written
    #[instrument(skip(self), fields(root = ?self.paths.root))]
    pub fn lock(&self) -> Result<LockResult> {
        if self.paths.is_locked() {
            return Err(BakError::AlreadyLocked);
        }
        let start = Instant::now();

        let current = self.index.current().ok_or(BakError::PendingChanges)?;
        let live = list_tree(&self.paths.root, WalkMode::TrackedOnly)?;
        let changes = ChangeDetector::new(self.paths.root.clone(), self.config.chunk_size)
            .detect_changes(Some(current), &live, self.store)?;
        if changes.changed() {
            debug!("Refusing to lock with {} pending changes", changes.total());
            return Err(BakError::PendingChanges);
        }

        let mut result = LockResult::default();
        for (_, id) in current.content_ids() {
            if self.store.remove(id)? {
                result.blobs_removed += 1;
            }
        }

        for file in live.files.iter().rev() {
            self.enforcer
                .restrict_to_read_execute(&self.paths.live_path(file))?;
        }
        for dir in live.dirs.iter().rev() {
            self.enforcer
                .restrict_to_read_execute(&self.paths.live_path(dir))?;
        }
        self.enforcer.restrict_to_read_execute(&self.paths.root)?;
        result.paths_restricted = live.len() + 1;

        fs::write(&self.paths.lock_file, b"")?;

        info!(
            "Locked {:?}: {} blobs pruned, {} paths restricted in {:?}",
            self.paths.root,
            result.blobs_removed,
            result.paths_restricted,
            start.elapsed()
        );
        Ok(result)
    }

    /// Unlock the repository
    ///
    /// # Errors
    ///
    /// - [`BakError::AlreadyUnlocked`] if the sentinel is absent
    /// - [`BakError::Io`] if a blob cannot be restored or a permission changed
    #[instrument(skip(self), fields(root = ?self.paths.root))]
    pub fn unlock(&self) -> Result<UnlockResult> {
        if !self.paths.is_locked() {
            return Err(BakError::AlreadyUnlocked);
        }
        let start = Instant::now();
        let mut result = UnlockResult::default();

        if let Some(current) = self.index.current() {
            for (path, id) in current.content_ids() {
                if !self.store.contains_blob(id) {
                    self.store.restore(id, &self.paths.live_path(path))?;
                    result.blobs_restored += 1;
                }
            }
        }

        result.paths_granted = grant_full_access_tree(self.paths, self.enforcer)?;
        fs::remove_file(&self.paths.lock_file)?;

        info!(
            "Unlocked {:?}: {} blobs restored, {} paths granted in {:?}",
            self.paths.root,
            result.blobs_restored,
            result.paths_granted,
            start.elapsed()
        );
        Ok(result)
    }
}

/// Grant full access over the root, then every directory, then every file
///
/// The metadata directory is included. Returns the number of paths touched.
pub(crate) fn grant_full_access_tree(
    paths: &RepoPaths,
    enforcer: &dyn PermissionEnforcer,
) -> Result<usize> {
    enforcer.grant_full_access(&paths.root)?;
    let tree = list_tree(&paths.root, WalkMode::IncludeMetadata)?;
    for dir in &tree.dirs {
        enforcer.grant_full_access(&paths.live_path(dir))?;
    }
    for file in &tree.files {
        enforcer.grant_full_access(&paths.live_path(file))?;
    }
    Ok(tree.len() + 1)
}
