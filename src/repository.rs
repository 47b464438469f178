//! Snapshot engine
//!
//! [`Repository`] is the entry point for every operation on a backed-up tree.
//! It owns the repository context, the content store and the snapshot index,
//! and drives them through the lifecycle:
//!
//! ```text
//!            init ──► Unlocked ◄──────── unlock ────────┐
//!                      │  ▲                              │
//!     snapshot/status/ │  │                              │
//!     checkout/log     └──┘        lock ──────────► Locked (log only)
//! ```
//!
//! Mutating operations are refused while the repository is locked.
//!
//! ## Examples
//!
//! ```rust,no_run
//! use bak::Repository;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut repo = Repository::init("./project", None, false)?;
//!
//! std::fs::write("./project/notes.txt", "draft")?;
//! let snap = repo.snapshot(Some("Draft notes".to_string()))?;
//!
//! std::fs::write("./project/notes.txt", "final")?;
//! println!("{} paths changed", repo.status()?.total());
//!
//! // Discard the pending edit
//! repo.checkout(&snap.id, |_pending| true)?;
//! # Ok(())
//! # }
//! ```

use crate::diff::ChangeDetector;
use crate::error::{BakError, Result};
use crate::file_tracking::{list_tree, WalkMode};
use crate::index::SnapshotIndex;
use crate::lock::{grant_full_access_tree, LockManager};
use crate::permissions::{platform_enforcer, PermissionEnforcer};
use crate::snapshot::Snapshot;
use crate::storage::ContentStore;
use crate::types::*;
use crate::utils::{read_json, write_json};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, trace, warn};

/// A backed-up tree and its metadata
pub struct Repository {
    /// Root and metadata paths
    paths: RepoPaths,
    /// Tunables loaded from `config.json`
    config: BakConfig,
    /// Blob store
    store: ContentStore,
    /// Snapshot index
    index: SnapshotIndex,
    /// Collaborator for OS-level access control
    enforcer: Arc<dyn PermissionEnforcer>,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("paths", &self.paths)
            .field("config", &self.config)
            .field("store", &self.store)
            .field("snapshots", &self.index.len())
            .field("current", &self.index.current_id())
            .field("enforcer", &self.enforcer)
            .finish()
    }
}

impl Repository {
    /// Initialize a repository at `root` with default settings
    ///
    /// See [`RepositoryBuilder::init`].
    pub fn init(root: impl Into<PathBuf>, tag: Option<String>, force: bool) -> Result<Self> {
        RepositoryBuilder::new().init(root, tag, force)
    }

    /// Open the repository at `root` with default settings
    ///
    /// See [`RepositoryBuilder::open`].
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        RepositoryBuilder::new().open(root)
    }

    /// Record the live tree as a new snapshot and make it current
    ///
    /// Added and modified files go through [`ContentStore::add`]; unchanged
    /// files inherit their content id from the current snapshot without being
    /// read. Fingerprints are captured afresh for every file. The first
    /// snapshot of a repository is always taken, even for an empty tree.
    ///
    /// # Errors
    ///
    /// - [`BakError::Locked`] if the repository is locked
    /// - [`BakError::NothingToSnapshot`] if the tree matches the current snapshot
    /// - [`BakError::IdSpaceExhausted`] if no fresh id could be generated
    #[instrument(skip(self), fields(root = ?self.paths.root))]
    pub fn snapshot(&mut self, tag: Option<String>) -> Result<Snapshot> {
        self.ensure_unlocked()?;
        let start = Instant::now();

        let live = self.live_tree()?;
        let current = self.index.current();
        let changes = self
            .detector()
            .detect_changes(current, &live, &self.store)?;
        if current.is_some() && !changes.changed() {
            return Err(BakError::NothingToSnapshot);
        }

        let fresh: HashSet<&PathBuf> = changes
            .files_added
            .iter()
            .chain(&changes.files_modified)
            .collect();

        let mut file_info = BTreeMap::new();
        for file in &live.files {
            let path = self.paths.live_path(file);
            let id = if fresh.contains(file) {
                self.store.add(&path)?
            } else {
                current
                    .and_then(|snapshot| snapshot.content_id(file))
                    .map(str::to_string)
                    .ok_or_else(|| {
                        BakError::corrupt(format!("unchanged file {:?} has no recorded content", file))
                    })?
            };
            let stat = Fingerprint::capture(&path)?;
            file_info.insert(file.clone(), FileRecord { id, stat });
        }

        let id = self.index.new_snapshot_id(&self.config)?;
        let tag = tag.unwrap_or_else(Snapshot::default_tag);
        let snapshot = Snapshot::new(id, tag, live, file_info);

        self.store.persist()?;
        self.index.push(snapshot.clone())?;
        self.index.save(&self.paths.snapshots_file)?;

        info!(
            "Created snapshot {} ({} files, {} stored) in {:?}",
            snapshot.id,
            snapshot.file_list.len(),
            fresh.len(),
            start.elapsed()
        );
        Ok(snapshot)
    }

    /// Differences between the live tree and the current snapshot
    ///
    /// # Errors
    ///
    /// - [`BakError::Locked`] if the repository is locked
    #[instrument(skip(self), fields(root = ?self.paths.root))]
    pub fn status(&self) -> Result<ChangeSet> {
        self.ensure_unlocked()?;
        let live = self.live_tree()?;
        let changes = self
            .detector()
            .detect_changes(self.index.current(), &live, &self.store)?;
        debug!("Status: {} changed paths", changes.total());
        Ok(changes)
    }

    /// Every snapshot in creation order, with the current one marked
    ///
    /// Allowed while locked.
    pub fn log(&self) -> Vec<LogEntry> {
        self.index.log_entries()
    }

    /// Make the live tree match snapshot `target_id`
    ///
    /// When the live tree has pending changes relative to the current
    /// snapshot, `confirm` receives them and must return `true` for the
    /// checkout to proceed; nothing is touched otherwise.
    ///
    /// # Errors
    ///
    /// - [`BakError::Locked`] if the repository is locked
    /// - [`BakError::InvalidSnapshotId`] if no snapshot has that id
    /// - [`BakError::CheckoutAborted`] if `confirm` returned `false`
    /// - [`BakError::BlobMissing`] if a blob to restore is absent
    #[instrument(skip(self, confirm), fields(root = ?self.paths.root))]
    pub fn checkout<F>(&mut self, target_id: &str, confirm: F) -> Result<CheckoutResult>
    where
        F: FnOnce(&ChangeSet) -> bool,
    {
        self.ensure_unlocked()?;
        let start = Instant::now();

        let target = self
            .index
            .get(target_id)
            .cloned()
            .ok_or_else(|| BakError::InvalidSnapshotId(target_id.to_string()))?;

        let detector = self.detector();
        let live = self.live_tree()?;
        let pending = detector.detect_changes(self.index.current(), &live, &self.store)?;
        if pending.changed() && !confirm(&pending) {
            info!("Checkout of {} aborted with {} pending changes", target_id, pending.total());
            return Err(BakError::CheckoutAborted);
        }

        let changes = detector.detect_changes(Some(&target), &live, &self.store)?;
        let mut result = CheckoutResult {
            snapshot_id: target.id.clone(),
            ..CheckoutResult::default()
        };

        if changes.changed() {
            self.apply_changes(&target, &changes, &mut result)?;
        } else {
            debug!("Live tree already matches {}", target.id);
        }

        self.index.set_current(&target.id)?;
        self.index.save(&self.paths.snapshots_file)?;

        result.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Checked out {}: {} files restored, {} deleted, {} dirs created, {} removed",
            target.id,
            result.files_restored,
            result.files_deleted,
            result.dirs_created,
            result.dirs_removed
        );
        Ok(result)
    }

    /// Apply a live-versus-target diff so the live tree matches `target`
    fn apply_changes(
        &self,
        target: &Snapshot,
        changes: &ChangeSet,
        result: &mut CheckoutResult,
    ) -> Result<()> {
        // "added" paths exist only live, "removed" paths only in the target
        for dir in &changes.dirs_added {
            let path = self.paths.live_path(dir);
            if path.is_dir() {
                fs::remove_dir_all(&path)?;
                result.dirs_removed += 1;
                trace!("Removed directory {:?}", dir);
            }
        }

        for dir in &changes.dirs_removed {
            let path = self.paths.live_path(dir);
            if is_non_directory(&path) {
                fs::remove_file(&path)?;
                result.files_deleted += 1;
            }
            if !path.is_dir() {
                fs::create_dir_all(&path)?;
                result.dirs_created += 1;
                trace!("Created directory {:?}", dir);
            }
        }

        for file in &changes.files_added {
            let path = self.paths.live_path(file);
            if is_non_directory(&path) {
                fs::remove_file(&path)?;
                result.files_deleted += 1;
                trace!("Deleted file {:?}", file);
            }
        }

        for file in changes.files_removed.iter().chain(&changes.files_modified) {
            let id = target.content_id(file).ok_or_else(|| {
                BakError::corrupt(format!("snapshot {} has no record for {:?}", target.id, file))
            })?;
            let dest = self.paths.live_path(file);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            // Never copy through an untracked symlink (or hard link) at the destination
            if is_non_directory(&dest) {
                fs::remove_file(&dest)?;
                trace!("Cleared {:?} before restore", file);
            }
            result.bytes_written += self.store.copy_out(id, &dest)?;
            result.files_restored += 1;
            trace!("Restored {:?} from blob {}", file, id);
        }
        Ok(())
    }

    /// Lock the repository
    ///
    /// See [`LockManager::lock`].
    pub fn lock(&mut self) -> Result<LockResult> {
        LockManager::new(
            &self.paths,
            &self.config,
            &self.store,
            &self.index,
            self.enforcer.as_ref(),
        )
        .lock()
    }

    /// Unlock the repository
    ///
    /// See [`LockManager::unlock`].
    pub fn unlock(&mut self) -> Result<UnlockResult> {
        LockManager::new(
            &self.paths,
            &self.config,
            &self.store,
            &self.index,
            self.enforcer.as_ref(),
        )
        .unlock()
    }

    /// Whether the lock sentinel exists
    pub fn is_locked(&self) -> bool {
        self.paths.is_locked()
    }

    /// The current snapshot, if any
    pub fn current_snapshot(&self) -> Option<&Snapshot> {
        self.index.current()
    }

    /// Repository context
    pub fn paths(&self) -> &RepoPaths {
        &self.paths
    }

    /// Tunables in effect
    pub fn config(&self) -> &BakConfig {
        &self.config
    }

    /// Snapshot index
    pub fn index(&self) -> &SnapshotIndex {
        &self.index
    }

    /// Content store
    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    fn ensure_unlocked(&self) -> Result<()> {
        if self.paths.is_locked() {
            return Err(BakError::Locked);
        }
        Ok(())
    }

    fn live_tree(&self) -> Result<TreeListing> {
        list_tree(&self.paths.root, WalkMode::TrackedOnly)
    }

    fn detector(&self) -> ChangeDetector {
        ChangeDetector::new(self.paths.root.clone(), self.config.chunk_size)
    }
}

/// Whether something other than a directory exists at `path`
fn is_non_directory(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|m| !m.is_dir())
        .unwrap_or(false)
}

/// Builder for [`Repository`] configuration
///
/// # Examples
///
/// ```rust,no_run
/// use bak::{NoopEnforcer, RepositoryBuilder};
/// use std::sync::Arc;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let repo = RepositoryBuilder::new()
///     .snapshot_id_len(12)
///     .chunk_size(64 * 1024)
///     .permission_enforcer(Arc::new(NoopEnforcer))
///     .init("./project", Some("Start".to_string()), false)?;
/// # Ok(())
/// # }
/// ```
///
/// # Default Values
///
/// - `content_id_len`: 64
/// - `snapshot_id_len`: 8
/// - `chunk_size`: 8 KiB
/// - `max_id_attempts`: 10 000
/// - `permission_enforcer`: the platform's native enforcer
#[derive(Debug, Default)]
pub struct RepositoryBuilder {
    config: BakConfig,
    enforcer: Option<Arc<dyn PermissionEnforcer>>,
}

impl RepositoryBuilder {
    /// Create a builder with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Length of generated content ids
    pub fn content_id_len(mut self, len: usize) -> Self {
        self.config.content_id_len = len.max(1);
        self
    }

    /// Length of generated snapshot ids
    pub fn snapshot_id_len(mut self, len: usize) -> Self {
        self.config.snapshot_id_len = len.max(1);
        self
    }

    /// Buffer size for streaming hashes and comparisons
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size.max(1);
        self
    }

    /// Upper bound on attempts to generate an unused id
    pub fn max_id_attempts(mut self, attempts: usize) -> Self {
        self.config.max_id_attempts = attempts.max(1);
        self
    }

    /// Replace the platform's permission enforcer
    pub fn permission_enforcer(mut self, enforcer: Arc<dyn PermissionEnforcer>) -> Self {
        self.enforcer = Some(enforcer);
        self
    }

    /// Create a repository at `root` and take its first snapshot
    ///
    /// With `force`, an existing repository is removed first; if it was
    /// locked, full access is granted over the tree before the removal.
    /// The tag defaults to `Initial snapshot.`.
    ///
    /// # Errors
    ///
    /// - [`BakError::AlreadyExists`] if a repository exists and `force` is false
    /// - [`BakError::Internal`] if `root` is not a directory
    /// - [`BakError::Io`] on any filesystem failure
    #[instrument(skip(self, root))]
    pub fn init(self, root: impl Into<PathBuf>, tag: Option<String>, force: bool) -> Result<Repository> {
        let paths = RepoPaths::new(root);
        info!("Initializing backup at {:?}", paths.root);

        if !paths.root.is_dir() {
            return Err(BakError::internal(format!(
                "Root path {:?} is not a directory",
                paths.root
            )));
        }

        let enforcer = self.enforcer.unwrap_or_else(platform_enforcer);

        if paths.is_initialized() {
            if !force {
                return Err(BakError::AlreadyExists(paths.root.clone()));
            }
            if paths.is_locked() {
                debug!("Existing backup is locked; granting access before removal");
                grant_full_access_tree(&paths, enforcer.as_ref())?;
            }
            warn!("Removing existing backup at {:?}", paths.meta_dir);
            fs::remove_dir_all(&paths.meta_dir)?;
        }

        fs::create_dir_all(&paths.meta_dir)?;
        let store = ContentStore::init(&paths, &self.config)?;
        let index = SnapshotIndex::new();
        index.save(&paths.snapshots_file)?;
        write_json(&paths.config_file, &RepoMetadata::new(self.config.clone()))?;

        grant_full_access_tree(&paths, enforcer.as_ref())?;

        let mut repo = Repository {
            paths,
            config: self.config,
            store,
            index,
            enforcer,
        };
        let tag = tag.unwrap_or_else(|| DEFAULT_INIT_TAG.to_string());
        repo.snapshot(Some(tag))?;
        Ok(repo)
    }

    /// Open the repository at `root`
    ///
    /// Id lengths and the other tunables come from `config.json`; only the
    /// permission enforcer is taken from the builder.
    ///
    /// # Errors
    ///
    /// - [`BakError::NotInitialized`] if no metadata directory exists
    /// - [`BakError::CorruptIndex`] if the snapshot index contradicts itself
    #[instrument(skip(self, root))]
    pub fn open(self, root: impl Into<PathBuf>) -> Result<Repository> {
        let paths = RepoPaths::new(root);
        if !paths.is_initialized() {
            return Err(BakError::NotInitialized(paths.root.clone()));
        }

        let config = if paths.config_file.exists() {
            read_json::<RepoMetadata>(&paths.config_file)?.config
        } else {
            warn!("No config.json in {:?}; using builder settings", paths.meta_dir);
            self.config
        };

        let store = ContentStore::open(&paths, &config)?;
        let index = SnapshotIndex::load(&paths.snapshots_file)?;
        debug!(
            "Opened backup at {:?} ({} snapshots, locked: {})",
            paths.root,
            index.len(),
            paths.is_locked()
        );

        Ok(Repository {
            paths,
            config,
            store,
            index,
            enforcer: self.enforcer.unwrap_or_else(platform_enforcer),
        })
    }
}
