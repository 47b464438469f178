//! Change detection between the live tree and a snapshot
//!
//! ## Overview
//!
//! Directories are compared by existence only. Files present in both the live
//! tree and the baseline go through a three-step check, cheapest first:
//!
//! 1. **Fingerprint**: an identical metadata tuple means unchanged, and no
//!    file content is read.
//! 2. **Size**: a different size means modified.
//! 3. **Bytes**: same size but a different fingerprint (a touch, a chmod, a
//!    copy) is settled by streaming the live file against the baseline's
//!    stored blob.
//!
//! ## Examples
//!
//! ```rust,ignore
//! use bak::diff::ChangeDetector;
//! use bak::file_tracking::list_tree;
//!
//! let live = list_tree(root, WalkMode::TrackedOnly)?;
//! let changes = ChangeDetector::new(root.to_path_buf(), 8192)
//!     .detect_changes(index.current(), &live, &store)?;
//! if changes.changed() {
//!     println!("{} paths changed", changes.total());
//! }
//! ```

use crate::error::{BakError, Result};
use crate::snapshot::Snapshot;
use crate::storage::ContentStore;
use crate::types::{ChangeSet, Fingerprint, TreeListing};
use crate::utils::files_equal;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::trace;

/// Computes [`ChangeSet`]s for a tree rooted at a fixed directory
#[derive(Debug, Clone)]
pub struct ChangeDetector {
    /// Root of the live tree
    root: PathBuf,
    /// Buffer size for byte comparison
    chunk_size: usize,
}

impl ChangeDetector {
    /// Create a detector for the tree at `root`
    pub fn new(root: PathBuf, chunk_size: usize) -> Self {
        Self { root, chunk_size }
    }

    /// Diff `live` against `baseline`
    ///
    /// With no baseline every live path is reported as added. Added and
    /// modified paths follow the live walk order; removed paths follow the
    /// baseline's order.
    ///
    /// # Errors
    ///
    /// - [`BakError::BlobMissing`] if a byte comparison needs a baseline blob
    ///   that is not in the store
    /// - [`BakError::Io`] if a live file cannot be read
    pub fn detect_changes(
        &self,
        baseline: Option<&Snapshot>,
        live: &TreeListing,
        store: &ContentStore,
    ) -> Result<ChangeSet> {
        let Some(baseline) = baseline else {
            return Ok(ChangeSet {
                dirs_added: live.dirs.clone(),
                files_added: live.files.clone(),
                ..ChangeSet::default()
            });
        };

        let mut changes = ChangeSet::default();

        let live_dirs: HashSet<&PathBuf> = live.dirs.iter().collect();
        let base_dirs: HashSet<&PathBuf> = baseline.dir_list.iter().collect();
        changes.dirs_added = added(&live.dirs, &base_dirs);
        changes.dirs_removed = added(&baseline.dir_list, &live_dirs);

        let live_files: HashSet<&PathBuf> = live.files.iter().collect();
        let base_files: HashSet<&PathBuf> = baseline.file_list.iter().collect();
        changes.files_added = added(&live.files, &base_files);
        changes.files_removed = added(&baseline.file_list, &live_files);

        for path in live.files.iter().filter(|p| base_files.contains(p)) {
            if self.is_modified(path, baseline, store)? {
                changes.files_modified.push(path.clone());
            }
        }

        trace!(
            "Diff against {}: {} dirs added, {} dirs removed, {} files added, {} removed, {} modified",
            baseline.id,
            changes.dirs_added.len(),
            changes.dirs_removed.len(),
            changes.files_added.len(),
            changes.files_removed.len(),
            changes.files_modified.len()
        );
        Ok(changes)
    }

    fn is_modified(&self, path: &Path, baseline: &Snapshot, store: &ContentStore) -> Result<bool> {
        let record = baseline.file_info.get(path).ok_or_else(|| {
            BakError::corrupt(format!(
                "snapshot {} lists {:?} without a file record",
                baseline.id, path
            ))
        })?;

        let live_path = self.root.join(path);
        let current = Fingerprint::capture(&live_path)?;
        if current == record.stat {
            return Ok(false);
        }
        if current.size != record.stat.size {
            trace!("Size of {:?} changed", path);
            return Ok(true);
        }

        if !store.contains_blob(&record.id) {
            return Err(BakError::BlobMissing(record.id.clone()));
        }
        let equal = files_equal(&live_path, &store.get(&record.id), self.chunk_size)?;
        trace!("Byte comparison of {:?}: equal={}", path, equal);
        Ok(!equal)
    }
}

/// Entries of `items` not present in `other`, in `items` order
fn added(items: &[PathBuf], other: &HashSet<&PathBuf>) -> Vec<PathBuf> {
    items.iter().filter(|p| !other.contains(p)).cloned().collect()
}
