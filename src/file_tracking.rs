//! Tree enumeration for bak
//!
//! Walks the working tree and returns the relative paths of every directory and
//! regular file, in walk order. Siblings are visited in file-name order so the
//! listing is deterministic and a parent directory always precedes its
//! contents.
//!
//! ## Walk Modes
//!
//! - [`WalkMode::TrackedOnly`] skips the `.bak` metadata directory and
//!   everything beneath it. This is what snapshots record.
//! - [`WalkMode::IncludeMetadata`] also yields the metadata directory. Only the
//!   lock machinery uses it, so permission changes cover the whole tree.
//!
//! Symbolic links are neither followed nor tracked.
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use bak::file_tracking::{FileEnumerator, WalkMode};
//! use std::path::PathBuf;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let listing = FileEnumerator::new(PathBuf::from("./project")).list_tree()?;
//! println!("{} dirs, {} files", listing.dirs.len(), listing.files.len());
//! # Ok(())
//! # }
//! ```

use crate::error::Result;
use crate::types::{TreeListing, META_DIR};
use crate::utils::make_relative;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, trace};
use walkdir::{DirEntry, WalkDir};

/// Which parts of the tree a walk yields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WalkMode {
    /// Everything except the metadata directory subtree
    #[default]
    TrackedOnly,
    /// Everything, metadata directory included
    IncludeMetadata,
}

/// Walks a tree rooted at a fixed directory
#[derive(Debug, Clone)]
pub struct FileEnumerator {
    /// Root directory to walk
    root_path: PathBuf,
    /// Whether the metadata directory is yielded
    mode: WalkMode,
}

impl FileEnumerator {
    /// Create an enumerator that skips the metadata directory
    pub fn new(root_path: PathBuf) -> Self {
        Self {
            root_path,
            mode: WalkMode::TrackedOnly,
        }
    }

    /// Set the walk mode
    pub fn with_mode(mut self, mode: WalkMode) -> Self {
        self.mode = mode;
        self
    }

    /// Walk the tree
    ///
    /// # Returns
    ///
    /// A [`TreeListing`] with directories and files relative to the root, each
    /// list in walk order. The root itself is not listed.
    ///
    /// # Errors
    ///
    /// - [`crate::BakError::WalkDir`] if any entry cannot be read
    pub fn list_tree(&self) -> Result<TreeListing> {
        let start = Instant::now();
        let mut listing = TreeListing::default();
        let include_metadata = self.mode == WalkMode::IncludeMetadata;

        let walker = WalkDir::new(&self.root_path)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| include_metadata || !is_metadata_dir(entry));

        for entry in walker {
            let entry = entry?;
            let file_type = entry.file_type();
            let relative = make_relative(entry.path(), &self.root_path)?;

            if file_type.is_dir() {
                listing.dirs.push(relative);
            } else if file_type.is_file() {
                listing.files.push(relative);
            } else {
                debug!("Skipping non-regular entry {:?}", relative);
            }
        }

        trace!(
            "Listed {} dirs and {} files under {:?} in {:?}",
            listing.dirs.len(),
            listing.files.len(),
            self.root_path,
            start.elapsed()
        );
        Ok(listing)
    }
}

/// Walk `root` with the given mode
pub fn list_tree(root: &Path, mode: WalkMode) -> Result<TreeListing> {
    FileEnumerator::new(root.to_path_buf()).with_mode(mode).list_tree()
}

/// Whether `entry` is the top-level metadata directory
fn is_metadata_dir(entry: &DirEntry) -> bool {
    entry.depth() == 1 && entry.file_type().is_dir() && entry.file_name() == META_DIR
}
