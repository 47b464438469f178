//! Snapshot records
//!
//! A snapshot is the immutable recorded state of the tracked tree at one point
//! in time: the directory and file lists in walk order, and for every file the
//! content id of its stored blob plus the fingerprint captured when the
//! snapshot was taken. Once appended to the index a snapshot is never mutated;
//! only the index's current pointer moves.
//!
//! ## Examples
//!
//! ```rust
//! use bak::snapshot::Snapshot;
//! use bak::types::TreeListing;
//! use std::collections::BTreeMap;
//!
//! let snapshot = Snapshot::new(
//!     "aB3dE6gH".to_string(),
//!     "Initial snapshot.".to_string(),
//!     TreeListing::default(),
//!     BTreeMap::new(),
//! );
//! assert!(snapshot.file_list.is_empty());
//! assert!(snapshot.validate().is_ok());
//! ```

use crate::error::{BakError, Result};
use crate::types::{FileRecord, TreeListing};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Recorded state of the tracked tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Unique snapshot id
    pub id: String,
    /// Free-text tag
    pub tag: String,
    /// Creation time
    pub time: DateTime<Utc>,
    /// Directories, relative to the root, in walk order
    pub dir_list: Vec<PathBuf>,
    /// Files, relative to the root, in walk order
    pub file_list: Vec<PathBuf>,
    /// Content id and fingerprint per file
    pub file_info: BTreeMap<PathBuf, FileRecord>,
}

impl Snapshot {
    /// Create a snapshot stamped with the current time
    pub fn new(
        id: String,
        tag: String,
        listing: TreeListing,
        file_info: BTreeMap<PathBuf, FileRecord>,
    ) -> Self {
        Self {
            id,
            tag,
            time: Utc::now(),
            dir_list: listing.dirs,
            file_list: listing.files,
            file_info,
        }
    }

    /// Content id recorded for `path`, if the snapshot tracks it
    pub fn content_id(&self, path: &Path) -> Option<&str> {
        self.file_info.get(path).map(|record| record.id.as_str())
    }

    /// Content ids referenced by this snapshot, one per tracked file
    pub fn content_ids(&self) -> impl Iterator<Item = (&Path, &str)> {
        self.file_list.iter().filter_map(move |path| {
            self.file_info
                .get(path)
                .map(|record| (path.as_path(), record.id.as_str()))
        })
    }

    /// Check that every listed file has a record and vice versa
    pub fn validate(&self) -> Result<()> {
        if let Some(path) = self.file_list.iter().find(|p| !self.file_info.contains_key(*p)) {
            return Err(BakError::corrupt(format!(
                "snapshot {} lists {:?} without a file record",
                self.id, path
            )));
        }
        if self.file_info.len() != self.file_list.len() {
            return Err(BakError::corrupt(format!(
                "snapshot {} has {} file records for {} files",
                self.id,
                self.file_info.len(),
                self.file_list.len()
            )));
        }
        Ok(())
    }

    /// Default tag for a snapshot taken now
    pub fn default_tag() -> String {
        format!("Snapshot {}", Local::now().format("%Y-%m-%d %H:%M:%S"))
    }

    /// Creation time in the local timezone
    pub fn local_time(&self) -> DateTime<Local> {
        self.time.with_timezone(&Local)
    }
}
