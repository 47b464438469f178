//! Core data types used throughout the bak library
//!
//! ## Overview
//!
//! The types in this module represent:
//! - **Repository context**: `RepoPaths` - the root plus every resolved metadata path
//! - **Configuration**: `BakConfig`, `RepoMetadata` - tunables and the persisted `config.json`
//! - **File state**: `Fingerprint`, `FileRecord` - what a snapshot remembers per file
//! - **Operations**: `TreeListing`, `ChangeSet`, `LogEntry`, `CheckoutResult`,
//!   `LockResult`, `UnlockResult` - inputs and results of engine operations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
#[cfg(not(unix))]
use std::time::SystemTime;

/// Name of the metadata directory at the tree root
pub const META_DIR: &str = ".bak";

/// Tag given to the snapshot taken by `init` when none is supplied
pub const DEFAULT_INIT_TAG: &str = "Initial snapshot.";

/// Version of the on-disk layout
pub const FORMAT_VERSION: u32 = 1;

/// Explicit repository context
///
/// Every engine operation receives the paths it touches from here instead of
/// from process-wide state, so several repositories can coexist in one process.
///
/// ```text
/// <root>/
/// └── .bak/
///     ├── files/<content-id>   # raw blob bytes
///     ├── snapshots.json       # snapshot index
///     ├── store_info.json      # id registry and hash buckets
///     ├── config.json          # format metadata and configuration
///     └── locked               # present only while locked
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoPaths {
    /// Root of the tracked tree
    pub root: PathBuf,
    /// Metadata directory (`<root>/.bak`)
    pub meta_dir: PathBuf,
    /// Blob directory
    pub files_dir: PathBuf,
    /// Snapshot index document
    pub snapshots_file: PathBuf,
    /// Store registry document
    pub store_info_file: PathBuf,
    /// Configuration document
    pub config_file: PathBuf,
    /// Lock sentinel
    pub lock_file: PathBuf,
}

impl RepoPaths {
    /// Resolve all metadata paths for a tree rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let meta_dir = root.join(META_DIR);
        Self {
            files_dir: meta_dir.join("files"),
            snapshots_file: meta_dir.join("snapshots.json"),
            store_info_file: meta_dir.join("store_info.json"),
            config_file: meta_dir.join("config.json"),
            lock_file: meta_dir.join("locked"),
            meta_dir,
            root,
        }
    }

    /// Whether a metadata directory exists
    pub fn is_initialized(&self) -> bool {
        self.meta_dir.exists()
    }

    /// Whether the lock sentinel exists
    pub fn is_locked(&self) -> bool {
        self.lock_file.exists()
    }

    /// Absolute path of a tracked relative path
    pub fn live_path(&self, relative: &Path) -> PathBuf {
        self.root.join(relative)
    }
}

/// Tunables for a repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BakConfig {
    /// Length of generated content ids
    pub content_id_len: usize,
    /// Length of generated snapshot ids
    pub snapshot_id_len: usize,
    /// Buffer size for streaming hashes and comparisons
    pub chunk_size: usize,
    /// Upper bound on generate-and-check rounds for a fresh id
    pub max_id_attempts: usize,
}

impl Default for BakConfig {
    fn default() -> Self {
        Self {
            content_id_len: 64,
            snapshot_id_len: 8,
            chunk_size: 8192,
            max_id_attempts: 10_000,
        }
    }
}

/// Contents of `config.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoMetadata {
    /// Version of the on-disk layout
    pub format_version: u32,
    /// Crate version that created the repository
    pub bak_version: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Configuration
    pub config: BakConfig,
}

impl RepoMetadata {
    /// Metadata for a repository created now
    pub fn new(config: BakConfig) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            bak_version: env!("CARGO_PKG_VERSION").to_string(),
            created_at: Utc::now(),
            config,
        }
    }
}

/// OS metadata tuple used as a cheap "unchanged" check
///
/// Equality means the file is assumed unchanged. Inequality is inconclusive
/// and falls back to a size check and then a byte comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    /// File mode bits
    pub mode: u32,
    /// Inode number
    pub ino: u64,
    /// Device id
    pub dev: u64,
    /// Hard link count
    pub nlink: u64,
    /// Size in bytes
    pub size: u64,
    /// Modification time, nanoseconds since the epoch
    pub mtime_ns: i64,
    /// Status change time, nanoseconds since the epoch
    pub ctime_ns: i64,
}

impl Fingerprint {
    /// Capture the fingerprint of the file at `path`
    #[cfg(unix)]
    pub fn capture(path: &Path) -> std::io::Result<Self> {
        use std::os::unix::fs::MetadataExt;

        let metadata = fs::metadata(path)?;
        Ok(Self {
            mode: metadata.mode(),
            ino: metadata.ino(),
            dev: metadata.dev(),
            nlink: metadata.nlink(),
            size: metadata.size(),
            mtime_ns: metadata
                .mtime()
                .saturating_mul(1_000_000_000)
                .saturating_add(metadata.mtime_nsec()),
            ctime_ns: metadata
                .ctime()
                .saturating_mul(1_000_000_000)
                .saturating_add(metadata.ctime_nsec()),
        })
    }

    /// Capture the fingerprint of the file at `path`
    #[cfg(not(unix))]
    pub fn capture(path: &Path) -> std::io::Result<Self> {
        let metadata = fs::metadata(path)?;
        let mode = if metadata.permissions().readonly() { 0o444 } else { 0o644 };
        Ok(Self {
            mode,
            ino: 0,
            dev: 0,
            nlink: 1,
            size: metadata.len(),
            mtime_ns: metadata.modified().map(system_time_ns).unwrap_or(0),
            ctime_ns: metadata.created().map(system_time_ns).unwrap_or(0),
        })
    }
}

#[cfg(not(unix))]
fn system_time_ns(time: SystemTime) -> i64 {
    let datetime: DateTime<Utc> = time.into();
    datetime.timestamp_nanos_opt().unwrap_or(0)
}

/// What a snapshot records for one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Content id of the stored blob
    pub id: String,
    /// Fingerprint at snapshot time
    pub stat: Fingerprint,
}

/// Result of walking the tree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeListing {
    /// Directories, relative to the root, in walk order
    pub dirs: Vec<PathBuf>,
    /// Regular files, relative to the root, in walk order
    pub files: Vec<PathBuf>,
}

impl TreeListing {
    /// Total number of entries
    pub fn len(&self) -> usize {
        self.dirs.len() + self.files.len()
    }

    /// Whether the tree is empty
    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty() && self.files.is_empty()
    }
}

/// Difference between the live tree and a baseline snapshot
///
/// "Added" means present live but absent from the baseline; "removed" means
/// the opposite. Every live path lands in at most one list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    /// Directories present live but not in the baseline
    pub dirs_added: Vec<PathBuf>,
    /// Directories in the baseline but not present live
    pub dirs_removed: Vec<PathBuf>,
    /// Files present live but not in the baseline
    pub files_added: Vec<PathBuf>,
    /// Files in the baseline but not present live
    pub files_removed: Vec<PathBuf>,
    /// Files in both whose content differs
    pub files_modified: Vec<PathBuf>,
}

impl ChangeSet {
    /// Check if there are any changes
    pub fn changed(&self) -> bool {
        self.total() > 0
    }

    /// Number of changed paths across all lists
    pub fn total(&self) -> usize {
        self.dirs_added.len()
            + self.dirs_removed.len()
            + self.files_added.len()
            + self.files_removed.len()
            + self.files_modified.len()
    }
}

/// One row of the snapshot log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Snapshot id
    pub id: String,
    /// Creation time
    pub time: DateTime<Utc>,
    /// Free-text tag
    pub tag: String,
    /// Whether this is the current snapshot
    pub is_current: bool,
}

/// Result of a checkout
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckoutResult {
    /// Snapshot that is now current
    pub snapshot_id: String,
    /// Directories removed recursively
    pub dirs_removed: usize,
    /// Directories created
    pub dirs_created: usize,
    /// Files removed
    pub files_deleted: usize,
    /// Files copied back from the store
    pub files_restored: usize,
    /// Bytes copied back from the store
    pub bytes_written: u64,
    /// Time taken in milliseconds
    pub duration_ms: u64,
}

/// Result of a lock
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LockResult {
    /// Blobs reclaimed from the store
    pub blobs_removed: usize,
    /// Paths whose permissions were restricted
    pub paths_restricted: usize,
}

/// Result of an unlock
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnlockResult {
    /// Blobs recreated from the live tree
    pub blobs_restored: usize,
    /// Paths granted full access
    pub paths_granted: usize,
}
