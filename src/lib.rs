//! # bak - Content-addressed snapshot backups
//!
//! Records versioned states of a working directory inside a `.bak` metadata
//! directory at its root, stores every distinct file content once, reports
//! drift against the last recorded state and restores prior states.
//!
//! ## Overview
//!
//! - **Snapshots** record the directory and file lists of the tree, plus a
//!   content id and a metadata fingerprint for each file
//! - **Deduplication** stores byte-identical content at most once; SHA-512
//!   digests narrow the search and a full byte comparison decides
//! - **Change detection** trusts an unchanged fingerprint and falls back to a
//!   size check, then a streaming byte comparison
//! - **Checkout** rewrites the live tree to match any snapshot, asking before
//!   discarding pending changes
//! - **Lock** prunes store copies of live content and makes the tree
//!   read-only at the OS level; unlock reverses both
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bak::Repository;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut repo = Repository::init("./my_project", None, false)?;
//! let first = repo.current_snapshot().map(|s| s.id.clone()).unwrap_or_default();
//!
//! // Make some changes to your files...
//! let second = repo.snapshot(Some("Added new feature".to_string()))?;
//! println!("Created snapshot {}", second.id);
//!
//! // Go back, confirming any pending changes may be lost
//! let result = repo.checkout(&first, |_pending| true)?;
//! println!("Restored {} files", result.files_restored);
//!
//! repo.lock()?;
//! for entry in repo.log() {
//!     println!("{} {} {}", entry.id, entry.time, entry.tag);
//! }
//! repo.unlock()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Custom Configuration
//!
//! ```rust,no_run
//! use bak::{RecordingEnforcer, RepositoryBuilder};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let repo = RepositoryBuilder::new()
//!     .snapshot_id_len(10)
//!     .chunk_size(64 * 1024)
//!     .permission_enforcer(Arc::new(RecordingEnforcer::new()))
//!     .init("./project", Some("Start".to_string()), false)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! All operations return `Result<T, BakError>`. [`BakError::category`] splits
//! errors into user, state and I/O failures; the first two are "soft" refusals
//! that leave the repository untouched.
//!
//! ## Module Organization
//!
//! - [`repository`]: the snapshot engine and its builder
//! - [`lock`]: lock and unlock
//! - [`permissions`]: OS-level access control behind a trait
//! - [`storage`]: content-addressed blob store
//! - [`diff`]: change detection
//! - [`file_tracking`]: tree enumeration
//! - [`snapshot`] / [`index`]: snapshot records and the persisted index
//! - [`types`]: repository context, configuration and result types
//! - [`error`]: error types and handling

pub mod diff;
pub mod error;
pub mod file_tracking;
pub mod index;
pub mod lock;
pub mod permissions;
pub mod repository;
pub mod snapshot;
pub mod storage;
pub mod types;

mod utils;

pub use diff::ChangeDetector;
pub use error::{BakError, ErrorCategory, Result};
pub use file_tracking::{FileEnumerator, WalkMode};
pub use index::SnapshotIndex;
pub use lock::LockManager;
#[cfg(windows)]
pub use permissions::ReadOnlyAttributeEnforcer;
#[cfg(unix)]
pub use permissions::UnixModeEnforcer;
pub use permissions::{
    platform_enforcer, NoopEnforcer, PermissionCall, PermissionEnforcer, RecordingEnforcer,
};
pub use repository::{Repository, RepositoryBuilder};
pub use snapshot::Snapshot;
pub use storage::{ContentStore, StoreInfo};
pub use types::*;
pub use utils::format_bytes;
