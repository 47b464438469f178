//! Error types for the bak library
//!
//! Errors fall into three categories. User and state errors are "soft": the
//! operation was refused before touching anything and the caller only needs to
//! report it. I/O errors are fatal to the current command.

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the bak library
pub type Result<T> = std::result::Result<T, BakError>;

/// Broad classification of a [`BakError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The request itself cannot be honored (unknown id, nothing to do, ...)
    User,
    /// The repository is in a state that forbids the operation
    State,
    /// Filesystem or persistence failure
    Io,
}

/// Main error type for all bak operations
#[derive(Debug, Error)]
pub enum BakError {
    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Walk directory error from walkdir crate
    #[error("Walk directory error: {0}")]
    WalkDir(#[from] walkdir::Error),

    /// A repository already exists at the root
    #[error("Backup already exists at {0:?}")]
    AlreadyExists(PathBuf),

    /// No repository exists at the root
    #[error("No backup found at {0:?}")]
    NotInitialized(PathBuf),

    /// Snapshot id is not in the index
    #[error("Invalid snapshot ID: {0}")]
    InvalidSnapshotId(String),

    /// Live tree matches the current snapshot
    #[error("No changes to snapshot")]
    NothingToSnapshot,

    /// Checkout refused at the confirmation prompt
    #[error("Checkout aborted; pending changes were kept")]
    CheckoutAborted,

    /// Mutating operation attempted while the repository is locked
    #[error("Operation not permitted. Backup is locked")]
    Locked,

    /// Lock requested on a locked repository
    #[error("Backup is already locked")]
    AlreadyLocked,

    /// Unlock requested on an unlocked repository
    #[error("Backup is already unlocked")]
    AlreadyUnlocked,

    /// Lock requested while the live tree differs from the current snapshot
    #[error("Cannot lock while there are pending changes")]
    PendingChanges,

    /// A blob that must be read is not present in the store
    #[error("Stored content missing: {0}")]
    BlobMissing(String),

    /// The persisted index contradicts itself
    #[error("Corrupt index: {0}")]
    CorruptIndex(String),

    /// Random id generation gave up
    #[error("Could not generate a unique {len}-character id after {attempts} attempts")]
    IdSpaceExhausted {
        /// Length of the id being generated
        len: usize,
        /// Number of attempts made
        attempts: usize,
    },

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BakError {
    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        BakError::Internal(msg.into())
    }

    /// Create a corrupt-index error with a custom message
    pub fn corrupt(msg: impl Into<String>) -> Self {
        BakError::CorruptIndex(msg.into())
    }

    /// Which part of the taxonomy this error belongs to
    pub fn category(&self) -> ErrorCategory {
        match self {
            BakError::AlreadyExists(_)
            | BakError::InvalidSnapshotId(_)
            | BakError::NothingToSnapshot
            | BakError::CheckoutAborted => ErrorCategory::User,
            BakError::Locked
            | BakError::AlreadyLocked
            | BakError::AlreadyUnlocked
            | BakError::PendingChanges
            | BakError::NotInitialized(_) => ErrorCategory::State,
            _ => ErrorCategory::Io,
        }
    }

    /// Soft errors are reported and the command still succeeds
    pub fn is_soft(&self) -> bool {
        self.category() != ErrorCategory::Io
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            BakError::AlreadyExists(_) => {
                "Cannot initialize backup. Backup already exists. Use --force to replace it.".to_string()
            }
            BakError::NotInitialized(path) => {
                format!("No backup found at {:?}. Run 'bak init' first.", path)
            }
            BakError::InvalidSnapshotId(id) => {
                format!("Invalid snapshot ID '{}'. Use 'bak log' to see available snapshots.", id)
            }
            BakError::NothingToSnapshot => "No changes to snapshot.".to_string(),
            BakError::PendingChanges => {
                "Cannot lock while there are pending changes. Take a snapshot or check one out first.".to_string()
            }
            _ => self.to_string(),
        }
    }
}
