//! Content-addressed blob storage for bak
//!
//! Every distinct file content is stored once under an opaque random
//! [content id](crate::types::FileRecord::id). A SHA-512 digest narrows the
//! search for an existing copy, but a digest match alone is never trusted:
//! each candidate blob is compared byte for byte before it is reused.
//!
//! ## Layout
//!
//! ```text
//! .bak/
//! ├── files/
//! │   └── <content-id>     # raw bytes, no compression
//! └── store_info.json      # {"file_ids": [...], "hashes": {digest: [ids]}}
//! ```
//!
//! The registries in `store_info.json` outlive the blobs they name: lock
//! deletes blobs that the live tree duplicates and unlock recreates them under
//! the same ids, so a registered id does not imply a present blob.

use crate::error::{BakError, Result};
use crate::types::{BakConfig, RepoPaths};
use crate::utils::{files_equal, generate_unique_id, hash_file_content, read_json, write_json};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace, warn};

/// Persisted registries of the store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreInfo {
    /// Every content id ever issued
    pub file_ids: BTreeSet<String>,
    /// SHA-512 hex digest to the ids whose content produced it
    pub hashes: BTreeMap<String, Vec<String>>,
}

/// Content-addressed store rooted at `.bak/files`
pub struct ContentStore {
    /// Blob directory
    files_dir: PathBuf,
    /// Registry document
    info_path: PathBuf,
    /// In-memory registries
    info: StoreInfo,
    /// Id length, chunk size and attempt bound
    config: BakConfig,
}

impl std::fmt::Debug for ContentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentStore")
            .field("files_dir", &self.files_dir)
            .field("file_ids", &self.info.file_ids.len())
            .field("hash_buckets", &self.info.hashes.len())
            .finish()
    }
}

impl ContentStore {
    /// Create an empty store and persist its registries
    ///
    /// # Errors
    ///
    /// - [`BakError::Io`] if the blob directory or registry cannot be written
    pub fn init(paths: &RepoPaths, config: &BakConfig) -> Result<Self> {
        fs::create_dir_all(&paths.files_dir)?;
        let store = Self {
            files_dir: paths.files_dir.clone(),
            info_path: paths.store_info_file.clone(),
            info: StoreInfo::default(),
            config: config.clone(),
        };
        store.persist()?;

        info!("Initialized content store at {:?}", store.files_dir);
        Ok(store)
    }

    /// Open an existing store
    ///
    /// # Errors
    ///
    /// - [`BakError::Io`] if `store_info.json` cannot be read
    /// - [`BakError::Json`] if it cannot be parsed
    pub fn open(paths: &RepoPaths, config: &BakConfig) -> Result<Self> {
        let info: StoreInfo = read_json(&paths.store_info_file)?;
        debug!(
            "Opened content store with {} ids in {} hash buckets",
            info.file_ids.len(),
            info.hashes.len()
        );

        Ok(Self {
            files_dir: paths.files_dir.clone(),
            info_path: paths.store_info_file.clone(),
            info,
            config: config.clone(),
        })
    }

    /// Store the content of `path`, reusing an existing blob when one matches
    ///
    /// The file is hashed, each id in the matching bucket is compared byte for
    /// byte against its blob, and the first exact match is returned. Otherwise
    /// a fresh id is issued, the bytes are copied into the store and both
    /// registries are updated. Registries are only written by [`persist`].
    ///
    /// [`persist`]: ContentStore::persist
    ///
    /// # Errors
    ///
    /// - [`BakError::Io`] on any read or copy failure
    /// - [`BakError::IdSpaceExhausted`] if no unused id could be generated
    pub fn add(&mut self, path: &Path) -> Result<String> {
        let digest = hash_file_content(path, self.config.chunk_size)?;

        if let Some(candidates) = self.info.hashes.get(&digest) {
            for id in candidates {
                let blob = self.get(id);
                if !blob.exists() {
                    warn!("Blob {} is registered but missing; cannot reuse it", id);
                    continue;
                }
                if files_equal(path, &blob, self.config.chunk_size)? {
                    trace!("Reusing blob {} for {:?}", id, path);
                    return Ok(id.clone());
                }
                debug!("Digest collision between {:?} and blob {}", path, id);
            }
        }

        let file_ids = &self.info.file_ids;
        let id = generate_unique_id(
            self.config.content_id_len,
            self.config.max_id_attempts,
            |candidate| file_ids.contains(candidate),
        )?;

        fs::copy(path, self.get(&id))?;
        self.info.file_ids.insert(id.clone());
        self.info.hashes.entry(digest).or_default().push(id.clone());

        debug!("Stored {:?} as new blob {}", path, id);
        Ok(id)
    }

    /// Location of the blob named `id`
    pub fn get(&self, id: &str) -> PathBuf {
        self.files_dir.join(id)
    }

    /// Whether the blob named `id` is physically present
    pub fn contains_blob(&self, id: &str) -> bool {
        self.get(id).is_file()
    }

    /// Whether `id` has ever been issued
    pub fn is_registered(&self, id: &str) -> bool {
        self.info.file_ids.contains(id)
    }

    /// Delete a blob, leaving the registries untouched
    ///
    /// Returns whether a blob was actually removed.
    pub fn remove(&self, id: &str) -> Result<bool> {
        let blob = self.get(id);
        if !blob.exists() {
            return Ok(false);
        }
        fs::remove_file(&blob)?;
        trace!("Removed blob {}", id);
        Ok(true)
    }

    /// Recreate a pruned blob from a live file
    ///
    /// Returns the number of bytes copied.
    pub fn restore(&self, id: &str, from_path: &Path) -> Result<u64> {
        let bytes = fs::copy(from_path, self.get(id))?;
        trace!("Restored blob {} from {:?}", id, from_path);
        Ok(bytes)
    }

    /// Copy the blob named `id` to `dest`
    ///
    /// # Errors
    ///
    /// - [`BakError::BlobMissing`] if the blob is not present
    /// - [`BakError::Io`] if the copy fails
    pub fn copy_out(&self, id: &str, dest: &Path) -> Result<u64> {
        let blob = self.get(id);
        if !blob.is_file() {
            return Err(BakError::BlobMissing(id.to_string()));
        }
        Ok(fs::copy(&blob, dest)?)
    }

    /// Write the registries atomically
    pub fn persist(&self) -> Result<()> {
        write_json(&self.info_path, &self.info)?;
        trace!("Persisted store registries to {:?}", self.info_path);
        Ok(())
    }

    /// In-memory registries
    pub fn info(&self) -> &StoreInfo {
        &self.info
    }

    /// Number of blobs physically present
    pub fn blob_count(&self) -> Result<usize> {
        let mut count = 0;
        for entry in fs::read_dir(&self.files_dir)? {
            if entry?.file_type()?.is_file() {
                count += 1;
            }
        }
        Ok(count)
    }
}
