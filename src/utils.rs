//! Utility functions for bak
//!
//! ## Categories of Utilities
//!
//! ### File Operations
//! - Streaming content hashing (SHA-512)
//! - Streaming byte-for-byte comparison
//! - Atomic file writing and JSON documents
//!
//! ### Identifiers
//! - Random alphanumeric ids with a bounded uniqueness check
//!
//! ### Path and Display Helpers
//! - Converting absolute paths to relative paths
//! - Byte formatting (human-readable sizes)
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use crate::utils::{hash_file_content, files_equal};
//! use std::path::Path;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let digest = hash_file_content(Path::new("example.txt"), 8192)?;
//! assert_eq!(digest.len(), 128); // SHA-512 is 128 hex characters
//!
//! let same = files_equal(Path::new("a.txt"), Path::new("b.txt"), 8192)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! All fallible functions return `Result<T, BakError>`.

use crate::error::{BakError, Result};
use rand::distr::Alphanumeric;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha512};
use std::fs::{self, File};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use tracing::trace;

/// Smallest buffer used for streaming reads
const MIN_CHUNK_SIZE: usize = 512;

/// Hash a file's content using SHA-512
///
/// The file is read in `chunk_size` pieces so memory stays bounded
/// regardless of file size.
///
/// # Returns
///
/// The digest as a 128-character lowercase hexadecimal string.
///
/// # Errors
///
/// - [`BakError::Io`] if the file cannot be opened or read
pub fn hash_file_content(path: &Path, chunk_size: usize) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha512::new();
    let mut buffer = vec![0u8; chunk_size.max(MIN_CHUNK_SIZE)];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Hash arbitrary data using SHA-512
#[cfg(test)]
pub fn hash_data(data: &[u8]) -> String {
    let mut hasher = Sha512::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Compare two files byte for byte
///
/// Sizes are checked first; contents are then streamed in lockstep and the
/// comparison stops at the first differing chunk.
pub fn files_equal(a: &Path, b: &Path, chunk_size: usize) -> Result<bool> {
    if fs::metadata(a)?.len() != fs::metadata(b)?.len() {
        return Ok(false);
    }

    let chunk_size = chunk_size.max(MIN_CHUNK_SIZE);
    let mut left = BufReader::new(File::open(a)?);
    let mut right = BufReader::new(File::open(b)?);
    let mut left_buf = vec![0u8; chunk_size];
    let mut right_buf = vec![0u8; chunk_size];

    loop {
        let left_len = fill_buffer(&mut left, &mut left_buf)?;
        let right_len = fill_buffer(&mut right, &mut right_buf)?;
        if left_len != right_len || left_buf[..left_len] != right_buf[..right_len] {
            trace!("Content differs between {:?} and {:?}", a, b);
            return Ok(false);
        }
        if left_len == 0 {
            return Ok(true);
        }
    }
}

/// Read until `buf` is full or the reader is exhausted
fn fill_buffer<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Atomic file write (temp file in the same directory, then rename)
///
/// The target is either left untouched or fully replaced; a partially
/// written document is never visible. The temp file is removed on failure.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| BakError::Io(e.error))?;

    trace!("Atomically wrote {} bytes to {:?}", content.len(), path);
    Ok(())
}

/// Serialize `value` as pretty JSON and write it atomically
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    atomic_write(path, &json)
}

/// Read and deserialize a JSON document
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Random alphanumeric string of length `len`
pub fn random_id(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Generate an id that `is_taken` rejects for none of `max_attempts` rounds
///
/// # Errors
///
/// - [`BakError::IdSpaceExhausted`] if every attempt collided
pub fn generate_unique_id<F>(len: usize, max_attempts: usize, mut is_taken: F) -> Result<String>
where
    F: FnMut(&str) -> bool,
{
    for attempt in 0..max_attempts {
        let id = random_id(len);
        if !is_taken(&id) {
            return Ok(id);
        }
        trace!("Id collision on attempt {}", attempt + 1);
    }
    Err(BakError::IdSpaceExhausted {
        len,
        attempts: max_attempts,
    })
}

/// Make `path` relative to `base`
pub fn make_relative(path: &Path, base: &Path) -> Result<PathBuf> {
    path.strip_prefix(base)
        .map(|p| p.to_path_buf())
        .map_err(|_| BakError::internal(format!("Path {:?} is not inside {:?}", path, base)))
}

/// Format bytes in human-readable form
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}
