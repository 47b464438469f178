//! Persistent snapshot index
//!
//! `snapshots.json` holds every snapshot in creation order, the set of ids
//! ever issued and the current-snapshot pointer. The index is loaded whole,
//! mutated in memory and written back atomically once the new state is
//! complete.

use crate::error::{BakError, Result};
use crate::snapshot::Snapshot;
use crate::types::{BakConfig, LogEntry};
use crate::utils::{generate_unique_id, read_json, write_json};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, trace};

/// Ordered snapshots plus the current pointer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotIndex {
    /// Snapshots in creation order
    snapshots: Vec<Snapshot>,
    /// Every snapshot id ever issued
    snapshot_ids: BTreeSet<String>,
    /// Id of the current snapshot
    curr_snapshot_id: Option<String>,
}

impl SnapshotIndex {
    /// Empty index with no current snapshot
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and validate the index at `path`
    ///
    /// # Errors
    ///
    /// - [`BakError::Io`] / [`BakError::Json`] if the document cannot be read
    /// - [`BakError::CorruptIndex`] if the document contradicts itself
    pub fn load(path: &Path) -> Result<Self> {
        let index: SnapshotIndex = read_json(path)?;
        index.validate()?;
        debug!(
            "Loaded snapshot index with {} snapshots (current: {:?})",
            index.snapshots.len(),
            index.curr_snapshot_id
        );
        Ok(index)
    }

    /// Write the index atomically to `path`
    pub fn save(&self, path: &Path) -> Result<()> {
        write_json(path, self)?;
        trace!("Persisted snapshot index to {:?}", path);
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        for snapshot in &self.snapshots {
            if !self.snapshot_ids.contains(&snapshot.id) {
                return Err(BakError::corrupt(format!(
                    "snapshot {} is not a registered id",
                    snapshot.id
                )));
            }
            snapshot.validate()?;
        }

        match &self.curr_snapshot_id {
            Some(id) if self.get(id).is_none() => Err(BakError::corrupt(format!(
                "current snapshot {} does not exist",
                id
            ))),
            None if !self.snapshots.is_empty() => {
                Err(BakError::corrupt("snapshots exist but none is current"))
            }
            _ => Ok(()),
        }
    }

    /// Append a snapshot and make it current
    ///
    /// # Errors
    ///
    /// - [`BakError::Internal`] if the snapshot's id was already issued
    pub fn push(&mut self, snapshot: Snapshot) -> Result<()> {
        if !self.snapshot_ids.insert(snapshot.id.clone()) {
            return Err(BakError::internal(format!(
                "snapshot id {} was already issued",
                snapshot.id
            )));
        }
        self.curr_snapshot_id = Some(snapshot.id.clone());
        self.snapshots.push(snapshot);
        Ok(())
    }

    /// Move the current pointer to an existing snapshot
    ///
    /// # Errors
    ///
    /// - [`BakError::InvalidSnapshotId`] if no snapshot has that id
    pub fn set_current(&mut self, id: &str) -> Result<()> {
        if self.get(id).is_none() {
            return Err(BakError::InvalidSnapshotId(id.to_string()));
        }
        self.curr_snapshot_id = Some(id.to_string());
        Ok(())
    }

    /// Generate an id that has never been issued
    pub fn new_snapshot_id(&self, config: &BakConfig) -> Result<String> {
        generate_unique_id(config.snapshot_id_len, config.max_id_attempts, |candidate| {
            self.snapshot_ids.contains(candidate)
        })
    }

    /// Snapshot with the given id
    pub fn get(&self, id: &str) -> Option<&Snapshot> {
        self.snapshots.iter().find(|s| s.id == id)
    }

    /// The current snapshot, if any exists
    pub fn current(&self) -> Option<&Snapshot> {
        self.curr_snapshot_id.as_deref().and_then(|id| self.get(id))
    }

    /// Id of the current snapshot
    pub fn current_id(&self) -> Option<&str> {
        self.curr_snapshot_id.as_deref()
    }

    /// All snapshots in creation order
    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    /// Every id ever issued
    pub fn snapshot_ids(&self) -> &BTreeSet<String> {
        &self.snapshot_ids
    }

    /// Log rows in creation order
    pub fn log_entries(&self) -> Vec<LogEntry> {
        self.snapshots
            .iter()
            .map(|s| LogEntry {
                id: s.id.clone(),
                time: s.time,
                tag: s.tag.clone(),
                is_current: self.curr_snapshot_id.as_deref() == Some(s.id.as_str()),
            })
            .collect()
    }

    /// Number of snapshots
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// Whether no snapshot exists yet
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}
