//! Property-based testing for bak
//!
//! Uses proptest to verify snapshot, deduplication and change detection
//! invariants across randomly generated trees and edits.

use ::bak::*;
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// A single edit to the working tree
#[derive(Debug, Clone)]
pub enum FileOperation {
    Write { path: PathBuf, content: Vec<u8> },
    Delete { path: PathBuf },
}

fn file_operation_strategy() -> impl Strategy<Value = FileOperation> {
    prop_oneof![
        3 => (path_strategy(), content_strategy())
            .prop_map(|(path, content)| FileOperation::Write { path, content }),
        1 => path_strategy().prop_map(|path| FileOperation::Delete { path }),
    ]
}

/// Paths from a small namespace so edits collide with earlier files.
/// Directory names never end in `.txt`, so a file can never shadow a directory.
fn path_strategy() -> impl Strategy<Value = PathBuf> {
    let dir_strategy = prop::sample::select(vec!["", "src", "docs", "src/nested"]);
    let filename_strategy = "f[0-5]\\.txt";

    (dir_strategy, filename_strategy).prop_map(|(dir, name)| Path::new(dir).join(name))
}

/// Content drawn from a handful of values so duplicates are common
fn content_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        prop::sample::select(vec!["alpha", "beta", "gamma", ""]).prop_map(|s| s.as_bytes().to_vec()),
        prop::collection::vec(any::<u8>(), 0..2048),
    ]
}

/// Each write gets its own mtime so a same-size rewrite never keeps the
/// fingerprint it had when the snapshot was taken
static NEXT_MTIME: AtomicI64 = AtomicI64::new(1_500_000_000);

fn apply_operation(root: &Path, op: &FileOperation) -> anyhow::Result<()> {
    match op {
        FileOperation::Write { path, content } => {
            let full = root.join(path);
            if let Some(parent) = full.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&full, content)?;
            let mtime = NEXT_MTIME.fetch_add(1, Ordering::Relaxed);
            filetime::set_file_mtime(&full, filetime::FileTime::from_unix_time(mtime, 0))?;
        }
        FileOperation::Delete { path } => {
            let full = root.join(path);
            if full.exists() {
                fs::remove_file(full)?;
            }
        }
    }
    Ok(())
}

fn read_tree(root: &Path) -> anyhow::Result<(Vec<PathBuf>, BTreeMap<PathBuf, Vec<u8>>)> {
    let listing = FileEnumerator::new(root.to_path_buf()).list_tree()?;
    let mut files = BTreeMap::new();
    for rel in &listing.files {
        files.insert(rel.clone(), fs::read(root.join(rel))?);
    }
    Ok((listing.dirs, files))
}

fn new_repo(root: &Path) -> Repository {
    RepositoryBuilder::new()
        .permission_enforcer(Arc::new(NoopEnforcer))
        .init(root, None, false)
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(30))]

    #[test]
    fn prop_checkout_restores_exact_tree(
        before in prop::collection::vec(file_operation_strategy(), 1..15),
        after in prop::collection::vec(file_operation_strategy(), 1..15),
    ) {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        for op in &before {
            apply_operation(root, op).unwrap();
        }
        let mut repo = new_repo(root);
        let recorded = read_tree(root).unwrap();
        let first = repo.current_snapshot().unwrap().id.clone();

        for op in &after {
            apply_operation(root, op).unwrap();
        }
        match repo.snapshot(None) {
            Ok(_) | Err(BakError::NothingToSnapshot) => {}
            Err(e) => panic!("snapshot failed: {}", e),
        }

        repo.checkout(&first, |_| true).unwrap();
        prop_assert_eq!(read_tree(root).unwrap(), recorded);
        prop_assert!(!repo.status().unwrap().changed());
    }

    #[test]
    fn prop_store_holds_each_content_once(
        ops in prop::collection::vec(file_operation_strategy(), 1..25),
    ) {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        for op in &ops {
            apply_operation(root, op).unwrap();
        }
        let repo = new_repo(root);

        let (_, files) = read_tree(root).unwrap();
        let distinct: BTreeSet<&Vec<u8>> = files.values().collect();
        prop_assert_eq!(repo.store().blob_count().unwrap(), distinct.len());

        // Equal bytes share an id, different bytes never do
        let snapshot = repo.current_snapshot().unwrap();
        for (a, content_a) in &files {
            for (b, content_b) in &files {
                let same_id = snapshot.content_id(a) == snapshot.content_id(b);
                prop_assert_eq!(same_id, content_a == content_b);
            }
        }
    }

    #[test]
    fn prop_status_clean_after_snapshot(
        ops in prop::collection::vec(file_operation_strategy(), 1..20),
        edits in prop::collection::vec(file_operation_strategy(), 0..10),
    ) {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        for op in &ops {
            apply_operation(root, op).unwrap();
        }
        let mut repo = new_repo(root);
        prop_assert!(!repo.status().unwrap().changed());

        for op in &edits {
            apply_operation(root, op).unwrap();
        }
        let status = repo.status().unwrap();
        match repo.snapshot(None) {
            Ok(_) => {
                prop_assert!(status.changed());
            }
            Err(BakError::NothingToSnapshot) => {
                prop_assert!(!status.changed());
            }
            Err(e) => panic!("snapshot failed: {}", e),
        }
        prop_assert!(!repo.status().unwrap().changed());
    }

    #[test]
    fn prop_snapshot_ids_unique_and_sized(
        len in 4usize..12,
        rounds in 1usize..8,
    ) {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let mut repo = RepositoryBuilder::new()
            .snapshot_id_len(len)
            .permission_enforcer(Arc::new(NoopEnforcer))
            .init(root, None, false)
            .unwrap();

        for i in 0..rounds {
            fs::write(root.join("counter.txt"), "x".repeat(i + 1)).unwrap();
            repo.snapshot(None).unwrap();
        }

        let ids: Vec<String> = repo.log().into_iter().map(|e| e.id).collect();
        let unique: BTreeSet<&String> = ids.iter().collect();
        prop_assert_eq!(unique.len(), rounds + 1);
        for id in &ids {
            prop_assert_eq!(id.len(), len);
            prop_assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }
}
