//! Integration tests for bak
//!
//! Multi-step scenarios: navigating between many snapshots, deduplication
//! across a generated project, and the lock cycle against real permissions.

use ::bak::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::info;

/// Test harness owning a scratch tree and the repository rooted at it
pub struct BakTestHarness {
    pub temp_dir: TempDir,
    pub repo: Repository,
    pub file_generator: FileGenerator,
    stamp: i64,
}

impl BakTestHarness {
    /// Create a harness over an empty tree with permission changes disabled
    pub fn new() -> anyhow::Result<Self> {
        Self::with_builder(RepositoryBuilder::new())
    }

    pub fn with_builder(builder: RepositoryBuilder) -> anyhow::Result<Self> {
        let temp_dir = TempDir::new()?;
        let repo = builder
            .permission_enforcer(Arc::new(NoopEnforcer))
            .init(temp_dir.path(), None, false)?;
        Ok(Self {
            temp_dir,
            repo,
            file_generator: FileGenerator::new(42),
            stamp: 0,
        })
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Generate a nested project of `dirs` directories with `files_per_dir` files each
    pub fn generate_project(&mut self, dirs: usize, files_per_dir: usize) -> anyhow::Result<()> {
        let root = self.temp_dir.path().to_path_buf();
        for d in 0..dirs {
            let dir = if d % 3 == 2 {
                root.join(format!("dir_{}", d - 1)).join(format!("nested_{}", d))
            } else {
                root.join(format!("dir_{}", d))
            };
            fs::create_dir_all(&dir)?;
            for f in 0..files_per_dir {
                let content = self.file_generator.generate_content(16, 512);
                fs::write(dir.join(format!("file_{}.txt", f)), content)?;
            }
        }
        Ok(())
    }

    /// Rewrite, delete or create files at random
    pub fn mutate(&mut self, operations: usize) -> anyhow::Result<()> {
        let root = self.temp_dir.path().to_path_buf();
        for i in 0..operations {
            let files = read_tree(&root)?;
            let existing: Vec<&PathBuf> = files.keys().collect();
            match self.file_generator.rng.random_range(0..3) {
                0 if !existing.is_empty() => {
                    let pick = existing[self.file_generator.rng.random_range(0..existing.len())];
                    let content = self.file_generator.generate_content(16, 512);
                    fs::write(root.join(pick), content)?;
                    // A same-size rewrite must not keep its recorded fingerprint
                    self.stamp += 1;
                    let mtime = filetime::FileTime::from_unix_time(1_600_000_000 + self.stamp, 0);
                    filetime::set_file_mtime(root.join(pick), mtime)?;
                }
                1 if !existing.is_empty() => {
                    let pick = existing[self.file_generator.rng.random_range(0..existing.len())];
                    fs::remove_file(root.join(pick))?;
                }
                _ => {
                    let content = self.file_generator.generate_content(16, 512);
                    fs::write(root.join(format!("new_{}_{}.txt", operations, i)), content)?;
                }
            }
        }
        Ok(())
    }
}

/// Seeded random content source
pub struct FileGenerator {
    rng: StdRng,
}

impl FileGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn generate_content(&mut self, min: usize, max: usize) -> Vec<u8> {
        let len = self.rng.random_range(min..=max);
        (0..len).map(|_| self.rng.random_range(b' '..=b'~')).collect()
    }
}

/// Read every tracked file under `root` into memory, keyed by relative path
pub fn read_tree(root: &Path) -> anyhow::Result<BTreeMap<PathBuf, Vec<u8>>> {
    let listing = FileEnumerator::new(root.to_path_buf()).list_tree()?;
    let mut files = BTreeMap::new();
    for rel in listing.files {
        let content = fs::read(root.join(&rel))?;
        files.insert(rel, content);
    }
    Ok(files)
}

#[test]
fn test_snapshot_navigation() -> anyhow::Result<()> {
    let mut harness = BakTestHarness::new()?;
    harness.generate_project(6, 5)?;

    let mut states = Vec::new();
    let first = harness.repo.snapshot(Some("project".to_string()))?;
    states.push((first.id, read_tree(harness.root())?));

    for round in 0..5 {
        harness.mutate(8)?;
        let snapshot = harness.repo.snapshot(Some(format!("round {}", round)))?;
        states.push((snapshot.id, read_tree(harness.root())?));
    }
    info!("Recorded {} states", states.len());

    // Walk backwards then forwards; every checkout must reproduce its state exactly
    let order: Vec<usize> = (0..states.len()).rev().chain(0..states.len()).collect();
    for i in order {
        let (id, expected) = &states[i];
        harness.repo.checkout(id, |_| true)?;
        assert_eq!(&read_tree(harness.root())?, expected, "state of {}", id);
        assert!(!harness.repo.status()?.changed());
        assert_eq!(harness.repo.current_snapshot().map(|s| s.id.as_str()), Some(id.as_str()));
    }
    Ok(())
}

#[test]
fn test_dedup_across_project() -> anyhow::Result<()> {
    let mut harness = BakTestHarness::new()?;
    let root = harness.root().to_path_buf();

    for i in 0..10 {
        fs::create_dir_all(root.join(format!("copy_{}", i)))?;
        fs::write(root.join(format!("copy_{}/LICENSE", i)), "MIT License")?;
        fs::write(root.join(format!("copy_{}/unique.txt", i)), format!("unique {}", i))?;
    }
    harness.repo.snapshot(None)?;

    // One blob for the shared license, one per unique file
    assert_eq!(harness.repo.store().blob_count()?, 11);

    for i in 0..10 {
        fs::write(root.join(format!("copy_{}/unique.txt", i)), "MIT License")?;
    }
    harness.repo.snapshot(None)?;
    assert_eq!(harness.repo.store().blob_count()?, 11);

    let current = harness.repo.current_snapshot().unwrap();
    let ids: std::collections::BTreeSet<&str> = current.content_ids().map(|(_, id)| id).collect();
    assert_eq!(ids.len(), 1);
    Ok(())
}

#[test]
fn test_checkout_restructures_dirs() -> anyhow::Result<()> {
    let mut harness = BakTestHarness::new()?;
    let root = harness.root().to_path_buf();

    fs::create_dir_all(root.join("a/b/c"))?;
    fs::write(root.join("a/b/c/deep.txt"), "deep")?;
    let nested = harness.repo.snapshot(None)?.id;

    fs::remove_dir_all(root.join("a"))?;
    // A file now sits where a directory used to be
    fs::write(root.join("a"), "not a directory")?;
    fs::create_dir_all(root.join("x/y"))?;
    harness.repo.snapshot(None)?;

    let result = harness.repo.checkout(&nested, |_| true)?;
    assert!(root.join("a/b/c").is_dir());
    assert_eq!(fs::read_to_string(root.join("a/b/c/deep.txt"))?, "deep");
    assert!(!root.join("x").exists());
    // Removing `x` takes `x/y` with it
    assert_eq!(result.dirs_removed, 1);
    assert_eq!(result.dirs_created, 3);
    assert_eq!(result.files_deleted, 1);
    Ok(())
}

#[test]
fn test_metadata_only_touch_is_clean() -> anyhow::Result<()> {
    let mut harness = BakTestHarness::new()?;
    let file = harness.root().join("touched.txt");
    fs::write(&file, "same bytes")?;
    harness.repo.snapshot(None)?;

    let later = filetime::FileTime::from_unix_time(2_000_000_000, 0);
    filetime::set_file_mtime(&file, later)?;

    assert!(!harness.repo.status()?.changed());
    assert!(matches!(
        harness.repo.snapshot(None),
        Err(BakError::NothingToSnapshot)
    ));
    Ok(())
}

#[test]
fn test_pending_changes_declined() -> anyhow::Result<()> {
    let mut harness = BakTestHarness::new()?;
    let root = harness.root().to_path_buf();
    let empty = harness.repo.current_snapshot().unwrap().id.clone();

    fs::write(root.join("kept.txt"), "v1")?;
    harness.repo.snapshot(None)?;
    fs::write(root.join("kept.txt"), "v2 pending")?;

    let mut seen = None;
    let result = harness.repo.checkout(&empty, |pending| {
        seen = Some(pending.clone());
        false
    });

    assert!(matches!(result, Err(BakError::CheckoutAborted)));
    assert_eq!(
        seen.map(|c| c.files_modified),
        Some(vec![PathBuf::from("kept.txt")])
    );
    assert_eq!(fs::read_to_string(root.join("kept.txt"))?, "v2 pending");
    Ok(())
}

#[test]
fn test_reopen_preserves_history() -> anyhow::Result<()> {
    let mut harness = BakTestHarness::with_builder(RepositoryBuilder::new().snapshot_id_len(12))?;
    harness.generate_project(3, 3)?;
    harness.repo.snapshot(Some("generated".to_string()))?;
    let log = harness.repo.log();

    let reopened = RepositoryBuilder::new()
        .permission_enforcer(Arc::new(NoopEnforcer))
        .open(harness.root())?;

    assert_eq!(reopened.config().snapshot_id_len, 12);
    let reopened_log = reopened.log();
    assert_eq!(reopened_log.len(), log.len());
    for (a, b) in log.iter().zip(&reopened_log) {
        assert_eq!(a.id, b.id);
        assert_eq!(a.tag, b.tag);
        assert_eq!(a.is_current, b.is_current);
        assert_eq!(a.id.len(), 12);
    }
    assert!(!reopened.status()?.changed());
    Ok(())
}

#[test]
fn test_lock_cycle_with_recording_enforcer() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let root = temp_dir.path();
    fs::create_dir_all(root.join("src"))?;
    fs::write(root.join("src/lib.rs"), "pub fn f() {}")?;

    let recorder = Arc::new(RecordingEnforcer::new());
    let mut repo = RepositoryBuilder::new()
        .permission_enforcer(recorder.clone())
        .init(root, None, false)?;
    recorder.clear();

    let locked = repo.lock()?;
    assert_eq!(locked.blobs_removed, 1);
    assert!(repo.is_locked());
    assert!(recorder
        .calls()
        .iter()
        .all(|c| matches!(c, PermissionCall::Restrict(_))));

    // Everything is refused while locked
    assert!(matches!(repo.snapshot(None), Err(BakError::Locked)));
    assert!(matches!(repo.lock(), Err(BakError::AlreadyLocked)));

    recorder.clear();
    let unlocked = repo.unlock()?;
    assert_eq!(unlocked.blobs_restored, 1);
    assert!(!repo.is_locked());
    assert!(recorder
        .calls()
        .iter()
        .all(|c| matches!(c, PermissionCall::Grant(_))));
    assert!(matches!(repo.unlock(), Err(BakError::AlreadyUnlocked)));
    assert!(!repo.status()?.changed());
    Ok(())
}

#[cfg(unix)]
mod unix_permissions {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn mode(path: &Path) -> u32 {
        fs::metadata(path).unwrap().permissions().mode() & 0o777
    }

    #[test]
    fn test_lock_sets_read_only_modes() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        fs::create_dir_all(root.join("bin"))?;
        fs::write(root.join("notes.txt"), "notes")?;
        fs::write(root.join("bin/run.sh"), "#!/bin/sh\n")?;
        fs::set_permissions(root.join("bin/run.sh"), fs::Permissions::from_mode(0o755))?;
        fs::set_permissions(root.join("bin"), fs::Permissions::from_mode(0o755))?;

        let mut repo = RepositoryBuilder::new()
            .permission_enforcer(Arc::new(UnixModeEnforcer))
            .init(root, None, false)?;
        repo.lock()?;

        assert_eq!(mode(&root.join("notes.txt")) & 0o222, 0);
        assert_eq!(mode(&root.join("bin/run.sh")), 0o555);
        assert_eq!(mode(&root.join("bin")), 0o555);
        assert_eq!(mode(root) & 0o222, 0);
        assert_eq!(repo.store().blob_count()?, 0);

        repo.unlock()?;

        assert_eq!(mode(&root.join("notes.txt")) & 0o600, 0o600);
        assert_eq!(mode(&root.join("bin")) & 0o700, 0o700);
        assert_eq!(mode(root) & 0o700, 0o700);
        assert_eq!(repo.store().blob_count()?, 2);

        fs::write(root.join("notes.txt"), "edited after unlock")?;
        repo.snapshot(None)?;
        Ok(())
    }

    #[test]
    fn test_lock_cycle_keeps_private_modes() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        fs::create_dir(root.join("private"))?;
        fs::write(root.join("private/key.pem"), "secret")?;
        fs::set_permissions(root.join("private/key.pem"), fs::Permissions::from_mode(0o600))?;
        fs::set_permissions(root.join("private"), fs::Permissions::from_mode(0o700))?;

        let mut repo = RepositoryBuilder::new()
            .permission_enforcer(Arc::new(UnixModeEnforcer))
            .init(root, None, false)?;
        repo.lock()?;
        let locked = (mode(&root.join("private/key.pem")), mode(&root.join("private")));
        repo.unlock()?;

        assert_eq!(locked, (0o400, 0o500));
        assert_eq!(mode(&root.join("private/key.pem")), 0o600);
        assert_eq!(mode(&root.join("private")), 0o700);
        Ok(())
    }

    #[test]
    fn test_forced_init_over_locked_repo() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        fs::write(root.join("data.txt"), "data")?;

        let builder = || RepositoryBuilder::new().permission_enforcer(Arc::new(UnixModeEnforcer));
        let mut repo = builder().init(root, None, false)?;
        repo.lock()?;
        drop(repo);

        let repo = builder().init(root, Some("fresh".to_string()), true)?;
        assert!(!repo.is_locked());
        assert_eq!(repo.log().len(), 1);
        assert_eq!(repo.log()[0].tag, "fresh");
        assert_eq!(mode(root) & 0o700, 0o700);
        assert_eq!(mode(&root.join("data.txt")) & 0o600, 0o600);
        Ok(())
    }
}
