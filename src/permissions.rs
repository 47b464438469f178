//! OS-level access control for locked trees
//!
//! Locking relies on the operating system to refuse writes to the live tree.
//! The engine only ever asks for two things, one path at a time: make this
//! path fully accessible to its owner, or make it read/execute only. How that
//! maps onto the platform is up to the [`PermissionEnforcer`] in use.
//!
//! | Implementation              | Platform  | Restrict                        | Grant                     |
//! |-----------------------------|-----------|---------------------------------|---------------------------|
//! | [`UnixModeEnforcer`]        | unix      | clear write bits, owner `r` (`rx` dirs) | owner `rw` (`rwx` dirs) |
//! | `ReadOnlyAttributeEnforcer` | windows   | set read-only attribute         | clear read-only attribute |
//! | [`NoopEnforcer`]            | any       | nothing                         | nothing                   |
//! | [`RecordingEnforcer`]       | any       | records the call                | records the call          |
//!
//! A superuser can still write through any of these; that risk is accepted.

use crate::error::Result;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::trace;

/// Grants and restricts access on a single path
pub trait PermissionEnforcer: Send + Sync + std::fmt::Debug {
    /// Give the owner full read/write access (and traversal on directories)
    fn grant_full_access(&self, path: &Path) -> Result<()>;

    /// Remove every write permission, leaving read and execute
    fn restrict_to_read_execute(&self, path: &Path) -> Result<()>;
}

/// Permission-bit enforcer for unix platforms
#[cfg(unix)]
#[derive(Debug, Clone, Copy, Default)]
pub struct UnixModeEnforcer;

#[cfg(unix)]
impl PermissionEnforcer for UnixModeEnforcer {
    fn grant_full_access(&self, path: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let metadata = std::fs::metadata(path)?;
        let mode = metadata.permissions().mode() & 0o7777;
        let new_mode = if metadata.is_dir() {
            mode | 0o700
        } else {
            mode | 0o600
        };
        if new_mode != mode {
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(new_mode))?;
        }
        trace!("Granted {:o} on {:?}", new_mode, path);
        Ok(())
    }

    fn restrict_to_read_execute(&self, path: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let metadata = std::fs::metadata(path)?;
        let mode = metadata.permissions().mode() & 0o7777;
        // Only write bits go; group and other never gain access they lacked
        let new_mode = if metadata.is_dir() {
            (mode & !0o222) | 0o500
        } else {
            (mode & !0o222) | 0o400
        };
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(new_mode))?;
        trace!("Restricted {:?} to {:o}", path, new_mode);
        Ok(())
    }
}

/// Read-only attribute enforcer for Windows
#[cfg(windows)]
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOnlyAttributeEnforcer;

#[cfg(windows)]
impl PermissionEnforcer for ReadOnlyAttributeEnforcer {
    fn grant_full_access(&self, path: &Path) -> Result<()> {
        let mut permissions = std::fs::metadata(path)?.permissions();
        if permissions.readonly() {
            permissions.set_readonly(false);
            std::fs::set_permissions(path, permissions)?;
        }
        trace!("Cleared read-only on {:?}", path);
        Ok(())
    }

    fn restrict_to_read_execute(&self, path: &Path) -> Result<()> {
        let mut permissions = std::fs::metadata(path)?.permissions();
        permissions.set_readonly(true);
        std::fs::set_permissions(path, permissions)?;
        trace!("Set read-only on {:?}", path);
        Ok(())
    }
}

/// Enforcer that changes nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEnforcer;

impl PermissionEnforcer for NoopEnforcer {
    fn grant_full_access(&self, _path: &Path) -> Result<()> {
        Ok(())
    }

    fn restrict_to_read_execute(&self, _path: &Path) -> Result<()> {
        Ok(())
    }
}

/// One call received by a [`RecordingEnforcer`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionCall {
    /// `grant_full_access(path)`
    Grant(PathBuf),
    /// `restrict_to_read_execute(path)`
    Restrict(PathBuf),
}

/// Enforcer that records calls in order without touching the filesystem
#[derive(Debug, Default)]
pub struct RecordingEnforcer {
    calls: Mutex<Vec<PermissionCall>>,
}

impl RecordingEnforcer {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls received so far
    pub fn calls(&self) -> Vec<PermissionCall> {
        self.calls.lock().clone()
    }

    /// Forget every recorded call
    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}

impl PermissionEnforcer for RecordingEnforcer {
    fn grant_full_access(&self, path: &Path) -> Result<()> {
        self.calls.lock().push(PermissionCall::Grant(path.to_path_buf()));
        Ok(())
    }

    fn restrict_to_read_execute(&self, path: &Path) -> Result<()> {
        self.calls.lock().push(PermissionCall::Restrict(path.to_path_buf()));
        Ok(())
    }
}

/// The native enforcer for this platform
pub fn platform_enforcer() -> Arc<dyn PermissionEnforcer> {
    #[cfg(unix)]
    {
        Arc::new(UnixModeEnforcer)
    }
    #[cfg(windows)]
    {
        Arc::new(ReadOnlyAttributeEnforcer)
    }
    #[cfg(not(any(unix, windows)))]
    {
        Arc::new(NoopEnforcer)
    }
}
