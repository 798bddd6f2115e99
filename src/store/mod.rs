//! Descriptor Store: one directory per Branch Identifier holding the status marker,
//! the composition manifest and the environment file.
//!
//! The store is injected into the Initializer and Reconciler as a [`DescriptorStore`];
//! [`FsStore`] is the real directory tree (optionally published through git),
//! [`MemoryStore`] is an in-process fake with the same create-once semantics.

pub mod fs;
pub mod git;
pub mod memory;

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::branch::BranchId;
use crate::errors::StoreError;

pub use fs::FsStore;
pub use git::GitSync;
pub use memory::MemoryStore;

pub const MANIFEST_FILE: &str = "docker-compose.yml";
pub const ENV_FILE: &str = ".env";
pub const STATUS_FILE: &str = "status";

/// Files every descriptor directory must hold.
pub const DESCRIPTOR_FILES: [&str; 3] = [MANIFEST_FILE, ENV_FILE, STATUS_FILE];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusMarker {
    Active,
    Inactive,
    /// No descriptor directory.
    Absent,
}

impl StatusMarker {
    /// Parse status file contents. Only the trimmed literals `active` and `inactive`
    /// are recognized; anything else is `None` and must not be guessed at.
    pub fn parse(contents: &str) -> Option<Self> {
        match contents.trim() {
            "active" => Some(StatusMarker::Active),
            "inactive" => Some(StatusMarker::Inactive),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatusMarker::Active => "active",
            StatusMarker::Inactive => "inactive",
            StatusMarker::Absent => "absent",
        }
    }
}

impl fmt::Display for StatusMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// Someone else created the directory first.
    AlreadyExists,
}

/// Locations handed to the Composition Effector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorPaths {
    pub dir: PathBuf,
    pub manifest: PathBuf,
    pub env_file: PathBuf,
    pub status: PathBuf,
}

impl DescriptorPaths {
    pub fn under(root: &std::path::Path, id: &BranchId) -> Self {
        let dir = root.join(id.as_str());
        Self {
            manifest: dir.join(MANIFEST_FILE),
            env_file: dir.join(ENV_FILE),
            status: dir.join(STATUS_FILE),
            dir,
        }
    }
}

pub trait DescriptorStore: Send + Sync {
    /// Human-readable location for diagnostics.
    fn location(&self) -> String;

    /// Pull the shared state before deciding anything (no-op when unsynchronized).
    fn refresh(&self) -> Result<(), StoreError>;

    fn exists(&self, id: &BranchId) -> Result<bool, StoreError>;

    /// Atomically create the descriptor directory if absent.
    fn create_if_absent(&self, id: &BranchId) -> Result<CreateOutcome, StoreError>;

    fn write_file(&self, id: &BranchId, name: &str, contents: &str) -> Result<(), StoreError>;

    /// `Ok(None)` when the file does not exist.
    fn read_file(&self, id: &BranchId, name: &str) -> Result<Option<String>, StoreError>;

    /// All descriptor identifiers, sorted.
    fn list(&self) -> Result<Vec<BranchId>, StoreError>;

    fn paths(&self, id: &BranchId) -> DescriptorPaths;

    /// Durably publish a freshly written descriptor. On error the implementation has
    /// already undone any partial publish steps of its own.
    fn publish(&self, id: &BranchId, message: &str) -> Result<(), StoreError>;

    /// Remove a descriptor that never got published. Missing directories are fine.
    fn discard(&self, id: &BranchId) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_marker_parse_trims() {
        assert_eq!(StatusMarker::parse("active\n"), Some(StatusMarker::Active));
        assert_eq!(StatusMarker::parse("  inactive \r\n"), Some(StatusMarker::Inactive));
    }

    #[test]
    fn test_status_marker_parse_rejects_other_tokens() {
        assert_eq!(StatusMarker::parse("Active"), None);
        assert_eq!(StatusMarker::parse("running"), None);
        assert_eq!(StatusMarker::parse(""), None);
        assert_eq!(StatusMarker::parse("absent"), None);
    }

    #[test]
    fn test_descriptor_paths_layout() {
        let id = BranchId::from_raw("feature/42-pay").unwrap();
        let p = DescriptorPaths::under(std::path::Path::new("/srv/envs"), &id);
        assert_eq!(p.dir, PathBuf::from("/srv/envs/feature42pay"));
        assert_eq!(p.manifest, PathBuf::from("/srv/envs/feature42pay/docker-compose.yml"));
        assert_eq!(p.env_file, PathBuf::from("/srv/envs/feature42pay/.env"));
        assert_eq!(p.status, PathBuf::from("/srv/envs/feature42pay/status"));
    }
}
