use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::branch::BranchId;
use crate::errors::StoreError;
use crate::lock::{acquire_lock_at, lock_path_for, LockPurpose, StoreLock};
use crate::store::{CreateOutcome, DescriptorPaths, DescriptorStore, GitSync};
use crate::util::fs::write_atomic;

/// Directory-tree Descriptor Store, optionally synchronized through git.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
    git: Option<GitSync>,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            git: None,
        }
    }

    pub fn with_git(mut self, git: GitSync) -> Self {
        self.git = Some(git);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn git(&self) -> Option<&GitSync> {
        self.git.as_ref()
    }

    fn publish_lock(&self) -> Result<StoreLock, StoreError> {
        let p = lock_path_for(&self.root, LockPurpose::Publish);
        acquire_lock_at(&p).map_err(|e| StoreError::io(p, e))
    }
}

impl DescriptorStore for FsStore {
    fn location(&self) -> String {
        self.root.display().to_string()
    }

    fn refresh(&self) -> Result<(), StoreError> {
        match &self.git {
            Some(git) => {
                let _lock = self.publish_lock()?;
                git.pull(&self.root)
            }
            None => Ok(()),
        }
    }

    fn exists(&self, id: &BranchId) -> Result<bool, StoreError> {
        let dir = self.root.join(id.as_str());
        match fs::symlink_metadata(&dir) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(dir, e)),
        }
    }

    fn create_if_absent(&self, id: &BranchId) -> Result<CreateOutcome, StoreError> {
        fs::create_dir_all(&self.root).map_err(|e| StoreError::io(&self.root, e))?;
        let dir = self.root.join(id.as_str());
        // create_dir (not create_dir_all) fails when the directory exists: this is the
        // atomic create-once primitive.
        match fs::create_dir(&dir) {
            Ok(()) => Ok(CreateOutcome::Created),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(CreateOutcome::AlreadyExists),
            Err(e) => Err(StoreError::io(dir, e)),
        }
    }

    fn write_file(&self, id: &BranchId, name: &str, contents: &str) -> Result<(), StoreError> {
        let p = self.root.join(id.as_str()).join(name);
        write_atomic(&p, contents.as_bytes()).map_err(|e| StoreError::io(p, e))
    }

    fn read_file(&self, id: &BranchId, name: &str) -> Result<Option<String>, StoreError> {
        let p = self.root.join(id.as_str()).join(name);
        match fs::read(&p) {
            Ok(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| StoreError::Unreadable {
                    path: p,
                    reason: e.to_string(),
                }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(p, e)),
        }
    }

    fn list(&self) -> Result<Vec<BranchId>, StoreError> {
        let rd = match fs::read_dir(&self.root) {
            Ok(rd) => rd,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&self.root, e)),
        };
        let mut ids = Vec::new();
        for entry in rd {
            let entry = entry.map_err(|e| StoreError::io(&self.root, e))?;
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if !is_dir {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            match BranchId::parse_normalized(&name) {
                Some(id) => ids.push(id),
                None => tracing::debug!(dir = %name, "ignoring non-descriptor directory"),
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn paths(&self, id: &BranchId) -> DescriptorPaths {
        DescriptorPaths::under(&self.root, id)
    }

    fn publish(&self, id: &BranchId, message: &str) -> Result<(), StoreError> {
        match &self.git {
            Some(git) => {
                let _lock = self.publish_lock()?;
                git.publish(&self.root, id, message)
            }
            None => {
                tracing::debug!(branch_id = %id, "git sync disabled; descriptor kept local");
                Ok(())
            }
        }
    }

    fn discard(&self, id: &BranchId) -> Result<(), StoreError> {
        if let Some(git) = &self.git {
            let _lock = self.publish_lock()?;
            git.unstage(&self.root, id);
        }
        let dir = self.root.join(id.as_str());
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(dir, e)),
        }
    }
}
