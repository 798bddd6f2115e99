use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::branch::BranchId;
use crate::errors::StoreError;
use crate::store::{CreateOutcome, DescriptorPaths, DescriptorStore};

type Files = BTreeMap<String, Vec<u8>>;

#[derive(Debug, Default)]
struct Inner {
    dirs: BTreeMap<BranchId, Files>,
    published: BTreeMap<BranchId, Files>,
    fail_publishes: usize,
    publish_attempts: usize,
    refreshes: usize,
}

/// In-memory Descriptor Store with the same create-once semantics as [`FsStore`](super::FsStore).
///
/// "Published" state is tracked separately so tests can tell a local-only descriptor
/// from one that reached the shared store.
#[derive(Debug)]
pub struct MemoryStore {
    root: PathBuf,
    inner: Mutex<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            root: PathBuf::from("/memory"),
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make the next `n` publish calls fail.
    pub fn fail_next_publishes(&self, n: usize) {
        self.lock().fail_publishes = n;
    }

    pub fn publish_attempts(&self) -> usize {
        self.lock().publish_attempts
    }

    pub fn refreshes(&self) -> usize {
        self.lock().refreshes
    }

    pub fn is_published(&self, id: &BranchId) -> bool {
        self.lock().published.contains_key(id)
    }

    /// Raw file bytes, creating the descriptor directory if needed.
    pub fn put_raw(&self, id: &BranchId, name: &str, bytes: impl Into<Vec<u8>>) {
        self.lock()
            .dirs
            .entry(id.clone())
            .or_default()
            .insert(name.to_string(), bytes.into());
    }

    pub fn remove_file(&self, id: &BranchId, name: &str) {
        if let Some(files) = self.lock().dirs.get_mut(id) {
            files.remove(name);
        }
    }

    /// Full copy of the local tree, for byte-level comparisons.
    pub fn snapshot(&self) -> BTreeMap<String, BTreeMap<String, Vec<u8>>> {
        self.lock()
            .dirs
            .iter()
            .map(|(id, files)| (id.to_string(), files.clone()))
            .collect()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl DescriptorStore for MemoryStore {
    fn location(&self) -> String {
        "memory".to_string()
    }

    fn refresh(&self) -> Result<(), StoreError> {
        self.lock().refreshes += 1;
        Ok(())
    }

    fn exists(&self, id: &BranchId) -> Result<bool, StoreError> {
        Ok(self.lock().dirs.contains_key(id))
    }

    fn create_if_absent(&self, id: &BranchId) -> Result<CreateOutcome, StoreError> {
        let mut inner = self.lock();
        if inner.dirs.contains_key(id) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        inner.dirs.insert(id.clone(), Files::new());
        Ok(CreateOutcome::Created)
    }

    fn write_file(&self, id: &BranchId, name: &str, contents: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let files = inner.dirs.get_mut(id).ok_or_else(|| {
            StoreError::io(
                self.root.join(id.as_str()),
                std::io::Error::new(std::io::ErrorKind::NotFound, "descriptor directory missing"),
            )
        })?;
        files.insert(name.to_string(), contents.as_bytes().to_vec());
        Ok(())
    }

    fn read_file(&self, id: &BranchId, name: &str) -> Result<Option<String>, StoreError> {
        let inner = self.lock();
        let Some(bytes) = inner.dirs.get(id).and_then(|f| f.get(name)) else {
            return Ok(None);
        };
        String::from_utf8(bytes.clone())
            .map(Some)
            .map_err(|e| StoreError::Unreadable {
                path: self.root.join(id.as_str()).join(name),
                reason: e.to_string(),
            })
    }

    fn list(&self) -> Result<Vec<BranchId>, StoreError> {
        Ok(self.lock().dirs.keys().cloned().collect())
    }

    fn paths(&self, id: &BranchId) -> DescriptorPaths {
        DescriptorPaths::under(&self.root, id)
    }

    fn publish(&self, id: &BranchId, _message: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.publish_attempts += 1;
        if inner.fail_publishes > 0 {
            inner.fail_publishes -= 1;
            return Err(StoreError::Sync {
                step: "push",
                detail: "rejected (injected failure)".to_string(),
            });
        }
        let files = inner.dirs.get(id).cloned().unwrap_or_default();
        inner.published.insert(id.clone(), files);
        Ok(())
    }

    fn discard(&self, id: &BranchId) -> Result<(), StoreError> {
        self.lock().dirs.remove(id);
        Ok(())
    }
}
