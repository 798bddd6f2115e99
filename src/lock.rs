use fs2::FileExt;
use std::env;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Host-wide lock scoped to one store directory.
///
/// These locks only coordinate processes on the same machine. Nodes with separate
/// clones of the store coordinate through git push rejection instead.
#[derive(Debug)]
pub struct StoreLock {
    file: File,
    path: PathBuf,
}

impl StoreLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        // The file stays: unlinking it would let a waiter and a newcomer lock different inodes.
        let _ = self.file.unlock();
    }
}

/// What a lock serializes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockPurpose {
    /// git pull/add/commit/push in the store worktree.
    Publish,
    /// One reconciliation pass at a time.
    Reconcile,
}

impl LockPurpose {
    fn as_str(&self) -> &'static str {
        match self {
            LockPurpose::Publish => "publish",
            LockPurpose::Reconcile => "reconcile",
        }
    }
}

fn open_lock_file(p: &Path) -> io::Result<File> {
    if let Some(parent) = p.parent() {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(true)
        .open(p)
}

/// Block until the lock at `p` is ours.
pub fn acquire_lock_at(p: &Path) -> io::Result<StoreLock> {
    let f = open_lock_file(p)?;
    f.lock_exclusive()?;
    tracing::debug!(path = %p.display(), "lock acquired");
    Ok(StoreLock {
        file: f,
        path: p.to_path_buf(),
    })
}

/// Non-blocking variant: `Ok(None)` when another process holds the lock.
pub fn try_acquire_lock_at(p: &Path) -> io::Result<Option<StoreLock>> {
    let f = open_lock_file(p)?;
    match f.try_lock_exclusive() {
        Ok(()) => Ok(Some(StoreLock {
            file: f,
            path: p.to_path_buf(),
        })),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
        Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Lock file location for `store_root`:
/// `<XDG_RUNTIME_DIR or tmp>/branchenv.<hash(store_root)>.<purpose>.lock`.
///
/// Kept outside the store so it never shows up in the git worktree.
pub fn lock_path_for(store_root: &Path, purpose: LockPurpose) -> PathBuf {
    let rt_base = env::var("XDG_RUNTIME_DIR")
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir);
    let key = normalized_store_key_for_hash(store_root);
    let hash = hash_store_key_hex(&key);
    rt_base.join(format!("branchenv.{}.{}.lock", hash, purpose.as_str()))
}

/// Normalize a store path string for hashing to a stable key.
pub fn normalized_store_key_for_hash(p: &Path) -> String {
    let abs = fs::canonicalize(p).unwrap_or_else(|_| p.to_path_buf());
    abs.to_string_lossy().to_string()
}

/// Simple stable 64-bit FNV-1a hash for strings; returns 16-hex lowercase id.
pub fn hash_store_key_hex(s: &str) -> String {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 1099511628211;
    let mut h: u64 = FNV_OFFSET;
    for b in s.as_bytes() {
        h ^= *b as u64;
        h = h.wrapping_mul(FNV_PRIME);
    }
    format!("{:016x}", h)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_path_is_stable_and_purpose_scoped() {
        let td = tempfile::tempdir().expect("tmpdir");
        let a = lock_path_for(td.path(), LockPurpose::Publish);
        let b = lock_path_for(td.path(), LockPurpose::Publish);
        let c = lock_path_for(td.path(), LockPurpose::Reconcile);
        assert_eq!(a, b);
        assert_ne!(a, c);
        let name = a.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("branchenv.") && name.ends_with(".publish.lock"), "{name}");
    }

    #[test]
    fn test_hash_known_vector() {
        // FNV-1a of the empty string is the offset basis.
        assert_eq!(hash_store_key_hex(""), "cbf29ce484222325");
    }

    #[test]
    fn test_try_acquire_reports_contention() {
        let td = tempfile::tempdir().expect("tmpdir");
        let p = td.path().join("x.lock");
        let held = try_acquire_lock_at(&p).expect("io").expect("first acquire");
        assert_eq!(held.path(), p.as_path());
        // fs2 locks are per open file description, so a second open contends even in-process.
        let second = try_acquire_lock_at(&p).expect("io");
        assert!(second.is_none(), "second acquire should report contention");
        drop(held);
        let again = try_acquire_lock_at(&p).expect("io");
        assert!(again.is_some(), "lock should be free after release");
    }
}
