//! Advisory per-fingerprint locks
//!
//! Each fingerprint has two lock files under `<cache root>/.locks`:
//!
//! - `<fingerprint>.lock`: provisioning lock, held exclusively around
//!   create-or-reuse-and-evict
//! - `<fingerprint>.use`: usage lock, held shared while a program runs and
//!   taken exclusively to delete the entry
//!
//! Lock files are never deleted. Unlinking a locked file would let a waiter
//! holding the old inode and a newcomer creating a new one both succeed.

use crate::cache::fingerprint::Fingerprint;
use crate::error::{WithEnvError, WithEnvResult};
use fs4::fs_std::FileExt;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Directory under the cache root holding lock files
pub const LOCKS_DIR: &str = ".locks";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockKind {
    Provision,
    Usage,
}

impl LockKind {
    fn extension(self) -> &'static str {
        match self {
            Self::Provision => "lock",
            Self::Usage => "use",
        }
    }
}

/// RAII guard for a held fingerprint lock; released on drop
pub struct EntryLock {
    _file: File,
    path: PathBuf,
    mode: LockMode,
}

impl fmt::Debug for EntryLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryLock")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl EntryLock {
    /// Serialize create-or-reuse-and-evict for a fingerprint
    pub async fn provision(cache_root: &Path, fp: &Fingerprint) -> WithEnvResult<Self> {
        Self::acquire_blocking(
            lock_path(cache_root, fp, LockKind::Provision),
            LockMode::Exclusive,
        )
        .await
    }

    /// Mark an entry as in use; any number of holders may share it
    pub async fn in_use(cache_root: &Path, fp: &Fingerprint) -> WithEnvResult<Self> {
        Self::acquire_blocking(lock_path(cache_root, fp, LockKind::Usage), LockMode::Shared).await
    }

    /// Claim an entry for deletion, waiting for current users to finish
    pub async fn claim(cache_root: &Path, fp: &Fingerprint) -> WithEnvResult<Self> {
        Self::acquire_blocking(
            lock_path(cache_root, fp, LockKind::Usage),
            LockMode::Exclusive,
        )
        .await
    }

    /// Claim an entry for deletion without waiting.
    ///
    /// Returns `Ok(None)` while the entry is in use or being provisioned.
    pub fn try_claim(cache_root: &Path, fp: &Fingerprint) -> WithEnvResult<Option<Self>> {
        let path = lock_path(cache_root, fp, LockKind::Usage);
        let file = open_lock_file(&path)?;

        match FileExt::try_lock_exclusive(&file) {
            Ok(true) => Ok(Some(Self {
                _file: file,
                path,
                mode: LockMode::Exclusive,
            })),
            Ok(false) => {
                debug!("Lock {} is held elsewhere", path.display());
                Ok(None)
            }
            Err(e) => Err(WithEnvError::LockFailed { path, source: e }),
        }
    }

    async fn acquire_blocking(path: PathBuf, mode: LockMode) -> WithEnvResult<Self> {
        tokio::task::spawn_blocking(move || {
            let file = open_lock_file(&path)?;
            debug!("Waiting for {:?} lock on {}", mode, path.display());
            let locked = match mode {
                LockMode::Shared => FileExt::lock_shared(&file),
                LockMode::Exclusive => FileExt::lock_exclusive(&file),
            };
            match locked {
                Ok(()) => Ok(Self {
                    _file: file,
                    path,
                    mode,
                }),
                Err(e) => Err(WithEnvError::LockFailed { path, source: e }),
            }
        })
        .await
        .map_err(|e| WithEnvError::Internal(format!("lock task failed: {}", e)))?
    }
}

fn lock_path(cache_root: &Path, fp: &Fingerprint, kind: LockKind) -> PathBuf {
    cache_root
        .join(LOCKS_DIR)
        .join(format!("{}.{}", fp.as_str(), kind.extension()))
}

fn open_lock_file(path: &Path) -> WithEnvResult<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| WithEnvError::LockFailed {
            path: path.to_path_buf(),
            source: e,
        })?;
    }

    OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)
        .map_err(|e| WithEnvError::LockFailed {
            path: path.to_path_buf(),
            source: e,
        })
}
