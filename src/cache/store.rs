//! On-disk environment store
//!
//! Each cached environment lives in `<cache root>/<fingerprint>/` and carries
//! an `activate.ts` marker holding its last activation time. A directory
//! without a readable marker is a leftover from an interrupted provisioning
//! run and is removed instead of trusted.

use crate::cache::fingerprint::Fingerprint;
use crate::cache::lock::{EntryLock, LOCKS_DIR};
use crate::error::{WithEnvError, WithEnvResult};
use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};

/// Name of the activation marker inside each entry directory
pub const TIMESTAMP_FILE: &str = "activate.ts";

/// Marker format: UTC date, time and microseconds
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S %6f";

/// Source of activation times
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Recursive directory removal, run on the blocking pool
pub type Remover = Arc<dyn Fn(&Path) -> io::Result<()> + Send + Sync>;

/// Render an activation time in marker format
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse marker contents
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s.trim_end(), TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// One provisioned environment in the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Identity of the environment
    pub fingerprint: Fingerprint,
    /// Root of the provisioned tree
    pub root: PathBuf,
    /// Last time the environment was activated
    pub last_activated: DateTime<Utc>,
}

/// Filesystem-backed store of cached environments
#[derive(Clone)]
pub struct EnvStore {
    root: PathBuf,
    clock: Clock,
    remover: Remover,
}

impl fmt::Debug for EnvStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvStore")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl EnvStore {
    /// Create a store rooted at `root` using the system clock
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_clock(root, Arc::new(Utc::now))
    }

    /// Create a store with a custom clock
    pub fn with_clock(root: impl Into<PathBuf>, clock: Clock) -> Self {
        Self {
            root: root.into(),
            clock,
            remover: Arc::new(|path: &Path| std::fs::remove_dir_all(path)),
        }
    }

    /// Replace how entry directories are removed
    pub fn with_remover(mut self, remover: Remover) -> Self {
        self.remover = remover;
        self
    }

    /// The cache root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for a fingerprint
    pub fn entry_dir(&self, fp: &Fingerprint) -> PathBuf {
        self.root.join(fp.as_str())
    }

    /// Create the cache root and lock directory
    pub async fn ensure_root(&self) -> WithEnvResult<()> {
        let locks = self.root.join(LOCKS_DIR);
        fs::create_dir_all(&locks).await.map_err(|e| {
            WithEnvError::io(format!("creating cache directory {}", locks.display()), e)
        })
    }

    /// Current time at marker precision
    fn now(&self) -> DateTime<Utc> {
        (self.clock)().trunc_subsecs(6)
    }

    /// Look up a valid entry.
    ///
    /// An entry directory with a missing or corrupt marker is deleted and
    /// reported as a miss. Callers must hold the fingerprint's provisioning lock.
    pub async fn lookup(&self, fp: &Fingerprint) -> WithEnvResult<Option<CacheEntry>> {
        let dir = self.entry_dir(fp);
        if !dir.is_dir() {
            debug!("Cache miss for {}", fp.short());
            return Ok(None);
        }

        match read_marker(&dir).await {
            Some(last_activated) => {
                debug!("Cache hit for {} (last activated {})", fp.short(), last_activated);
                Ok(Some(CacheEntry {
                    fingerprint: fp.clone(),
                    root: dir,
                    last_activated,
                }))
            }
            None => {
                info!("Removing incomplete environment {}", dir.display());
                self.remove_dir(&dir).await?;
                Ok(None)
            }
        }
    }

    /// Write the activation marker for an entry, refreshing its recency
    pub async fn record_activation(&self, entry: &mut CacheEntry) -> WithEnvResult<()> {
        let now = self.now();
        let marker = entry.root.join(TIMESTAMP_FILE);

        fs::write(&marker, format_timestamp(&now))
            .await
            .map_err(|e| WithEnvError::io(format!("writing {}", marker.display()), e))?;

        entry.last_activated = now;
        debug!("Recorded activation of {} at {}", entry.fingerprint.short(), now);
        Ok(())
    }

    /// Register a freshly provisioned directory as an activated entry
    pub async fn register(&self, fp: &Fingerprint) -> WithEnvResult<CacheEntry> {
        let mut entry = CacheEntry {
            fingerprint: fp.clone(),
            root: self.entry_dir(fp),
            last_activated: self.now(),
        };
        self.record_activation(&mut entry).await?;
        Ok(entry)
    }

    /// All valid entries, sorted by fingerprint.
    ///
    /// Invalid directories are deleted unless another process holds their
    /// lock (it may be provisioning them right now).
    pub async fn all_entries(&self) -> WithEnvResult<Vec<CacheEntry>> {
        let mut dir = match fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(WithEnvError::io(
                    format!("reading cache directory {}", self.root.display()),
                    e,
                ))
            }
        };

        let mut entries = Vec::new();
        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|e| WithEnvError::io("reading cache entry", e))?
        {
            let path = item.path();
            let name = item.file_name();
            if name == LOCKS_DIR || !path.is_dir() {
                continue;
            }

            let Some(fp) = name.to_str().and_then(Fingerprint::parse) else {
                warn!("Removing foreign directory {}", path.display());
                self.remove_dir_best_effort(&path).await;
                continue;
            };

            match read_marker(&path).await {
                Some(last_activated) => entries.push(CacheEntry {
                    fingerprint: fp,
                    root: path,
                    last_activated,
                }),
                None => self.heal(&fp, &path).await?,
            }
        }

        entries.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));
        Ok(entries)
    }

    async fn heal(&self, fp: &Fingerprint, path: &Path) -> WithEnvResult<()> {
        match EntryLock::try_claim(&self.root, fp)? {
            Some(_claim) => {
                info!("Removing incomplete environment {}", path.display());
                self.remove_dir_best_effort(path).await;
            }
            None => debug!("Skipping {} while it is being provisioned", path.display()),
        }
        Ok(())
    }

    /// Delete an entry; already-deleted entries are fine
    pub async fn delete(&self, entry: &CacheEntry) -> WithEnvResult<()> {
        self.remove_dir(&entry.root).await
    }

    /// Recursively remove a directory, treating "already gone" as success
    pub async fn remove_dir(&self, path: &Path) -> WithEnvResult<()> {
        let remover = self.remover.clone();
        let target = path.to_path_buf();
        let result = tokio::task::spawn_blocking(move || remover(&target))
            .await
            .map_err(|e| WithEnvError::Internal(format!("removal task failed: {}", e)))?;

        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(WithEnvError::io(format!("removing {}", path.display()), e)),
        }
    }

    async fn remove_dir_best_effort(&self, path: &Path) {
        if let Err(e) = self.remove_dir(path).await {
            warn!("{}", e);
        }
    }

    /// Bytes used by an entry on disk (symlinks are not followed)
    pub async fn size_of(&self, entry: &CacheEntry) -> WithEnvResult<u64> {
        let root = entry.root.clone();
        tokio::task::spawn_blocking(move || dir_size(&root))
            .await
            .map_err(|e| WithEnvError::Internal(format!("size task failed: {}", e)))
    }
}

/// Recursively remove a directory; a missing directory is not an error
pub async fn remove_dir_all(path: &Path) -> WithEnvResult<()> {
    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(WithEnvError::io(format!("removing {}", path.display()), e)),
    }
}

async fn read_marker(dir: &Path) -> Option<DateTime<Utc>> {
    let content = fs::read_to_string(dir.join(TIMESTAMP_FILE)).await.ok()?;
    parse_timestamp(&content)
}

fn dir_size(path: &Path) -> u64 {
    let Ok(entries) = std::fs::read_dir(path) else {
        return 0;
    };

    entries
        .filter_map(Result::ok)
        .map(|entry| match entry.metadata() {
            Ok(meta) if meta.is_dir() => dir_size(&entry.path()),
            Ok(meta) => meta.len(),
            Err(_) => 0,
        })
        .sum()
}
