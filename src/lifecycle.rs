//! Environment lifecycle
//!
//! Orchestrates create-or-reuse, activation and cleanup for the two
//! strategies:
//!
//! | Strategy | Location | After the run |
//! |----------|----------|---------------|
//! | Cached | `<cache root>/<fingerprint>` | kept, subject to eviction |
//! | Ephemeral | `<temp>/with-env-<uuid>` | always deleted |
//!
//! A cached run marks its entry in use for its whole duration, so eviction
//! in other processes leaves it alone. Create-or-reuse-and-evict also holds
//! the fingerprint's provisioning lock, which is released before the
//! program starts.

use crate::cache::{self, enforce_bound, EntryLock, EnvStore, Fingerprint};
use crate::error::{WithEnvError, WithEnvResult};
use crate::process::{EnvMap, Invocation, ProcessRunner};
use crate::provision::Provisioner;
use std::ffi::{OsStr, OsString};
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Prefix of ephemeral environment directories
pub const EPHEMERAL_PREFIX: &str = "with-env-";

/// Resolves when the user asks to stop the running program
pub type Interrupt = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Produces the interrupt for each run
pub type InterruptSource = Arc<dyn Fn() -> Interrupt + Send + Sync>;

/// How an environment is obtained and disposed of
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Shared, persistent, reused by fingerprint
    Cached {
        /// Delete any existing entry first
        recreate: bool,
    },
    /// Private, deleted after use
    Ephemeral,
}

/// Inputs that define an environment's identity
#[derive(Debug, Clone)]
pub struct EnvSpec {
    /// Interpreter/tool selection (`None` = default)
    pub tool_selector: Option<String>,
    /// Working directory, as raw OS bytes
    pub cwd: OsString,
    /// Dependency manifest
    pub manifest: PathBuf,
}

impl EnvSpec {
    /// Fingerprint of this definition
    pub fn fingerprint(&self) -> WithEnvResult<Fingerprint> {
        cache::fingerprint(self.tool_selector.as_deref(), &self.cwd, &self.manifest)
    }
}

/// Removes a directory when dropped unless disarmed
#[derive(Debug)]
struct DirGuard {
    path: PathBuf,
    armed: bool,
}

impl DirGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }

    async fn remove(mut self) {
        debug!("Removing {}", self.path.display());
        if let Err(e) = cache::store::remove_dir_all(&self.path).await {
            warn!("{}", e);
        }
        self.armed = false;
    }
}

impl Drop for DirGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        debug!("Removing {}", self.path.display());
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {}", self.path.display(), e),
        }
    }
}

#[derive(Debug)]
enum Hold {
    Cached(EntryLock),
    Ephemeral(DirGuard),
}

/// An activated environment, ready to run programs in
#[derive(Debug)]
pub struct ActiveEnvironment {
    root: PathBuf,
    env: EnvMap,
    fingerprint: Option<Fingerprint>,
    hold: Hold,
}

impl ActiveEnvironment {
    /// Environment root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Environment variables with the environment activated
    pub fn env(&self) -> &EnvMap {
        &self.env
    }

    /// Fingerprint for cached environments
    pub fn fingerprint(&self) -> Option<&Fingerprint> {
        self.fingerprint.as_ref()
    }

    /// Whether this environment is deleted after use
    pub fn is_ephemeral(&self) -> bool {
        matches!(self.hold, Hold::Ephemeral(_))
    }

    /// Release the environment: delete it if ephemeral, unlock if cached
    pub async fn finish(self) {
        match self.hold {
            Hold::Ephemeral(guard) => guard.remove().await,
            Hold::Cached(lock) => drop(lock),
        }
    }
}

/// Ctrl-C as an interrupt; stays pending if the handler cannot be installed
pub fn ctrl_c() -> Interrupt {
    Box::pin(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    })
}

/// Run a program, killing it and reporting `Interrupted` when `interrupt` fires
pub async fn run_interruptible(
    runner: &dyn ProcessRunner,
    invocation: &Invocation,
    interrupt: Interrupt,
) -> WithEnvResult<i32> {
    tokio::select! {
        result = runner.execute(invocation) => result,
        () = interrupt => {
            warn!("Interrupted, stopping {}", invocation.program_name());
            Err(WithEnvError::Interrupted)
        }
    }
}

/// Creates, reuses, activates and disposes of environments
pub struct LifecycleController {
    store: EnvStore,
    max_entries: usize,
    temp_root: PathBuf,
    runner: Arc<dyn ProcessRunner>,
    provisioner: Arc<dyn Provisioner>,
    base_env: EnvMap,
    interrupt: InterruptSource,
}

impl LifecycleController {
    /// Create a controller
    pub fn new(
        store: EnvStore,
        runner: Arc<dyn ProcessRunner>,
        provisioner: Arc<dyn Provisioner>,
    ) -> Self {
        Self {
            store,
            max_entries: cache::DEFAULT_MAX_ENTRIES,
            temp_root: std::env::temp_dir(),
            runner,
            provisioner,
            base_env: EnvMap::from_current(),
            interrupt: Arc::new(ctrl_c),
        }
    }

    /// Maximum number of cached environments
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Directory for ephemeral environments
    pub fn with_temp_root(mut self, temp_root: impl Into<PathBuf>) -> Self {
        self.temp_root = temp_root.into();
        self
    }

    /// Environment the activation is applied to
    pub fn with_base_env(mut self, base_env: EnvMap) -> Self {
        self.base_env = base_env;
        self
    }

    /// What stops a running program (Ctrl-C by default)
    pub fn with_interrupt(mut self, interrupt: InterruptSource) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// The backing store
    pub fn store(&self) -> &EnvStore {
        &self.store
    }

    /// Obtain an activated environment
    pub async fn acquire(
        &self,
        strategy: Strategy,
        spec: &EnvSpec,
    ) -> WithEnvResult<ActiveEnvironment> {
        match strategy {
            Strategy::Cached { recreate } => self.acquire_cached(spec, recreate).await,
            Strategy::Ephemeral => self.acquire_ephemeral(spec).await,
        }
    }

    /// Acquire an environment, run a program in it and release it.
    ///
    /// Returns the program's exit code unchanged.
    pub async fn run(
        &self,
        strategy: Strategy,
        spec: &EnvSpec,
        program: &OsStr,
        args: &[OsString],
    ) -> WithEnvResult<i32> {
        let active = self.acquire(strategy, spec).await?;

        let invocation = Invocation::new(program, active.env().clone()).args(args.iter().cloned());
        info!("Executing {}", invocation.display());

        let interrupt = (self.interrupt)();
        let result = run_interruptible(self.runner.as_ref(), &invocation, interrupt).await;
        active.finish().await;
        result
    }

    async fn acquire_cached(
        &self,
        spec: &EnvSpec,
        recreate: bool,
    ) -> WithEnvResult<ActiveEnvironment> {
        let fp = spec.fingerprint()?;
        self.store.ensure_root().await?;

        if recreate {
            let claim = EntryLock::claim(self.store.root(), &fp).await?;
            let dir = self.store.entry_dir(&fp);
            info!("Removing {}", dir.display());
            self.store.remove_dir(&dir).await?;
            drop(claim);
        }

        let usage = EntryLock::in_use(self.store.root(), &fp).await?;
        let provisioning = EntryLock::provision(self.store.root(), &fp).await?;

        let root = self.create_or_reuse(&fp).await?;
        let mut env = self.base_env.clone();
        self.provisioner.activate(&root, &mut env)?;

        match enforce_bound(&self.store, self.max_entries, Some(&fp)).await {
            Ok(report) if !report.evicted.is_empty() => {
                debug!("Evicted {} environment(s)", report.evicted.len())
            }
            Ok(_) => {}
            Err(e) => warn!("Cache eviction failed: {}", e),
        }
        drop(provisioning);

        Ok(ActiveEnvironment {
            root,
            env,
            fingerprint: Some(fp),
            hold: Hold::Cached(usage),
        })
    }

    /// Reuse or provision the entry; caller holds both of its locks
    async fn create_or_reuse(&self, fp: &Fingerprint) -> WithEnvResult<PathBuf> {
        let dir = self.store.entry_dir(fp);

        if let Some(mut entry) = self.store.lookup(fp).await? {
            info!("Reusing cached environment {}", entry.root.display());
            self.store.record_activation(&mut entry).await?;
            return Ok(entry.root);
        }

        let guard = DirGuard::new(dir.clone());
        if let Err(e) = self.provisioner.provision(&dir, &self.base_env).await {
            info!("Error happened, removing {}", dir.display());
            guard.remove().await;
            return Err(e);
        }

        let entry = self.store.register(fp).await?;
        guard.disarm();
        info!("Cached new environment {}", entry.root.display());
        Ok(entry.root)
    }

    async fn acquire_ephemeral(&self, spec: &EnvSpec) -> WithEnvResult<ActiveEnvironment> {
        tokio::fs::File::open(&spec.manifest)
            .await
            .map_err(|e| WithEnvError::ManifestUnreadable {
                path: spec.manifest.clone(),
                source: e,
            })?;

        let root = self
            .temp_root
            .join(format!("{}{}", EPHEMERAL_PREFIX, Uuid::new_v4().simple()));
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| WithEnvError::io(format!("creating {}", root.display()), e))?;
        info!("Created temporary directory {}", root.display());

        let guard = DirGuard::new(root.clone());
        if let Err(e) = self.provisioner.provision(&root, &self.base_env).await {
            info!("Error happened, removing {}", root.display());
            guard.remove().await;
            return Err(e);
        }

        let mut env = self.base_env.clone();
        self.provisioner.activate(&root, &mut env)?;

        Ok(ActiveEnvironment {
            root,
            env,
            fingerprint: None,
            hold: Hold::Ephemeral(guard),
        })
    }
}
