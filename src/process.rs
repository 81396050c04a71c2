//! Process execution with explicit environments
//!
//! Every child gets exactly the environment map it is handed; activation
//! edits that map instead of the ambient process environment.

use crate::error::{WithEnvError, WithEnvResult};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Marker variable naming the active virtualenv
pub const VIRTUAL_ENV: &str = "VIRTUAL_ENV";

/// Executable search path
pub const PATH: &str = "PATH";

/// Default database for libpq clients
pub const PGDATABASE: &str = "PGDATABASE";

/// Directory holding a virtualenv's executables
#[cfg(windows)]
pub const BIN_DIR: &str = "Scripts";
#[cfg(not(windows))]
pub const BIN_DIR: &str = "bin";

/// Environment variables passed to a child process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvMap {
    vars: BTreeMap<OsString, OsString>,
}

impl EnvMap {
    /// Empty environment
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current process environment
    pub fn from_current() -> Self {
        std::env::vars_os().collect()
    }

    /// Get a variable
    pub fn get(&self, key: impl AsRef<OsStr>) -> Option<&OsStr> {
        self.vars.get(key.as_ref()).map(OsString::as_os_str)
    }

    /// Set a variable
    pub fn set(&mut self, key: impl Into<OsString>, value: impl Into<OsString>) {
        self.vars.insert(key.into(), value.into());
    }

    /// Put a directory in front of `PATH`
    pub fn prepend_path(&mut self, dir: &Path) -> WithEnvResult<()> {
        let mut paths = vec![dir.to_path_buf()];
        if let Some(existing) = self.get(PATH) {
            paths.extend(std::env::split_paths(existing));
        }

        let joined = std::env::join_paths(paths).map_err(|e| {
            WithEnvError::Internal(format!("cannot add {} to PATH: {}", dir.display(), e))
        })?;
        self.set(PATH, joined);
        Ok(())
    }

    /// Make a virtualenv the active environment
    pub fn activate_virtualenv(&mut self, root: &Path) -> WithEnvResult<()> {
        debug!("Activating virtualenv {}", root.display());
        self.set(VIRTUAL_ENV, root.as_os_str());
        self.prepend_path(&root.join(BIN_DIR))
    }

    /// Make a database the default for libpq clients
    pub fn activate_database(&mut self, name: &str) {
        debug!("Activating database {}", name);
        self.set(PGDATABASE, name);
    }

    /// Iterate over variables
    pub fn iter(&self) -> impl Iterator<Item = (&OsStr, &OsStr)> {
        self.vars.iter().map(|(k, v)| (k.as_os_str(), v.as_os_str()))
    }
}

impl<K: Into<OsString>, V: Into<OsString>> FromIterator<(K, V)> for EnvMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// A program to run with its arguments and environment
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Program name or path, resolved against the invocation's `PATH`
    pub program: OsString,
    /// Arguments
    pub args: Vec<OsString>,
    /// Complete environment of the child
    pub env: EnvMap,
    /// Send the child's stdout to our stderr (for provisioning tools)
    pub stdout_to_stderr: bool,
}

impl Invocation {
    /// New invocation with an environment
    pub fn new(program: impl Into<OsString>, env: EnvMap) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env,
            stdout_to_stderr: false,
        }
    }

    /// Append an argument
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Keep the child's stdout off our stdout
    pub fn quiet_stdout(mut self) -> Self {
        self.stdout_to_stderr = true;
        self
    }

    /// Program name for messages
    pub fn program_name(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }

    /// Command line for logging
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_os_str())
            .chain(self.args.iter().map(OsString::as_os_str))
            .map(|s| s.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Executes programs and reports their exit status
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run to completion and return the exit code.
    ///
    /// A program that cannot be started is `LaunchFailed`; a non-zero exit
    /// is a normal result.
    async fn execute(&self, invocation: &Invocation) -> WithEnvResult<i32>;
}

/// Runs programs as real child processes
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl SystemRunner {
    /// Create a new system runner
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessRunner for SystemRunner {
    async fn execute(&self, invocation: &Invocation) -> WithEnvResult<i32> {
        debug!("Executing: {}", invocation.display());

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .env_clear()
            .envs(invocation.env.iter())
            .stdin(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        if invocation.stdout_to_stderr {
            command.stdout(Stdio::from(std::io::stderr()));
        } else {
            command.stdout(Stdio::inherit());
        }

        let status = command
            .status()
            .await
            .map_err(|e| WithEnvError::launch_failed(invocation.program_name(), e))?;

        Ok(exit_code(status))
    }
}

/// Exit code of a finished process; signals map to `128 + signal`
fn exit_code(status: std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    -1
}
