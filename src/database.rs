//! Throwaway PostgreSQL databases
//!
//! Creates an empty database with `createdb`, makes it the default for
//! libpq clients via `PGDATABASE`, runs the program and drops the database
//! afterwards unless asked to keep it.

use crate::config::schema::DatabaseConfig;
use crate::error::{WithEnvError, WithEnvResult};
use crate::lifecycle::{ctrl_c, run_interruptible, InterruptSource};
use crate::process::{EnvMap, Invocation, ProcessRunner};
use chrono::{DateTime, Local};
use std::ffi::{OsStr, OsString};
use std::sync::Arc;
use tracing::{info, warn};

/// Database name: `<prefix>_<YYYYmmddHHMMSS>_<pid>`
pub fn generate_database_name(prefix: &str, now: DateTime<Local>, pid: u32) -> String {
    format!("{}_{}_{}", prefix, now.format("%Y%m%d%H%M%S"), pid)
}

/// Runs programs against a fresh database
pub struct EphemeralDatabase {
    runner: Arc<dyn ProcessRunner>,
    config: DatabaseConfig,
    keep: bool,
    interrupt: InterruptSource,
}

impl EphemeralDatabase {
    /// Create from database settings
    pub fn new(runner: Arc<dyn ProcessRunner>, config: DatabaseConfig) -> Self {
        Self {
            runner,
            config,
            keep: false,
            interrupt: Arc::new(ctrl_c),
        }
    }

    /// Keep the database after the run for debugging
    pub fn keep(mut self, keep: bool) -> Self {
        self.keep = keep;
        self
    }

    /// What stops the running program (Ctrl-C by default)
    pub fn with_interrupt(mut self, interrupt: InterruptSource) -> Self {
        self.interrupt = interrupt;
        self
    }

    async fn create(&self, name: &str, env: &EnvMap) -> WithEnvResult<()> {
        info!("Creating database {}", name);
        let invocation = Invocation::new(&self.config.createdb, env.clone())
            .arg(format!("--encoding={}", self.config.encoding))
            .arg(name)
            .quiet_stdout();

        match self.runner.execute(&invocation).await {
            Ok(0) => Ok(()),
            Ok(code) => Err(WithEnvError::provision_failed(
                &self.config.createdb,
                format!("exited with status {}", code),
            )),
            Err(WithEnvError::LaunchFailed { source, .. }) => Err(
                WithEnvError::provision_failed(&self.config.createdb, source.to_string()),
            ),
            Err(e) => Err(e),
        }
    }

    async fn drop_database(&self, name: &str, env: &EnvMap) {
        info!("Dropping database {}", name);
        let invocation = Invocation::new(&self.config.dropdb, env.clone())
            .arg(name)
            .quiet_stdout();

        match self.runner.execute(&invocation).await {
            Ok(0) => {}
            Ok(code) => warn!("{} {} exited with status {}", self.config.dropdb, name, code),
            Err(e) => warn!("Failed to drop database {}: {}", name, e),
        }
    }

    /// Create a database, run the program with it as default, then drop it.
    ///
    /// Returns the program's exit code unchanged.
    pub async fn run(
        &self,
        name: &str,
        base_env: &EnvMap,
        program: &OsStr,
        args: &[OsString],
    ) -> WithEnvResult<i32> {
        self.create(name, base_env).await?;

        let mut env = base_env.clone();
        env.activate_database(name);
        let invocation = Invocation::new(program, env).args(args.iter().cloned());
        info!("Executing {}", invocation.display());

        let interrupt = (self.interrupt)();
        let result = run_interruptible(self.runner.as_ref(), &invocation, interrupt).await;

        if self.keep {
            info!("Keeping database {}", name);
        } else {
            self.drop_database(name, base_env).await;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Interrupt;
    use crate::process::PGDATABASE;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::io;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingRunner {
        calls: Mutex<Vec<Invocation>>,
        program_code: i32,
        createdb_code: i32,
        program_missing: bool,
        program_hangs: bool,
    }

    #[async_trait]
    impl ProcessRunner for RecordingRunner {
        async fn execute(&self, invocation: &Invocation) -> WithEnvResult<i32> {
            self.calls.lock().unwrap().push(invocation.clone());
            match invocation.program_name().as_str() {
                "createdb" => Ok(self.createdb_code),
                "dropdb" => Ok(0),
                name if self.program_missing => Err(WithEnvError::launch_failed(
                    name,
                    io::Error::new(io::ErrorKind::NotFound, "not found"),
                )),
                _ if self.program_hangs => std::future::pending().await,
                _ => Ok(self.program_code),
            }
        }
    }

    fn programs(runner: &RecordingRunner) -> Vec<String> {
        runner
            .calls
            .lock()
            .unwrap()
            .iter()
            .map(Invocation::display)
            .collect()
    }

    async fn run_with(runner: Arc<RecordingRunner>, keep: bool) -> WithEnvResult<i32> {
        EphemeralDatabase::new(runner, DatabaseConfig::default())
            .keep(keep)
            .run(
                "tmp_20240115100000_42",
                &EnvMap::new(),
                OsStr::new("psql"),
                &[OsString::from("-c"), OsString::from("select 1")],
            )
            .await
    }

    #[test]
    fn database_name_format() {
        let now = Local.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();
        assert_eq!(
            generate_database_name("tmp", now, 4242),
            "tmp_20240115100000_4242"
        );
    }

    #[tokio::test]
    async fn creates_runs_and_drops() {
        let runner = Arc::new(RecordingRunner {
            program_code: 5,
            ..RecordingRunner::default()
        });

        assert_eq!(run_with(runner.clone(), false).await.unwrap(), 5);

        assert_eq!(
            programs(&runner),
            vec![
                "createdb --encoding=UTF8 tmp_20240115100000_42",
                "psql -c select 1",
                "dropdb tmp_20240115100000_42",
            ]
        );
        let calls = runner.calls.lock().unwrap();
        assert_eq!(
            calls[1].env.get(PGDATABASE),
            Some(OsStr::new("tmp_20240115100000_42"))
        );
        assert!(calls[0].env.get(PGDATABASE).is_none());
    }

    #[tokio::test]
    async fn keep_skips_drop() {
        let runner = Arc::new(RecordingRunner::default());

        run_with(runner.clone(), true).await.unwrap();

        assert_eq!(programs(&runner).len(), 2);
        assert!(!programs(&runner).iter().any(|p| p.starts_with("dropdb")));
    }

    #[tokio::test]
    async fn drops_even_when_program_cannot_start() {
        let runner = Arc::new(RecordingRunner {
            program_missing: true,
            ..RecordingRunner::default()
        });

        let err = run_with(runner.clone(), false).await.unwrap_err();

        assert!(matches!(err, WithEnvError::LaunchFailed { .. }));
        assert!(programs(&runner).last().unwrap().starts_with("dropdb"));
    }

    #[tokio::test]
    async fn createdb_failure_aborts_before_program() {
        let runner = Arc::new(RecordingRunner {
            createdb_code: 1,
            ..RecordingRunner::default()
        });

        let err = run_with(runner.clone(), false).await.unwrap_err();

        assert!(matches!(err, WithEnvError::ProvisionFailed { ref tool, .. } if tool == "createdb"));
        assert_eq!(programs(&runner).len(), 1);
    }

    #[tokio::test]
    async fn drops_when_interrupted() {
        let runner = Arc::new(RecordingRunner {
            program_hangs: true,
            ..RecordingRunner::default()
        });

        let err = EphemeralDatabase::new(runner.clone(), DatabaseConfig::default())
            .with_interrupt(Arc::new(|| -> Interrupt { Box::pin(tokio::task::yield_now()) }))
            .run("tmp_x", &EnvMap::new(), OsStr::new("psql"), &[])
            .await
            .unwrap_err();

        assert!(matches!(err, WithEnvError::Interrupted));
        assert_eq!(
            programs(&runner),
            vec!["createdb --encoding=UTF8 tmp_x", "psql", "dropdb tmp_x"]
        );
    }
}
