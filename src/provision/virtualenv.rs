//! Python virtualenv provisioning
//!
//! Creates the environment with `virtualenv`, then installs the manifest
//! with the environment's own `pip`. An empty manifest skips `pip`.

use crate::error::{WithEnvError, WithEnvResult};
use crate::process::{EnvMap, Invocation, ProcessRunner};
use crate::provision::Provisioner;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Provisions Python virtualenvs from a requirements file
pub struct VirtualenvProvisioner {
    runner: Arc<dyn ProcessRunner>,
    virtualenv: String,
    pip: String,
    python: Option<String>,
    requirements: PathBuf,
}

impl VirtualenvProvisioner {
    /// Create a provisioner using the default tool names
    pub fn new(runner: Arc<dyn ProcessRunner>, requirements: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            virtualenv: "virtualenv".to_string(),
            pip: "pip".to_string(),
            python: None,
            requirements: requirements.into(),
        }
    }

    /// Use an alternative interpreter
    pub fn with_python(mut self, python: Option<String>) -> Self {
        self.python = python;
        self
    }

    /// Override the tool executables
    pub fn with_tools(mut self, virtualenv: impl Into<String>, pip: impl Into<String>) -> Self {
        self.virtualenv = virtualenv.into();
        self.pip = pip.into();
        self
    }

    /// Run a provisioning tool, turning any failure into `ProvisionFailed`
    async fn run_tool(&self, tool: &str, invocation: Invocation) -> WithEnvResult<()> {
        debug!("Provisioning step: {}", invocation.display());

        let code = match self.runner.execute(&invocation.quiet_stdout()).await {
            Ok(code) => code,
            Err(WithEnvError::LaunchFailed { source, .. }) => {
                return Err(WithEnvError::provision_failed(tool, source.to_string()))
            }
            Err(e) => return Err(e),
        };

        if code != 0 {
            return Err(WithEnvError::provision_failed(
                tool,
                format!("exited with status {}", code),
            ));
        }
        Ok(())
    }

    async fn requirements_empty(&self) -> WithEnvResult<bool> {
        let meta = tokio::fs::metadata(&self.requirements)
            .await
            .map_err(|e| WithEnvError::ManifestUnreadable {
                path: self.requirements.clone(),
                source: e,
            })?;
        Ok(meta.len() == 0)
    }
}

#[async_trait]
impl Provisioner for VirtualenvProvisioner {
    async fn provision(&self, root: &Path, base_env: &EnvMap) -> WithEnvResult<()> {
        info!("Installing virtualenv {}", root.display());

        let mut create = Invocation::new(&self.virtualenv, base_env.clone()).arg("--quiet");
        if let Some(ref python) = self.python {
            create = create.args(["--python", python.as_str()]);
        }
        self.run_tool(&self.virtualenv, create.arg(root.as_os_str()))
            .await?;

        if self.requirements_empty().await? {
            debug!("{} is empty, nothing to install", self.requirements.display());
            return Ok(());
        }

        let mut env = base_env.clone();
        self.activate(root, &mut env)?;

        info!("Installing requirements from {}", self.requirements.display());
        let install = Invocation::new(&self.pip, env)
            .args(["install", "-r"])
            .arg(self.requirements.as_os_str())
            .arg("--quiet");
        self.run_tool(&self.pip, install).await
    }

    fn activate(&self, root: &Path, env: &mut EnvMap) -> WithEnvResult<()> {
        env.activate_virtualenv(root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{PATH, VIRTUAL_ENV};
    use std::io;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Records invocations and answers with scripted exit codes
    #[derive(Default)]
    struct ScriptedRunner {
        calls: Mutex<Vec<Invocation>>,
        fail_program: Option<(&'static str, i32)>,
        missing_program: Option<&'static str>,
    }

    #[async_trait]
    impl ProcessRunner for ScriptedRunner {
        async fn execute(&self, invocation: &Invocation) -> WithEnvResult<i32> {
            self.calls.lock().unwrap().push(invocation.clone());
            let name = invocation.program_name();
            if self.missing_program == Some(name.as_str()) {
                return Err(WithEnvError::launch_failed(
                    name,
                    io::Error::new(io::ErrorKind::NotFound, "No such file or directory"),
                ));
            }
            match self.fail_program {
                Some((program, code)) if program == name => Ok(code),
                _ => Ok(0),
            }
        }
    }

    fn requirements(dir: &TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("requirements.txt");
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn args_of(call: &Invocation) -> Vec<String> {
        call.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[tokio::test]
    async fn creates_virtualenv_then_installs() {
        let dir = TempDir::new().unwrap();
        let reqs = requirements(&dir, "requests\n");
        let runner = Arc::new(ScriptedRunner::default());
        let provisioner = VirtualenvProvisioner::new(runner.clone(), &reqs)
            .with_python(Some("python3.11".to_string()));
        let root = dir.path().join("venv");

        provisioner.provision(&root, &EnvMap::new()).await.unwrap();

        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].program_name(), "virtualenv");
        assert_eq!(
            args_of(&calls[0]),
            vec![
                "--quiet".to_string(),
                "--python".to_string(),
                "python3.11".to_string(),
                root.display().to_string()
            ]
        );
        assert!(calls[0].stdout_to_stderr);

        assert_eq!(calls[1].program_name(), "pip");
        assert_eq!(
            args_of(&calls[1]),
            vec![
                "install".to_string(),
                "-r".to_string(),
                reqs.display().to_string(),
                "--quiet".to_string()
            ]
        );
        assert_eq!(calls[1].env.get(VIRTUAL_ENV), Some(root.as_os_str()));
        assert!(calls[1].env.get(PATH).is_some());
    }

    #[tokio::test]
    async fn empty_manifest_skips_pip() {
        let dir = TempDir::new().unwrap();
        let reqs = requirements(&dir, "");
        let runner = Arc::new(ScriptedRunner::default());
        let provisioner = VirtualenvProvisioner::new(runner.clone(), &reqs);

        provisioner
            .provision(&dir.path().join("venv"), &EnvMap::new())
            .await
            .unwrap();

        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(args_of(&calls[0])[0], "--quiet");
        assert!(!args_of(&calls[0]).contains(&"--python".to_string()));
    }

    #[tokio::test]
    async fn failing_tool_is_provision_failure() {
        let dir = TempDir::new().unwrap();
        let reqs = requirements(&dir, "nonexistent-package==0\n");
        let runner = Arc::new(ScriptedRunner {
            fail_program: Some(("pip", 1)),
            ..ScriptedRunner::default()
        });
        let provisioner = VirtualenvProvisioner::new(runner, &reqs);

        let err = provisioner
            .provision(&dir.path().join("venv"), &EnvMap::new())
            .await
            .unwrap_err();

        match err {
            WithEnvError::ProvisionFailed { tool, reason } => {
                assert_eq!(tool, "pip");
                assert!(reason.contains("status 1"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn missing_tool_is_provision_failure() {
        let dir = TempDir::new().unwrap();
        let reqs = requirements(&dir, "");
        let runner = Arc::new(ScriptedRunner {
            missing_program: Some("virtualenv"),
            ..ScriptedRunner::default()
        });
        let provisioner = VirtualenvProvisioner::new(runner, &reqs);

        let err = provisioner
            .provision(&dir.path().join("venv"), &EnvMap::new())
            .await
            .unwrap_err();

        assert!(matches!(err, WithEnvError::ProvisionFailed { ref tool, .. } if tool == "virtualenv"));
        assert!(err.hint().is_some());
    }
}
