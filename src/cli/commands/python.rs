//! Python command - run a program inside a virtualenv

use super::{current_dir, split_command};
use crate::cache::EnvStore;
use crate::cli::args::PythonArgs;
use crate::config::{Config, ConfigManager};
use crate::error::WithEnvResult;
use crate::lifecycle::{EnvSpec, LifecycleController, Strategy};
use crate::process::{ProcessRunner, SystemRunner};
use crate::provision::VirtualenvProvisioner;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Execute the python command, returning the program's exit code
pub async fn execute(args: PythonArgs, config: &Config) -> WithEnvResult<i32> {
    let (program, program_args) = split_command(&args.command)?;
    let requirements = requirements_path(args.requirements.clone(), config);
    let spec = env_spec(args.python.clone(), requirements.clone())?;

    let strategy = if args.no_cache {
        Strategy::Ephemeral
    } else {
        Strategy::Cached {
            recreate: args.recreate,
        }
    };
    debug!("Using {:?} strategy with {}", strategy, requirements.display());

    let runner: Arc<dyn ProcessRunner> = Arc::new(SystemRunner::new());
    let provisioner = VirtualenvProvisioner::new(runner.clone(), requirements)
        .with_python(args.python)
        .with_tools(&config.python.virtualenv, &config.python.pip);

    let controller = LifecycleController::new(
        EnvStore::new(ConfigManager::cache_root(config)),
        runner,
        Arc::new(provisioner),
    )
    .with_max_entries(config.cache.max_entries)
    .with_temp_root(ConfigManager::temp_root(config));

    controller.run(strategy, &spec, program, program_args).await
}

/// Requirements file from the command line or configuration
pub(crate) fn requirements_path(cli: Option<PathBuf>, config: &Config) -> PathBuf {
    cli.unwrap_or_else(|| config.python.default_requirements.clone())
}

/// Environment definition for the current directory
pub(crate) fn env_spec(python: Option<String>, requirements: PathBuf) -> WithEnvResult<EnvSpec> {
    Ok(EnvSpec {
        tool_selector: python,
        cwd: current_dir()?,
        manifest: requirements,
    })
}
