//! Newdb command - run a program against a throwaway database

use super::split_command;
use crate::cli::args::NewdbArgs;
use crate::config::Config;
use crate::database::{generate_database_name, EphemeralDatabase};
use crate::error::WithEnvResult;
use crate::process::{EnvMap, SystemRunner};
use chrono::Local;
use std::sync::Arc;

/// Execute the newdb command, returning the program's exit code
pub async fn execute(args: NewdbArgs, config: &Config) -> WithEnvResult<i32> {
    let (program, program_args) = split_command(&args.command)?;
    let prefix = args.prefix.as_deref().unwrap_or(&config.database.prefix);
    let name = generate_database_name(prefix, Local::now(), std::process::id());

    EphemeralDatabase::new(Arc::new(SystemRunner::new()), config.database.clone())
        .keep(args.keep)
        .run(&name, &EnvMap::from_current(), program, program_args)
        .await
}
