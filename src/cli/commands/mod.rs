//! CLI command implementations

pub mod cache;
pub mod completions;
pub mod newdb;
pub mod python;

pub use cache::execute as cache;
pub use completions::execute as completions;
pub use newdb::execute as newdb;
pub use python::execute as python;

use crate::error::{WithEnvError, WithEnvResult};
use std::ffi::{OsStr, OsString};

/// Split a trailing command line into program and arguments
fn split_command(command: &[OsString]) -> WithEnvResult<(&OsStr, &[OsString])> {
    command
        .split_first()
        .map(|(program, args)| (program.as_os_str(), args))
        .ok_or_else(|| WithEnvError::Internal("no program given".to_string()))
}

/// Current working directory, as given by the OS
fn current_dir() -> WithEnvResult<OsString> {
    std::env::current_dir()
        .map(|dir| dir.into_os_string())
        .map_err(|e| WithEnvError::io("getting current directory", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_command_separates_program() {
        let command = vec![OsString::from("pytest"), OsString::from("-x")];
        let (program, args) = split_command(&command).unwrap();
        assert_eq!(program, "pytest");
        assert_eq!(args, &[OsString::from("-x")]);
    }

    #[test]
    fn split_command_rejects_empty() {
        assert!(split_command(&[]).is_err());
    }
}
