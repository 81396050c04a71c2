//! Error types for with-env
//!
//! All modules use `WithEnvResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for with-env operations
pub type WithEnvResult<T> = Result<T, WithEnvError>;

/// Exit status used when with-env itself fails before the program runs
pub const EXIT_SETUP_FAILED: u8 = 125;

/// Exit status when the program exists but cannot be executed
pub const EXIT_CANNOT_EXECUTE: u8 = 126;

/// Exit status when the program cannot be found
pub const EXIT_NOT_FOUND: u8 = 127;

/// Exit status after an interrupt (128 + SIGINT)
pub const EXIT_INTERRUPTED: u8 = 130;

/// All errors that can occur in with-env
#[derive(Error, Debug)]
pub enum WithEnvError {
    // Environment definition errors
    #[error("Cannot read dependency manifest {path}: {source}")]
    ManifestUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Provisioning failed in {tool}: {reason}")]
    ProvisionFailed { tool: String, reason: String },

    // Process errors
    #[error("Failed to launch {program}: {source}")]
    LaunchFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Interrupted")]
    Interrupted,

    // Cache errors
    #[error("Failed to lock {path}: {source}")]
    LockFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl WithEnvError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a provisioning failure
    pub fn provision_failed(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ProvisionFailed {
            tool: tool.into(),
            reason: reason.into(),
        }
    }

    /// Create a launch failure for the target program
    pub fn launch_failed(program: impl Into<String>, source: std::io::Error) -> Self {
        Self::LaunchFailed {
            program: program.into(),
            source,
        }
    }

    /// Exit status to report for this error.
    ///
    /// Distinct from anything a program that actually ran would forward
    /// in the common case, following the `env(1)` conventions.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::LaunchFailed { source, .. } if source.kind() == std::io::ErrorKind::NotFound => {
                EXIT_NOT_FOUND
            }
            Self::LaunchFailed { .. } => EXIT_CANNOT_EXECUTE,
            Self::Interrupted => EXIT_INTERRUPTED,
            _ => EXIT_SETUP_FAILED,
        }
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::ManifestUnreadable { .. } => {
                Some("Pass the manifest explicitly with --requirements, or create an empty one")
            }
            Self::ProvisionFailed { tool, .. } if tool == "virtualenv" => {
                Some("Install virtualenv: pip install virtualenv")
            }
            Self::ProvisionFailed { tool, .. } if tool == "createdb" => {
                Some("Check that PostgreSQL client tools are installed and the server is reachable")
            }
            Self::LaunchFailed { .. } => Some("Check the program name and that it is on PATH"),
            _ => None,
        }
    }
}
