//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::ffi::OsString;
use std::path::PathBuf;

/// with-env - run programs inside provisioned environments
///
/// Runs a program inside a cached Python virtualenv built from a
/// requirements file, or against a throwaway PostgreSQL database.
#[derive(Parser, Debug)]
#[command(name = "with-env")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "WITH_ENV_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a program inside a Python virtualenv
    Python(PythonArgs),

    /// Run a program with a fresh PostgreSQL database
    Newdb(NewdbArgs),

    /// Inspect and manage cached environments
    Cache(CacheArgs),

    /// Generate shell completions
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Arguments for the python command
#[derive(Parser, Debug)]
pub struct PythonArgs {
    /// Python interpreter passed to virtualenv (e.g. python3.11)
    #[arg(short, long)]
    pub python: Option<String>,

    /// Requirements file (default: from config, requirements.txt)
    #[arg(short, long)]
    pub requirements: Option<PathBuf>,

    /// Rebuild the cached environment before running
    #[arg(long)]
    pub recreate: bool,

    /// Use a temporary environment and delete it afterwards
    #[arg(long, conflicts_with = "recreate")]
    pub no_cache: bool,

    /// Program and its arguments
    #[arg(
        required = true,
        trailing_var_arg = true,
        allow_hyphen_values = true,
        value_name = "PROGRAM"
    )]
    pub command: Vec<OsString>,
}

/// Arguments for the newdb command
#[derive(Parser, Debug)]
pub struct NewdbArgs {
    /// Database name prefix (default: from config, tmp)
    #[arg(short, long)]
    pub prefix: Option<String>,

    /// Keep the database after the program exits
    #[arg(short, long)]
    pub keep: bool,

    /// Program and its arguments
    #[arg(
        required = true,
        trailing_var_arg = true,
        allow_hyphen_values = true,
        value_name = "PROGRAM"
    )]
    pub command: Vec<OsString>,
}

/// Output format for cache list
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple text (one per line)
    Plain,
}

/// Arguments for the cache command
#[derive(Parser, Debug)]
pub struct CacheArgs {
    /// Subcommand for cache
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// List cached environments
    List {
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Show the fingerprint for the current directory and whether it is cached
    Info {
        /// Python interpreter the environment would use
        #[arg(short, long)]
        python: Option<String>,

        /// Requirements file
        #[arg(short, long)]
        requirements: Option<PathBuf>,
    },

    /// Evict least recently used environments now
    Prune {
        /// Keep at most N environments (default: from config)
        #[arg(long)]
        max_entries: Option<usize>,
    },

    /// Delete all cached environments not in use
    Clear {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Print the cache directory
    Path,
}
