//! with-env CLI entry point
//!
//! Dispatches to subcommands and forwards the executed program's exit code.

use clap::Parser;
use console::style;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use with_env::cli::{Cli, Commands};
use with_env::config::{Config, ConfigManager};
use with_env::error::WithEnvResult;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => ExitCode::from(status_byte(code)),
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> WithEnvResult<i32> {
    let cli = Cli::parse();

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let config = config_manager.load().await?;

    init_logging(cli.verbose, &config);

    match cli.command {
        Commands::Python(args) => with_env::cli::commands::python(args, &config).await,
        Commands::Newdb(args) => with_env::cli::commands::newdb(args, &config).await,
        Commands::Cache(args) => with_env::cli::commands::cache(args, &config).await.map(|()| 0),
        Commands::Completions { shell } => with_env::cli::commands::completions(shell).map(|()| 0),
    }
}

/// Logging to stderr: 0 = warn, 1 = info, 2+ = debug; RUST_LOG wins if set
fn init_logging(verbose: u8, config: &Config) {
    let default = match verbose {
        0 => "with_env=warn",
        1 => "with_env=info",
        _ => "with_env=debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time();

    if config.general.log_format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Exit status byte for a program's exit code
fn status_byte(code: i32) -> u8 {
    (code & 0xff) as u8
}
