//! Cache command - inspect and manage cached environments

use super::python::{env_spec, requirements_path};
use crate::cache::{enforce_bound, CacheEntry, EntryLock, EnvStore};
use crate::cli::args::{CacheAction, CacheArgs, OutputFormat};
use crate::config::{Config, ConfigManager};
use crate::error::WithEnvResult;
use console::style;
use serde::Serialize;
use std::io::{self, Write};
use std::path::PathBuf;
use tracing::{debug, warn};

/// Execute the cache command
pub async fn execute(args: CacheArgs, config: &Config) -> WithEnvResult<()> {
    let store = EnvStore::new(ConfigManager::cache_root(config));

    match args.action {
        CacheAction::List { format } => list_entries(&store, format).await,
        CacheAction::Info {
            python,
            requirements,
        } => show_info(&store, python, requirements, config).await,
        CacheAction::Prune { max_entries } => {
            prune(&store, max_entries.unwrap_or(config.cache.max_entries)).await
        }
        CacheAction::Clear { yes } => clear_entries(&store, yes).await,
        CacheAction::Path => {
            println!("{}", store.root().display());
            Ok(())
        }
    }
}

/// One listed environment
#[derive(Debug, Serialize)]
struct EntryRow {
    fingerprint: String,
    path: PathBuf,
    last_activated: String,
    size_bytes: u64,
}

impl EntryRow {
    async fn new(store: &EnvStore, entry: &CacheEntry) -> WithEnvResult<Self> {
        Ok(Self {
            fingerprint: entry.fingerprint.to_string(),
            path: entry.root.clone(),
            last_activated: entry.last_activated.to_rfc3339(),
            size_bytes: store.size_of(entry).await?,
        })
    }
}

async fn list_entries(store: &EnvStore, format: OutputFormat) -> WithEnvResult<()> {
    let entries = store.all_entries().await?;

    if entries.is_empty() && !matches!(format, OutputFormat::Json) {
        println!("No cached environments found.");
        return Ok(());
    }

    match format {
        OutputFormat::Table => print_table(store, &entries).await?,
        OutputFormat::Json => {
            let mut rows = Vec::with_capacity(entries.len());
            for entry in &entries {
                rows.push(EntryRow::new(store, entry).await?);
            }
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        OutputFormat::Plain => {
            for entry in &entries {
                println!("{}", entry.fingerprint);
            }
        }
    }

    Ok(())
}

async fn print_table(store: &EnvStore, entries: &[CacheEntry]) -> WithEnvResult<()> {
    println!("{:<14} {:<22} {:>10}", "FINGERPRINT", "LAST ACTIVATED", "SIZE");
    println!("{}", "-".repeat(48));

    let mut newest: Vec<&CacheEntry> = entries.iter().collect();
    newest.sort_by(|a, b| b.last_activated.cmp(&a.last_activated));

    for entry in newest {
        println!(
            "{:<14} {:<22} {:>10}",
            entry.fingerprint.short(),
            entry.last_activated.format("%Y-%m-%d %H:%M:%S"),
            format_size(store.size_of(entry).await?)
        );
    }

    println!();
    println!("Total: {} environment(s)", entries.len());
    Ok(())
}

/// Human-readable byte count
fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

async fn show_info(
    store: &EnvStore,
    python: Option<String>,
    requirements: Option<PathBuf>,
    config: &Config,
) -> WithEnvResult<()> {
    let requirements = requirements_path(requirements, config);
    let spec = env_spec(python, requirements)?;
    let fp = spec.fingerprint()?;

    println!("Requirements: {}", spec.manifest.display());
    println!(
        "Interpreter:  {}",
        spec.tool_selector.as_deref().unwrap_or("(default)")
    );
    println!("Fingerprint:  {}", fp);
    println!("Directory:    {}", store.entry_dir(&fp).display());

    let entries = store.all_entries().await?;
    match entries.iter().find(|e| e.fingerprint == fp) {
        Some(entry) => println!(
            "Status:       {} (last activated {})",
            style("cached").green(),
            entry.last_activated.format("%Y-%m-%d %H:%M:%S")
        ),
        None => println!("Status:       {}", style("not cached").dim()),
    }

    Ok(())
}

async fn prune(store: &EnvStore, max_entries: usize) -> WithEnvResult<()> {
    let report = enforce_bound(store, max_entries, None).await?;

    if report.evicted.is_empty() && report.busy.is_empty() && report.failed.is_empty() {
        println!(
            "{} environment(s), limit {}. Nothing to prune.",
            report.remaining, max_entries
        );
        return Ok(());
    }

    for fp in &report.evicted {
        println!("  {} {}", style("•").red(), fp.short());
    }
    if !report.busy.is_empty() {
        println!("Skipped {} environment(s) in use", report.busy.len());
    }
    if !report.failed.is_empty() {
        println!("Failed to remove {} environment(s)", report.failed.len());
    }
    println!(
        "{} pruned {} environment(s), {} remaining",
        style("✓").green(),
        report.evicted.len(),
        report.remaining
    );

    Ok(())
}

async fn clear_entries(store: &EnvStore, skip_confirm: bool) -> WithEnvResult<()> {
    let entries = store.all_entries().await?;

    if entries.is_empty() {
        println!("No cached environments to clear.");
        return Ok(());
    }

    println!("This will remove {} cached environment(s):", entries.len());
    for entry in &entries {
        println!("  {} {}", style("•").red(), entry.fingerprint.short());
    }
    println!();

    if !skip_confirm {
        print!("Are you sure? [y/N] ");
        let _ = io::stdout().flush();

        let mut input = String::new();
        if io::stdin().read_line(&mut input).is_err() {
            println!("Failed to read input, aborting.");
            return Ok(());
        }

        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Aborted.");
            return Ok(());
        }
    }

    let (removed, busy) = remove_unlocked(store, &entries).await?;

    if busy > 0 {
        println!("Skipped {} environment(s) in use", busy);
    }
    println!("{} cleared {} environment(s)", style("✓").green(), removed);

    Ok(())
}

/// Delete every entry whose lock can be taken; returns (removed, busy)
async fn remove_unlocked(store: &EnvStore, entries: &[CacheEntry]) -> WithEnvResult<(usize, usize)> {
    let mut removed = 0;
    let mut busy = 0;

    for entry in entries {
        let Some(_claim) = EntryLock::try_claim(store.root(), &entry.fingerprint)? else {
            debug!("{} is in use, not removing", entry.fingerprint.short());
            busy += 1;
            continue;
        };

        match store.delete(entry).await {
            Ok(()) => removed += 1,
            Err(e) => warn!("Failed to remove {}: {}", entry.fingerprint.short(), e),
        }
    }

    Ok((removed, busy))
}
