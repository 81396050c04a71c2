//! Least-recently-activated eviction
//!
//! Keeps the store at or below a maximum number of entries. Candidates are
//! ordered by `(last_activated, fingerprint)`, so equal timestamps evict
//! the lexically smaller fingerprint first.

use crate::cache::fingerprint::Fingerprint;
use crate::cache::lock::EntryLock;
use crate::cache::store::{CacheEntry, EnvStore};
use crate::error::WithEnvResult;
use tracing::{debug, info, warn};

/// Default maximum number of cached environments
pub const DEFAULT_MAX_ENTRIES: usize = 10;

/// Outcome of an eviction pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EvictionReport {
    /// Entries that were deleted
    pub evicted: Vec<Fingerprint>,
    /// Candidates skipped because another process holds their lock
    pub busy: Vec<Fingerprint>,
    /// Candidates whose deletion failed
    pub failed: Vec<Fingerprint>,
    /// Valid entries left in the store
    pub remaining: usize,
}

/// Evict least recently activated entries until at most `max_entries` remain.
///
/// `protected` is the entry activated by the current operation; it is never
/// evicted, even when `max_entries` is zero. Deletion failures are logged
/// and reported, never returned as errors.
pub async fn enforce_bound(
    store: &EnvStore,
    max_entries: usize,
    protected: Option<&Fingerprint>,
) -> WithEnvResult<EvictionReport> {
    let entries = store.all_entries().await?;
    let mut report = EvictionReport {
        remaining: entries.len(),
        ..EvictionReport::default()
    };

    if entries.len() <= max_entries {
        debug!("{} cached environment(s), limit {}", entries.len(), max_entries);
        return Ok(report);
    }

    let mut candidates: Vec<CacheEntry> = entries
        .into_iter()
        .filter(|e| Some(&e.fingerprint) != protected)
        .collect();
    candidates.sort_by(|a, b| {
        a.last_activated
            .cmp(&b.last_activated)
            .then_with(|| a.fingerprint.cmp(&b.fingerprint))
    });

    for entry in candidates {
        if report.remaining <= max_entries {
            break;
        }

        let Some(_claim) = EntryLock::try_claim(store.root(), &entry.fingerprint)? else {
            debug!("{} is in use, not evicting", entry.fingerprint.short());
            report.busy.push(entry.fingerprint);
            continue;
        };

        match store.delete(&entry).await {
            Ok(()) => {
                info!(
                    "Evicted environment {} (last activated {})",
                    entry.fingerprint.short(),
                    entry.last_activated
                );
                report.remaining -= 1;
                report.evicted.push(entry.fingerprint);
            }
            Err(e) => {
                warn!("Failed to evict {}: {}", entry.fingerprint.short(), e);
                report.failed.push(entry.fingerprint);
            }
        }
    }

    if report.remaining > max_entries {
        warn!(
            "Cache holds {} environment(s), above the limit of {}",
            report.remaining, max_entries
        );
    }

    Ok(report)
}
