use crate::cache::{CacheStore, CounterTotals, EntrySummary};
use crate::config::EngineConfig;
use crate::fingerprint::CacheKey;
use anyhow::{Context, Result};
use std::io::Write;

/// Cache maintenance operations exposed by `metricore cache`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheAction {
    Stats { json: bool },
    List { limit: Option<usize>, json: bool },
    Evict { key: String },
    Prune,
    Clear,
    /// Print the resolved cache directory.
    Path,
}

pub fn handle_cache(action: CacheAction, config: &EngineConfig) -> Result<()> {
    let location = config.cache().resolve_location();

    if action == CacheAction::Path {
        println!("{}", location.path().display());
        return Ok(());
    }

    let store = CacheStore::open(config.cache().store_options(location.path()))
        .with_context(|| format!("failed to open cache at {}", location.path().display()))?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    match action {
        CacheAction::Stats { json } => {
            let stats = store.stats();
            if json {
                serde_json::to_writer_pretty(&mut out, &stats)?;
                writeln!(out)?;
            } else {
                writeln!(out, "location:        {}", store.directory().display())?;
                writeln!(out, "entries:         {}", stats.entries)?;
                writeln!(out, "total size:      {} KB", stats.total_bytes / 1024)?;
                writeln!(out, "journal records: {}", stats.journal_records)?;
                writeln!(out, "{}", format_lifetime(&stats.lifetime))?;
                writeln!(out, "writes:          {}", stats.lifetime.writes)?;
                writeln!(out, "evictions:       {}", stats.lifetime.evictions)?;
                writeln!(out, "(counters as of the last checkpoint)")?;
                if stats.recreated {
                    writeln!(out, "note: cache was rebuilt after corruption")?;
                }
            }
        }
        CacheAction::List { limit, json } => {
            let entries: Vec<EntrySummary> = store
                .list()
                .into_iter()
                .take(limit.unwrap_or(usize::MAX))
                .collect();
            if json {
                serde_json::to_writer_pretty(&mut out, &entries)?;
                writeln!(out)?;
            } else {
                for entry in &entries {
                    writeln!(out, "{}", format_entry(entry))?;
                }
            }
        }
        CacheAction::Evict { key } => {
            let key: CacheKey = key.parse()?;
            if store.evict(&key)? {
                writeln!(out, "evicted {}", key.short())?;
            } else {
                writeln!(out, "no entry for {}", key.short())?;
            }
        }
        CacheAction::Prune => {
            let stats = store.prune()?;
            writeln!(out, "{}", stats)?;
        }
        CacheAction::Clear => {
            let removed = store.clear()?;
            writeln!(out, "removed {} entries", removed)?;
        }
        CacheAction::Path => {}
    }

    store.close()?;
    Ok(())
}

/// Pure function to render one cache listing line
fn format_entry(entry: &EntrySummary) -> String {
    format!(
        "{}  {:>8} B  source {:>8} B  last used {}{}",
        entry.key,
        entry.size_bytes,
        entry.source_size,
        entry.last_accessed.format("%Y-%m-%d %H:%M:%S"),
        if entry.has_structural_key { "  [structural]" } else { "" }
    )
}

/// Pure function to render the lifetime hit/miss line
fn format_lifetime(totals: &CounterTotals) -> String {
    let rate = totals
        .hit_rate()
        .map(|rate| format!(" ({:.1}% hit rate)", rate * 100.0))
        .unwrap_or_default();
    format!("hits / misses:   {} / {}{}", totals.hits, totals.misses, rate)
}
