//! Lifetime counters, persisted at checkpoint.
//!
//! The store counts hits and misses per process. `store.stats` carries the
//! totals of every earlier process, as of its last checkpoint, so a fresh
//! `metricore cache stats` has something to report. The file is advisory: a
//! missing or unreadable one starts the totals at zero.

use super::CacheError;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;

pub(crate) const STATS_FILE: &str = "store.stats";
const STATS_TMP: &str = "store.stats.tmp";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterTotals {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub races: u64,
    pub evictions: u64,
}

impl CounterTotals {
    pub fn merged(self, other: CounterTotals) -> Self {
        Self {
            hits: self.hits.saturating_add(other.hits),
            misses: self.misses.saturating_add(other.misses),
            writes: self.writes.saturating_add(other.writes),
            races: self.races.saturating_add(other.races),
            evictions: self.evictions.saturating_add(other.evictions),
        }
    }

    /// Fraction of lookups answered from the cache, if any were made.
    pub fn hit_rate(&self) -> Option<f64> {
        let lookups = self.hits + self.misses;
        (lookups > 0).then(|| self.hits as f64 / lookups as f64)
    }
}

pub(crate) fn read(dir: &Path) -> CounterTotals {
    let path = dir.join(STATS_FILE);
    match std::fs::read(&path) {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
            tracing::debug!(path = %path.display(), error = %e, "Ignoring unreadable counter totals");
            CounterTotals::default()
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => CounterTotals::default(),
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "Counter totals unavailable");
            CounterTotals::default()
        }
    }
}

pub(crate) fn write(dir: &Path, totals: &CounterTotals) -> Result<(), CacheError> {
    let bytes = serde_json::to_vec_pretty(totals).map_err(|e| CacheError::Serialization {
        reason: e.to_string(),
    })?;

    let tmp = dir.join(STATS_TMP);
    let target = dir.join(STATS_FILE);
    {
        let mut file = File::create(&tmp).map_err(|e| CacheError::io(&tmp, e))?;
        file.write_all(&bytes).map_err(|e| CacheError::io(&tmp, e))?;
    }
    std::fs::rename(&tmp, &target).map_err(|e| CacheError::io(&target, e))
}
