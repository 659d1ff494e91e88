//! Pure pruning decision logic
//!
//! Entries past `max_age` go first. Then, while the cache is over its size or
//! entry limits, the least recently accessed entries go. Pinned entries are
//! never selected.

use crate::fingerprint::CacheKey;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Limits the store enforces on prune.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictionPolicy {
    /// Entries not accessed for longer than this are removed.
    pub max_age: Option<Duration>,
    /// Upper bound on total payload bytes.
    pub max_size_bytes: Option<u64>,
    /// Upper bound on entry count.
    pub max_entries: Option<usize>,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self {
            max_age: Some(Duration::from_secs(30 * 86_400)),
            max_size_bytes: Some(512 * 1024 * 1024),
            max_entries: Some(100_000),
        }
    }
}

impl EvictionPolicy {
    /// A policy that never removes anything.
    pub fn unbounded() -> Self {
        Self {
            max_age: None,
            max_size_bytes: None,
            max_entries: None,
        }
    }
}

/// What the policy needs to know about one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    pub key: CacheKey,
    pub size_bytes: u64,
    pub last_accessed_ms: i64,
    pub pinned: bool,
}

/// Statistics from a pruning operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneStats {
    pub entries_removed: usize,
    pub bytes_freed: u64,
    pub entries_remaining: usize,
    pub bytes_remaining: u64,
    pub skipped_pinned: usize,
    pub duration_ms: u64,
}

impl std::fmt::Display for PruneStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Pruned {} entries ({} KB) in {}ms. Remaining: {} entries ({} KB)",
            self.entries_removed,
            self.bytes_freed / 1024,
            self.duration_ms,
            self.entries_remaining,
            self.bytes_remaining / 1024
        )
    }
}

/// Bytes that must go for `current` to fit under `max`.
pub fn calculate_size_removal_target(current: u64, max: Option<u64>) -> u64 {
    match max {
        Some(max) if current > max => current - max,
        _ => 0,
    }
}

/// Entries that must go for `current` to fit under `max`.
pub fn calculate_count_removal_target(current: usize, max: Option<usize>) -> usize {
    match max {
        Some(max) if current > max => current - max,
        _ => 0,
    }
}

/// Whether `count` entries totalling `total_bytes` break a size or count limit.
pub fn exceeds_limits(count: usize, total_bytes: u64, policy: &EvictionPolicy) -> bool {
    calculate_count_removal_target(count, policy.max_entries) > 0
        || calculate_size_removal_target(total_bytes, policy.max_size_bytes) > 0
}

/// Whether an entry has aged out - pure predicate
pub fn is_expired(last_accessed_ms: i64, max_age: Option<Duration>, now_ms: i64) -> bool {
    let Some(max_age) = max_age else {
        return false;
    };
    let age_ms = now_ms.saturating_sub(last_accessed_ms);
    age_ms > 0 && age_ms as u128 > max_age.as_millis()
}

/// Select the keys to evict under `policy`.
///
/// Returns keys in removal order: expired entries first (oldest first), then
/// LRU victims until both the size and count limits hold.
pub fn select_entries_to_evict(
    entries: &[EntryInfo],
    policy: &EvictionPolicy,
    now_ms: i64,
) -> Vec<CacheKey> {
    let mut candidates: Vec<&EntryInfo> = entries.iter().filter(|e| !e.pinned).collect();
    candidates.sort_by(|a, b| {
        a.last_accessed_ms
            .cmp(&b.last_accessed_ms)
            .then_with(|| a.key.cmp(&b.key))
    });

    let total_size: u64 = entries.iter().map(|e| e.size_bytes).sum();
    let mut remaining_size = total_size;
    let mut remaining_count = entries.len();
    let mut selected = Vec::new();

    for entry in candidates {
        let expired = is_expired(entry.last_accessed_ms, policy.max_age, now_ms);
        let over_size = calculate_size_removal_target(remaining_size, policy.max_size_bytes) > 0;
        let over_count =
            calculate_count_removal_target(remaining_count, policy.max_entries) > 0;

        if !(expired || over_size || over_count) {
            // Sorted by access time, so nothing later is expired either.
            break;
        }

        selected.push(entry.key);
        remaining_size = remaining_size.saturating_sub(entry.size_bytes);
        remaining_count -= 1;
    }

    selected
}
