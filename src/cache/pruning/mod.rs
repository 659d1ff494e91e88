//! Eviction policy for the cache store.
//!
//! Decisions are pure and live in [`decision`]; the store applies them and
//! journals the resulting evictions.

pub mod decision;

pub use decision::{
    calculate_count_removal_target, calculate_size_removal_target, exceeds_limits, is_expired,
    select_entries_to_evict, EntryInfo, EvictionPolicy, PruneStats,
};
