//! Durable content-addressed result cache.
//!
//! The [`CacheStore`] keeps its live index in memory and persists every
//! mutation to a write-ahead journal before it becomes visible. Checkpoints
//! fold the journal into a snapshot file. Everything lives in one directory:
//!
//! ```text
//! <cache_location>/
//!   store.snap      snapshot of all live entries
//!   store.journal   records appended since the last checkpoint
//!   store.lock      held by the one store that owns the directory
//!   store.stats     lifetime hit/miss totals as of the last checkpoint
//! ```

pub mod cache_location;
mod error;
mod journal;
pub mod lock;
pub mod payload;
pub mod pruning;
mod snapshot;
pub mod store;
mod totals;

pub use cache_location::{CacheLocation, CacheStrategy};
pub use error::CacheError;
pub use pruning::{EvictionPolicy, PruneStats};
pub use store::{CacheEntry, CacheStats, CacheStore, EntrySummary, KeyPin, PutOutcome, StoreOptions};
pub use totals::CounterTotals;

/// Schema version of stored payloads. Entries written under any other
/// version are treated as absent.
pub const SCHEMA_VERSION: u32 = 1;
