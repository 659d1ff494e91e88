//! Balanced batch planning.
//!
//! Work items are packed into `k` batches with the longest-processing-time
//! first heuristic: heaviest item first, always onto the least-loaded batch.
//! Whatever the input order, the resulting skew (heaviest batch minus
//! lightest batch) never exceeds the single heaviest item.
//!
//! # Example
//!
//! ```rust
//! use metricore::fingerprint::CacheKey;
//! use metricore::planner::{plan_batches, WorkItem};
//!
//! let items = vec![
//!     WorkItem::new(0, "a.py", CacheKey::from_bytes([0; 32]), 10),
//!     WorkItem::new(1, "b.py", CacheKey::from_bytes([1; 32]), 500),
//!     WorkItem::new(2, "c.py", CacheKey::from_bytes([2; 32]), 10),
//! ];
//! let batches = plan_batches(items, 2);
//! assert_eq!(batches[0].total_cost, 500);
//! assert_eq!(batches[1].total_cost, 20);
//! ```

use crate::fingerprint::CacheKey;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::path::PathBuf;

/// One pending file analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    /// Position of the (first) input file this item answers for.
    pub index: usize,
    pub file_path: PathBuf,
    pub cache_key: CacheKey,
    /// Cheap cost proxy: content size in bytes, at least 1.
    pub estimated_cost: u64,
    /// Higher runs earlier among equal-cost items.
    pub priority: i32,
}

impl WorkItem {
    pub fn new(
        index: usize,
        file_path: impl Into<PathBuf>,
        cache_key: CacheKey,
        content_len: u64,
    ) -> Self {
        Self {
            index,
            file_path: file_path.into(),
            cache_key,
            estimated_cost: estimate_cost(content_len),
            priority: 0,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Cost proxy for `content_len` bytes.
pub fn estimate_cost(content_len: u64) -> u64 {
    content_len.max(1)
}

/// Items assigned to one worker, in execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub id: usize,
    pub items: Vec<WorkItem>,
    pub total_cost: u64,
}

impl Batch {
    pub fn new(id: usize, items: Vec<WorkItem>) -> Self {
        let total_cost = items.iter().map(|i| i.estimated_cost).sum();
        Self {
            id,
            items,
            total_cost,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Split into two cost-balanced halves. A single-item batch is returned
    /// unchanged.
    pub fn split(self) -> Vec<Batch> {
        if self.items.len() < 2 {
            return vec![self];
        }
        let id = self.id;
        plan_batches(self.items, 2)
            .into_iter()
            .map(|mut batch| {
                batch.id = id;
                batch
            })
            .collect()
    }

    /// One batch per item.
    pub fn singles(self) -> Vec<Batch> {
        let id = self.id;
        self.items
            .into_iter()
            .map(|item| Batch::new(id, vec![item]))
            .collect()
    }
}

/// Ordering used to place items: cost descending, priority descending, then
/// input index ascending.
fn placement_order(a: &WorkItem, b: &WorkItem) -> Ordering {
    b.estimated_cost
        .cmp(&a.estimated_cost)
        .then_with(|| b.priority.cmp(&a.priority))
        .then_with(|| a.index.cmp(&b.index))
}

/// Partition `items` into at most `k` batches minimizing the heaviest batch.
///
/// `k == 0` is treated as 1, empty input yields no batches, and `k > n`
/// yields `n` single-item batches.
pub fn plan_batches(mut items: Vec<WorkItem>, k: usize) -> Vec<Batch> {
    if items.is_empty() {
        return Vec::new();
    }
    let bins = k.max(1).min(items.len());
    items.sort_by(placement_order);

    let mut assigned: Vec<Vec<WorkItem>> = (0..bins).map(|_| Vec::new()).collect();
    let mut loads: BinaryHeap<Reverse<(u64, usize)>> =
        (0..bins).map(|bin| Reverse((0u64, bin))).collect();

    for item in items {
        let Some(Reverse((load, bin))) = loads.pop() else {
            break;
        };
        let load = load.saturating_add(item.estimated_cost);
        assigned[bin].push(item);
        loads.push(Reverse((load, bin)));
    }

    assigned
        .into_iter()
        .enumerate()
        .map(|(id, items)| Batch::new(id, items))
        .collect()
}

/// Heaviest batch cost minus lightest batch cost.
pub fn batch_skew(batches: &[Batch]) -> u64 {
    let max = batches.iter().map(|b| b.total_cost).max().unwrap_or(0);
    let min = batches.iter().map(|b| b.total_cost).min().unwrap_or(0);
    max - min
}
