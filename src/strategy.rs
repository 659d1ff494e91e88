//! Execution strategy selection.
//!
//! A single pure function maps a [`WorkloadProfile`] to an
//! [`ExecutionStrategy`]; the coordinator calls it once per run.

use crate::config::StrategyThresholds;
use crate::planner::WorkItem;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    Sequential,
    ThreadPool,
    ProcessPool,
}

impl fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sequential => "sequential",
            Self::ThreadPool => "thread_pool",
            Self::ProcessPool => "process_pool",
        })
    }
}

/// Shape of the pending work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkloadProfile {
    pub item_count: usize,
    pub total_cost: u64,
    pub max_item_cost: u64,
    pub available_parallelism: usize,
    pub process_pool_available: bool,
}

impl WorkloadProfile {
    pub fn from_items(
        items: &[WorkItem],
        available_parallelism: usize,
        process_pool_available: bool,
    ) -> Self {
        Self {
            item_count: items.len(),
            total_cost: items.iter().map(|i| i.estimated_cost).sum(),
            max_item_cost: items.iter().map(|i| i.estimated_cost).max().unwrap_or(0),
            available_parallelism,
            process_pool_available,
        }
    }

    pub fn average_cost(&self) -> u64 {
        if self.item_count == 0 {
            0
        } else {
            self.total_cost / self.item_count as u64
        }
    }
}

/// Pure function to choose how to execute `profile`
///
/// A run is sent to the process pool when its work is heavy on average, or
/// when a single item is large enough to be worth isolating from the engine.
pub fn select_strategy(
    profile: &WorkloadProfile,
    thresholds: &StrategyThresholds,
) -> ExecutionStrategy {
    if profile.item_count < thresholds.sequential_below_items
        || profile.available_parallelism <= 1
    {
        return ExecutionStrategy::Sequential;
    }

    let heavy = profile.average_cost() >= thresholds.heavy_item_cost
        && profile.item_count >= thresholds.process_pool_min_items;
    let oversized = profile.max_item_cost >= thresholds.isolate_item_cost;
    if (heavy || oversized) && profile.process_pool_available {
        ExecutionStrategy::ProcessPool
    } else {
        ExecutionStrategy::ThreadPool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(items: usize, avg_cost: u64, parallelism: usize, process: bool) -> WorkloadProfile {
        WorkloadProfile {
            item_count: items,
            total_cost: avg_cost * items as u64,
            max_item_cost: avg_cost,
            available_parallelism: parallelism,
            process_pool_available: process,
        }
    }

    #[test]
    fn test_small_workload_is_sequential() {
        let t = StrategyThresholds::default();
        assert_eq!(select_strategy(&profile(3, 10, 8, true), &t), ExecutionStrategy::Sequential);
        assert_eq!(select_strategy(&profile(0, 0, 8, true), &t), ExecutionStrategy::Sequential);
    }

    #[test]
    fn test_single_core_is_sequential() {
        let t = StrategyThresholds::default();
        assert_eq!(
            select_strategy(&profile(1000, 1 << 20, 1, true), &t),
            ExecutionStrategy::Sequential
        );
    }

    #[test]
    fn test_light_work_uses_threads() {
        let t = StrategyThresholds::default();
        assert_eq!(select_strategy(&profile(100, 1024, 8, true), &t), ExecutionStrategy::ThreadPool);
    }

    #[test]
    fn test_heavy_work_uses_processes_when_available() {
        let t = StrategyThresholds::default();
        let heavy = profile(100, 512 * 1024, 8, true);
        assert_eq!(select_strategy(&heavy, &t), ExecutionStrategy::ProcessPool);

        let no_pool = WorkloadProfile {
            process_pool_available: false,
            ..heavy
        };
        assert_eq!(select_strategy(&no_pool, &t), ExecutionStrategy::ThreadPool);
    }

    #[test]
    fn test_one_oversized_item_uses_processes() {
        let t = StrategyThresholds::default();
        let mut mixed = profile(20, 1024, 8, true);
        mixed.max_item_cost = 32 * 1024 * 1024;
        mixed.total_cost += mixed.max_item_cost;
        assert_eq!(select_strategy(&mixed, &t), ExecutionStrategy::ProcessPool);

        let no_pool = WorkloadProfile {
            process_pool_available: false,
            ..mixed
        };
        assert_eq!(select_strategy(&no_pool, &t), ExecutionStrategy::ThreadPool);

        let few = WorkloadProfile {
            item_count: 2,
            ..mixed
        };
        assert_eq!(select_strategy(&few, &t), ExecutionStrategy::Sequential);
    }

    #[test]
    fn test_heavy_but_few_items_uses_threads() {
        let t = StrategyThresholds::default();
        assert_eq!(
            select_strategy(&profile(20, 512 * 1024, 8, true), &t),
            ExecutionStrategy::ThreadPool
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(ExecutionStrategy::ProcessPool.to_string(), "process_pool");
    }
}
