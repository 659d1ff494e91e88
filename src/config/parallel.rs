//! Parallelism configuration: strategy thresholds and the worker command.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

fn default_sequential_below_items() -> usize {
    8
}

fn default_process_pool_min_items() -> usize {
    64
}

fn default_heavy_item_cost() -> u64 {
    256 * 1024
}

fn default_isolate_item_cost() -> u64 {
    16 * 1024 * 1024
}

/// Cut-over points between execution strategies.
///
/// # Example
///
/// ```rust
/// use metricore::config::StrategyThresholds;
///
/// let thresholds = StrategyThresholds {
///     sequential_below_items: 4,
///     ..Default::default()
/// };
/// assert_eq!(thresholds.process_pool_min_items, 64);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyThresholds {
    /// Workloads with fewer items than this run sequentially (default: 8)
    #[serde(default = "default_sequential_below_items")]
    pub sequential_below_items: usize,

    /// Minimum item count before a process pool is considered (default: 64)
    #[serde(default = "default_process_pool_min_items")]
    pub process_pool_min_items: usize,

    /// Average per-item cost (bytes) that counts as heavy (default: 256 KiB)
    #[serde(default = "default_heavy_item_cost")]
    pub heavy_item_cost: u64,

    /// A single item at least this large (bytes) sends the run to the
    /// process pool, so it cannot take the engine down with it (default: 16 MiB)
    #[serde(default = "default_isolate_item_cost")]
    pub isolate_item_cost: u64,
}

impl Default for StrategyThresholds {
    fn default() -> Self {
        Self {
            sequential_below_items: default_sequential_below_items(),
            process_pool_min_items: default_process_pool_min_items(),
            heavy_item_cost: default_heavy_item_cost(),
            isolate_item_cost: default_isolate_item_cost(),
        }
    }
}

/// How to launch one process-pool worker.
///
/// The child must speak the worker protocol on stdin/stdout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerCommand {
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// The running executable's own `worker` subcommand.
    pub fn current_exe() -> Option<Self> {
        std::env::current_exe()
            .ok()
            .map(|program| Self::new(program).arg("worker"))
    }

    pub fn to_command(&self) -> std::process::Command {
        let mut command = std::process::Command::new(&self.program);
        command.args(&self.args);
        command
    }
}

/// Returns the number of available CPU cores.
pub fn available_workers() -> usize {
    num_cpus::get().max(1)
}
