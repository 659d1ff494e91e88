//! metricore: an adaptive parallel analysis engine with a content-addressed
//! result cache.
//!
//! The engine runs a caller-supplied [`Runner`] over a set of files. Results
//! are keyed by content and analyzer version, so unchanged files are never
//! analyzed twice, and work that remains is spread across a sequential lane,
//! a thread pool or a process pool depending on its size and shape.
//!
//! Start with [`Coordinator`].

pub mod cache;
pub mod cli;
pub mod commands;
pub mod config;
pub mod coordinator;
pub mod core;
pub mod errors;
pub mod fingerprint;
pub mod incremental;
pub mod memory;
pub mod observability;
pub mod planner;
pub mod pool;
pub mod runners;
pub mod strategy;

pub use crate::cache::{CacheError, CacheStats, CacheStore, EvictionPolicy, StoreOptions};
pub use crate::config::{EngineConfig, EngineConfigBuilder, StrategyThresholds, WorkerCommand};
pub use crate::coordinator::{
    AnalysisRun, CancellationToken, Coordinator, DegradationEvent, RunReport,
};
pub use crate::core::{AnalysisResult, Metric, MetricResult, MetricType, Runner};
pub use crate::errors::{AnalysisError, EngineError, ErrorKind};
pub use crate::fingerprint::{compute_fingerprint, CacheKey, FileFingerprint};
pub use crate::planner::{plan_batches, Batch, WorkItem};
pub use crate::strategy::{select_strategy, ExecutionStrategy, WorkloadProfile};
