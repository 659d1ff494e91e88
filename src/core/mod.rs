//! Core data model shared by every engine component.

pub mod runner;
pub mod types;

pub use runner::Runner;
pub use types::{AnalysisResult, Metric, MetricResult, MetricType};
