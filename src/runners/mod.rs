//! Built-in runners.

pub mod line_count;

pub use line_count::LineCountRunner;
