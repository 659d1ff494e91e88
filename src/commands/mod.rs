//! CLI command implementations.
//!
//! Available commands:
//! - **analyze**: run the engine over files and directories
//! - **cache**: inspect and maintain the result cache
//! - **init**: write a starter `metricore.toml`
//! - **worker**: serve batches for a parent process pool (internal)

pub mod analyze;
pub mod cache;
pub mod init;
pub mod worker;

pub use analyze::{discover_files, handle_analyze, AnalyzeOptions};
pub use cache::{handle_cache, CacheAction};
pub use init::init_config;
pub use worker::run_worker;
