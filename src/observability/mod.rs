//! Logging setup and crash context.
//!
//! - [`init_tracing`] installs the `tracing` subscriber used by the CLI
//! - [`context`] tracks the current phase and file per thread
//! - [`install_panic_hook`] prints that context when something panics
//!
//! Log output goes to stderr so `metricore worker` can keep stdout for
//! protocol frames.
//!
//! ## Usage
//!
//! ```no_run
//! use metricore::observability::{init_tracing, install_panic_hook};
//!
//! install_panic_hook();
//! init_tracing(1);
//! ```

pub mod context;
pub mod panic_hook;

pub use context::{
    get_current_context, get_progress, increment_processed, set_current_file, set_phase,
    set_progress, AnalysisContext, AnalysisPhase, ContextGuard,
};
pub use panic_hook::install_panic_hook;

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Environment variable holding an `EnvFilter` directive, e.g. `metricore=debug`.
pub const LOG_ENV: &str = "METRICORE_LOG";

/// Pure function mapping `-v` repetitions to a level
pub fn level_for_verbosity(verbosity: u8) -> Level {
    match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Install the global subscriber. `METRICORE_LOG` wins over `verbosity`.
///
/// Calling this twice is harmless; the second call is ignored.
pub fn init_tracing(verbosity: u8) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(level_for_verbosity(verbosity).as_str()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
