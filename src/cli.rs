use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// One line per file plus a summary
    Text,
    /// The full run, including the report, as JSON
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "metricore")]
#[command(about = "Adaptive parallel code-metric analysis with a content-addressed cache", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Increase verbosity level (can be repeated: -v, -vv, -vvv)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbosity: u8,

    /// Configuration file (defaults to the nearest metricore.toml)
    #[arg(long, global = true, env = "METRICORE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Cache directory (overrides config and METRICORE_CACHE_DIR)
    #[arg(long = "cache-dir", global = true)]
    pub cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Analyze files and directories
    Analyze {
        /// Files or directories to analyze
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Only collect files with these extensions from directories
        #[arg(long = "ext", value_delimiter = ',')]
        extensions: Vec<String>,

        /// Number of parallel workers (defaults to CPU count)
        #[arg(short = 'j', long = "jobs")]
        jobs: Option<usize>,

        /// Per-batch deadline in seconds
        #[arg(long = "timeout")]
        timeout_secs: Option<u64>,

        /// Skip cache and pools; analyze each file inline
        #[arg(long = "bypass")]
        bypass: bool,

        /// Never spawn worker processes
        #[arg(long = "no-process-pool")]
        no_process_pool: bool,
    },

    /// Inspect or maintain the result cache
    Cache {
        #[command(subcommand)]
        action: CacheCommand,
    },

    /// Write a default metricore.toml into the current directory
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Serve analysis batches on stdin/stdout for a parent process
    #[command(hide = true)]
    Worker,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum CacheCommand {
    /// Show entry count, size and journal state
    Stats {
        #[arg(long)]
        json: bool,
    },
    /// List entries, most recently used first
    List {
        /// Show at most this many entries
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        #[arg(long)]
        json: bool,
    },
    /// Remove one entry by its hex key
    Evict { key: String },
    /// Apply the eviction policy now
    Prune,
    /// Remove every entry
    Clear,
    /// Print the resolved cache directory
    Path,
}
