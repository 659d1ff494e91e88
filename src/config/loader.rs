//! Loading `metricore.toml`.
//!
//! ```toml
//! [engine]
//! max_workers = 4
//! batch_timeout_ms = 30000
//! memory_ceiling_bytes = 268435456
//! memory_cost_factor = 4.0
//! pool_idle_timeout_ms = 30000
//! emergency_breach_limit = 3
//!
//! [engine.thresholds]
//! sequential_below_items = 8
//! process_pool_min_items = 64
//! heavy_item_cost = 262144
//! isolate_item_cost = 16777216
//!
//! [engine.cache]
//! location = "/var/cache/metricore"
//! max_age_days = 30
//! max_size_bytes = 536870912
//! max_entries = 100000
//! sync_writes = false
//! checkpoint_records = 1024
//! lock_timeout_ms = 30000
//!
//! [engine.worker]
//! program = "/usr/local/bin/metricore"
//! args = ["worker"]
//! ```

use super::{ConfigError, EngineConfig, EngineConfigBuilder, StrategyThresholds, WorkerCommand};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "metricore.toml";

const MAX_TRAVERSAL_DEPTH: usize = 10;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    engine: EngineSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct EngineSection {
    max_workers: Option<usize>,
    batch_timeout_ms: Option<u64>,
    memory_ceiling_bytes: Option<u64>,
    memory_cost_factor: Option<f64>,
    bypass_optimized_path: Option<bool>,
    pool_idle_timeout_ms: Option<u64>,
    emergency_breach_limit: Option<u32>,
    thresholds: Option<StrategyThresholds>,
    #[serde(default)]
    cache: CacheSection,
    worker: Option<WorkerCommand>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct CacheSection {
    location: Option<PathBuf>,
    max_age_days: Option<u64>,
    max_size_bytes: Option<u64>,
    max_entries: Option<usize>,
    sync_writes: Option<bool>,
    checkpoint_records: Option<usize>,
    lock_timeout_ms: Option<u64>,
}

/// Pure function to apply a parsed file on top of a builder
fn apply_file(file: ConfigFile, mut builder: EngineConfigBuilder) -> EngineConfigBuilder {
    let engine = file.engine;

    if let Some(workers) = engine.max_workers {
        builder = builder.max_workers(workers);
    }
    if let Some(ms) = engine.batch_timeout_ms {
        builder = builder.batch_timeout(Duration::from_millis(ms));
    }
    if let Some(bytes) = engine.memory_ceiling_bytes {
        builder = builder.memory_ceiling_bytes(bytes);
    }
    if let Some(factor) = engine.memory_cost_factor {
        builder = builder.memory_cost_factor(factor);
    }
    if let Some(bypass) = engine.bypass_optimized_path {
        builder = builder.bypass_optimized_path(bypass);
    }
    if let Some(ms) = engine.pool_idle_timeout_ms {
        builder = builder.pool_idle_timeout(Duration::from_millis(ms));
    }
    if let Some(limit) = engine.emergency_breach_limit {
        builder = builder.emergency_breach_limit(limit);
    }
    if let Some(thresholds) = engine.thresholds {
        builder = builder.thresholds(thresholds);
    }
    if let Some(worker) = engine.worker {
        builder = builder.worker_command(Some(worker));
    }

    let cache = engine.cache;
    if let Some(location) = cache.location {
        builder = builder.cache_location(location);
    }
    if let Some(days) = cache.max_age_days {
        builder = builder.cache_max_age(Some(Duration::from_secs(days * 86_400)));
    }
    if let Some(bytes) = cache.max_size_bytes {
        builder = builder.cache_max_size(Some(bytes));
    }
    if let Some(entries) = cache.max_entries {
        builder = builder.cache_max_entries(Some(entries));
    }
    if let Some(sync) = cache.sync_writes {
        builder = builder.sync_writes(sync);
    }
    if let Some(records) = cache.checkpoint_records {
        builder = builder.journal_checkpoint_records(records);
    }
    if let Some(ms) = cache.lock_timeout_ms {
        builder = builder.cache_lock_timeout(Duration::from_millis(ms));
    }

    builder
}

/// Parse TOML contents into a builder over the defaults.
///
/// `origin` is only used in error messages.
pub fn parse_config(contents: &str, origin: &Path) -> Result<EngineConfigBuilder, ConfigError> {
    let file: ConfigFile = toml::from_str(contents).map_err(|e| ConfigError::Parse {
        path: origin.to_path_buf(),
        message: e.message().to_string(),
    })?;
    Ok(apply_file(file, EngineConfig::builder()))
}

/// Pure function to generate directory ancestors up to a depth limit
pub(crate) fn directory_ancestors(
    start: PathBuf,
    max_depth: usize,
) -> impl Iterator<Item = PathBuf> {
    std::iter::successors(Some(start), |dir| {
        let mut parent = dir.clone();
        if parent.pop() {
            Some(parent)
        } else {
            None
        }
    })
    .take(max_depth)
}

/// Find the nearest `metricore.toml` at or above `start`.
pub fn discover_config(start: &Path) -> Option<PathBuf> {
    directory_ancestors(start.to_path_buf(), MAX_TRAVERSAL_DEPTH)
        .map(|dir| dir.join(CONFIG_FILE_NAME))
        .find(|path| path.is_file())
}

/// Load configuration.
///
/// An explicit path must exist. Otherwise the nearest `metricore.toml`
/// above the current directory is used, falling back to defaults.
pub fn load_config(explicit: Option<&Path>) -> Result<EngineConfigBuilder, ConfigError> {
    let path = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => std::env::current_dir()
            .ok()
            .and_then(|cwd| discover_config(&cwd)),
    };

    let Some(path) = path else {
        tracing::debug!(
            "No {} found after checking {} directories, using defaults",
            CONFIG_FILE_NAME,
            MAX_TRAVERSAL_DEPTH
        );
        return Ok(EngineConfig::builder());
    };

    let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
        path: path.clone(),
        source,
    })?;
    let builder = parse_config(&contents, &path)?;
    tracing::debug!(path = %path.display(), "Loaded config");
    Ok(builder)
}
