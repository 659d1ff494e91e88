//! Engine configuration.
//!
//! [`EngineConfig`] is immutable once built. It is produced either by
//! [`EngineConfigBuilder`] or by [`loader::load_config`] from a
//! `metricore.toml` file, and validated exactly once in
//! [`EngineConfigBuilder::build`].
//!
//! # Example
//!
//! ```rust
//! use metricore::config::EngineConfig;
//! use std::time::Duration;
//!
//! let config = EngineConfig::builder()
//!     .max_workers(4)
//!     .batch_timeout(Duration::from_secs(10))
//!     .build()
//!     .unwrap();
//! assert_eq!(config.max_workers(), 4);
//! ```

pub mod loader;
pub mod parallel;

pub use loader::{discover_config, load_config, parse_config, CONFIG_FILE_NAME};
pub use parallel::{available_workers, StrategyThresholds, WorkerCommand};

use crate::cache::{CacheLocation, EvictionPolicy, StoreOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Errors produced while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for `{field}`: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

/// Cache-related settings.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheSettings {
    /// Explicit cache directory; resolved via [`CacheLocation`] when `None`.
    pub location: Option<PathBuf>,
    pub max_age: Option<Duration>,
    pub max_size_bytes: Option<u64>,
    pub max_entries: Option<usize>,
    pub sync_writes: bool,
    pub checkpoint_records: usize,
    /// How long to wait for another process using the same cache directory.
    pub lock_timeout: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        let policy = EvictionPolicy::default();
        Self {
            location: None,
            max_age: policy.max_age,
            max_size_bytes: policy.max_size_bytes,
            max_entries: policy.max_entries,
            sync_writes: false,
            checkpoint_records: 1024,
            lock_timeout: Duration::from_secs(30),
        }
    }
}

impl CacheSettings {
    pub fn resolve_location(&self) -> CacheLocation {
        CacheLocation::resolve(self.location.as_deref())
    }

    pub fn eviction_policy(&self) -> EvictionPolicy {
        EvictionPolicy {
            max_age: self.max_age,
            max_size_bytes: self.max_size_bytes,
            max_entries: self.max_entries,
        }
    }

    pub fn store_options(&self, directory: &Path) -> StoreOptions {
        StoreOptions::new(directory)
            .with_policy(self.eviction_policy())
            .with_sync_writes(self.sync_writes)
            .with_checkpoint_records(self.checkpoint_records)
            .with_lock_timeout(self.lock_timeout)
    }
}

/// Validated, immutable engine configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    max_workers: usize,
    thresholds: StrategyThresholds,
    batch_timeout: Duration,
    memory_ceiling_bytes: u64,
    memory_cost_factor: f64,
    cache: CacheSettings,
    bypass_optimized_path: bool,
    worker_command: Option<WorkerCommand>,
    pool_idle_timeout: Duration,
    emergency_breach_limit: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_workers: available_workers(),
            thresholds: StrategyThresholds::default(),
            batch_timeout: Duration::from_secs(60),
            memory_ceiling_bytes: 512 * 1024 * 1024,
            memory_cost_factor: 4.0,
            cache: CacheSettings::default(),
            bypass_optimized_path: false,
            worker_command: None,
            pool_idle_timeout: Duration::from_secs(30),
            emergency_breach_limit: 3,
        }
    }
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Builder pre-filled with this configuration.
    pub fn to_builder(&self) -> EngineConfigBuilder {
        EngineConfigBuilder {
            config: self.clone(),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn thresholds(&self) -> &StrategyThresholds {
        &self.thresholds
    }

    pub fn batch_timeout(&self) -> Duration {
        self.batch_timeout
    }

    pub fn memory_ceiling_bytes(&self) -> u64 {
        self.memory_ceiling_bytes
    }

    pub fn memory_cost_factor(&self) -> f64 {
        self.memory_cost_factor
    }

    pub fn cache(&self) -> &CacheSettings {
        &self.cache
    }

    pub fn bypass_optimized_path(&self) -> bool {
        self.bypass_optimized_path
    }

    /// Command for process-pool workers; `None` disables the process pool.
    pub fn worker_command(&self) -> Option<&WorkerCommand> {
        self.worker_command.as_ref()
    }

    pub fn pool_idle_timeout(&self) -> Duration {
        self.pool_idle_timeout
    }

    pub fn emergency_breach_limit(&self) -> u32 {
        self.emergency_breach_limit
    }
}

/// Builder for [`EngineConfig`].
#[derive(Debug, Clone, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn max_workers(mut self, workers: usize) -> Self {
        self.config.max_workers = workers;
        self
    }

    pub fn thresholds(mut self, thresholds: StrategyThresholds) -> Self {
        self.config.thresholds = thresholds;
        self
    }

    pub fn batch_timeout(mut self, timeout: Duration) -> Self {
        self.config.batch_timeout = timeout;
        self
    }

    pub fn memory_ceiling_bytes(mut self, bytes: u64) -> Self {
        self.config.memory_ceiling_bytes = bytes;
        self
    }

    pub fn memory_cost_factor(mut self, factor: f64) -> Self {
        self.config.memory_cost_factor = factor;
        self
    }

    pub fn cache(mut self, cache: CacheSettings) -> Self {
        self.config.cache = cache;
        self
    }

    pub fn cache_location(mut self, location: impl Into<PathBuf>) -> Self {
        self.config.cache.location = Some(location.into());
        self
    }

    pub fn cache_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.config.cache.max_age = max_age;
        self
    }

    pub fn cache_max_size(mut self, bytes: Option<u64>) -> Self {
        self.config.cache.max_size_bytes = bytes;
        self
    }

    pub fn cache_max_entries(mut self, entries: Option<usize>) -> Self {
        self.config.cache.max_entries = entries;
        self
    }

    pub fn sync_writes(mut self, sync: bool) -> Self {
        self.config.cache.sync_writes = sync;
        self
    }

    pub fn journal_checkpoint_records(mut self, records: usize) -> Self {
        self.config.cache.checkpoint_records = records;
        self
    }

    pub fn cache_lock_timeout(mut self, timeout: Duration) -> Self {
        self.config.cache.lock_timeout = timeout;
        self
    }

    pub fn bypass_optimized_path(mut self, bypass: bool) -> Self {
        self.config.bypass_optimized_path = bypass;
        self
    }

    pub fn worker_command(mut self, command: Option<WorkerCommand>) -> Self {
        self.config.worker_command = command;
        self
    }

    /// Use `command` only if no worker command has been set yet.
    pub fn worker_command_or(mut self, command: Option<WorkerCommand>) -> Self {
        if self.config.worker_command.is_none() {
            self.config.worker_command = command;
        }
        self
    }

    pub fn pool_idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.pool_idle_timeout = timeout;
        self
    }

    pub fn emergency_breach_limit(mut self, limit: u32) -> Self {
        self.config.emergency_breach_limit = limit;
        self
    }

    /// Validate and freeze the configuration.
    pub fn build(self) -> Result<EngineConfig, ConfigError> {
        let config = self.config;

        if config.max_workers == 0 {
            return Err(ConfigError::invalid("max_workers", "must be at least 1"));
        }
        if config.batch_timeout.is_zero() {
            return Err(ConfigError::invalid("batch_timeout", "must be non-zero"));
        }
        if config.memory_ceiling_bytes == 0 {
            return Err(ConfigError::invalid("memory_ceiling_bytes", "must be non-zero"));
        }
        if !config.memory_cost_factor.is_finite() || config.memory_cost_factor <= 0.0 {
            return Err(ConfigError::invalid(
                "memory_cost_factor",
                format!("must be a positive number, got {}", config.memory_cost_factor),
            ));
        }
        if config.emergency_breach_limit == 0 {
            return Err(ConfigError::invalid("emergency_breach_limit", "must be at least 1"));
        }
        if config.cache.checkpoint_records == 0 {
            return Err(ConfigError::invalid(
                "journal_checkpoint_records",
                "must be at least 1",
            ));
        }
        if config.thresholds.heavy_item_cost == 0 {
            return Err(ConfigError::invalid("heavy_item_cost", "must be non-zero"));
        }
        if config.thresholds.isolate_item_cost == 0 {
            return Err(ConfigError::invalid("isolate_item_cost", "must be non-zero"));
        }
        if let Some(command) = &config.worker_command {
            if command.program.as_os_str().is_empty() {
                return Err(ConfigError::invalid("worker_command", "program is empty"));
            }
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::builder().build().unwrap();
        assert!(config.max_workers() >= 1);
        assert_eq!(config.batch_timeout(), Duration::from_secs(60));
        assert!(!config.bypass_optimized_path());
        assert!(config.worker_command().is_none());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let err = EngineConfig::builder().max_workers(0).build().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "max_workers", .. }));
    }

    #[test]
    fn test_invalid_cost_factor_rejected() {
        for factor in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(EngineConfig::builder().memory_cost_factor(factor).build().is_err());
        }
    }

    #[test]
    fn test_zero_timeout_rejected() {
        assert!(EngineConfig::builder()
            .batch_timeout(Duration::ZERO)
            .build()
            .is_err());
    }

    #[test]
    fn test_to_builder_preserves_values() {
        let config = EngineConfig::builder()
            .max_workers(3)
            .cache_location("/tmp/x")
            .build()
            .unwrap();
        let rebuilt = config.to_builder().bypass_optimized_path(true).build().unwrap();
        assert_eq!(rebuilt.max_workers(), 3);
        assert_eq!(rebuilt.cache().location, Some(PathBuf::from("/tmp/x")));
        assert!(rebuilt.bypass_optimized_path());
    }

    #[test]
    fn test_cache_settings_policy() {
        let settings = CacheSettings {
            max_entries: Some(5),
            ..Default::default()
        };
        assert_eq!(settings.eviction_policy().max_entries, Some(5));
        let options = settings.store_options(Path::new("/tmp/cache"));
        assert_eq!(options.directory, PathBuf::from("/tmp/cache"));
        assert_eq!(options.checkpoint_records, 1024);
        assert_eq!(options.lock_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_worker_command_or_keeps_explicit_command() {
        let explicit = WorkerCommand::new("/opt/worker").arg("serve");
        let config = EngineConfig::builder()
            .worker_command(Some(explicit.clone()))
            .worker_command_or(Some(WorkerCommand::new("/bin/fallback")))
            .build()
            .unwrap();
        assert_eq!(config.worker_command(), Some(&explicit));

        let config = EngineConfig::builder()
            .worker_command_or(Some(WorkerCommand::new("/bin/fallback")))
            .build()
            .unwrap();
        assert_eq!(
            config.worker_command().map(|c| c.program.clone()),
            Some(PathBuf::from("/bin/fallback"))
        );
    }
}
