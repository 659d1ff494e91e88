// Test utility module for metricore integration tests
#![allow(dead_code)]

use metricore::cache::{CacheStore, StoreOptions};
use metricore::config::EngineConfig;
use metricore::coordinator::Coordinator;
use metricore::core::{MetricResult, Runner};
use metricore::errors::AnalysisError;
use metricore::runners::LineCountRunner;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Line counting with a call counter and an optional per-file delay.
pub struct CountingRunner {
    pub calls: AtomicUsize,
    pub delay: Option<Duration>,
    seen: Mutex<Vec<PathBuf>>,
}

impl CountingRunner {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay: None,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<PathBuf> {
        self.seen.lock().unwrap().clone()
    }
}

impl Runner for CountingRunner {
    fn name(&self) -> &str {
        "counting"
    }

    fn version(&self) -> &str {
        "1"
    }

    fn analyze(&self, path: &Path, content: &[u8]) -> Result<MetricResult, AnalysisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(path.to_path_buf());
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        LineCountRunner.analyze(path, content)
    }

    fn structural_digest(
        &self,
        path: &Path,
        content: &[u8],
    ) -> Result<Option<Vec<u8>>, AnalysisError> {
        LineCountRunner.structural_digest(path, content)
    }
}

/// Sleeps for `slow` on files whose name contains `marker`.
pub struct SlowRunner {
    pub marker: String,
    pub slow: Duration,
    pub calls: AtomicUsize,
}

impl SlowRunner {
    pub fn new(marker: &str, slow: Duration) -> Self {
        Self {
            marker: marker.to_string(),
            slow,
            calls: AtomicUsize::new(0),
        }
    }
}

impl Runner for SlowRunner {
    fn name(&self) -> &str {
        "slow"
    }

    fn version(&self) -> &str {
        "1"
    }

    fn analyze(&self, path: &Path, content: &[u8]) -> Result<MetricResult, AnalysisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if path.to_string_lossy().contains(&self.marker) {
            std::thread::sleep(self.slow);
        }
        LineCountRunner.analyze(path, content)
    }
}

/// Panics on files whose name contains `marker`.
pub struct PanickingRunner {
    pub marker: String,
}

impl Runner for PanickingRunner {
    fn name(&self) -> &str {
        "panicking"
    }

    fn version(&self) -> &str {
        "1"
    }

    fn analyze(&self, path: &Path, content: &[u8]) -> Result<MetricResult, AnalysisError> {
        if path.to_string_lossy().contains(&self.marker) {
            panic!("runner exploded on {}", path.display());
        }
        LineCountRunner.analyze(path, content)
    }
}

/// Reports a parse error for the listed file names.
pub struct FailingRunner {
    pub failing: HashSet<String>,
}

impl FailingRunner {
    pub fn new(names: &[&str]) -> Self {
        Self {
            failing: names.iter().map(|n| n.to_string()).collect(),
        }
    }
}

impl Runner for FailingRunner {
    fn name(&self) -> &str {
        "failing"
    }

    fn version(&self) -> &str {
        "1"
    }

    fn analyze(&self, path: &Path, content: &[u8]) -> Result<MetricResult, AnalysisError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if self.failing.contains(&name) {
            return Err(AnalysisError::parse(path, "rejected by test runner"));
        }
        LineCountRunner.analyze(path, content)
    }
}

/// Write `files` into a fresh project directory, returning paths in order.
pub fn create_test_project(files: &[(&str, &str)]) -> (TempDir, Vec<PathBuf>) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let paths = files
        .iter()
        .map(|(name, content)| {
            let path = dir.path().join(name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).expect("Failed to create directory");
            }
            std::fs::write(&path, content).expect("Failed to write test file");
            path
        })
        .collect();
    (dir, paths)
}

/// `count` distinct small Python-ish files.
pub fn numbered_files(count: usize) -> Vec<(String, String)> {
    (0..count)
        .map(|i| {
            let body = format!("# module {i}\n").repeat(1 + i % 3) + &"x = 1\n".repeat(1 + i % 5);
            (format!("mod_{i:03}.py"), body)
        })
        .collect()
}

pub fn create_numbered_project(count: usize) -> (TempDir, Vec<PathBuf>) {
    let files = numbered_files(count);
    let refs: Vec<(&str, &str)> = files
        .iter()
        .map(|(n, c)| (n.as_str(), c.as_str()))
        .collect();
    create_test_project(&refs)
}

/// Engine over a store in `cache_dir`, with no process pool.
pub fn thread_engine(
    cache_dir: &Path,
    runner: Arc<dyn Runner>,
    configure: impl FnOnce(metricore::config::EngineConfigBuilder) -> metricore::config::EngineConfigBuilder,
) -> Coordinator {
    let config = configure(EngineConfig::builder().worker_command(None))
        .build()
        .expect("valid config");
    let store = CacheStore::open(StoreOptions::new(cache_dir)).expect("open store");
    Coordinator::with_store(config, runner, store).expect("engine")
}

/// `(path, metrics)` pairs, ignoring provenance.
pub fn outcomes(run: &metricore::AnalysisRun) -> Vec<(PathBuf, Option<MetricResult>)> {
    run.results
        .iter()
        .map(|r| (r.file_path.clone(), r.metrics().cloned()))
        .collect()
}
