mod common;

use common::{
    create_numbered_project, create_test_project, outcomes, thread_engine, CountingRunner,
    FailingRunner, PanickingRunner, SlowRunner,
};
use metricore::cache::{CacheStore, StoreOptions};
use metricore::config::{EngineConfig, StrategyThresholds};
use metricore::coordinator::{CancellationToken, Coordinator, DegradationEvent};
use metricore::core::{MetricResult, MetricType, Runner};
use metricore::errors::{AnalysisError, ErrorKind};
use metricore::runners::LineCountRunner;
use metricore::strategy::ExecutionStrategy;
use pretty_assertions::assert_eq;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn sequential_thresholds() -> StrategyThresholds {
    StrategyThresholds {
        sequential_below_items: usize::MAX,
        ..StrategyThresholds::default()
    }
}

#[test]
fn test_modified_file_is_the_only_miss() {
    let (project, files) = create_test_project(&[
        ("x.py", "import os\nprint(os.name)\n"),
        ("y.py", "def f():\n    return 1\n"),
        ("z.py", "VALUE = 1\n"),
    ]);
    let cache = TempDir::new().unwrap();
    let runner = Arc::new(CountingRunner::new());

    let mut engine = thread_engine(cache.path(), runner.clone(), |b| b);
    engine.analyze(&files);
    std::fs::write(project.path().join("z.py"), "VALUE = 2\nOTHER = 3\n").unwrap();
    let run = engine.analyze(&files);

    assert_eq!(run.report.cache_hits, 2);
    assert_eq!(run.report.misses, 1);
    assert_eq!(run.report.entries_written, 1);
    assert_eq!(engine.store().stats().entries, 4);
    assert_eq!(
        run.results[2]
            .metrics()
            .and_then(|m| m.file_value(MetricType::LinesOfCode)),
        Some(2.0)
    );
}

#[test]
fn test_trailing_whitespace_change_reuses_structural_result() {
    let (project, files) = create_test_project(&[("a.py", "x = 1\ny = 2\n")]);
    let cache = TempDir::new().unwrap();
    let runner = Arc::new(CountingRunner::new());

    let mut engine = thread_engine(cache.path(), runner.clone(), |b| b);
    let first = engine.analyze(&files);
    std::fs::write(project.path().join("a.py"), "x = 1   \r\ny = 2\t\r\n").unwrap();
    let second = engine.analyze(&files);

    assert_eq!(runner.calls(), 1);
    assert_eq!(second.report.structural_reuses, 1);
    assert!(second.results[0].from_cache);
    assert_eq!(first.results[0].metrics(), second.results[0].metrics());

    // The reused result was re-keyed under the new content.
    let third = engine.analyze(&files);
    assert_eq!(third.report.cache_hits, 1);
}

#[test]
fn test_thread_pool_results_match_bypass() {
    let (_project, files) = create_numbered_project(40);
    let cache = TempDir::new().unwrap();

    let mut optimized = thread_engine(cache.path(), Arc::new(LineCountRunner::new()), |b| {
        b.max_workers(4)
    });
    let run = optimized.analyze(&files);
    assert_eq!(run.report.strategy, Some(ExecutionStrategy::ThreadPool));

    let bypass_cache = TempDir::new().unwrap();
    let mut naive = thread_engine(bypass_cache.path(), Arc::new(LineCountRunner::new()), |b| {
        b.bypass_optimized_path(true)
    });
    let expected = naive.analyze(&files);

    assert_eq!(outcomes(&run), outcomes(&expected));
    assert_eq!(optimized.pool_stats().thread_pools_created, 1);
}

#[test]
fn test_results_survive_reopen() {
    let (_project, files) = create_numbered_project(12);
    let cache = TempDir::new().unwrap();
    let runner = Arc::new(CountingRunner::new());

    let mut engine = thread_engine(cache.path(), runner.clone(), |b| b);
    let first = engine.analyze(&files);
    engine.close().unwrap();

    let mut reopened = thread_engine(cache.path(), runner.clone(), |b| b);
    let second = reopened.analyze(&files);

    assert_eq!(runner.calls(), 12);
    assert_eq!(second.report.cache_hits, 12);
    assert_eq!(outcomes(&first), outcomes(&second));
}

#[test]
fn test_runner_error_fails_one_file_without_retry() {
    let (_project, files) = create_test_project(&[
        ("good.py", "a = 1\n"),
        ("bad.py", "b = 2\n"),
        ("fine.py", "c = 3\n"),
    ]);
    let cache = TempDir::new().unwrap();

    let mut engine = thread_engine(cache.path(), Arc::new(FailingRunner::new(&["bad.py"])), |b| b);
    let run = engine.analyze(&files);

    assert!(run.results[0].is_ok());
    assert_eq!(run.results[1].error().map(|e| e.kind()), Some(ErrorKind::Parse));
    assert!(run.results[2].is_ok());
    assert_eq!(run.report.failed_batches, 0);
    assert_eq!(run.report.entries_written, 2);
}

#[test]
fn test_panicking_runner_is_retried_then_reported() {
    let (_project, files) = create_numbered_project(20);
    let cache = TempDir::new().unwrap();
    let runner = Arc::new(PanickingRunner {
        marker: "mod_007".to_string(),
    });

    let mut engine = thread_engine(cache.path(), runner, |b| b.max_workers(4));
    let run = engine.analyze(&files);

    assert_eq!(run.results.len(), 20);
    assert_eq!(
        run.results[7].error().map(|e| e.kind()),
        Some(ErrorKind::WorkerCrash)
    );
    assert!(run.report.fallback_retries >= 1);
    assert!(run.report.events.iter().any(|e| matches!(
        e,
        DegradationEvent::BatchFallback {
            cause: ErrorKind::WorkerCrash,
            ..
        }
    )));
    let failed: Vec<_> = run.failures().map(|r| r.file_path.clone()).collect();
    assert_eq!(failed, vec![files[7].clone()]);
    assert_eq!(run.report.entries_written, 19);
}

/// Slow on its first call only.
struct FlakyRunner {
    first: AtomicBool,
    delay: Duration,
}

impl Runner for FlakyRunner {
    fn name(&self) -> &str {
        "flaky"
    }

    fn version(&self) -> &str {
        "1"
    }

    fn analyze(&self, path: &Path, content: &[u8]) -> Result<MetricResult, AnalysisError> {
        if self.first.swap(false, Ordering::SeqCst) {
            std::thread::sleep(self.delay);
        }
        LineCountRunner.analyze(path, content)
    }
}

#[test]
fn test_timed_out_batch_succeeds_on_sequential_retry() {
    let (_project, files) = create_test_project(&[("only.py", "a = 1\n")]);
    let cache = TempDir::new().unwrap();
    let runner = Arc::new(FlakyRunner {
        first: AtomicBool::new(true),
        delay: Duration::from_millis(1500),
    });

    let mut engine = thread_engine(cache.path(), runner, |b| {
        b.batch_timeout(Duration::from_millis(200))
    });
    let run = engine.analyze(&files);

    assert!(run.results[0].is_ok());
    assert_eq!(run.report.fallback_retries, 1);
    assert!(run.report.degraded);
    assert!(matches!(
        run.report.events[0],
        DegradationEvent::BatchFallback {
            cause: ErrorKind::Timeout,
            ..
        }
    ));
    assert_eq!(engine.pool_stats().timeouts, 1);
}

#[test]
fn test_persistent_timeout_reports_only_the_slow_file() {
    let (_project, files) = create_test_project(&[
        ("a.py", "a\n"),
        ("slow.py", "s\n"),
        ("b.py", "b\n"),
    ]);
    let cache = TempDir::new().unwrap();
    let runner = Arc::new(SlowRunner::new("slow", Duration::from_millis(1500)));

    let mut engine = thread_engine(cache.path(), runner, |b| {
        b.batch_timeout(Duration::from_millis(200))
    });
    let run = engine.analyze(&files);

    assert_eq!(run.report.strategy, Some(ExecutionStrategy::Sequential));
    assert!(run.results[0].is_ok());
    assert_eq!(run.results[1].error().map(|e| e.kind()), Some(ErrorKind::Timeout));
    assert!(run.results[2].is_ok());
    assert_eq!(run.report.failed_batches, 2);
    assert_eq!(engine.store().stats().entries, 2);
}

#[test]
fn test_low_memory_ceiling_degrades_to_sequential() {
    let (_project, files) = create_numbered_project(60);
    let cache = TempDir::new().unwrap();

    let mut engine = thread_engine(cache.path(), Arc::new(LineCountRunner::new()), |b| {
        b.max_workers(4)
            .memory_ceiling_bytes(16)
            .memory_cost_factor(1.0)
            .emergency_breach_limit(2)
    });
    let run = engine.analyze(&files);

    assert_eq!(run.results.len(), 60);
    assert!(run.results.iter().all(|r| r.is_ok()));
    assert!(run.report.degraded);
    assert!(run
        .report
        .events
        .contains(&DegradationEvent::ForcedSequential));
    assert!(run
        .report
        .events
        .iter()
        .any(|e| matches!(e, DegradationEvent::EmergencyCleanup { .. })));
    assert_eq!(run.report.entries_written, 60);
}

#[test]
fn test_cancellation_stops_undispatched_work() {
    let (_project, files) = create_numbered_project(20);
    let cache = TempDir::new().unwrap();
    let runner = Arc::new(CountingRunner::with_delay(Duration::from_millis(100)));
    let token = CancellationToken::new();

    let mut engine = thread_engine(cache.path(), runner.clone(), |b| {
        b.thresholds(sequential_thresholds())
    });
    let canceller = {
        let token = token.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(250));
            token.cancel();
        })
    };
    let run = engine.analyze_with_cancel(&files, &token);
    canceller.join().unwrap();

    assert!(run.report.cancelled);
    assert_eq!(run.results.len(), 20);
    let cancelled = run
        .results
        .iter()
        .filter(|r| r.error() == Some(&AnalysisError::Cancelled))
        .count();
    assert!(cancelled > 0);
    assert_eq!(cancelled + runner.calls(), 20);

    // Cancelled files were not cached; a clean run picks them up.
    let rerun = engine.analyze(&files);
    assert!(rerun.results.iter().all(|r| r.is_ok()));
    assert_eq!(rerun.report.entries_written, cancelled);
}

#[test]
fn test_duplicate_paths_share_one_analysis() {
    let (_project, mut files) = create_test_project(&[("a.py", "a = 1\n"), ("b.py", "b = 1\n")]);
    files.push(files[0].clone());
    let cache = TempDir::new().unwrap();
    let runner = Arc::new(CountingRunner::new());

    let mut engine = thread_engine(cache.path(), runner.clone(), |b| b);
    let run = engine.analyze(&files);

    assert_eq!(runner.calls(), 2);
    assert_eq!(run.results.len(), 3);
    assert_eq!(run.results[0].metrics(), run.results[2].metrics());
    assert_eq!(run.results[2].path(), files[0].as_path());
}

#[test]
fn test_open_uses_configured_cache_location() {
    let cache = TempDir::new().unwrap();
    let (_project, files) = create_test_project(&[("a.py", "a\n")]);
    let config = EngineConfig::builder()
        .cache_location(cache.path())
        .worker_command(None)
        .build()
        .unwrap();

    let mut engine = Coordinator::open(config, Arc::new(LineCountRunner::new())).unwrap();
    engine.analyze(&files);
    engine.close().unwrap();

    let store = CacheStore::open(StoreOptions::new(cache.path())).unwrap();
    assert_eq!(store.stats().entries, 1);
}

#[test]
fn test_long_lived_engine_stays_within_entry_limit() {
    let (_project, files) = create_numbered_project(10);
    let cache = TempDir::new().unwrap();
    let config = EngineConfig::builder()
        .cache_location(cache.path())
        .cache_max_entries(Some(3))
        .worker_command(None)
        .build()
        .unwrap();
    let mut engine = Coordinator::open(config, Arc::new(LineCountRunner::new())).unwrap();

    for _ in 0..2 {
        let run = engine.analyze(&files);
        assert!(run.results.iter().all(|r| r.is_ok()));
        assert!(engine.store().stats().entries <= 3);
    }
    engine.close().unwrap();
}

#[test]
fn test_expired_entries_leave_a_long_lived_engine() {
    let (_project, files) =
        create_test_project(&[("old.py", "o = 1\n"), ("new.py", "n = 1\n")]);
    let cache = TempDir::new().unwrap();
    let config = EngineConfig::builder()
        .cache_location(cache.path())
        .cache_max_age(Some(Duration::from_millis(300)))
        .worker_command(None)
        .build()
        .unwrap();
    let mut engine = Coordinator::open(config, Arc::new(LineCountRunner::new())).unwrap();

    let first = engine.analyze(&files[..1]);
    assert_eq!(first.report.entries_written, 1);
    assert_eq!(first.report.entries_evicted, 0);

    std::thread::sleep(Duration::from_millis(700));
    let second = engine.analyze(&files[1..]);
    assert_eq!(second.report.entries_written, 1);
    assert_eq!(second.report.entries_evicted, 1);
    assert_eq!(engine.store().stats().entries, 1);
    engine.close().unwrap();
}
