//! The engine entry point.
//!
//! [`Coordinator::analyze`] turns a list of files into exactly one
//! [`AnalysisResult`] per file, in input order:
//!
//! 1. read and fingerprint each file
//! 2. answer what it can from the cache (exact or structural hits)
//! 3. collapse remaining files that share a cache key into one work item
//! 4. plan balanced batches and pick an execution strategy
//! 5. dispatch under the memory monitor, retrying the files of a failed
//!    batch once, one at a time, on the sequential lane
//! 6. commit fresh results to the cache and merge everything back
//!
//! # Example
//!
//! ```no_run
//! use metricore::config::EngineConfig;
//! use metricore::coordinator::Coordinator;
//! use metricore::runners::LineCountRunner;
//! use std::path::PathBuf;
//! use std::sync::Arc;
//!
//! let config = EngineConfig::builder().cache_location("/tmp/metricore").build()?;
//! let mut coordinator = Coordinator::open(config, Arc::new(LineCountRunner::new()))?;
//! let run = coordinator.analyze(&[PathBuf::from("src/lib.rs")]);
//! println!("{} hits, {} misses", run.report.cache_hits, run.report.misses);
//! coordinator.close()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::cache::{CacheStore, PutOutcome};
use crate::config::EngineConfig;
use crate::core::{AnalysisResult, MetricResult, Runner};
use crate::errors::{AnalysisError, EngineError, ErrorKind};
use crate::fingerprint::{fingerprint_file, CacheKey};
use crate::incremental::{IncrementalAnalyzer, Lookup};
use crate::memory::{Admission, Escalation, MemoryMonitor};
use crate::observability::{increment_processed, set_phase, set_progress, AnalysisPhase};
use crate::planner::{plan_batches, Batch, WorkItem};
use crate::pool::protocol::{ItemResult, RequestItem};
use crate::pool::{Lane, PoolManager, PoolStats};
use crate::strategy::{select_strategy, ExecutionStrategy, WorkloadProfile};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, warn};

/// Cooperative cancellation flag shared between a caller and a run.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Something the run did differently than planned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DegradationEvent {
    /// A batch failed and its files were resubmitted one at a time on the
    /// sequential lane.
    BatchFallback {
        batch_id: u64,
        files: usize,
        cause: ErrorKind,
    },
    /// A submission waited for in-flight work to release memory.
    Backpressure { in_flight: usize, estimate: u64 },
    /// A batch too large for the memory ceiling was split.
    BatchSplit { items: usize, estimate: u64 },
    /// A single item larger than the ceiling ran anyway.
    OversizedItem { path: PathBuf, estimate: u64 },
    /// Decoded cache payloads were dropped after repeated breaches.
    EmergencyCleanup { dropped_payloads: usize },
    /// The rest of the run executes one item at a time.
    ForcedSequential,
}

/// Summary of one `analyze` call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub files: usize,
    pub strategy: Option<ExecutionStrategy>,
    pub cache_hits: usize,
    pub misses: usize,
    pub structural_reuses: usize,
    pub entries_written: usize,
    /// Entries the eviction policy removed after the run.
    pub entries_evicted: usize,
    pub batches_dispatched: usize,
    pub failed_batches: usize,
    pub fallback_retries: usize,
    pub backpressure_waits: usize,
    pub degraded: bool,
    pub events: Vec<DegradationEvent>,
    pub cancelled: bool,
    pub bypassed: bool,
    pub elapsed: Duration,
}

impl RunReport {
    fn record(&mut self, event: DegradationEvent) {
        debug!(?event, "Degradation event");
        self.degraded = true;
        self.events.push(event);
    }

    /// Files answered without running the analyzer.
    pub fn answered_from_cache(&self) -> usize {
        self.cache_hits + self.structural_reuses
    }
}

/// Results in input order plus the run report.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisRun {
    pub results: Vec<AnalysisResult>,
    pub report: RunReport,
}

impl AnalysisRun {
    pub fn failures(&self) -> impl Iterator<Item = &AnalysisResult> {
        self.results.iter().filter(|r| !r.is_ok())
    }
}

/// A unique cache key that must be computed, and every input it answers.
struct PendingWork {
    path: PathBuf,
    content: Arc<[u8]>,
    key: CacheKey,
    structural_key: Option<CacheKey>,
    indices: Vec<usize>,
}

struct QueuedBatch {
    batch: Batch,
    lane: Lane,
    attempt: u8,
}

struct Dispatched {
    batch: Batch,
    attempt: u8,
    estimate: u64,
}

/// Mutable state of one optimized run.
struct RunState<'f> {
    files: &'f [PathBuf],
    slots: Vec<Option<AnalysisResult>>,
    pending: BTreeMap<usize, PendingWork>,
    report: RunReport,
}

impl RunState<'_> {
    fn fill(&mut self, index: usize, result: AnalysisResult) {
        self.slots[index] = Some(result);
    }

    fn fail_work(&mut self, work_id: usize, error: &AnalysisError) {
        let Some(work) = self.pending.get(&work_id) else {
            return;
        };
        for &index in &work.indices {
            self.slots[index] = Some(AnalysisResult::failed(&self.files[index], error.clone()));
        }
    }

    fn cancel_batch(&mut self, batch: &Batch) {
        for item in &batch.items {
            self.fail_work(item.index, &AnalysisError::Cancelled);
        }
    }

    fn into_results(self) -> (Vec<AnalysisResult>, RunReport) {
        let files = self.files;
        let results = self
            .slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| {
                    AnalysisResult::failed(
                        &files[index],
                        AnalysisError::worker_crash("no result produced"),
                    )
                })
            })
            .collect();
        (results, self.report)
    }
}

pub struct Coordinator {
    config: EngineConfig,
    runner: Arc<dyn Runner>,
    store: CacheStore,
    pool: PoolManager,
    monitor: MemoryMonitor,
}

impl Coordinator {
    /// Open the cache at the configured location and build an engine.
    pub fn open(config: EngineConfig, runner: Arc<dyn Runner>) -> Result<Self, EngineError> {
        let location = config.cache().resolve_location();
        let store = CacheStore::open(config.cache().store_options(location.path()))?;
        Self::with_store(config, runner, store)
    }

    /// Build an engine over a store the caller already opened.
    pub fn with_store(
        config: EngineConfig,
        runner: Arc<dyn Runner>,
        store: CacheStore,
    ) -> Result<Self, EngineError> {
        if !runner.is_available() {
            return Err(EngineError::RunnerUnavailable {
                name: runner.name().to_string(),
            });
        }

        let pool = PoolManager::new(Arc::clone(&runner), &config);
        let monitor = MemoryMonitor::new(
            config.memory_ceiling_bytes(),
            config.memory_cost_factor(),
            config.emergency_breach_limit(),
        );
        Ok(Self {
            config,
            runner,
            store,
            pool,
            monitor,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Analyze `files`, returning one result per file in input order.
    pub fn analyze(&mut self, files: &[PathBuf]) -> AnalysisRun {
        self.analyze_with_cancel(files, &CancellationToken::new())
    }

    /// Like [`analyze`](Self::analyze), stopping early once `token` is
    /// cancelled. Work not yet dispatched is reported as
    /// [`AnalysisError::Cancelled`]; dispatched batches finish or time out.
    pub fn analyze_with_cancel(
        &mut self,
        files: &[PathBuf],
        token: &CancellationToken,
    ) -> AnalysisRun {
        let start = Instant::now();
        let span = info_span!(
            "analyze",
            files = files.len(),
            bypass = self.config.bypass_optimized_path()
        );
        let _guard = span.enter();

        let (results, mut report) = if self.config.bypass_optimized_path() {
            self.run_bypass(files, token)
        } else {
            let (results, mut report) = self.run_optimized(files, token);
            report.entries_evicted = self.prune_cache();
            (results, report)
        };

        report.elapsed = start.elapsed();
        info!(
            files = report.files,
            hits = report.cache_hits,
            structural = report.structural_reuses,
            misses = report.misses,
            written = report.entries_written,
            evicted = report.entries_evicted,
            failed_batches = report.failed_batches,
            degraded = report.degraded,
            cancelled = report.cancelled,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Analysis run complete"
        );
        AnalysisRun { results, report }
    }

    /// Apply the eviction policy so a long-lived engine keeps aging entries
    /// out between opens. Returns how many entries went.
    fn prune_cache(&self) -> usize {
        match self.store.prune() {
            Ok(stats) => {
                if stats.entries_removed > 0 {
                    debug!(%stats, "Pruned cache after run");
                }
                stats.entries_removed
            }
            Err(error) => {
                warn!(%error, "Cache prune after run failed");
                0
            }
        }
    }

    /// Checkpoint the cache and stop all pools.
    pub fn close(mut self) -> Result<(), EngineError> {
        self.pool.shutdown();
        self.store.close()?;
        Ok(())
    }

    /// Naive per-file execution: no cache, no pools.
    fn run_bypass(
        &self,
        files: &[PathBuf],
        token: &CancellationToken,
    ) -> (Vec<AnalysisResult>, RunReport) {
        let mut report = RunReport {
            files: files.len(),
            strategy: Some(ExecutionStrategy::Sequential),
            bypassed: true,
            ..RunReport::default()
        };

        let results = files
            .iter()
            .map(|path| {
                if token.is_cancelled() {
                    report.cancelled = true;
                    return AnalysisResult::failed(path, AnalysisError::Cancelled);
                }
                report.misses += 1;
                let outcome = std::fs::read(path)
                    .map_err(|e| AnalysisError::from_io(path, &e))
                    .and_then(|content| self.runner.analyze(path, &content));
                match outcome {
                    Ok(metrics) => AnalysisResult::fresh(path, metrics),
                    Err(error) => AnalysisResult::failed(path, error),
                }
            })
            .collect();

        (results, report)
    }

    fn run_optimized(
        &mut self,
        files: &[PathBuf],
        token: &CancellationToken,
    ) -> (Vec<AnalysisResult>, RunReport) {
        self.monitor.reset();
        set_progress(0, files.len());
        let mut state = RunState {
            files,
            slots: vec![None; files.len()],
            pending: BTreeMap::new(),
            report: RunReport {
                files: files.len(),
                ..RunReport::default()
            },
        };

        let items = self.partition(&mut state, token);
        if items.is_empty() {
            return state.into_results();
        }

        let planning = set_phase(AnalysisPhase::Planning);
        let profile = WorkloadProfile::from_items(
            &items,
            self.config.max_workers(),
            self.pool.process_pool_available(),
        );
        let strategy = select_strategy(&profile, self.config.thresholds());
        state.report.strategy = Some(strategy);
        info!(
            %strategy,
            items = profile.item_count,
            total_cost = profile.total_cost,
            "Dispatching pending work"
        );

        let batches = match strategy {
            // One item per batch: per-file deadlines and prompt cancellation.
            ExecutionStrategy::Sequential => {
                let count = items.len();
                plan_batches(items, count)
            }
            _ => plan_batches(items, self.config.max_workers()),
        };

        drop(planning);

        self.pool.begin(strategy);
        let _phase = set_phase(AnalysisPhase::Dispatch);
        self.dispatch_all(&mut state, batches, token);
        state.into_results()
    }

    /// Fingerprint every file and answer what the cache can. Returns the
    /// work items still to compute.
    fn partition(&self, state: &mut RunState<'_>, token: &CancellationToken) -> Vec<WorkItem> {
        let _phase = set_phase(AnalysisPhase::Fingerprinting);
        let analyzer = IncrementalAnalyzer::new(&self.store, self.runner.as_ref());
        let version = self.runner.analyzer_version();
        let mut first_by_key: HashMap<CacheKey, usize> = HashMap::new();
        let mut items = Vec::new();
        let files = state.files;

        for (index, path) in files.iter().enumerate() {
            if token.is_cancelled() {
                state.report.cancelled = true;
                state.fill(index, AnalysisResult::failed(path, AnalysisError::Cancelled));
                continue;
            }

            let (fingerprint, content) = match fingerprint_file(path, &version) {
                Ok(read) => read,
                Err(error) => {
                    debug!(path = %path.display(), %error, "Unreadable file");
                    state.fill(index, AnalysisResult::failed(path, error));
                    continue;
                }
            };
            let key = fingerprint.cache_key();

            if let Some(first) = first_by_key.get(&key) {
                if let Some(work) = state.pending.get_mut(first) {
                    state.report.misses += 1;
                    work.indices.push(index);
                    continue;
                }
            }

            let lookup = {
                let _lookup = set_phase(AnalysisPhase::CacheLookup);
                analyzer.lookup(&fingerprint, &content)
            };
            match lookup {
                Lookup::Hit(result) => {
                    state.report.cache_hits += 1;
                    state.fill(index, AnalysisResult::cached(path, MetricResult::clone(&result)));
                }
                Lookup::StructuralReuse { result, source_key } => {
                    debug!(path = %path.display(), source = %source_key.short(), "Structural reuse");
                    state.report.structural_reuses += 1;
                    state.fill(index, AnalysisResult::cached(path, MetricResult::clone(&result)));
                }
                Lookup::Miss { structural_key } => {
                    state.report.misses += 1;
                    first_by_key.insert(key, index);
                    items.push(WorkItem::new(index, path, key, fingerprint.size()));
                    state.pending.insert(
                        index,
                        PendingWork {
                            path: path.clone(),
                            content: Arc::from(content),
                            key,
                            structural_key,
                            indices: vec![index],
                        },
                    );
                }
            }
        }

        items
    }

    fn request_items(state: &RunState<'_>, batch: &Batch) -> Vec<RequestItem> {
        batch
            .items
            .iter()
            .filter_map(|item| {
                state.pending.get(&item.index).map(|work| RequestItem {
                    work_id: item.index,
                    path: work.path.clone(),
                    content: Arc::clone(&work.content),
                })
            })
            .collect()
    }

    fn dispatch_all(
        &mut self,
        state: &mut RunState<'_>,
        batches: Vec<Batch>,
        token: &CancellationToken,
    ) {
        let mut queue: VecDeque<QueuedBatch> = batches
            .into_iter()
            .map(|batch| QueuedBatch {
                batch,
                lane: Lane::Primary,
                attempt: 0,
            })
            .collect();
        let mut in_flight: HashMap<u64, Dispatched> = HashMap::new();
        let mut waiting = false;

        loop {
            self.apply_escalations(state, &mut queue);

            while !token.is_cancelled() && !queue.is_empty() && in_flight.len() < self.capacity() {
                let Some(next) = queue.pop_front() else {
                    break;
                };
                let bytes: u64 = next.batch.items.iter().map(|i| i.estimated_cost).sum();
                let estimate = self.monitor.estimate(bytes);

                match self.monitor.admit(estimate, in_flight.len(), next.batch.len()) {
                    Admission::Granted | Admission::Forced => {
                        if next.batch.len() == 1 && estimate > self.monitor.budget().limit() {
                            let path = next.batch.items[0].file_path.clone();
                            state.report.record(DegradationEvent::OversizedItem { path, estimate });
                        }
                        waiting = false;
                        let requests = Self::request_items(state, &next.batch);
                        let batch_id = self.pool.submit(requests, next.lane);
                        state.report.batches_dispatched += 1;
                        in_flight.insert(
                            batch_id,
                            Dispatched {
                                batch: next.batch,
                                attempt: next.attempt,
                                estimate,
                            },
                        );
                    }
                    Admission::Wait => {
                        state.report.backpressure_waits += 1;
                        if !waiting {
                            state.report.record(DegradationEvent::Backpressure {
                                in_flight: in_flight.len(),
                                estimate,
                            });
                            waiting = true;
                        }
                        queue.push_front(next);
                        break;
                    }
                    Admission::Split => {
                        state.report.record(DegradationEvent::BatchSplit {
                            items: next.batch.len(),
                            estimate,
                        });
                        for half in next.batch.split().into_iter().rev() {
                            queue.push_front(QueuedBatch {
                                batch: half,
                                lane: next.lane,
                                attempt: next.attempt,
                            });
                        }
                    }
                }
            }

            if token.is_cancelled() && !queue.is_empty() {
                state.report.cancelled = true;
                info!(batches = queue.len(), "Run cancelled, skipping undispatched work");
                for queued in queue.drain(..) {
                    state.cancel_batch(&queued.batch);
                }
            }

            if in_flight.is_empty() {
                if queue.is_empty() {
                    break;
                }
                continue;
            }

            let Some(finished) = self.pool.next_completion() else {
                warn!("Pool lost track of in-flight batches");
                for (_, dispatched) in in_flight.drain() {
                    for item in &dispatched.batch.items {
                        state.fail_work(item.index, &AnalysisError::worker_crash("batch lost"));
                    }
                }
                continue;
            };
            let Some(dispatched) = in_flight.remove(&finished.batch_id) else {
                continue;
            };
            self.monitor.release(dispatched.estimate);

            match finished.outcome {
                Ok(response) => self.commit_batch(state, &dispatched.batch, response.results),
                Err(error) => {
                    state.report.failed_batches += 1;
                    if dispatched.attempt == 0 {
                        warn!(
                            batch_id = finished.batch_id,
                            %error,
                            "Batch failed, retrying sequentially"
                        );
                        state.report.fallback_retries += 1;
                        state.report.record(DegradationEvent::BatchFallback {
                            batch_id: finished.batch_id,
                            files: dispatched.batch.len(),
                            cause: error.kind(),
                        });
                        for single in dispatched.batch.singles() {
                            queue.push_back(QueuedBatch {
                                batch: single,
                                lane: Lane::Sequential,
                                attempt: 1,
                            });
                        }
                    } else {
                        warn!(batch_id = finished.batch_id, %error, "Fallback retry failed");
                        for item in &dispatched.batch.items {
                            state.fail_work(item.index, &error);
                        }
                    }
                }
            }
        }
    }

    fn capacity(&self) -> usize {
        if self.monitor.is_forced_sequential() {
            1
        } else {
            self.pool.capacity()
        }
    }

    fn apply_escalations(&mut self, state: &mut RunState<'_>, queue: &mut VecDeque<QueuedBatch>) {
        while let Some(step) = self.monitor.escalation() {
            match step {
                Escalation::EmergencyCleanup => {
                    let dropped_payloads = self.store.shed_memory();
                    warn!(dropped_payloads, "Memory emergency: dropped decoded cache payloads");
                    state
                        .report
                        .record(DegradationEvent::EmergencyCleanup { dropped_payloads });
                }
                Escalation::ForcedSequential => {
                    warn!("Memory emergency: continuing one file at a time");
                    state.report.record(DegradationEvent::ForcedSequential);
                    let remaining: Vec<QueuedBatch> = queue.drain(..).collect();
                    for queued in remaining {
                        for single in queued.batch.singles() {
                            queue.push_back(QueuedBatch {
                                batch: single,
                                lane: Lane::Sequential,
                                attempt: queued.attempt,
                            });
                        }
                    }
                }
            }
        }
    }

    fn commit_batch(&self, state: &mut RunState<'_>, batch: &Batch, results: Vec<ItemResult>) {
        let _phase = set_phase(AnalysisPhase::Commit);
        increment_processed(batch.len());
        let mut answered: HashSet<usize> = HashSet::with_capacity(results.len());

        for item in results {
            if !answered.insert(item.work_id) {
                continue;
            }
            match item.outcome {
                Ok(metrics) => self.commit_success(state, item.work_id, metrics),
                Err(error) => state.fail_work(item.work_id, &error),
            }
        }

        for item in &batch.items {
            if !answered.contains(&item.index) {
                state.fail_work(
                    item.index,
                    &AnalysisError::worker_crash("worker returned no result for file"),
                );
            }
        }
    }

    fn commit_success(&self, state: &mut RunState<'_>, work_id: usize, metrics: MetricResult) {
        let Some(work) = state.pending.get(&work_id) else {
            return;
        };

        let stored = self.store.put(
            work.key,
            &metrics,
            work.structural_key,
            work.content.len() as u64,
        );
        let value = match stored {
            Ok(PutOutcome::Committed(_)) => {
                state.report.entries_written += 1;
                metrics
            }
            Ok(PutOutcome::Existing(winner)) => winner.decode().unwrap_or(metrics),
            Err(error) => {
                warn!(path = %work.path.display(), %error, "Failed to store result");
                metrics
            }
        };

        let indices = work.indices.clone();
        for index in indices {
            let path: &Path = &state.files[index];
            state.slots[index] = Some(AnalysisResult::fresh(path, value.clone()));
        }
    }
}
