//! Worker pool management.
//!
//! [`PoolManager`] owns the executors behind each [`ExecutionStrategy`] and
//! enforces a deadline on every batch it dispatches. Completions from all
//! lanes funnel into one channel; [`PoolManager::next_completion`] waits on
//! it until the earliest outstanding deadline, so a hung batch surfaces as a
//! [`AnalysisError::Timeout`] instead of blocking the run.
//!
//! Pools outlive a single run and are torn down once idle for longer than
//! `pool_idle_timeout`.

pub mod protocol;
pub mod worker;

mod process;
mod sequential;
mod thread;

use crate::config::{EngineConfig, WorkerCommand};
use crate::core::Runner;
use crate::errors::AnalysisError;
use crate::strategy::ExecutionStrategy;
use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use process::ProcessPool;
use protocol::{BatchRequest, BatchResponse, RequestItem};
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thread::ThreadLane;

/// Outcome of one dispatched batch as reported by an executor.
pub(crate) struct Completion {
    pub batch_id: u64,
    pub outcome: Result<BatchResponse, AnalysisError>,
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Where a batch is submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lane {
    /// The executor for the run's strategy.
    Primary,
    /// A dedicated thread, used for fallback retries and forced sequential runs.
    Sequential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Executor {
    Sequential,
    Thread { generation: u64 },
    Process,
}

#[derive(Debug)]
struct InFlight {
    lane: Lane,
    executor: Executor,
    started: Instant,
    deadline: Instant,
}

/// A batch that finished, failed, or timed out.
#[derive(Debug)]
pub struct Finished {
    pub batch_id: u64,
    pub lane: Lane,
    pub elapsed: Duration,
    pub outcome: Result<BatchResponse, AnalysisError>,
}

/// Lifetime counters for a [`PoolManager`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub batches_submitted: u64,
    pub thread_pools_created: u64,
    pub thread_pools_retired: u64,
    pub processes_spawned: u64,
    pub processes_killed: u64,
    pub timeouts: u64,
    pub idle_teardowns: u64,
    pub stale_completions: u64,
}

pub struct PoolManager {
    runner: Arc<dyn Runner>,
    analyzer: String,
    max_workers: usize,
    batch_timeout: Duration,
    idle_timeout: Duration,
    worker_command: Option<WorkerCommand>,
    strategy: ExecutionStrategy,
    thread_lane: Option<ThreadLane>,
    process_pool: Option<ProcessPool>,
    completions_tx: Sender<Completion>,
    completions_rx: Receiver<Completion>,
    outstanding: HashMap<u64, InFlight>,
    next_batch_id: u64,
    thread_generation: u64,
    process_spawned_retired: u64,
    process_killed_retired: u64,
    stats: PoolStats,
}

impl PoolManager {
    pub fn new(runner: Arc<dyn Runner>, config: &EngineConfig) -> Self {
        let (completions_tx, completions_rx) = unbounded();
        Self {
            analyzer: runner.analyzer_version(),
            runner,
            max_workers: config.max_workers(),
            batch_timeout: config.batch_timeout(),
            idle_timeout: config.pool_idle_timeout(),
            worker_command: config.worker_command().cloned(),
            strategy: ExecutionStrategy::Sequential,
            thread_lane: None,
            process_pool: None,
            completions_tx,
            completions_rx,
            outstanding: HashMap::new(),
            next_batch_id: 1,
            thread_generation: 0,
            process_spawned_retired: 0,
            process_killed_retired: 0,
            stats: PoolStats::default(),
        }
    }

    pub fn process_pool_available(&self) -> bool {
        self.worker_command.is_some()
    }

    /// Prepare for a run with `strategy`.
    pub fn begin(&mut self, strategy: ExecutionStrategy) {
        self.reap_idle();
        self.strategy = strategy;
    }

    pub fn strategy(&self) -> ExecutionStrategy {
        self.strategy
    }

    pub fn in_flight(&self) -> usize {
        self.outstanding.len()
    }

    /// Batches that may be in flight at once on the primary lane.
    pub fn capacity(&self) -> usize {
        match self.strategy {
            ExecutionStrategy::Sequential => 1,
            ExecutionStrategy::ThreadPool | ExecutionStrategy::ProcessPool => self.max_workers,
        }
    }

    /// Dispatch `items` as one batch. Returns its id.
    pub fn submit(&mut self, items: Vec<RequestItem>, lane: Lane) -> u64 {
        let batch_id = self.next_batch_id;
        self.next_batch_id += 1;
        let request = BatchRequest {
            batch_id,
            analyzer: self.analyzer.clone(),
            items,
        };

        let executor = self.dispatch(request, lane);
        let started = Instant::now();
        self.outstanding.insert(
            batch_id,
            InFlight {
                lane,
                executor,
                started,
                deadline: started + self.batch_timeout,
            },
        );
        self.stats.batches_submitted += 1;
        tracing::debug!(batch_id, ?lane, ?executor, "Batch dispatched");
        batch_id
    }

    fn dispatch(&mut self, request: BatchRequest, lane: Lane) -> Executor {
        let tx = self.completions_tx.clone();
        let target = match (lane, self.strategy) {
            (Lane::Sequential, _) | (Lane::Primary, ExecutionStrategy::Sequential) => {
                Executor::Sequential
            }
            (Lane::Primary, ExecutionStrategy::ProcessPool) if self.worker_command.is_some() => {
                Executor::Process
            }
            (Lane::Primary, _) => Executor::Thread {
                generation: self.thread_generation,
            },
        };

        match target {
            Executor::Sequential => {
                sequential::spawn_batch(Arc::clone(&self.runner), request, tx);
                Executor::Sequential
            }
            Executor::Process => {
                let max_workers = self.max_workers;
                if let Some(command) = &self.worker_command {
                    let pool = self
                        .process_pool
                        .get_or_insert_with(|| ProcessPool::new(command.clone(), max_workers));
                    pool.submit(request, &tx);
                }
                Executor::Process
            }
            Executor::Thread { .. } => {
                if self.thread_lane.is_none() {
                    self.thread_generation += 1;
                    match ThreadLane::build(self.max_workers, self.thread_generation) {
                        Ok(lane) => {
                            self.stats.thread_pools_created += 1;
                            self.thread_lane = Some(lane);
                        }
                        Err(error) => {
                            let batch_id = request.batch_id;
                            let _ = tx.send(Completion {
                                batch_id,
                                outcome: Err(error),
                            });
                            return Executor::Thread {
                                generation: self.thread_generation,
                            };
                        }
                    }
                }
                match self.thread_lane.as_mut() {
                    Some(lane) => {
                        let generation = lane.generation();
                        lane.submit(Arc::clone(&self.runner), request, tx);
                        Executor::Thread { generation }
                    }
                    None => Executor::Thread {
                        generation: self.thread_generation,
                    },
                }
            }
        }
    }

    /// Wait for the next batch to finish or time out.
    ///
    /// Returns `None` when nothing is in flight.
    pub fn next_completion(&mut self) -> Option<Finished> {
        loop {
            let (batch_id, deadline) = self
                .outstanding
                .iter()
                .min_by_key(|(_, flight)| flight.deadline)
                .map(|(id, flight)| (*id, flight.deadline))?;

            match self.completions_rx.recv_deadline(deadline) {
                Ok(completion) => match self.outstanding.remove(&completion.batch_id) {
                    Some(flight) => {
                        return Some(Finished {
                            batch_id: completion.batch_id,
                            lane: flight.lane,
                            elapsed: flight.started.elapsed(),
                            outcome: completion.outcome,
                        });
                    }
                    None => {
                        // Late answer from a batch that already timed out.
                        self.stats.stale_completions += 1;
                        tracing::debug!(batch_id = completion.batch_id, "Discarding stale completion");
                    }
                },
                Err(RecvTimeoutError::Timeout) => {
                    let flight = self.outstanding.remove(&batch_id)?;
                    let elapsed = flight.started.elapsed();
                    self.stats.timeouts += 1;
                    tracing::warn!(
                        batch_id,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Batch exceeded its deadline"
                    );
                    self.abort(batch_id, flight.executor);
                    return Some(Finished {
                        batch_id,
                        lane: flight.lane,
                        elapsed,
                        outcome: Err(AnalysisError::timeout(elapsed)),
                    });
                }
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    fn abort(&mut self, batch_id: u64, executor: Executor) {
        match executor {
            Executor::Sequential => {
                tracing::debug!(batch_id, "Abandoning sequential batch thread");
            }
            Executor::Thread { generation } => {
                let current = self.thread_lane.as_ref().map(ThreadLane::generation);
                if current == Some(generation) {
                    tracing::info!(generation, "Retiring thread pool after timeout");
                    self.thread_lane = None;
                    self.stats.thread_pools_retired += 1;
                }
            }
            Executor::Process => {
                if let Some(pool) = self.process_pool.as_mut() {
                    pool.abort(batch_id);
                }
            }
        }
    }

    /// Tear down pools unused for longer than the idle timeout.
    pub fn reap_idle(&mut self) -> usize {
        if !self.outstanding.is_empty() {
            return 0;
        }
        let mut reaped = 0;

        if self
            .thread_lane
            .as_ref()
            .is_some_and(|lane| lane.last_used().elapsed() >= self.idle_timeout)
        {
            self.thread_lane = None;
            reaped += 1;
        }

        if self
            .process_pool
            .as_ref()
            .is_some_and(|pool| pool.last_used().elapsed() >= self.idle_timeout)
        {
            self.retire_process_pool();
            reaped += 1;
        }

        if reaped > 0 {
            self.stats.idle_teardowns += reaped as u64;
            tracing::debug!(reaped, "Tore down idle pools");
        }
        reaped
    }

    fn retire_process_pool(&mut self) {
        if let Some(mut pool) = self.process_pool.take() {
            pool.shutdown();
            self.process_spawned_retired += pool.spawned();
            self.process_killed_retired += pool.killed();
        }
    }

    /// Live pools: (thread pool present, live process workers).
    pub fn live_pools(&self) -> (bool, usize) {
        (
            self.thread_lane.is_some(),
            self.process_pool.as_ref().map_or(0, ProcessPool::live_workers),
        )
    }

    pub fn stats(&self) -> PoolStats {
        let (spawned, killed) = self
            .process_pool
            .as_ref()
            .map_or((0, 0), |pool| (pool.spawned(), pool.killed()));
        PoolStats {
            processes_spawned: self.process_spawned_retired + spawned,
            processes_killed: self.process_killed_retired + killed,
            ..self.stats.clone()
        }
    }

    /// Stop every pool now.
    pub fn shutdown(&mut self) {
        self.thread_lane = None;
        self.retire_process_pool();
    }
}

impl Drop for PoolManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
