//! Process-pool lane.
//!
//! Each worker is a child process speaking the frame protocol on its stdin
//! and stdout. A reader thread per child forwards responses to the manager's
//! completion channel; when the child exits or garbles the stream, the batch
//! it was running (if any) is reported as a worker crash.

use super::protocol::{read_frame, write_frame, BatchRequest, BatchResponse, WorkerRequest};
use super::Completion;
use crate::config::WorkerCommand;
use crate::errors::AnalysisError;
use crossbeam::channel::Sender;
use parking_lot::Mutex;
use std::io::{self, BufReader};
use std::process::{Child, ChildStdin, ChildStdout, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const SHUTDOWN_GRACE: Duration = Duration::from_millis(250);

/// Batch a worker is currently running, shared with its reader thread.
type CurrentBatch = Arc<Mutex<Option<u64>>>;

struct ProcessWorker {
    id: usize,
    child: Child,
    stdin: Option<ChildStdin>,
    current: CurrentBatch,
    alive: Arc<AtomicBool>,
}

impl ProcessWorker {
    fn is_idle(&self) -> bool {
        self.alive.load(Ordering::Acquire) && self.current.lock().is_none()
    }

    fn kill(&mut self) {
        self.stdin = None;
        if let Err(e) = self.child.kill() {
            tracing::debug!(worker = self.id, error = %e, "Kill failed, worker already gone");
        }
        let _ = self.child.wait();
        self.alive.store(false, Ordering::Release);
    }

    /// Ask the worker to exit, killing it if it does not within the grace period.
    fn shutdown(&mut self) {
        if let Some(mut stdin) = self.stdin.take() {
            let _ = write_frame(&mut stdin, &WorkerRequest::Shutdown);
        }

        let deadline = Instant::now() + SHUTDOWN_GRACE;
        loop {
            match self.child.try_wait() {
                Ok(Some(_)) => break,
                Ok(None) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(5));
                }
                _ => {
                    self.kill();
                    break;
                }
            }
        }
        self.alive.store(false, Ordering::Release);
    }
}

pub(crate) struct ProcessPool {
    command: WorkerCommand,
    max_workers: usize,
    workers: Vec<ProcessWorker>,
    next_worker_id: usize,
    last_used: Instant,
    spawned: u64,
    killed: u64,
}

impl ProcessPool {
    pub fn new(command: WorkerCommand, max_workers: usize) -> Self {
        Self {
            command,
            max_workers: max_workers.max(1),
            workers: Vec::new(),
            next_worker_id: 0,
            last_used: Instant::now(),
            spawned: 0,
            killed: 0,
        }
    }

    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    pub fn spawned(&self) -> u64 {
        self.spawned
    }

    pub fn killed(&self) -> u64 {
        self.killed
    }

    pub fn live_workers(&self) -> usize {
        self.workers
            .iter()
            .filter(|w| w.alive.load(Ordering::Acquire))
            .count()
    }

    /// Send `request` to an idle worker, spawning one if below the limit.
    ///
    /// Every failure path reports through `completions`, never to the caller.
    pub fn submit(&mut self, request: BatchRequest, completions: &Sender<Completion>) {
        self.last_used = Instant::now();
        self.remove_dead();
        let batch_id = request.batch_id;

        let slot = match self.workers.iter().position(ProcessWorker::is_idle) {
            Some(slot) => Ok(slot),
            None if self.workers.len() < self.max_workers => self.spawn_worker(completions),
            None => Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "all process workers are busy",
            )),
        };

        let slot = match slot {
            Ok(slot) => slot,
            Err(e) => {
                let _ = completions.send(Completion {
                    batch_id,
                    outcome: Err(AnalysisError::worker_crash(format!(
                        "no process worker available: {}",
                        e
                    ))),
                });
                return;
            }
        };

        let worker = &mut self.workers[slot];
        *worker.current.lock() = Some(batch_id);
        let written = match worker.stdin.as_mut() {
            Some(stdin) => write_frame(stdin, &WorkerRequest::Run(request)),
            None => Err(io::ErrorKind::BrokenPipe.into()),
        };

        if let Err(e) = written {
            // The reader may already have reported this batch on EOF.
            let unreported = worker.current.lock().take().is_some();
            if unreported {
                let _ = completions.send(Completion {
                    batch_id,
                    outcome: Err(AnalysisError::worker_crash(format!(
                        "failed to send batch to worker {}: {}",
                        worker.id, e
                    ))),
                });
            }
            worker.kill();
            self.killed += 1;
        }
    }

    /// Kill the worker running `batch_id`. Returns whether one was found.
    pub fn abort(&mut self, batch_id: u64) -> bool {
        let Some(slot) = self
            .workers
            .iter()
            .position(|w| *w.current.lock() == Some(batch_id))
        else {
            return false;
        };

        let mut worker = self.workers.swap_remove(slot);
        *worker.current.lock() = None;
        tracing::warn!(worker = worker.id, batch_id, "Killing worker after batch timeout");
        worker.kill();
        self.killed += 1;
        true
    }

    pub fn shutdown(&mut self) {
        for mut worker in self.workers.drain(..) {
            worker.shutdown();
        }
    }

    fn remove_dead(&mut self) {
        let mut index = 0;
        while index < self.workers.len() {
            if self.workers[index].alive.load(Ordering::Acquire) {
                index += 1;
            } else {
                let mut dead = self.workers.swap_remove(index);
                dead.kill();
            }
        }
    }

    fn spawn_worker(&mut self, completions: &Sender<Completion>) -> io::Result<usize> {
        let id = self.next_worker_id;
        self.next_worker_id += 1;

        let mut child = self
            .command
            .to_command()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;

        let stdin = child.stdin.take();
        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "worker stdout unavailable"));
        };

        let current: CurrentBatch = Arc::new(Mutex::new(None));
        let alive = Arc::new(AtomicBool::new(true));
        let reader = {
            let current = Arc::clone(&current);
            let alive = Arc::clone(&alive);
            let completions = completions.clone();
            std::thread::Builder::new()
                .name(format!("metricore-worker-{}", id))
                .spawn(move || forward_responses(id, stdout, current, alive, completions))
        };
        if let Err(e) = reader {
            let _ = child.kill();
            let _ = child.wait();
            return Err(e);
        }

        tracing::debug!(worker = id, pid = child.id(), "Spawned process worker");
        self.spawned += 1;
        self.workers.push(ProcessWorker {
            id,
            child,
            stdin,
            current,
            alive,
        });
        Ok(self.workers.len() - 1)
    }
}

impl Drop for ProcessPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn forward_responses(
    worker: usize,
    stdout: ChildStdout,
    current: CurrentBatch,
    alive: Arc<AtomicBool>,
    completions: Sender<Completion>,
) {
    let mut reader = BufReader::new(stdout);
    let failure = loop {
        match read_frame::<_, BatchResponse>(&mut reader) {
            Ok(Some(response)) => {
                let expected = current.lock().take();
                if expected != Some(response.batch_id) {
                    tracing::warn!(worker, batch_id = response.batch_id, "Unexpected batch response");
                }
                let _ = completions.send(Completion {
                    batch_id: response.batch_id,
                    outcome: Ok(response),
                });
            }
            Ok(None) => break format!("worker process {} exited", worker),
            Err(e) => break format!("worker process {} protocol error: {}", worker, e),
        }
    };

    alive.store(false, Ordering::Release);
    if let Some(batch_id) = current.lock().take() {
        tracing::warn!(worker, batch_id, "{}", failure);
        let _ = completions.send(Completion {
            batch_id,
            outcome: Err(AnalysisError::worker_crash(failure)),
        });
    }
}
