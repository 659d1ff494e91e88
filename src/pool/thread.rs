//! Thread-pool lane backed by a dedicated rayon pool.
//!
//! The pool is not rayon's global pool, so it can be retired after a timeout
//! without disturbing anything else in the process. Retiring only drops the
//! handle: rayon lets in-flight jobs finish and their completions still
//! arrive; new work goes to a fresh pool.

use super::protocol::BatchRequest;
use super::worker::execute_batch;
use super::{panic_message, Completion};
use crate::core::Runner;
use crate::errors::AnalysisError;
use crossbeam::channel::Sender;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

/// Worker thread stack size (8MB, runners may recurse deeply)
const WORKER_STACK_SIZE: usize = 8 * 1024 * 1024;

pub(crate) struct ThreadLane {
    pool: rayon::ThreadPool,
    generation: u64,
    last_used: Instant,
}

impl ThreadLane {
    pub fn build(threads: usize, generation: u64) -> Result<Self, AnalysisError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .stack_size(WORKER_STACK_SIZE)
            .thread_name(move |i| format!("metricore-pool{}-{}", generation, i))
            .build()
            .map_err(|e| AnalysisError::worker_crash(format!("failed to build thread pool: {}", e)))?;

        tracing::debug!(threads, generation, "Thread pool created");
        Ok(Self {
            pool,
            generation,
            last_used: Instant::now(),
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    /// Run `request` on the pool; the outcome is sent to `completions`.
    pub fn submit(
        &mut self,
        runner: Arc<dyn Runner>,
        request: BatchRequest,
        completions: Sender<Completion>,
    ) {
        self.last_used = Instant::now();
        self.pool.spawn(move || {
            let batch_id = request.batch_id;
            let outcome = catch_unwind(AssertUnwindSafe(|| execute_batch(&*runner, &request)))
                .map_err(|payload| {
                    AnalysisError::worker_crash(format!(
                        "worker thread panicked: {}",
                        panic_message(payload.as_ref())
                    ))
                });
            // The receiver only disappears when the manager is dropped.
            let _ = completions.send(Completion { batch_id, outcome });
        });
    }
}
