//! Sequential lane: one dedicated thread per batch.
//!
//! Used when the strategy is sequential and for fallback retries. Running off
//! the coordinator thread keeps the batch timeout enforceable; a batch that
//! times out is abandoned and its late completion discarded.

use super::protocol::BatchRequest;
use super::worker::execute_batch;
use super::{panic_message, Completion};
use crate::core::Runner;
use crate::errors::AnalysisError;
use crossbeam::channel::Sender;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

pub(crate) fn spawn_batch(
    runner: Arc<dyn Runner>,
    request: BatchRequest,
    completions: Sender<Completion>,
) {
    let batch_id = request.batch_id;
    let failure_tx = completions.clone();

    let spawned = std::thread::Builder::new()
        .name(format!("metricore-seq-{}", batch_id))
        .spawn(move || {
            let outcome = catch_unwind(AssertUnwindSafe(|| execute_batch(&*runner, &request)))
                .map_err(|payload| {
                    AnalysisError::worker_crash(format!(
                        "sequential worker panicked: {}",
                        panic_message(payload.as_ref())
                    ))
                });
            let _ = completions.send(Completion { batch_id, outcome });
        });

    if let Err(e) = spawned {
        let _ = failure_tx.send(Completion {
            batch_id,
            outcome: Err(AnalysisError::worker_crash(format!(
                "failed to spawn sequential worker: {}",
                e
            ))),
        });
    }
}
