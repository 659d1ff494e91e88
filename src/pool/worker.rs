//! Batch execution shared by every lane, and the process-worker loop.

use super::protocol::{read_frame, write_frame, BatchRequest, BatchResponse, ItemResult, WorkerRequest};
use crate::core::Runner;
use crate::observability::{set_current_file, set_phase, AnalysisPhase};
use std::io::{self, Read, Write};

/// Run every item of `request` through `runner`, in order.
pub fn execute_batch(runner: &dyn Runner, request: &BatchRequest) -> BatchResponse {
    let _phase = set_phase(AnalysisPhase::Execution);
    let results = request
        .items
        .iter()
        .map(|item| {
            let _file = set_current_file(&item.path);
            ItemResult {
                work_id: item.work_id,
                outcome: runner.analyze(&item.path, &item.content),
            }
        })
        .collect();

    BatchResponse {
        batch_id: request.batch_id,
        results,
    }
}

/// Serve batch requests from `input` until end of stream or `Shutdown`.
///
/// This is the body of `metricore worker`. A panic inside the runner takes
/// the process down, which the manager observes as a crash. A batch for a
/// different analyzer is never answered: the worker stops with
/// `InvalidInput` so the manager reruns the batch in-process.
pub fn serve<R: Read, W: Write>(runner: &dyn Runner, mut input: R, mut output: W) -> io::Result<()> {
    let analyzer = runner.analyzer_version();
    let mut served = 0usize;
    while let Some(request) = read_frame::<_, WorkerRequest>(&mut input)? {
        match request {
            WorkerRequest::Run(batch) => {
                if batch.analyzer != analyzer {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!(
                            "worker serves analyzer {}, batch {} requires {}",
                            analyzer, batch.batch_id, batch.analyzer
                        ),
                    ));
                }
                let response = execute_batch(runner, &batch);
                write_frame(&mut output, &response)?;
                served += 1;
            }
            WorkerRequest::Shutdown => break,
        }
    }
    tracing::debug!(served, "Worker exiting");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::protocol::RequestItem;
    use crate::runners::LineCountRunner;
    use std::io::Cursor;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn batch(id: u64, contents: &[&str]) -> BatchRequest {
        BatchRequest {
            batch_id: id,
            analyzer: LineCountRunner::new().analyzer_version(),
            items: contents
                .iter()
                .enumerate()
                .map(|(i, c)| RequestItem {
                    work_id: i,
                    path: PathBuf::from(format!("f{}.py", i)),
                    content: Arc::from(c.as_bytes()),
                })
                .collect(),
        }
    }

    #[test]
    fn test_execute_batch_preserves_order() {
        let response = execute_batch(&LineCountRunner::new(), &batch(7, &["a\n", "a\nb\n"]));
        assert_eq!(response.batch_id, 7);
        let ids: Vec<usize> = response.results.iter().map(|r| r.work_id).collect();
        assert_eq!(ids, vec![0, 1]);
        assert!(response.results.iter().all(|r| r.outcome.is_ok()));
    }

    #[test]
    fn test_serve_answers_until_shutdown() {
        let mut input = Vec::new();
        write_frame(&mut input, &WorkerRequest::Run(batch(1, &["x\n"]))).unwrap();
        write_frame(&mut input, &WorkerRequest::Run(batch(2, &["y\n", "z\n"]))).unwrap();
        write_frame(&mut input, &WorkerRequest::Shutdown).unwrap();
        write_frame(&mut input, &WorkerRequest::Run(batch(3, &["ignored\n"]))).unwrap();

        let mut output = Vec::new();
        serve(&LineCountRunner::new(), Cursor::new(input), &mut output).unwrap();

        let mut cursor = Cursor::new(output);
        let first: BatchResponse = read_frame(&mut cursor).unwrap().unwrap();
        let second: BatchResponse = read_frame(&mut cursor).unwrap().unwrap();
        assert_eq!(first.batch_id, 1);
        assert_eq!(second.results.len(), 2);
        assert!(read_frame::<_, BatchResponse>(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn test_serve_refuses_foreign_analyzer() {
        let mut foreign = batch(5, &["x\n"]);
        foreign.analyzer = "complexity@3".to_string();
        let mut input = Vec::new();
        write_frame(&mut input, &WorkerRequest::Run(batch(4, &["ok\n"]))).unwrap();
        write_frame(&mut input, &WorkerRequest::Run(foreign)).unwrap();

        let mut output = Vec::new();
        let err = serve(&LineCountRunner::new(), Cursor::new(input), &mut output).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert!(err.to_string().contains("complexity@3"));

        // Only the matching batch was answered.
        let mut cursor = Cursor::new(output);
        let first: BatchResponse = read_frame(&mut cursor).unwrap().unwrap();
        assert_eq!(first.batch_id, 4);
        assert!(read_frame::<_, BatchResponse>(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn test_serve_stops_at_eof() {
        let mut output = Vec::new();
        serve(&LineCountRunner::new(), Cursor::new(Vec::new()), &mut output).unwrap();
        assert!(output.is_empty());
    }
}
