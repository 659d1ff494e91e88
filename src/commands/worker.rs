use crate::pool::worker::serve;
use crate::runners::LineCountRunner;
use anyhow::Result;

/// Body of `metricore worker`: answer batch frames on stdin/stdout.
pub fn run_worker() -> Result<()> {
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    serve(&LineCountRunner::new(), stdin.lock(), stdout.lock())?;
    Ok(())
}
