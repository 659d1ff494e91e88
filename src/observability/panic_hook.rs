//! Panic hook that prints a structured crash report.
//!
//! The report names the engine phase, the file being analyzed and overall
//! progress, taken from the thread-local [`context`](super::context).

use super::context::{get_current_context, get_progress, AnalysisContext};
use std::panic::PanicHookInfo;
use tracing::Span;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const RULE: &str = "================================================================";

/// Install the crash-report hook. Call early in `main`.
pub fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        eprintln!("{}", crash_report(info));
    }));
}

fn crash_report(info: &PanicHookInfo<'_>) -> String {
    let context = get_current_context();
    let (processed, total) = get_progress();
    let mut lines = vec![
        RULE.to_string(),
        format!(
            "metricore {} crashed on {} at {}",
            VERSION,
            std::env::consts::OS,
            chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
        ),
        format!("panic: {}", panic_message(info)),
    ];
    if let Some(location) = info.location() {
        lines.push(format!(
            "location: {}:{}:{}",
            location.file(),
            location.line(),
            location.column()
        ));
    }
    if let Some(metadata) = Span::current().metadata() {
        lines.push(format!("span: {}", metadata.name()));
    }
    lines.extend(context_lines(&context, processed, total));
    if std::env::var_os("RUST_BACKTRACE").is_some() {
        lines.push(std::backtrace::Backtrace::capture().to_string());
    } else {
        lines.push("run with RUST_BACKTRACE=1 for a stack trace".to_string());
    }
    lines.push(RULE.to_string());
    lines.join("\n")
}

/// Pure function to render the context part of a report
fn context_lines(context: &AnalysisContext, processed: usize, total: usize) -> Vec<String> {
    let mut lines = Vec::new();
    match context.phase {
        Some(phase) => lines.push(format!("phase: {}", phase)),
        None => lines.push("phase: (none)".to_string()),
    }
    if let Some(file) = &context.current_file {
        lines.push(format!("file: {}", file.display()));
    }
    if total > 0 {
        let pct = (processed as f64 / total as f64 * 100.0) as usize;
        lines.push(format!("progress: {} / {} files ({}%)", processed, total, pct));
    }
    lines
}

fn panic_message(info: &PanicHookInfo<'_>) -> String {
    crate::pool::panic_message(info.payload())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::AnalysisPhase;
    use std::path::PathBuf;

    #[test]
    fn test_context_lines_include_file_and_progress() {
        let context = AnalysisContext {
            phase: Some(AnalysisPhase::Execution),
            current_file: Some(PathBuf::from("pkg/mod.py")),
        };
        let lines = context_lines(&context, 5, 20);
        assert_eq!(lines[0], "phase: execution");
        assert_eq!(lines[1], "file: pkg/mod.py");
        assert_eq!(lines[2], "progress: 5 / 20 files (25%)");
    }

    #[test]
    fn test_context_lines_without_phase() {
        let lines = context_lines(&AnalysisContext::new(), 0, 0);
        assert_eq!(lines, vec!["phase: (none)".to_string()]);
    }
}
