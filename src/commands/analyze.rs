use crate::config::EngineConfig;
use crate::coordinator::{AnalysisRun, Coordinator};
use crate::core::{AnalysisResult, MetricType};
use crate::runners::LineCountRunner;
use anyhow::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

const MAX_REPORTED_WALK_ERRORS: usize = 10;

/// Directories never descended into.
const SKIPPED_DIRECTORIES: [&str; 5] = [".git", "target", "node_modules", "__pycache__", ".venv"];

#[derive(Debug, Clone)]
pub struct AnalyzeOptions {
    pub paths: Vec<PathBuf>,
    /// Only files with these extensions are collected from directories.
    /// Empty means every file.
    pub extensions: Vec<String>,
    pub json: bool,
}

/// Pure function to check a path against an extension filter
fn matches_extension(path: &Path, extensions: &[String]) -> bool {
    extensions.is_empty()
        || path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| extensions.iter().any(|wanted| wanted == ext))
}

fn is_skipped_directory(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| SKIPPED_DIRECTORIES.contains(&name))
}

/// Expand `paths` into a file list.
///
/// Files named directly are kept as given, even when they do not exist, so
/// the engine can report them. Directories are walked in sorted order.
pub fn discover_files(paths: &[PathBuf], extensions: &[String]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut skipped_count = 0;

    for path in paths {
        if !path.is_dir() {
            files.push(path.clone());
            continue;
        }

        for entry in WalkDir::new(path)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !is_skipped_directory(e))
            .filter_map(|e| match e {
                Ok(entry) => Some(entry),
                Err(err) => {
                    if skipped_count < MAX_REPORTED_WALK_ERRORS {
                        tracing::warn!("Skipping directory entry: {}", err);
                    }
                    skipped_count += 1;
                    None
                }
            })
        {
            if entry.file_type().is_file() && matches_extension(entry.path(), extensions) {
                files.push(entry.into_path());
            }
        }
    }

    if skipped_count > MAX_REPORTED_WALK_ERRORS {
        tracing::warn!(
            "Skipped {} additional directory entries",
            skipped_count - MAX_REPORTED_WALK_ERRORS
        );
    }

    files
}

/// Run the engine and print results. Returns the number of failed files.
pub fn handle_analyze(options: AnalyzeOptions, config: EngineConfig) -> Result<usize> {
    let files = discover_files(&options.paths, &options.extensions);
    tracing::info!(files = files.len(), "Discovered input files");

    let mut coordinator = Coordinator::open(config, Arc::new(LineCountRunner::new()))
        .context("failed to start analysis engine")?;
    let run = coordinator.analyze(&files);
    let failures = run.failures().count();

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    if options.json {
        serde_json::to_writer_pretty(&mut out, &run)?;
        writeln!(out)?;
    } else {
        write_text(&mut out, &run)?;
    }

    coordinator.close().context("failed to close cache")?;
    Ok(failures)
}

fn write_text<W: Write>(out: &mut W, run: &AnalysisRun) -> std::io::Result<()> {
    for result in &run.results {
        writeln!(out, "{}", format_result(result))?;
    }

    let report = &run.report;
    writeln!(out)?;
    writeln!(
        out,
        "{} files: {} cached, {} reused, {} analyzed, {} failed",
        report.files,
        report.cache_hits,
        report.structural_reuses,
        report.entries_written,
        run.failures().count()
    )?;
    if let Some(strategy) = report.strategy {
        writeln!(
            out,
            "strategy: {} ({} batches, {} retried)",
            strategy, report.batches_dispatched, report.fallback_retries
        )?;
    }
    if report.degraded {
        writeln!(out, "degraded: {} events", report.events.len())?;
    }
    Ok(())
}

/// Pure function to render one result line
fn format_result(result: &AnalysisResult) -> String {
    let path = result.path().display();
    match &result.outcome {
        Ok(metrics) => {
            let value = |kind| metrics.file_value(kind).unwrap_or(0.0);
            format!(
                "{}  loc={} sloc={} comments={} blank={}{}",
                path,
                value(MetricType::LinesOfCode),
                value(MetricType::SourceLinesOfCode),
                value(MetricType::CommentLines),
                value(MetricType::BlankLines),
                if result.from_cache { "  (cached)" } else { "" }
            )
        }
        Err(error) => format!("{}  error: {}", path, error),
    }
}
