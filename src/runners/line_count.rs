//! Line counting runner.
//!
//! Reports total, source, comment and blank lines. Lines whose first
//! non-whitespace characters are `#` or `//` count as comments.

use crate::core::{Metric, MetricResult, MetricType, Runner};
use crate::errors::AnalysisError;
use std::path::Path;

const COMMENT_MARKERS: [&str; 2] = ["#", "//"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LineCounts {
    pub total: usize,
    pub source: usize,
    pub comment: usize,
    pub blank: usize,
}

/// Pure function to classify every line of `text`
pub fn count_lines(text: &str) -> LineCounts {
    text.lines().fold(LineCounts::default(), |mut counts, line| {
        counts.total += 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            counts.blank += 1;
        } else if COMMENT_MARKERS.iter().any(|m| trimmed.starts_with(m)) {
            counts.comment += 1;
        } else {
            counts.source += 1;
        }
        counts
    })
}

#[derive(Debug, Clone, Default)]
pub struct LineCountRunner;

impl LineCountRunner {
    pub fn new() -> Self {
        Self
    }

    fn decode<'a>(path: &Path, content: &'a [u8]) -> Result<&'a str, AnalysisError> {
        std::str::from_utf8(content)
            .map_err(|e| AnalysisError::parse(path, format!("not valid UTF-8: {}", e)))
    }
}

impl Runner for LineCountRunner {
    fn name(&self) -> &str {
        "lines"
    }

    fn version(&self) -> &str {
        "1"
    }

    fn analyze(&self, path: &Path, content: &[u8]) -> Result<MetricResult, AnalysisError> {
        let counts = count_lines(Self::decode(path, content)?);
        Ok(MetricResult::new(vec![
            Metric::file_level(MetricType::LinesOfCode, counts.total as f64),
            Metric::file_level(MetricType::SourceLinesOfCode, counts.source as f64),
            Metric::file_level(MetricType::CommentLines, counts.comment as f64),
            Metric::file_level(MetricType::BlankLines, counts.blank as f64),
        ]))
    }

    /// Trailing whitespace and line endings stripped; every counted
    /// property survives this normalization.
    fn structural_digest(
        &self,
        path: &Path,
        content: &[u8],
    ) -> Result<Option<Vec<u8>>, AnalysisError> {
        let text = Self::decode(path, content)?;
        let normalized: Vec<&str> = text.lines().map(str::trim_end).collect();
        Ok(Some(normalized.join("\n").into_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn test_count_lines() {
        let source = indoc! {"
            # header
            def f():

                // odd but counted
                return 1
        "};
        assert_eq!(
            count_lines(source),
            LineCounts {
                total: 5,
                source: 2,
                comment: 2,
                blank: 1,
            }
        );
    }

    #[test]
    fn test_empty_content() {
        let result = LineCountRunner::new().analyze(Path::new("e.py"), b"").unwrap();
        assert_eq!(result.file_value(MetricType::LinesOfCode), Some(0.0));
    }

    #[test]
    fn test_invalid_utf8_is_parse_error() {
        let err = LineCountRunner::new()
            .analyze(Path::new("bin.py"), &[0xff, 0xfe, 0x00])
            .unwrap_err();
        assert!(matches!(err, AnalysisError::Parse { .. }));
    }

    #[test]
    fn test_digest_ignores_trailing_whitespace_and_crlf() {
        let runner = LineCountRunner::new();
        let a = runner.structural_digest(Path::new("a"), b"x = 1\r\ny = 2  \n").unwrap();
        let b = runner.structural_digest(Path::new("b"), b"x = 1\ny = 2\n").unwrap();
        assert_eq!(a, b);

        let changed = runner.structural_digest(Path::new("c"), b"x = 1\n# y\n").unwrap();
        assert_ne!(a, changed);
    }

    #[test]
    fn test_equal_digest_implies_equal_metrics() {
        let runner = LineCountRunner::new();
        let a: &[u8] = b"a\n  \n# c\t\n";
        let b: &[u8] = b"a \r\n\n# c\n";
        assert_eq!(
            runner.structural_digest(Path::new("a"), a).unwrap(),
            runner.structural_digest(Path::new("b"), b).unwrap()
        );
        assert_eq!(
            runner.analyze(Path::new("a"), a).unwrap(),
            runner.analyze(Path::new("b"), b).unwrap()
        );
    }

    #[test]
    fn test_analyzer_version() {
        assert_eq!(LineCountRunner::new().analyzer_version(), "lines@1");
    }
}
