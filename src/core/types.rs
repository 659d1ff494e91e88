use crate::errors::AnalysisError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Kind of metric a runner can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    CyclomaticComplexity,
    CognitiveComplexity,
    MaintainabilityIndex,
    HalsteadVolume,
    HalsteadDifficulty,
    HalsteadEffort,
    HalsteadTime,
    HalsteadBugs,
    LinesOfCode,
    LogicalLinesOfCode,
    SourceLinesOfCode,
    CommentLines,
    BlankLines,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CyclomaticComplexity => "cyclomatic_complexity",
            Self::CognitiveComplexity => "cognitive_complexity",
            Self::MaintainabilityIndex => "maintainability_index",
            Self::HalsteadVolume => "halstead_volume",
            Self::HalsteadDifficulty => "halstead_difficulty",
            Self::HalsteadEffort => "halstead_effort",
            Self::HalsteadTime => "halstead_time",
            Self::HalsteadBugs => "halstead_bugs",
            Self::LinesOfCode => "lines_of_code",
            Self::LogicalLinesOfCode => "logical_lines_of_code",
            Self::SourceLinesOfCode => "source_lines_of_code",
            Self::CommentLines => "comment_lines",
            Self::BlankLines => "blank_lines",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single measured value, either file-level or scoped to one function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub metric_type: MetricType,
    pub value: f64,
    pub function_name: Option<String>,
    pub line_number: Option<u32>,
}

impl Metric {
    pub fn file_level(metric_type: MetricType, value: f64) -> Self {
        Self {
            metric_type,
            value,
            function_name: None,
            line_number: None,
        }
    }

    pub fn for_function(
        metric_type: MetricType,
        value: f64,
        function_name: impl Into<String>,
        line_number: u32,
    ) -> Self {
        Self {
            metric_type,
            value,
            function_name: Some(function_name.into()),
            line_number: Some(line_number),
        }
    }

    pub fn is_file_level(&self) -> bool {
        self.function_name.is_none()
    }
}

/// Payload produced by a runner for one file.
///
/// This is the unit the cache stores (compressed) and the unit that crosses
/// the process-pool boundary.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MetricResult {
    pub metrics: Vec<Metric>,
}

impl MetricResult {
    pub fn new(metrics: Vec<Metric>) -> Self {
        Self { metrics }
    }

    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.metrics.push(metric);
        self
    }

    /// First file-level value recorded for `metric_type`.
    pub fn file_value(&self, metric_type: MetricType) -> Option<f64> {
        self.metrics
            .iter()
            .find(|m| m.metric_type == metric_type && m.is_file_level())
            .map(|m| m.value)
    }

    /// Highest function-level value recorded for `metric_type`.
    pub fn max_function_value(&self, metric_type: MetricType) -> Option<f64> {
        self.metrics
            .iter()
            .filter(|m| m.metric_type == metric_type && !m.is_file_level())
            .map(|m| m.value)
            .reduce(f64::max)
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }
}

/// Final output unit: one per input file, in input order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult {
    pub file_path: PathBuf,
    pub outcome: Result<MetricResult, AnalysisError>,
    pub from_cache: bool,
}

impl AnalysisResult {
    pub fn fresh(file_path: impl Into<PathBuf>, metrics: MetricResult) -> Self {
        Self {
            file_path: file_path.into(),
            outcome: Ok(metrics),
            from_cache: false,
        }
    }

    pub fn cached(file_path: impl Into<PathBuf>, metrics: MetricResult) -> Self {
        Self {
            file_path: file_path.into(),
            outcome: Ok(metrics),
            from_cache: true,
        }
    }

    pub fn failed(file_path: impl Into<PathBuf>, error: AnalysisError) -> Self {
        Self {
            file_path: file_path.into(),
            outcome: Err(error),
            from_cache: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn metrics(&self) -> Option<&MetricResult> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&AnalysisError> {
        self.outcome.as_ref().err()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MetricResult {
        MetricResult::default()
            .with_metric(Metric::file_level(MetricType::LinesOfCode, 120.0))
            .with_metric(Metric::for_function(
                MetricType::CyclomaticComplexity,
                4.0,
                "parse",
                10,
            ))
            .with_metric(Metric::for_function(
                MetricType::CyclomaticComplexity,
                9.0,
                "render",
                42,
            ))
    }

    #[test]
    fn test_file_value_ignores_function_metrics() {
        let result = sample();
        assert_eq!(result.file_value(MetricType::LinesOfCode), Some(120.0));
        assert_eq!(result.file_value(MetricType::CyclomaticComplexity), None);
    }

    #[test]
    fn test_max_function_value() {
        let result = sample();
        assert_eq!(
            result.max_function_value(MetricType::CyclomaticComplexity),
            Some(9.0)
        );
        assert_eq!(result.max_function_value(MetricType::HalsteadBugs), None);
    }

    #[test]
    fn test_metric_type_names_match_serde() {
        let json = serde_json::to_string(&MetricType::HalsteadVolume).unwrap();
        assert_eq!(json, "\"halstead_volume\"");
        assert_eq!(MetricType::HalsteadVolume.to_string(), "halstead_volume");
    }

    #[test]
    fn test_analysis_result_accessors() {
        let ok = AnalysisResult::cached("a.py", sample());
        assert!(ok.is_ok());
        assert!(ok.from_cache);
        assert_eq!(ok.metrics().map(|m| m.len()), Some(3));

        let failed = AnalysisResult::failed("b.py", AnalysisError::Cancelled);
        assert!(!failed.is_ok());
        assert!(!failed.from_cache);
        assert_eq!(failed.error(), Some(&AnalysisError::Cancelled));
    }
}
