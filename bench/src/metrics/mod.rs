use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

pub mod reporter;
pub mod stats;

pub use reporter::ResultsReporter;
pub use stats::{summarize, LatencySummary};

use crate::cache::CacheMode;
use crate::decision::RunSummary;
use crate::environment::EnvironmentSnapshot;
use crate::error::BenchError;
use crate::regression::RegressionVerdict;
use crate::workload::SuiteMode;

/// One measured execution. Never mutated after it is recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSample {
    pub workload_id: String,
    pub query_id: String,
    pub engine: String,
    pub cache_mode: CacheMode,
    pub duration_ms: f64,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Ok,
    Incomplete,
    Skipped,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Ok => "ok",
            RunStatus::Incomplete => "incomplete",
            RunStatus::Skipped => "skipped",
        }
    }
}

/// Structural metrics of one engine's index on one workload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMetrics {
    pub engine: String,
    pub index_name: String,
    pub size_bytes: Option<u64>,
    pub build_time_ms: Option<f64>,
}

/// Aggregate for one (workload, query, engine, cache mode)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub workload_id: String,
    pub query_id: String,
    pub engine: String,
    pub cache_mode: CacheMode,
    /// Samples required for the result to be complete
    pub repeat: u32,
    pub status: RunStatus,
    pub samples: Vec<RunSample>,
    /// Present only when `status` is `ok`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<LatencySummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<IndexMetrics>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Absent when no baseline entry exists for this key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regression: Option<RegressionVerdict>,
}

impl RunResult {
    /// A result that was never measured.
    pub fn skipped(
        workload_id: &str,
        query_id: &str,
        engine: &str,
        cache_mode: CacheMode,
        repeat: u32,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            workload_id: workload_id.to_string(),
            query_id: query_id.to_string(),
            engine: engine.to_string(),
            cache_mode,
            repeat,
            status: RunStatus::Skipped,
            samples: Vec::new(),
            summary: None,
            index: None,
            annotations: Vec::new(),
            error: Some(reason.into()),
            regression: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == RunStatus::Ok
    }

    pub fn p50_ms(&self) -> Option<f64> {
        self.summary.as_ref().map(|s| s.p50_ms)
    }

    pub fn index_size_bytes(&self) -> Option<u64> {
        self.index.as_ref().and_then(|i| i.size_bytes)
    }
}

/// Collects samples for one result.
///
/// The summary is computed only when the sample count reaches the
/// expected repeat count; a failed or short sequence becomes an
/// incomplete result that keeps its raw samples but has no percentiles.
#[derive(Debug)]
pub struct ResultRecorder {
    workload_id: String,
    query_id: String,
    engine: String,
    cache_mode: CacheMode,
    expected: u32,
    samples: Vec<RunSample>,
    annotations: Vec<String>,
}

impl ResultRecorder {
    pub fn new(
        workload_id: &str,
        query_id: &str,
        engine: &str,
        cache_mode: CacheMode,
        expected: u32,
    ) -> Self {
        Self {
            workload_id: workload_id.to_string(),
            query_id: query_id.to_string(),
            engine: engine.to_string(),
            cache_mode,
            expected: expected.max(1),
            samples: Vec::with_capacity(expected as usize),
            annotations: Vec::new(),
        }
    }

    pub fn record(&mut self, duration_ms: f64) {
        self.samples.push(RunSample {
            workload_id: self.workload_id.clone(),
            query_id: self.query_id.clone(),
            engine: self.engine.clone(),
            cache_mode: self.cache_mode,
            duration_ms,
            recorded_at: Utc::now(),
        });
    }

    pub fn annotate(&mut self, notes: &[String]) {
        for note in notes {
            if !self.annotations.contains(note) {
                self.annotations.push(note.clone());
            }
        }
    }

    /// Samples recorded so far
    pub fn collected(&self) -> usize {
        self.samples.len()
    }

    pub fn finish(self) -> RunResult {
        if self.samples.len() < self.expected as usize {
            let reason = format!(
                "collected {} of {} samples",
                self.samples.len(),
                self.expected
            );
            return self.into_result(RunStatus::Incomplete, Some(reason));
        }
        self.into_result(RunStatus::Ok, None)
    }

    pub fn fail(self, error: &BenchError) -> RunResult {
        self.into_result(RunStatus::Incomplete, Some(error.to_string()))
    }

    fn into_result(self, status: RunStatus, error: Option<String>) -> RunResult {
        let summary = if status == RunStatus::Ok {
            let durations: Vec<f64> = self.samples.iter().map(|s| s.duration_ms).collect();
            summarize(&durations)
        } else {
            None
        };
        RunResult {
            workload_id: self.workload_id,
            query_id: self.query_id,
            engine: self.engine,
            cache_mode: self.cache_mode,
            repeat: self.expected,
            status,
            samples: self.samples,
            summary,
            index: None,
            annotations: self.annotations,
            error,
            regression: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadStatus {
    Completed,
    Skipped,
}

/// What happened to one workload as a unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadOutcome {
    pub workload_id: String,
    pub description: String,
    pub table: String,
    pub status: WorkloadStatus,
    /// Data was loaded by this run rather than reused
    pub generated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_secs: f64,
}

/// Wall-clock budget accounting for the run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetState {
    pub limit_secs: u64,
    pub elapsed_secs: f64,
    /// Workloads were left unscheduled because the budget ran out
    pub exhausted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnginePair {
    pub baseline: String,
    pub candidate: String,
}

/// Everything a run produced, as written to the JSON artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunArtifact {
    pub run_id: Uuid,
    pub mode: SuiteMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub environment: EnvironmentSnapshot,
    pub engines: EnginePair,
    pub baseline_loaded: bool,
    pub budget: BudgetState,
    pub workloads: Vec<WorkloadOutcome>,
    pub results: Vec<RunResult>,
    pub summary: RunSummary,
}

impl RunArtifact {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read results file {}", path.display()))?;
        let artifact: RunArtifact =
            serde_json::from_str(&contents).context("Failed to parse results JSON")?;
        Ok(artifact)
    }

    /// `<mode>-<YYYYMMDD-HHMMSS>`, the stem shared by every artifact file.
    pub fn file_stem(&self) -> String {
        format!("{}-{}", self.mode, self.started_at.format("%Y%m%d-%H%M%S"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_result_has_summary() {
        let mut r = ResultRecorder::new("w", "q", "btree", CacheMode::Hot, 3);
        for d in [3.0, 1.0, 2.0] {
            r.record(d);
        }
        let result = r.finish();
        assert_eq!(result.status, RunStatus::Ok);
        assert_eq!(result.summary.as_ref().unwrap().p50_ms, 2.0);
        assert_eq!(result.samples.len(), 3);
        assert_eq!(result.samples[0].duration_ms, 3.0);
    }

    #[test]
    fn short_sequence_is_incomplete_without_percentiles() {
        let mut r = ResultRecorder::new("w", "q", "btree", CacheMode::Hot, 5);
        r.record(1.0);
        r.record(2.0);
        let result = r.finish();
        assert_eq!(result.status, RunStatus::Incomplete);
        assert!(result.summary.is_none());
        assert_eq!(result.samples.len(), 2);
        assert!(result.error.unwrap().contains("2 of 5"));
    }

    #[test]
    fn failure_keeps_partial_samples() {
        let mut r = ResultRecorder::new("w", "q", "smol", CacheMode::Warm, 5);
        r.record(1.0);
        let result = r.fail(&BenchError::QueryTimeout {
            sql: "SELECT 1".into(),
            limit_ms: 10,
        });
        assert_eq!(result.status, RunStatus::Incomplete);
        assert_eq!(result.samples.len(), 1);
        assert!(result.summary.is_none());
        assert!(result.error.unwrap().contains("statement timeout"));
    }

    #[test]
    fn regression_field_absent_when_unset() {
        let mut r = ResultRecorder::new("w", "q", "smol", CacheMode::Hot, 1);
        r.record(1.0);
        let json = serde_json::to_value(r.finish()).unwrap();
        assert!(json.get("regression").is_none());
        assert_eq!(json["status"], "ok");
    }
}
