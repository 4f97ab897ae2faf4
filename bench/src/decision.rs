//! Per-workload recommendations and the run summary.
//!
//! Pure aggregation over finished results: no I/O, no timing.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::cache::CacheMode;
use crate::metrics::{RunResult, RunStatus, WorkloadOutcome, WorkloadStatus};
use crate::regression::Verdict;

/// Speedup/compression cut-offs for recommendations
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DecisionThresholds {
    pub strong_speedup: f64,
    pub strong_compression: f64,
    pub speedup: f64,
    pub size_only_compression: f64,
    pub avoid_below: f64,
}

impl Default for DecisionThresholds {
    fn default() -> Self {
        Self {
            strong_speedup: 1.3,
            strong_compression: 2.0,
            speedup: 1.2,
            size_only_compression: 3.0,
            avoid_below: 0.9,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    StronglyRecommend,
    Recommend,
    Neutral,
    /// The candidate engine is slower; keep the baseline engine
    AvoidIndexB,
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Recommendation::StronglyRecommend => "strongly recommend",
            Recommendation::Recommend => "recommend",
            Recommendation::Neutral => "neutral",
            Recommendation::AvoidIndexB => "avoid",
        };
        f.write_str(s)
    }
}

impl DecisionThresholds {
    /// `compression` is `None` when either index size is unknown.
    pub fn classify(&self, speedup: f64, compression: Option<f64>) -> Recommendation {
        let compression = compression.unwrap_or(0.0);
        if speedup >= self.strong_speedup && compression >= self.strong_compression {
            Recommendation::StronglyRecommend
        } else if speedup >= self.speedup || compression >= self.size_only_compression {
            Recommendation::Recommend
        } else if speedup < self.avoid_below {
            Recommendation::AvoidIndexB
        } else {
            Recommendation::Neutral
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadRecommendation {
    pub workload_id: String,
    /// `None` when no query had complete results for both engines
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<Recommendation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_mode: Option<CacheMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speedup: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<f64>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub ok: usize,
    pub incomplete: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerdictCounts {
    pub ok: usize,
    pub warning: usize,
    pub critical: usize,
    /// Candidate results with no baseline entry to compare against
    pub no_baseline: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub results: StatusCounts,
    pub workloads_completed: usize,
    pub workloads_skipped: usize,
    pub verdicts: VerdictCounts,
    pub budget_truncated: bool,
    pub recommendations: Vec<WorkloadRecommendation>,
}

impl RunSummary {
    pub fn has_regressions(&self) -> bool {
        self.verdicts.warning > 0 || self.verdicts.critical > 0
    }
}

/// Compare the two engines on one workload.
///
/// Uses the first query, in declared order, that has complete results for
/// both engines under the same cache mode.
pub fn recommend(
    workload_id: &str,
    results: &[RunResult],
    baseline_engine: &str,
    candidate_engine: &str,
    thresholds: &DecisionThresholds,
) -> WorkloadRecommendation {
    let mut rec = WorkloadRecommendation {
        workload_id: workload_id.to_string(),
        recommendation: None,
        query_id: None,
        cache_mode: None,
        speedup: None,
        compression: None,
        reason: String::new(),
    };

    let pair = complete(results, workload_id, candidate_engine).find_map(|cand| {
        complete(results, workload_id, baseline_engine)
            .find(|base| base.query_id == cand.query_id && base.cache_mode == cand.cache_mode)
            .map(|base| (base, cand))
    });

    let Some((base, cand)) = pair else {
        rec.reason = "no query completed on both engines".to_string();
        return rec;
    };
    let (Some(base_p50), Some(cand_p50)) = (base.p50_ms(), cand.p50_ms()) else {
        rec.reason = "missing latency summary".to_string();
        return rec;
    };
    if cand_p50 <= 0.0 {
        rec.reason = "candidate latency is zero".to_string();
        return rec;
    }

    let speedup = base_p50 / cand_p50;
    let compression = match (base.index_size_bytes(), cand.index_size_bytes()) {
        (Some(b), Some(c)) if c > 0 => Some(b as f64 / c as f64),
        _ => None,
    };
    let recommendation = thresholds.classify(speedup, compression);

    rec.reason = match (recommendation, compression) {
        (Recommendation::AvoidIndexB, _) => {
            format!("{} is {:.1}x slower", candidate_engine, 1.0 / speedup)
        }
        (_, Some(c)) => format!("{:.2}x faster, {:.1}x smaller", speedup, c),
        (_, None) => format!("{:.2}x faster, size unknown", speedup),
    };
    rec.recommendation = Some(recommendation);
    rec.query_id = Some(cand.query_id.clone());
    rec.cache_mode = Some(cand.cache_mode);
    rec.speedup = Some(speedup);
    rec.compression = compression;
    rec
}

fn complete<'a>(
    results: &'a [RunResult],
    workload_id: &'a str,
    engine: &'a str,
) -> impl Iterator<Item = &'a RunResult> + 'a {
    results
        .iter()
        .filter(move |r| r.workload_id == workload_id && r.engine == engine && r.is_complete())
}

/// Aggregate every outcome of a run.
pub fn summarize_run(
    workloads: &[WorkloadOutcome],
    results: &[RunResult],
    baseline_engine: &str,
    candidate_engine: &str,
    budget_truncated: bool,
    thresholds: &DecisionThresholds,
) -> RunSummary {
    let mut summary = RunSummary {
        budget_truncated,
        ..Default::default()
    };

    for result in results {
        match result.status {
            RunStatus::Ok => summary.results.ok += 1,
            RunStatus::Incomplete => summary.results.incomplete += 1,
            RunStatus::Skipped => summary.results.skipped += 1,
        }
        match &result.regression {
            Some(v) => match v.worst() {
                Verdict::Ok => summary.verdicts.ok += 1,
                Verdict::Warning { .. } => summary.verdicts.warning += 1,
                Verdict::Critical { .. } => summary.verdicts.critical += 1,
            },
            None if result.engine == candidate_engine && result.is_complete() => {
                summary.verdicts.no_baseline += 1
            }
            None => {}
        }
    }

    for outcome in workloads {
        match outcome.status {
            WorkloadStatus::Completed => {
                summary.workloads_completed += 1;
                summary.recommendations.push(recommend(
                    &outcome.workload_id,
                    results,
                    baseline_engine,
                    candidate_engine,
                    thresholds,
                ));
            }
            WorkloadStatus::Skipped => summary.workloads_skipped += 1,
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{IndexMetrics, ResultRecorder};

    fn result(query: &str, engine: &str, mode: CacheMode, p50: f64, size: u64) -> RunResult {
        let mut r = ResultRecorder::new("w", query, engine, mode, 1);
        r.record(p50);
        let mut result = r.finish();
        result.index = Some(IndexMetrics {
            engine: engine.into(),
            index_name: format!("idx_t_{}", engine),
            size_bytes: Some(size),
            build_time_ms: Some(1.0),
        });
        result
    }

    #[test]
    fn classification_rules() {
        let t = DecisionThresholds::default();
        assert_eq!(t.classify(1.3, Some(2.0)), Recommendation::StronglyRecommend);
        assert_eq!(t.classify(1.29, Some(2.5)), Recommendation::Recommend);
        assert_eq!(t.classify(1.0, Some(3.0)), Recommendation::Recommend);
        assert_eq!(t.classify(0.89, Some(1.0)), Recommendation::AvoidIndexB);
        assert_eq!(t.classify(1.0, Some(1.5)), Recommendation::Neutral);
        assert_eq!(t.classify(0.9, None), Recommendation::Neutral);
    }

    #[test]
    fn strongly_recommend_when_faster_and_smaller() {
        let results = vec![
            result("q1", "btree", CacheMode::Hot, 20.0, 4000),
            result("q1", "smol", CacheMode::Hot, 10.0, 1000),
        ];
        let t = DecisionThresholds::default();
        let rec = recommend("w", &results, "btree", "smol", &t);
        assert_eq!(rec.recommendation, Some(Recommendation::StronglyRecommend));
        assert_eq!(rec.speedup, Some(2.0));
        assert_eq!(rec.compression, Some(4.0));
    }

    #[test]
    fn first_comparable_query_is_used() {
        let mut incomplete = ResultRecorder::new("w", "q1", "smol", CacheMode::Hot, 5);
        incomplete.record(1.0);
        let results = vec![
            result("q1", "btree", CacheMode::Hot, 1.0, 1000),
            incomplete.finish(),
            result("q2", "btree", CacheMode::Hot, 10.0, 1000),
            result("q2", "smol", CacheMode::Hot, 20.0, 1000),
        ];
        let rec = recommend("w", &results, "btree", "smol", &DecisionThresholds::default());
        assert_eq!(rec.query_id.as_deref(), Some("q2"));
        assert_eq!(rec.recommendation, Some(Recommendation::AvoidIndexB));
        assert!(rec.reason.contains("slower"));
    }

    #[test]
    fn modes_must_match() {
        let results = vec![
            result("q1", "btree", CacheMode::Hot, 10.0, 1000),
            result("q1", "smol", CacheMode::Cold, 10.0, 1000),
        ];
        let rec = recommend("w", &results, "btree", "smol", &DecisionThresholds::default());
        assert_eq!(rec.recommendation, None);
        assert!(!rec.reason.is_empty());
    }

    #[test]
    fn summary_counts_statuses() {
        let results = vec![
            result("q1", "btree", CacheMode::Hot, 10.0, 1000),
            result("q1", "smol", CacheMode::Hot, 10.0, 1000),
            RunResult::skipped("w", "q2", "smol", CacheMode::Hot, 5, "index build failed"),
        ];
        let workloads = vec![WorkloadOutcome {
            workload_id: "w".into(),
            description: String::new(),
            table: "t".into(),
            status: WorkloadStatus::Completed,
            generated: true,
            row_count: Some(10),
            error: None,
            elapsed_secs: 1.0,
        }];
        let summary = summarize_run(
            &workloads,
            &results,
            "btree",
            "smol",
            false,
            &DecisionThresholds::default(),
        );
        assert_eq!(summary.results.ok, 2);
        assert_eq!(summary.results.skipped, 1);
        assert_eq!(summary.verdicts.no_baseline, 1);
        assert_eq!(summary.recommendations.len(), 1);
        assert_eq!(
            summary.recommendations[0].recommendation,
            Some(Recommendation::Neutral)
        );
        assert!(!summary.has_regressions());
    }
}
