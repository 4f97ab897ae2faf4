use serde::{Deserialize, Serialize};

/// Samples needed before p99 is reported.
pub const P99_MIN_SAMPLES: usize = 10;

/// Percentile summary of one result's samples, in milliseconds.
///
/// Percentiles use the nearest-rank definition: the value at 1-indexed rank
/// `ceil(N * p)` of the ascending samples. The mean is reported for
/// reference and never feeds a decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub samples: usize,
    pub p50_ms: f64,
    pub p95_ms: f64,
    /// Omitted below [`P99_MIN_SAMPLES`] samples
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p99_ms: Option<f64>,
    pub mean_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
}

/// 0-based index of the nearest-rank `percent`-th percentile among `n` values.
///
/// Integer arithmetic keeps `ceil` exact at boundaries such as `20 * 0.95`.
pub fn rank_index(n: usize, percent: usize) -> usize {
    debug_assert!(n > 0 && percent <= 100);
    let rank = (n * percent).div_ceil(100);
    rank.max(1) - 1
}

/// Summarize durations; `None` for an empty sequence.
pub fn summarize(durations_ms: &[f64]) -> Option<LatencySummary> {
    if durations_ms.is_empty() {
        return None;
    }
    let mut sorted = durations_ms.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();

    let p99_ms = (n >= P99_MIN_SAMPLES).then(|| sorted[rank_index(n, 99)]);
    Some(LatencySummary {
        samples: n,
        p50_ms: sorted[rank_index(n, 50)],
        p95_ms: sorted[rank_index(n, 95)],
        p99_ms,
        mean_ms: sorted.iter().sum::<f64>() / n as f64,
        min_ms: sorted[0],
        max_ms: sorted[n - 1],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_sample() {
        let s = summarize(&[7.5]).unwrap();
        assert_eq!(s.p50_ms, 7.5);
        assert_eq!(s.p95_ms, 7.5);
        assert_eq!(s.p99_ms, None);
        assert_eq!(s.mean_ms, 7.5);
    }

    #[test]
    fn five_samples_with_outlier() {
        let s = summarize(&[10.0, 11.0, 10.0, 11.0, 50.0]).unwrap();
        assert_eq!(s.p50_ms, 11.0);
        assert_eq!(s.p95_ms, 50.0);
        assert_eq!(s.p99_ms, None);
        assert_eq!(s.min_ms, 10.0);
        assert_eq!(s.max_ms, 50.0);
        assert!((s.mean_ms - 18.4).abs() < 1e-9);
    }

    #[test]
    fn ten_samples_report_p99() {
        let samples: Vec<f64> = (1..=10).rev().map(f64::from).collect();
        let s = summarize(&samples).unwrap();
        assert_eq!(s.p50_ms, 5.0);
        assert_eq!(s.p95_ms, 10.0);
        assert_eq!(s.p99_ms, Some(10.0));
    }

    #[test]
    fn rank_index_matches_nearest_rank() {
        assert_eq!(rank_index(1, 50), 0);
        assert_eq!(rank_index(5, 50), 2);
        assert_eq!(rank_index(5, 95), 4);
        assert_eq!(rank_index(10, 50), 4);
        assert_eq!(rank_index(20, 95), 18);
        assert_eq!(rank_index(100, 99), 98);
        assert_eq!(rank_index(3, 0), 0);
    }

    #[test]
    fn empty_has_no_summary() {
        assert!(summarize(&[]).is_none());
    }

    #[test]
    fn p99_omitted_when_absent_in_json() {
        let s = summarize(&[1.0, 2.0]).unwrap();
        let json = serde_json::to_value(&s).unwrap();
        assert!(json.get("p99_ms").is_none());
    }
}
