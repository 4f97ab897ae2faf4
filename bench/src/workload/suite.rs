use serde::{Deserialize, Serialize};
use std::fmt;

use super::{KeyType, SqlWorkload, TextKey, Workload, WorkloadPattern};
use crate::cache::CacheMode;
use crate::environment::EnvironmentSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuiteMode {
    /// Reduced workload subset at the tier's smallest row count
    Quick,
    /// Core workloads at every row-count candidate of the tier
    Full,
}

impl fmt::Display for SuiteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SuiteMode::Quick => f.write_str("quick"),
            SuiteMode::Full => f.write_str("full"),
        }
    }
}

/// Workload registrations for a run, in execution order.
pub fn build_suite(
    mode: SuiteMode,
    env: &EnvironmentSnapshot,
    seed: u64,
) -> Vec<Box<dyn Workload>> {
    let profile = env.profile();
    match mode {
        SuiteMode::Quick => {
            let rows = profile.row_counts.first().copied().unwrap_or(100_000);
            let workers = env.max_parallel_workers.unwrap_or(0).min(4);
            let hot = |pattern| -> Box<dyn Workload> {
                Box::new(SqlWorkload::new(pattern, rows, &[CacheMode::Hot], seed))
            };

            let mut suite: Vec<Box<dyn Workload>> = vec![
                Box::new(SqlWorkload::new(
                    WorkloadPattern::TimeSeries { metrics: 50 },
                    rows,
                    &[CacheMode::Hot, CacheMode::Cold],
                    seed,
                )),
                hot(WorkloadPattern::TextKeys(TextKey::Uuid)),
                hot(WorkloadPattern::TextKeys(TextKey::Utf8)),
                hot(WorkloadPattern::Composite),
                hot(WorkloadPattern::Selectivity { fraction: 0.001 }),
                hot(WorkloadPattern::Selectivity { fraction: 0.10 }),
            ];
            if workers > 0 {
                suite.push(Box::new(
                    SqlWorkload::new(
                        WorkloadPattern::Selectivity { fraction: 0.50 },
                        rows,
                        &[CacheMode::Hot],
                        seed,
                    )
                    .with_parallelism(workers),
                ));
            }
            suite.extend([
                hot(WorkloadPattern::IncludeOverhead { columns: 0 }),
                hot(WorkloadPattern::IncludeOverhead { columns: 4 }),
                hot(WorkloadPattern::TimeSeries { metrics: 10 }),
                hot(WorkloadPattern::BackwardScan),
                hot(WorkloadPattern::Limit),
                hot(WorkloadPattern::InClause),
                hot(WorkloadPattern::DataType(KeyType::Int2)),
                hot(WorkloadPattern::DataType(KeyType::Int8)),
                hot(WorkloadPattern::DataType(KeyType::Date)),
                hot(WorkloadPattern::IndexOnly),
                hot(WorkloadPattern::Partial),
            ]);
            suite
        }
        SuiteMode::Full => {
            let modes = profile.cache_modes;
            let mut suite: Vec<Box<dyn Workload>> = Vec::new();
            for &rows in profile.row_counts {
                suite.push(Box::new(SqlWorkload::new(
                    WorkloadPattern::TimeSeries { metrics: 50 },
                    rows,
                    modes,
                    seed,
                )));
                // Dimension tables stay small; register the capped size once.
                let dimension =
                    SqlWorkload::new(WorkloadPattern::Dimension, rows.min(100_000), modes, seed);
                if !suite.iter().any(|w| w.id() == dimension.id()) {
                    suite.push(Box::new(dimension));
                }
                suite.push(Box::new(SqlWorkload::new(
                    WorkloadPattern::Events {
                        distinct_users: rows / 100,
                    },
                    rows,
                    modes,
                    seed,
                )));
                suite.push(Box::new(SqlWorkload::new(
                    WorkloadPattern::Sparse,
                    rows,
                    modes,
                    seed,
                )));
                suite.push(Box::new(SqlWorkload::new(
                    WorkloadPattern::Composite,
                    rows,
                    modes,
                    seed,
                )));
            }
            suite
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(suite: &[Box<dyn Workload>]) -> Vec<String> {
        suite.iter().map(|w| w.id().to_string()).collect()
    }

    #[test]
    fn quick_uses_smallest_row_count() {
        let env = EnvironmentSnapshot::from_capacity(Some(128 * 1024 * 1024));
        let suite = build_suite(SuiteMode::Quick, &env, 42);
        assert!(ids(&suite).iter().all(|id| id.contains("100k")));
        assert_eq!(suite.len(), 17);
        let mut unique = ids(&suite);
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 17);
        for family in ["textkeys_", "include_", "dtype_", "ios_", "partial_"] {
            assert!(ids(&suite).iter().any(|id| id.starts_with(family)), "{}", family);
        }
        let cold_queries = suite[0]
            .queries()
            .iter()
            .filter(|q| q.cache_mode == CacheMode::Cold)
            .count();
        assert_eq!(cold_queries, 2);
    }

    #[test]
    fn quick_adds_parallel_workload_when_workers_exist() {
        let mut env = EnvironmentSnapshot::from_capacity(Some(128 * 1024 * 1024));
        env.max_parallel_workers = Some(8);
        let suite = build_suite(SuiteMode::Quick, &env, 42);
        assert_eq!(suite.len(), 18);
        assert_eq!(suite[6].id(), "selectivity_100k_50_0pct");
        assert_eq!(suite[6].parallelism(), 4);
        assert_eq!(suite.iter().filter(|w| w.parallelism() > 0).count(), 1);
    }

    #[test]
    fn full_covers_every_row_count() {
        let env = EnvironmentSnapshot::from_capacity(Some(4 * 1024 * 1024 * 1024));
        let suite = build_suite(SuiteMode::Full, &env, 42);
        assert_eq!(suite.len(), 9);
        let ids = ids(&suite);
        assert_eq!(ids.iter().filter(|id| id.starts_with("dimension")).count(), 1);
        assert!(ids.contains(&"timeseries_20000k_50m_ultra_low_card".to_string()));
        assert!(ids.contains(&"timeseries_50000k_50m_ultra_low_card".to_string()));
        assert!(ids.contains(&"dimension_100k".to_string()));
        for w in &suite {
            let modes: Vec<_> = w.queries().iter().map(|q| q.cache_mode).collect();
            assert!(modes.contains(&CacheMode::Warm));
        }
    }
}
