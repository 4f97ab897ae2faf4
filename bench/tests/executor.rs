mod common;

use common::{FakeClient, ROWS_PER_TABLE};
use indexbench::cache::DEGRADED_EVICTION;
use indexbench::metrics::WorkloadStatus;
use indexbench::workload::{SqlWorkload, WorkloadPattern};
use indexbench::{BenchError, CacheMode, ExecutorOptions, RunStatus, WorkloadExecutor};

fn timeseries(modes: &[CacheMode]) -> SqlWorkload {
    SqlWorkload::new(WorkloadPattern::TimeSeries { metrics: 50 }, 100_000, modes, 42)
}

const TABLE: &str = "bench_timeseries_100k_50m_ultra_low_card";

#[tokio::test]
async fn cold_results_hold_exactly_one_sample() {
    let client = FakeClient::new();
    let executor = WorkloadExecutor::new(&client, ExecutorOptions::default());
    let report = executor
        .execute(&timeseries(&[CacheMode::Hot, CacheMode::Cold]))
        .await
        .unwrap();

    assert_eq!(report.outcome.status, WorkloadStatus::Completed);
    // 2 queries x 2 modes x 2 engines
    assert_eq!(report.results.len(), 8);
    for result in &report.results {
        assert_eq!(result.status, RunStatus::Ok, "{:?}", result.error);
        match result.cache_mode {
            CacheMode::Cold => {
                assert_eq!(result.repeat, 1);
                assert_eq!(result.samples.len(), 1);
                if result.engine == "smol" {
                    assert_eq!(result.p50_ms(), Some(10.0));
                }
            }
            _ => assert_eq!(result.samples.len(), result.repeat as usize),
        }
    }

    let evictions = client.evictions();
    assert!(evictions.contains(&format!("buffers:idx_{}_smol", TABLE)));
    assert!(evictions.contains(&format!("buffers:{}", TABLE)));
}

#[tokio::test]
async fn hot_preparation_replaces_the_warmup_run() {
    let client = FakeClient::new();
    let executor = WorkloadExecutor::new(&client, ExecutorOptions::default());
    let report = executor.execute(&timeseries(&[CacheMode::Hot])).await.unwrap();

    let hot_metric: Vec<_> = report
        .results
        .iter()
        .filter(|r| r.query_id == "hot_metric")
        .collect();
    assert_eq!(hot_metric.len(), 2);
    assert!(hot_metric.iter().all(|r| r.samples.len() == 5));
    // one priming execution plus five measured, per engine
    assert_eq!(client.executions("WHERE metric_id = 5"), 12);
}

#[tokio::test]
async fn warm_mode_checkpoints_and_discards_one_run() {
    let client = FakeClient::new();
    let executor = WorkloadExecutor::new(&client, ExecutorOptions::default());
    let report = executor.execute(&timeseries(&[CacheMode::Warm])).await.unwrap();

    assert!(report.results.iter().all(|r| r.status == RunStatus::Ok));
    assert_eq!(client.executions("CHECKPOINT;"), 4);
    assert_eq!(client.executions("DISCARD PLANS;"), 4);
    assert_eq!(client.executions("WHERE metric_id = 5"), 12);
}

#[tokio::test]
async fn measured_latency_and_index_size_are_per_engine() {
    let client = FakeClient::new();
    let executor = WorkloadExecutor::new(&client, ExecutorOptions::default());
    let report = executor.execute(&timeseries(&[CacheMode::Hot])).await.unwrap();

    for result in &report.results {
        let index = result.index.as_ref().unwrap();
        assert_eq!(index.engine, result.engine);
        match result.engine.as_str() {
            "btree" => {
                assert_eq!(result.p50_ms(), Some(2.0));
                assert_eq!(result.index_size_bytes(), Some(4 * 1024 * 1024));
            }
            "smol" => {
                assert_eq!(result.p50_ms(), Some(1.0));
                assert_eq!(result.index_size_bytes(), Some(1024 * 1024));
            }
            other => panic!("unexpected engine {}", other),
        }
    }
    // indexes are dropped once measured
    assert!(!client.has_index(&format!("idx_{}_btree", TABLE)));
    assert!(!client.has_index(&format!("idx_{}_smol", TABLE)));
}

#[tokio::test]
async fn query_timeout_marks_only_that_result_incomplete() {
    let client = FakeClient::new();
    // First candidate measurement of metric_range times out mid-sequence:
    // btree prep + 5 samples, smol prep + 2 samples pass.
    client.fail_after(
        "BETWEEN 10 AND 20",
        9,
        BenchError::QueryTimeout {
            sql: "metric_range".into(),
            limit_ms: 1000,
        },
    );
    let executor = WorkloadExecutor::new(&client, ExecutorOptions::default());
    let report = executor.execute(&timeseries(&[CacheMode::Hot])).await.unwrap();

    assert_eq!(report.outcome.status, WorkloadStatus::Completed);
    let timed_out = report
        .results
        .iter()
        .find(|r| r.engine == "smol" && r.query_id == "metric_range")
        .unwrap();
    assert_eq!(timed_out.status, RunStatus::Incomplete);
    assert_eq!(timed_out.samples.len(), 2);
    assert!(timed_out.summary.is_none());
    assert!(timed_out.error.as_deref().unwrap().contains("statement timeout"));

    let others_ok = report
        .results
        .iter()
        .filter(|r| !(r.engine == "smol" && r.query_id == "metric_range"))
        .all(|r| r.status == RunStatus::Ok);
    assert!(others_ok);
}

#[tokio::test]
async fn candidate_build_failure_skips_only_candidate_results() {
    let client = FakeClient::new();
    client.fail_on(
        "USING smol(",
        BenchError::QueryFailed("access method \"smol\" does not exist".into()),
    );
    let executor = WorkloadExecutor::new(&client, ExecutorOptions::default());
    let report = executor.execute(&timeseries(&[CacheMode::Hot])).await.unwrap();

    assert_eq!(report.outcome.status, WorkloadStatus::Completed);
    for result in &report.results {
        match result.engine.as_str() {
            "btree" => assert_eq!(result.status, RunStatus::Ok),
            _ => {
                assert_eq!(result.status, RunStatus::Skipped);
                assert!(result.samples.is_empty());
                assert!(result.error.as_deref().unwrap().contains("smol"));
            }
        }
    }
}

#[tokio::test]
async fn existing_data_is_reused() {
    let client = FakeClient::new();
    let executor = WorkloadExecutor::new(&client, ExecutorOptions::default());
    let workload = timeseries(&[CacheMode::Hot]);

    let first = executor.execute(&workload).await.unwrap();
    assert!(first.outcome.generated);
    assert_eq!(client.inserted_rows(), ROWS_PER_TABLE);

    let second = executor.execute(&workload).await.unwrap();
    assert!(!second.outcome.generated);
    assert_eq!(second.outcome.row_count, Some(ROWS_PER_TABLE));
    assert_eq!(client.inserted_rows(), ROWS_PER_TABLE);
    assert_eq!(client.executions("CREATE UNLOGGED TABLE"), 1);
}

#[tokio::test]
async fn no_reuse_regenerates_and_drops_the_table() {
    let client = FakeClient::new();
    let options = ExecutorOptions {
        reuse_data: false,
        ..Default::default()
    };
    let executor = WorkloadExecutor::new(&client, options);
    let workload = timeseries(&[CacheMode::Hot]);

    executor.execute(&workload).await.unwrap();
    executor.execute(&workload).await.unwrap();
    assert_eq!(client.inserted_rows(), 2 * ROWS_PER_TABLE);
    assert_eq!(client.row_count(TABLE), None);
}

#[tokio::test]
async fn missing_eviction_primitive_degrades_cold_results() {
    let client = FakeClient::new().without_relation_eviction();
    let executor = WorkloadExecutor::new(&client, ExecutorOptions::default());
    let report = executor
        .execute(&timeseries(&[CacheMode::Hot, CacheMode::Cold]))
        .await
        .unwrap();

    for result in &report.results {
        assert_eq!(result.status, RunStatus::Ok);
        let degraded = result.annotations.iter().any(|a| a == DEGRADED_EVICTION);
        assert_eq!(degraded, result.cache_mode == CacheMode::Cold);
    }
    assert!(client.executions("CHECKPOINT;") >= 4);
}

#[tokio::test]
async fn generation_failure_skips_the_workload() {
    let client = FakeClient::new();
    client.fail_on(
        "CREATE UNLOGGED TABLE",
        BenchError::QueryFailed("could not extend file: No space left on device".into()),
    );
    let executor = WorkloadExecutor::new(&client, ExecutorOptions::default());
    let report = executor.execute(&timeseries(&[CacheMode::Hot])).await.unwrap();

    assert_eq!(report.outcome.status, WorkloadStatus::Skipped);
    assert!(report
        .outcome
        .error
        .as_deref()
        .unwrap()
        .starts_with("Data generation failed"));
    assert_eq!(report.results.len(), 4);
    assert!(report.results.iter().all(|r| r.status == RunStatus::Skipped));
    assert_eq!(client.executions("CREATE INDEX"), 0);
}

#[tokio::test]
async fn lost_connection_aborts() {
    let client = FakeClient::new();
    client.fail_on(
        "CREATE INDEX",
        BenchError::Connection("server closed the connection unexpectedly".into()),
    );
    let executor = WorkloadExecutor::new(&client, ExecutorOptions::default());
    let err = executor
        .execute(&timeseries(&[CacheMode::Hot]))
        .await
        .unwrap_err();
    assert!(err.is_fatal());
}
