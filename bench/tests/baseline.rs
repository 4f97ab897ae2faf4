mod common;

use common::FakeClient;
use indexbench::regression::BaselineKey;
use indexbench::{
    run_benchmark, update_baseline, Baseline, BenchConfig, CacheMode, ResultsReporter,
    RunArtifact, SuiteMode, Verdict,
};

fn config_in(dir: &tempfile::TempDir) -> BenchConfig {
    let mut config = BenchConfig::default();
    config.paths.baseline = dir.path().join("baseline").join("baseline.json");
    config.paths.results_dir = dir.path().join("results");
    config
}

async fn saved_run(client: &FakeClient, config: &BenchConfig) -> std::path::PathBuf {
    let artifact = run_benchmark(client, config, SuiteMode::Quick, false)
        .await
        .unwrap();
    let paths = ResultsReporter::save_all(&artifact, &config.paths.results_dir).unwrap();
    paths[0].clone()
}

const TIMESERIES: &str = "timeseries_100k_50m_ultra_low_card";

#[tokio::test]
async fn saved_results_become_the_next_baseline() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    let client = FakeClient::new();

    let results_json = saved_run(&client, &config).await;
    assert_eq!(results_json.extension().unwrap(), "json");
    let artifact = RunArtifact::load(&results_json).unwrap();
    assert_eq!(artifact.results.len(), 64);

    let entries = update_baseline(&results_json, &config.paths.baseline).unwrap();
    // one entry per (workload, query, cache mode) of the candidate
    assert_eq!(entries, 32);
    assert!(!config.paths.baseline.with_extension("tmp").exists());

    let baseline = Baseline::load(&config.paths.baseline).unwrap().unwrap();
    assert_eq!(baseline.engine, "smol");
    let hot = baseline
        .get(&BaselineKey::new(TIMESERIES, "hot_metric", CacheMode::Hot))
        .unwrap();
    assert_eq!(hot.latency_p50_ms, 1.0);
    assert_eq!(hot.index_size_bytes, 1024 * 1024);
    let cold = baseline
        .get(&BaselineKey::new(TIMESERIES, "hot_metric", CacheMode::Cold))
        .unwrap();
    assert_eq!(cold.latency_p50_ms, 10.0);
}

#[tokio::test]
async fn hot_and_cold_baseline_rerun_is_clean() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    let client = FakeClient::new();

    let results_json = saved_run(&client, &config).await;
    update_baseline(&results_json, &config.paths.baseline).unwrap();

    // the same engine measured again is within every threshold
    let rerun = run_benchmark(&client, &config, SuiteMode::Quick, false)
        .await
        .unwrap();
    assert!(rerun.baseline_loaded);
    assert_eq!(rerun.summary.verdicts.ok, 32);
    assert_eq!(rerun.summary.verdicts.critical, 0);
    assert!(!rerun.summary.has_regressions());

    let cold: Vec<_> = rerun
        .results
        .iter()
        .filter(|r| r.engine == "smol" && r.cache_mode == CacheMode::Cold)
        .collect();
    assert_eq!(cold.len(), 2);
    for result in cold {
        assert_eq!(result.p50_ms(), Some(10.0));
        let verdict = result.regression.as_ref().unwrap();
        assert_eq!(verdict.latency, Some(Verdict::Ok));
        assert_eq!(verdict.latency_ratio, Some(1.0));
    }
}

#[tokio::test]
async fn slower_candidate_is_flagged_against_accepted_baseline() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);

    let results_json = saved_run(&FakeClient::new(), &config).await;
    update_baseline(&results_json, &config.paths.baseline).unwrap();

    let slower = FakeClient::new()
        .with_latency("smol", 1.2)
        .with_index_size("smol", 2 * 1024 * 1024);
    let artifact = run_benchmark(&slower, &config, SuiteMode::Quick, false)
        .await
        .unwrap();

    for verdict in artifact.results.iter().filter_map(|r| r.regression.as_ref()) {
        assert!(matches!(verdict.latency, Some(Verdict::Warning { .. })));
        assert!(matches!(verdict.size, Some(Verdict::Warning { .. })));
    }
    assert_eq!(artifact.summary.verdicts.warning, 32);
    assert_eq!(artifact.summary.verdicts.critical, 0);
    assert!(artifact.summary.has_regressions());
}

#[tokio::test]
async fn update_replaces_previous_baseline() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);

    let first = saved_run(&FakeClient::new(), &config).await;
    update_baseline(&first, &config.paths.baseline).unwrap();

    // results files are named by second; keep the runs apart
    let second_dir = dir.path().join("second");
    let mut second_config = config.clone();
    second_config.paths.results_dir = second_dir;
    let second = saved_run(&FakeClient::new().with_latency("smol", 0.5), &second_config).await;
    update_baseline(&second, &config.paths.baseline).unwrap();

    let baseline = Baseline::load(&config.paths.baseline).unwrap().unwrap();
    let entry = baseline
        .get(&BaselineKey::new("limit_100k", "range_limit100", CacheMode::Hot))
        .unwrap();
    assert_eq!(entry.latency_p50_ms, 0.5);
}

#[test]
fn corrupt_results_leave_baseline_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let baseline_path = dir.path().join("baseline.json");
    std::fs::write(&baseline_path, "{\"previous\": true}").unwrap();

    let results = dir.path().join("quick-20240101-000000.json");
    std::fs::write(&results, "{\"run_id\": 12").unwrap();

    assert!(update_baseline(&results, &baseline_path).is_err());
    assert_eq!(
        std::fs::read_to_string(&baseline_path).unwrap(),
        "{\"previous\": true}"
    );
    assert!(!baseline_path.with_extension("tmp").exists());
}

#[tokio::test]
async fn results_without_complete_candidate_runs_are_refused() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    let client = FakeClient::new();
    client.fail_on(
        "USING smol(",
        indexbench::BenchError::QueryFailed("access method \"smol\" does not exist".into()),
    );

    let results_json = saved_run(&client, &config).await;
    let err = update_baseline(&results_json, &config.paths.baseline).unwrap_err();
    assert!(err.to_string().contains("no complete smol results"));
    assert!(!config.paths.baseline.exists());
}
