//! Index engine benchmark orchestration
//!
//! Compares two interchangeable index access methods on the same tables
//! under controlled cache states, and flags regressions of the candidate
//! engine against a stored baseline:
//! - Environment probing picks a scale tier (row counts, run budget)
//! - Cache preparation brings each relation to hot, warm or cold
//! - Workloads are sampled with warmup/repeat discipline
//! - Nearest-rank percentiles feed regression verdicts and recommendations
//!
//! # Architecture
//!
//! ```text
//! bench
//! ├── client/       # database capability (tokio-postgres)
//! ├── workload/     # workload contract and registrations
//! ├── runner/       # run budget, per-workload executor, sampling plan
//! ├── metrics/      # samples, results, statistics, reporting
//! ├── cache.rs      # hot / warm / cold preparation
//! ├── regression.rs # baseline snapshot and verdicts
//! └── decision.rs   # recommendations and run summary
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use indexbench::{run_benchmark, BenchConfig, PgClient, SuiteMode};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = BenchConfig::load(None)?;
//!     let client = PgClient::connect(config.client_config()).await?;
//!     let artifact = run_benchmark(&client, &config, SuiteMode::Quick, false).await?;
//!     println!("{} results", artifact.results.len());
//!     Ok(())
//! }
//! ```

use anyhow::{Context, Result};
use std::path::Path;
use tracing::{info, warn};

pub mod cache;
pub mod client;
pub mod config;
pub mod decision;
pub mod environment;
pub mod error;
pub mod metrics;
pub mod regression;
pub mod runner;
pub mod workload;

pub use cache::{CacheController, CacheMode, Preparation};
pub use client::{BenchClient, ClientConfig, Eviction, Execution, PgClient};
pub use config::BenchConfig;
pub use decision::{Recommendation, RunSummary};
pub use environment::{EnvironmentSnapshot, ScaleTier};
pub use error::BenchError;
pub use metrics::{ResultsReporter, RunArtifact, RunResult, RunSample, RunStatus};
pub use regression::{Baseline, RegressionDetector, RegressionVerdict, Thresholds, Verdict};
pub use runner::{BenchmarkRunner, ExecutorOptions, RunnerConfig, WorkloadExecutor};
pub use workload::{build_suite, Query, QueryClass, SuiteMode, Workload};

/// Load the baseline snapshot for this run.
///
/// A corrupt baseline disables regression checking instead of failing
/// the run.
pub fn load_baseline(config: &BenchConfig) -> Option<Baseline> {
    match Baseline::load(&config.paths.baseline) {
        Ok(baseline) => baseline,
        Err(e) => {
            warn!(error = %e, "ignoring unusable baseline, regression checking disabled");
            None
        }
    }
}

/// Probe, run the selected suite and return the finished artifact.
pub async fn run_benchmark(
    client: &dyn BenchClient,
    config: &BenchConfig,
    mode: SuiteMode,
    show_progress: bool,
) -> Result<RunArtifact> {
    let environment = environment::probe(client).await;
    let suite = build_suite(mode, &environment, config.run.seed);

    let detector = RegressionDetector::new(
        load_baseline(config),
        config.thresholds,
        config.engines.candidate.clone(),
    );
    let runner = BenchmarkRunner::new(
        client,
        RunnerConfig::from_config(config, mode, show_progress),
        detector,
    );
    let artifact = runner
        .run(environment, suite)
        .await
        .context("Benchmark run aborted")?;
    Ok(artifact)
}

/// Replace the baseline with the candidate results of a saved artifact.
///
/// Returns the number of baseline entries written.
pub fn update_baseline(results_file: &Path, baseline_path: &Path) -> Result<usize> {
    let artifact = RunArtifact::load(results_file)?;
    let baseline = Baseline::from_results(&artifact.engines.candidate, &artifact.results);
    anyhow::ensure!(
        !baseline.is_empty(),
        "{} has no complete {} results to take as baseline",
        results_file.display(),
        artifact.engines.candidate
    );
    regression::commit_baseline(&baseline, baseline_path)?;
    info!(
        entries = baseline.len(),
        from = %results_file.display(),
        "baseline updated"
    );
    Ok(baseline.len())
}
