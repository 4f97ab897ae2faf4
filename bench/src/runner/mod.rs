use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

pub mod executor;
pub mod warmup;

pub use executor::{ExecutorOptions, WorkloadExecutor, WorkloadReport};
pub use warmup::SamplingPlan;

use crate::client::BenchClient;
use crate::config::BenchConfig;
use crate::decision::{summarize_run, DecisionThresholds};
use crate::environment::EnvironmentSnapshot;
use crate::error::BenchError;
use crate::metrics::{
    BudgetState, EnginePair, RunArtifact, RunResult, WorkloadOutcome, WorkloadStatus,
};
use crate::regression::RegressionDetector;
use crate::workload::{SuiteMode, Workload};

pub const BUDGET_EXHAUSTED: &str = "run budget exhausted";

/// Runner configuration
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub mode: SuiteMode,
    pub executor: ExecutorOptions,
    /// Replaces the tier budget when set
    pub budget_override: Option<Duration>,
    pub decision: DecisionThresholds,
    pub show_progress: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            mode: SuiteMode::Quick,
            executor: ExecutorOptions::default(),
            budget_override: None,
            decision: DecisionThresholds::default(),
            show_progress: false,
        }
    }
}

impl RunnerConfig {
    pub fn from_config(config: &BenchConfig, mode: SuiteMode, show_progress: bool) -> Self {
        Self {
            mode,
            executor: ExecutorOptions {
                baseline_engine: config.engines.baseline.clone(),
                candidate_engine: config.engines.candidate.clone(),
                reuse_data: config.run.reuse_data,
                os_eviction: config.eviction.enabled,
            },
            budget_override: config.budget_override(),
            decision: config.decision,
            show_progress,
        }
    }
}

/// Runs a suite workload by workload inside the run's wall-clock budget.
///
/// The budget is checked between workloads only; a workload that started
/// in time runs to completion.
pub struct BenchmarkRunner<'a> {
    client: &'a dyn BenchClient,
    config: RunnerConfig,
    detector: RegressionDetector,
    workloads: Vec<WorkloadOutcome>,
    results: Vec<RunResult>,
}

impl<'a> BenchmarkRunner<'a> {
    pub fn new(client: &'a dyn BenchClient, config: RunnerConfig, detector: RegressionDetector) -> Self {
        Self {
            client,
            config,
            detector,
            workloads: Vec::new(),
            results: Vec::new(),
        }
    }

    /// Execute `suite` and assemble the run artifact.
    ///
    /// Fails only when the connection to the database is lost.
    pub async fn run(
        mut self,
        environment: EnvironmentSnapshot,
        suite: Vec<Box<dyn Workload>>,
    ) -> Result<RunArtifact, BenchError> {
        let started_at = Utc::now();
        let started = Instant::now();
        let budget = self
            .config
            .budget_override
            .unwrap_or_else(|| Duration::from_secs(environment.timeout_secs));
        let deadline = started + budget;

        info!(
            mode = %self.config.mode,
            tier = %environment.tier,
            workloads = suite.len(),
            budget_secs = budget.as_secs(),
            "starting benchmark run"
        );

        let progress = self.progress_bar(suite.len() as u64);
        let executor = WorkloadExecutor::new(self.client, self.config.executor.clone());
        let mut exhausted = false;

        for workload in &suite {
            if !exhausted && Instant::now() >= deadline {
                warn!(
                    elapsed_secs = started.elapsed().as_secs(),
                    remaining = suite.len() - self.workloads.len(),
                    "run budget exhausted, skipping remaining workloads"
                );
                exhausted = true;
            }
            if exhausted {
                self.record_unscheduled(&executor, workload.as_ref());
                progress.inc(1);
                continue;
            }

            progress.set_message(workload.id().to_string());
            let report = executor.execute(workload.as_ref()).await?;
            self.workloads.push(report.outcome);
            self.results.extend(report.results);
            progress.inc(1);
        }
        progress.finish_and_clear();

        self.detector.attach(&mut self.results);

        let engines = EnginePair {
            baseline: self.config.executor.baseline_engine.clone(),
            candidate: self.config.executor.candidate_engine.clone(),
        };
        let summary = summarize_run(
            &self.workloads,
            &self.results,
            &engines.baseline,
            &engines.candidate,
            exhausted,
            &self.config.decision,
        );
        let budget_state = BudgetState {
            limit_secs: budget.as_secs(),
            elapsed_secs: started.elapsed().as_secs_f64(),
            exhausted,
        };
        info!(
            ok = summary.results.ok,
            incomplete = summary.results.incomplete,
            skipped = summary.results.skipped,
            elapsed_secs = budget_state.elapsed_secs,
            "benchmark run finished"
        );

        Ok(RunArtifact {
            run_id: Uuid::new_v4(),
            mode: self.config.mode,
            started_at,
            finished_at: Utc::now(),
            environment,
            engines,
            baseline_loaded: self.detector.has_baseline(),
            budget: budget_state,
            workloads: self.workloads,
            results: self.results,
            summary,
        })
    }

    fn record_unscheduled(&mut self, executor: &WorkloadExecutor<'_>, workload: &dyn Workload) {
        let queries = workload.queries();
        for engine in executor.engines() {
            self.results.extend(executor::skipped_results(
                workload.id(),
                engine,
                &queries,
                BUDGET_EXHAUSTED,
            ));
        }
        self.workloads.push(WorkloadOutcome {
            workload_id: workload.id().to_string(),
            description: workload.description(),
            table: workload.table().to_string(),
            status: WorkloadStatus::Skipped,
            generated: false,
            row_count: None,
            error: Some(BUDGET_EXHAUSTED.to_string()),
            elapsed_secs: 0.0,
        });
    }

    fn progress_bar(&self, len: u64) -> ProgressBar {
        if !self.config.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len);
        let style = ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
        pb.set_style(style);
        pb
    }
}
