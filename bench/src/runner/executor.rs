use std::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::warmup::SamplingPlan;
use crate::cache::{CacheController, CacheMode, Preparation};
use crate::client::{relation_size, table_row_count, BenchClient};
use crate::error::BenchError;
use crate::metrics::{IndexMetrics, ResultRecorder, RunResult, WorkloadOutcome, WorkloadStatus};
use crate::workload::{create_index_sql, index_name, Query, Workload};

/// Knobs the executor takes from configuration
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    pub baseline_engine: String,
    pub candidate_engine: String,
    /// Skip generation when the table already has rows, and keep it afterwards
    pub reuse_data: bool,
    pub os_eviction: bool,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            baseline_engine: "btree".to_string(),
            candidate_engine: "smol".to_string(),
            reuse_data: true,
            os_eviction: true,
        }
    }
}

/// Everything one workload produced
#[derive(Debug, Clone)]
pub struct WorkloadReport {
    pub outcome: WorkloadOutcome,
    pub results: Vec<RunResult>,
}

/// Runs one workload's queries against both engines, strictly in sequence.
///
/// Only a [`BenchError::Connection`] escapes; every other failure is
/// recorded on the unit it invalidates.
pub struct WorkloadExecutor<'a> {
    client: &'a dyn BenchClient,
    options: ExecutorOptions,
}

impl<'a> WorkloadExecutor<'a> {
    pub fn new(client: &'a dyn BenchClient, options: ExecutorOptions) -> Self {
        Self { client, options }
    }

    pub fn engines(&self) -> [&str; 2] {
        [
            self.options.baseline_engine.as_str(),
            self.options.candidate_engine.as_str(),
        ]
    }

    #[instrument(skip(self, workload), fields(workload = %workload.id()))]
    pub async fn execute(&self, workload: &dyn Workload) -> Result<WorkloadReport, BenchError> {
        let start = Instant::now();
        let queries = workload.queries();
        let mut outcome = WorkloadOutcome {
            workload_id: workload.id().to_string(),
            description: workload.description(),
            table: workload.table().to_string(),
            status: WorkloadStatus::Completed,
            generated: false,
            row_count: None,
            error: None,
            elapsed_secs: 0.0,
        };

        match self.ensure_data(workload).await {
            Ok((generated, rows)) => {
                outcome.generated = generated;
                outcome.row_count = rows;
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(error = %e, "workload skipped");
                let reason = e.to_string();
                let mut results = Vec::new();
                for engine in self.engines() {
                    results.extend(skipped_results(workload.id(), engine, &queries, &reason));
                }
                outcome.status = WorkloadStatus::Skipped;
                outcome.error = Some(reason);
                outcome.elapsed_secs = start.elapsed().as_secs_f64();
                return Ok(WorkloadReport { outcome, results });
            }
        }

        let mut results = Vec::with_capacity(queries.len() * 2);
        for engine in self.engines() {
            let index = match self.build_index(workload, engine).await {
                Ok(index) => index,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(engine, error = %e, "index build failed, skipping engine");
                    results.extend(skipped_results(workload.id(), engine, &queries, &e.to_string()));
                    continue;
                }
            };

            self.configure_session(workload.parallelism()).await?;
            for query in &queries {
                let mut result = self.run_query(workload, engine, query).await?;
                result.index = Some(index.clone());
                results.push(result);
            }
            self.housekeeping(&format!("DROP INDEX IF EXISTS {};", index.index_name))
                .await?;
        }

        self.housekeeping(
            "RESET enable_seqscan; RESET enable_bitmapscan; \
             RESET enable_indexonlyscan; RESET max_parallel_workers_per_gather;",
        )
        .await?;
        if !self.options.reuse_data {
            self.housekeeping(&format!("DROP TABLE IF EXISTS {} CASCADE;", workload.table()))
                .await?;
        }

        outcome.elapsed_secs = start.elapsed().as_secs_f64();
        info!(
            results = results.len(),
            elapsed_secs = outcome.elapsed_secs,
            "workload finished"
        );
        Ok(WorkloadReport { outcome, results })
    }

    /// Generate the backing table unless a reusable one already has rows.
    ///
    /// Returns whether generation ran and the resulting row count.
    pub async fn ensure_data(
        &self,
        workload: &dyn Workload,
    ) -> Result<(bool, Option<u64>), BenchError> {
        if self.options.reuse_data {
            match table_row_count(self.client, workload.table()).await {
                Ok(Some(rows)) if rows > 0 => {
                    info!(table = workload.table(), rows, "reusing existing data");
                    return Ok((false, Some(rows)));
                }
                Ok(_) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => debug!(error = %e, "row count unavailable, generating"),
            }
        }

        info!(table = workload.table(), "generating data");
        workload.generate(self.client).await.map_err(|e| match e {
            BenchError::Generation { .. } | BenchError::Connection(_) => e,
            other => BenchError::Generation {
                workload: workload.id().to_string(),
                reason: other.to_string(),
            },
        })?;

        let rows = match table_row_count(self.client, workload.table()).await {
            Ok(rows) => rows,
            Err(e) if e.is_fatal() => return Err(e),
            Err(_) => None,
        };
        Ok((true, rows))
    }

    /// Drop any stale index for `engine`, then build and measure it.
    #[instrument(level = "debug", skip(self, workload), fields(workload = %workload.id()))]
    pub async fn build_index(
        &self,
        workload: &dyn Workload,
        engine: &str,
    ) -> Result<IndexMetrics, BenchError> {
        let name = index_name(workload.table(), engine);
        let as_build_error = |e: BenchError| {
            if e.is_fatal() {
                e
            } else {
                BenchError::IndexBuild {
                    engine: engine.to_string(),
                    reason: e.to_string(),
                }
            }
        };

        self.client
            .execute(&format!("DROP INDEX IF EXISTS {};", name))
            .await
            .map_err(as_build_error)?;
        let build = self
            .client
            .execute(&create_index_sql(workload, engine))
            .await
            .map_err(as_build_error)?;

        let size_bytes = match relation_size(self.client, &name).await {
            Ok(bytes) => Some(bytes),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(index = %name, error = %e, "index size unavailable");
                None
            }
        };
        info!(
            index = %name,
            build_ms = build.duration_ms,
            size_bytes = size_bytes.unwrap_or(0),
            "index built"
        );
        Ok(IndexMetrics {
            engine: engine.to_string(),
            index_name: name,
            size_bytes,
            build_time_ms: Some(build.duration_ms),
        })
    }

    /// Force index scans for the measured session.
    async fn configure_session(&self, parallelism: u32) -> Result<(), BenchError> {
        let sql = format!(
            "SET enable_seqscan = off; SET enable_bitmapscan = off; \
             SET enable_indexonlyscan = on; SET max_parallel_workers_per_gather = {};",
            parallelism
        );
        self.housekeeping(&sql).await
    }

    /// Execute a housekeeping statement; only a lost connection matters.
    async fn housekeeping(&self, sql: &str) -> Result<(), BenchError> {
        match self.client.execute(sql).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(error = %e, "housekeeping statement failed");
                Ok(())
            }
        }
    }

    /// Prepare the cache, then sample one query.
    #[instrument(
        level = "debug",
        skip(self, workload, query),
        fields(workload = %workload.id(), query = %query.id, mode = %query.cache_mode)
    )]
    pub async fn run_query(
        &self,
        workload: &dyn Workload,
        engine: &str,
        query: &Query,
    ) -> Result<RunResult, BenchError> {
        let controller = CacheController::new(self.client, self.options.os_eviction);
        let index = index_name(workload.table(), engine);

        let prep = match self.prepare(&controller, &index, workload.table(), query).await {
            Ok(prep) => prep,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(error = %e, "cache preparation failed");
                let recorder = ResultRecorder::new(
                    workload.id(),
                    &query.id,
                    engine,
                    query.cache_mode,
                    SamplingPlan::for_query(query, &Preparation::default()).repeat,
                );
                return Ok(recorder.fail(&e));
            }
        };

        let plan = SamplingPlan::for_query(query, &prep);
        debug!(
            warmup = plan.warmup,
            executions = plan.executions(),
            "sampling"
        );
        let mut recorder =
            ResultRecorder::new(workload.id(), &query.id, engine, query.cache_mode, plan.repeat);
        recorder.annotate(&prep.annotations);

        if plan.warmup {
            if let Err(e) = self.client.execute(&query.sql).await {
                return self.abandon(recorder, e);
            }
        }
        for _ in 0..plan.repeat {
            match self.client.execute(&query.sql).await {
                Ok(exec) => recorder.record(exec.duration_ms),
                Err(e) => return self.abandon(recorder, e),
            }
        }

        let result = recorder.finish();
        debug!(
            samples = result.samples.len(),
            p50_ms = result.p50_ms().unwrap_or(0.0),
            "query measured"
        );
        Ok(result)
    }

    async fn prepare(
        &self,
        controller: &CacheController<'_>,
        index: &str,
        table: &str,
        query: &Query,
    ) -> Result<Preparation, BenchError> {
        let mut prep = controller.prepare(index, query.cache_mode, &query.sql).await?;
        if query.cache_mode == CacheMode::Cold {
            // Index-only scans may still touch the heap through the visibility map.
            let heap = controller.prepare(table, CacheMode::Cold, &query.sql).await?;
            for note in heap.annotations {
                if !prep.annotations.contains(&note) {
                    prep.annotations.push(note);
                }
            }
        }
        Ok(prep)
    }

    fn abandon(&self, recorder: ResultRecorder, e: BenchError) -> Result<RunResult, BenchError> {
        if e.is_fatal() {
            return Err(e);
        }
        if e.is_timeout() {
            warn!(samples = recorder.collected(), error = %e, "query timed out, result incomplete");
        } else {
            warn!(samples = recorder.collected(), error = %e, "query failed, result incomplete");
        }
        Ok(recorder.fail(&e))
    }
}

pub(crate) fn skipped_results(
    workload_id: &str,
    engine: &str,
    queries: &[Query],
    reason: &str,
) -> Vec<RunResult> {
    queries
        .iter()
        .map(|q| {
            let repeat = SamplingPlan::for_query(q, &Preparation::default()).repeat;
            RunResult::skipped(workload_id, &q.id, engine, q.cache_mode, repeat, reason)
        })
        .collect()
}
