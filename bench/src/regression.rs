//! Baseline snapshot and regression detection.
//!
//! The baseline is read once at run start into an immutable [`Baseline`]
//! value and handed to the [`RegressionDetector`]. Nothing in a normal run
//! writes it; [`commit_baseline`] is the only writer and is reached solely
//! through `--update-baseline`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, info, instrument, warn};

use crate::cache::CacheMode;
use crate::error::BenchError;
use crate::metrics::{RunResult, RunStatus};

/// Ratio limits. Ratios at a limit fall on the lower (better) side.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Thresholds {
    pub latency_warning: f64,
    pub latency_critical: f64,
    pub size_warning: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            latency_warning: 1.15,
            latency_critical: 1.50,
            size_warning: 1.10,
        }
    }
}

impl Thresholds {
    pub fn classify_latency(&self, ratio: f64) -> Verdict {
        if ratio <= self.latency_warning {
            Verdict::Ok
        } else if ratio <= self.latency_critical {
            Verdict::Warning { ratio }
        } else {
            Verdict::Critical { ratio }
        }
    }

    /// Size is deterministic, so it has no critical tier.
    pub fn classify_size(&self, ratio: f64) -> Verdict {
        if ratio <= self.size_warning {
            Verdict::Ok
        } else {
            Verdict::Warning { ratio }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "level", rename_all = "snake_case")]
pub enum Verdict {
    Ok,
    Warning { ratio: f64 },
    Critical { ratio: f64 },
}

impl Verdict {
    fn severity(&self) -> u8 {
        match self {
            Verdict::Ok => 0,
            Verdict::Warning { .. } => 1,
            Verdict::Critical { .. } => 2,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Verdict::Ok => "ok",
            Verdict::Warning { .. } => "warning",
            Verdict::Critical { .. } => "critical",
        }
    }
}

/// Comparison of one result against its baseline entry.
///
/// A metric whose baseline value is zero (or whose current value is
/// unknown) carries no verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionVerdict {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency: Option<Verdict>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ratio: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<Verdict>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_ratio: Option<f64>,
}

impl RegressionVerdict {
    /// The more severe of the two metric verdicts.
    pub fn worst(&self) -> Verdict {
        [self.latency, self.size]
            .into_iter()
            .flatten()
            .max_by_key(|v| v.severity())
            .unwrap_or(Verdict::Ok)
    }
}

/// Identity of a measured query. The cache mode is part of it: a cold p50
/// is only comparable with a cold p50.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BaselineKey {
    pub workload_id: String,
    pub query_id: String,
    pub cache_mode: CacheMode,
}

impl BaselineKey {
    pub fn new(
        workload_id: impl Into<String>,
        query_id: impl Into<String>,
        cache_mode: CacheMode,
    ) -> Self {
        Self {
            workload_id: workload_id.into(),
            query_id: query_id.into(),
            cache_mode,
        }
    }

    pub fn of(result: &RunResult) -> Self {
        Self::new(&result.workload_id, &result.query_id, result.cache_mode)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineEntry {
    pub latency_p50_ms: f64,
    pub index_size_bytes: u64,
}

/// On-disk layout: a flat list, since JSON object keys cannot be tuples
#[derive(Debug, Serialize, Deserialize)]
struct BaselineFile {
    version: u32,
    created_at: DateTime<Utc>,
    engine: String,
    results: Vec<BaselineRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct BaselineRecord {
    workload_id: String,
    query_id: String,
    /// Version 1 files carried hot results only
    #[serde(default = "hot")]
    cache_mode: CacheMode,
    latency_p50_ms: f64,
    index_size_bytes: u64,
}

fn hot() -> CacheMode {
    CacheMode::Hot
}

/// Read-only snapshot of accepted results
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Baseline {
    pub engine: String,
    pub created_at: Option<DateTime<Utc>>,
    entries: BTreeMap<BaselineKey, BaselineEntry>,
}

impl Baseline {
    pub fn from_entries(
        engine: impl Into<String>,
        entries: impl IntoIterator<Item = (BaselineKey, BaselineEntry)>,
    ) -> Self {
        Self {
            engine: engine.into(),
            created_at: None,
            entries: entries.into_iter().collect(),
        }
    }

    /// Load the baseline snapshot.
    ///
    /// A missing file is `Ok(None)`: the run proceeds without regression
    /// checking. An unreadable or corrupt file is a [`BenchError::Baseline`].
    #[instrument(level = "debug", skip(path), fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Option<Self>, BenchError> {
        let path = path.as_ref();
        if !path.exists() {
            info!("no baseline file, regression checking disabled");
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)
            .map_err(|e| BenchError::Baseline(format!("{}: {}", path.display(), e)))?;
        let file: BaselineFile = serde_json::from_str(&contents)
            .map_err(|e| BenchError::Baseline(format!("{}: {}", path.display(), e)))?;

        let entries = file
            .results
            .into_iter()
            .map(|r| {
                (
                    BaselineKey::new(r.workload_id, r.query_id, r.cache_mode),
                    BaselineEntry {
                        latency_p50_ms: r.latency_p50_ms,
                        index_size_bytes: r.index_size_bytes,
                    },
                )
            })
            .collect::<BTreeMap<_, _>>();
        info!(entries = entries.len(), engine = %file.engine, "loaded baseline");
        Ok(Some(Self {
            engine: file.engine,
            created_at: Some(file.created_at),
            entries,
        }))
    }

    pub fn get(&self, key: &BaselineKey) -> Option<&BaselineEntry> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries for the candidate engine's complete results.
    ///
    /// One entry per (workload, query, cache mode); a repeated key keeps the
    /// first result in artifact order.
    pub fn from_results(engine: &str, results: &[RunResult]) -> Self {
        let mut entries: BTreeMap<BaselineKey, BaselineEntry> = BTreeMap::new();
        for result in results {
            if result.engine != engine || result.status != RunStatus::Ok {
                continue;
            }
            let Some(summary) = &result.summary else {
                continue;
            };
            let entry = BaselineEntry {
                latency_p50_ms: summary.p50_ms,
                index_size_bytes: result
                    .index
                    .as_ref()
                    .and_then(|i| i.size_bytes)
                    .unwrap_or(0),
            };
            entries.entry(BaselineKey::of(result)).or_insert(entry);
        }
        Self {
            engine: engine.to_string(),
            created_at: None,
            entries,
        }
    }
}

/// Atomically replace the baseline file with `baseline`.
///
/// Writes `<path>.tmp`, syncs it, then renames over `path`; a crash leaves
/// either the old or the new file, never a torn one.
#[instrument(level = "debug", skip(baseline, path), fields(entries = baseline.len()))]
pub fn commit_baseline(baseline: &Baseline, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).context("Failed to create baseline directory")?;
    }
    let temp_path = path.with_extension("tmp");

    let file = BaselineFile {
        version: 2,
        created_at: Utc::now(),
        engine: baseline.engine.clone(),
        results: baseline
            .entries
            .iter()
            .map(|(k, e)| BaselineRecord {
                workload_id: k.workload_id.clone(),
                query_id: k.query_id.clone(),
                cache_mode: k.cache_mode,
                latency_p50_ms: e.latency_p50_ms,
                index_size_bytes: e.index_size_bytes,
            })
            .collect(),
    };
    let json = serde_json::to_string_pretty(&file).context("Failed to serialize baseline")?;

    let handle = File::create(&temp_path).context("Failed to create baseline temp file")?;
    let mut writer = BufWriter::new(handle);
    writer
        .write_all(json.as_bytes())
        .context("Failed to write baseline temp file")?;
    writer.flush()?;
    writer.get_ref().sync_all()?;

    std::fs::rename(&temp_path, path).context("Failed to rename baseline file")?;
    info!(path = %path.display(), entries = baseline.len(), "baseline committed");
    Ok(())
}

/// Compares candidate results against a baseline snapshot
pub struct RegressionDetector {
    baseline: Option<Baseline>,
    thresholds: Thresholds,
    engine: String,
}

impl RegressionDetector {
    pub fn new(baseline: Option<Baseline>, thresholds: Thresholds, engine: impl Into<String>) -> Self {
        Self {
            baseline,
            thresholds,
            engine: engine.into(),
        }
    }

    pub fn has_baseline(&self) -> bool {
        self.baseline.is_some()
    }

    /// Verdict for one result, or `None` when there is nothing to compare.
    pub fn check(&self, result: &RunResult) -> Option<RegressionVerdict> {
        if result.engine != self.engine || result.status != RunStatus::Ok {
            return None;
        }
        let summary = result.summary.as_ref()?;
        let key = BaselineKey::of(result);
        let entry = self.baseline.as_ref()?.get(&key)?;

        let latency_ratio =
            (entry.latency_p50_ms > 0.0).then(|| summary.p50_ms / entry.latency_p50_ms);
        let size_ratio = match result.index.as_ref().and_then(|i| i.size_bytes) {
            Some(current) if entry.index_size_bytes > 0 => {
                Some(current as f64 / entry.index_size_bytes as f64)
            }
            _ => None,
        };
        if latency_ratio.is_none() && size_ratio.is_none() {
            debug!(workload = %key.workload_id, query = %key.query_id, mode = %key.cache_mode, "baseline entry has no usable values");
            return None;
        }

        Some(RegressionVerdict {
            latency: latency_ratio.map(|r| self.thresholds.classify_latency(r)),
            latency_ratio,
            size: size_ratio.map(|r| self.thresholds.classify_size(r)),
            size_ratio,
        })
    }

    /// Attach verdicts to every eligible result in place.
    pub fn attach(&self, results: &mut [RunResult]) {
        if self.baseline.is_none() {
            return;
        }
        for result in results.iter_mut() {
            result.regression = self.check(result);
            if let Some(verdict) = &result.regression {
                match verdict.worst() {
                    Verdict::Ok => {}
                    Verdict::Warning { .. } => warn!(
                        workload = %result.workload_id,
                        query = %result.query_id,
                        mode = %result.cache_mode,
                        "regression warning"
                    ),
                    Verdict::Critical { .. } => warn!(
                        workload = %result.workload_id,
                        query = %result.query_id,
                        mode = %result.cache_mode,
                        "critical regression"
                    ),
                }
            }
        }
    }
}
