use anyhow::{Context, Result};
use std::fmt::{self, Write as _};
use std::path::{Path, PathBuf};
use tracing::info;

use super::{RunArtifact, RunResult};
use crate::decision::Recommendation;

/// Renders a run artifact for people and for downstream tooling
pub struct ResultsReporter;

impl ResultsReporter {
    pub fn print_summary(artifact: &RunArtifact) {
        print!("{}", Self::render_summary(artifact));
    }

    pub fn render_summary(artifact: &RunArtifact) -> String {
        let env = &artifact.environment;
        let rule = "=".repeat(72);
        let mut out = String::new();

        let _ = writeln!(out, "\n{}", rule);
        let _ = writeln!(
            out,
            "  {} vs {} ({} run, {} tier: {})",
            artifact.engines.candidate, artifact.engines.baseline, artifact.mode, env.tier, env.tier_name
        );
        let _ = writeln!(out, "{}", rule);
        match env.capacity_mb() {
            Some(mb) => {
                let _ = writeln!(out, "Buffer pool:    {:.0} MB", mb);
            }
            None => {
                let _ = writeln!(out, "Buffer pool:    unknown");
            }
        }
        if let Some(version) = &env.server_version {
            let _ = writeln!(out, "Server:         {}", version);
        }
        let _ = writeln!(
            out,
            "Elapsed:        {:.1}s of {}s budget{}",
            artifact.budget.elapsed_secs,
            artifact.budget.limit_secs,
            if artifact.budget.exhausted { " (exhausted)" } else { "" }
        );
        let s = &artifact.summary;
        let _ = writeln!(
            out,
            "Results:        {} ok, {} incomplete, {} skipped",
            s.results.ok, s.results.incomplete, s.results.skipped
        );
        if artifact.baseline_loaded {
            let _ = writeln!(
                out,
                "Regressions:    {} ok, {} warning, {} critical, {} without baseline",
                s.verdicts.ok, s.verdicts.warning, s.verdicts.critical, s.verdicts.no_baseline
            );
        } else {
            let _ = writeln!(out, "Regressions:    no baseline loaded");
        }
        for note in &env.annotations {
            let _ = writeln!(out, "Note:           {}", note);
        }
        let _ = writeln!(out);

        let _ = writeln!(
            out,
            "{:<36} {:<18} {:<5} {:<7} {:>10} {:>10}  {}",
            "workload", "query", "mode", "engine", "p50 ms", "p95 ms", "status"
        );
        for r in &artifact.results {
            let (p50, p95) = match &r.summary {
                Some(sum) => (format!("{:.2}", sum.p50_ms), format!("{:.2}", sum.p95_ms)),
                None => ("-".to_string(), "-".to_string()),
            };
            let verdict = r
                .regression
                .as_ref()
                .map(|v| format!(" [{}]", v.worst().label()))
                .unwrap_or_default();
            let _ = writeln!(
                out,
                "{:<36} {:<18} {:<5} {:<7} {:>10} {:>10}  {}{}",
                r.workload_id, r.query_id, r.cache_mode, r.engine, p50, p95, r.status.as_str(), verdict
            );
        }

        if !s.recommendations.is_empty() {
            let _ = writeln!(out, "\nRecommendations:");
            for rec in &s.recommendations {
                let label = rec
                    .recommendation
                    .map(|r| RecommendationLabel(r, &artifact.engines.candidate, &artifact.engines.baseline).to_string())
                    .unwrap_or_else(|| "no recommendation".to_string());
                let _ = writeln!(out, "  {:<36} {:<28} {}", rec.workload_id, label, rec.reason);
            }
        }
        for w in artifact.workloads.iter().filter(|w| w.error.is_some()) {
            let _ = writeln!(
                out,
                "Skipped {}: {}",
                w.workload_id,
                w.error.as_deref().unwrap_or_default()
            );
        }
        let _ = writeln!(out, "{}", rule);
        out
    }

    pub fn write_json(artifact: &RunArtifact, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(artifact).context("Failed to serialize results")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn write_csv(results: &[RunResult], path: &Path) -> Result<()> {
        let mut wtr = csv::Writer::from_path(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        wtr.write_record([
            "workload_id",
            "query_id",
            "engine",
            "cache_mode",
            "status",
            "repeat",
            "samples",
            "p50_ms",
            "p95_ms",
            "p99_ms",
            "mean_ms",
            "index_size_bytes",
            "build_time_ms",
            "regression",
            "annotations",
        ])?;
        for r in results {
            let summary = r.summary.as_ref();
            let fmt_ms = |v: Option<f64>| v.map(|v| format!("{:.3}", v)).unwrap_or_default();
            wtr.write_record([
                r.workload_id.clone(),
                r.query_id.clone(),
                r.engine.clone(),
                r.cache_mode.to_string(),
                r.status.as_str().to_string(),
                r.repeat.to_string(),
                r.samples.len().to_string(),
                fmt_ms(summary.map(|s| s.p50_ms)),
                fmt_ms(summary.map(|s| s.p95_ms)),
                fmt_ms(summary.and_then(|s| s.p99_ms)),
                fmt_ms(summary.map(|s| s.mean_ms)),
                r.index_size_bytes().map(|b| b.to_string()).unwrap_or_default(),
                fmt_ms(r.index.as_ref().and_then(|i| i.build_time_ms)),
                r.regression
                    .as_ref()
                    .map(|v| v.worst().label().to_string())
                    .unwrap_or_default(),
                r.annotations.join(";"),
            ])?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn render_markdown(artifact: &RunArtifact) -> String {
        let (base, cand) = (&artifact.engines.baseline, &artifact.engines.candidate);
        let mut md = String::new();
        let _ = writeln!(md, "# {} vs {} Benchmark Results\n", cand.to_uppercase(), base.to_uppercase());
        let _ = writeln!(md, "- Run: `{}`", artifact.run_id);
        let _ = writeln!(md, "- Started: {}", artifact.started_at.to_rfc3339());
        let _ = writeln!(
            md,
            "- Tier: {} ({})",
            artifact.environment.tier, artifact.environment.tier_name
        );
        if artifact.budget.exhausted {
            let _ = writeln!(md, "- **Partial run**: budget of {}s exhausted", artifact.budget.limit_secs);
        }
        let _ = writeln!(md);

        for outcome in &artifact.workloads {
            let _ = writeln!(md, "## {}\n", outcome.workload_id);
            if !outcome.description.is_empty() {
                let _ = writeln!(md, "{}\n", outcome.description);
            }
            if let Some(err) = &outcome.error {
                let _ = writeln!(md, "Skipped: {}\n", err);
            }
            let _ = writeln!(
                md,
                "| query | mode | {b} p50 ms | {c} p50 ms | speedup | {b} size | {c} size | status |",
                b = base,
                c = cand
            );
            let _ = writeln!(md, "|---|---|---:|---:|---:|---:|---:|---|");

            let ours: Vec<&RunResult> = artifact
                .results
                .iter()
                .filter(|r| r.workload_id == outcome.workload_id)
                .collect();
            for c in ours.iter().filter(|r| &r.engine == cand) {
                let b = ours
                    .iter()
                    .find(|r| &r.engine == base && r.query_id == c.query_id && r.cache_mode == c.cache_mode);
                let b_p50 = b.and_then(|r| r.p50_ms());
                let speedup = match (b_p50, c.p50_ms()) {
                    (Some(x), Some(y)) if y > 0.0 => format!("{:.2}x", x / y),
                    _ => "-".to_string(),
                };
                let status = match (b.map(|r| r.status), c.status) {
                    (Some(bs), cs) if bs == cs => cs.as_str().to_string(),
                    (bs, cs) => format!(
                        "{}/{}",
                        bs.map(|s| s.as_str()).unwrap_or("-"),
                        cs.as_str()
                    ),
                };
                let _ = writeln!(
                    md,
                    "| {} | {} | {} | {} | {} | {} | {} | {} |",
                    c.query_id,
                    c.cache_mode,
                    opt_ms(b_p50),
                    opt_ms(c.p50_ms()),
                    speedup,
                    opt_size(b.and_then(|r| r.index_size_bytes())),
                    opt_size(c.index_size_bytes()),
                    status
                );
            }
            let _ = writeln!(md);
        }

        let _ = writeln!(md, "## Recommendations\n");
        for rec in &artifact.summary.recommendations {
            match rec.recommendation {
                Some(r) => {
                    let _ = writeln!(
                        md,
                        "- **{}**: {} ({})",
                        rec.workload_id,
                        RecommendationLabel(r, cand, base),
                        rec.reason
                    );
                }
                None => {
                    let _ = writeln!(md, "- **{}**: no recommendation ({})", rec.workload_id, rec.reason);
                }
            }
        }
        md
    }

    /// Write `<stem>.json`, `.md` and `.csv` into `dir`.
    pub fn save_all(artifact: &RunArtifact, dir: &Path) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create results directory {}", dir.display()))?;
        let stem = artifact.file_stem();
        let json = dir.join(format!("{}.json", stem));
        let md = dir.join(format!("{}.md", stem));
        let csv = dir.join(format!("{}.csv", stem));

        Self::write_json(artifact, &json)?;
        std::fs::write(&md, Self::render_markdown(artifact))
            .with_context(|| format!("Failed to write {}", md.display()))?;
        Self::write_csv(&artifact.results, &csv)?;

        info!(json = %json.display(), "results saved");
        Ok(vec![json, md, csv])
    }
}

struct RecommendationLabel<'a>(Recommendation, &'a str, &'a str);

impl fmt::Display for RecommendationLabel<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let RecommendationLabel(rec, candidate, baseline) = self;
        match rec {
            Recommendation::StronglyRecommend => write!(f, "STRONGLY RECOMMEND {}", candidate),
            Recommendation::Recommend => write!(f, "RECOMMEND {}", candidate),
            Recommendation::Neutral => f.write_str("NEUTRAL"),
            Recommendation::AvoidIndexB => write!(f, "USE {}", baseline),
        }
    }
}

fn opt_ms(v: Option<f64>) -> String {
    v.map(|v| format!("{:.2}", v)).unwrap_or_else(|| "-".to_string())
}

fn opt_size(v: Option<u64>) -> String {
    v.map(|b| format!("{:.1} MB", b as f64 / (1024.0 * 1024.0)))
        .unwrap_or_else(|| "-".to_string())
}
