// bench/src/config.rs
//
// Benchmark configuration.
// Priority order (highest to lowest):
// 1. Command-line arguments (applied by the binary after load())
// 2. Environment variables (INDEXBENCH__SECTION__KEY)
// 3. Config file (YAML/TOML/JSON, optional)
// 4. Built-in defaults

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::client::ClientConfig;
use crate::decision::DecisionThresholds;
use crate::regression::Thresholds;

// ============================================================================
// Main Configuration Structure
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct BenchConfig {
    /// Database under test
    pub database: DatabaseConfig,

    /// The two access methods being compared
    pub engines: EnginesConfig,

    /// Regression ratio limits
    pub thresholds: Thresholds,

    /// Recommendation cut-offs
    pub decision: DecisionThresholds,

    /// Cold-cache eviction tooling
    pub eviction: EvictionConfig,

    pub paths: PathsConfig,

    pub run: RunConfig,

    pub logging: LoggingConfig,
}

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub dbname: String,
    pub password: Option<String>,

    /// Per-statement limit (milliseconds)
    pub statement_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            dbname: "postgres".to_string(),
            password: None,
            statement_timeout_ms: 300_000, // 5 minutes
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EnginesConfig {
    /// Reference access method ("index A")
    pub baseline: String,

    /// Access method under evaluation ("index B"); the baseline file tracks it
    pub candidate: String,
}

impl Default for EnginesConfig {
    fn default() -> Self {
        Self {
            baseline: "btree".to_string(),
            candidate: "smol".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EvictionConfig {
    /// Attempt OS page-cache eviction for cold queries
    pub enabled: bool,

    /// Utility invoked with `os_evict_args` followed by the relation's files
    pub os_evict_command: String,

    pub os_evict_args: Vec<String>,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            os_evict_command: "vmtouch".to_string(),
            os_evict_args: vec!["-e".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    pub baseline: PathBuf,
    pub results_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            baseline: PathBuf::from("bench/baseline.json"),
            results_dir: PathBuf::from("bench/results"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Keep generated tables between runs and skip generation when populated
    pub reuse_data: bool,

    /// Seed for generated lookup keys
    pub seed: u64,

    /// Replaces the tier's wall-clock budget
    pub budget_override_secs: Option<u64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            reuse_data: true,
            seed: 42,
            budget_override_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text
    Text,
    /// One JSON object per line
    Json,
}

// ============================================================================
// Loading and validation
// ============================================================================

impl BenchConfig {
    /// Load defaults, then the optional file, then `INDEXBENCH__*` variables.
    pub fn load(config_file: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        let defaults = Self::default();
        let defaults_json =
            serde_json::to_string(&defaults).context("Failed to serialize defaults")?;
        builder = builder.add_source(config::File::from_str(
            &defaults_json,
            config::FileFormat::Json,
        ));

        if let Some(path) = config_file {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("INDEXBENCH")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let settings = builder.build().context("Failed to build config")?;
        let config: Self = settings
            .try_deserialize()
            .context("Failed to deserialize config")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.database.port > 0, "database.port must be > 0");
        anyhow::ensure!(
            !self.database.host.trim().is_empty(),
            "database.host cannot be empty"
        );
        anyhow::ensure!(
            self.database.statement_timeout_ms > 0,
            "database.statement_timeout_ms must be > 0"
        );

        let (a, b) = (self.engines.baseline.trim(), self.engines.candidate.trim());
        anyhow::ensure!(
            !a.is_empty() && !b.is_empty(),
            "engines.baseline and engines.candidate cannot be empty"
        );
        anyhow::ensure!(
            a != b,
            "engines.baseline and engines.candidate must differ, both are '{}'",
            a
        );
        for name in [a, b] {
            anyhow::ensure!(
                name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'),
                "engine name '{}' must be a plain identifier",
                name
            );
        }

        let t = &self.thresholds;
        anyhow::ensure!(
            t.latency_warning > 1.0,
            "thresholds.latency_warning must be > 1.0, got {}",
            t.latency_warning
        );
        anyhow::ensure!(
            t.latency_critical > t.latency_warning,
            "thresholds.latency_critical ({}) must exceed latency_warning ({})",
            t.latency_critical,
            t.latency_warning
        );
        anyhow::ensure!(
            t.size_warning > 1.0,
            "thresholds.size_warning must be > 1.0, got {}",
            t.size_warning
        );

        let d = &self.decision;
        anyhow::ensure!(
            d.avoid_below > 0.0 && d.avoid_below < d.speedup,
            "decision.avoid_below must be in (0, decision.speedup)"
        );
        anyhow::ensure!(
            d.strong_speedup >= d.speedup,
            "decision.strong_speedup must be >= decision.speedup"
        );
        anyhow::ensure!(
            d.strong_compression > 0.0 && d.size_only_compression > 0.0,
            "decision compression thresholds must be > 0"
        );

        if self.eviction.enabled {
            anyhow::ensure!(
                !self.eviction.os_evict_command.trim().is_empty(),
                "eviction.os_evict_command cannot be empty when eviction is enabled"
            );
        }
        if let Some(secs) = self.run.budget_override_secs {
            anyhow::ensure!(secs > 0, "run.budget_override_secs must be > 0");
        }
        Ok(())
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            host: self.database.host.clone(),
            port: self.database.port,
            user: self.database.user.clone(),
            dbname: self.database.dbname.clone(),
            password: self.database.password.clone(),
            statement_timeout_ms: self.database.statement_timeout_ms,
            os_evict_command: self.eviction.enabled.then(|| {
                (
                    self.eviction.os_evict_command.clone(),
                    self.eviction.os_evict_args.clone(),
                )
            }),
        }
    }

    pub fn budget_override(&self) -> Option<Duration> {
        self.run.budget_override_secs.map(Duration::from_secs)
    }

    /// Effective configuration as TOML, password masked.
    pub fn to_toml(&self) -> Result<String> {
        let mut shown = self.clone();
        if shown.database.password.is_some() {
            shown.database.password = Some("********".to_string());
        }
        toml::to_string_pretty(&shown).context("Failed to render config as TOML")
    }
}
