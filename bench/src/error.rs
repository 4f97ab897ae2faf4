//! Error taxonomy for a benchmark run.
//!
//! Each variant names the unit of work it is allowed to invalidate:
//!
//! | variant               | scope                                    |
//! |-----------------------|------------------------------------------|
//! | `Connection`          | whole run (fatal)                        |
//! | `Generation`          | one workload (reported as `skipped`)     |
//! | `IndexBuild`          | one engine of one workload               |
//! | `QueryTimeout`        | one result (reported as `incomplete`)    |
//! | `QueryFailed`         | one result (reported as `incomplete`)    |
//! | `EvictionUnsupported` | nothing; cold fidelity is annotated      |
//! | `Baseline`            | regression checking for this run         |
//!
//! A missing baseline file is not an error at all; it is represented as an
//! absent snapshot.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum BenchError {
    Connection(String),
    Generation { workload: String, reason: String },
    IndexBuild { engine: String, reason: String },
    QueryTimeout { sql: String, limit_ms: u64 },
    QueryFailed(String),
    EvictionUnsupported(String),
    Baseline(String),
}

impl BenchError {
    /// Whether this error must abort the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BenchError::Connection(_))
    }

    /// Whether a failed query execution should be recorded as a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, BenchError::QueryTimeout { .. })
    }
}

impl fmt::Display for BenchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BenchError::Connection(msg) => write!(f, "Connection error: {}", msg),
            BenchError::Generation { workload, reason } => {
                write!(f, "Data generation failed for {}: {}", workload, reason)
            }
            BenchError::IndexBuild { engine, reason } => {
                write!(f, "Index build failed for engine {}: {}", engine, reason)
            }
            BenchError::QueryTimeout { sql, limit_ms } => write!(
                f,
                "Query exceeded statement timeout of {} ms: {}",
                limit_ms,
                truncate_sql(sql)
            ),
            BenchError::QueryFailed(msg) => write!(f, "Query failed: {}", msg),
            BenchError::EvictionUnsupported(msg) => write!(f, "Eviction unsupported: {}", msg),
            BenchError::Baseline(msg) => write!(f, "Baseline unusable: {}", msg),
        }
    }
}

impl std::error::Error for BenchError {}

fn truncate_sql(sql: &str) -> String {
    let flat = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > 120 {
        let head: String = flat.chars().take(117).collect();
        format!("{}...", head)
    } else {
        flat
    }
}
