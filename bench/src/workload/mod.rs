use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cache::CacheMode;
use crate::client::BenchClient;
use crate::error::BenchError;

pub mod patterns;
pub mod suite;

pub use patterns::{KeyType, SqlWorkload, TextKey, WorkloadPattern};
pub use suite::{build_suite, SuiteMode};

/// Shape of a query, which fixes its default repeat count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryClass {
    PointLookup,
    RangeScan,
    FullScan,
    Aggregation,
    Custom(u32),
}

impl QueryClass {
    pub const fn default_repeat(self) -> u32 {
        match self {
            QueryClass::PointLookup => 10,
            QueryClass::RangeScan => 5,
            QueryClass::FullScan => 3,
            QueryClass::Aggregation => 5,
            QueryClass::Custom(repeat) => repeat,
        }
    }
}

/// One measured statement of a workload
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub id: String,
    pub sql: String,
    pub description: String,
    pub class: QueryClass,
    pub cache_mode: CacheMode,
    /// Per-instance override of the class default
    pub repeat: Option<u32>,
    pub warmup: bool,
}

impl Query {
    pub fn new(id: impl Into<String>, sql: impl Into<String>, class: QueryClass) -> Self {
        Self {
            id: id.into(),
            sql: sql.into(),
            description: String::new(),
            class,
            cache_mode: CacheMode::Hot,
            repeat: None,
            warmup: true,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_repeat(mut self, repeat: u32) -> Self {
        self.repeat = Some(repeat);
        self
    }

    pub fn without_warmup(mut self) -> Self {
        self.warmup = false;
        self
    }

    pub fn in_mode(mut self, mode: CacheMode) -> Self {
        self.cache_mode = mode;
        self
    }

    /// Configured repeat count, before any cache-mode pinning.
    pub fn configured_repeat(&self) -> u32 {
        self.repeat.unwrap_or_else(|| self.class.default_repeat()).max(1)
    }
}

/// A table/index fixture plus the queries measured against it.
///
/// `generate` must be idempotent; the executor only calls it when the
/// backing table is missing or empty.
#[async_trait]
pub trait Workload: Send + Sync {
    /// Stable identifier, used in baseline keys
    fn id(&self) -> &str;

    fn description(&self) -> String;

    /// Backing table the indexes are built on
    fn table(&self) -> &str;

    /// Column list for `CREATE INDEX ... (<cols>)`
    fn index_columns(&self) -> &str;

    fn include_columns(&self) -> &[String] {
        &[]
    }

    /// `WHERE` clause for a partial index
    fn index_predicate(&self) -> Option<&str> {
        None
    }

    /// `max_parallel_workers_per_gather` during measurement
    fn parallelism(&self) -> u32 {
        0
    }

    /// Queries in declared order, one entry per cache mode measured
    fn queries(&self) -> Vec<Query>;

    async fn generate(&self, client: &dyn BenchClient) -> Result<(), BenchError>;
}

/// Name of the index a given engine gets on a table.
pub fn index_name(table: &str, engine: &str) -> String {
    format!("idx_{}_{}", table, engine)
}

pub fn create_index_sql(workload: &dyn Workload, engine: &str) -> String {
    let include = workload.include_columns();
    let include_clause = if include.is_empty() {
        String::new()
    } else {
        format!(" INCLUDE ({})", include.join(", "))
    };
    let where_clause = workload
        .index_predicate()
        .map(|p| format!(" WHERE {}", p))
        .unwrap_or_default();
    format!(
        "CREATE INDEX {} ON {} USING {}({}){}{};",
        index_name(workload.table(), engine),
        workload.table(),
        engine,
        workload.index_columns(),
        include_clause,
        where_clause
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_defaults() {
        assert_eq!(QueryClass::PointLookup.default_repeat(), 10);
        assert_eq!(QueryClass::RangeScan.default_repeat(), 5);
        assert_eq!(QueryClass::FullScan.default_repeat(), 3);
        assert_eq!(QueryClass::Aggregation.default_repeat(), 5);
        assert_eq!(QueryClass::Custom(7).default_repeat(), 7);
    }

    #[test]
    fn instance_override_wins() {
        let q = Query::new("q", "SELECT 1", QueryClass::FullScan);
        assert_eq!(q.configured_repeat(), 3);
        assert_eq!(q.with_repeat(12).configured_repeat(), 12);
    }

    #[test]
    fn zero_repeat_is_clamped() {
        let q = Query::new("q", "SELECT 1", QueryClass::Custom(0));
        assert_eq!(q.configured_repeat(), 1);
    }

    #[test]
    fn builder_defaults() {
        let q = Query::new("q", "SELECT 1", QueryClass::RangeScan)
            .describe("range")
            .in_mode(CacheMode::Cold);
        assert!(q.warmup);
        assert_eq!(q.cache_mode, CacheMode::Cold);
        assert_eq!(q.description, "range");
        assert!(!q.without_warmup().warmup);
    }
}
