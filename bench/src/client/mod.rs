use async_trait::async_trait;

use crate::error::BenchError;

pub mod postgres;

pub use postgres::PgClient;

/// Connection settings for the database under test
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub dbname: String,
    pub password: Option<String>,
    /// Per-statement limit; exceeding it is reported as a query timeout
    pub statement_timeout_ms: u64,
    /// Out-of-process page-cache eviction utility and its fixed arguments
    pub os_evict_command: Option<(String, Vec<String>)>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            dbname: "postgres".to_string(),
            password: None,
            statement_timeout_ms: 300_000,
            os_evict_command: Some(("vmtouch".to_string(), vec!["-e".to_string()])),
        }
    }
}

/// Outcome of one statement: wall-clock duration plus the returned rows as text
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Execution {
    pub duration_ms: f64,
    pub rows: Vec<Vec<Option<String>>>,
}

impl Execution {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// First column of the first row, if any.
    pub fn scalar(&self) -> Option<&str> {
        self.rows
            .first()
            .and_then(|row| row.first())
            .and_then(|v| v.as_deref())
    }
}

/// Result of an eviction request.
///
/// `Evicted(0)` means the mechanism worked but nothing was resident;
/// `Unsupported` means the mechanism itself is unavailable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eviction {
    Evicted(u64),
    Unsupported(String),
}

/// Capability the benchmark core needs from the database under test
#[async_trait]
pub trait BenchClient: Send + Sync {
    /// Execute SQL (possibly several statements) and measure wall-clock time
    async fn execute(&self, sql: &str) -> Result<Execution, BenchError>;

    /// Drop a relation's pages from the database's own buffer pool
    async fn evict_relation(&self, relation: &str) -> Result<Eviction, BenchError>;

    /// Drop a relation's backing files from the OS page cache
    async fn evict_os_cache(&self, relation: &str) -> Result<Eviction, BenchError>;

    /// Configured cache-buffer size in bytes
    async fn capacity_signal(&self) -> Result<u64, BenchError>;

    /// Server version string, if the server reports one
    async fn server_version(&self) -> Option<String> {
        self.execute("SHOW server_version;")
            .await
            .ok()
            .and_then(|e| e.scalar().map(|s| s.split_whitespace().next().unwrap_or(s).to_string()))
    }

    /// Parallel workers per gather node, if readable
    async fn max_parallel_workers(&self) -> Option<u32> {
        self.execute("SHOW max_parallel_workers_per_gather;")
            .await
            .ok()
            .and_then(|e| e.scalar().and_then(|s| s.trim().parse().ok()))
    }
}

/// Whether a relation with this name exists.
pub async fn relation_exists(client: &dyn BenchClient, relation: &str) -> Result<bool, BenchError> {
    let exec = client
        .execute(&format!(
            "SELECT to_regclass('{}') IS NOT NULL;",
            relation
        ))
        .await?;
    Ok(matches!(exec.scalar(), Some("t") | Some("true")))
}

/// Number of rows in `table`, or `None` if the table does not exist.
pub async fn table_row_count(
    client: &dyn BenchClient,
    table: &str,
) -> Result<Option<u64>, BenchError> {
    if !relation_exists(client, table).await? {
        return Ok(None);
    }
    let exec = client
        .execute(&format!("SELECT count(*) FROM {};", table))
        .await?;
    Ok(Some(parse_u64(exec.scalar())))
}

/// On-disk size of a relation in bytes.
pub async fn relation_size(client: &dyn BenchClient, relation: &str) -> Result<u64, BenchError> {
    let exec = client
        .execute(&format!("SELECT pg_relation_size('{}');", relation))
        .await?;
    Ok(parse_u64(exec.scalar()))
}

fn parse_u64(value: Option<&str>) -> u64 {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(0)
}
