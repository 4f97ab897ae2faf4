use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, NoTls, SimpleQueryMessage};
use tracing::{debug, warn};

use super::{BenchClient, ClientConfig, Eviction, Execution};
use crate::error::BenchError;

/// PostgreSQL client for the database under test
pub struct PgClient {
    client: Client,
    config: ClientConfig,
    has_buffercache: bool,
}

impl PgClient {
    /// Connect, apply the statement timeout and detect eviction support.
    ///
    /// Any failure here is a run-level `Connection` error.
    pub async fn connect(config: ClientConfig) -> Result<Self, BenchError> {
        let pwd = config.password.as_deref().unwrap_or("");
        let conn_str = format!(
            "host={} port={} user={} dbname={} password={} application_name=indexbench",
            config.host, config.port, config.user, config.dbname, pwd
        );
        debug!(
            "Connecting: host={} port={} user={} dbname={}",
            config.host, config.port, config.user, config.dbname
        );

        let (client, connection) = tokio_postgres::connect(&conn_str, NoTls)
            .await
            .map_err(|e| {
                BenchError::Connection(format!(
                    "{}:{}/{}: {}",
                    config.host, config.port, config.dbname, e
                ))
            })?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!("Connection error: {}", e);
            }
        });

        client
            .simple_query(&format!(
                "SET statement_timeout = {};",
                config.statement_timeout_ms
            ))
            .await
            .map_err(|e| BenchError::Connection(format!("cannot set statement_timeout: {}", e)))?;

        let mut pg = Self {
            client,
            config,
            has_buffercache: false,
        };
        pg.has_buffercache = pg.detect_buffercache().await;
        if !pg.has_buffercache {
            warn!("pg_buffercache eviction unavailable; cold runs will be marked degraded");
        }
        Ok(pg)
    }

    async fn detect_buffercache(&self) -> bool {
        let sql = "SELECT 1 FROM pg_proc WHERE proname = 'pg_buffercache_evict_relation';";
        match self.execute(sql).await {
            Ok(exec) => exec.row_count() > 0,
            Err(_) => false,
        }
    }

    fn map_error(&self, sql: &str, e: tokio_postgres::Error) -> BenchError {
        if e.is_closed() {
            return BenchError::Connection(e.to_string());
        }
        match e.code() {
            Some(code) if *code == SqlState::QUERY_CANCELED => BenchError::QueryTimeout {
                sql: sql.to_string(),
                limit_ms: self.config.statement_timeout_ms,
            },
            _ => {
                let detail = e
                    .as_db_error()
                    .map(|db| db.message().to_string())
                    .unwrap_or_else(|| e.to_string());
                BenchError::QueryFailed(detail)
            }
        }
    }

    async fn relation_files(&self, relation: &str) -> Result<Vec<PathBuf>, BenchError> {
        let exec = self
            .execute(&format!(
                "SELECT current_setting('data_directory') || '/' || pg_relation_filepath('{}');",
                relation
            ))
            .await?;
        let Some(base) = exec.scalar() else {
            return Ok(Vec::new());
        };
        segment_files(Path::new(base)).await
    }
}

/// Main fork plus `.1`, `.2`, ... segments of a relation file.
async fn segment_files(base: &Path) -> Result<Vec<PathBuf>, BenchError> {
    let Some(dir) = base.parent() else {
        return Ok(Vec::new());
    };
    let Some(stem) = base.file_name().and_then(|s| s.to_str()) else {
        return Ok(Vec::new());
    };
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| BenchError::EvictionUnsupported(format!("{}: {}", dir.display(), e)))?;

    let segment_prefix = format!("{}.", stem);
    let mut files = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let is_segment = name
            .strip_prefix(&segment_prefix)
            .is_some_and(|n| n.chars().all(|c| c.is_ascii_digit()));
        if name == stem || is_segment {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

#[async_trait]
impl BenchClient for PgClient {
    async fn execute(&self, sql: &str) -> Result<Execution, BenchError> {
        let start = Instant::now();
        let messages = self
            .client
            .simple_query(sql)
            .await
            .map_err(|e| self.map_error(sql, e))?;
        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

        let rows = messages
            .into_iter()
            .filter_map(|msg| match msg {
                SimpleQueryMessage::Row(row) => {
                    Some((0..row.len()).map(|i| row.get(i).map(str::to_string)).collect())
                }
                _ => None,
            })
            .collect();

        Ok(Execution { duration_ms, rows })
    }

    async fn evict_relation(&self, relation: &str) -> Result<Eviction, BenchError> {
        if !self.has_buffercache {
            return Ok(Eviction::Unsupported(
                "pg_buffercache_evict_relation() not installed".to_string(),
            ));
        }
        let exec = self
            .execute(&format!(
                "SELECT buffers_evicted FROM pg_buffercache_evict_relation('{}'::regclass);",
                relation
            ))
            .await?;
        let evicted = exec.scalar().and_then(|v| v.parse().ok()).unwrap_or(0);
        Ok(Eviction::Evicted(evicted))
    }

    async fn evict_os_cache(&self, relation: &str) -> Result<Eviction, BenchError> {
        let Some((program, args)) = self.config.os_evict_command.clone() else {
            return Ok(Eviction::Unsupported("OS eviction disabled".to_string()));
        };

        let files = match self.relation_files(relation).await {
            Ok(files) if !files.is_empty() => files,
            Ok(_) => {
                return Ok(Eviction::Unsupported(format!(
                    "no local data files for {}",
                    relation
                )))
            }
            Err(BenchError::EvictionUnsupported(msg)) | Err(BenchError::QueryFailed(msg)) => {
                return Ok(Eviction::Unsupported(msg))
            }
            Err(e) => return Err(e),
        };

        let output = tokio::process::Command::new(&program)
            .args(&args)
            .args(&files)
            .output()
            .await;
        match output {
            Ok(out) if out.status.success() => Ok(Eviction::Evicted(files.len() as u64)),
            Ok(out) => Ok(Eviction::Unsupported(format!(
                "{} exited with {}: {}",
                program,
                out.status,
                String::from_utf8_lossy(&out.stderr).trim()
            ))),
            Err(e) => Ok(Eviction::Unsupported(format!("{}: {}", program, e))),
        }
    }

    async fn capacity_signal(&self) -> Result<u64, BenchError> {
        let exec = self.execute("SHOW shared_buffers;").await?;
        let raw = exec.scalar().unwrap_or_default();
        parse_memory_setting(raw).ok_or_else(|| {
            BenchError::QueryFailed(format!("unparseable shared_buffers value '{}'", raw))
        })
    }
}

/// Parse a PostgreSQL memory setting such as `128MB`, `8192kB` or `16384`.
///
/// A bare number is a count of 8 kB buffers.
pub fn parse_memory_setting(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let value: u64 = digits.parse().ok()?;
    let multiplier = match unit.trim() {
        "" => 8 * 1024,
        "B" => 1,
        "kB" => 1024,
        "MB" => 1024 * 1024,
        "GB" => 1024 * 1024 * 1024,
        "TB" => 1024 * 1024 * 1024 * 1024,
        _ => return None,
    };
    value.checked_mul(multiplier)
}
