//! In-memory stand-in for the database under test.
//!
//! Understands just enough of the SQL the harness issues to track tables,
//! indexes and row counts, and answers every measured query with a fixed
//! per-engine latency. The first query after an eviction of its table or
//! index is slower by `cold_factor`. Failures are injected by substring
//! match.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use indexbench::{BenchClient, BenchError, Eviction, Execution};

pub const ROWS_PER_TABLE: u64 = 1_000;

struct FailRule {
    pattern: String,
    /// Matching statements that still succeed before the rule fires
    pass: usize,
    error: BenchError,
}

struct State {
    tables: HashMap<String, u64>,
    /// index name -> (table, engine)
    indexes: HashMap<String, (String, String)>,
    inserted_rows: u64,
    log: Vec<String>,
    rules: Vec<FailRule>,
    evictions: Vec<String>,
    /// Relations evicted since a query last read them
    cold: HashSet<String>,
}

pub struct FakeClient {
    state: Mutex<State>,
    pub capacity: Option<u64>,
    pub relation_eviction: bool,
    pub os_eviction: bool,
    pub parallel_workers: u32,
    pub latency_ms: HashMap<String, f64>,
    pub cold_factor: f64,
    pub index_size: HashMap<String, u64>,
}

impl FakeClient {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                tables: HashMap::new(),
                indexes: HashMap::new(),
                inserted_rows: 0,
                log: Vec::new(),
                rules: Vec::new(),
                evictions: Vec::new(),
                cold: HashSet::new(),
            }),
            capacity: Some(128 * 1024 * 1024),
            relation_eviction: true,
            os_eviction: true,
            parallel_workers: 0,
            latency_ms: HashMap::from([("btree".to_string(), 2.0), ("smol".to_string(), 1.0)]),
            cold_factor: 10.0,
            index_size: HashMap::from([
                ("btree".to_string(), 4 * 1024 * 1024),
                ("smol".to_string(), 1024 * 1024),
            ]),
        }
    }

    pub fn with_capacity(mut self, bytes: Option<u64>) -> Self {
        self.capacity = bytes;
        self
    }

    pub fn without_relation_eviction(mut self) -> Self {
        self.relation_eviction = false;
        self
    }

    pub fn with_latency(mut self, engine: &str, ms: f64) -> Self {
        self.latency_ms.insert(engine.to_string(), ms);
        self
    }

    pub fn with_index_size(mut self, engine: &str, bytes: u64) -> Self {
        self.index_size.insert(engine.to_string(), bytes);
        self
    }

    /// Fail every statement containing `pattern`.
    pub fn fail_on(&self, pattern: &str, error: BenchError) {
        self.fail_after(pattern, 0, error);
    }

    /// Let `pass` matching statements succeed, then fail the rest.
    pub fn fail_after(&self, pattern: &str, pass: usize, error: BenchError) {
        self.state.lock().unwrap().rules.push(FailRule {
            pattern: pattern.to_string(),
            pass,
            error,
        });
    }

    pub fn clear_failures(&self) {
        self.state.lock().unwrap().rules.clear();
    }

    pub fn inserted_rows(&self) -> u64 {
        self.state.lock().unwrap().inserted_rows
    }

    pub fn row_count(&self, table: &str) -> Option<u64> {
        self.state.lock().unwrap().tables.get(table).copied()
    }

    pub fn has_index(&self, name: &str) -> bool {
        self.state.lock().unwrap().indexes.contains_key(name)
    }

    /// Number of executed statements containing `pattern`.
    pub fn executions(&self, pattern: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .log
            .iter()
            .filter(|sql| sql.contains(pattern))
            .count()
    }

    pub fn evictions(&self) -> Vec<String> {
        self.state.lock().unwrap().evictions.clone()
    }

    fn run(&self, sql: &str) -> Result<Execution, BenchError> {
        let mut state = self.state.lock().unwrap();
        state.log.push(sql.to_string());

        for rule in state.rules.iter_mut() {
            if sql.contains(&rule.pattern) {
                if rule.pass == 0 {
                    return Err(rule.error.clone());
                }
                rule.pass -= 1;
            }
        }

        let trimmed = sql.trim().trim_end_matches(';');
        if let Some(rest) = trimmed.strip_prefix("SELECT to_regclass('") {
            let name = rest.split('\'').next().unwrap_or_default();
            let exists = state.tables.contains_key(name) || state.indexes.contains_key(name);
            return Ok(scalar(if exists { "t" } else { "f" }));
        }
        if let Some(table) = trimmed.strip_prefix("SELECT count(*) FROM ") {
            if !table.contains(' ') {
                return match state.tables.get(table) {
                    Some(rows) => Ok(scalar(&rows.to_string())),
                    None => Err(BenchError::QueryFailed(format!(
                        "relation \"{}\" does not exist",
                        table
                    ))),
                };
            }
        }
        if let Some(rest) = trimmed.strip_prefix("SELECT pg_relation_size('") {
            let name = rest.split('\'').next().unwrap_or_default();
            let size = state
                .indexes
                .get(name)
                .and_then(|(_, engine)| self.index_size.get(engine))
                .copied()
                .unwrap_or(0);
            return Ok(scalar(&size.to_string()));
        }
        if let Some(rest) = trimmed.strip_prefix("CREATE UNLOGGED TABLE ") {
            let name = first_word(rest);
            state.tables.insert(name.to_string(), ROWS_PER_TABLE);
            state.inserted_rows += ROWS_PER_TABLE;
            return Ok(Execution::default());
        }
        if let Some(rest) = trimmed.strip_prefix("DROP TABLE IF EXISTS ") {
            let name = first_word(rest).to_string();
            state.tables.remove(&name);
            state.indexes.retain(|_, (table, _)| *table != name);
            return Ok(Execution::default());
        }
        if let Some(rest) = trimmed.strip_prefix("CREATE INDEX ") {
            // CREATE INDEX <name> ON <table> USING <engine>(<cols>) ...
            let words: Vec<&str> = rest.split_whitespace().collect();
            let (name, table) = (words[0], words[2]);
            let engine = words[4].split('(').next().unwrap_or_default();
            if !state.tables.contains_key(table) {
                return Err(BenchError::QueryFailed(format!(
                    "relation \"{}\" does not exist",
                    table
                )));
            }
            state
                .indexes
                .insert(name.to_string(), (table.to_string(), engine.to_string()));
            return Ok(Execution {
                duration_ms: 25.0,
                rows: Vec::new(),
            });
        }
        if let Some(rest) = trimmed.strip_prefix("DROP INDEX IF EXISTS ") {
            state.indexes.remove(first_word(rest));
            return Ok(Execution::default());
        }
        if trimmed == "SHOW server_version" {
            return Ok(scalar("16.4 (Debian 16.4-1)"));
        }
        if trimmed == "SHOW max_parallel_workers_per_gather" {
            return Ok(scalar(&self.parallel_workers.to_string()));
        }
        if trimmed.starts_with("SELECT") {
            // A measured query: answer with the latency of whichever engine
            // currently indexes the referenced table.
            let indexed = state
                .indexes
                .iter()
                .find(|(_, (table, _))| trimmed.contains(table.as_str()))
                .map(|(name, (table, engine))| (name.clone(), table.clone(), engine.clone()));
            let Some((index, table, engine)) = indexed else {
                return Ok(Execution {
                    duration_ms: 1.0,
                    rows: vec![vec![Some("1".to_string())]],
                });
            };
            let cold = state.cold.remove(&index) | state.cold.remove(&table);
            let factor = if cold { self.cold_factor } else { 1.0 };
            let duration_ms = self.latency_ms.get(&engine).copied().unwrap_or(1.0) * factor;
            return Ok(Execution {
                duration_ms,
                rows: vec![vec![Some("1".to_string())]],
            });
        }
        Ok(Execution {
            duration_ms: 0.1,
            rows: Vec::new(),
        })
    }
}

#[async_trait]
impl BenchClient for FakeClient {
    async fn execute(&self, sql: &str) -> Result<Execution, BenchError> {
        self.run(sql)
    }

    async fn evict_relation(&self, relation: &str) -> Result<Eviction, BenchError> {
        if !self.relation_eviction {
            return Ok(Eviction::Unsupported(
                "pg_buffercache_evict_relation is not installed".to_string(),
            ));
        }
        let mut state = self.state.lock().unwrap();
        state.evictions.push(format!("buffers:{}", relation));
        state.cold.insert(relation.to_string());
        Ok(Eviction::Evicted(16))
    }

    async fn evict_os_cache(&self, relation: &str) -> Result<Eviction, BenchError> {
        if !self.os_eviction {
            return Ok(Eviction::Unsupported("vmtouch not found".to_string()));
        }
        let mut state = self.state.lock().unwrap();
        state.evictions.push(format!("os:{}", relation));
        state.cold.insert(relation.to_string());
        Ok(Eviction::Evicted(1))
    }

    async fn capacity_signal(&self) -> Result<u64, BenchError> {
        self.capacity
            .ok_or_else(|| BenchError::QueryFailed("permission denied for shared_buffers".into()))
    }
}

fn scalar(value: &str) -> Execution {
    Execution {
        duration_ms: 0.1,
        rows: vec![vec![Some(value.to_string())]],
    }
}

fn first_word(s: &str) -> &str {
    s.split_whitespace()
        .next()
        .unwrap_or_default()
        .trim_end_matches(';')
}
