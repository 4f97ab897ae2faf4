//! Cache state control.
//!
//! Every query enters the controller from an unknown cache state and leaves
//! it in exactly one of [`CacheMode::Hot`], [`CacheMode::Warm`] or
//! [`CacheMode::Cold`]. No state is carried between queries.
//!
//! | mode | sequence                                                        |
//! |------|-----------------------------------------------------------------|
//! | hot  | run the query once, discard it                                  |
//! | warm | `CHECKPOINT`, `DISCARD PLANS`                                   |
//! | cold | per-relation buffer eviction, then OS page-cache eviction       |
//!
//! Cold falls back to `CHECKPOINT` plus best-effort OS eviction when the
//! per-relation primitive is missing, and the preparation is annotated
//! [`DEGRADED_EVICTION`]. Only a lost connection escapes as an error.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, instrument, warn};

use crate::client::{BenchClient, Eviction};
use crate::error::BenchError;

pub const DEGRADED_EVICTION: &str = "degraded-eviction";
pub const OS_EVICTION_UNAVAILABLE: &str = "os-eviction-unavailable";
pub const WARM_PREP_INCOMPLETE: &str = "warm-prep-incomplete";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    Hot,
    Warm,
    Cold,
}

impl CacheMode {
    pub fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "hot" => Ok(CacheMode::Hot),
            "warm" => Ok(CacheMode::Warm),
            "cold" => Ok(CacheMode::Cold),
            _ => anyhow::bail!("Unknown cache mode: {}. Use 'hot', 'warm' or 'cold'", s),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CacheMode::Hot => "hot",
            CacheMode::Warm => "warm",
            CacheMode::Cold => "cold",
        }
    }
}

impl fmt::Display for CacheMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the controller did to reach a mode
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Preparation {
    /// The query already ran once against the prepared cache
    pub primed: bool,
    /// Buffers dropped by the per-relation primitive
    pub buffers_evicted: Option<u64>,
    /// Files dropped from the OS page cache
    pub os_files_evicted: Option<u64>,
    pub annotations: Vec<String>,
}

impl Preparation {
    pub fn is_degraded(&self) -> bool {
        self.annotations.iter().any(|a| a == DEGRADED_EVICTION)
    }

    fn annotate(&mut self, note: &str) {
        if !self.annotations.iter().any(|a| a == note) {
            self.annotations.push(note.to_string());
        }
    }
}

pub struct CacheController<'a> {
    client: &'a dyn BenchClient,
    os_eviction: bool,
}

impl<'a> CacheController<'a> {
    pub fn new(client: &'a dyn BenchClient, os_eviction: bool) -> Self {
        Self {
            client,
            os_eviction,
        }
    }

    /// Bring `relation` to `mode` before `sql` is measured.
    ///
    /// A hot preparation that fails to run the query returns that query
    /// error; the caller owns the decision about the affected result.
    #[instrument(level = "debug", skip(self, sql))]
    pub async fn prepare(
        &self,
        relation: &str,
        mode: CacheMode,
        sql: &str,
    ) -> Result<Preparation, BenchError> {
        let mut prep = Preparation::default();
        match mode {
            CacheMode::Hot => {
                self.client.execute(sql).await?;
                prep.primed = true;
            }
            CacheMode::Warm => {
                for stmt in ["CHECKPOINT;", "DISCARD PLANS;"] {
                    if let Err(e) = self.client.execute(stmt).await {
                        if e.is_fatal() {
                            return Err(e);
                        }
                        warn!(relation, statement = stmt, error = %e, "warm preparation step failed");
                        prep.annotate(WARM_PREP_INCOMPLETE);
                    }
                }
            }
            CacheMode::Cold => self.prepare_cold(relation, &mut prep).await?,
        }
        Ok(prep)
    }

    async fn prepare_cold(&self, relation: &str, prep: &mut Preparation) -> Result<(), BenchError> {
        match self.client.evict_relation(relation).await {
            Ok(Eviction::Evicted(n)) => {
                debug!(relation, buffers = n, "evicted relation from buffer pool");
                prep.buffers_evicted = Some(n);
            }
            Ok(Eviction::Unsupported(reason)) => {
                warn!(relation, reason = %reason, "per-relation eviction unavailable, degrading to checkpoint");
                self.degrade(relation, prep).await?;
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(relation, error = %e, "per-relation eviction failed, degrading to checkpoint");
                self.degrade(relation, prep).await?;
            }
        }

        if !self.os_eviction {
            prep.annotate(OS_EVICTION_UNAVAILABLE);
            return Ok(());
        }
        match self.client.evict_os_cache(relation).await {
            Ok(Eviction::Evicted(n)) => prep.os_files_evicted = Some(n),
            Ok(Eviction::Unsupported(reason)) => {
                debug!(relation, reason = %reason, "OS page-cache eviction unavailable");
                prep.annotate(OS_EVICTION_UNAVAILABLE);
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                debug!(relation, error = %e, "OS page-cache eviction failed");
                prep.annotate(OS_EVICTION_UNAVAILABLE);
            }
        }
        Ok(())
    }

    async fn degrade(&self, relation: &str, prep: &mut Preparation) -> Result<(), BenchError> {
        prep.annotate(DEGRADED_EVICTION);
        if let Err(e) = self.client.execute("CHECKPOINT;").await {
            if e.is_fatal() {
                return Err(e);
            }
            warn!(relation, error = %e, "fallback checkpoint failed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_modes() {
        assert_eq!(CacheMode::from_str("HOT").unwrap(), CacheMode::Hot);
        assert_eq!(CacheMode::from_str("warm").unwrap(), CacheMode::Warm);
        assert_eq!(CacheMode::from_str("cold").unwrap(), CacheMode::Cold);
        assert!(CacheMode::from_str("lukewarm").is_err());
    }

    #[test]
    fn annotations_are_deduplicated() {
        let mut prep = Preparation::default();
        prep.annotate(DEGRADED_EVICTION);
        prep.annotate(DEGRADED_EVICTION);
        assert_eq!(prep.annotations.len(), 1);
        assert!(prep.is_degraded());
    }

    #[test]
    fn serde_names_are_lowercase() {
        assert_eq!(serde_json::to_string(&CacheMode::Cold).unwrap(), "\"cold\"");
    }
}
