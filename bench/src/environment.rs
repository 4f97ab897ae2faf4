//! Environment probing and scale-tier selection.
//!
//! The capacity signal (the server's buffer-pool size) is read once at
//! process start and mapped to a [`ScaleTier`]. The tier is immutable for the
//! rest of the run: it fixes the row-count candidates, the cache modes a full
//! run exercises and the wall-clock budget that bounds the whole run.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{info, warn};

use crate::cache::CacheMode;
use crate::client::BenchClient;

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

/// Capacity below which the micro tier is selected.
pub const MICRO_CEILING_BYTES: u64 = 256 * MIB;
/// Capacity above which the large tier is selected.
pub const STANDARD_CEILING_BYTES: u64 = 2 * GIB;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleTier {
    Micro,
    Standard,
    Large,
}

impl ScaleTier {
    /// Tier for a buffer-pool size in bytes.
    ///
    /// `< 256 MiB` is micro, `256 MiB ..= 2 GiB` is standard, anything larger
    /// is large.
    pub fn from_capacity(bytes: u64) -> Self {
        if bytes < MICRO_CEILING_BYTES {
            ScaleTier::Micro
        } else if bytes <= STANDARD_CEILING_BYTES {
            ScaleTier::Standard
        } else {
            ScaleTier::Large
        }
    }

    pub fn profile(self) -> TierProfile {
        match self {
            ScaleTier::Micro => TierProfile {
                name: "CI/Small VM",
                row_counts: &[100_000, 500_000],
                cache_modes: &[CacheMode::Hot],
                timeout: Duration::from_secs(3 * 60),
            },
            ScaleTier::Standard => TierProfile {
                name: "Developer Workstation",
                row_counts: &[1_000_000, 5_000_000],
                cache_modes: &[CacheMode::Hot, CacheMode::Cold],
                timeout: Duration::from_secs(15 * 60),
            },
            ScaleTier::Large => TierProfile {
                name: "Production-like",
                row_counts: &[20_000_000, 50_000_000],
                cache_modes: &[CacheMode::Hot, CacheMode::Warm, CacheMode::Cold],
                timeout: Duration::from_secs(45 * 60),
            },
        }
    }
}

impl fmt::Display for ScaleTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScaleTier::Micro => "micro",
            ScaleTier::Standard => "standard",
            ScaleTier::Large => "large",
        };
        f.write_str(s)
    }
}

/// Fixed parameters attached to a tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierProfile {
    pub name: &'static str,
    /// Row-count candidates, smallest first
    pub row_counts: &'static [u64],
    /// Cache modes a full run measures
    pub cache_modes: &'static [CacheMode],
    /// Wall-clock budget for the whole run
    pub timeout: Duration,
}

/// What the prober saw, recorded in the result artifact
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnvironmentSnapshot {
    pub tier: ScaleTier,
    pub tier_name: String,
    /// Raw capacity signal; `None` when it could not be read
    pub capacity_bytes: Option<u64>,
    pub row_counts: Vec<u64>,
    pub timeout_secs: u64,
    pub server_version: Option<String>,
    pub max_parallel_workers: Option<u32>,
    pub annotations: Vec<String>,
}

impl EnvironmentSnapshot {
    pub fn from_capacity(capacity_bytes: Option<u64>) -> Self {
        let mut annotations = Vec::new();
        let tier = match capacity_bytes {
            Some(bytes) => ScaleTier::from_capacity(bytes),
            None => {
                annotations.push(
                    "capacity-signal-unavailable: defaulted to micro tier".to_string(),
                );
                ScaleTier::Micro
            }
        };
        let profile = tier.profile();
        Self {
            tier,
            tier_name: profile.name.to_string(),
            capacity_bytes,
            row_counts: profile.row_counts.to_vec(),
            timeout_secs: profile.timeout.as_secs(),
            server_version: None,
            max_parallel_workers: None,
            annotations,
        }
    }

    pub fn profile(&self) -> TierProfile {
        self.tier.profile()
    }

    pub fn capacity_mb(&self) -> Option<f64> {
        self.capacity_bytes.map(|b| b as f64 / MIB as f64)
    }
}

/// Read the capacity signal and pick a tier.
///
/// Never fails: an unreadable signal falls back to the micro tier with an
/// annotation on the snapshot.
pub async fn probe(client: &dyn BenchClient) -> EnvironmentSnapshot {
    let capacity = match client.capacity_signal().await {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            warn!(error = %e, "could not read capacity signal, falling back to micro tier");
            None
        }
    };

    let mut snapshot = EnvironmentSnapshot::from_capacity(capacity);
    snapshot.server_version = client.server_version().await;
    snapshot.max_parallel_workers = client.max_parallel_workers().await;

    info!(
        tier = %snapshot.tier,
        capacity_mb = snapshot.capacity_mb().unwrap_or(0.0),
        timeout_secs = snapshot.timeout_secs,
        "selected scale tier"
    );
    snapshot
}
