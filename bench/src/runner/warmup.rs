use crate::cache::{CacheMode, Preparation};
use crate::workload::Query;

/// How many discarded and measured executions a query gets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplingPlan {
    /// Run one discarded execution before measuring
    pub warmup: bool,
    /// Measured executions required for a complete result
    pub repeat: u32,
}

impl SamplingPlan {
    /// Plan for `query` once the cache controller has prepared it.
    ///
    /// Cold measurement is a single run with no warmup: a second execution
    /// would find the pages the first one loaded. A hot preparation already
    /// executed the query, which counts as its warmup.
    pub fn for_query(query: &Query, prep: &Preparation) -> Self {
        match query.cache_mode {
            CacheMode::Cold => Self {
                warmup: false,
                repeat: 1,
            },
            CacheMode::Hot | CacheMode::Warm => Self {
                warmup: query.warmup && !prep.primed,
                repeat: query.configured_repeat(),
            },
        }
    }

    /// Executions this plan issues after preparation.
    pub fn executions(&self) -> u32 {
        self.repeat + u32::from(self.warmup)
    }
}
