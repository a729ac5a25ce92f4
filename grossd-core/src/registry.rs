//! The check registry: the ordered list of pools the orchestrator fans
//! out to, each flagged definitive or not.

use crate::pool::{PoolCounters, ThreadPool};

/// One registered check.
pub struct RegisteredCheck {
    pub pool: ThreadPool,
    /// A definitive check's terminal verdict (block or pass) short-circuits
    /// aggregation.
    pub definitive: bool,
}

/// Ordered list of `(pool, definitive)` entries, populated at startup by
/// each check's init function.
#[derive(Default)]
pub struct CheckRegistry {
    entries: Vec<RegisteredCheck>,
}

impl CheckRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, pool: ThreadPool, definitive: bool) {
        self.entries.push(RegisteredCheck { pool, definitive });
    }

    pub fn entries(&self) -> &[RegisteredCheck] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the named check was registered definitive.
    pub fn is_definitive(&self, checker: &str) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.definitive && entry.pool.name() == checker)
    }

    /// Per-pool worker populations, for the status server.
    pub fn pool_counters(&self) -> Vec<(String, PoolCounters)> {
        self.entries
            .iter()
            .map(|entry| (entry.pool.name().to_string(), entry.pool.counters()))
            .collect()
    }

    /// Stop accepting work on every pool.
    pub fn shut_down(&self) {
        for entry in &self.entries {
            entry.pool.shut_down();
        }
    }
}
