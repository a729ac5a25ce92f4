//! Process-wide delivery counters, reported by the status server.
//!
//! Counters are relaxed atomics: a best-effort gauge, not an audit log.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::types::Verdict;

#[derive(Debug, Default)]
pub struct Stats {
    greylisted: AtomicU64,
    matched: AtomicU64,
    trusted: AtomicU64,
    accepted: AtomicU64,
    blocked: AtomicU64,
}

impl Stats {
    /// Record a final judgment. `trusted` marks an accept that came from a
    /// definitive pass rather than plain lack of suspicion.
    pub fn record_verdict(&self, verdict: &Verdict, trusted: bool) {
        match verdict {
            Verdict::Accept if trusted => self.trusted.fetch_add(1, Ordering::Relaxed),
            Verdict::Accept => self.accepted.fetch_add(1, Ordering::Relaxed),
            Verdict::Greylist => self.greylisted.fetch_add(1, Ordering::Relaxed),
            Verdict::Block { .. } => self.blocked.fetch_add(1, Ordering::Relaxed),
        };
    }

    /// Record a DNS list hit.
    pub fn record_match(&self) {
        self.matched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            greylisted: self.greylisted.load(Ordering::Relaxed),
            matched: self.matched.load(Ordering::Relaxed),
            trusted: self.trusted.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            blocked: self.blocked.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time counter values.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub greylisted: u64,
    pub matched: u64,
    pub trusted: u64,
    pub accepted: u64,
    pub blocked: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdicts_land_in_their_counters() {
        let stats = Stats::default();
        stats.record_verdict(&Verdict::Accept, false);
        stats.record_verdict(&Verdict::Accept, true);
        stats.record_verdict(&Verdict::Greylist, false);
        stats.record_verdict(
            &Verdict::Block {
                reason: "SPF policy violation".to_string(),
            },
            false,
        );
        stats.record_match();

        let snap = stats.snapshot();
        assert_eq!(snap.accepted, 1);
        assert_eq!(snap.trusted, 1);
        assert_eq!(snap.greylisted, 1);
        assert_eq!(snap.blocked, 1);
        assert_eq!(snap.matched, 1);
    }
}
