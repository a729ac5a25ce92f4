//! Per-request check orchestration.
//!
//! For each request the orchestrator builds one edict, submits it to every
//! registered pool, then collects results until enough evidence accrued or
//! the deadline elapsed, and combines them into the final verdict.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::edict::Edict;
use crate::queue::Fetched;
use crate::registry::CheckRegistry;
use crate::stats::Stats;
use crate::types::{CheckResult, GreyTuple, Judgment, Verdict};

/// Fallback reject text when a blocking check supplied none.
const DEFAULT_BLOCK_REASON: &str = "access denied";

/// Running aggregation of check results for one request.
#[derive(Debug, Default)]
pub struct Tally {
    blocked: bool,
    block_reason: Option<String>,
    definitive_pass: bool,
    suspicion: u32,
}

impl Tally {
    /// Fold one result in. Returns `true` when a definitive terminal
    /// judgment means collection can stop.
    pub fn absorb(&mut self, result: &CheckResult, definitive: bool) -> bool {
        match result.judgment {
            Judgment::Block => {
                self.blocked = true;
                if self.block_reason.is_none() {
                    self.block_reason = result.reason.clone();
                }
                definitive
            }
            Judgment::Pass => {
                if definitive {
                    self.definitive_pass = true;
                    return true;
                }
                false
            }
            Judgment::Suspicious => {
                self.suspicion += result.weight;
                false
            }
            Judgment::Undefined => false,
        }
    }

    /// The combined judgment: block dominates, then a definitive pass,
    /// then the suspicion sum against the greylisting threshold.
    pub fn verdict(&self, grey_threshold: u32) -> Verdict {
        if self.blocked {
            return Verdict::Block {
                reason: self
                    .block_reason
                    .clone()
                    .unwrap_or_else(|| DEFAULT_BLOCK_REASON.to_string()),
            };
        }
        if self.definitive_pass {
            return Verdict::Accept;
        }
        if self.suspicion >= grey_threshold {
            return Verdict::Greylist;
        }
        Verdict::Accept
    }

    pub fn trusted(&self) -> bool {
        self.definitive_pass && !self.blocked
    }
}

/// Combine a complete multiset of results, ignoring arrival order. The
/// live collection loop may stop early on a definitive terminal result;
/// for any fixed multiset the judgment is the same either way.
pub fn combine(
    results: &[CheckResult],
    is_definitive: impl Fn(&str) -> bool,
    grey_threshold: u32,
) -> Verdict {
    let mut tally = Tally::default();
    for result in results {
        tally.absorb(result, is_definitive(result.checker));
    }
    tally.verdict(grey_threshold)
}

/// The per-request fan-out/collect engine.
pub struct Orchestrator {
    registry: CheckRegistry,
    grey_threshold: u32,
    query_timelimit: Duration,
    stats: Arc<Stats>,
}

impl Orchestrator {
    pub fn new(
        registry: CheckRegistry,
        grey_threshold: u32,
        query_timelimit: Duration,
        stats: Arc<Stats>,
    ) -> Self {
        Self {
            registry,
            grey_threshold,
            query_timelimit,
            stats,
        }
    }

    pub fn registry(&self) -> &CheckRegistry {
        &self.registry
    }

    pub fn stats(&self) -> &Arc<Stats> {
        &self.stats
    }

    pub fn query_timelimit(&self) -> Duration {
        self.query_timelimit
    }

    /// Assess a request under the configured deadline.
    pub fn assess(&self, tuple: GreyTuple) -> Verdict {
        self.assess_with_deadline(tuple, self.query_timelimit)
    }

    /// Assess a request under an explicit deadline (the configured limit
    /// minus whatever the protocol front-end already spent).
    pub fn assess_with_deadline(&self, tuple: GreyTuple, timelimit: Duration) -> Verdict {
        let edict = Edict::new(tuple, timelimit);

        let mut submitted = 0usize;
        for entry in self.registry.entries() {
            match entry.pool.submit(&edict) {
                Ok(()) => submitted += 1,
                Err(e) => {
                    warn!(pool = entry.pool.name(), error = %e, "check submission failed");
                }
            }
        }

        let mut tally = Tally::default();
        let mut received = 0usize;
        while received < submitted {
            let remaining = edict.remaining();
            if remaining.is_zero() {
                debug!(
                    received,
                    submitted, "deadline elapsed before all checks reported"
                );
                break;
            }
            match edict.recv_result(Some(remaining)) {
                Fetched::Msg(result) => {
                    let definitive = self.registry.is_definitive(result.checker);
                    if !result.pending_more {
                        received += 1;
                    }
                    if tally.absorb(&result, definitive) {
                        debug!(checker = result.checker, "definitive result, stopping");
                        break;
                    }
                }
                Fetched::TimedOut => {
                    debug!(received, submitted, "timed out waiting for checks");
                    break;
                }
                Fetched::Shutdown => break,
            }
        }

        let verdict = tally.verdict(self.grey_threshold);
        self.stats.record_verdict(&verdict, tally.trusted());
        verdict
        // dropping our edict handle here; the last worker's drop drains
        // whatever late results never got read
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_definitive(checker: &str) -> bool {
        checker == "spf"
    }

    #[test]
    fn no_evidence_accepts() {
        let results = [CheckResult::undefined("greylist"), CheckResult::undefined("dnsbl")];
        assert_eq!(combine(&results, is_definitive, 1), Verdict::Accept);
    }

    #[test]
    fn suspicion_at_threshold_greylists() {
        let results = [CheckResult::suspicious("greylist", 1)];
        assert_eq!(combine(&results, is_definitive, 1), Verdict::Greylist);
        // below threshold: accept
        assert_eq!(combine(&results, is_definitive, 2), Verdict::Accept);
    }

    #[test]
    fn suspicion_weights_sum_across_checks() {
        let results = [
            CheckResult::suspicious("greylist", 1),
            CheckResult::suspicious("dnsbl", 2),
        ];
        assert_eq!(combine(&results, is_definitive, 3), Verdict::Greylist);
    }

    #[test]
    fn block_dominates_everything() {
        let results = [
            CheckResult::pass("greylist"),
            CheckResult::block("spf", "SPF policy violation"),
            CheckResult::suspicious("dnsbl", 5),
        ];
        assert_eq!(
            combine(&results, is_definitive, 1),
            Verdict::Block {
                reason: "SPF policy violation".to_string()
            }
        );
    }

    #[test]
    fn definitive_pass_beats_suspicion() {
        let results = [
            CheckResult::suspicious("greylist", 4),
            CheckResult::pass("spf"),
        ];
        assert_eq!(combine(&results, is_definitive, 1), Verdict::Accept);
    }

    #[test]
    fn non_definitive_pass_does_not_override_suspicion() {
        let results = [
            CheckResult::pass("greylist"),
            CheckResult::suspicious("dnsbl", 1),
        ];
        assert_eq!(combine(&results, is_definitive, 1), Verdict::Greylist);
    }

    #[test]
    fn combination_is_order_independent() {
        let mut results = vec![
            CheckResult::suspicious("greylist", 1),
            CheckResult::undefined("dnsbl"),
            CheckResult::suspicious("rhsbl", 2),
            CheckResult::pass("dnswl"),
        ];
        let forward = combine(&results, is_definitive, 2);
        results.reverse();
        let backward = combine(&results, is_definitive, 2);
        assert_eq!(forward, backward);
        results.swap(0, 2);
        assert_eq!(combine(&results, is_definitive, 2), forward);
    }

    #[test]
    fn missing_block_reason_gets_default() {
        let results = [CheckResult {
            checker: "spf",
            judgment: Judgment::Block,
            weight: 0,
            reason: None,
            pending_more: false,
        }];
        assert_eq!(
            combine(&results, is_definitive, 1),
            Verdict::Block {
                reason: DEFAULT_BLOCK_REASON.to_string()
            }
        );
    }
}
