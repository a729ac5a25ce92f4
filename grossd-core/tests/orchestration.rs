//! End-to-end engine tests: real pools, real edicts, stub check routines.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use grossd_core::bloom::BloomRing;
use grossd_core::checks::GreylistCheck;
use grossd_core::edict::Edict;
use grossd_core::orchestrator::Orchestrator;
use grossd_core::pool::{CheckRoutine, PoolLimits, ThreadPool};
use grossd_core::registry::CheckRegistry;
use grossd_core::stats::Stats;
use grossd_core::types::{CheckResult, GreyTuple, UpdatePolicy, Verdict};

/// A routine that always reports the same result, optionally after a nap.
struct FixedCheck {
    result: CheckResult,
    delay: Duration,
    runs: AtomicUsize,
}

impl FixedCheck {
    fn new(result: CheckResult) -> Arc<Self> {
        Arc::new(Self {
            result,
            delay: Duration::ZERO,
            runs: AtomicUsize::new(0),
        })
    }

    fn slow(result: CheckResult, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            result,
            delay,
            runs: AtomicUsize::new(0),
        })
    }
}

impl CheckRoutine for FixedCheck {
    type Ctx = ();

    fn run(&self, _ctx: &mut (), edict: &Edict) {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        edict.send_result(self.result.clone());
    }
}

fn tuple() -> GreyTuple {
    GreyTuple::new("10.0.0.1", "a@x", "b@y")
}

fn orchestrator(registry: CheckRegistry, grey_threshold: u32) -> Orchestrator {
    Orchestrator::new(
        registry,
        grey_threshold,
        Duration::from_secs(4),
        Arc::new(Stats::default()),
    )
}

#[test]
fn first_sighting_greylists_second_accepts() {
    let ring = Arc::new(BloomRing::new(4, 12));
    let mut registry = CheckRegistry::new();
    GreylistCheck::init(
        &mut registry,
        ring,
        UpdatePolicy::Grey,
        PoolLimits::new(1, 4),
    );
    let orchestrator = orchestrator(registry, 1);

    assert_eq!(orchestrator.assess(tuple()), Verdict::Greylist);
    assert_eq!(orchestrator.assess(tuple()), Verdict::Accept);

    let stats = orchestrator.stats().snapshot();
    assert_eq!(stats.greylisted, 1);
    assert_eq!(stats.accepted, 1);
}

#[test]
fn suspicious_weights_aggregate_across_pools() {
    // greylist miss (weight 1) plus a suspicious list hit (weight 1)
    let ring = Arc::new(BloomRing::new(4, 12));
    let mut registry = CheckRegistry::new();
    GreylistCheck::init(
        &mut registry,
        ring,
        UpdatePolicy::Grey,
        PoolLimits::new(1, 4),
    );
    registry.register(
        ThreadPool::new(
            "dnsbl",
            FixedCheck::new(CheckResult::suspicious("dnsbl", 1)),
            PoolLimits::new(1, 4),
        ),
        false,
    );
    let orchestrator = orchestrator(registry, 2);

    assert_eq!(orchestrator.assess(tuple()), Verdict::Greylist);
}

#[test]
fn definitive_block_wins_with_reason() {
    let mut registry = CheckRegistry::new();
    registry.register(
        ThreadPool::new(
            "greylist",
            FixedCheck::new(CheckResult::suspicious("greylist", 1)),
            PoolLimits::new(1, 4),
        ),
        false,
    );
    registry.register(
        ThreadPool::new(
            "spf",
            FixedCheck::new(CheckResult::block("spf", "SPF policy violation")),
            PoolLimits::new(1, 4),
        ),
        true,
    );
    let orchestrator = orchestrator(registry, 1);

    assert_eq!(
        orchestrator.assess(tuple()),
        Verdict::Block {
            reason: "SPF policy violation".to_string()
        }
    );
}

#[test]
fn definitive_pass_short_circuits_slow_suspicion() {
    // the definitive pass lands immediately; the suspicious check is so
    // slow its result only arrives after collection stopped
    let slow = FixedCheck::slow(
        CheckResult::suspicious("dnsbl", 10),
        Duration::from_millis(500),
    );
    let mut registry = CheckRegistry::new();
    registry.register(
        ThreadPool::new("dnswl-definitive", FixedCheck::new(CheckResult::pass("dnswl-definitive")), PoolLimits::new(1, 4)),
        true,
    );
    registry.register(
        ThreadPool::new("dnsbl", Arc::clone(&slow), PoolLimits::new(1, 4)),
        false,
    );
    let orchestrator = orchestrator(registry, 1);

    assert_eq!(orchestrator.assess(tuple()), Verdict::Accept);
}

#[test]
fn deadline_expiry_yields_no_evidence() {
    // a check slower than the whole deadline: the orchestrator must give
    // up and treat the request as unevidenced (fail safe: accept)
    let slow = FixedCheck::slow(
        CheckResult::suspicious("dnsbl", 10),
        Duration::from_millis(800),
    );
    let registry = {
        let mut registry = CheckRegistry::new();
        registry.register(
            ThreadPool::new("dnsbl", Arc::clone(&slow), PoolLimits::new(1, 4)),
            false,
        );
        registry
    };
    let orchestrator = Orchestrator::new(
        registry,
        1,
        Duration::from_millis(150),
        Arc::new(Stats::default()),
    );

    assert_eq!(orchestrator.assess(tuple()), Verdict::Accept);

    // the late result is drained at edict teardown, not leaked; give the
    // worker time to finish with its handle
    std::thread::sleep(Duration::from_secs(1));
    assert_eq!(slow.runs.load(Ordering::SeqCst), 1);
}

#[test]
fn informational_results_do_not_stall_termination() {
    // sends an informational result first, then the real one
    struct ChattyCheck;

    impl CheckRoutine for ChattyCheck {
        type Ctx = ();

        fn run(&self, _ctx: &mut (), edict: &Edict) {
            edict.send_result(CheckResult::suspicious("chatty", 1).informational());
            edict.send_result(CheckResult::undefined("chatty"));
        }
    }

    let mut registry = CheckRegistry::new();
    registry.register(
        ThreadPool::new("chatty", Arc::new(ChattyCheck), PoolLimits::new(1, 4)),
        false,
    );
    let orchestrator = orchestrator(registry, 1);

    // the informational contribution still counts as evidence
    assert_eq!(orchestrator.assess(tuple()), Verdict::Greylist);
}

#[test]
fn one_failing_pool_never_blocks_the_others() {
    // a check that never answers; the greylist verdict must still arrive
    struct NoAnswerCheck;

    impl CheckRoutine for NoAnswerCheck {
        type Ctx = ();

        fn run(&self, _ctx: &mut (), edict: &Edict) {
            // violates the contract on purpose: no result at all
            let _ = edict;
        }
    }

    let ring = Arc::new(BloomRing::new(4, 12));
    let mut registry = CheckRegistry::new();
    GreylistCheck::init(
        &mut registry,
        ring,
        UpdatePolicy::Grey,
        PoolLimits::new(1, 4),
    );
    registry.register(
        ThreadPool::new("mute", Arc::new(NoAnswerCheck), PoolLimits::new(1, 4)),
        false,
    );
    let orchestrator = Orchestrator::new(
        registry,
        1,
        Duration::from_millis(300),
        Arc::new(Stats::default()),
    );

    assert_eq!(orchestrator.assess(tuple()), Verdict::Greylist);
}
