//! Elasticity envelope: a pool under sustained load grows toward its
//! ceiling, serves everything promptly, and shrinks back once quiet.
//!
//! Idle timeouts are shortened so shrinkage is observable without
//! minute-long waits; the production default stays at 60 s.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use grossd_core::edict::Edict;
use grossd_core::pool::{CheckRoutine, PoolLimits, ThreadPool};
use grossd_core::types::{CheckResult, GreyTuple};

struct SleepyCheck {
    completed: AtomicUsize,
}

impl CheckRoutine for SleepyCheck {
    type Ctx = ();

    fn run(&self, _ctx: &mut (), edict: &Edict) {
        std::thread::sleep(Duration::from_millis(100));
        edict.send_result(CheckResult::undefined("sleepy"));
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
}

fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    done()
}

#[test]
fn pool_grows_under_load_and_returns_to_minimum() {
    let routine = Arc::new(SleepyCheck {
        completed: AtomicUsize::new(0),
    });
    let pool = ThreadPool::with_idle_timeout(
        "elastic",
        Arc::clone(&routine),
        PoolLimits::new(1, 8),
        Duration::from_millis(200),
    );

    const JOBS: usize = 200;
    let clock = Instant::now();
    let mut edicts = Vec::with_capacity(JOBS);
    for i in 0..JOBS {
        let edict = Edict::new(
            GreyTuple::new(format!("10.0.{}.{}", i / 256, i % 256), "a@x", "b@y"),
            Duration::from_secs(5),
        );
        pool.submit(&edict).unwrap();
        edicts.push(edict);
    }

    // liveness during the burst: an idle worker is ready, or the pool has
    // hit its ceiling
    std::thread::sleep(Duration::from_millis(300));
    let counters = pool.counters();
    assert!(
        counters.idle >= 1 || counters.threads >= 8,
        "mid-burst liveness violated: {counters:?}"
    );

    assert!(
        wait_until(Duration::from_secs(10), || {
            routine.completed.load(Ordering::SeqCst) == JOBS
        }),
        "only {} of {JOBS} jobs completed",
        routine.completed.load(Ordering::SeqCst)
    );
    // 200 jobs of 100 ms across up to 8 workers: comfortably under 5 s
    assert!(
        clock.elapsed() < Duration::from_secs(5),
        "burst took {:?}",
        clock.elapsed()
    );

    let peak = pool.counters().threads;
    assert!(peak >= 2, "pool never grew, peak {peak}");

    // quiescence: converge back to the configured minimum
    assert!(
        wait_until(Duration::from_secs(5), || pool.counters().threads == 1),
        "pool did not shrink after idling: {:?}",
        pool.counters()
    );
    // and the surviving worker goes back to waiting for work
    assert!(
        wait_until(Duration::from_secs(1), || pool.counters().idle >= 1),
        "last worker never reported idle: {:?}",
        pool.counters()
    );
}

#[test]
fn every_submission_is_eventually_served() {
    let routine = Arc::new(SleepyCheck {
        completed: AtomicUsize::new(0),
    });
    let pool = ThreadPool::new("drain", Arc::clone(&routine), PoolLimits::new(1, 4));

    let mut edicts = Vec::new();
    for _ in 0..32 {
        let edict = Edict::new(GreyTuple::new("10.0.0.1", "a@x", "b@y"), Duration::from_secs(5));
        pool.submit(&edict).unwrap();
        edicts.push(edict);
    }

    assert!(wait_until(Duration::from_secs(10), || {
        routine.completed.load(Ordering::SeqCst) == 32 && pool.queued() == 0
    }));

    // every edict got its one result; the handles we kept let us read them
    for edict in &edicts {
        match edict.recv_result(Some(Duration::from_secs(1))) {
            grossd_core::queue::Fetched::Msg(result) => {
                assert_eq!(result.checker, "sleepy");
            }
            other => panic!("missing result: {other:?}"),
        }
    }
}
