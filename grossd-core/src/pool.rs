//! Elastic worker thread pools.
//!
//! One pool per check kind. Pools grow eagerly: the moment the last
//! idling worker picks up a job it spawns a replacement, so a producer
//! never finds the pool without an idle worker unless it is already at its
//! maximum. Shrinkage is lazy: a worker that has idled for
//! [`DEFAULT_IDLE_TIMEOUT`] exits only if its departure still leaves
//! another idle worker behind and the pool stays above its minimum.
//!
//! Per-thread scratch (a resolver channel, an SPF evaluator) lives in the
//! routine's associated `Ctx`; it is created when the worker starts and
//! torn down by `Drop` when the worker exits.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::edict::Edict;
use crate::queue::{Fetched, MsgQueue, QueueError};

/// How long a worker waits on the work queue before considering exit.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// A check routine run by pool workers.
pub trait CheckRoutine: Send + Sync + 'static {
    /// Per-worker scratch surviving across edicts on the same thread.
    /// Dropped when the worker exits.
    type Ctx: Default + Send;

    /// Process one edict. Must deliver exactly one non-informational
    /// [`crate::types::CheckResult`] via [`Edict::send_result`] and honour
    /// [`Edict::remaining`].
    fn run(&self, ctx: &mut Self::Ctx, edict: &Edict);
}

/// Worker population bounds for one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolLimits {
    pub min_threads: usize,
    pub max_threads: usize,
}

impl PoolLimits {
    pub fn new(min_threads: usize, max_threads: usize) -> Self {
        assert!(min_threads >= 1, "a pool needs at least one thread");
        assert!(max_threads >= min_threads, "max below min");
        Self {
            min_threads,
            max_threads,
        }
    }
}

impl Default for PoolLimits {
    fn default() -> Self {
        Self::new(1, 10)
    }
}

/// Live worker population of a pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolCounters {
    pub threads: usize,
    pub idle: usize,
}

struct PoolShared {
    name: String,
    queue: Arc<MsgQueue<Arc<Edict>>>,
    counters: Mutex<PoolCounters>,
    limits: PoolLimits,
    idle_timeout: Duration,
}

/// Handle to an elastic worker pool. Cheap to clone.
#[derive(Clone)]
pub struct ThreadPool {
    shared: Arc<PoolShared>,
}

impl ThreadPool {
    /// Create a pool and spawn its first worker.
    pub fn new<R: CheckRoutine>(
        name: impl Into<String>,
        routine: Arc<R>,
        limits: PoolLimits,
    ) -> Self {
        Self::with_idle_timeout(name, routine, limits, DEFAULT_IDLE_TIMEOUT)
    }

    /// Like [`ThreadPool::new`] with a custom idle timeout. Short timeouts
    /// make shrinkage observable without minute-long waits.
    pub fn with_idle_timeout<R: CheckRoutine>(
        name: impl Into<String>,
        routine: Arc<R>,
        limits: PoolLimits,
        idle_timeout: Duration,
    ) -> Self {
        let shared = Arc::new(PoolShared {
            name: name.into(),
            queue: MsgQueue::new(),
            counters: Mutex::new(PoolCounters::default()),
            limits,
            idle_timeout,
        });
        debug!(pool = %shared.name, "threadpool starting");
        spawn_worker(Arc::clone(&shared), routine);
        Self { shared }
    }

    /// Queue an edict for this pool; the submission holds its own edict
    /// handle until a worker finishes with it.
    pub fn submit(&self, edict: &Arc<Edict>) -> Result<(), QueueError> {
        self.shared.queue.put(Arc::clone(edict))
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn counters(&self) -> PoolCounters {
        *self.shared.counters.lock()
    }

    pub fn queued(&self) -> usize {
        self.shared.queue.len()
    }

    /// Stop accepting work and let workers exit once the queue drains.
    pub fn shut_down(&self) {
        self.shared.queue.shut_down();
    }
}

/// Register and start one worker. The thread is counted at the spawn
/// site so the "idle worker or at max" invariant holds without a
/// startup window.
fn spawn_worker<R: CheckRoutine>(shared: Arc<PoolShared>, routine: Arc<R>) {
    shared.counters.lock().threads += 1;
    spawn_registered(shared, routine);
}

fn spawn_registered<R: CheckRoutine>(shared: Arc<PoolShared>, routine: Arc<R>) {
    let name = format!("{}-worker", shared.name);
    std::thread::Builder::new()
        .name(name)
        .spawn(move || worker_loop(shared, routine))
        .unwrap_or_else(|e| {
            // resource exhaustion is fatal by design
            panic!("threadpool: spawning worker thread: {e}")
        });
}

fn worker_loop<R: CheckRoutine>(shared: Arc<PoolShared>, routine: Arc<R>) {
    let mut ctx = R::Ctx::default();

    loop {
        shared.counters.lock().idle += 1;

        match shared.queue.get_timed(Some(shared.idle_timeout)) {
            Fetched::Msg(edict) => {
                {
                    let mut counters = shared.counters.lock();
                    counters.idle -= 1;
                    if counters.idle == 0 && counters.threads < shared.limits.max_threads {
                        // we were the last idling worker; start another so
                        // producers always find one ready
                        debug!(pool = %shared.name, "starting another worker");
                        counters.threads += 1;
                        spawn_registered(Arc::clone(&shared), Arc::clone(&routine));
                    }
                }
                routine.run(&mut ctx, &edict);
                drop(edict);
            }
            Fetched::TimedOut => {
                let mut counters = shared.counters.lock();
                counters.idle -= 1;
                if counters.threads > shared.limits.min_threads && counters.idle >= 1 {
                    counters.threads -= 1;
                    drop(counters);
                    debug!(pool = %shared.name, "idle worker shutting down");
                    return;
                }
                // stay: either at the minimum or the only idler left
            }
            Fetched::Shutdown => {
                let mut counters = shared.counters.lock();
                counters.idle -= 1;
                counters.threads -= 1;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CheckResult, GreyTuple};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    struct CountingCheck {
        runs: AtomicUsize,
        hold: Duration,
    }

    impl CheckRoutine for CountingCheck {
        type Ctx = ();

        fn run(&self, _ctx: &mut (), edict: &Edict) {
            self.runs.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.hold);
            edict.send_result(CheckResult::undefined("counting"));
        }
    }

    fn tuple() -> GreyTuple {
        GreyTuple::new("10.0.0.1", "a@x", "b@y")
    }

    fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if done() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        done()
    }

    #[test]
    fn initial_worker_processes_submissions() {
        let routine = Arc::new(CountingCheck {
            runs: AtomicUsize::new(0),
            hold: Duration::ZERO,
        });
        let pool = ThreadPool::new("counting", Arc::clone(&routine), PoolLimits::new(1, 4));
        let edict = Edict::new(tuple(), Duration::from_secs(1));
        pool.submit(&edict).unwrap();
        assert!(wait_until(Duration::from_secs(2), || {
            routine.runs.load(Ordering::SeqCst) == 1
        }));
    }

    #[test]
    fn pool_keeps_an_idle_worker_or_is_at_max() {
        let routine = Arc::new(CountingCheck {
            runs: AtomicUsize::new(0),
            hold: Duration::from_millis(100),
        });
        let pool = ThreadPool::new("liveness", Arc::clone(&routine), PoolLimits::new(1, 4));
        for _ in 0..8 {
            let edict = Edict::new(tuple(), Duration::from_secs(2));
            pool.submit(&edict).unwrap();
        }
        assert!(wait_until(Duration::from_secs(5), || {
            routine.runs.load(Ordering::SeqCst) == 8
        }));
        let counters = pool.counters();
        assert!(
            counters.idle >= 1 || counters.threads >= 4,
            "liveness invariant violated: {counters:?}"
        );
    }

    #[test]
    fn idle_pool_shrinks_back_to_minimum() {
        let routine = Arc::new(CountingCheck {
            runs: AtomicUsize::new(0),
            hold: Duration::from_millis(50),
        });
        let pool = ThreadPool::with_idle_timeout(
            "shrink",
            Arc::clone(&routine),
            PoolLimits::new(1, 8),
            Duration::from_millis(100),
        );
        for _ in 0..16 {
            let edict = Edict::new(tuple(), Duration::from_secs(2));
            pool.submit(&edict).unwrap();
        }
        assert!(wait_until(Duration::from_secs(5), || {
            routine.runs.load(Ordering::SeqCst) == 16
        }));
        let grown = pool.counters().threads;
        assert!(grown > 1, "pool should have grown under load, got {grown}");
        assert!(
            wait_until(Duration::from_secs(5), || pool.counters().threads == 1),
            "pool should shrink to its minimum, got {:?}",
            pool.counters()
        );
    }

    #[test]
    fn shutdown_retires_all_workers() {
        let routine = Arc::new(CountingCheck {
            runs: AtomicUsize::new(0),
            hold: Duration::ZERO,
        });
        let pool = ThreadPool::new("retire", routine, PoolLimits::new(1, 4));
        pool.shut_down();
        assert!(
            wait_until(Duration::from_secs(2), || pool.counters().threads == 0),
            "workers should exit on shutdown, got {:?}",
            pool.counters()
        );
    }
}
