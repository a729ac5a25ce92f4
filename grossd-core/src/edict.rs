//! The edict: a shared-ownership job envelope.
//!
//! The orchestrator wraps each request in one `Arc<Edict>` and hands a
//! clone to every check pool. Workers drop their handle when the routine
//! returns; the terminal drop drains whatever late results are still
//! sitting in the result queue and releases it, so results are never
//! leaked no matter how the deadline played out.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::queue::{Fetched, MsgQueue};
use crate::types::{CheckResult, GreyTuple};

/// A job envelope carrying one request through every registered check.
pub struct Edict {
    job: GreyTuple,
    submitted: Instant,
    timelimit: Duration,
    results: Option<Arc<MsgQueue<CheckResult>>>,
}

impl Edict {
    /// An edict whose results will be collected.
    pub fn new(job: GreyTuple, timelimit: Duration) -> Arc<Self> {
        Arc::new(Self {
            job,
            submitted: Instant::now(),
            timelimit,
            results: Some(MsgQueue::new()),
        })
    }

    /// A fire-and-forget edict: checks run, results go nowhere.
    pub fn fire_and_forget(job: GreyTuple, timelimit: Duration) -> Arc<Self> {
        Arc::new(Self {
            job,
            submitted: Instant::now(),
            timelimit,
            results: None,
        })
    }

    pub fn job(&self) -> &GreyTuple {
        &self.job
    }

    pub fn timelimit(&self) -> Duration {
        self.timelimit
    }

    /// Time left until the request deadline; zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.timelimit.saturating_sub(self.submitted.elapsed())
    }

    pub fn expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Deliver a check's verdict. Silently dropped for fire-and-forget
    /// edicts, and for late results after the consumer stopped reading;
    /// those are drained at teardown.
    pub fn send_result(&self, result: CheckResult) {
        if let Some(queue) = &self.results {
            // Err(Closed) can only happen past teardown begin; late results
            // are discarded either way.
            let _ = queue.put(result);
        }
    }

    /// Fetch the next result, waiting up to `timeout`. Fire-and-forget
    /// edicts have no result queue and always report `Shutdown`.
    pub fn recv_result(&self, timeout: Option<Duration>) -> Fetched<CheckResult> {
        match &self.results {
            Some(queue) => queue.get_timed(timeout),
            None => Fetched::Shutdown,
        }
    }
}

impl Drop for Edict {
    fn drop(&mut self) {
        // Runs exactly once, when the last handle (orchestrator or worker)
        // goes away. Pending results are drained so the queue can release.
        let Some(queue) = self.results.take() else {
            return;
        };
        queue.shut_down();
        let mut drained = 0usize;
        while let Fetched::Msg(_) = queue.get_timed(Some(Duration::ZERO)) {
            drained += 1;
        }
        if drained > 0 {
            debug!(drained, "discarded late check results at edict teardown");
        }
        // puts fail after shut_down, so the drained queue stays empty
        let _ = queue.release();
    }
}
