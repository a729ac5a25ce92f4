//! Blocking typed message queues.
//!
//! Every cross-thread hand-off in the engine goes through a [`MsgQueue`]:
//! pool work queues carry edicts, edict result queues carry check results,
//! and the bloom manager's update queue carries ring commands. A queue is a
//! plain FIFO, or a delay queue whose messages stay invisible until their
//! schedule elapses; [`MsgQueue::instant`] bypasses the schedule through a
//! priority band that is itself FIFO.
//!
//! Handles are `Arc<MsgQueue<T>>`; a queue lives as long as anyone holds
//! one. [`MsgQueue::release`] refuses to tear a queue down while messages
//! remain, so owners drain first and retry.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

/// Errors from queue submission and teardown.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    /// The queue has been shut down or released; no new messages.
    #[error("queue is closed")]
    Closed,
    /// `release` was called while messages remain; drain and retry.
    #[error("queue is not empty")]
    NotEmpty,
}

/// Outcome of a timed fetch.
#[derive(Debug, PartialEq, Eq)]
pub enum Fetched<T> {
    /// A message became visible within the timeout.
    Msg(T),
    /// The timeout elapsed with nothing visible.
    TimedOut,
    /// The queue was shut down and nothing is left to deliver.
    Shutdown,
}

struct Inner<T> {
    /// Schedule-bypassing band; always delivered first, FIFO among itself.
    instant: VecDeque<T>,
    /// Scheduled band; each message visible from its `Instant` on. FIFO is
    /// preserved because every message of one queue carries the same delay.
    scheduled: VecDeque<(Instant, T)>,
    open: bool,
}

/// A bounded-latency, optionally delay-scheduled FIFO queue.
pub struct MsgQueue<T> {
    inner: Mutex<Inner<T>>,
    cond: Condvar,
    delay: Duration,
}

impl<T> MsgQueue<T> {
    /// A plain FIFO queue; messages are visible immediately.
    pub fn new() -> Arc<Self> {
        Self::with_delay(Duration::ZERO)
    }

    /// A delay queue: a message submitted with [`MsgQueue::put`] becomes
    /// visible `delay` after submission.
    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                instant: VecDeque::new(),
                scheduled: VecDeque::new(),
                open: true,
            }),
            cond: Condvar::new(),
            delay,
        })
    }

    /// Non-blocking append; fails only after shutdown.
    pub fn put(&self, msg: T) -> Result<(), QueueError> {
        let mut inner = self.inner.lock();
        if !inner.open {
            return Err(QueueError::Closed);
        }
        inner.scheduled.push_back((Instant::now() + self.delay, msg));
        drop(inner);
        self.cond.notify_one();
        Ok(())
    }

    /// Append bypassing the delay schedule; delivered before any scheduled
    /// message, FIFO among other bypassed messages.
    pub fn instant(&self, msg: T) -> Result<(), QueueError> {
        let mut inner = self.inner.lock();
        if !inner.open {
            return Err(QueueError::Closed);
        }
        inner.instant.push_back(msg);
        drop(inner);
        self.cond.notify_one();
        Ok(())
    }

    /// Block until a message becomes visible, the timeout elapses, or the
    /// queue shuts down.
    ///
    /// `None` blocks forever; `Some(Duration::ZERO)` polls.
    pub fn get_timed(&self, timeout: Option<Duration>) -> Fetched<T> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut inner = self.inner.lock();

        loop {
            if let Some(msg) = inner.instant.pop_front() {
                return Fetched::Msg(msg);
            }
            let now = Instant::now();
            let front_due = inner
                .scheduled
                .front()
                .is_some_and(|(due, _)| *due <= now);
            if front_due && let Some((_, msg)) = inner.scheduled.pop_front() {
                return Fetched::Msg(msg);
            }
            if !inner.open {
                return Fetched::Shutdown;
            }
            if let Some(d) = deadline
                && now >= d
            {
                return Fetched::TimedOut;
            }

            // Sleep until the earlier of the caller's deadline and the next
            // scheduled message, then re-check.
            let next_due = inner.scheduled.front().map(|(due, _)| *due);
            let wake = match (deadline, next_due) {
                (Some(d), Some(due)) => Some(d.min(due)),
                (Some(d), None) => Some(d),
                (None, Some(due)) => Some(due),
                (None, None) => None,
            };
            match wake {
                Some(at) => {
                    self.cond.wait_until(&mut inner, at);
                }
                None => self.cond.wait(&mut inner),
            }
        }
    }

    /// Stop accepting new messages and wake all blocked consumers. Messages
    /// already visible are still delivered; consumers see
    /// [`Fetched::Shutdown`] once nothing visible remains.
    pub fn shut_down(&self) {
        let mut inner = self.inner.lock();
        inner.open = false;
        drop(inner);
        self.cond.notify_all();
    }

    /// Tear the queue down. Fails with [`QueueError::NotEmpty`] while any
    /// message (visible or scheduled) remains; callers drain, then retry.
    pub fn release(&self) -> Result<(), QueueError> {
        let mut inner = self.inner.lock();
        if !inner.instant.is_empty() || !inner.scheduled.is_empty() {
            return Err(QueueError::NotEmpty);
        }
        inner.open = false;
        drop(inner);
        self.cond.notify_all();
        Ok(())
    }

    /// Number of queued messages, visible or not.
    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        inner.instant.len() + inner.scheduled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
