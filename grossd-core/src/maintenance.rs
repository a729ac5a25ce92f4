//! Periodic maintenance and the bloom-manager consumer.
//!
//! The maintenance loop ticks once per second: it schedules ring rotations
//! onto the update queue (through the instant band, so a rotation never
//! waits out the queue's delay), replenishes DNS list tolerance counters,
//! and watches the shutdown flag. The bloom manager is the sole consumer
//! of the update queue; rotation and snapshotting happen only on its
//! thread.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant, SystemTime};

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::bloom::BloomRing;
use crate::checks::DnsList;
use crate::queue::{Fetched, MsgQueue};

/// Commands consumed by the bloom manager.
#[derive(Debug, PartialEq, Eq)]
pub enum UpdateCommand {
    /// Advance the ring, discarding the oldest window.
    Rotate,
    /// Write a snapshot without rotating.
    Snapshot,
    /// Snapshot and exit.
    Shutdown,
}

/// Delay of the update queue. Rotations bypass it via the instant band;
/// the delay exists so bulk update traffic can coalesce.
pub const UPDATE_QUEUE_DELAY: Duration = Duration::from_secs(10);

/// Maintenance loop cadence.
pub const MAINTENANCE_TICK: Duration = Duration::from_secs(1);

/// Tolerance counters replenish every this many ticks.
pub const TOLERANCE_REPLENISH_TICKS: u64 = 10;

/// The dedicated consumer of the update queue.
pub struct BloomManager {
    ring: Arc<BloomRing>,
    statefile: Option<PathBuf>,
    last_rotate: Arc<Mutex<Instant>>,
}

impl BloomManager {
    pub fn new(
        ring: Arc<BloomRing>,
        statefile: Option<PathBuf>,
        last_rotate: Arc<Mutex<Instant>>,
    ) -> Self {
        Self {
            ring,
            statefile,
            last_rotate,
        }
    }

    /// Consume update commands until shutdown. Run on its own thread.
    pub fn run(self, update_queue: Arc<MsgQueue<UpdateCommand>>) {
        debug!("bloom manager starting");
        loop {
            match update_queue.get_timed(None) {
                Fetched::Msg(UpdateCommand::Rotate) => {
                    self.ring.rotate();
                    *self.last_rotate.lock() = Instant::now();
                    info!(head = self.ring.head(), "bloom ring rotated");
                    self.snapshot();
                }
                Fetched::Msg(UpdateCommand::Snapshot) => self.snapshot(),
                Fetched::Msg(UpdateCommand::Shutdown) | Fetched::Shutdown => {
                    self.snapshot();
                    debug!("bloom manager exiting");
                    return;
                }
                Fetched::TimedOut => {}
            }
        }
    }

    fn snapshot(&self) {
        let Some(path) = &self.statefile else {
            return;
        };
        match self.ring.save(path, SystemTime::now()) {
            Ok(()) => debug!(path = %path.display(), "bloom ring snapshot written"),
            Err(e) => error!(path = %path.display(), error = %e, "snapshot failed"),
        }
    }
}

/// The once-per-second maintenance loop. Returns when the shutdown flag is
/// raised, after handing the bloom manager its shutdown command.
pub fn run_maintenance(
    shutdown: Arc<AtomicBool>,
    update_queue: Arc<MsgQueue<UpdateCommand>>,
    last_rotate: Arc<Mutex<Instant>>,
    rotate_interval: Duration,
    dns_lists: Vec<Arc<DnsList>>,
) {
    let mut tick = 0u64;
    while !shutdown.load(Ordering::SeqCst) {
        std::thread::sleep(MAINTENANCE_TICK);
        tick += 1;

        if last_rotate.lock().elapsed() > rotate_interval
            && let Err(e) = update_queue.instant(UpdateCommand::Rotate)
        {
            warn!(error = %e, "could not schedule ring rotation");
        }

        if tick % TOLERANCE_REPLENISH_TICKS == 0 {
            for list in &dns_lists {
                list.tolerate();
            }
        }
    }

    info!("shutdown requested, stopping maintenance");
    let _ = update_queue.instant(UpdateCommand::Shutdown);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn rotate_command_advances_the_ring() {
        let ring = Arc::new(BloomRing::new(4, 12));
        let last_rotate = Arc::new(Mutex::new(Instant::now()));
        let queue = MsgQueue::with_delay(UPDATE_QUEUE_DELAY);

        let manager = BloomManager::new(Arc::clone(&ring), None, Arc::clone(&last_rotate));
        let handle = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || manager.run(queue))
        };

        // instant band: the rotation must not wait out the 10 s delay
        queue.instant(UpdateCommand::Rotate).unwrap();
        queue.instant(UpdateCommand::Shutdown).unwrap();
        handle.join().unwrap();

        assert_eq!(ring.head(), 1);
    }

    #[test]
    fn shutdown_flag_stops_the_loop_and_notifies_the_manager() {
        let shutdown = Arc::new(AtomicBool::new(true));
        let queue: Arc<MsgQueue<UpdateCommand>> = MsgQueue::new();
        let last_rotate = Arc::new(Mutex::new(Instant::now()));

        run_maintenance(
            Arc::clone(&shutdown),
            Arc::clone(&queue),
            last_rotate,
            Duration::from_secs(3600),
            Vec::new(),
        );

        assert_eq!(
            queue.get_timed(Some(Duration::ZERO)),
            Fetched::Msg(UpdateCommand::Shutdown)
        );
    }
}
