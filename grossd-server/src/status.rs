//! Status server: each connection receives one JSON document with uptime,
//! delivery counters, and per-pool worker populations, then is closed.

use std::io::{ErrorKind, Write};
use std::net::TcpListener;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use grossd_core::orchestrator::Orchestrator;
use grossd_core::stats::StatsSnapshot;

const ACCEPT_POLL: Duration = Duration::from_millis(250);

#[derive(Serialize)]
struct StatusReport {
    version: &'static str,
    uptime_secs: u64,
    stats: StatsSnapshot,
    pools: Vec<PoolStatus>,
}

#[derive(Serialize)]
struct PoolStatus {
    name: String,
    threads: usize,
    idle: usize,
}

fn report(orchestrator: &Orchestrator, started: Instant) -> StatusReport {
    StatusReport {
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: started.elapsed().as_secs(),
        stats: orchestrator.stats().snapshot(),
        pools: orchestrator
            .registry()
            .pool_counters()
            .into_iter()
            .map(|(name, counters)| PoolStatus {
                name,
                threads: counters.threads,
                idle: counters.idle,
            })
            .collect(),
    }
}

/// Serve status requests until the shutdown flag is raised.
pub fn run_status_server(
    listener: TcpListener,
    orchestrator: Arc<Orchestrator>,
    started: Instant,
    shutdown: Arc<AtomicBool>,
) {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "status server listening");
    }
    if let Err(e) = listener.set_nonblocking(true) {
        error!(error = %e, "status listener setup failed");
        return;
    }

    while !shutdown.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((mut stream, peer)) => {
                debug!(%peer, "status connection");
                let payload = match serde_json::to_string_pretty(&report(&orchestrator, started)) {
                    Ok(json) => json,
                    Err(e) => {
                        error!(error = %e, "status serialization failed");
                        continue;
                    }
                };
                let _ = stream.set_nonblocking(false);
                if let Err(e) = writeln!(stream, "{payload}") {
                    debug!(%peer, error = %e, "status write failed");
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL);
            }
            Err(e) => {
                warn!(error = %e, "status accept failed");
                std::thread::sleep(ACCEPT_POLL);
            }
        }
    }
    debug!("status server exiting");
}
