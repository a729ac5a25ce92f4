//! # grossd
//!
//! Greylisting of suspicious sources: a policy daemon for MTAs.
//!
//! ## Overview
//!
//! grossd answers Postfix policy delegation requests with `dunno`,
//! `defer_if_permit`, or `reject`, based on a set of concurrent reputation
//! checks:
//!
//! - **Greylisting**: first sighting of a (client, sender, recipient)
//!   triplet is deferred; retries pass. Sightings live in a rotating
//!   Bloom-filter ring, so memory use is fixed no matter the traffic.
//! - **DNS lists**: client address block/allow lists and sender-domain
//!   block lists, each with self-healing timeout tolerance.
//! - **SPF**: a hard policy failure rejects outright.
//!
//! ## Architecture
//!
//! Each check kind runs on its own elastic thread pool (grossd-core); the
//! maintenance loop on the main thread schedules ring rotations and
//! tolerance replenishment; a bloom-manager thread owns rotation and
//! snapshot persistence; TCP front-ends serve the MTA and a JSON status
//! endpoint.

mod policy;
mod status;

use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::{Instant, UNIX_EPOCH};

use anyhow::Context;
use clap::Parser;
use parking_lot::Mutex;
use signal_hook::consts::{SIGINT, SIGTERM};
use tracing::{debug, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use grossd_config::{GrossConfig, load_config};
use grossd_core::bloom::BloomRing;
use grossd_core::checks::{DnsCheck, DnsList, DnsListKind, GreylistCheck, SpfCheck};
use grossd_core::maintenance::{
    BloomManager, UPDATE_QUEUE_DELAY, UpdateCommand, run_maintenance,
};
use grossd_core::orchestrator::Orchestrator;
use grossd_core::pool::PoolLimits;
use grossd_core::queue::MsgQueue;
use grossd_core::registry::CheckRegistry;
use grossd_core::stats::Stats;

const DEFAULT_CONFIG_PATH: &str = "/etc/grossd.conf";

/// Command line arguments for the grossd daemon
#[derive(Parser, Debug)]
#[command(name = "grossd")]
#[command(version)]
#[command(about = "Greylisting of suspicious sources - policy daemon for MTAs")]
struct Args {
    /// Run grossd as a foreground process (compatibility flag; grossd
    /// always runs in the foreground)
    #[arg(short = 'd')]
    foreground: bool,

    /// Disable peer replication
    #[arg(short = 'r')]
    no_replicate: bool,

    /// Override the default config file
    #[arg(short = 'f', value_name = "FILE")]
    config: Option<PathBuf>,
}

fn parse_args() -> Args {
    use clap::error::ErrorKind;
    match Args::try_parse() {
        Ok(args) => args,
        Err(err)
            if matches!(
                err.kind(),
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion
            ) =>
        {
            let _ = err.print();
            std::process::exit(0);
        }
        Err(err) => {
            // unknown or malformed flags: usage banner, exit 1
            let _ = err.print();
            std::process::exit(1);
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = parse_args();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "grossd=info,grossd_core=info,grossd_config=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if args.foreground {
        debug!("foreground requested; grossd always runs in the foreground");
    }

    let config_path = args
        .config
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = if config_path.exists() {
        load_config(&config_path)
            .with_context(|| format!("loading config {}", config_path.display()))?
    } else {
        warn!(path = %config_path.display(), "config file not found, using defaults");
        GrossConfig::default()
    };

    let replicate = config.replication_configured() && !args.no_replicate;
    if replicate {
        // peer synchronization is handled by the sync front-end, which this
        // build does not carry; make that visible at startup
        warn!("peer replication is configured but not available in this build");
    } else {
        info!("replication disabled");
    }

    // one-shot graceful shutdown: first signal raises the flag, a second
    // one falls through to the default disposition
    let shutdown = Arc::new(AtomicBool::new(false));
    for signal in [SIGTERM, SIGINT] {
        signal_hook::flag::register_conditional_default(signal, Arc::clone(&shutdown))
            .context("installing signal handler")?;
        signal_hook::flag::register(signal, Arc::clone(&shutdown))
            .context("installing signal handler")?;
    }

    let stats = Arc::new(Stats::default());
    let ring = Arc::new(open_ring(&config));

    let limits = PoolLimits::new(1, config.max_threads);
    let mut registry = CheckRegistry::new();
    let mut dns_lists: Vec<Arc<DnsList>> = Vec::new();

    GreylistCheck::init(&mut registry, Arc::clone(&ring), config.update, limits);
    for (kind, zones) in [
        (DnsListKind::Block, &config.dnsbl),
        (DnsListKind::Allow, &config.dnswl),
        (DnsListKind::RightHandSide, &config.rhsbl),
    ] {
        if !zones.is_empty() {
            dns_lists.extend(DnsCheck::init(
                &mut registry,
                kind,
                zones,
                Arc::clone(&stats),
                limits,
            ));
        }
    }
    if config.spf {
        SpfCheck::init(&mut registry, limits);
    }
    info!(checks = registry.len(), "check registry initialized");

    let orchestrator = Arc::new(Orchestrator::new(
        registry,
        config.grey_threshold,
        config.query_timelimit,
        Arc::clone(&stats),
    ));

    // bloom manager: sole consumer of the update queue
    let last_rotate = Arc::new(Mutex::new(Instant::now()));
    let update_queue: Arc<MsgQueue<UpdateCommand>> = MsgQueue::with_delay(UPDATE_QUEUE_DELAY);
    let bloommgr = {
        let manager = BloomManager::new(
            Arc::clone(&ring),
            config.statefile.clone(),
            Arc::clone(&last_rotate),
        );
        let queue = Arc::clone(&update_queue);
        std::thread::Builder::new()
            .name("bloommgr".to_string())
            .spawn(move || manager.run(queue))
            .context("spawning bloom manager")?
    };

    let started = Instant::now();

    // MTA-facing policy front-end
    let policy_listener = TcpListener::bind((config.host.as_str(), config.port))
        .with_context(|| format!("binding policy listener {}:{}", config.host, config.port))?;
    {
        let orchestrator = Arc::clone(&orchestrator);
        let shutdown = Arc::clone(&shutdown);
        std::thread::Builder::new()
            .name("worker".to_string())
            .spawn(move || policy::run_policy_server(policy_listener, orchestrator, shutdown))
            .context("spawning policy server")?;
    }

    // status endpoint
    let status_listener = TcpListener::bind((config.status_host.as_str(), config.status_port))
        .with_context(|| {
            format!(
                "binding status listener {}:{}",
                config.status_host, config.status_port
            )
        })?;
    {
        let orchestrator = Arc::clone(&orchestrator);
        let shutdown = Arc::clone(&shutdown);
        std::thread::Builder::new()
            .name("srvstatus".to_string())
            .spawn(move || {
                status::run_status_server(status_listener, orchestrator, started, shutdown)
            })
            .context("spawning status server")?;
    }

    info!(version = env!("CARGO_PKG_VERSION"), "grossd started");

    // periodic maintenance on the main thread; returns on shutdown
    run_maintenance(
        Arc::clone(&shutdown),
        Arc::clone(&update_queue),
        last_rotate,
        config.rotate_interval,
        dns_lists,
    );

    // drain: stop the pools, let the bloom manager write its last snapshot
    orchestrator.registry().shut_down();
    if bloommgr.join().is_err() {
        warn!("bloom manager exited abnormally");
    }
    info!("grossd stopped");
    Ok(())
}

/// Open the Bloom ring, restoring the statefile snapshot when present and
/// compatible.
fn open_ring(config: &GrossConfig) -> BloomRing {
    let num_bufs = config.number_buffers as usize;
    let Some(path) = &config.statefile else {
        return BloomRing::new(num_bufs, config.filter_bits);
    };
    if !path.exists() {
        info!(path = %path.display(), "no snapshot yet, starting with an empty ring");
        return BloomRing::new(num_bufs, config.filter_bits);
    }
    match BloomRing::load(path, num_bufs, config.filter_bits) {
        Ok((ring, rotated_at)) => {
            let stamp = rotated_at
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            info!(
                path = %path.display(),
                last_rotation_unix = stamp,
                "bloom ring restored from snapshot"
            );
            ring
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "discarding snapshot");
            BloomRing::new(num_bufs, config.filter_bits)
        }
    }
}
