//! DNS list checks: address block lists, address allow lists, and
//! right-hand-side (sender domain) block lists, all served by one routine.
//!
//! Each configured list carries a tolerance counter. A list that keeps
//! timing out stops being queried until the maintenance loop has
//! replenished its counter; the counters are racy on purpose, a
//! best-effort health signal rather than bookkeeping.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

use hickory_resolver::Resolver;
use hickory_resolver::error::ResolveErrorKind;
use tracing::{debug, error, info};

use crate::edict::Edict;
use crate::pool::{CheckRoutine, PoolLimits, ThreadPool};
use crate::registry::CheckRegistry;
use crate::stats::Stats;
use crate::types::CheckResult;

use super::{make_resolver, sender_domain};

/// Ceiling of every list's tolerance counter; one timeout burns one unit.
pub const ERROR_TOLERANCE: i32 = 5;

/// One configured DNS list.
#[derive(Debug)]
pub struct DnsList {
    zone: String,
    weight: u32,
    tolerance: AtomicI32,
}

impl DnsList {
    pub fn new(zone: impl Into<String>, weight: u32) -> Self {
        Self {
            zone: zone.into(),
            weight,
            tolerance: AtomicI32::new(ERROR_TOLERANCE),
        }
    }

    pub fn zone(&self) -> &str {
        &self.zone
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    /// Whether the list is currently healthy enough to query.
    fn query_clearance(&self) -> bool {
        self.tolerance.load(Ordering::Relaxed) > 0
    }

    /// Charge one timeout against the list.
    fn charge(&self) {
        self.tolerance.fetch_sub(1, Ordering::Relaxed);
    }

    /// Replenish one unit toward the ceiling. Load-then-store is racy with
    /// concurrent charges; close enough for a health gauge.
    pub fn tolerate(&self) {
        let current = self.tolerance.load(Ordering::Relaxed);
        if current < ERROR_TOLERANCE {
            info!(zone = %self.zone, "replenishing tolerance counter");
            self.tolerance.store(current + 1, Ordering::Relaxed);
        }
    }
}

/// Which flavor of list a pool serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnsListKind {
    /// Client address block list; a hit is suspicious.
    Block,
    /// Client address allow list; a hit passes.
    Allow,
    /// Sender-domain block list; a hit is suspicious.
    RightHandSide,
}

impl DnsListKind {
    pub fn check_name(self) -> &'static str {
        match self {
            DnsListKind::Block => "dnsbl",
            DnsListKind::Allow => "dnswl",
            DnsListKind::RightHandSide => "rhsbl",
        }
    }
}

pub struct DnsCheck {
    kind: DnsListKind,
    lists: Vec<Arc<DnsList>>,
    stats: Arc<Stats>,
}

/// Per-worker resolver channel, built on first use.
#[derive(Default)]
pub struct DnsCtx {
    resolver: Option<Resolver>,
}

impl DnsCheck {
    pub fn new(kind: DnsListKind, lists: Vec<Arc<DnsList>>, stats: Arc<Stats>) -> Self {
        Self { kind, lists, stats }
    }

    /// Build a pool over `zones` and register it (never definitive: list
    /// hits only weigh in, they do not short-circuit). Returns the list
    /// handles so the maintenance loop can replenish their counters.
    pub fn init(
        registry: &mut CheckRegistry,
        kind: DnsListKind,
        zones: &[String],
        stats: Arc<Stats>,
        limits: PoolLimits,
    ) -> Vec<Arc<DnsList>> {
        let lists: Vec<Arc<DnsList>> = zones
            .iter()
            .map(|zone| {
                info!(kind = kind.check_name(), zone = %zone, "adding dns list");
                Arc::new(DnsList::new(zone.clone(), 1))
            })
            .collect();
        let pool = ThreadPool::new(
            kind.check_name(),
            Arc::new(Self::new(kind, lists.clone(), stats)),
            limits,
        );
        registry.register(pool, false);
        lists
    }

    /// The label to look up under each zone, or `None` when the request
    /// does not carry one (no sender domain).
    fn query_label(&self, edict: &Edict) -> Option<String> {
        let request = edict.job();
        match self.kind {
            DnsListKind::Block | DnsListKind::Allow => {
                match reverse_inet_addr(&request.client_address) {
                    Ok(reversed) => Some(reversed),
                    Err(_) => {
                        error!(address = %request.client_address, "not a valid ip address");
                        None
                    }
                }
            }
            DnsListKind::RightHandSide => {
                sender_domain(&request.sender).map(str::to_string)
            }
        }
    }
}

impl CheckRoutine for DnsCheck {
    type Ctx = DnsCtx;

    fn run(&self, ctx: &mut DnsCtx, edict: &Edict) {
        let name = self.kind.check_name();

        let Some(label) = self.query_label(edict) else {
            edict.send_result(CheckResult::undefined(name));
            return;
        };

        let resolver = match &mut ctx.resolver {
            Some(resolver) => resolver,
            slot => match make_resolver() {
                Ok(resolver) => slot.insert(resolver),
                Err(e) => {
                    error!(error = %e, "resolver init failed");
                    edict.send_result(CheckResult::undefined(name));
                    return;
                }
            },
        };

        let mut matched: Option<&Arc<DnsList>> = None;
        for list in &self.lists {
            if edict.expired() {
                debug!(check = name, "deadline reached, abandoning remaining lists");
                break;
            }
            if !list.query_clearance() {
                debug!(zone = list.zone(), "skipping list due to timeouts");
                continue;
            }
            let query = format!("{}.{}.", label, list.zone());
            debug!(%query, "initiating dns list query");
            match resolver.ipv4_lookup(query.as_str()) {
                Ok(lookup) if lookup.iter().next().is_some() => {
                    debug!(zone = list.zone(), %label, "dns-match");
                    self.stats.record_match();
                    matched = Some(list);
                    break;
                }
                Ok(_) => {}
                Err(e) => match e.kind() {
                    ResolveErrorKind::NoRecordsFound { .. } => {}
                    ResolveErrorKind::Timeout => {
                        debug!(zone = list.zone(), %label, "dns-timeout");
                        list.charge();
                    }
                    _ => debug!(zone = list.zone(), error = %e, "dns query failed"),
                },
            }
        }

        let result = match matched {
            Some(_) if self.kind == DnsListKind::Allow => CheckResult::pass(name),
            Some(list) => CheckResult::suspicious(name, list.weight()),
            None => CheckResult::undefined(name),
        };
        edict.send_result(result);
    }
}

/// Reverse a dotted-quad address for a DNS list query, `1.2.3.4` →
/// `4.3.2.1`. Rejects anything that is not a well-formed IPv4 address.
pub fn reverse_inet_addr(ipstr: &str) -> Result<String, std::net::AddrParseError> {
    let addr: Ipv4Addr = ipstr.trim().parse()?;
    let [a, b, c, d] = addr.octets();
    Ok(format!("{d}.{c}.{b}.{a}"))
}
