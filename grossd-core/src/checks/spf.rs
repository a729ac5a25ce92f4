//! The SPF check: evaluates the sender policy for (client IP, HELO,
//! envelope sender) and maps the outcome onto the engine's judgment
//! scale. Registered definitive: a hard SPF failure blocks delivery
//! without waiting for the other checks.
//!
//! The evaluator covers the record subset the judgment mapping needs
//! (`ip4`, `a`, `mx`, `include`, `redirect`, `all` with qualifiers);
//! mechanisms outside that subset simply never match, which degrades to
//! an undefined judgment rather than a wrong one.

use std::net::Ipv4Addr;
use std::sync::Arc;

use hickory_resolver::Resolver;
use hickory_resolver::error::ResolveErrorKind;
use tracing::{debug, error};

use crate::edict::Edict;
use crate::pool::{CheckRoutine, PoolLimits, ThreadPool};
use crate::registry::CheckRegistry;
use crate::types::CheckResult;

use super::{make_resolver, sender_domain};

pub const CHECK_NAME: &str = "spf";

/// Suspicion weight of a softfail.
pub const SOFTFAIL_WEIGHT: u32 = 1;

/// RFC 7208 caps: DNS-querying mechanisms per evaluation, and recursion
/// through include/redirect.
const MAX_DNS_MECHANISMS: u32 = 10;
const MAX_RECURSION: u32 = 10;

/// Result of evaluating a sender policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpfOutcome {
    Pass,
    Fail,
    SoftFail,
    Neutral,
    /// No SPF record published.
    None,
    TempError,
    PermError,
}

pub struct SpfCheck;

/// Per-worker resolver channel, built on first use.
#[derive(Default)]
pub struct SpfCtx {
    resolver: Option<Resolver>,
}

impl SpfCheck {
    /// Build the SPF pool and register it as a definitive check.
    pub fn init(registry: &mut CheckRegistry, limits: PoolLimits) {
        let pool = ThreadPool::new(CHECK_NAME, Arc::new(SpfCheck), limits);
        registry.register(pool, true);
    }
}

impl CheckRoutine for SpfCheck {
    type Ctx = SpfCtx;

    fn run(&self, ctx: &mut SpfCtx, edict: &Edict) {
        let request = edict.job();

        let ip: Ipv4Addr = match request.client_address.trim().parse() {
            Ok(ip) => ip,
            Err(_) => {
                error!(address = %request.client_address, "invalid ip address");
                edict.send_result(CheckResult::undefined(CHECK_NAME));
                return;
            }
        };

        // the envelope sender's domain is authoritative; fall back to the
        // HELO name for bounce addresses
        let domain = sender_domain(&request.sender)
            .map(str::to_string)
            .or_else(|| request.helo_name.clone());
        let Some(domain) = domain else {
            debug!("no sender domain and no helo, skipping spf");
            edict.send_result(CheckResult::undefined(CHECK_NAME));
            return;
        };

        let resolver = match &mut ctx.resolver {
            Some(resolver) => resolver,
            slot => match make_resolver() {
                Ok(resolver) => slot.insert(resolver),
                Err(e) => {
                    error!(error = %e, "resolver init failed");
                    edict.send_result(CheckResult::undefined(CHECK_NAME));
                    return;
                }
            },
        };

        let mut lookups = 0u32;
        let outcome = evaluate(resolver, ip, &domain, edict, 0, &mut lookups);
        debug!(%domain, ?outcome, "spf evaluated");
        edict.send_result(outcome_to_result(outcome));
    }
}

/// Only a failing policy carries evidence toward the combined judgment.
fn outcome_to_result(outcome: SpfOutcome) -> CheckResult {
    match outcome {
        SpfOutcome::Fail => CheckResult::block(CHECK_NAME, "SPF policy violation"),
        SpfOutcome::SoftFail => CheckResult::suspicious(CHECK_NAME, SOFTFAIL_WEIGHT),
        _ => CheckResult::undefined(CHECK_NAME),
    }
}

fn evaluate(
    resolver: &Resolver,
    ip: Ipv4Addr,
    domain: &str,
    edict: &Edict,
    depth: u32,
    lookups: &mut u32,
) -> SpfOutcome {
    if depth > MAX_RECURSION {
        return SpfOutcome::PermError;
    }
    if edict.expired() {
        return SpfOutcome::TempError;
    }

    let text = match fetch_record(resolver, domain) {
        Ok(Some(text)) => text,
        Ok(None) => return SpfOutcome::None,
        Err(outcome) => return outcome,
    };
    let Some(record) = parse_record(&text) else {
        return SpfOutcome::None;
    };

    for directive in &record.directives {
        if edict.expired() {
            return SpfOutcome::TempError;
        }
        let matched = match &directive.mechanism {
            Mechanism::All => true,
            Mechanism::Ip4 { network, prefix } => ip_in(ip, *network, *prefix),
            Mechanism::A { domain: target, prefix } => {
                if exceeded(lookups) {
                    return SpfOutcome::PermError;
                }
                a_matches(resolver, target.as_deref().unwrap_or(domain), ip, *prefix)
            }
            Mechanism::Mx { domain: target, prefix } => {
                if exceeded(lookups) {
                    return SpfOutcome::PermError;
                }
                mx_matches(resolver, target.as_deref().unwrap_or(domain), ip, *prefix)
            }
            Mechanism::Include(target) => {
                if exceeded(lookups) {
                    return SpfOutcome::PermError;
                }
                match evaluate(resolver, ip, target, edict, depth + 1, lookups) {
                    SpfOutcome::Pass => true,
                    SpfOutcome::TempError => return SpfOutcome::TempError,
                    SpfOutcome::PermError => return SpfOutcome::PermError,
                    _ => false,
                }
            }
            Mechanism::Unsupported => false,
        };
        if matched {
            return directive.qualifier.outcome();
        }
    }

    if let Some(redirect) = &record.redirect {
        if exceeded(lookups) {
            return SpfOutcome::PermError;
        }
        return evaluate(resolver, ip, redirect, edict, depth + 1, lookups);
    }

    SpfOutcome::Neutral
}

fn exceeded(lookups: &mut u32) -> bool {
    *lookups += 1;
    *lookups > MAX_DNS_MECHANISMS
}

/// Find the `v=spf1` TXT record of a domain.
fn fetch_record(resolver: &Resolver, domain: &str) -> Result<Option<String>, SpfOutcome> {
    let query = format!("{}.", domain.trim_end_matches('.'));
    let lookup = match resolver.txt_lookup(query.as_str()) {
        Ok(lookup) => lookup,
        Err(e) => {
            return match e.kind() {
                ResolveErrorKind::NoRecordsFound { .. } => Ok(None),
                ResolveErrorKind::Timeout => Err(SpfOutcome::TempError),
                _ => {
                    debug!(%domain, error = %e, "txt lookup failed");
                    Err(SpfOutcome::TempError)
                }
            };
        }
    };

    for txt in lookup.iter() {
        // a TXT record's character strings are concatenated without
        // separators before interpretation
        let mut joined = String::new();
        for part in txt.txt_data() {
            joined.push_str(&String::from_utf8_lossy(part));
        }
        if joined == "v=spf1" || joined.starts_with("v=spf1 ") {
            return Ok(Some(joined));
        }
    }
    Ok(None)
}

fn a_matches(resolver: &Resolver, domain: &str, ip: Ipv4Addr, prefix: u8) -> bool {
    let query = format!("{}.", domain.trim_end_matches('.'));
    match resolver.ipv4_lookup(query.as_str()) {
        Ok(lookup) => lookup.iter().any(|a| ip_in(ip, a.0, prefix)),
        Err(e) => {
            debug!(%domain, error = %e, "a lookup failed");
            false
        }
    }
}

fn mx_matches(resolver: &Resolver, domain: &str, ip: Ipv4Addr, prefix: u8) -> bool {
    let query = format!("{}.", domain.trim_end_matches('.'));
    let exchanges = match resolver.mx_lookup(query.as_str()) {
        Ok(lookup) => lookup,
        Err(e) => {
            debug!(%domain, error = %e, "mx lookup failed");
            return false;
        }
    };
    exchanges
        .iter()
        .take(10)
        .any(|mx| a_matches(resolver, &mx.exchange().to_utf8(), ip, prefix))
}

fn ip_in(ip: Ipv4Addr, network: Ipv4Addr, prefix: u8) -> bool {
    if prefix == 0 {
        return true;
    }
    if prefix > 32 {
        return false;
    }
    let shift = 32 - u32::from(prefix);
    (u32::from(ip) >> shift) == (u32::from(network) >> shift)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Qualifier {
    Pass,
    Fail,
    SoftFail,
    Neutral,
}

impl Qualifier {
    fn outcome(self) -> SpfOutcome {
        match self {
            Qualifier::Pass => SpfOutcome::Pass,
            Qualifier::Fail => SpfOutcome::Fail,
            Qualifier::SoftFail => SpfOutcome::SoftFail,
            Qualifier::Neutral => SpfOutcome::Neutral,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Mechanism {
    All,
    Ip4 { network: Ipv4Addr, prefix: u8 },
    A { domain: Option<String>, prefix: u8 },
    Mx { domain: Option<String>, prefix: u8 },
    Include(String),
    /// ip6/exists/ptr and anything unrecognized: never matches.
    Unsupported,
}

#[derive(Debug, PartialEq, Eq)]
struct Directive {
    qualifier: Qualifier,
    mechanism: Mechanism,
}

#[derive(Debug, Default, PartialEq, Eq)]
struct Record {
    directives: Vec<Directive>,
    redirect: Option<String>,
}

/// Parse a `v=spf1` record into directives. Returns `None` when the text
/// is not an SPF record at all.
fn parse_record(text: &str) -> Option<Record> {
    let mut terms = text.split_ascii_whitespace();
    if terms.next() != Some("v=spf1") {
        return None;
    }

    let mut record = Record::default();
    for term in terms {
        if let Some(target) = term.strip_prefix("redirect=") {
            if !target.is_empty() {
                record.redirect = Some(target.to_string());
            }
            continue;
        }
        if term.contains('=') {
            // exp= and unknown modifiers carry no matching semantics
            continue;
        }

        let (qualifier, rest) = match term.split_at_checked(1) {
            Some(("+", rest)) => (Qualifier::Pass, rest),
            Some(("-", rest)) => (Qualifier::Fail, rest),
            Some(("~", rest)) => (Qualifier::SoftFail, rest),
            Some(("?", rest)) => (Qualifier::Neutral, rest),
            _ => (Qualifier::Pass, term),
        };

        record.directives.push(Directive {
            qualifier,
            mechanism: parse_mechanism(rest),
        });
    }
    Some(record)
}

fn parse_mechanism(text: &str) -> Mechanism {
    let lower = text.to_ascii_lowercase();
    if lower == "all" {
        return Mechanism::All;
    }
    if let Some(value) = lower.strip_prefix("ip4:") {
        let (addr, prefix) = split_prefix(value);
        let Some(prefix) = prefix else {
            return Mechanism::Unsupported;
        };
        return match addr.parse() {
            Ok(network) => Mechanism::Ip4 { network, prefix },
            Err(_) => Mechanism::Unsupported,
        };
    }
    if lower == "a" || lower.starts_with("a:") || lower.starts_with("a/") {
        let (domain, prefix) = split_domain_prefix(&lower, "a");
        let Some(prefix) = prefix else {
            return Mechanism::Unsupported;
        };
        return Mechanism::A { domain, prefix };
    }
    if lower == "mx" || lower.starts_with("mx:") || lower.starts_with("mx/") {
        let (domain, prefix) = split_domain_prefix(&lower, "mx");
        let Some(prefix) = prefix else {
            return Mechanism::Unsupported;
        };
        return Mechanism::Mx { domain, prefix };
    }
    if let Some(target) = lower.strip_prefix("include:")
        && !target.is_empty()
    {
        return Mechanism::Include(target.to_string());
    }
    Mechanism::Unsupported
}

/// Split `addr[/prefix]`; `None` prefix means the suffix was malformed.
fn split_prefix(value: &str) -> (&str, Option<u8>) {
    match value.split_once('/') {
        Some((addr, prefix)) => (addr, prefix.parse().ok().filter(|p| *p <= 32)),
        None => (value, Some(32)),
    }
}

/// Split `a[:domain][/prefix]` shapes for the a and mx mechanisms.
fn split_domain_prefix(value: &str, name: &str) -> (Option<String>, Option<u8>) {
    let rest = &value[name.len()..];
    let (domain_part, prefix) = match rest.split_once('/') {
        Some((domain, prefix)) => {
            (domain, prefix.parse().ok().filter(|p| *p <= 32))
        }
        None => (rest, Some(32)),
    };
    let domain = domain_part
        .strip_prefix(':')
        .filter(|d| !d.is_empty())
        .map(str::to_string);
    (domain, prefix)
}
