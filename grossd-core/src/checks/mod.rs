//! Check implementations.
//!
//! Every check is a [`crate::pool::CheckRoutine`] fed to its own elastic
//! pool and registered with the [`crate::registry::CheckRegistry`] by its
//! `init` constructor. A routine sends exactly one non-informational
//! result per edict and keeps per-thread resources (resolver channels) in
//! its worker context.

pub mod dnsbl;
pub mod greylist;
pub mod spf;

use std::time::Duration;

use hickory_resolver::Resolver;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use tracing::debug;

pub use dnsbl::{DnsCheck, DnsList, DnsListKind, ERROR_TOLERANCE, reverse_inet_addr};
pub use greylist::GreylistCheck;
pub use spf::SpfCheck;

/// Upper bound for one DNS query attempt; the edict deadline is checked
/// between queries.
pub(crate) const DNS_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(2);

/// Build a blocking resolver from the system configuration, falling back
/// to the library defaults when `/etc/resolv.conf` is unreadable.
pub(crate) fn make_resolver() -> std::io::Result<Resolver> {
    let (config, mut opts) = match hickory_resolver::system_conf::read_system_conf() {
        Ok(parts) => parts,
        Err(e) => {
            debug!(error = %e, "no usable system resolver config, using defaults");
            (ResolverConfig::default(), ResolverOpts::default())
        }
    };
    opts.timeout = DNS_ATTEMPT_TIMEOUT;
    opts.attempts = 1;
    Resolver::new(config, opts).map_err(std::io::Error::other)
}

/// The domain part of an envelope sender, if it has one.
pub(crate) fn sender_domain(sender: &str) -> Option<&str> {
    match sender.rsplit_once('@') {
        Some((_, domain)) if !domain.is_empty() => Some(domain),
        _ => None,
    }
}
