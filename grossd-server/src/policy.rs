//! Postfix policy delegation front-end.
//!
//! Line-oriented TCP: a request is a series of `name=value` lines ended by
//! a blank line; the response is a single `action=<value>` line followed by
//! a blank line. One thread per connection; a connection may carry any
//! number of requests. Anything malformed gets the fail-safe `dunno` so a
//! broken policy daemon can never take mail down with it.

use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, BufWriter, ErrorKind, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use grossd_core::orchestrator::Orchestrator;
use grossd_core::types::{GreyTuple, Verdict};

/// Idle client connections are dropped after this long.
const CLIENT_READ_TIMEOUT: Duration = Duration::from_secs(120);

/// How often the accept loop checks the shutdown flag.
const ACCEPT_POLL: Duration = Duration::from_millis(100);

/// Accept policy connections until the shutdown flag is raised.
pub fn run_policy_server(
    listener: TcpListener,
    orchestrator: Arc<Orchestrator>,
    shutdown: Arc<AtomicBool>,
) {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "policy server listening");
    }
    if let Err(e) = listener.set_nonblocking(true) {
        error!(error = %e, "policy listener setup failed");
        return;
    }

    while !shutdown.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                debug!(%peer, "policy connection accepted");
                let orchestrator = Arc::clone(&orchestrator);
                let spawned = std::thread::Builder::new()
                    .name("policy-conn".to_string())
                    .spawn(move || {
                        if let Err(e) = handle_connection(stream, &orchestrator) {
                            debug!(%peer, error = %e, "policy connection ended");
                        }
                    });
                if let Err(e) = spawned {
                    error!(error = %e, "could not spawn connection handler");
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL);
            }
            Err(e) => {
                warn!(error = %e, "accept failed");
                std::thread::sleep(ACCEPT_POLL);
            }
        }
    }
    debug!("policy server exiting");
}

fn handle_connection(stream: TcpStream, orchestrator: &Orchestrator) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(CLIENT_READ_TIMEOUT))?;
    let reader = BufReader::new(stream.try_clone()?);
    let mut writer = BufWriter::new(stream);

    let mut attrs: HashMap<String, String> = HashMap::new();
    let mut started = Instant::now();

    for line in reader.lines() {
        let line = line?;
        if attrs.is_empty() {
            started = Instant::now();
        }
        if line.is_empty() {
            let action = decide(&attrs, started.elapsed(), orchestrator);
            write!(writer, "action={action}\n\n")?;
            writer.flush()?;
            attrs.clear();
            continue;
        }
        match line.split_once('=') {
            Some((name, value)) => {
                attrs.insert(name.to_string(), value.to_string());
            }
            None => {
                // tolerated; the request decides on its attributes alone
                debug!(%line, "ignoring malformed policy attribute");
            }
        }
    }
    Ok(())
}

/// Turn one parsed request into the action value, charging the time the
/// protocol exchange already used against the check deadline.
fn decide(
    attrs: &HashMap<String, String>,
    protocol_elapsed: Duration,
    orchestrator: &Orchestrator,
) -> String {
    let Some(tuple) = tuple_from_attrs(attrs) else {
        return action_line(&Verdict::Accept);
    };
    let timelimit = orchestrator
        .query_timelimit()
        .saturating_sub(protocol_elapsed);
    let verdict = orchestrator.assess_with_deadline(tuple, timelimit);
    debug!(?verdict, "request assessed");
    action_line(&verdict)
}

/// Extract the triplet from request attributes. `None` means the request
/// is not assessable and must fail safe.
fn tuple_from_attrs(attrs: &HashMap<String, String>) -> Option<GreyTuple> {
    if attrs.get("request").map(String::as_str) != Some("smtpd_access_policy") {
        warn!("not an smtpd_access_policy request, failing safe");
        return None;
    }
    let client_address = attrs.get("client_address").filter(|v| !v.is_empty());
    let sender = attrs.get("sender");
    let recipient = attrs.get("recipient");
    let (Some(client_address), Some(sender), Some(recipient)) =
        (client_address, sender, recipient)
    else {
        error!("policy request is missing triplet attributes, failing safe");
        return None;
    };

    let mut tuple = GreyTuple::new(client_address, sender, recipient);
    if let Some(helo) = attrs.get("helo_name").filter(|v| !v.is_empty()) {
        tuple = tuple.with_helo(helo);
    }
    Some(tuple)
}

fn action_line(verdict: &Verdict) -> String {
    match verdict {
        Verdict::Accept => "dunno".to_string(),
        Verdict::Greylist => {
            "defer_if_permit Greylisted, please try again later".to_string()
        }
        Verdict::Block { reason } => format!("reject {reason}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn complete_request_yields_a_tuple() {
        let attrs = attrs(&[
            ("request", "smtpd_access_policy"),
            ("client_address", "10.0.0.1"),
            ("sender", "a@x.example"),
            ("recipient", "b@y.example"),
            ("helo_name", "mail.x.example"),
        ]);
        let tuple = tuple_from_attrs(&attrs).expect("tuple");
        assert_eq!(tuple.client_address, "10.0.0.1");
        assert_eq!(tuple.helo_name.as_deref(), Some("mail.x.example"));
    }

    #[test]
    fn bounce_sender_is_acceptable() {
        // the null sender arrives as an empty value, still assessable
        let attrs = attrs(&[
            ("request", "smtpd_access_policy"),
            ("client_address", "10.0.0.1"),
            ("sender", ""),
            ("recipient", "b@y.example"),
        ]);
        let tuple = tuple_from_attrs(&attrs).expect("tuple");
        assert_eq!(tuple.sender, "");
        assert!(tuple.helo_name.is_none());
    }

    #[test]
    fn wrong_request_type_fails_safe() {
        let attrs = attrs(&[
            ("request", "junk"),
            ("client_address", "10.0.0.1"),
            ("sender", "a@x"),
            ("recipient", "b@y"),
        ]);
        assert!(tuple_from_attrs(&attrs).is_none());
    }

    #[test]
    fn missing_client_address_fails_safe() {
        let attrs = attrs(&[
            ("request", "smtpd_access_policy"),
            ("sender", "a@x"),
            ("recipient", "b@y"),
        ]);
        assert!(tuple_from_attrs(&attrs).is_none());
    }

    #[test]
    fn verdicts_render_postfix_actions() {
        assert_eq!(action_line(&Verdict::Accept), "dunno");
        assert_eq!(
            action_line(&Verdict::Greylist),
            "defer_if_permit Greylisted, please try again later"
        );
        assert_eq!(
            action_line(&Verdict::Block {
                reason: "SPF policy violation".to_string()
            }),
            "reject SPF policy violation"
        );
    }
}
