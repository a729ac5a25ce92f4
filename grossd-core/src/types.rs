//! Core data model: the greylisting triplet, check verdicts, and the final
//! policy judgment.

/// One incoming delivery attempt as seen by the MTA front-end.
///
/// Immutable after construction; the edict owns it for the duration of the
/// request, so it outlives every check run on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GreyTuple {
    /// Client IPv4 address, dotted-quad text.
    pub client_address: String,
    /// Envelope sender.
    pub sender: String,
    /// Envelope recipient.
    pub recipient: String,
    /// HELO/EHLO name, when the front-end protocol carries it.
    pub helo_name: Option<String>,
}

impl GreyTuple {
    pub fn new(
        client_address: impl Into<String>,
        sender: impl Into<String>,
        recipient: impl Into<String>,
    ) -> Self {
        Self {
            client_address: client_address.into(),
            sender: sender.into(),
            recipient: recipient.into(),
            helo_name: None,
        }
    }

    pub fn with_helo(mut self, helo: impl Into<String>) -> Self {
        self.helo_name = Some(helo.into());
        self
    }

    /// Canonical Bloom-ring key: `sender|recipient|client_address`,
    /// whitespace trimmed, lowercased.
    pub fn canonical_key(&self) -> String {
        let mut key = String::with_capacity(
            self.sender.len() + self.recipient.len() + self.client_address.len() + 2,
        );
        key.push_str(self.sender.trim());
        key.push('|');
        key.push_str(self.recipient.trim());
        key.push('|');
        key.push_str(self.client_address.trim());
        key.make_ascii_lowercase();
        key
    }
}

/// A single check's opinion of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Judgment {
    /// No evidence either way.
    Undefined,
    /// Positive evidence the delivery is legitimate.
    Pass,
    /// Evidence the delivery is dubious; weighted and summed.
    Suspicious,
    /// Terminal negative evidence.
    Block,
}

/// A check's verdict, sent through the edict's result queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    /// Name of the check that produced this result; the registry maps it to
    /// the definitive flag.
    pub checker: &'static str,
    pub judgment: Judgment,
    /// Suspicion weight; only meaningful for [`Judgment::Suspicious`].
    pub weight: u32,
    /// Human-readable grounds, reported to the MTA on a block.
    pub reason: Option<String>,
    /// Another asynchronous result from the same pool is still coming; the
    /// orchestrator must not count this one toward termination.
    pub pending_more: bool,
}

impl CheckResult {
    pub fn undefined(checker: &'static str) -> Self {
        Self {
            checker,
            judgment: Judgment::Undefined,
            weight: 0,
            reason: None,
            pending_more: false,
        }
    }

    pub fn pass(checker: &'static str) -> Self {
        Self {
            judgment: Judgment::Pass,
            ..Self::undefined(checker)
        }
    }

    pub fn suspicious(checker: &'static str, weight: u32) -> Self {
        Self {
            judgment: Judgment::Suspicious,
            weight,
            ..Self::undefined(checker)
        }
    }

    pub fn block(checker: &'static str, reason: impl Into<String>) -> Self {
        Self {
            judgment: Judgment::Block,
            reason: Some(reason.into()),
            ..Self::undefined(checker)
        }
    }

    pub fn informational(mut self) -> Self {
        self.pending_more = true;
        self
    }
}

/// The combined policy answer handed back to the MTA front-end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Let the delivery proceed.
    Accept,
    /// Defer the delivery; a legitimate sender will retry.
    Greylist,
    /// Reject the delivery outright.
    Block { reason: String },
}

/// When the greylist check records a sighting in the Bloom ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePolicy {
    /// Record a triplet only on its first sighting.
    Grey,
    /// Record every sighting, refreshing known triplets on each delivery.
    Always,
}
