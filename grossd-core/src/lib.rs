//! # grossd-core
//!
//! The concurrent check-dispatch engine behind the grossd greylisting
//! daemon.
//!
//! ## Overview
//!
//! An incoming mail triplet (client IP, envelope sender, envelope
//! recipient) is wrapped in an [`edict::Edict`] and fanned out to every
//! registered check pool. Each check runs on its own elastic
//! [`pool::ThreadPool`] and reports a [`types::CheckResult`] back through
//! the edict's result queue. The [`orchestrator::Orchestrator`] collects
//! results under the request deadline and combines them into a final
//! [`types::Verdict`]: accept, greylist, or block.
//!
//! ## Architecture
//!
//! - [`queue`]: blocking typed message queues, the sole inter-thread
//!   transport
//! - [`edict`]: the shared-ownership job envelope and result rendezvous
//! - [`pool`]: elastic worker pools, one per check kind
//! - [`registry`]: the ordered list of registered checks
//! - [`orchestrator`]: per-request fan-out, collection, and combination
//! - [`bloom`]: the rotating Bloom-filter ring recording sightings
//! - [`checks`]: greylist, DNS list, and SPF check routines
//! - [`maintenance`]: the periodic tick and the bloom-manager consumer
//! - [`stats`]: process-wide delivery counters

pub mod bloom;
pub mod checks;
pub mod edict;
pub mod maintenance;
pub mod orchestrator;
pub mod pool;
pub mod queue;
pub mod registry;
pub mod stats;
pub mod types;

pub use bloom::BloomRing;
pub use edict::Edict;
pub use orchestrator::Orchestrator;
pub use pool::{CheckRoutine, PoolLimits, ThreadPool};
pub use queue::{Fetched, MsgQueue, QueueError};
pub use registry::CheckRegistry;
pub use stats::Stats;
pub use types::{CheckResult, GreyTuple, Judgment, UpdatePolicy, Verdict};
