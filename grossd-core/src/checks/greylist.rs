//! The greylist check: first sighting of a triplet is suspicious,
//! subsequent sightings pass.

use std::sync::Arc;

use tracing::debug;

use crate::bloom::BloomRing;
use crate::edict::Edict;
use crate::pool::{CheckRoutine, PoolLimits, ThreadPool};
use crate::registry::CheckRegistry;
use crate::types::{CheckResult, UpdatePolicy};

pub const CHECK_NAME: &str = "greylist";

/// Suspicion weight of an unseen triplet.
pub const GREYLIST_WEIGHT: u32 = 1;

pub struct GreylistCheck {
    ring: Arc<BloomRing>,
    policy: UpdatePolicy,
}

impl GreylistCheck {
    pub fn new(ring: Arc<BloomRing>, policy: UpdatePolicy) -> Self {
        Self { ring, policy }
    }

    /// Build the greylist pool and register it. Informational, not
    /// definitive: a pass only means "seen before".
    pub fn init(
        registry: &mut CheckRegistry,
        ring: Arc<BloomRing>,
        policy: UpdatePolicy,
        limits: PoolLimits,
    ) {
        let pool = ThreadPool::new(CHECK_NAME, Arc::new(Self::new(ring, policy)), limits);
        registry.register(pool, false);
    }
}

impl CheckRoutine for GreylistCheck {
    type Ctx = ();

    fn run(&self, _ctx: &mut (), edict: &Edict) {
        let key = edict.job().canonical_key();
        // the verdict always derives from pre-state; the policy only
        // controls whether a known triplet is re-recorded
        let seen = self.ring.contains(&key);

        let result = if seen {
            if self.policy == UpdatePolicy::Always {
                self.ring.insert(&key);
            }
            CheckResult::pass(CHECK_NAME)
        } else {
            self.ring.insert(&key);
            debug!(%key, "first sighting, greylisting");
            CheckResult::suspicious(CHECK_NAME, GREYLIST_WEIGHT)
        };
        edict.send_result(result);
    }
}
