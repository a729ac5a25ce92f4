//! The rotating Bloom-filter ring.
//!
//! Sightings are always inserted into the head filter; membership is the
//! union across every filter in the ring. Rotation advances the head and
//! zeroes the new head, discarding the oldest window of sightings in one
//! cheap step. Anything seen within the last `num_bufs × rotate_interval`
//! seconds is remembered; false negatives cannot happen.
//!
//! Inserts and queries take the shared lock (bits are atomic words);
//! rotation is the only writer.

mod filter;
mod snapshot;

use std::hash::{Hash, Hasher};

use parking_lot::RwLock;

pub use filter::BloomFilter;
pub use snapshot::SnapshotError;

/// Hash functions per key; with `2^22` bits and hourly rotation this keeps
/// the false-positive rate comfortably below one in a million.
const HASH_COUNT: usize = 8;

#[derive(Debug)]
struct RingState {
    bufs: Vec<BloomFilter>,
    head: usize,
}

#[derive(Debug)]
pub struct BloomRing {
    state: RwLock<RingState>,
    num_bufs: usize,
    filter_bits: u32,
}

impl BloomRing {
    pub fn new(num_bufs: usize, filter_bits: u32) -> Self {
        assert!(num_bufs >= 1, "ring needs at least one buffer");
        assert!(
            (5..=32).contains(&filter_bits),
            "filter_bits out of range [5, 32]"
        );
        let bufs = (0..num_bufs).map(|_| BloomFilter::new(filter_bits)).collect();
        Self {
            state: RwLock::new(RingState { bufs, head: 0 }),
            num_bufs,
            filter_bits,
        }
    }

    pub fn num_bufs(&self) -> usize {
        self.num_bufs
    }

    pub fn filter_bits(&self) -> u32 {
        self.filter_bits
    }

    pub fn head(&self) -> usize {
        self.state.read().head
    }

    /// Record a sighting in the head filter.
    pub fn insert(&self, key: &str) {
        let bits = self.bit_positions(key);
        let state = self.state.read();
        let head = &state.bufs[state.head];
        for bit in bits {
            head.set(bit);
        }
    }

    /// Membership across the whole ring: true when any single filter holds
    /// all hash positions of the key.
    pub fn contains(&self, key: &str) -> bool {
        let bits = self.bit_positions(key);
        let state = self.state.read();
        state
            .bufs
            .iter()
            .any(|buf| bits.iter().all(|&bit| buf.test(bit)))
    }

    /// Advance the head and zero the new head filter, discarding the
    /// oldest window of sightings.
    pub fn rotate(&self) {
        let mut state = self.state.write();
        state.head = (state.head + 1) % self.num_bufs;
        let head = state.head;
        state.bufs[head].clear();
    }

    fn bit_positions(&self, key: &str) -> [u64; HASH_COUNT] {
        // Double hashing: two independent seeded hashes generate the whole
        // index family. DefaultHasher::new() is unkeyed, so positions stay
        // stable across restarts and snapshot reloads.
        let mut first = std::collections::hash_map::DefaultHasher::new();
        0x9e37_79b9_7f4a_7c15u64.hash(&mut first);
        key.hash(&mut first);
        let a = first.finish();

        let mut second = std::collections::hash_map::DefaultHasher::new();
        0xc2b2_ae3d_27d4_eb4fu64.hash(&mut second);
        key.hash(&mut second);
        let b = second.finish() | 1;

        let mask = (1u64 << self.filter_bits) - 1;
        let mut bits = [0u64; HASH_COUNT];
        for (i, slot) in bits.iter_mut().enumerate() {
            *slot = a.wrapping_add(b.wrapping_mul(i as u64)) & mask;
        }
        bits
    }
}
