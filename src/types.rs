//! The result and near-miss records shared by workers and the coordinator
//! ("Solution", "BestCandidate").

use num_bigint::BigUint;

/// A mined proof-of-work result.
///
/// Invariant: `seal(nonce, block_hash_ascii) == seal` and
/// `meets(seal, difficulty)` both hold for every `Solution` a worker
/// produces; workers never push one that doesn't (see
/// [`crate::worker::Worker::sweep`]).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Solution {
    pub nonce: u64,
    pub block_number: u64,
    pub difficulty: u128,
    pub seal: [u8; 32],
}

impl Solution {
    /// Staleness rule: fresh iff the chain tip is at most 3 blocks
    /// ahead of the block this solution was mined against.
    pub fn is_fresh(&self, current_block_number: u64) -> bool {
        current_block_number.saturating_sub(self.block_number) <= 3
    }
}

/// A monotone-improving near-miss, used only to drive telemetry — it
/// never gates correctness.
#[derive(Clone, Debug)]
pub struct BestCandidate {
    pub margin: BigUint,
    pub seal: [u8; 32],
}
