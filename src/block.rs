//! Shared block state: the single piece of mutable state the
//! coordinator writes and every worker reads.

use parking_lot::Mutex;

use crate::difficulty::{pack, unpack};
use crate::hash::BLOCK_HASH_ASCII_LEN;

/// The mining target as observed from the chain at a single point in time.
///
/// `block_number` and `block_hash` must come from the same chain
/// observation; callers build this from one
/// [`crate::chain::ChainClient`] round-trip, never by mixing fields from
/// two calls.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockContext {
    pub block_number: u64,
    /// Canonical 32-byte block hash.
    pub block_hash: [u8; 32],
    pub difficulty: u128,
}

impl BlockContext {
    /// The ASCII-hex body workers feed to [`crate::hash::seal`]: the hash
    /// hex-encoded and truncated to the 62 bytes the hasher expects
    /// .
    pub fn block_hash_ascii(&self) -> [u8; BLOCK_HASH_ASCII_LEN] {
        let full = hex::encode(self.block_hash);
        let mut out = [0u8; BLOCK_HASH_ASCII_LEN];
        out.copy_from_slice(&full.as_bytes()[..BLOCK_HASH_ASCII_LEN]);
        out
    }
}

/// The fields of [`BlockContext`] as they sit in the shared cell: the hash
/// body kept as a 64-byte ASCII buffer and the difficulty packed into four
/// 32-bit words.
struct Inner {
    block_number: u64,
    block_hash_ascii: [u8; 64],
    difficulty_words: [u32; 4],
}

/// A mutable cell guarded by a single mutex. The coordinator is the sole
/// writer ([`SharedBlockState::update`]); workers only ever
/// [`SharedBlockState::snapshot`] it. Because both operations take the
/// same lock, a snapshot can never observe a torn write — all three
/// fields always come from one `update` call.
pub struct SharedBlockState {
    inner: Mutex<Inner>,
}

impl SharedBlockState {
    pub fn new(ctx: &BlockContext) -> Self {
        let state = Self {
            inner: Mutex::new(Inner {
                block_number: 0,
                block_hash_ascii: [0u8; 64],
                difficulty_words: [0, 0, 0, 0],
            }),
        };
        state.update(ctx);
        state
    }

    /// Overwrites all three fields atomically with respect to `snapshot`.
    pub fn update(&self, ctx: &BlockContext) {
        let ascii = ctx.block_hash_ascii();
        let mut buf = [0u8; 64];
        buf[..BLOCK_HASH_ASCII_LEN].copy_from_slice(&ascii);

        let mut guard = self.inner.lock();
        guard.block_number = ctx.block_number;
        guard.block_hash_ascii = buf;
        guard.difficulty_words = pack(ctx.difficulty);
    }

    /// Takes local copies of all three fields under one critical section.
    pub fn snapshot(&self) -> (u64, [u8; BLOCK_HASH_ASCII_LEN], u128) {
        let guard = self.inner.lock();
        let mut ascii = [0u8; BLOCK_HASH_ASCII_LEN];
        ascii.copy_from_slice(&guard.block_hash_ascii[..BLOCK_HASH_ASCII_LEN]);
        (
            guard.block_number,
            ascii,
            unpack(guard.difficulty_words),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(block_number: u64, fill: u8, difficulty: u128) -> BlockContext {
        BlockContext {
            block_number,
            block_hash: [fill; 32],
            difficulty,
        }
    }

    #[test]
    fn snapshot_reflects_last_update() {
        let state = SharedBlockState::new(&ctx(1, 0xab, 42));
        let (num, ascii, diff) = state.snapshot();
        assert_eq!(num, 1);
        assert_eq!(diff, 42);
        assert_eq!(ascii.len(), BLOCK_HASH_ASCII_LEN);

        state.update(&ctx(2, 0xcd, 99));
        let (num2, ascii2, diff2) = state.snapshot();
        assert_eq!(num2, 2);
        assert_eq!(diff2, 99);
        assert_ne!(ascii, ascii2);
    }

    #[test]
    fn update_is_idempotent() {
        let state = SharedBlockState::new(&ctx(5, 0x11, 7));
        let before = state.snapshot();
        state.update(&ctx(5, 0x11, 7));
        let after = state.snapshot();
        assert_eq!(before, after);
    }

    #[test]
    fn block_hash_ascii_is_truncated_hex() {
        let c = ctx(1, 0xff, 1);
        let ascii = c.block_hash_ascii();
        assert_eq!(ascii.len(), BLOCK_HASH_ASCII_LEN);
        assert!(ascii.iter().all(|&b| b == b'f'));
    }
}
