//! A small non-parallel debugging helper: mine a solution for a single,
//! fixed `(block_number, block_hash, difficulty)` without spinning up a
//! worker pool or talking to a chain client at all.
//!
//! The original this crate is modeled on exposes an equivalent helper that
//! returns after a single fixed-size sweep regardless of whether it found
//! anything — almost certainly a bug, since a caller asking "solve this"
//! gets back `None` if the answer happened to sit just past the sweep
//! boundary. This version keeps sweeping until it finds one.

use crate::block::BlockContext;
use crate::difficulty::meets;
use crate::hash::seal;
use crate::types::Solution;

/// Mines nonces starting at `start_nonce` against a single fixed block
/// context until one satisfies `ctx.difficulty`. Intended for
/// reproducing and debugging a specific seal computation, not for
/// production registration (use [`crate::solver::create_pow`] for that).
pub fn solve(ctx: &BlockContext, start_nonce: u64) -> Solution {
    let block_hash_ascii = ctx.block_hash_ascii();
    let mut nonce = start_nonce;
    loop {
        let candidate_seal = seal(nonce, &block_hash_ascii);
        if meets(&candidate_seal, ctx.difficulty) {
            return Solution {
                nonce,
                block_number: ctx.block_number,
                difficulty: ctx.difficulty,
                seal: candidate_seal,
            };
        }
        nonce = nonce.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn difficulty_one_solves_immediately() {
        let ctx = BlockContext {
            block_number: 1,
            block_hash: [0u8; 32],
            difficulty: 1,
        };
        let solution = solve(&ctx, 0);
        assert_eq!(solution.nonce, 0);
        assert!(meets(&solution.seal, 1));
    }

    #[test]
    fn solution_is_bound_to_the_given_context() {
        let ctx = BlockContext {
            block_number: 42,
            block_hash: [0xab; 32],
            difficulty: 1,
        };
        let solution = solve(&ctx, 100);
        assert_eq!(solution.block_number, 42);
        assert_eq!(solution.difficulty, 1);
        assert!(solution.nonce >= 100);
    }
}
