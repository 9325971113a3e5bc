//! The seal hash primitive.
//!
//! `seal(nonce, block_hash_ascii) = Keccak-256(SHA-256(binary(pre_seal)))`
//! where `pre_seal` is the ASCII-hex concatenation of the nonce's 8
//! little-endian bytes and the block hash's 62 ASCII-hex body bytes. The
//! hash input is the *binary decoding* of that ASCII string, not the ASCII
//! bytes themselves — get this backwards and every seal is rejected
//! on-chain.

use sha2::{Digest, Sha256};
use sha3::Keccak256;

/// Number of ASCII-hex bytes the block hash body occupies once the `0x`
/// prefix is stripped. The chain's hash encoding yields 62 hex chars here;
/// [`crate::block::BlockContext`] stores them in a 64-byte buffer,
/// so only the first `BLOCK_HASH_ASCII_LEN` bytes of that buffer are fed
/// to the hasher.
pub const BLOCK_HASH_ASCII_LEN: usize = 62;

/// Computes the 32-byte seal for `nonce` against `block_hash_ascii`, the
/// ASCII-hex body of a block hash with the `0x` prefix already stripped.
///
/// `block_hash_ascii` must be valid ASCII-hex; callers that read it from a
/// chain client should validate that invariant once at the boundary (see
/// [`crate::block::BlockContext`]).
pub fn seal(nonce: u64, block_hash_ascii: &[u8]) -> [u8; 32] {
    let nonce_hex = hex::encode(nonce.to_le_bytes());

    let mut pre_seal = Vec::with_capacity(16 + block_hash_ascii.len());
    pre_seal.extend_from_slice(nonce_hex.as_bytes());
    pre_seal.extend_from_slice(block_hash_ascii);

    let binary = hex_pairs_to_bytes(&pre_seal);

    let sha_digest = Sha256::digest(&binary);
    let keccak_digest = Keccak256::digest(sha_digest);

    let mut out = [0u8; 32];
    out.copy_from_slice(&keccak_digest);
    out
}

/// Decodes an ASCII-hex buffer (must have even length) into the bytes it
/// represents. This is the binary decoding step: the hash
/// input is the *value* the hex string encodes, not its ASCII text.
fn hex_pairs_to_bytes(ascii_hex: &[u8]) -> Vec<u8> {
    debug_assert_eq!(ascii_hex.len() % 2, 0, "hex buffer must have even length");
    ascii_hex
        .chunks_exact(2)
        .map(|pair| {
            let hi = hex_nibble(pair[0]);
            let lo = hex_nibble(pair[1]);
            (hi << 4) | lo
        })
        .collect()
}

fn hex_nibble(c: u8) -> u8 {
    match c {
        b'0'..=b'9' => c - b'0',
        b'a'..=b'f' => c - b'a' + 10,
        b'A'..=b'F' => c - b'A' + 10,
        _ => panic!("invalid hex digit: {}", c as char),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonce_le_hex_roundtrip() {
        assert_eq!(hex::encode(1u64.to_le_bytes()), "0100000000000000");
    }

    #[test]
    fn seal_is_deterministic() {
        let block_hash = b"00".repeat(31);
        let a = seal(42, &block_hash);
        let b = seal(42, &block_hash);
        assert_eq!(a, b);
    }

    #[test]
    fn seal_changes_with_nonce() {
        let block_hash = b"ab".repeat(31);
        let a = seal(1, &block_hash);
        let b = seal(2, &block_hash);
        assert_ne!(a, b);
    }

    #[test]
    fn seal_changes_with_block_hash() {
        let a = seal(7, &b"00".repeat(31));
        let b = seal(7, &b"ff".repeat(31));
        assert_ne!(a, b);
    }

    #[test]
    fn hex_pairs_decode_matches_known_vector() {
        assert_eq!(hex_pairs_to_bytes(b"deadbeef"), vec![0xde, 0xad, 0xbe, 0xef]);
    }
}
