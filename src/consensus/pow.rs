//! Fixed-difficulty proof-of-work: mine and validate blocks by brute-forcing
//! a nonce until `SHA256(digest)`, read as a big-endian 256-bit integer,
//! is strictly below `2^(256 - difficulty)`.
//!
//! Difficulty retargeting is out of scope; `difficulty` is whatever the
//! caller configured and is carried unchanged on every mined block.

use crate::crypto::Hash;
use crate::error::{NodeError, Result};
use num_bigint::BigUint;
use num_traits::One;
use sha2::{Digest, Sha256};

pub struct ProofOfWork {
    difficulty: u32,
    hashes_computed: u64,
}

impl ProofOfWork {
    pub fn new(difficulty: u32) -> Self {
        Self {
            difficulty,
            hashes_computed: 0,
        }
    }

    /// Mines `(nonce, hash)` for the given merkle root and previous block
    /// hash. Runs to completion; the network event loop is responsible for
    /// giving the miner task a chance to be cancelled between blocks.
    pub fn mine(
        &mut self,
        merkle_root: &[u8; 32],
        prev_hash: &[u8],
        _timestamp: i64,
    ) -> Result<(i64, Hash)> {
        let target = target(self.difficulty);
        let mut nonce: i64 = 0;
        loop {
            let hash = digest(merkle_root, prev_hash, nonce, self.difficulty);
            self.hashes_computed += 1;
            if BigUint::from_bytes_be(&hash) < target {
                return Ok((nonce, Hash::from_bytes(hash)));
            }
            nonce = nonce.checked_add(1).ok_or_else(|| {
                NodeError::Validation("exhausted nonce space without finding proof".to_string())
            })?;
        }
    }

    pub fn hashes_computed(&self) -> u64 {
        self.hashes_computed
    }
}

fn target(difficulty: u32) -> BigUint {
    BigUint::one() << (256u32.saturating_sub(difficulty))
}

fn digest(merkle_root: &[u8; 32], prev_hash: &[u8], nonce: i64, difficulty: u32) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(merkle_root);
    hasher.update(prev_hash);
    hasher.update(nonce.to_be_bytes());
    hasher.update((difficulty as i64).to_be_bytes());
    hasher.finalize().into()
}

/// Recomputes the digest for a block being validated (mining or a block
/// received from a peer) and checks it against the difficulty target.
pub fn digest_meets_target(
    merkle_root: &[u8; 32],
    prev_hash: &[u8],
    _timestamp: i64,
    nonce: i64,
    difficulty: u32,
) -> bool {
    let hash = digest(merkle_root, prev_hash, nonce, difficulty);
    BigUint::from_bytes_be(&hash) < target(difficulty)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mined_proof_validates() {
        let merkle_root = [7u8; 32];
        let prev_hash = vec![1u8; 32];
        let mut pow = ProofOfWork::new(12);
        let (nonce, hash) = pow.mine(&merkle_root, &prev_hash, 0).unwrap();
        assert!(digest_meets_target(&merkle_root, &prev_hash, 0, nonce, 12));
        assert_eq!(hash.as_bytes().len(), 32);
        assert!(pow.hashes_computed() >= 1);
    }

    #[test]
    fn tampered_nonce_fails_validation() {
        let merkle_root = [7u8; 32];
        let prev_hash = vec![1u8; 32];
        let mut pow = ProofOfWork::new(12);
        let (nonce, _hash) = pow.mine(&merkle_root, &prev_hash, 0).unwrap();
        assert!(!digest_meets_target(
            &merkle_root,
            &prev_hash,
            0,
            nonce + 1,
            12
        ));
    }

    #[test]
    fn higher_difficulty_yields_smaller_target() {
        assert!(target(20) < target(10));
    }
}
