//! Base58Check addresses: `base58(version ‖ RIPEMD160(SHA256(pubkey)) ‖ checksum)`.

use crate::error::{NodeError, Result};
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

pub const PUB_KEY_HASH_LEN: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address(String);

impl Address {
    /// Wraps an already-encoded base58 string, e.g. one read from CLI
    /// input or a wallet file. `pub_key_hash` still validates the checksum.
    pub fn from_encoded(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    /// Derives an address from a raw public key using `version` and
    /// `checksum_len` bytes of the double-SHA256 checksum (spec's
    /// checksum length is a configurable value, canonically 4).
    pub fn from_public_key(public_key: &[u8], version: u8, checksum_len: usize) -> Self {
        let pub_key_hash = hash_public_key(public_key);
        Self::from_pub_key_hash(&pub_key_hash, version, checksum_len)
    }

    pub fn from_pub_key_hash(pub_key_hash: &[u8], version: u8, checksum_len: usize) -> Self {
        let mut payload = Vec::with_capacity(1 + pub_key_hash.len() + checksum_len);
        payload.push(version);
        payload.extend_from_slice(pub_key_hash);
        let checksum = checksum(&payload, checksum_len);
        payload.extend_from_slice(&checksum);
        Self(bs58::encode(payload).into_string())
    }

    /// Recovers the 20-byte public key hash embedded in the address,
    /// verifying the checksum first.
    pub fn pub_key_hash(&self, checksum_len: usize) -> Result<Vec<u8>> {
        let full = bs58::decode(&self.0)
            .into_vec()
            .map_err(|e| NodeError::Validation(format!("invalid base58 address: {e}")))?;
        if full.len() <= 1 + checksum_len {
            return Err(NodeError::Validation("address too short".to_string()));
        }
        let split = full.len() - checksum_len;
        let (payload, sum) = full.split_at(split);
        if checksum(payload, checksum_len) != sum {
            return Err(NodeError::Validation("address checksum mismatch".to_string()));
        }
        Ok(payload[1..].to_vec())
    }

    pub fn is_valid(&self, checksum_len: usize) -> bool {
        self.pub_key_hash(checksum_len).is_ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub fn hash_public_key(public_key: &[u8]) -> [u8; PUB_KEY_HASH_LEN] {
    let sha = Sha256::digest(public_key);
    let ripemd = Ripemd160::digest(sha);
    let mut out = [0u8; PUB_KEY_HASH_LEN];
    out.copy_from_slice(&ripemd);
    out
}

fn checksum(payload: &[u8], checksum_len: usize) -> Vec<u8> {
    let first = Sha256::digest(payload);
    let second = Sha256::digest(first);
    second[..checksum_len].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::KeyPair;

    #[test]
    fn round_trips_pub_key_hash() {
        let keypair = KeyPair::generate();
        let expected_hash = hash_public_key(&keypair.public_key());
        let address = Address::from_public_key(&keypair.public_key(), 0x00, 4);
        assert_eq!(address.pub_key_hash(4).unwrap(), expected_hash);
    }

    #[test]
    fn rejects_corrupted_address() {
        let keypair = KeyPair::generate();
        let address = Address::from_public_key(&keypair.public_key(), 0x00, 4);
        let mut corrupted = address.as_str().to_string();
        corrupted.push('1');
        let corrupted = Address(corrupted);
        assert!(!corrupted.is_valid(4));
    }

    #[test]
    fn below_canonical_checksum_len_still_round_trips() {
        let keypair = KeyPair::generate();
        let address = Address::from_public_key(&keypair.public_key(), 0x00, 1);
        assert!(address.is_valid(1));
    }
}
