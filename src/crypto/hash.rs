//! Fixed-size digest newtype and a variable-length sibling for raw key/
//! signature bytes: hex in human-readable formats (JSON), raw bytes in
//! binary ones (bincode) — so a future JSON-RPC/CLI layer can render chain
//! state without the core depending on a particular hex-encoding choice.
//! Grounded in the teacher's `network::protocol::Hash` newtype, generalized
//! from its fixed 64-byte SHA-512 digest to this crate's 32-byte SHA-256 one.

use crate::error::{NodeError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

pub const HASH_LEN: usize = 32;

/// A block hash or transaction id: always exactly 32 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash([u8; HASH_LEN]);

impl Hash {
    pub fn from_bytes(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != HASH_LEN {
            return Err(NodeError::Validation(format!(
                "expected a {HASH_LEN}-byte hash, got {}",
                bytes.len()
            )));
        }
        let mut out = [0u8; HASH_LEN];
        out.copy_from_slice(bytes);
        Ok(Self(out))
    }

    /// The all-zero hash, used as the sentinel `prev_block_hash` of the
    /// genesis block and the sentinel `prev_tx_id` of a coinbase input.
    pub fn zero() -> Self {
        Self([0u8; HASH_LEN])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; HASH_LEN]
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    pub fn into_bytes(self) -> [u8; HASH_LEN] {
        self.0
    }
}

impl From<[u8; HASH_LEN]> for Hash {
    fn from(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&hex::encode(self.0))
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
            Hash::from_slice(&bytes).map_err(serde::de::Error::custom)
        } else {
            let bytes: Vec<u8> = Deserialize::deserialize(deserializer)?;
            Hash::from_slice(&bytes).map_err(serde::de::Error::custom)
        }
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// A public key or signature: variable length, same hex-or-raw rendering as
/// `Hash`. Used for `TxInput::pub_key`/`signature` instead of a bare
/// `Vec<u8>` so the same wire-format rule applies crate-wide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexBytes(Vec<u8>);

impl HexBytes {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for HexBytes {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for HexBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for HexBytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&hex::encode(&self.0))
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for HexBytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
            Ok(HexBytes(bytes))
        } else {
            let bytes: Vec<u8> = Deserialize::deserialize(deserializer)?;
            Ok(HexBytes(bytes))
        }
    }
}

impl fmt::Display for HexBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_round_trips_through_json() {
        let hash = Hash::from_bytes([7u8; HASH_LEN]);
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{}\"", "07".repeat(HASH_LEN)));
        let back: Hash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hash);
    }

    #[test]
    fn hash_round_trips_through_bincode() {
        let hash = Hash::from_bytes([9u8; HASH_LEN]);
        let bytes = bincode::serialize(&hash).unwrap();
        let back: Hash = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, hash);
    }

    #[test]
    fn zero_is_distinguishable_from_a_real_hash() {
        assert!(Hash::zero().is_zero());
        assert!(!Hash::from_bytes([1u8; HASH_LEN]).is_zero());
    }

    #[test]
    fn hex_bytes_round_trip_through_json() {
        let raw = HexBytes::new(vec![1, 2, 3, 4]);
        let json = serde_json::to_string(&raw).unwrap();
        assert_eq!(json, "\"01020304\"");
        let back: HexBytes = serde_json::from_str(&json).unwrap();
        assert_eq!(back, raw);
    }
}
