//! NIST P-256 keypairs used to sign transaction inputs.
//!
//! Public keys and signatures are stored and transmitted as raw fixed-size
//! byte arrays rather than the SEC1/DER encodings `p256` defaults to: a
//! public key is the 64-byte `X‖Y` coordinate concatenation with no prefix
//! byte, and a signature is the 64-byte `r‖s` concatenation. This matches
//! the wire format this implementation replaces Go's `crypto/ecdsa` with.

use crate::error::{NodeError, Result};
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::EncodedPoint;
use rand_core::OsRng;
use zeroize::Zeroizing;

pub const PUBLIC_KEY_LEN: usize = 64;
pub const SIGNATURE_LEN: usize = 64;

pub struct KeyPair {
    signing_key: Zeroizing<[u8; 32]>,
    public_key: [u8; PUBLIC_KEY_LEN],
}

impl KeyPair {
    pub fn generate() -> Self {
        let signing_key = SigningKey::random(&mut OsRng);
        let public_key = encode_public_key(&VerifyingKey::from(&signing_key));
        Self {
            signing_key: Zeroizing::new(signing_key.to_bytes().into()),
            public_key,
        }
    }

    /// Reconstructs a keypair from a raw 32-byte scalar, as read back from
    /// a wallet file. The public key is re-derived rather than trusted from
    /// storage.
    pub fn from_scalar(signing_key: [u8; 32]) -> Result<Self> {
        let signing_key = Zeroizing::new(signing_key);
        let key = SigningKey::from_bytes((&*signing_key).into())
            .map_err(|e| NodeError::Crypto(format!("invalid signing key: {e}")))?;
        let public_key = encode_public_key(&VerifyingKey::from(&key));
        Ok(Self { signing_key, public_key })
    }

    pub fn scalar(&self) -> [u8; 32] {
        *self.signing_key
    }

    pub fn public_key(&self) -> [u8; PUBLIC_KEY_LEN] {
        self.public_key
    }

    fn signing_key(&self) -> Result<SigningKey> {
        SigningKey::from_bytes((&*self.signing_key).into())
            .map_err(|e| NodeError::Crypto(format!("invalid signing key: {e}")))
    }

    pub fn sign(&self, message: &[u8]) -> Result<[u8; SIGNATURE_LEN]> {
        let signing_key = self.signing_key()?;
        let signature: Signature = signing_key.sign(message);
        Ok(signature.to_bytes().into())
    }
}

/// Reconstructs the verifying key from a raw 64-byte `X‖Y` public key and
/// checks `signature` (raw `r‖s`) against `message`.
pub fn verify(public_key: &[u8], message: &[u8], signature: &[u8]) -> Result<bool> {
    let verifying_key = decode_public_key(public_key)?;
    let signature = Signature::try_from(signature)
        .map_err(|e| NodeError::Crypto(format!("malformed signature: {e}")))?;
    Ok(verifying_key.verify(message, &signature).is_ok())
}

fn encode_public_key(key: &VerifyingKey) -> [u8; PUBLIC_KEY_LEN] {
    let point = key.to_encoded_point(false);
    let mut out = [0u8; PUBLIC_KEY_LEN];
    out[..32].copy_from_slice(point.x().expect("uncompressed point has x"));
    out[32..].copy_from_slice(point.y().expect("uncompressed point has y"));
    out
}

pub fn decode_public_key(raw: &[u8]) -> Result<VerifyingKey> {
    if raw.len() != PUBLIC_KEY_LEN {
        return Err(NodeError::Crypto(format!(
            "public key must be {PUBLIC_KEY_LEN} bytes, got {}",
            raw.len()
        )));
    }
    let point = EncodedPoint::from_affine_coordinates(raw[..32].into(), raw[32..].into(), false);
    VerifyingKey::from_encoded_point(&point)
        .ok()
        .ok_or_else(|| NodeError::Crypto("public key is not on curve".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_round_trips() {
        let keypair = KeyPair::generate();
        let message = b"trimmed copy bytes";
        let signature = keypair.sign(message).unwrap();
        assert!(verify(&keypair.public_key(), message, &signature).unwrap());
    }

    #[test]
    fn tampered_message_fails_verification() {
        let keypair = KeyPair::generate();
        let signature = keypair.sign(b"original").unwrap();
        assert!(!verify(&keypair.public_key(), b"tampered", &signature).unwrap());
    }

    #[test]
    fn public_key_is_raw_64_bytes() {
        let keypair = KeyPair::generate();
        assert_eq!(keypair.public_key().len(), PUBLIC_KEY_LEN);
    }
}
