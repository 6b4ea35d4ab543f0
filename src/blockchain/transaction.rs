//! UTXO-model transactions: construction, the trimmed-copy signing scheme,
//! and verification.

use crate::config::MINING_REWARD;
use crate::crypto::address::hash_public_key;
use crate::crypto::hash::{Hash, HexBytes};
use crate::crypto::keys::{self, KeyPair};
use crate::error::{NodeError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TxInput {
    pub prev_tx_id: Hash,
    pub out_index: i64,
    pub signature: Option<HexBytes>,
    pub pub_key: Option<HexBytes>,
}

impl TxInput {
    /// True if this input is unlocked by the owner of `pub_key_hash` — the
    /// raw public key attached to the input hashes to it.
    pub fn uses_key(&self, pub_key_hash: &[u8]) -> bool {
        match &self.pub_key {
            Some(pub_key) => hash_public_key(pub_key.as_bytes()) == *pub_key_hash,
            None => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TxOutput {
    /// Value in whole coins, matching the reference implementation's
    /// float-denominated amounts. Transaction fees are out of scope.
    pub value: f64,
    pub pub_key_hash: Vec<u8>,
}

impl TxOutput {
    pub fn new(value: f64, pub_key_hash: Vec<u8>) -> Self {
        Self { value, pub_key_hash }
    }

    pub fn is_locked_with(&self, pub_key_hash: &[u8]) -> bool {
        self.pub_key_hash == pub_key_hash
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub id: Hash,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

impl Transaction {
    /// A coinbase transaction: one input with no referenced output (the
    /// conventional `out_index == -1` marker), one output paying the
    /// fixed mining reward to `to_pub_key_hash`. An empty `data` is
    /// replaced with 24 random bytes, hex-encoded, so that two coinbase
    /// transactions paying the same address don't collide on id.
    pub fn coinbase(to_pub_key_hash: &[u8], data: &str) -> Self {
        let data = if data.is_empty() {
            let mut random_bytes = [0u8; 24];
            rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut random_bytes);
            hex::encode(random_bytes)
        } else {
            data.to_string()
        };
        let input = TxInput {
            prev_tx_id: Hash::zero(),
            out_index: -1,
            signature: None,
            pub_key: Some(HexBytes::new(data.into_bytes())),
        };
        let output = TxOutput::new(MINING_REWARD, to_pub_key_hash.to_vec());
        let mut tx = Self {
            id: Hash::zero(),
            inputs: vec![input],
            outputs: vec![output],
        };
        tx.id = Hash::from_bytes(tx.compute_hash().expect("coinbase hashing cannot fail"));
        tx
    }

    /// Builds an unsigned transaction spending `spendable` outputs. The
    /// caller (the chain store, which has access to previous transactions)
    /// signs it afterwards with `sign`.
    pub fn build(
        sender_pub_key: &[u8],
        to_pub_key_hash: Vec<u8>,
        amount: f64,
        spendable: &[(Hash, i64)],
        accumulated: f64,
        change_pub_key_hash: Vec<u8>,
    ) -> Result<Self> {
        if accumulated < amount {
            return Err(NodeError::Validation(
                "insufficient spendable balance".to_string(),
            ));
        }

        let inputs = spendable
            .iter()
            .map(|(tx_id, out_index)| TxInput {
                prev_tx_id: *tx_id,
                out_index: *out_index,
                signature: None,
                pub_key: Some(HexBytes::new(sender_pub_key.to_vec())),
            })
            .collect();

        let mut outputs = vec![TxOutput::new(amount, to_pub_key_hash)];
        if accumulated > amount {
            outputs.push(TxOutput::new(accumulated - amount, change_pub_key_hash));
        }

        let mut tx = Self {
            id: Hash::zero(),
            inputs,
            outputs,
        };
        tx.id = Hash::from_bytes(tx.compute_hash()?);
        Ok(tx)
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1
            && self.inputs[0].prev_tx_id.is_zero()
            && self.inputs[0].out_index == -1
    }

    /// Hashes the transaction with its `id` field cleared — this is how
    /// `id` itself is derived, and how blocks fold transactions into their
    /// merkle tree.
    pub fn compute_hash(&self) -> Result<[u8; 32]> {
        let mut copy = self.clone();
        copy.id = Hash::zero();
        let bytes = bincode::serialize(&copy)?;
        Ok(Sha256::digest(bytes).into())
    }

    /// Deep copy with every input's signature and public key cleared —
    /// the buffer that gets a per-input public key filled back in and
    /// signed/verified.
    fn trimmed_copy(&self) -> Self {
        let inputs = self
            .inputs
            .iter()
            .map(|input| TxInput {
                prev_tx_id: input.prev_tx_id,
                out_index: input.out_index,
                signature: None,
                pub_key: None,
            })
            .collect();
        Self {
            id: self.id,
            inputs,
            outputs: self.outputs.clone(),
        }
    }

    /// Signs every input against the transactions it spends from. `keypair`
    /// is temporarily attributed to every input regardless of whose
    /// output it actually references, matching the reference
    /// implementation — a real multi-owner wallet would sign inputs
    /// individually with the relevant key instead.
    pub fn sign(&mut self, keypair: &KeyPair, prev_txs: &HashMap<Hash, Transaction>) -> Result<()> {
        if self.is_coinbase() {
            return Ok(());
        }

        for input in &self.inputs {
            if !prev_txs.contains_key(&input.prev_tx_id) {
                return Err(NodeError::Invariant(
                    "referenced previous transaction not found".to_string(),
                ));
            }
        }

        let mut copy = self.trimmed_copy();
        for i in 0..copy.inputs.len() {
            let prev_tx = &prev_txs[&self.inputs[i].prev_tx_id];
            let out_index = self.inputs[i].out_index as usize;
            copy.inputs[i].signature = None;
            copy.inputs[i].pub_key = Some(HexBytes::new(prev_tx.outputs[out_index].pub_key_hash.clone()));

            let data = bincode::serialize(&copy)?;
            let signature = keypair.sign(&data)?;
            self.inputs[i].signature = Some(HexBytes::new(signature.to_vec()));

            copy.inputs[i].pub_key = None;
        }
        Ok(())
    }

    /// Verifies every input's signature against the output it claims to
    /// spend. Per spec, a missing referenced transaction here is fatal —
    /// it means the chain store's own invariant (never accept a block
    /// spending an unknown output) has already been broken.
    pub fn verify(&self, prev_txs: &HashMap<Hash, Transaction>) -> Result<bool> {
        if self.is_coinbase() {
            return Ok(true);
        }

        for input in &self.inputs {
            if !prev_txs.contains_key(&input.prev_tx_id) {
                return Err(NodeError::Invariant(
                    "referenced previous transaction not found".to_string(),
                ));
            }
        }

        let mut copy = self.trimmed_copy();
        for (i, input) in self.inputs.iter().enumerate() {
            let prev_tx = &prev_txs[&input.prev_tx_id];
            let out_index = input.out_index as usize;
            copy.inputs[i].signature = None;
            copy.inputs[i].pub_key = Some(HexBytes::new(prev_tx.outputs[out_index].pub_key_hash.clone()));

            let data = bincode::serialize(&copy)?;
            let pub_key = input
                .pub_key
                .as_ref()
                .ok_or_else(|| NodeError::Validation("input missing public key".to_string()))?;
            let signature = input
                .signature
                .as_ref()
                .ok_or_else(|| NodeError::Validation("input missing signature".to_string()))?;

            if !keys::verify(pub_key.as_bytes(), &data, signature.as_bytes())? {
                return Ok(false);
            }
            copy.inputs[i].pub_key = None;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::address::hash_public_key;

    fn spend_tx(prev: &Transaction, keypair: &KeyPair, to_hash: Vec<u8>, amount: f64) -> Transaction {
        let spendable = vec![(prev.id, 0i64)];
        let mut tx = Transaction::build(
            &keypair.public_key(),
            to_hash,
            amount,
            &spendable,
            prev.outputs[0].value,
            hash_public_key(&keypair.public_key()).to_vec(),
        )
        .unwrap();
        let mut prev_txs = HashMap::new();
        prev_txs.insert(prev.id, prev.clone());
        tx.sign(keypair, &prev_txs).unwrap();
        tx
    }

    #[test]
    fn coinbase_is_recognized_and_needs_no_signature() {
        let keypair = KeyPair::generate();
        let hash = hash_public_key(&keypair.public_key());
        let coinbase = Transaction::coinbase(&hash, "genesis");
        assert!(coinbase.is_coinbase());
        assert!(coinbase.verify(&HashMap::new()).unwrap());
    }

    #[test]
    fn spend_transaction_signs_and_verifies() {
        let sender = KeyPair::generate();
        let receiver = KeyPair::generate();
        let sender_hash = hash_public_key(&sender.public_key());
        let receiver_hash = hash_public_key(&receiver.public_key());

        let coinbase = Transaction::coinbase(&sender_hash, "genesis");
        let tx = spend_tx(&coinbase, &sender, receiver_hash.to_vec(), 5.0);

        let mut prev_txs = HashMap::new();
        prev_txs.insert(coinbase.id, coinbase);
        assert!(tx.verify(&prev_txs).unwrap());
    }

    #[test]
    fn tampered_signature_fails_verification() {
        let sender = KeyPair::generate();
        let receiver = KeyPair::generate();
        let sender_hash = hash_public_key(&sender.public_key());
        let receiver_hash = hash_public_key(&receiver.public_key());

        let coinbase = Transaction::coinbase(&sender_hash, "genesis");
        let mut tx = spend_tx(&coinbase, &sender, receiver_hash.to_vec(), 5.0);
        let sig = tx.inputs[0].signature.as_ref().unwrap().as_bytes().to_vec();
        let mut tampered = sig.clone();
        tampered[0] ^= 0xff;
        tx.inputs[0].signature = Some(HexBytes::new(tampered));

        let mut prev_txs = HashMap::new();
        prev_txs.insert(coinbase.id, coinbase);
        assert!(!tx.verify(&prev_txs).unwrap());
    }

    #[test]
    fn id_changes_if_outputs_change() {
        let keypair = KeyPair::generate();
        let hash = hash_public_key(&keypair.public_key());
        let a = Transaction::coinbase(&hash, "a");
        let b = Transaction::coinbase(&hash, "b");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn signing_with_unknown_previous_transaction_is_fatal() {
        let keypair = KeyPair::generate();
        let hash = hash_public_key(&keypair.public_key());
        let coinbase = Transaction::coinbase(&hash, "genesis");
        let spendable = vec![(coinbase.id, 0i64)];
        let mut tx = Transaction::build(
            &keypair.public_key(),
            hash.to_vec(),
            1.0,
            &spendable,
            coinbase.outputs[0].value,
            hash.to_vec(),
        )
        .unwrap();

        let err = tx.sign(&keypair, &HashMap::new()).unwrap_err();
        assert!(err.is_fatal());
    }
}
