//! Derived secondary index of unspent transaction outputs, keyed
//! `"utxo-" + tx_id`. Rebuilt in full by `compute` (a chain scan) or kept
//! current incrementally by `update` as each block lands.

use crate::blockchain::block::Block;
use crate::blockchain::transaction::TxOutput;
use crate::crypto::hash::Hash;
use crate::database::chain_store::ChainStore;
use crate::error::{NodeError, Result};
use std::path::Path;

const KEY_PREFIX: &[u8] = b"utxo-";

/// Badger's (the reference store's) cap on keys deleted in a single
/// transaction; carried over so a full `compute()` rebuild on a large
/// chain does not attempt an unbounded transaction.
const DELETE_BATCH_SIZE: usize = 100_000;

pub struct UtxoIndex {
    db: sled::Db,
}

impl UtxoIndex {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            db: crate::database::open_with_retry(path)?,
        })
    }

    fn key(tx_id: &Hash) -> Vec<u8> {
        let mut key = KEY_PREFIX.to_vec();
        key.extend_from_slice(tx_id.as_bytes());
        key
    }

    fn get(&self, tx_id: &Hash) -> Result<Option<Vec<TxOutput>>> {
        match self.db.get(Self::key(tx_id)).map_err(NodeError::from)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn set(&self, tx_id: &Hash, outputs: &[TxOutput]) -> Result<()> {
        let bytes = bincode::serialize(outputs)?;
        self.db.insert(Self::key(tx_id), bytes).map_err(NodeError::from)?;
        Ok(())
    }

    /// Finds enough unspent outputs locked to `pub_key_hash` to cover
    /// `amount`, stopping as soon as the accumulated value is sufficient
    /// (it may include more than strictly required, mirroring the
    /// reference implementation's greedy selection).
    pub fn find_spendable(
        &self,
        pub_key_hash: &[u8],
        amount: f64,
    ) -> Result<(f64, Vec<(Hash, i64)>)> {
        let mut accumulated = 0.0;
        let mut outputs = Vec::new();

        'scan: for entry in self.db.scan_prefix(KEY_PREFIX) {
            let (key, value) = entry.map_err(NodeError::from)?;
            let tx_id = Hash::from_slice(&key[KEY_PREFIX.len()..])?;
            let tx_outputs: Vec<TxOutput> = bincode::deserialize(&value)?;

            for (idx, out) in tx_outputs.iter().enumerate() {
                if out.is_locked_with(pub_key_hash) && accumulated < amount {
                    accumulated += out.value;
                    outputs.push((tx_id, idx as i64));
                    if accumulated >= amount {
                        break 'scan;
                    }
                }
            }
        }

        Ok((accumulated, outputs))
    }

    pub fn find_unspent(&self, pub_key_hash: &[u8]) -> Result<Vec<TxOutput>> {
        let mut unspent = Vec::new();
        for entry in self.db.scan_prefix(KEY_PREFIX) {
            let (_, value) = entry.map_err(NodeError::from)?;
            let outs: Vec<TxOutput> = bincode::deserialize(&value)?;
            unspent.extend(outs.into_iter().filter(|o| o.is_locked_with(pub_key_hash)));
        }
        Ok(unspent)
    }

    pub fn count(&self) -> Result<usize> {
        Ok(self.db.scan_prefix(KEY_PREFIX).count())
    }

    /// Drops every indexed entry in batches of `DELETE_BATCH_SIZE` keys.
    fn clear(&self) -> Result<()> {
        let mut batch_keys = Vec::with_capacity(DELETE_BATCH_SIZE);
        for entry in self.db.scan_prefix(KEY_PREFIX) {
            let (key, _) = entry.map_err(NodeError::from)?;
            batch_keys.push(key);
            if batch_keys.len() == DELETE_BATCH_SIZE {
                self.delete_batch(&batch_keys)?;
                batch_keys.clear();
            }
        }
        if !batch_keys.is_empty() {
            self.delete_batch(&batch_keys)?;
        }
        Ok(())
    }

    fn delete_batch(&self, keys: &[sled::IVec]) -> Result<()> {
        let mut batch = sled::Batch::default();
        for key in keys {
            batch.remove(key.clone());
        }
        self.db.apply_batch(batch).map_err(NodeError::from)
    }

    /// Full rebuild by scanning the entire chain. Expensive; used at
    /// startup when the index is missing or known stale.
    pub fn compute(&self, chain: &ChainStore) -> Result<()> {
        self.clear()?;
        for (tx_id, outputs) in chain.find_utxo()? {
            self.set(&tx_id, &outputs)?;
        }
        Ok(())
    }

    /// Applies one new block incrementally: removes outputs the block's
    /// transactions spend, and adds the outputs it creates. Far cheaper
    /// than `compute` and is what the mining/sync path uses per block.
    pub fn update(&self, block: &Block) -> Result<()> {
        for tx in &block.transactions {
            if !tx.is_coinbase() {
                for input in &tx.inputs {
                    let remaining: Vec<TxOutput> = self
                        .get(&input.prev_tx_id)?
                        .unwrap_or_default()
                        .into_iter()
                        .enumerate()
                        .filter(|(idx, _)| *idx as i64 != input.out_index)
                        .map(|(_, out)| out)
                        .collect();

                    if remaining.is_empty() {
                        self.db
                            .remove(Self::key(&input.prev_tx_id))
                            .map_err(NodeError::from)?;
                    } else {
                        self.set(&input.prev_tx_id, &remaining)?;
                    }
                }
            }
            self.set(&tx.id, &tx.outputs)?;
        }
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush().map_err(NodeError::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::transaction::Transaction;
    use crate::crypto::address::hash_public_key;
    use crate::crypto::keys::KeyPair;
    use tempfile::tempdir;

    fn open_pair() -> (tempfile::TempDir, ChainStore, tempfile::TempDir, UtxoIndex) {
        let chain_dir = tempdir().unwrap();
        let chain = ChainStore::open(chain_dir.path()).unwrap();
        let utxo_dir = tempdir().unwrap();
        let utxo = UtxoIndex::open(utxo_dir.path()).unwrap();
        (chain_dir, chain, utxo_dir, utxo)
    }

    #[test]
    fn compute_indexes_genesis_output() {
        let (_cd, chain, _ud, utxo) = open_pair();
        let keypair = KeyPair::generate();
        let hash = hash_public_key(&keypair.public_key());
        chain.init_genesis(&hash, 8).unwrap();

        utxo.compute(&chain).unwrap();
        assert_eq!(utxo.count().unwrap(), 1);
        let (accumulated, spendable) = utxo.find_spendable(&hash, 10.0).unwrap();
        assert!(accumulated >= 10.0);
        assert_eq!(spendable.len(), 1);
    }

    #[test]
    fn update_moves_spent_output_to_new_owner() {
        let (_cd, chain, _ud, utxo) = open_pair();
        let sender = KeyPair::generate();
        let receiver = KeyPair::generate();
        let sender_hash = hash_public_key(&sender.public_key());
        let receiver_hash = hash_public_key(&receiver.public_key());

        let genesis = chain.init_genesis(&sender_hash, 8).unwrap();
        utxo.compute(&chain).unwrap();

        let spendable = vec![(genesis.transactions[0].id, 0i64)];
        let mut tx = Transaction::build(
            &sender.public_key(),
            receiver_hash.to_vec(),
            20.0,
            &spendable,
            genesis.transactions[0].outputs[0].value,
            sender_hash.to_vec(),
        )
        .unwrap();
        chain.sign_tx(&sender, &mut tx).unwrap();
        let block = chain.mine_block(vec![tx], 8).unwrap();
        utxo.update(&block).unwrap();

        let sender_unspent = utxo.find_unspent(&sender_hash).unwrap();
        assert!(sender_unspent.is_empty());
        let receiver_unspent = utxo.find_unspent(&receiver_hash).unwrap();
        assert_eq!(receiver_unspent.len(), 1);
    }
}
