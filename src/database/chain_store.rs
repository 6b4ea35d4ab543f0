//! Durable, append-only block store backed by `sled`.
//!
//! Blocks are keyed by their hash; a distinguished `"lh"` key holds the tip
//! hash. Insertion is idempotent and only advances the tip when the new
//! block's height strictly exceeds the current tip's — the heaviest chain
//! observed so far always wins, with no re-org beyond that.

use crate::blockchain::block::{Block, GENESIS_COINBASE_DATA};
use crate::blockchain::transaction::Transaction;
use crate::crypto::hash::Hash;
use crate::error::{NodeError, Result};
use arc_swap::ArcSwapOption;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

const TIP_KEY: &[u8] = b"lh";

pub struct ChainStore {
    db: sled::Db,
    tip: ArcSwapOption<Hash>,
}

impl ChainStore {
    /// Opens the store at `path`, retrying once on a lock conflict before
    /// treating it as fatal — sled holds its own lock on the directory for
    /// the life of the process, so a conflict here means another process
    /// (or a previous instance that did not shut down cleanly) is still
    /// holding it.
    pub fn open(path: &Path) -> Result<Self> {
        let db = crate::database::open_with_retry(path)?;

        let tip = db
            .get(TIP_KEY)
            .map_err(NodeError::from)?
            .map(|ivec| Hash::from_slice(&ivec))
            .transpose()?;

        Ok(Self {
            db,
            tip: ArcSwapOption::from_pointee(tip),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.tip.load().is_none()
    }

    pub fn tip_hash(&self) -> Option<Hash> {
        self.tip.load().as_deref().copied()
    }

    /// Creates the genesis block paying the mining reward to
    /// `miner_pub_key_hash` and makes it the tip. Fails if the store
    /// already has a tip.
    pub fn init_genesis(&self, miner_pub_key_hash: &[u8], difficulty: u32) -> Result<Block> {
        if !self.is_empty() {
            return Err(NodeError::Validation(
                "chain store already initialized".to_string(),
            ));
        }
        let coinbase = Transaction::coinbase(miner_pub_key_hash, GENESIS_COINBASE_DATA);
        let genesis = Block::genesis(coinbase, difficulty)?;
        self.write_block(&genesis)?;
        self.set_tip(genesis.hash)?;
        Ok(genesis)
    }

    pub fn best_height(&self) -> Result<u64> {
        match self.tip_hash() {
            Some(hash) => Ok(self.get_block(&hash)?.height),
            None => Ok(0),
        }
    }

    pub fn get_block(&self, hash: &Hash) -> Result<Block> {
        let bytes = self
            .db
            .get(hash.as_bytes())
            .map_err(NodeError::from)?
            .ok_or_else(|| NodeError::NotFound(format!("block {hash}")))?;
        bincode::deserialize(&bytes).map_err(NodeError::from)
    }

    fn write_block(&self, block: &Block) -> Result<()> {
        let bytes = bincode::serialize(block)?;
        self.db
            .insert(block.hash.as_bytes(), bytes)
            .map_err(NodeError::from)?;
        Ok(())
    }

    fn set_tip(&self, hash: Hash) -> Result<()> {
        self.db
            .insert(TIP_KEY, hash.as_bytes())
            .map_err(NodeError::from)?;
        self.tip.store(Some(Arc::new(hash)));
        Ok(())
    }

    /// Idempotent insert: a block already on disk is a no-op. Otherwise the
    /// block is written, and the tip only advances if its height exceeds
    /// the current tip's (or there is no tip yet). Returns whether the tip
    /// advanced.
    pub fn add_block(&self, block: Block) -> Result<bool> {
        if self
            .db
            .contains_key(block.hash.as_bytes())
            .map_err(NodeError::from)?
        {
            return Ok(false);
        }

        self.write_block(&block)?;

        let advance = match self.tip_hash() {
            None => true,
            Some(tip_hash) => {
                let tip_block = self.get_block(&tip_hash)?;
                block.height > tip_block.height
            }
        };

        if advance {
            self.set_tip(block.hash)?;
        }
        Ok(advance)
    }

    /// Hashes from the tip down to (exclusive of) `height`, tip first.
    pub fn block_hashes_since(&self, height: u64) -> Result<Vec<Hash>> {
        let mut hashes = Vec::new();
        for block in self.iter_from_tip() {
            let block = block?;
            if block.height <= height {
                break;
            }
            hashes.push(block.hash);
        }
        Ok(hashes)
    }

    pub fn iter_from_tip(&self) -> ChainIterator<'_> {
        ChainIterator {
            store: self,
            next_hash: self.tip_hash(),
        }
    }

    pub fn find_tx(&self, id: &Hash) -> Result<Transaction> {
        for block in self.iter_from_tip() {
            let block = block?;
            if let Some(tx) = block.transactions.into_iter().find(|tx| tx.id == *id) {
                return Ok(tx);
            }
        }
        Err(NodeError::NotFound(format!("transaction {id}")))
    }

    /// Every unspent output in the chain, grouped by owning transaction id.
    /// Used by `UtxoIndex::compute` to rebuild the secondary index from
    /// scratch; scans the whole chain so is not meant for the hot path.
    pub fn find_utxo(&self) -> Result<HashMap<Hash, Vec<crate::blockchain::transaction::TxOutput>>> {
        let mut utxo: HashMap<Hash, Vec<crate::blockchain::transaction::TxOutput>> = HashMap::new();
        let mut spent: HashMap<Hash, Vec<i64>> = HashMap::new();

        for block in self.iter_from_tip() {
            let block = block?;
            for tx in &block.transactions {
                'outputs: for (out_idx, out) in tx.outputs.iter().enumerate() {
                    if let Some(spent_indices) = spent.get(&tx.id) {
                        if spent_indices.contains(&(out_idx as i64)) {
                            continue 'outputs;
                        }
                    }
                    utxo.entry(tx.id).or_default().push(out.clone());
                }
                if !tx.is_coinbase() {
                    for input in &tx.inputs {
                        spent.entry(input.prev_tx_id).or_default().push(input.out_index);
                    }
                }
            }
        }
        Ok(utxo)
    }

    /// Builds the previous-transaction map `sign`/`verify` need by looking
    /// up every input's referenced transaction.
    pub fn prev_txs(&self, tx: &Transaction) -> Result<HashMap<Hash, Transaction>> {
        let mut map = HashMap::new();
        for input in &tx.inputs {
            if !map.contains_key(&input.prev_tx_id) {
                let prev = self.find_tx(&input.prev_tx_id)?;
                map.insert(prev.id, prev);
            }
        }
        Ok(map)
    }

    pub fn sign_tx(&self, keypair: &crate::crypto::keys::KeyPair, tx: &mut Transaction) -> Result<()> {
        let prev_txs = self.prev_txs(tx)?;
        tx.sign(keypair, &prev_txs)
    }

    pub fn verify_tx(&self, tx: &Transaction) -> Result<bool> {
        let prev_txs = self.prev_txs(tx)?;
        tx.verify(&prev_txs)
    }

    /// Runs proof-of-work over `transactions`, verifying each first, and
    /// appends the result as the new tip.
    pub fn mine_block(&self, transactions: Vec<Transaction>, difficulty: u32) -> Result<Block> {
        for tx in &transactions {
            if !self.verify_tx(tx)? {
                return Err(NodeError::Validation("invalid transaction in block".to_string()));
            }
        }
        let tip_hash = self.tip_hash().ok_or_else(|| {
            NodeError::Validation("cannot mine before genesis is initialized".to_string())
        })?;
        let height = self.get_block(&tip_hash)?.height + 1;
        let block = Block::new(transactions, tip_hash, height, difficulty)?;
        self.add_block(block.clone())?;
        Ok(block)
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush().map_err(NodeError::from)?;
        Ok(())
    }
}

pub struct ChainIterator<'a> {
    store: &'a ChainStore,
    next_hash: Option<Hash>,
}

impl Iterator for ChainIterator<'_> {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        let hash = self.next_hash.take()?;
        match self.store.get_block(&hash) {
            Ok(block) => {
                if !block.is_genesis() {
                    self.next_hash = Some(block.prev_block_hash);
                }
                Some(Ok(block))
            }
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::address::hash_public_key;
    use crate::crypto::keys::KeyPair;
    use tempfile::tempdir;

    #[test]
    fn genesis_initializes_tip_at_height_one() {
        let dir = tempdir().unwrap();
        let store = ChainStore::open(dir.path()).unwrap();
        let keypair = KeyPair::generate();
        let hash = hash_public_key(&keypair.public_key());
        let genesis = store.init_genesis(&hash, 8).unwrap();
        assert_eq!(store.best_height().unwrap(), 1);
        assert_eq!(store.tip_hash().unwrap(), genesis.hash);
    }

    #[test]
    fn add_block_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = ChainStore::open(dir.path()).unwrap();
        let keypair = KeyPair::generate();
        let hash = hash_public_key(&keypair.public_key());
        let genesis = store.init_genesis(&hash, 8).unwrap();
        assert!(!store.add_block(genesis).unwrap());
        assert_eq!(store.best_height().unwrap(), 1);
    }

    #[test]
    fn add_block_only_advances_tip_on_greater_height() {
        let dir = tempdir().unwrap();
        let store = ChainStore::open(dir.path()).unwrap();
        let keypair = KeyPair::generate();
        let hash = hash_public_key(&keypair.public_key());
        let genesis = store.init_genesis(&hash, 8).unwrap();

        let coinbase_2 = Transaction::coinbase(&hash, "block 2");
        let block_2 = Block::new(vec![coinbase_2], genesis.hash, 2, 8).unwrap();
        assert!(store.add_block(block_2.clone()).unwrap());
        assert_eq!(store.tip_hash().unwrap(), block_2.hash);

        // A stale block at a lower height than tip must not move the tip back.
        let stale_coinbase = Transaction::coinbase(&hash, "stale");
        let stale = Block::new(vec![stale_coinbase], genesis.hash, 1, 8).unwrap();
        assert!(!store.add_block(stale).unwrap());
        assert_eq!(store.tip_hash().unwrap(), block_2.hash);
    }

    #[test]
    fn find_tx_walks_chain_back_to_genesis() {
        let dir = tempdir().unwrap();
        let store = ChainStore::open(dir.path()).unwrap();
        let keypair = KeyPair::generate();
        let hash = hash_public_key(&keypair.public_key());
        let genesis = store.init_genesis(&hash, 8).unwrap();

        let found = store.find_tx(&genesis.transactions[0].id).unwrap();
        assert_eq!(found.id, genesis.transactions[0].id);
    }

    #[test]
    fn find_utxo_excludes_spent_outputs() {
        let dir = tempdir().unwrap();
        let store = ChainStore::open(dir.path()).unwrap();
        let sender = KeyPair::generate();
        let receiver = KeyPair::generate();
        let sender_hash = hash_public_key(&sender.public_key());
        let receiver_hash = hash_public_key(&receiver.public_key());
        let genesis = store.init_genesis(&sender_hash, 8).unwrap();

        let spendable = vec![(genesis.transactions[0].id, 0i64)];
        let mut tx = Transaction::build(
            &sender.public_key(),
            receiver_hash.to_vec(),
            5.0,
            &spendable,
            genesis.transactions[0].outputs[0].value,
            sender_hash.to_vec(),
        )
        .unwrap();
        store.sign_tx(&sender, &mut tx).unwrap();
        store.mine_block(vec![tx.clone()], 8).unwrap();

        let utxo = store.find_utxo().unwrap();
        assert!(!utxo.contains_key(&genesis.transactions[0].id));
        assert!(utxo.contains_key(&tx.id));
    }
}
