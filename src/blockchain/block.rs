//! Block structure and construction.

use crate::blockchain::transaction::Transaction;
use crate::config::MINING_REWARD;
use crate::consensus::pow::{self, ProofOfWork};
use crate::crypto::hash::Hash;
use crate::crypto::merkle::MerkleTree;
use crate::error::{NodeError, Result};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub const GENESIS_COINBASE_DATA: &str = "genesis block";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Block {
    pub timestamp: i64,
    pub prev_block_hash: Hash,
    pub hash: Hash,
    pub transactions: Vec<Transaction>,
    pub nonce: i64,
    pub height: u64,
    pub difficulty: u32,
}

impl Block {
    /// Builds and mines a new block on top of `prev_block_hash`. Runs
    /// proof-of-work to completion before returning — callers that need to
    /// interrupt mining (the network event loop) poll `ProofOfWork` directly
    /// instead of calling this.
    pub fn new(
        transactions: Vec<Transaction>,
        prev_block_hash: Hash,
        height: u64,
        difficulty: u32,
    ) -> Result<Self> {
        let timestamp = now_unix();
        let merkle_root = merkle_root(&transactions)?;
        let (nonce, hash) =
            ProofOfWork::new(difficulty).mine(&merkle_root, prev_block_hash.as_ref(), timestamp)?;

        Ok(Self {
            timestamp,
            prev_block_hash,
            hash,
            transactions,
            nonce,
            height,
            difficulty,
        })
    }

    pub fn genesis(coinbase: Transaction, difficulty: u32) -> Result<Self> {
        Self::new(vec![coinbase], Hash::zero(), 1, difficulty)
    }

    pub fn merkle_root(&self) -> Result<[u8; 32]> {
        merkle_root(&self.transactions)
    }

    /// Re-runs the proof-of-work check; used by the chain store and the
    /// network layer before accepting a block received from a peer.
    pub fn has_valid_proof(&self) -> Result<bool> {
        let merkle_root = self.merkle_root()?;
        Ok(pow::digest_meets_target(
            &merkle_root,
            self.prev_block_hash.as_ref(),
            self.timestamp,
            self.nonce,
            self.difficulty,
        ))
    }

    pub fn is_genesis(&self) -> bool {
        self.prev_block_hash.is_zero()
    }
}

fn merkle_root(transactions: &[Transaction]) -> Result<[u8; 32]> {
    if transactions.is_empty() {
        return Err(NodeError::Invariant(
            "block must contain at least a coinbase transaction".to_string(),
        ));
    }
    let leaves: Vec<Vec<u8>> = transactions
        .iter()
        .map(|tx| bincode::serialize(tx).map_err(NodeError::from))
        .collect::<Result<_>>()?;
    let tree = MerkleTree::new(&leaves)
        .map_err(|e| NodeError::Invariant(format!("merkle tree construction failed: {e}")))?;
    Ok(tree.root())
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs() as i64
}

pub fn coinbase_reward() -> f64 {
    MINING_REWARD
}
