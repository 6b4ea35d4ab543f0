//! Mempool: pending and queued transaction buckets plus the miner
//! wait-counter, guarded the way the reference implementation's two maps and
//! `sync.WaitGroup` are — a mutex per bucket, one atomic counter.

use crate::blockchain::Transaction;
use crate::crypto::hash::Hash;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    Pending,
    Queued,
}

#[derive(Default)]
pub struct MemPool {
    pending: Mutex<HashMap<Hash, Transaction>>,
    queued: Mutex<HashMap<Hash, Transaction>>,
    wait_count: AtomicUsize,
}

impl MemPool {
    pub fn new() -> Self {
        Self::default()
    }

    fn bucket(&self, which: Bucket) -> &Mutex<HashMap<Hash, Transaction>> {
        match which {
            Bucket::Pending => &self.pending,
            Bucket::Queued => &self.queued,
        }
    }

    pub fn add(&self, tx: Transaction) {
        self.pending.lock().insert(tx.id, tx);
    }

    pub fn contains_pending(&self, tx_id: &Hash) -> bool {
        self.pending.lock().contains_key(tx_id)
    }

    /// Looks up a transaction by id in either bucket. Used to answer a
    /// peer's `getdata(tx)` request — it must see a transaction still
    /// awaiting confirmation, which the on-chain block store never holds.
    pub fn get(&self, tx_id: &Hash) -> Option<Transaction> {
        if let Some(tx) = self.pending.lock().get(tx_id) {
            return Some(tx.clone());
        }
        self.queued.lock().get(tx_id).cloned()
    }

    /// Moves `tx` from the other bucket into `target`.
    pub fn move_tx(&self, tx: Transaction, target: Bucket) {
        let id = tx.id;
        let other = match target {
            Bucket::Pending => Bucket::Queued,
            Bucket::Queued => Bucket::Pending,
        };
        self.bucket(other).lock().remove(&id);
        self.bucket(target).lock().insert(id, tx);
    }

    pub fn remove(&self, tx_id: &Hash, which: Bucket) {
        self.bucket(which).lock().remove(tx_id);
    }

    pub fn remove_from_all(&self, tx_id: &Hash) {
        self.pending.lock().remove(tx_id);
        self.queued.lock().remove(tx_id);
    }

    /// Up to `n` pending transaction ids, for replying to `gettxfrompool`.
    pub fn get_transaction_ids(&self, n: usize) -> Vec<Hash> {
        self.pending.lock().values().take(n).map(|tx| tx.id).collect()
    }

    pub fn queued_transactions(&self) -> Vec<Transaction> {
        self.queued.lock().values().cloned().collect()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn clear_all(&self) {
        self.pending.lock().clear();
        self.queued.lock().clear();
    }

    pub fn wait_incr(&self) {
        self.wait_count.fetch_add(1, Ordering::SeqCst);
    }

    pub fn wait_decr(&self) {
        self.wait_count.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn wait_count(&self) -> usize {
        self.wait_count.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::Transaction;

    fn dummy_tx(id: u8) -> Transaction {
        Transaction::coinbase(&[id; 20], "")
    }

    #[test]
    fn add_then_move_transfers_bucket() {
        let pool = MemPool::new();
        let tx = dummy_tx(1);
        pool.add(tx.clone());
        assert!(pool.contains_pending(&tx.id));

        pool.move_tx(tx.clone(), Bucket::Queued);
        assert!(!pool.contains_pending(&tx.id));
        assert_eq!(pool.queued_transactions().len(), 1);
    }

    #[test]
    fn remove_from_all_clears_both_buckets() {
        let pool = MemPool::new();
        let tx = dummy_tx(2);
        pool.add(tx.clone());
        pool.move_tx(tx.clone(), Bucket::Queued);
        pool.remove_from_all(&tx.id);
        assert!(pool.queued_transactions().is_empty());
        assert_eq!(pool.pending_len(), 0);
    }

    #[test]
    fn wait_counter_tracks_outstanding_polls() {
        let pool = MemPool::new();
        pool.wait_incr();
        pool.wait_incr();
        pool.wait_decr();
        assert_eq!(pool.wait_count(), 1);
    }

    #[test]
    fn get_reads_pending_and_queued_but_not_missing() {
        let pool = MemPool::new();
        let pending_tx = dummy_tx(3);
        let queued_tx = dummy_tx(4);
        pool.add(pending_tx.clone());
        pool.add(queued_tx.clone());
        pool.move_tx(queued_tx.clone(), Bucket::Queued);

        assert_eq!(pool.get(&pending_tx.id), Some(pending_tx));
        assert_eq!(pool.get(&queued_tx.id), Some(queued_tx));
        assert_eq!(pool.get(&Hash::zero()), None);
    }
}
