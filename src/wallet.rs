//! Wallet: a keypair plus its derived address, and the transaction-builder
//! flow that turns a spend request into a signed transaction against the
//! UTXO index. Wallet files and the keyed `{address -> wallet}` persistence
//! format are the CLI gateway's concern, not this crate's.

use crate::blockchain::Transaction;
use crate::config::CANONICAL_CHECKSUM_LEN;
use crate::crypto::address::hash_public_key;
use crate::crypto::keys::KeyPair;
use crate::crypto::Address;
use crate::database::{ChainStore, UtxoIndex};
use crate::error::{NodeError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

pub struct Wallet {
    keypair: KeyPair,
    address: Address,
}

/// On-disk shape of a single wallet entry, keyed by address in
/// `WalletStore`. Holds the raw 32-byte scalar; the public key and address
/// are re-derived on load rather than trusted from storage.
#[derive(Serialize, Deserialize)]
struct WalletRecord {
    scalar: [u8; 32],
    version: u8,
}

/// The `{address -> wallet}` file the CLI gateway persists at
/// `tmp/<instance_id>/mywallet.data`.
#[derive(Default, Serialize, Deserialize)]
pub struct WalletStore {
    wallets: HashMap<String, WalletRecord>,
}

impl WalletStore {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let bytes = std::fs::read(path)?;
        bincode::deserialize(&bytes).map_err(NodeError::from)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = bincode::serialize(self)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    pub fn add(&mut self, wallet: &Wallet) {
        self.wallets.insert(
            wallet.address().as_str().to_string(),
            WalletRecord {
                scalar: wallet.keypair.scalar(),
                version: 0x00,
            },
        );
    }

    pub fn get(&self, address: &str) -> Result<Wallet> {
        let record = self
            .wallets
            .get(address)
            .ok_or_else(|| NodeError::NotFound(format!("wallet for address {address}")))?;
        let keypair = KeyPair::from_scalar(record.scalar)?;
        let address = Address::from_public_key(&keypair.public_key(), record.version, CANONICAL_CHECKSUM_LEN);
        Ok(Wallet { keypair, address })
    }

    pub fn addresses(&self) -> Vec<String> {
        self.wallets.keys().cloned().collect()
    }
}

impl Wallet {
    pub fn generate(version: u8) -> Self {
        let keypair = KeyPair::generate();
        let address = Address::from_public_key(&keypair.public_key(), version, CANONICAL_CHECKSUM_LEN);
        Self { keypair, address }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn pub_key_hash(&self) -> [u8; 20] {
        hash_public_key(&self.keypair.public_key())
    }

    /// Builds, signs and returns a transaction moving `amount` from this
    /// wallet to `to_pub_key_hash`, per the chain's UTXO index.
    pub fn new_transaction(
        &self,
        to_pub_key_hash: Vec<u8>,
        amount: f64,
        chain: &ChainStore,
        utxo: &UtxoIndex,
    ) -> Result<Transaction> {
        let sender_hash = self.pub_key_hash();
        let (accumulated, selected) = utxo.find_spendable(&sender_hash, amount)?;
        if accumulated < amount {
            return Err(NodeError::Validation("insufficient spendable balance".to_string()));
        }

        let mut tx = Transaction::build(
            &self.keypair.public_key(),
            to_pub_key_hash,
            amount,
            &selected,
            accumulated,
            sender_hash.to_vec(),
        )?;
        chain.sign_tx(&self.keypair, &mut tx)?;
        Ok(tx)
    }

    pub fn balance(&self, utxo: &UtxoIndex) -> Result<f64> {
        let outputs = utxo.find_unspent(&self.pub_key_hash())?;
        Ok(outputs.iter().map(|o| o.value).sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn new_wallet_has_valid_address() {
        let wallet = Wallet::generate(0x00);
        assert!(wallet.address().is_valid(CANONICAL_CHECKSUM_LEN));
    }

    #[test]
    fn spends_genesis_reward_and_leaves_change() {
        let chain_dir = tempdir().unwrap();
        let chain = ChainStore::open(chain_dir.path()).unwrap();
        let utxo_dir = tempdir().unwrap();
        let utxo = UtxoIndex::open(utxo_dir.path()).unwrap();

        let sender = Wallet::generate(0x00);
        let receiver = Wallet::generate(0x00);
        chain.init_genesis(&sender.pub_key_hash(), 8).unwrap();
        utxo.compute(&chain).unwrap();

        let tx = sender
            .new_transaction(receiver.pub_key_hash().to_vec(), 5.0, &chain, &utxo)
            .unwrap();
        assert!(chain.verify_tx(&tx).unwrap());

        let block = chain.mine_block(vec![tx], 8).unwrap();
        utxo.update(&block).unwrap();

        assert_eq!(sender.balance(&utxo).unwrap(), 15.0);
        assert_eq!(receiver.balance(&utxo).unwrap(), 5.0);
    }

    #[test]
    fn wallet_store_round_trips_through_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mywallet.data");

        let wallet = Wallet::generate(0x00);
        let mut store = WalletStore::default();
        store.add(&wallet);
        store.save(&path).unwrap();

        let loaded = WalletStore::load(&path).unwrap();
        let recovered = loaded.get(wallet.address().as_str()).unwrap();
        assert_eq!(recovered.pub_key_hash(), wallet.pub_key_hash());
    }

    #[test]
    fn insufficient_funds_rejected() {
        let chain_dir = tempdir().unwrap();
        let chain = ChainStore::open(chain_dir.path()).unwrap();
        let utxo_dir = tempdir().unwrap();
        let utxo = UtxoIndex::open(utxo_dir.path()).unwrap();

        let sender = Wallet::generate(0x00);
        let receiver = Wallet::generate(0x00);
        chain.init_genesis(&sender.pub_key_hash(), 8).unwrap();
        utxo.compute(&chain).unwrap();

        let err = sender
            .new_transaction(receiver.pub_key_hash().to_vec(), 1000.0, &chain, &utxo)
            .unwrap_err();
        assert!(matches!(err, NodeError::Validation(_)));
    }
}
