//! Core of a small peer-to-peer cryptocurrency node: an append-only block
//! chain, UTXO-accounted signed transactions, fixed-difficulty
//! proof-of-work mining, and a gossip network tying nodes together.

pub mod blockchain;
pub mod config;
pub mod consensus;
pub mod crypto;
pub mod database;
pub mod error;
pub mod network;
pub mod wallet;

pub use blockchain::{Block, Transaction};
pub use config::Config;
pub use database::{ChainStore, UtxoIndex};
pub use error::{NodeError, Result};
pub use network::Node;
pub use wallet::{Wallet, WalletStore};
