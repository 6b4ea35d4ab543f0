//! Gossip network: wire protocol, mempool, libp2p behaviour, and the node
//! event loop that ties them to the chain store and UTXO index.

pub mod behaviour;
pub mod mempool;
pub mod node;
pub mod protocol;

pub use behaviour::LedgerBehaviour;
pub use mempool::MemPool;
pub use node::Node;
pub use protocol::{Command, Envelope, Topic};
