pub mod block;
pub mod transaction;

pub use block::{Block, GENESIS_COINBASE_DATA};
pub use transaction::{Transaction, TxInput, TxOutput};
