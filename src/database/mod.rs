pub mod chain_store;
pub mod utxo_index;

pub use chain_store::ChainStore;
pub use utxo_index::UtxoIndex;

use crate::error::{NodeError, Result};
use std::path::Path;
use std::time::Duration;

/// Opens a sled store at `path`, retrying once on a lock conflict. Shared
/// by the chain store and UTXO index, both of which own a sled instance.
pub(crate) fn open_with_retry(path: &Path) -> Result<sled::Db> {
    match sled::open(path) {
        Ok(db) => Ok(db),
        Err(first_err) => {
            tracing::warn!(error = %first_err, path = %path.display(), "db open failed, retrying once");
            std::thread::sleep(Duration::from_millis(50));
            sled::open(path).map_err(|retry_err| {
                NodeError::Database(format!(
                    "failed to open db at {} after retry: {retry_err} (initial error: {first_err})",
                    path.display()
                ))
            })
        }
    }
}
