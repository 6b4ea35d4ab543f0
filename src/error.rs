use thiserror::Error;

/// Error type shared by every subsystem. Validation and NotFound are
/// expected outcomes callers recover from and log; Database, Io,
/// ChainRejected (a block that violates the acceptance rule) and Invariant
/// (a structural guarantee the rest of the crate assumes holds, e.g. a
/// transaction referencing a previous transaction that does not exist) are
/// fatal per spec section 7's honest-only failure model and tear down the
/// node.
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("chain rule violated: {0}")]
    ChainRejected(String),

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("cryptographic error: {0}")]
    Crypto(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, NodeError>;

impl From<bincode::Error> for NodeError {
    fn from(e: bincode::Error) -> Self {
        NodeError::Serialization(e.to_string())
    }
}

impl From<sled::Error> for NodeError {
    fn from(e: sled::Error) -> Self {
        NodeError::Database(e.to_string())
    }
}

impl NodeError {
    /// True for conditions spec section 7 calls fatal: the process should
    /// log, close the store, and exit rather than keep serving requests.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            NodeError::Database(_)
                | NodeError::Io(_)
                | NodeError::ChainRejected(_)
                | NodeError::Invariant(_)
        )
    }
}
