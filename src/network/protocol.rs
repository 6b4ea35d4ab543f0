//! Wire protocol: topics, the envelope every gossip message travels in, and
//! the command set carried in its payload.
//!
//! A payload is `command[20] ‖ bincode-encoded-struct`: `command` is the
//! ASCII command name zero-padded to 20 bytes (the reference implementation
//! gob-encodes the struct; this crate uses `bincode` throughout instead, see
//! the design notes on trimmed-copy signing for the same substitution).
//! REDESIGN FLAGS ask for the tag to be decoded once at the gossipsub
//! ingress boundary into a single typed `Command` enum rather than re-parsed
//! by each handler, so that is what `Envelope::decode` produces.

use crate::blockchain::{Block, Transaction};
use crate::crypto::hash::Hash as TxHash;
use crate::error::{NodeError, Result};
use serde::{Deserialize, Serialize};

pub const COMMAND_LENGTH: usize = 20;

/// The three pub/sub topics the node joins. Subscription gates delivery;
/// any node may publish on any topic regardless of its own subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    General,
    Mining,
    FullNodes,
}

impl Topic {
    pub fn name(self) -> &'static str {
        match self {
            Topic::General => "general-channel",
            Topic::Mining => "mining-channel",
            Topic::FullNodes => "fullnodes-channel",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Version {
    pub version: u32,
    pub best_height: u64,
    pub send_from: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetBlocks {
    pub send_from: String,
    pub height: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvKind {
    Block,
    Tx,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Inv {
    pub send_from: String,
    pub kind: InvKind,
    pub items: Vec<TxHash>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetData {
    pub send_from: String,
    pub kind: InvKind,
    pub id: TxHash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockMsg {
    pub send_from: String,
    pub block: Block,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxMsg {
    pub send_from: String,
    pub transaction: Transaction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetTxFromPool {
    pub send_from: String,
    pub count: usize,
}

/// Every command this node understands, tagged by its 20-byte wire name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Command {
    Version(Version),
    GetBlocks(GetBlocks),
    Inv(Inv),
    GetData(GetData),
    Block(BlockMsg),
    Tx(TxMsg),
    GetTxFromPool(GetTxFromPool),
}

impl Command {
    fn tag(&self) -> &'static str {
        match self {
            Command::Version(_) => "version",
            Command::GetBlocks(_) => "getblocks",
            Command::Inv(_) => "inv",
            Command::GetData(_) => "getdata",
            Command::Block(_) => "block",
            Command::Tx(_) => "tx",
            Command::GetTxFromPool(_) => "gettxfrompool",
        }
    }

    /// Encodes to `command[20] ‖ payload`, the bytes published on a topic.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = vec![0u8; COMMAND_LENGTH];
        let tag = self.tag().as_bytes();
        out[..tag.len()].copy_from_slice(tag);
        out.extend(bincode::serialize(self)?);
        Ok(out)
    }

    /// Decodes a published payload back into a `Command`. The 20-byte tag is
    /// read and trailing zeros stripped, but the payload itself already
    /// carries its own variant discriminant, so the tag mainly documents the
    /// wire shape for compatibility with non-Rust peers rather than driving
    /// dispatch here.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < COMMAND_LENGTH {
            return Err(NodeError::Network("message shorter than command tag".into()));
        }
        bincode::deserialize(&bytes[COMMAND_LENGTH..]).map_err(NodeError::from)
    }
}

/// The value actually published on a topic. `send_to` empty means broadcast;
/// a non-empty `send_to` that does not match the local peer id must be
/// dropped silently by the receiver, and a message whose `send_from` is the
/// local peer id must be dropped too (no self-delivery).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub message: String,
    pub send_from: String,
    pub send_to: String,
    pub payload: Vec<u8>,
}

impl Envelope {
    pub fn new(message: impl Into<String>, send_from: impl Into<String>, send_to: impl Into<String>, command: &Command) -> Result<Self> {
        Ok(Self {
            message: message.into(),
            send_from: send_from.into(),
            send_to: send_to.into(),
            payload: command.encode()?,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| NodeError::Serialization(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| NodeError::Serialization(e.to_string()))
    }

    pub fn command(&self) -> Result<Command> {
        Command::decode(&self.payload)
    }

    /// True if this message should be processed by `local_peer_id`.
    pub fn is_for(&self, local_peer_id: &str) -> bool {
        if self.send_from == local_peer_id {
            return false;
        }
        self.send_to.is_empty() || self.send_to == local_peer_id
    }
}
