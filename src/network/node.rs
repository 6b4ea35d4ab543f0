//! Node: owns the swarm, the chain store, the UTXO index and the mempool,
//! and runs the event loop described by the protocol state machine — one
//! inbound gossipsub reader multiplexed with a miner ticker and the
//! shutdown signal, matching the single-process cooperative-task model.

use crate::config::Config;
use crate::crypto::hash::Hash;
use crate::database::{ChainStore, UtxoIndex};
use crate::error::{NodeError, Result};
#[cfg(test)]
use crate::blockchain::Block;
use crate::network::behaviour::{gossipsub_config, LedgerBehaviour, LedgerBehaviourEvent};
use crate::network::mempool::{Bucket, MemPool};
use crate::network::protocol::{
    BlockMsg, Command, Envelope, GetBlocks, GetData, GetTxFromPool, Inv, InvKind, Topic, TxMsg,
    Version,
};
use futures::StreamExt;
use libp2p::{
    gossipsub, mdns,
    swarm::{SwarmEvent, THandlerErr},
    Swarm,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};

const PROTOCOL_VERSION: u32 = 1;

pub struct Node {
    swarm: Swarm<LedgerBehaviour>,
    topics: HashMap<Topic, gossipsub::IdentTopic>,
    chain: Arc<ChainStore>,
    utxo: Arc<UtxoIndex>,
    mempool: Arc<MemPool>,
    miner: bool,
    full_node: bool,
    miner_pub_key_hash: Vec<u8>,
    blocks_in_transit: Mutex<Vec<Hash>>,
    local_peer: String,
}

impl Node {
    pub async fn new(
        config: &Config,
        chain: Arc<ChainStore>,
        utxo: Arc<UtxoIndex>,
        miner: bool,
        full_node: bool,
        miner_pub_key_hash: Vec<u8>,
    ) -> Result<Self> {
        let mempool = Arc::new(MemPool::new());

        let mut swarm = libp2p::SwarmBuilder::with_new_identity()
            .with_tokio()
            .with_tcp(
                libp2p::tcp::Config::default(),
                libp2p::noise::Config::new,
                libp2p::yamux::Config::default,
            )
            .map_err(|e| NodeError::Network(e.to_string()))?
            .with_behaviour(|key| {
                let gossipsub = gossipsub::Behaviour::new(
                    gossipsub::MessageAuthenticity::Signed(key.clone()),
                    gossipsub_config(),
                )
                .map_err(|e| e.to_string())?;
                let mdns = mdns::tokio::Behaviour::new(
                    mdns::Config::default(),
                    key.public().to_peer_id(),
                )
                .map_err(|e| e.to_string())?;
                let identify = libp2p::identify::Behaviour::new(libp2p::identify::Config::new(
                    "/ledgerd/1.0.0".to_string(),
                    key.public(),
                ));
                Ok(LedgerBehaviour { gossipsub, mdns, identify })
            })
            .map_err(|e| NodeError::Network(e.to_string()))?
            .build();

        let local_peer = swarm.local_peer_id().to_string();

        let mut topics = HashMap::new();
        for topic in [Topic::General, Topic::Mining, Topic::FullNodes] {
            let ident = gossipsub::IdentTopic::new(topic.name());
            let subscribe = match topic {
                Topic::General => true,
                Topic::Mining => miner,
                Topic::FullNodes => full_node,
            };
            if subscribe {
                swarm
                    .behaviour_mut()
                    .gossipsub
                    .subscribe(&ident)
                    .map_err(|e| NodeError::Network(e.to_string()))?;
            }
            topics.insert(topic, ident);
        }

        let listen_addr: libp2p::Multiaddr = config
            .network
            .listen_addr
            .parse()
            .map_err(|e| NodeError::Config(format!("invalid listen_addr: {e}")))?;
        swarm
            .listen_on(listen_addr)
            .map_err(|e| NodeError::Network(e.to_string()))?;

        Ok(Self {
            swarm,
            topics,
            chain,
            utxo,
            mempool,
            miner,
            full_node,
            miner_pub_key_hash,
            blocks_in_transit: Mutex::new(Vec::new()),
            local_peer,
        })
    }

    fn publish(&mut self, topic: Topic, command: &Command) -> Result<()> {
        let ident = self.topics[&topic].clone();
        let envelope = Envelope::new(command_name(command), self.local_peer.clone(), "", command)?;
        let bytes = envelope.to_bytes()?;
        match self.swarm.behaviour_mut().gossipsub.publish(ident, bytes) {
            Ok(_) | Err(gossipsub::PublishError::InsufficientPeers) => Ok(()),
            Err(e) => Err(NodeError::Network(e.to_string())),
        }
    }

    /// Lists peers currently on the general topic and, if any exist, sends
    /// our `version` to the first one — the handshake that kicks off sync.
    fn request_blocks(&mut self) -> Result<()> {
        let ident = self.topics[&Topic::General].clone();
        let peer = self
            .swarm
            .behaviour()
            .gossipsub
            .mesh_peers(&ident.hash())
            .next()
            .copied();
        if peer.is_some() {
            let best_height = self.chain.best_height()?;
            self.publish(
                Topic::General,
                &Command::Version(Version {
                    version: PROTOCOL_VERSION,
                    best_height,
                    send_from: self.local_peer.clone(),
                }),
            )?;
        }
        Ok(())
    }

    /// Runs until SIGINT/SIGTERM arrives. Closing the chain store happens
    /// exactly once on the way out, whichever branch triggers the exit.
    pub async fn run(mut self) -> Result<()> {
        self.request_blocks()?;

        let mut miner_ticker = tokio::time::interval(Duration::from_secs(1));
        let mut sigterm = signal(SignalKind::terminate()).map_err(NodeError::Io)?;
        let mut sigint = signal(SignalKind::interrupt()).map_err(NodeError::Io)?;

        let outcome: Result<()> = loop {
            tokio::select! {
                event = self.swarm.select_next_some() => {
                    if let Err(e) = self.handle_swarm_event(event) {
                        break Err(e);
                    }
                }
                _ = miner_ticker.tick(), if self.miner => {
                    self.mempool.wait_incr();
                    if let Err(e) = self.publish(get_tx_from_pool_request_topic(), &Command::GetTxFromPool(GetTxFromPool {
                        send_from: self.local_peer.clone(),
                        count: 1,
                    })) {
                        break Err(e);
                    }
                }
                _ = sigterm.recv() => {
                    tracing::info!("received SIGTERM, shutting down");
                    break Ok(());
                }
                _ = sigint.recv() => {
                    tracing::info!("received SIGINT, shutting down");
                    break Ok(());
                }
            }
        };

        self.chain.flush()?;
        self.utxo.flush()?;
        outcome
    }

    fn handle_swarm_event(
        &mut self,
        event: SwarmEvent<LedgerBehaviourEvent, THandlerErr<LedgerBehaviour>>,
    ) -> Result<()> {
        match event {
            SwarmEvent::Behaviour(LedgerBehaviourEvent::Mdns(mdns::Event::Discovered(peers))) => {
                for (peer_id, _) in peers {
                    self.swarm.behaviour_mut().gossipsub.add_explicit_peer(&peer_id);
                }
            }
            SwarmEvent::Behaviour(LedgerBehaviourEvent::Mdns(mdns::Event::Expired(peers))) => {
                for (peer_id, _) in peers {
                    self.swarm.behaviour_mut().gossipsub.remove_explicit_peer(&peer_id);
                }
            }
            SwarmEvent::Behaviour(LedgerBehaviourEvent::Gossipsub(gossipsub::Event::Message {
                message,
                ..
            })) => {
                let envelope = Envelope::from_bytes(&message.data)?;
                if !envelope.is_for(&self.local_peer) {
                    return Ok(());
                }
                let command = envelope.command()?;
                let name = command_name(&command);
                if let Err(e) = self.handle_command(command) {
                    if e.is_fatal() {
                        return Err(e);
                    }
                    tracing::warn!(command = name, error = %e, "dropping message after non-fatal error");
                }
            }
            SwarmEvent::NewListenAddr { address, .. } => {
                tracing::info!(%address, "listening");
            }
            _ => {}
        }
        Ok(())
    }

    fn handle_command(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Version(v) => self.handle_version(v),
            Command::GetBlocks(g) => self.handle_get_blocks(g),
            Command::Inv(i) => self.handle_inv(i),
            Command::GetData(g) => self.handle_get_data(g),
            Command::Block(b) => self.handle_block(b),
            Command::Tx(t) => self.handle_tx(t),
            Command::GetTxFromPool(g) => self.handle_get_tx_from_pool(g),
        }
    }

    fn handle_version(&mut self, v: Version) -> Result<()> {
        let best_height = self.chain.best_height()?;
        if best_height < v.best_height {
            self.publish(
                Topic::General,
                &Command::GetBlocks(GetBlocks {
                    send_from: self.local_peer.clone(),
                    height: best_height,
                }),
            )?;
        } else if best_height > v.best_height {
            self.publish(
                Topic::General,
                &Command::Version(Version {
                    version: PROTOCOL_VERSION,
                    best_height,
                    send_from: self.local_peer.clone(),
                }),
            )?;
        }
        Ok(())
    }

    fn handle_get_blocks(&mut self, g: GetBlocks) -> Result<()> {
        let hashes = self.chain.block_hashes_since(g.height)?;
        self.publish(
            Topic::General,
            &Command::Inv(Inv {
                send_from: self.local_peer.clone(),
                kind: InvKind::Block,
                items: hashes,
            }),
        )
    }

    fn handle_inv(&mut self, inv: Inv) -> Result<()> {
        match inv.kind {
            InvKind::Block => {
                for hash in &inv.items {
                    self.publish(
                        Topic::General,
                        &Command::GetData(GetData {
                            send_from: self.local_peer.clone(),
                            kind: InvKind::Block,
                            id: *hash,
                        }),
                    )?;
                    let mut transit = self.blocks_in_transit.lock();
                    if !transit.contains(hash) {
                        transit.push(*hash);
                    }
                }
            }
            InvKind::Tx => {
                if inv.items.is_empty() {
                    self.mempool.wait_decr();
                }
                for tx_id in &inv.items {
                    if !self.mempool.contains_pending(tx_id) {
                        self.publish(
                            Topic::General,
                            &Command::GetData(GetData {
                                send_from: self.local_peer.clone(),
                                kind: InvKind::Tx,
                                id: *tx_id,
                            }),
                        )?;
                    }
                }
            }
        }
        Ok(())
    }

    fn handle_get_data(&mut self, g: GetData) -> Result<()> {
        match g.kind {
            InvKind::Block => {
                if let Ok(block) = self.chain.get_block(&g.id) {
                    self.publish(
                        Topic::General,
                        &Command::Block(BlockMsg {
                            send_from: self.local_peer.clone(),
                            block,
                        }),
                    )?;
                }
            }
            InvKind::Tx => {
                if let Some(tx) = self.find_pending(&g.id) {
                    if self.full_node {
                        self.mempool.move_tx(tx.clone(), Bucket::Queued);
                        self.publish(
                            Topic::Mining,
                            &Command::Tx(TxMsg {
                                send_from: self.local_peer.clone(),
                                transaction: tx,
                            }),
                        )?;
                    } else {
                        self.publish(
                            Topic::FullNodes,
                            &Command::Tx(TxMsg {
                                send_from: self.local_peer.clone(),
                                transaction: tx,
                            }),
                        )?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Looks up an unconfirmed transaction by id. The on-chain block store
    /// can never hold one — a pending transaction by definition has not
    /// been mined yet — so this reads the mempool directly.
    fn find_pending(&self, tx_id: &Hash) -> Option<crate::blockchain::Transaction> {
        self.mempool.get(tx_id)
    }

    /// Validates `block` against the local tip, appends it, drops its
    /// transactions from the mempool, then either chases the next block in
    /// transit or recomputes the UTXO index from scratch.
    fn handle_block(&mut self, msg: BlockMsg) -> Result<()> {
        let block = msg.block;

        if block.is_genesis() {
            self.chain.add_block(block.clone())?;
        } else {
            let tip_hash = self
                .chain
                .tip_hash()
                .ok_or_else(|| NodeError::Validation("no local tip for a non-genesis block".into()))?;
            let tip = self.chain.get_block(&tip_hash)?;
            let accepted = tip.height + 1 == block.height && tip.hash == block.prev_block_hash;
            if !accepted {
                return Err(NodeError::ChainRejected(format!(
                    "rejected block at height {}: does not extend local tip",
                    block.height
                )));
            }
            self.chain.add_block(block.clone())?;
        }

        for tx in &block.transactions {
            self.mempool.remove_from_all(&tx.id);
        }

        tracing::info!(hash = %block.hash, "added block");

        let next = self.blocks_in_transit.lock().first().copied();
        if let Some(hash) = next {
            self.blocks_in_transit.lock().remove(0);
            self.publish(
                Topic::General,
                &Command::GetData(GetData {
                    send_from: self.local_peer.clone(),
                    kind: InvKind::Block,
                    id: hash,
                }),
            )?;
        } else {
            self.utxo.compute(&self.chain)?;
        }
        Ok(())
    }

    fn handle_tx(&mut self, msg: TxMsg) -> Result<()> {
        if !self.chain.verify_tx(&msg.transaction)? {
            return Err(NodeError::Validation("rejected invalid transaction".into()));
        }
        self.mempool.add(msg.transaction.clone());
        if self.miner {
            self.mempool.move_tx(msg.transaction, Bucket::Queued);
            self.mine_queued()?;
        }
        Ok(())
    }

    fn handle_get_tx_from_pool(&mut self, g: GetTxFromPool) -> Result<()> {
        let ids = if self.mempool.pending_len() >= g.count {
            self.mempool.get_transaction_ids(g.count)
        } else {
            Vec::new()
        };
        self.publish(
            get_tx_from_pool_reply_topic(),
            &Command::Inv(Inv {
                send_from: self.local_peer.clone(),
                kind: InvKind::Tx,
                items: ids,
            }),
        )
    }

    /// Mines every queued transaction plus a fresh coinbase into a block,
    /// broadcasts it, then clears the mempool and the poll counter.
    fn mine_queued(&mut self) -> Result<()> {
        let mut txs: Vec<_> = self
            .mempool
            .queued_transactions()
            .into_iter()
            .filter(|tx| self.chain.verify_tx(tx).unwrap_or(false))
            .collect();

        if txs.is_empty() {
            tracing::info!("no valid transactions to mine");
        }

        let coinbase = crate::blockchain::Transaction::coinbase(&self.miner_pub_key_hash, "");
        txs.push(coinbase);

        let difficulty = self.chain.get_block(
            &self.chain.tip_hash().ok_or_else(|| NodeError::Validation("no tip to mine from".into()))?,
        )?.difficulty;
        let block = self.chain.mine_block(txs, difficulty)?;
        self.utxo.compute(&self.chain)?;

        self.publish(
            Topic::General,
            &Command::Inv(Inv {
                send_from: self.local_peer.clone(),
                kind: InvKind::Block,
                items: vec![block.hash],
            }),
        )?;
        self.mempool.clear_all();
        self.mempool.wait_decr();
        Ok(())
    }

}

/// The topic a miner's own one-second mempool poll goes out on. A pure
/// miner only subscribes to `General`/`Mining`, never `FullNodes`, so this
/// must match `get_tx_from_pool_reply_topic` below or the poll's own
/// sender never sees the reply.
fn get_tx_from_pool_request_topic() -> Topic {
    Topic::FullNodes
}

/// The topic a `gettxfrompool` poll is answered on. Matches the original
/// implementation's `SendTxPoolInv`, which publishes on the mining
/// channel rather than the full-nodes channel the request itself travels
/// on — full nodes relay the poll, but it's miners who need the answer.
fn get_tx_from_pool_reply_topic() -> Topic {
    Topic::Mining
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Version(_) => "version",
        Command::GetBlocks(_) => "getblocks",
        Command::Inv(_) => "inv",
        Command::GetData(_) => "getdata",
        Command::Block(_) => "block",
        Command::Tx(_) => "tx",
        Command::GetTxFromPool(_) => "gettxfrompool",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::Transaction;
    use crate::crypto::address::hash_public_key;
    use crate::crypto::keys::KeyPair;
    use tempfile::tempdir;

    async fn test_node(chain: Arc<ChainStore>, utxo: Arc<UtxoIndex>, miner: bool, full_node: bool) -> Node {
        let config = Config::new(tempdir().unwrap().path().to_path_buf());
        Node::new(&config, chain, utxo, miner, full_node, vec![0u8; 20])
            .await
            .unwrap()
    }

    fn open_store_pair() -> (tempfile::TempDir, Arc<ChainStore>, tempfile::TempDir, Arc<UtxoIndex>) {
        let chain_dir = tempdir().unwrap();
        let chain = Arc::new(ChainStore::open(chain_dir.path()).unwrap());
        let utxo_dir = tempdir().unwrap();
        let utxo = Arc::new(UtxoIndex::open(utxo_dir.path()).unwrap());
        (chain_dir, chain, utxo_dir, utxo)
    }

    #[test]
    fn get_tx_from_pool_replies_on_the_topic_miners_are_subscribed_to() {
        // A pure miner subscribes to General and Mining only, never
        // FullNodes, so a reply published on FullNodes would never reach
        // the miner whose poll triggered it.
        assert_eq!(get_tx_from_pool_reply_topic(), Topic::Mining);
        assert_ne!(get_tx_from_pool_reply_topic(), get_tx_from_pool_request_topic());
    }

    #[tokio::test]
    async fn find_pending_reads_mempool_not_chain() {
        let (_cd, chain, _ud, utxo) = open_store_pair();
        let node = test_node(chain, utxo, false, true).await;

        let keypair = KeyPair::generate();
        let hash = hash_public_key(&keypair.public_key());
        let tx = Transaction::coinbase(&hash, "pending");
        node.mempool.add(tx.clone());

        assert_eq!(node.find_pending(&tx.id), Some(tx));
        assert_eq!(node.find_pending(&Hash::zero()), None);
    }

    #[tokio::test]
    async fn handle_block_accepts_block_extending_tip() {
        let (_cd, chain, _ud, utxo) = open_store_pair();
        let keypair = KeyPair::generate();
        let hash = hash_public_key(&keypair.public_key());
        let genesis = chain.init_genesis(&hash, 8).unwrap();

        let mut node = test_node(chain.clone(), utxo, false, false).await;

        let next_coinbase = Transaction::coinbase(&hash, "block 2");
        let next = Block::new(vec![next_coinbase], genesis.hash, 2, 8).unwrap();
        node.handle_block(BlockMsg {
            send_from: "peer-a".into(),
            block: next.clone(),
        })
        .unwrap();

        assert_eq!(chain.tip_hash().unwrap(), next.hash);
    }

    #[tokio::test]
    async fn handle_block_rejects_block_not_extending_tip() {
        let (_cd, chain, _ud, utxo) = open_store_pair();
        let keypair = KeyPair::generate();
        let hash = hash_public_key(&keypair.public_key());
        let genesis = chain.init_genesis(&hash, 8).unwrap();

        let mut node = test_node(chain.clone(), utxo, false, false).await;

        let orphan_coinbase = Transaction::coinbase(&hash, "orphan");
        let orphan = Block::new(vec![orphan_coinbase], Hash::zero(), 2, 8).unwrap();
        let err = node
            .handle_block(BlockMsg {
                send_from: "peer-a".into(),
                block: orphan,
            })
            .unwrap_err();

        assert!(err.is_fatal());
        assert_eq!(chain.tip_hash().unwrap(), genesis.hash);
    }
}
