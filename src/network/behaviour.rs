//! Composed libp2p behaviour: gossipsub carries the three topics, mdns
//! finds peers on the local network without a bootstrap list or DHT (the
//! reference node instead runs a Kademlia DHT with a rendezvous string;
//! mdns is the idiomatic libp2p substitute for a local-first node and is
//! what the rest of this crate's corpus reaches for alongside gossipsub).

use libp2p::{gossipsub, identify, mdns, swarm::NetworkBehaviour};

#[derive(NetworkBehaviour)]
pub struct LedgerBehaviour {
    pub gossipsub: gossipsub::Behaviour,
    pub mdns: mdns::tokio::Behaviour,
    pub identify: identify::Behaviour,
}

pub fn gossipsub_config() -> gossipsub::Config {
    gossipsub::ConfigBuilder::default()
        .validation_mode(gossipsub::ValidationMode::Permissive)
        .message_id_fn(|message: &gossipsub::Message| {
            use sha2::{Digest, Sha256};
            gossipsub::MessageId::from(Sha256::digest(&message.data).to_vec())
        })
        .build()
        .expect("static gossipsub config is valid")
}
