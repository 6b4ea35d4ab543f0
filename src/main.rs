//! Command-line gateway: wires the chain store, UTXO index and wallet
//! store together behind the operations section 6 names (`init`,
//! `new_wallet`, `balance`, `compute_utxos`, `print_chain`, `send`,
//! `start_node`). A JSON-RPC gateway exposing the same operations over TCP
//! port 5000 is out of scope for this binary.

use clap::{Parser, Subcommand};
use ledgerd::config::Config;
use ledgerd::crypto::Address;
use ledgerd::database::{ChainStore, UtxoIndex};
use ledgerd::error::Result;
use ledgerd::network::Node;
use ledgerd::wallet::{Wallet, WalletStore};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ledgerd", about = "Minimal peer-to-peer blockchain node")]
struct Cli {
    /// Distinguishes this instance's data and wallet directories under
    /// `tmp/`, matching the reference CLI's `instance_id` convention.
    #[arg(long, default_value = "default")]
    instance: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Creates the genesis block paying the mining reward to `address`.
    Init { address: String },
    /// Generates a wallet and prints its address.
    NewWallet,
    /// Prints the balance of `address`.
    Balance { address: String },
    /// Rebuilds the UTXO index from the full chain.
    ComputeUtxos,
    /// Prints every block from the tip back to genesis.
    PrintChain,
    /// Sends `amount` from `from` to `to`, optionally mining immediately.
    Send {
        from: String,
        to: String,
        amount: f64,
        #[arg(long)]
        mine_now: bool,
    },
    /// Starts the gossip node.
    StartNode {
        #[arg(long)]
        miner: bool,
        #[arg(long)]
        full_node: bool,
        #[arg(long)]
        miner_address: Option<String>,
    },
}

fn instance_paths(instance: &str) -> (PathBuf, PathBuf) {
    let root = PathBuf::from("tmp").join(format!("blocks_{instance}"));
    let wallet_file = PathBuf::from("tmp").join(instance).join("mywallet.data");
    (root, wallet_file)
}

fn parse_address(address: &str, checksum_len: usize) -> Result<[u8; 20]> {
    let address = Address::from_encoded(address);
    let hash = address.pub_key_hash(checksum_len)?;
    let mut out = [0u8; 20];
    out.copy_from_slice(&hash);
    Ok(out)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let (data_dir, wallet_path) = instance_paths(&cli.instance);
    let mut config = Config::new(data_dir);
    config.validate();
    let checksum_len = config.crypto.address_checksum_len;

    match cli.command {
        Commands::Init { address } => {
            let chain = ChainStore::open(&config.chain_store_path())?;
            let pub_key_hash = parse_address(&address, checksum_len)?;
            let genesis = chain.init_genesis(&pub_key_hash, config.mining.difficulty)?;
            let utxo = UtxoIndex::open(&config.utxo_index_path())?;
            utxo.compute(&chain)?;
            println!("genesis block {} at height {}", genesis.hash, genesis.height);
        }
        Commands::NewWallet => {
            let wallet = Wallet::generate(config.crypto.address_version);
            let mut store = WalletStore::load(&wallet_path)?;
            store.add(&wallet);
            store.save(&wallet_path)?;
            println!("{}", wallet.address());
        }
        Commands::Balance { address } => {
            let store = WalletStore::load(&wallet_path)?;
            let wallet = store.get(&address)?;
            let utxo = UtxoIndex::open(&config.utxo_index_path())?;
            println!("{:.8}", wallet.balance(&utxo)?);
        }
        Commands::ComputeUtxos => {
            let chain = ChainStore::open(&config.chain_store_path())?;
            let utxo = UtxoIndex::open(&config.utxo_index_path())?;
            utxo.compute(&chain)?;
            println!("indexed {} unspent entries", utxo.count()?);
        }
        Commands::PrintChain => {
            let chain = ChainStore::open(&config.chain_store_path())?;
            for block in chain.iter_from_tip() {
                let block = block?;
                println!(
                    "height={} hash={} prev={} txs={}",
                    block.height,
                    block.hash,
                    block.prev_block_hash,
                    block.transactions.len()
                );
            }
        }
        Commands::Send { from, to, amount, mine_now } => {
            let store = WalletStore::load(&wallet_path)?;
            let sender = store.get(&from)?;
            let to_pub_key_hash = parse_address(&to, checksum_len)?;

            let chain = ChainStore::open(&config.chain_store_path())?;
            let utxo = UtxoIndex::open(&config.utxo_index_path())?;
            let tx = sender.new_transaction(to_pub_key_hash.to_vec(), amount, &chain, &utxo)?;

            if mine_now {
                let coinbase = ledgerd::blockchain::Transaction::coinbase(&sender.pub_key_hash(), "");
                let block = chain.mine_block(vec![tx, coinbase], config.mining.difficulty)?;
                utxo.update(&block)?;
                println!("mined block {} at height {}", block.hash, block.height);
            } else {
                println!(
                    "built transaction {} (broadcast via start_node to relay it)",
                    tx.id
                );
            }
        }
        Commands::StartNode { miner, full_node, miner_address } => {
            let chain = std::sync::Arc::new(ChainStore::open(&config.chain_store_path())?);
            let utxo = std::sync::Arc::new(UtxoIndex::open(&config.utxo_index_path())?);
            let miner_pub_key_hash = match miner_address {
                Some(addr) => parse_address(&addr, checksum_len)?.to_vec(),
                None => Vec::new(),
            };
            let node = Node::new(&config, chain, utxo, miner, full_node, miner_pub_key_hash).await?;
            node.run().await?;
        }
    }

    Ok(())
}
