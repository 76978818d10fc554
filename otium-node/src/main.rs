use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use otium_core::{Block, Chain, Mempool, PrivateKey, PublicKey, Transaction, KEY_SIZE, TXS_SIZE};
use otium_net::{Message, MsgType, NetConfig, Node};
use tokio::signal;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Message type carrying one serialized transaction.
const MSG_TX: MsgType = 1;

/// Message type carrying one serialized block.
const MSG_BLOCK: MsgType = 2;

/// Command-line arguments for the Otium node.
#[derive(Parser, Debug)]
#[command(name = "otium", about = "Otium permissioned blockchain node", version)]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:27500")]
    listen: String,

    /// Addresses of peers to connect to on startup.
    #[arg(long)]
    peers: Vec<String>,

    /// Validator seed (32 bytes hex). A fresh keypair is generated when
    /// omitted.
    #[arg(long)]
    seed: Option<String>,

    /// Hex public keys forming the validator set. The local key is
    /// always included.
    #[arg(long)]
    validators: Vec<String>,

    /// Generate a validator keypair, print it, and exit.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    generate_key: bool,
}

/// State shared by the gossip handlers. Handlers run serialized under
/// the node's route mutex; the inner mutexes make the sharing sound.
struct NodeCtx {
    chain: Mutex<Chain>,
    mempool: Mutex<Mempool>,
    key: PrivateKey,
    validators: Vec<PublicKey>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    if args.generate_key {
        let key = PrivateKey::generate();
        println!("seed:    {}", hex::encode(key.to_seed()));
        println!("pubkey:  {}", hex::encode(key.public().to_bytes()));
        println!("address: {}", key.public().address());
        return Ok(());
    }

    let key = match &args.seed {
        Some(seed_hex) => parse_seed(seed_hex)?,
        None => {
            let key = PrivateKey::generate();
            warn!(
                seed = %hex::encode(key.to_seed()),
                "no --seed given; generated an ephemeral validator key"
            );
            key
        }
    };

    let mut validators = args
        .validators
        .iter()
        .map(|s| parse_pubkey(s))
        .collect::<Result<Vec<_>>>()?;
    if !validators.contains(&key.public()) {
        validators.push(key.public());
    }

    let chain = Chain::new(&key, vec![]).map_err(|err| anyhow!("genesis failed: {err}"))?;
    info!(address = %key.public().address(), "chain initialized at genesis");

    let ctx = Arc::new(NodeCtx {
        chain: Mutex::new(chain),
        mempool: Mutex::new(Mempool::new()),
        key,
        validators,
    });

    let node = Node::new(NetConfig::default());
    register_handlers(&node, ctx);

    let addr = node.listen(args.listen.as_str()).await?;
    info!(%addr, "listening");

    for peer in &args.peers {
        match node.connect(peer.as_str()).await {
            Ok(conn) => info!(peer = %conn.addr(), "connected"),
            Err(err) => warn!(peer = %peer, %err, "connect failed"),
        }
    }

    signal::ctrl_c().await?;
    info!("shutting down");
    Ok(())
}

fn register_handlers(node: &Node, ctx: Arc<NodeCtx>) {
    let tx_ctx = ctx.clone();
    node.handle(MSG_TX, move |node, _conn, msg| {
        let tx = match Transaction::from_bytes(msg.body()) {
            Some(tx) => tx,
            None => {
                debug!("dropping undecodable transaction");
                return;
            }
        };
        {
            let mut mempool = tx_ctx.mempool.lock().expect("mempool lock");
            if let Err(err) = mempool.push(tx) {
                debug!(%err, "transaction not admitted");
                return;
            }
        }
        node.broadcast(msg);
        try_produce(node, &tx_ctx);
    });

    node.handle(MSG_BLOCK, move |node, _conn, msg| {
        let block = match Block::from_bytes(msg.body()) {
            Some(block) => block,
            None => {
                debug!("dropping undecodable block");
                return;
            }
        };
        let mut chain = ctx.chain.lock().expect("chain lock");
        match chain.append(block) {
            Ok(()) => {
                info!(height = %chain.length(), "block appended");
                node.broadcast(msg);
            }
            Err(err) => debug!(%err, "block rejected"),
        }
    });
}

/// Produce and broadcast a block when the mempool can fill one and the
/// lazy-interval selection picks the local validator.
fn try_produce(node: &Node, ctx: &Arc<NodeCtx>) {
    let mut chain = ctx.chain.lock().expect("chain lock");
    let mut mempool = ctx.mempool.lock().expect("mempool lock");

    if (mempool.height() as usize) < TXS_SIZE {
        return;
    }
    let selected = match chain.select_lazy(&ctx.validators) {
        Some(selected) => selected,
        None => return,
    };
    if selected != ctx.key.public() {
        return;
    }

    let mut block = Block::new(chain.last_hash());
    for tx in mempool.take(TXS_SIZE) {
        if let Err(err) = block.append(tx) {
            warn!(%err, "pending transaction skipped");
        }
    }
    if let Err(err) = block.accept(&ctx.key) {
        warn!(%err, "block acceptance failed");
        return;
    }

    let wrapped = block.wrap();
    match chain.append(block) {
        Ok(()) => {
            info!(height = %chain.length(), "produced block");
            node.broadcast(&Message::new(MSG_BLOCK, wrapped));
        }
        Err(err) => warn!(%err, "produced block rejected locally"),
    }
}

fn parse_seed(seed_hex: &str) -> Result<PrivateKey> {
    let bytes = hex::decode(seed_hex).context("seed is not hex")?;
    let seed: [u8; KEY_SIZE] = bytes
        .try_into()
        .map_err(|_| anyhow!("seed must be {KEY_SIZE} bytes"))?;
    Ok(PrivateKey::from_seed(&seed))
}

fn parse_pubkey(pub_hex: &str) -> Result<PublicKey> {
    let bytes = hex::decode(pub_hex).context("validator key is not hex")?;
    PublicKey::from_bytes(&bytes).ok_or_else(|| anyhow!("invalid validator key"))
}

fn init_tracing() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
