//! Divachain node entry point.
//!
//! Configuration precedence: config file, then `DIVA_*` environment
//! variables, then CLI flags.

use clap::Parser;
use diva_chain::{genesis, BlockFactory, Chain, FactoryConfig};
use diva_node::api::{self, AppState};
use diva_node::config::Config;
use diva_node::core::Core;
use diva_node::feed;
use diva_node::observability::{init_logging, LogFormat};
use diva_node::state::NodeState;
use diva_node::transport;
use diva_node::wallet::Wallet;
use diva_store::RocksDbBlockStore;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};

/// Divachain validator node
#[derive(Parser, Debug)]
#[command(name = "diva-node")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Overlay address (overrides config file and env)
    #[arg(long)]
    ip: Option<String>,

    /// Overlay port
    #[arg(long)]
    port: Option<u16>,

    /// HTTP admin port
    #[arg(long)]
    http: Option<u16>,

    /// WebSocket block feed port
    #[arg(long)]
    port_block_feed: Option<u16>,

    /// Path to the genesis document
    #[arg(long)]
    genesis: Option<PathBuf>,

    /// Sync and self-register on startup
    #[arg(long)]
    bootstrap: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log format (json, pretty)
    #[arg(long, default_value = "pretty")]
    log_format: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = if args.config.exists() {
        Config::from_file(&args.config)?
    } else {
        Config::default()
    };
    config.merge_env()?;

    if let Some(ip) = args.ip {
        config.ip = ip;
    }
    if let Some(port) = args.port {
        config.port = port;
        config.udp = port;
    }
    if let Some(http) = args.http {
        config.http = http;
    }
    if let Some(feed_port) = args.port_block_feed {
        config.port_block_feed = feed_port;
    }
    if let Some(genesis_path) = args.genesis {
        config.path_genesis = genesis_path;
    }
    if args.bootstrap {
        config.bootstrap = true;
    }

    config.validate()?;
    init_logging(&args.log_level, LogFormat::parse(&args.log_format));

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        ip = %config.ip,
        port = config.port,
        http = config.http,
        feed = config.port_block_feed,
        bootstrap = config.bootstrap,
        "starting divachain node"
    );

    // Key material: fatal at startup if unreadable.
    let wallet = Wallet::open(&config.path_keys, &config.key_ident())?;

    // Chain: genesis document plus the persistent store.
    let genesis_block = genesis::load(&config.path_genesis)?;
    let store = RocksDbBlockStore::open(&config.path_blockstore)?;
    let chain = Chain::open(store, genesis_block)?;

    tracing::info!(
        height = chain.height(),
        validators = chain.registry().len(),
        "chain opened"
    );

    let factory = BlockFactory::new(
        chain,
        wallet.clone(),
        FactoryConfig {
            version: genesis::BLOCK_VERSION,
            p2p_interval_ms: config.network_p2p_interval_ms,
        },
    );

    // Overlay transport.
    let bind: SocketAddr = format!("{}:{}", config.ip, config.udp)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid udp bind address: {e}"))?;
    let (out, inbound, peers) = transport::start(bind, 1_024).await?;

    // Copy-out snapshots and channels.
    let state = Arc::new(NodeState::new(
        wallet.public_key(),
        factory.chain().tip().clone(),
    ));
    let (blocks_tx, _) = broadcast::channel(64);
    let (api_tx, api_rx) = mpsc::channel(256);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Core executor.
    let core = Core::new(
        factory,
        wallet.clone(),
        config.clone(),
        out,
        peers.clone(),
        state.clone(),
        blocks_tx.clone(),
    );
    let core_handle = tokio::spawn(core.run(inbound, api_rx, shutdown_rx));

    // Block feed.
    let feed_addr: SocketAddr = format!("{}:{}", config.ip, config.port_block_feed)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid feed address: {e}"))?;
    let feed_blocks = blocks_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = feed::serve(feed_addr, feed_blocks).await {
            tracing::error!(error = %e, "block feed failed");
        }
    });

    // Admin API.
    let token = api::load_or_create_token(&config.path_state)?;
    let app = AppState {
        state,
        commands: api_tx,
        peers,
        token,
    };
    let api_addr: SocketAddr = format!("{}:{}", config.ip, config.http)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid http address: {e}"))?;
    tokio::spawn(async move {
        if let Err(e) = api::serve(api_addr, app).await {
            tracing::error!(error = %e, "admin api failed");
        }
    });

    tracing::info!("node startup complete");

    shutdown_signal().await;
    tracing::info!("shutdown signal received");

    // Stop the core executor; the wallet key zeroizes on drop and the
    // store flushes when the factory is dropped with it.
    let _ = shutdown_tx.send(true);
    let _ = core_handle.await;
    wallet.close();

    tracing::info!("divachain node stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install ctrl-c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install sigterm handler");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
