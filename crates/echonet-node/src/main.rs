//! Echo-Net node binary.
//!
//! Runs a local node, optionally with simulated peers on the same in-memory
//! bus, and serves the HTTP API until Ctrl-C.

use anyhow::Context;
use clap::Parser;
use echonet_node::api::{create_router, AppState};
use echonet_node::observability::{init_logging, LogFormat};
use echonet_node::{EchoNode, NodeConfig};
use echonet_p2p::MemoryBus;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

/// Echo-Net node: secure messaging and echo consensus
#[derive(Parser, Debug)]
#[command(name = "echonet-node")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long, env = "ECHONET_CONFIG")]
    config: Option<PathBuf>,

    /// Local node id
    #[arg(long)]
    node_id: Option<String>,

    /// Transport address
    #[arg(long)]
    transport: Option<String>,

    /// API listen address
    #[arg(long)]
    api_addr: Option<SocketAddr>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Simulated peer to run on the same bus (repeatable)
    #[arg(long = "peer")]
    peers: Vec<String>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

impl Args {
    fn apply(self, config: &mut NodeConfig) {
        if let Some(node_id) = self.node_id {
            config.node_id = node_id;
        }
        if let Some(transport) = self.transport {
            config.transport = transport;
        }
        if let Some(api_addr) = self.api_addr {
            config.api_addr = api_addr;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        if self.json_logs {
            config.log_format = "json".into();
        }
        if !self.peers.is_empty() {
            config.simulated_peers = self.peers;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let print_config = args.print_config;
    let mut config = NodeConfig::load(args.config.as_deref()).context("loading configuration")?;
    args.apply(&mut config);
    config.validate().context("validating configuration")?;

    if print_config {
        print!("{}", config.to_yaml()?);
        return Ok(());
    }

    init_logging(&config.log_level, LogFormat::parse(&config.log_format));
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting Echo-Net node");

    let bus = MemoryBus::new();
    let local = Arc::new(
        EchoNode::new(config.node_settings(config.local_id()?)?, Arc::new(bus.transport()))
            .context("creating local node")?,
    );
    local
        .connect(&config.transport)
        .await
        .context("joining network")?;

    let mut peers = Vec::with_capacity(config.simulated_peers.len());
    for raw in &config.simulated_peers {
        let id = raw.parse().with_context(|| format!("simulated peer {raw}"))?;
        let peer = EchoNode::new(config.node_settings(id)?, Arc::new(bus.transport()))
            .with_context(|| format!("creating simulated peer {raw}"))?;
        peer.connect(&config.transport)
            .await
            .with_context(|| format!("connecting simulated peer {raw}"))?;
        peers.push(peer);
    }

    tracing::info!(
        node_id = %local.node_id(),
        api_addr = %config.api_addr,
        transport = %config.transport,
        simulated_peers = peers.len(),
        "node ready"
    );

    let app = create_router(AppState {
        node: Arc::clone(&local),
    });
    let listener = tokio::net::TcpListener::bind(config.api_addr)
        .await
        .with_context(|| format!("binding {}", config.api_addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving API")?;

    tracing::info!("shutting down");
    for peer in &peers {
        if let Err(e) = peer.disconnect().await {
            tracing::warn!(node_id = %peer.node_id(), error = %e, "disconnect failed");
        }
    }
    local.disconnect().await.context("leaving network")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl-C");
    }
}
