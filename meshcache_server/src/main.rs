//! `meshcache`: run a cache node or talk to a running one.
//!
//! ```text
//! meshcache start                                   # node on 127.0.0.1:7070
//! meshcache start -c node.toml                      # start with a config file
//! meshcache start -l 127.0.0.1:7071 -p 127.0.0.1:7070  # join an existing node
//! meshcache set 127.0.0.1:7070 user:1 '{"name":"ada"}'
//! meshcache get 127.0.0.1:7071 user:1
//! meshcache status 127.0.0.1:7070
//! ```

mod client;

use std::error::Error;
use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use meshcache_core::config::CacheConfig;
use meshcache_core::log::{init_logging, log_shutdown, log_startup};
use meshcache_core::CacheNode;
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::Value;
use tracing::{info, warn};

use client::NodeClient;

type CliResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

#[derive(Parser)]
#[command(name = "meshcache", version, about = "Distributed in-memory key/value cache")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a cache node.
    Start {
        /// Path to a TOML or YAML config file.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the listen address (e.g. "127.0.0.1:7071").
        #[arg(short = 'l', long)]
        listen: Option<String>,

        /// Address other nodes should use to reach this one.
        #[arg(long)]
        advertise: Option<String>,

        /// Node(s) to join on startup. Can be specified multiple times.
        #[arg(short, long)]
        peer: Vec<String>,

        /// Virtual points per node on the hash ring.
        #[arg(long)]
        replicas: Option<usize>,
    },

    /// Read a key through a node.
    Get { node: String, key: String },

    /// Write a key through a node. Values that are not valid JSON are stored
    /// as strings.
    Set { node: String, key: String, value: String },

    /// Ask a node to admit another address into the cluster.
    Join { node: String, addr: String },

    /// Show a node's view of the cluster.
    Status { node: String },
}

#[tokio::main]
async fn main() -> CliResult<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            config,
            listen,
            advertise,
            peer,
            replicas,
        } => {
            let config = load_config(config, listen, advertise, peer, replicas)?;
            run_node(config).await
        }
        Commands::Get { node, key } => {
            let value = NodeClient::new(node).get(&key).await?;
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Commands::Set { node, key, value } => {
            NodeClient::new(node).set(&key, parse_value(value)).await?;
            println!("OK");
            Ok(())
        }
        Commands::Join { node, addr } => {
            println!("{}", NodeClient::new(node).join(&addr).await?);
            Ok(())
        }
        Commands::Status { node } => {
            let status = NodeClient::new(node).status().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
    }
}

/// Load the config file (if any) and apply command-line overrides.
fn load_config(
    path: Option<PathBuf>,
    listen: Option<String>,
    advertise: Option<String>,
    peers: Vec<String>,
    replicas: Option<usize>,
) -> CliResult<CacheConfig> {
    let mut config = match path {
        Some(path) => CacheConfig::load(&path)?,
        None => CacheConfig::default(),
    };

    if let Some(listen) = listen {
        config.node.listen_addr = listen;
    }
    if advertise.is_some() {
        config.node.advertise_addr = advertise;
    }
    config.node.seeds.extend(peers);
    if let Some(replicas) = replicas {
        config.ring.replicas = replicas;
    }

    Ok(config.validated()?)
}

fn parse_value(raw: String) -> Value {
    serde_json::from_str(&raw).unwrap_or(Value::String(raw))
}

async fn run_node(config: CacheConfig) -> CliResult<()> {
    let _log_guard = init_logging(&config.logging)?;
    log_startup(&config);

    if config.metrics.enabled {
        let metrics_addr: SocketAddr = config.metrics.bind_address.parse()?;
        PrometheusBuilder::new()
            .with_http_listener(metrics_addr)
            .install()?;
        info!("Prometheus exporter listening on {}", metrics_addr);
    }

    let node: CacheNode<Value> = CacheNode::new(config);
    let addr = node.start().await?;
    info!("Node ready on {} with {} known peer(s)", addr, node.peers().await.len());

    tokio::signal::ctrl_c().await?;
    log_shutdown("received Ctrl-C");

    if let Err(e) = node.close().await {
        warn!("Error while closing node: {}", e);
    }
    Ok(())
}
