//! AgentMesh daemon: entry point for running a mesh node.

use agentmesh_network::SystemClock;
use agentmesh_node::{init_logging, AgentNode, LogFormat, NodeConfig, NodeMetrics, ShutdownController};
use agentmesh_transport::HttpTransport;
use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "agentmesh-daemon", about = "AgentMesh node daemon")]
struct Cli {
    /// Address to bind the HTTP and stream endpoints to ("host:port").
    #[arg(long, env = "AGENTMESH_LISTEN")]
    listen: Option<String>,

    /// Address other nodes should dial, if different from --listen.
    #[arg(long, env = "AGENTMESH_ADVERTISE")]
    advertise: Option<String>,

    /// Seed peers (comma-separated: "10.0.0.1:7400,10.0.0.2:7400").
    #[arg(long, env = "AGENTMESH_BOOTSTRAP_PEERS", value_delimiter = ',')]
    bootstrap_peers: Vec<String>,

    /// Capability tags to advertise (comma-separated).
    #[arg(long, env = "AGENTMESH_CAPABILITIES", value_delimiter = ',')]
    capabilities: Vec<String>,

    /// Maximum number of persistent neighbor links.
    #[arg(long, env = "AGENTMESH_MAX_NEIGHBORS")]
    max_neighbors: Option<usize>,

    /// Neighbors contacted per gossip round.
    #[arg(long, env = "AGENTMESH_FANOUT")]
    fanout: Option<usize>,

    /// Log level: "trace", "debug", "info", "warn", "error".
    #[arg(long, env = "AGENTMESH_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log output format: "human" or "json".
    #[arg(long, env = "AGENTMESH_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    /// Path to a TOML configuration file. If provided, file settings
    /// are used as the base; CLI flags and env vars override them.
    #[arg(long, env = "AGENTMESH_CONFIG")]
    config: Option<PathBuf>,

    /// Subcommand.
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Start the node.
    #[command(name = "node")]
    Node {
        #[command(subcommand)]
        action: NodeAction,
    },
    /// Inspect configuration.
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum NodeAction {
    /// Run the node until SIGINT or SIGTERM.
    Run,
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective configuration as TOML.
    Show,
}

/// The file config (or defaults) with CLI flags and env vars layered on top.
fn resolve_config(cli: &Cli) -> anyhow::Result<NodeConfig> {
    let mut config = match &cli.config {
        Some(path) => NodeConfig::from_toml_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => NodeConfig::default(),
    };

    if let Some(listen) = &cli.listen {
        config.listen_address = listen.clone();
    }
    if let Some(advertise) = &cli.advertise {
        config.advertise_address = Some(advertise.clone());
    }
    if !cli.bootstrap_peers.is_empty() {
        config.bootstrap_peers = cli.bootstrap_peers.clone();
    }
    if !cli.capabilities.is_empty() {
        config.capabilities = cli.capabilities.clone();
    }
    if let Some(max_neighbors) = cli.max_neighbors {
        config.max_neighbors = max_neighbors;
    }
    if let Some(fanout) = cli.fanout {
        config.fanout = fanout;
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    if let Some(format) = cli.log_format {
        config.log_format = format;
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}

async fn run(config: NodeConfig) -> anyhow::Result<()> {
    tracing::info!(
        listen = %config.listen_address,
        advertise = ?config.advertise_address,
        capabilities = ?config.capabilities,
        "starting AgentMesh node"
    );
    if !config.bootstrap_peers.is_empty() {
        tracing::info!(peers = ?config.bootstrap_peers, "bootstrap peers");
    }

    let metrics = Arc::new(NodeMetrics::new()?);
    let render = Arc::clone(&metrics);
    let transport = HttpTransport::with_request_timeout(config.rpc_timeout())
        .with_metrics(Arc::new(move || render.render()));

    let mut node = AgentNode::with_parts(config, Arc::new(transport), Arc::new(SystemClock), metrics)?;
    node.start().await?;
    tracing::info!(node = %node.node_id(), "node started");

    let shutdown = ShutdownController::new();
    shutdown.wait_for_signal().await?;

    tracing::info!("shutdown signal received, stopping node");
    node.stop().await?;
    tracing::info!("daemon exited cleanly");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = resolve_config(&cli)?;

    match cli.command {
        Command::Config {
            action: ConfigAction::Show,
        } => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
        Command::Node {
            action: NodeAction::Run,
        } => {
            init_logging(config.log_format, &config.log_level);
            run(config).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "agentmesh-daemon",
            "--listen",
            "127.0.0.1:9000",
            "--capabilities",
            "storage-access,schema-management",
            "--bootstrap-peers",
            "10.0.0.1:7400,10.0.0.2:7400",
            "--log-format",
            "json",
            "node",
            "run",
        ])
        .unwrap();
        let config = resolve_config(&cli).unwrap();
        assert_eq!(config.listen_address, "127.0.0.1:9000");
        assert_eq!(config.capabilities.len(), 2);
        assert_eq!(config.bootstrap_peers.len(), 2);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.max_neighbors, 8);
    }

    #[test]
    fn flags_override_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "fanout = 5\nmax_neighbors = 4\nlog_level = \"debug\"").unwrap();
        let path = file.path().to_string_lossy().to_string();
        let cli = Cli::try_parse_from([
            "agentmesh-daemon",
            "--config",
            path.as_str(),
            "--max-neighbors",
            "6",
            "config",
            "show",
        ])
        .unwrap();
        let config = resolve_config(&cli).unwrap();
        assert_eq!(config.fanout, 5);
        assert_eq!(config.max_neighbors, 6);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn invalid_capability_is_rejected() {
        let cli = Cli::try_parse_from([
            "agentmesh-daemon",
            "--capabilities",
            "not a tag",
            "node",
            "run",
        ])
        .unwrap();
        assert!(resolve_config(&cli).is_err());
    }
}
