use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use fleet_coordinator::client::CoordinatorClient;
use fleet_coordinator::nodes::Command as NodeCommand;
use fleet_coordinator::{Config, Daemon};

/// Fleet - liveness tracking, command dispatch and failover detection for a small device fleet
#[derive(Parser)]
#[command(name = "fleet", version, about)]
struct Cli {
    /// Config file (defaults to ~/.config/fleet/config.toml)
    #[arg(short, long, env = "FLEET_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the coordinator (API server and liveness sweeper)
    Coordinator {
        /// Port to listen on
        #[arg(long)]
        port: Option<u16>,

        /// Identity advertised to failover monitors
        #[arg(long)]
        identity: Option<String>,
    },
    /// Run a fleet member (command server and heartbeat emitter)
    Node {
        /// Logical node name
        #[arg(long)]
        id: Option<String>,

        /// Coordinator base URL
        #[arg(long)]
        coordinator: Option<String>,

        /// Command server port
        #[arg(long)]
        port: Option<u16>,

        /// Declared capabilities (comma separated)
        #[arg(long, value_delimiter = ',')]
        capabilities: Option<Vec<String>>,
    },
    /// Run the failover monitor
    Monitor {
        /// Primary coordinator base URL
        #[arg(long)]
        coordinator: Option<String>,

        /// Standby coordinator base URL (repeatable)
        #[arg(long = "backup")]
        backups: Vec<String>,

        /// Status endpoint port
        #[arg(long)]
        port: Option<u16>,
    },
    /// Show the fleet as seen by a coordinator
    Status {
        /// Coordinator base URL
        #[arg(long)]
        coordinator: Option<String>,
    },
    /// Send one command to a node through a coordinator
    Send {
        /// Target node id
        node: String,

        /// Command kind (e.g. "led")
        kind: String,

        /// Command parameters as a JSON object
        #[arg(long, default_value = "{}")]
        params: String,

        /// Coordinator base URL
        #[arg(long)]
        coordinator: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity; RUST_LOG wins when set
    let filter = match cli.verbose {
        0 => "info,fleet_coordinator=info",
        1 => "info,fleet_coordinator=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Command::Coordinator { port, identity } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            if identity.is_some() {
                config.server.identity = identity;
            }
            tracing::debug!(?config, "loaded configuration");
            Daemon::new(config).run_coordinator().await?;
        }
        Command::Node {
            id,
            coordinator,
            port,
            capabilities,
        } => {
            if id.is_some() {
                config.member.node_id = id;
            }
            if let Some(url) = coordinator {
                config.member.coordinator_url = url;
            }
            if let Some(port) = port {
                config.member.port = port;
            }
            if let Some(capabilities) = capabilities {
                config.member.capabilities = capabilities;
            }
            tracing::debug!(?config, "loaded configuration");
            Daemon::new(config).run_member().await?;
        }
        Command::Monitor {
            coordinator,
            backups,
            port,
        } => {
            if let Some(url) = coordinator {
                config.monitor.coordinator_url = url;
            }
            if !backups.is_empty() {
                config.monitor.backup_urls = backups;
            }
            if let Some(port) = port {
                config.monitor.port = port;
            }
            tracing::debug!(?config, "loaded configuration");
            Daemon::new(config).run_monitor().await?;
        }
        Command::Status { coordinator } => {
            let url = coordinator.unwrap_or(config.member.coordinator_url);
            cmd_status(&url).await?;
        }
        Command::Send {
            node,
            kind,
            params,
            coordinator,
        } => {
            let url = coordinator.unwrap_or_else(|| config.member.coordinator_url.clone());
            let timeout = config.dispatch.command_timeout + Duration::from_secs(5);
            cmd_send(&url, timeout, &node, &kind, &params).await?;
        }
    }

    Ok(())
}

/// Print the coordinator's node table
async fn cmd_status(url: &str) -> anyhow::Result<()> {
    let client = CoordinatorClient::new(url, Duration::from_secs(5))?;
    let identity = client
        .identity()
        .await
        .unwrap_or_else(|_| "unknown".to_string());
    let nodes = client
        .nodes()
        .await
        .with_context(|| format!("failed to query {url}"))?;

    println!("Coordinator: {url} ({identity})");
    if nodes.is_empty() {
        println!("No nodes have reported yet");
        return Ok(());
    }

    println!(
        "{:<20} {:<8} {:<22} {:<26} CAPABILITIES",
        "ID", "STATUS", "ADDRESS", "LAST SEEN"
    );
    for node in nodes {
        let capabilities: Vec<String> = node.capabilities.iter().map(ToString::to_string).collect();
        println!(
            "{:<20} {:<8} {:<22} {:<26} {}",
            node.id,
            node.status,
            node.address,
            node.last_seen_at.format("%Y-%m-%d %H:%M:%S UTC"),
            capabilities.join(",")
        );
    }
    Ok(())
}

/// Send one command and print the outcome
async fn cmd_send(
    url: &str,
    timeout: Duration,
    node: &str,
    kind: &str,
    params: &str,
) -> anyhow::Result<()> {
    let params: serde_json::Value =
        serde_json::from_str(params).context("--params must be a JSON object")?;
    anyhow::ensure!(params.is_object(), "--params must be a JSON object");

    let client = CoordinatorClient::new(url, timeout)?;
    let reply = client.send(node, &NodeCommand::new(kind, params)).await?;

    match (&reply.payload, &reply.reason) {
        (Some(payload), _) => println!("{}: {payload}", reply.outcome),
        (None, Some(reason)) => println!("{}: {reason}", reply.outcome),
        (None, None) => println!("{}", reply.outcome),
    }

    anyhow::ensure!(reply.is_ack(), "command was not acknowledged");
    Ok(())
}
