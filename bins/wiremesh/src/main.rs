//! Wiremesh CLI
//!
//! Two subcommands: `gateway` starts the rendezvous server, `join`
//! attaches the local machine to a mesh.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use wiremesh_node::Node;

/// Wiremesh establishes links between peers behind NAT
#[derive(Parser)]
#[command(name = "wiremesh")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (error/warn/info/debug)
    #[arg(long, default_value = "info", global = true)]
    log: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a wiremesh gateway server
    Gateway {
        /// The serve host of the gateway server
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        /// The serve port of the gateway server
        #[arg(long, default_value = "2823")]
        port: u16,

        /// Worker count for syncing peer information
        #[arg(short, long, default_value = "128")]
        concurrency: usize,

        /// Key used to validate peers
        #[arg(long, default_value = "")]
        key: String,

        /// TLS certificate path
        #[arg(long)]
        tls_cert: Option<PathBuf>,

        /// TLS key path
        #[arg(long)]
        tls_key: Option<PathBuf>,
    },

    /// Join a wiremesh and initialize the local network
    Join {
        /// The gateway server address
        #[arg(short, long, default_value = "127.0.0.1:2823")]
        gateway: String,

        /// The key to connect to the gateway
        #[arg(short, long, default_value = "")]
        key: String,

        /// (Required) The virtual address of the local node
        #[arg(short, long)]
        address: String,

        /// Talk to the gateway over TLS
        #[arg(long)]
        tls: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.log.to_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" => Level::WARN,
        "debug" => Level::DEBUG,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    match cli.command {
        Commands::Gateway {
            host,
            port,
            concurrency,
            key,
            tls_cert,
            tls_key,
        } => {
            let opt = wiremesh_gateway::Options {
                host,
                port,
                concurrency,
                key,
                tls_cert,
                tls_key,
            };
            wiremesh_gateway::serve(opt).await?;
            Ok(())
        }

        Commands::Join {
            gateway,
            key,
            address,
            tls,
        } => {
            let opt = wiremesh_node::Options {
                gateway,
                key,
                address,
                tls,
            };
            let node = Node::new(opt);

            tokio::select! {
                result = node.serve() => {
                    result?;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("received shutdown signal");
                    node.stop();
                }
            }
            Ok(())
        }
    }
}
