use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tether_core::AppConfig;

mod commands;
mod message_daemon;

#[derive(Parser)]
#[command(name = "tether")]
#[command(author, version, about = "Run daemons and talk to them over the network")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the built-in message daemon in the foreground
    Serve {
        /// Daemon name, also keys its persisted fields
        #[arg(short = 'n', long, default_value = "MessageDaemon")]
        name: String,
        /// Listen on this port instead of scanning the configured range
        #[arg(short = 'p', long)]
        port: Option<u16>,
    },
    /// Read an attribute of a running daemon
    Get {
        /// Daemon address (host:port)
        #[arg(short = 'a', long)]
        address: String,
        attribute: String,
    },
    /// Set an attribute of a running daemon
    Set {
        /// Daemon address (host:port)
        #[arg(short = 'a', long)]
        address: String,
        attribute: String,
        /// New value as JSON; anything else is sent as a string
        value: String,
    },
    /// Call a method of a running daemon
    Call {
        /// Daemon address (host:port)
        #[arg(short = 'a', long)]
        address: String,
        method: String,
        /// Positional arguments as JSON
        args: Vec<String>,
        /// Give up waiting for the reply after this many seconds
        #[arg(short = 't', long)]
        timeout: Option<f64>,
    },
    /// Stop a running daemon
    Stop {
        /// Daemon address (host:port)
        #[arg(short = 'a', long)]
        address: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = AppConfig::load()?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.general.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match cli.command {
        Commands::Serve { name, port } => commands::serve::run(&config, &name, port).await,
        Commands::Get { address, attribute } => commands::remote::get(&address, &attribute).await,
        Commands::Set {
            address,
            attribute,
            value,
        } => commands::remote::set(&address, &attribute, &value).await,
        Commands::Call {
            address,
            method,
            args,
            timeout,
        } => commands::remote::call(&address, &method, &args, timeout).await,
        Commands::Stop { address } => commands::remote::stop(&address).await,
    }
}
