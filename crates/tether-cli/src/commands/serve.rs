use anyhow::Result;
use tracing::info;

use tether_core::{AppConfig, DaemonHost};

use crate::message_daemon::MessageDaemon;

/// Run the message daemon in the foreground until stopped
pub async fn run(config: &AppConfig, name: &str, port: Option<u16>) -> Result<()> {
    let mut config = config.clone();
    if port.is_some() {
        config.listener.port = port;
    }

    let host = DaemonHost::new(MessageDaemon::new(name), &config).await?;
    let lifecycle = host.lifecycle();

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        lifecycle.stop();
    });

    println!("Daemon {} listening on {}", name, host.local_addr());
    println!("Press Ctrl+C or run 'tether stop --address <host:port>' to stop.");

    host.run().await?;

    println!("Daemon stopped.");
    Ok(())
}
