use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use axon_core::Payload;
use axon_ipc::{Broker, BrokerConfig, Peer, PeerConfig, DEFAULT_SOCKET_PATH};

#[derive(Parser)]
#[command(name = "axon", about = "Local IPC event bus for the attendance system")]
struct Cli {
    /// Unix socket endpoint shared by broker and peers.
    #[arg(long, default_value = DEFAULT_SOCKET_PATH)]
    socket: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the broker and log every inbound message.
    Serve,
    /// Connect as a peer and print every broadcast payload.
    Listen,
    /// Connect as a peer, send one JSON object, and exit.
    Send { payload: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve => serve(cli.socket).await,
        Command::Listen => listen(cli.socket).await,
        Command::Send { payload } => send(cli.socket, &payload).await,
    }
}

async fn serve(socket: PathBuf) -> anyhow::Result<()> {
    let broker = Broker::new(BrokerConfig {
        socket_path: socket,
        ..Default::default()
    });
    broker.add_handler(|payload| {
        let message = serde_json::to_string(payload)?;
        tracing::info!(%message, "inbound");
        Ok(())
    });
    broker.start().await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    broker.stop();
    Ok(())
}

async fn listen(socket: PathBuf) -> anyhow::Result<()> {
    let peer = Peer::new(PeerConfig {
        socket_path: socket,
        ..Default::default()
    });
    peer.add_handler(|payload| {
        println!("{}", serde_json::to_string(payload)?);
        Ok(())
    });
    peer.connect().await?;

    tokio::signal::ctrl_c().await?;
    peer.disconnect();
    Ok(())
}

async fn send(socket: PathBuf, raw: &str) -> anyhow::Result<()> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    let payload = Payload::from_value(value)?;

    let peer = Peer::new(PeerConfig {
        socket_path: socket,
        ..Default::default()
    });
    peer.connect().await?;
    if !peer.send(payload) {
        anyhow::bail!("payload was not accepted for queuing");
    }
    // Fire-and-forget queue; give the send loop a beat to drain.
    tokio::time::sleep(Duration::from_millis(100)).await;
    peer.disconnect();
    Ok(())
}
