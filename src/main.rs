// stompwire-listen: subscribe to a destination and print every message, forever.
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use stompwire_client::consumer::listen;
use stompwire_client::{AckMode, ClientConfig, Message, Supervisor};

#[derive(Parser, Debug)]
#[command(name = "stompwire-listen")]
#[command(about = "Subscribe to a STOMP destination and print every message")]
struct Args {
    /// Broker host
    #[arg(long)]
    host: Option<String>,

    /// Broker port
    #[arg(long)]
    port: Option<u16>,

    /// Destination to subscribe to
    #[arg(long)]
    subscribe: Option<String>,

    /// Ack mode: auto, client or client-individual
    #[arg(long)]
    ack: Option<AckMode>,

    /// Heart-beat send interval in milliseconds (0 = off)
    #[arg(long)]
    heartbeat_send_ms: Option<u64>,

    /// Heart-beat receive interval in milliseconds (0 = off)
    #[arg(long)]
    heartbeat_receive_ms: Option<u64>,

    /// JSON file with config overrides
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> Result<ClientConfig> {
        let mut config = ClientConfig::default();
        if let Some(path) = &self.config {
            config = config
                .load_overrides(path)
                .with_context(|| format!("load config overrides from {}", path.display()))?;
        }

        if let Some(host) = self.host {
            config = config.with_host(host);
        }
        if let Some(port) = self.port {
            config = config.with_port(port);
        }
        if let Some(destination) = self.subscribe {
            config = config.with_destination(destination);
        }
        if let Some(ack) = self.ack {
            config = config.with_ack_mode(ack);
        }
        if self.heartbeat_send_ms.is_some() || self.heartbeat_receive_ms.is_some() {
            let send = self
                .heartbeat_send_ms
                .map(Duration::from_millis)
                .unwrap_or(config.heartbeat.send);
            let receive = self
                .heartbeat_receive_ms
                .map(Duration::from_millis)
                .unwrap_or(config.heartbeat.receive);
            config = config.with_heartbeat(send, receive);
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

fn print_message(message: &Message) {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let result = message
        .headers
        .iter()
        .try_for_each(|(key, value)| writeln!(out, "{}:{}", key, value))
        .and_then(|()| writeln!(out))
        .and_then(|()| out.write_all(&message.body))
        .and_then(|()| writeln!(out))
        .and_then(|()| out.flush());

    if let Err(e) = result {
        tracing::warn!(error = %e, "could not print message");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Args::parse().into_config()?;
    let destination = config.destination.clone();
    let ack_mode = config.ack_mode;

    tracing::info!(
        addr = %config.addr(),
        destination = %destination,
        ack = %ack_mode,
        "starting listener"
    );

    let supervisor = Supervisor::new(config);

    tokio::select! {
        never = supervisor.run(move |connection| {
            listen(connection, destination.clone(), ack_mode, print_message)
        }) => match never {},
        signal = tokio::signal::ctrl_c() => {
            signal.context("listen for ctrl-c")?;
            tracing::info!("shutting down");
        }
    }

    Ok(())
}
