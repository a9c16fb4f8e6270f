//! ARQ link binary.
//!
//! Opens one TCP connection (listening or dialing), runs a stop-and-wait
//! session over it, sends each stdin line as a JSON payload and prints every
//! payload received from the peer on stdout.

use anyhow::Context;
use arq_session::{
    connect_tcp, listen_tcp, IoStream, Noise, NoisyStream, Session, SessionError, SessionEvent,
};
use arq_wire::WireError;
use clap::Parser;
use serde_json::Value;
use std::{net::SocketAddr, path::PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod logging;

use config::LinkConfig;
use logging::LinkLogFormatter;

/// Stop-and-wait ARQ link over TCP
#[derive(Parser, Debug)]
#[command(name = "arq-link", version, about = "Stop-and-wait ARQ link over TCP")]
struct Args {
    /// Listen address for one peer, e.g. 0.0.0.0:9600
    #[arg(long, conflicts_with = "connect")]
    listen: Option<SocketAddr>,

    /// Peer address to connect to, e.g. 127.0.0.1:9600
    #[arg(long)]
    connect: Option<SocketAddr>,

    /// Retransmission interval, e.g. 100ms
    #[arg(long)]
    retry_interval: Option<humantime::Duration>,

    /// Heartbeat ACK interval, e.g. 100ms
    #[arg(long)]
    ack_interval: Option<humantime::Duration>,

    /// Corrupt the first transmission of the first N distinct outgoing data frames
    #[arg(long)]
    corrupt_first: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Disable colored log output
    #[arg(long)]
    no_color: bool,

    /// Configuration file path
    #[arg(long, default_value = "arq.yaml")]
    config: PathBuf,
}

impl Args {
    /// Command-line flags take precedence over file and environment
    fn apply_to(&self, config: &mut LinkConfig) {
        if self.listen.is_some() {
            config.listen = self.listen;
            config.connect = None;
        }
        if self.connect.is_some() {
            config.connect = self.connect;
            config.listen = None;
        }
        if let Some(interval) = self.retry_interval {
            config.retry_interval_ms = millis(interval);
        }
        if let Some(interval) = self.ack_interval {
            config.ack_interval_ms = millis(interval);
        }
        if let Some(n) = self.corrupt_first {
            config.corrupt_first = n;
        }
    }
}

fn millis(duration: humantime::Duration) -> u64 {
    u64::try_from(std::time::Duration::from(duration).as_millis()).unwrap_or(u64::MAX)
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::new("warn")
        .add_directive(format!("arq_link={}", args.log_level).parse()?)
        .add_directive(format!("arq_session={}", args.log_level).parse()?)
        .add_directive(format!("arq_wire={}", args.log_level).parse()?);

    let mut formatter = LinkLogFormatter::new("arq");
    if args.no_color {
        formatter = formatter.with_color(false);
    }

    // Logs go to stderr; stdout carries received payloads
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .event_format(formatter)
        .init();

    info!("Starting ARQ link v{}", env!("CARGO_PKG_VERSION"));

    let mut config = LinkConfig::load_from_file(&args.config)?;
    args.apply_to(&mut config);

    let (stream, label) = open_transport(&config).await?;

    if config.corrupt_first > 0 {
        component_warn!(
            "link",
            "Corrupting the first transmission of the first {} distinct outgoing data frame(s)",
            config.corrupt_first
        );
        let noisy = NoisyStream::new(stream, Noise::FirstFrames(config.corrupt_first));
        run_link(noisy, &config, &label).await
    } else {
        run_link(stream, &config, &label).await
    }
}

/// Accept or dial the single peer connection
async fn open_transport(config: &LinkConfig) -> anyhow::Result<(IoStream, String)> {
    match (config.listen, config.connect) {
        (Some(listen_addr), None) => {
            let listener = listen_tcp(listen_addr)
                .await
                .with_context(|| format!("failed to listen on {}", listen_addr))?;
            component_info!("link", "Waiting for peer on {}", listener.local_addr()?);

            let (stream, peer) = listener.accept().await?;
            component_info!("link", "Accepted peer {}", peer);
            Ok((IoStream::Plain(stream), peer.to_string()))
        }
        (None, Some(connect_addr)) => {
            let stream = connect_tcp(connect_addr)
                .await
                .with_context(|| format!("failed to connect to {}", connect_addr))?;
            let stream = IoStream::Plain(stream);
            let peer = stream.peer_addr()?.unwrap_or(connect_addr);
            component_info!("link", "Connected to {}", peer);
            Ok((stream, peer.to_string()))
        }
        (Some(_), Some(_)) => anyhow::bail!("Specify only one of --listen or --connect"),
        (None, None) => anyhow::bail!("Must specify either --listen or --connect"),
    }
}

/// Run one session until stdin ends, the peer goes away or Ctrl-C
async fn run_link<S>(stream: S, config: &LinkConfig, label: &str) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (session, events) = Session::<Value>::spawn(stream, config.session_config(label));
    let mut printer = tokio::spawn(print_events(events));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    component_info!("link", "End of input");
                    break;
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let delivery = match session.send(&parse_line(line)) {
                    Ok(delivery) => delivery,
                    Err(SessionError::Wire(WireError::FrameTooLarge(size))) => {
                        component_error!("link", "Dropping {}-byte payload: too large for one frame", size);
                        continue;
                    }
                    Err(SessionError::Closed) => break,
                    Err(e) => return Err(e.into()),
                };

                tokio::select! {
                    result = delivery.delivered() => match result {
                        Ok(()) => component_debug!("link", "Delivered: {}", line),
                        Err(_) => break,
                    },
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
            _ = &mut printer => break,
            _ = tokio::signal::ctrl_c() => {
                component_info!("link", "Interrupted");
                break;
            }
        }
    }

    let stats = session.stats();
    session.shutdown().await;
    component_info!(
        "link",
        "Link closed: sent={} retransmitted={} received={} checksum_errors={}",
        stats.deliveries,
        stats.retransmissions,
        stats.messages_received,
        stats.checksum_errors
    );

    Ok(())
}

/// Lines that are valid JSON are sent as-is, anything else as a string
fn parse_line(line: &str) -> Value {
    serde_json::from_str(line).unwrap_or_else(|_| Value::String(line.to_string()))
}

async fn print_events(mut events: mpsc::UnboundedReceiver<SessionEvent<Value>>) {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Message(value) => println!("{}", value),
            SessionEvent::Error(e) => component_warn!("link", "Discarded inbound frame: {}", e),
            SessionEvent::Disconnected { error: Some(e) } => {
                component_error!("link", "Transport failed: {}", e);
                break;
            }
            SessionEvent::Disconnected { error: None } => {
                component_info!("link", "Peer disconnected");
                break;
            }
        }
    }
}
