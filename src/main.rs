use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::{info, warn};

use membrane_rtc::config::ConnectOptions;
use membrane_rtc::model::{Metadata, RtcEvent};
use membrane_rtc::peer::udp::UdpFactory;
use membrane_rtc::transport::PhoenixTransport;
use membrane_rtc::{util, MembraneRtc};

#[derive(Parser)]
#[command(name = "membrane-rtc", about = "Membrane RTC client tools")]
struct Cli {
    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info", env = "MEMBRANE_RTC_LOG")]
    log: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Join a room, receive the published media and log the session events
    Join {
        /// Socket URL of the engine, e.g. ws://localhost:4000/socket
        #[arg(long)]
        url: String,
        /// Channel topic to join
        #[arg(long, default_value = "room:lobby")]
        topic: String,
        /// Socket parameter as key=value, repeatable
        #[arg(long = "param", value_parser = util::parse_pair)]
        params: Vec<(String, Value)>,
        /// Display name announced in the endpoint metadata
        #[arg(long, default_value = "membrane-rtc")]
        display_name: String,
        /// Stop after this many seconds unless interrupted earlier
        #[arg(long, default_value_t = 30)]
        seconds: u64,
        /// Connection options as a JSON document
        #[arg(long)]
        options: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    util::init_log(&cli.log);

    match cli.command {
        Command::Join {
            url,
            topic,
            params,
            display_name,
            seconds,
            options,
        } => {
            let options = match options {
                Some(json) => ConnectOptions::from_json(&json).context("invalid --options")?,
                None => ConnectOptions::default(),
            };
            join(&url, &topic, util::metadata_from_pairs(params), display_name, seconds, options)
                .await
        }
    }
}

async fn join(
    url: &str,
    topic: &str,
    params: Metadata,
    display_name: String,
    seconds: u64,
    options: ConnectOptions,
) -> anyhow::Result<()> {
    let transport = PhoenixTransport::new(url, topic, &params, params.clone(), &options)?;
    info!("Joining {} on {}", transport.topic(), transport.url());

    let (rtc, mut events) =
        MembraneRtc::create(options, Arc::new(transport), Arc::new(UdpFactory::new()));
    let mut metadata = Metadata::new();
    metadata.insert("displayName".to_string(), Value::String(display_name));
    rtc.connect(metadata)?;

    let deadline = tokio::time::sleep(Duration::from_secs(seconds));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => {
                info!("Time is up, leaving");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            event = events.recv() => match event {
                Some(RtcEvent::Disconnected { reason }) => {
                    warn!("Removed from the room: {}", reason);
                    break;
                }
                Some(RtcEvent::Error(e)) => warn!("Session error: {}", e),
                Some(event) => info!("{:?}", event),
                None => break,
            }
        }
    }

    if rtc.disconnect().is_err() {
        info!("Session already closed");
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    Ok(())
}
