//! Hydroleaf Live CLI
//!
//! Command-line interface for the live telemetry channel:
//! - Watch the live topic and print payloads as JSON lines
//! - Generate a default config file

use anyhow::Context;
use clap::{Parser, Subcommand};
use hydroleaf_live::config::{Config, LoggingConfig};
use hydroleaf_live::LiveTelemetryChannel;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "hydroleaf-live")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Follow the Hydroleaf live sensor feed")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: search the usual locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Subscribe to the live topic and print each payload
    Watch {
        /// Broker WebSocket URL
        #[arg(long)]
        url: Option<String>,
        /// Topic or destination (e.g. live_now, /topic/live_now)
        #[arg(long)]
        topic: Option<String>,
        /// Origin of the hosting page; https upgrades ws:// to wss://
        #[arg(long)]
        origin: Option<String>,
        /// Fixed delay between reconnection attempts
        #[arg(long)]
        reconnect_delay_ms: Option<u64>,
        /// Normalize payload keys (e.g. "CO₂" -> "co2")
        #[arg(long)]
        normalize: bool,
    },

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        // Log settings come from the file being searched for, so report the
        // search through a temporary subscriber
        None => with_bootstrap_logging(default_filter("info"), std::io::stderr, || {
            Config::load_default()
        }),
    };

    init_logging(&config.logging);

    match cli.command {
        Commands::Watch {
            url,
            topic,
            origin,
            reconnect_delay_ms,
            normalize,
        } => {
            let mut channel_config = config.channel;
            if let Some(url) = url {
                channel_config.endpoint_url = Some(url);
            }
            if let Some(topic) = topic {
                channel_config.topic = topic;
            }
            if let Some(origin) = origin {
                channel_config.origin = Some(origin);
            }
            if let Some(delay) = reconnect_delay_ms {
                channel_config.reconnect_delay_ms = delay;
            }

            watch(channel_config, normalize).await?;
        }

        Commands::Config { output } => {
            let config = hydroleaf_live::config::generate_default_config();

            match output {
                Some(path) => {
                    // Create parent directory if needed
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(&path, &config)
                        .with_context(|| format!("writing {}", path.display()))?;
                    println!("Config written to {:?}", path);
                }
                None => {
                    print!("{}", config);
                }
            }
        }
    }

    Ok(())
}

async fn watch(config: hydroleaf_live::ChannelConfig, normalize: bool) -> anyhow::Result<()> {
    tracing::info!("Hydroleaf Live v{}", env!("CARGO_PKG_VERSION"));

    let channel = Arc::new(LiveTelemetryChannel::new(config));
    channel.on_payload(move |payload| {
        let value = if normalize {
            payload.normalized()
        } else {
            payload.value().clone()
        };
        let line = serde_json::json!({
            "topic": payload.topic(),
            "received_at": payload.received_at(),
            "value": value,
        });
        println!("{}", line);
    });

    let mut states = channel.watch_state();
    let view = channel.observe().context("opening live channel")?;

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("waiting for Ctrl-C")?;
                break;
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                tracing::info!(state = %state, "Live channel state");
            }
        }
    }

    tracing::info!("Shutting down...");
    channel.shutdown().await;
    drop(view);
    Ok(())
}

fn default_filter(level: &str) -> EnvFilter {
    EnvFilter::new(std::env::var("RUST_LOG").unwrap_or_else(|_| format!("hydroleaf_live={}", level)))
}

/// Run `f` with a plain subscriber installed for the current thread only
fn with_bootstrap_logging<T, W>(filter: EnvFilter, make_writer: W, f: impl FnOnce() -> T) -> T
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(make_writer)
        .with_ansi(false)
        .finish();
    tracing::subscriber::with_default(subscriber, f)
}

fn init_logging(logging: &LoggingConfig) {
    let filter = default_filter(&logging.level);

    // Payloads go to stdout; keep logs on stderr
    if logging.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
