//! cellplay - stream a synthetic tone through the playback engine
//!
//! Serves a sine tone over an in-memory cellproto link and plays it on a
//! virtual output device, logging progress as it goes.
//!
//! - `cellplay` - play the configured tone from the start
//! - `cellplay --start 96000` - seek to a sample first
//! - `cellplay --show-config` - print the effective configuration and exit

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use cellaudio::{register_tone, AudioPlayer, AudioSource, OutputContext, Tone, VirtualOutput};
use cellconf::CellConfig;
use cellproto::{rpc_pair, CancelPolicy, RpcClient, RpcServer};
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cellplay")]
#[command(about = "Stream a synthetic tone through the cellwire audio player")]
#[command(version)]
struct Cli {
    /// Config file replacing ./cellwire.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Sample to start playing from
    #[arg(short, long, default_value = "0")]
    start: u64,

    /// Tone frequency in Hz (overrides config)
    #[arg(long)]
    frequency: Option<f64>,

    /// Print the effective configuration and exit
    #[arg(long)]
    show_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, sources) = CellConfig::load_with_sources_from(cli.config.as_deref())
        .context("failed to load configuration")?;

    if cli.show_config {
        for file in &sources.files {
            println!("# loaded {}", file.display());
        }
        for name in &sources.env_overrides {
            println!("# overridden by {}", name);
        }
        print!("{}", config.to_toml());
        return Ok(());
    }

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.telemetry.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let mut tone = Tone::from_config(&config.audio);
    if let Some(frequency) = cli.frequency {
        tone.frequency = frequency;
    }
    info!(
        "tone: {} Hz, {} samples at {} Hz",
        tone.frequency, tone.sample_count, tone.sample_rate
    );

    let (client_end, server_end) = rpc_pair();
    let mut server = RpcServer::with_name("tone", Arc::new(server_end));
    register_tone(&mut server, tone);
    server.open();

    let client = RpcClient::with_name("cellplay", Arc::new(client_end));
    let source = Arc::new(AudioSource::new(
        client.clone(),
        CancelPolicy::timeout(config.rpc_timeout()),
    ));
    let output = Arc::new(VirtualOutput::new());
    let player = AudioPlayer::new(source.clone(), output.clone());

    let mut events = player.subscribe();
    let reporter = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => info!(
                    "at {:.2}s, buffered to {:.2}s{}",
                    event.current_time,
                    event.buffer_second,
                    if event.playing { "" } else { " (stopped)" }
                ),
                Err(RecvError::Lagged(n)) => debug!("missed {} progress events", n),
                Err(RecvError::Closed) => break,
            }
        }
    });

    player.open().await.context("failed to open audio source")?;
    info!("clip is {:.2}s long", source.duration());

    let result = player.play(cli.start).await;

    if let Some(ctx) = output.last_context() {
        info!(
            "scheduled {} segments, device at {:.2}s",
            ctx.scheduled().len(),
            ctx.current_time()
        );
    }

    drop(player);
    if reporter.await.is_err() {
        warn!("progress reporter panicked");
    }
    source.close();
    client.shutdown();
    server.close();

    result.context("playback failed")
}
