//! Megaship Listener - live relay subscriber
//!
//! Subscribes to the public relay, feeds every decoded message through the
//! reconciliation engine and logs derived events and notifications.

use anyhow::{Context, Result};
use clap::Parser;
use megaship_core::{
    feed_channel, spawn_receive_loop, Dispatcher, IngestStats, LoggingSink, RuntimeConfig, TrackerConfig,
    TrackerRuntime, ZmqFeedSource,
};
use megaship_env::TokioContext;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "megaship-listener")]
#[command(about = "Track megaship positions and system traffic from the live relay", long_about = None)]
struct Args {
    /// Relay endpoint to subscribe to
    #[arg(long, default_value = "tcp://eddn.edcd.io:9500")]
    relay: String,

    /// Tracker configuration override (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Relay receive timeout; bounds how long shutdown can take
    #[arg(long, default_value = "5000")]
    recv_timeout_ms: i32,

    /// Seconds between status lines (0 disables them)
    #[arg(long, default_value = "60")]
    status_interval_secs: u64,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins over --verbose when set
    let level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set tracing subscriber")?;

    let config = match &args.config {
        Some(path) => TrackerConfig::from_json_file(path)?,
        None => TrackerConfig::default(),
    };
    info!(
        "Tracking {} ships across {} systems",
        config.ships.len(),
        config.systems.len()
    );

    let runtime_config = RuntimeConfig::default();
    let dispatcher = Dispatcher::new(config)?;
    let sink = Arc::new(LoggingSink);
    let runtime = TrackerRuntime::new(TokioContext::shared(), dispatcher, runtime_config.clone())
        .with_event_sink(sink.clone())
        .with_notification_sink(sink);
    let handle = runtime.handle();

    let source = ZmqFeedSource::connect(&args.relay, args.recv_timeout_ms)
        .with_context(|| format!("Failed to subscribe to {}", args.relay))?;
    let (tx, rx) = feed_channel(&runtime_config);
    let stats = IngestStats::shared();
    let receiver = spawn_receive_loop(source, tx, handle.running_flag(), stats.clone())
        .context("Failed to start receive thread")?;

    let ctrl_c_handle = handle.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested"),
            Err(e) => warn!("Failed to listen for ctrl-c: {}", e),
        }
        ctrl_c_handle.shutdown();
    });

    if args.status_interval_secs > 0 {
        let status_handle = handle.clone();
        let interval = Duration::from_secs(args.status_interval_secs);
        tokio::spawn(async move {
            while status_handle.is_running() {
                tokio::time::sleep(interval).await;
                match status_handle.snapshot().await {
                    Ok(snapshot) => info!(
                        "Status: {} messages, {} dropped, {} commanders in monitored systems",
                        snapshot.counters.messages_seen,
                        snapshot.counters.messages_dropped,
                        snapshot.total_commanders()
                    ),
                    Err(_) => break,
                }
            }
        });
    }

    let dispatcher = runtime.run(rx).await;
    handle.shutdown();

    match tokio::task::spawn_blocking(move || receiver.join()).await {
        Ok(Ok(())) => {}
        Ok(Err(_)) => error!("Receive thread panicked"),
        Err(e) => error!("Failed to join receive thread: {}", e),
    }

    let counters = dispatcher.counters();
    info!(
        "Stopped: {} frames received ({} malformed), {} messages processed, {} dropped",
        stats.frames_received(),
        stats.frames_dropped(),
        counters.messages_seen,
        counters.messages_dropped
    );
    Ok(())
}
