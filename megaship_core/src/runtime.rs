//! Tracker Runtime - Wires the feed, the Dispatcher and the sinks together.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐  bounded mpsc   ┌──────────────────────────────────┐
//! │  Receive loop    │ ──────────────► │  TrackerRuntime<Ctx>             │
//! │  (own thread)    │   FeedEnvelope  │  • owns the Dispatcher           │
//! │  • recv_frame()  │                 │  • answers snapshot queries      │
//! │  • decode_frame()│                 │  • ctx.spawn() per sink delivery │
//! └──────────────────┘                 └──────────────────────────────────┘
//!          ▲                                          │
//!          └──────────── shared `running` flag ───────┘
//! ```
//!
//! The receive loop never waits on the processing loop except when the
//! channel is full, so bursts are absorbed without dropping messages.
//!
//! # Usage
//!
//! ```ignore
//! use megaship_core::runtime::{feed_channel, spawn_receive_loop, IngestStats, TrackerRuntime};
//! use megaship_env::TokioContext;
//!
//! let (tx, rx) = feed_channel(&runtime_config);
//! let runtime = TrackerRuntime::new(TokioContext::shared(), dispatcher, runtime_config)
//!     .with_event_sink(Arc::new(LoggingSink));
//! let receiver = spawn_receive_loop(source, tx, runtime.handle().running_flag(), IngestStats::shared())?;
//! let dispatcher = runtime.run(rx).await;
//! ```

use megaship_env::{EnvError, FeedSource, TrackerContext};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::RuntimeConfig;
use crate::dispatch::Dispatcher;
use crate::events::{EventSink, Notification, NotificationSink, Outcome, TrackerEvent};
use crate::feed::{decode_frame, FeedEnvelope};
use crate::snapshot::Snapshot;

/// Frames between progress log lines.
const PROGRESS_INTERVAL: u64 = 100;

/// Pause after a transport error before polling again.
const RECV_ERROR_BACKOFF: Duration = Duration::from_secs(1);

type SnapshotRequest = oneshot::Sender<Snapshot>;

// ============================================================================
// RECEIVE LOOP
// ============================================================================

/// Frame counters shared between the receive loop and observers.
#[derive(Debug, Default)]
pub struct IngestStats {
    frames_received: AtomicU64,
    frames_dropped: AtomicU64,
}

impl IngestStats {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    /// Frames that failed to decode.
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }
}

/// Bounded FIFO between the receive loop and the processing loop.
pub fn feed_channel(config: &RuntimeConfig) -> (mpsc::Sender<FeedEnvelope>, mpsc::Receiver<FeedEnvelope>) {
    mpsc::channel(config.channel_capacity.max(1))
}

/// Blocking receive loop. Run it on a dedicated thread, never on a runtime worker.
///
/// Returns when `running` is cleared, the source is exhausted, or the
/// processing side hangs up.
pub fn run_receive_loop<S: FeedSource>(
    mut source: S,
    tx: mpsc::Sender<FeedEnvelope>,
    running: Arc<AtomicBool>,
    stats: Arc<IngestStats>,
) {
    info!("Receive loop listening on {}", source.endpoint());

    while running.load(Ordering::SeqCst) {
        let frame = match source.recv_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(EnvError::ChannelClosed(reason)) => {
                info!("Feed source closed: {}", reason);
                break;
            }
            Err(e) => {
                warn!("Receive error on {}: {}", source.endpoint(), e);
                std::thread::sleep(RECV_ERROR_BACKOFF);
                continue;
            }
        };

        let received = stats.frames_received.fetch_add(1, Ordering::Relaxed) + 1;

        match decode_frame(&frame) {
            Ok(envelope) => {
                if tx.blocking_send(envelope).is_err() {
                    info!("Processing loop hung up; stopping receive loop");
                    break;
                }
            }
            Err(e) => {
                stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Dropping malformed frame: {}", e);
            }
        }

        if received % PROGRESS_INTERVAL == 0 {
            info!("Received {} frames ({} malformed)", received, stats.frames_dropped());
        }
    }

    info!("Receive loop stopped after {} frames", stats.frames_received());
}

/// Starts [`run_receive_loop`] on a named OS thread.
pub fn spawn_receive_loop<S: FeedSource>(
    source: S,
    tx: mpsc::Sender<FeedEnvelope>,
    running: Arc<AtomicBool>,
    stats: Arc<IngestStats>,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("feed-receiver".into())
        .spawn(move || run_receive_loop(source, tx, running, stats))
}

// ============================================================================
// PROCESSING LOOP
// ============================================================================

/// Single-owner processing loop around a [`Dispatcher`].
///
/// Generic over the context so the same loop runs against the wall clock
/// (tokio) or a virtual clock (simulation).
pub struct TrackerRuntime<Ctx: TrackerContext> {
    ctx: Arc<Ctx>,
    config: RuntimeConfig,
    dispatcher: Dispatcher,

    event_sinks: Vec<Arc<dyn EventSink>>,
    notification_sinks: Vec<Arc<dyn NotificationSink>>,

    running: Arc<AtomicBool>,
    query_tx: mpsc::Sender<SnapshotRequest>,
    query_rx: mpsc::Receiver<SnapshotRequest>,

    processed: u64,
}

impl<Ctx: TrackerContext> TrackerRuntime<Ctx> {
    pub fn new(ctx: Arc<Ctx>, dispatcher: Dispatcher, config: RuntimeConfig) -> Self {
        let (query_tx, query_rx) = mpsc::channel(16);
        Self {
            ctx,
            config,
            dispatcher,
            event_sinks: Vec::new(),
            notification_sinks: Vec::new(),
            running: Arc::new(AtomicBool::new(true)),
            query_tx,
            query_rx,
            processed: 0,
        }
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sinks.push(sink);
        self
    }

    pub fn with_notification_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.notification_sinks.push(sink);
        self
    }

    pub fn handle(&self) -> RuntimeHandle {
        RuntimeHandle {
            running: self.running.clone(),
            queries: self.query_tx.clone(),
        }
    }

    /// Runs until shutdown or until the feed channel closes, then hands the
    /// Dispatcher back for a final look at the state.
    pub async fn run(mut self, mut rx: mpsc::Receiver<FeedEnvelope>) -> Dispatcher {
        info!(
            "Tracker runtime started ({} event sinks, {} notification sinks)",
            self.event_sinks.len(),
            self.notification_sinks.len()
        );

        while self.running.load(Ordering::SeqCst) {
            tokio::select! {
                biased;

                message = rx.recv() => match message {
                    Some(envelope) => self.process(&envelope),
                    None => {
                        info!("Feed channel closed");
                        break;
                    }
                },

                Some(reply) = self.query_rx.recv() => {
                    if reply.send(self.dispatcher.snapshot()).is_err() {
                        debug!("Snapshot requester went away");
                    }
                }

                _ = self.ctx.sleep(self.config.idle_poll) => {}
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!("Tracker runtime stopped after {} messages", self.processed);
        self.dispatcher
    }

    fn process(&mut self, envelope: &FeedEnvelope) {
        let now = self.ctx.utc_now();
        let outcome = self.dispatcher.dispatch(envelope, now);

        self.processed += 1;
        if self.processed % PROGRESS_INTERVAL == 0 {
            let counters = self.dispatcher.counters();
            info!(
                "Processed {} messages ({} dropped)",
                self.processed, counters.messages_dropped
            );
        }

        self.deliver(outcome);
    }

    /// Fans an outcome out to every sink as detached tasks.
    fn deliver(&self, outcome: Outcome) {
        for event in outcome.events {
            for sink in &self.event_sinks {
                let sink = sink.clone();
                let event = event.clone();
                self.ctx.spawn("event-sink", async move {
                    let result = match event {
                        TrackerEvent::Megaship(e) => sink.megaship(e).await,
                        TrackerEvent::SystemTraffic(e) => sink.system_traffic(e).await,
                    };
                    if let Err(e) = result {
                        warn!("Event sink delivery failed: {}", e);
                    }
                });
            }
        }

        for notification in outcome.notifications {
            for sink in &self.notification_sinks {
                let sink = sink.clone();
                let notification = notification.clone();
                self.ctx.spawn("notification-sink", async move {
                    let result = match notification {
                        Notification::ShipJumped {
                            ship,
                            origin_system,
                            timestamp,
                        } => sink.ship_jumped(ship, origin_system, timestamp).await,
                        Notification::ShipAppeared {
                            ship,
                            system,
                            timestamp,
                        } => sink.ship_appeared(ship, system, timestamp).await,
                    };
                    if let Err(e) = result {
                        warn!("Notification sink delivery failed: {}", e);
                    }
                });
            }
        }
    }
}

/// Cloneable control surface for a running [`TrackerRuntime`].
#[derive(Clone)]
pub struct RuntimeHandle {
    running: Arc<AtomicBool>,
    queries: mpsc::Sender<SnapshotRequest>,
}

impl RuntimeHandle {
    /// Fetches a snapshot from inside the processing loop.
    pub async fn snapshot(&self) -> Result<Snapshot, EnvError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.queries
            .send(reply_tx)
            .await
            .map_err(|_| EnvError::closed("processing loop stopped"))?;
        reply_rx
            .await
            .map_err(|_| EnvError::closed("snapshot request dropped"))
    }

    /// Asks both loops to stop; each notices within one poll interval.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Flag to hand to [`run_receive_loop`].
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }
}
