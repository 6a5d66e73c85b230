//! Megaship Core - Presence and Traffic Reconciliation for the Relay Feed
//!
//! Turns a noisy, duplicate-prone stream of player-uploaded observations into
//! a clean model of two things:
//! 1. **Where each tracked megaship is**: exact-name detections debounced by
//!    consecutive missing scans before a ship is declared gone
//! 2. **How many commanders are in each monitored system**: route plans paired
//!    with jump confirmations, deduplicated across uploaders and retransmits,
//!    with timeout-based cleanup of departures that never resolve
//!
//! All state lives in a [`Dispatcher`] owned by one processing loop; the
//! [`runtime`] module feeds it from a blocking receive loop and fans derived
//! events out to sinks.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod feed;
pub mod model;
pub mod routes;
pub mod runtime;
pub mod signals;
pub mod snapshot;

pub use config::{Registry, RuntimeConfig, SystemIdentity, TrackerConfig};
pub use dispatch::{Dispatcher, MessageKind};
pub use error::TrackerError;
pub use events::{
    EventSink, LoggingSink, MegashipEvent, Notification, NotificationSink, Outcome, SinkError,
    TrackerEvent, TrafficAction, TrafficEvent,
};
pub use feed::{decode_frame, encode_frame, FeedEnvelope, FeedError, FeedHeader, ZmqFeedSource};
pub use model::{ShipState, ShipStatusLabel, SignalStatus};
pub use runtime::{feed_channel, run_receive_loop, spawn_receive_loop, IngestStats, RuntimeHandle, TrackerRuntime};
pub use snapshot::{Counters, Snapshot, SystemSnapshot};
