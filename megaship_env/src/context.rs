//! Core environment context trait for the tracker runtime.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::{Duration, SystemTime};

/// The central interface for Environment Interaction.
///
/// This trait abstracts the "real world" so that the reconciliation engine
/// can run in both production (tokio) and simulation (virtual clock).
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time`, `SystemTime::now`
/// - **Simulation**: `SimContext` - manually advanced virtual clock
///
/// # Determinism
///
/// Staleness guards, route expiry and departure timeouts all compare feed
/// timestamps against `utc_now()`. In simulation that value only moves when
/// the harness advances it.
#[async_trait]
pub trait TrackerContext: Send + Sync + 'static {
    /// Returns the current monotonic time since context creation.
    ///
    /// Used for internal timers and duration measurements.
    fn now(&self) -> Duration;

    /// Returns the wall-clock time used to judge feed timestamps.
    fn system_time(&self) -> SystemTime;

    /// Wall-clock time as a UTC timestamp.
    fn utc_now(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from(self.system_time())
    }

    /// Suspends execution for the given duration.
    ///
    /// In production: wraps `tokio::time::sleep`
    /// In simulation: advances virtual clock
    async fn sleep(&self, duration: Duration);

    /// Spawns a detached background task.
    ///
    /// Sink deliveries go through here so a slow recipient never holds up
    /// the processing loop.
    fn spawn<F>(&self, name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static;
}
