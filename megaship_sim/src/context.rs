//! Simulation context implementing TrackerContext for deterministic testing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use megaship_env::TrackerContext;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// 2024-01-01 00:00:00 UTC
const DEFAULT_EPOCH_SECS: u64 = 1_704_067_200;

/// Simulation context backed by a virtual clock and seeded randomness.
///
/// - Virtual time only moves through `advance_time`, `set_time`, `pin_to`
///   or `sleep`
/// - Wall-clock time is `epoch + virtual time`, so feed timestamps can be
///   generated relative to the same anchor the tracker compares against
/// - Every random stream is derived from the master seed
pub struct SimContext {
    /// Master seed for this simulation
    seed: u64,

    /// Current virtual time (nanoseconds since simulation start)
    virtual_time_ns: Arc<AtomicU64>,

    /// Virtual time 0 maps to this wall-clock time
    epoch: SystemTime,
}

impl SimContext {
    /// Creates a new SimContext anchored at the default epoch.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            virtual_time_ns: Arc::new(AtomicU64::new(0)),
            epoch: UNIX_EPOCH + Duration::from_secs(DEFAULT_EPOCH_SECS),
        }
    }

    /// Creates a context whose virtual time 0 is `epoch`.
    pub fn with_epoch(seed: u64, epoch: DateTime<Utc>) -> Self {
        Self {
            epoch: SystemTime::from(epoch),
            ..Self::new(seed)
        }
    }

    /// Creates an Arc-wrapped context for sharing.
    pub fn shared(seed: u64) -> Arc<Self> {
        Arc::new(Self::new(seed))
    }

    /// Advances virtual time by the given duration.
    pub fn advance_time(&self, duration: Duration) {
        self.virtual_time_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::SeqCst);
    }

    /// Sets the virtual time to a specific value.
    pub fn set_time(&self, time_ns: u64) {
        self.virtual_time_ns.store(time_ns, Ordering::SeqCst);
    }

    /// Moves the clock to a wall-clock instant. Instants before the epoch pin to it.
    pub fn pin_to(&self, at: DateTime<Utc>) {
        let offset = SystemTime::from(at)
            .duration_since(self.epoch)
            .unwrap_or(Duration::ZERO);
        self.set_time(offset.as_nanos() as u64);
    }

    /// Returns the current virtual time in nanoseconds.
    pub fn time_ns(&self) -> u64 {
        self.virtual_time_ns.load(Ordering::SeqCst)
    }

    pub fn epoch(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from(self.epoch)
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Independent deterministic random stream for one consumer.
    pub fn rng(&self, stream: u64) -> ChaCha8Rng {
        let combined_seed = self.seed.wrapping_mul(0x517cc1b727220a95) ^ stream;
        ChaCha8Rng::seed_from_u64(combined_seed)
    }
}

impl Clone for SimContext {
    fn clone(&self) -> Self {
        Self {
            seed: self.seed,
            virtual_time_ns: Arc::clone(&self.virtual_time_ns),
            epoch: self.epoch,
        }
    }
}

#[async_trait]
impl TrackerContext for SimContext {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.time_ns())
    }

    fn system_time(&self) -> SystemTime {
        self.epoch + self.now()
    }

    async fn sleep(&self, duration: Duration) {
        // Sleeping is how virtual time passes; yield so queued tasks still run
        self.advance_time(duration);
        tokio::task::yield_now().await;
    }

    fn spawn<F>(&self, _name: &str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(future);
    }
}
