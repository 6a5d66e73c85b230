//! Synthetic feed for simulation.
//!
//! [`FeedGenerator`] builds relay envelopes in the exact shape the public
//! relay publishes. [`TrafficOracle`] keeps the ground truth of where each
//! simulated commander is and turns random journeys into the noisy,
//! duplicate-prone message stream the tracker has to reconcile.

use chrono::{DateTime, Duration, Utc};
use megaship_core::feed::{encode_frame, FeedEnvelope, FeedError, FeedHeader};
use rand::seq::SliceRandom;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde_json::{json, Value};
use std::collections::BTreeMap;

pub const SCAN_SCHEMA: &str = "https://eddn.edcd.io/schemas/fsssignaldiscovered/1";
pub const JOURNAL_SCHEMA: &str = "https://eddn.edcd.io/schemas/journal/1";
pub const ROUTE_SCHEMA: &str = "https://eddn.edcd.io/schemas/navroute/1";

/// Relay timestamp format (second precision, `Z` suffix).
pub fn feed_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Builds relay envelopes on behalf of simulated uploaders.
#[derive(Debug, Clone)]
pub struct FeedGenerator {
    software_name: String,
    software_version: String,
}

impl Default for FeedGenerator {
    fn default() -> Self {
        Self::new("megaship-sim")
    }
}

impl FeedGenerator {
    pub fn new(software_name: &str) -> Self {
        Self {
            software_name: software_name.to_string(),
            software_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    fn envelope(&self, schema: &str, uploader: &str, message: Value) -> FeedEnvelope {
        FeedEnvelope {
            schema_ref: schema.to_string(),
            header: FeedHeader {
                uploader_id: Some(uploader.to_string()),
                software_name: Some(self.software_name.clone()),
                software_version: Some(self.software_version.clone()),
                gateway_timestamp: None,
            },
            message,
        }
    }

    /// Signal-discovery scan; `signals` are `(SignalName, SignalType)` pairs.
    pub fn scan(
        &self,
        uploader: &str,
        system: &str,
        address: u64,
        at: DateTime<Utc>,
        signals: &[(&str, &str)],
    ) -> FeedEnvelope {
        let signals: Vec<Value> = signals
            .iter()
            .map(|(name, kind)| json!({"SignalName": name, "SignalType": kind}))
            .collect();
        self.envelope(
            SCAN_SCHEMA,
            uploader,
            json!({
                "StarSystem": system,
                "SystemAddress": address,
                "timestamp": feed_timestamp(at),
                "signals": signals,
            }),
        )
    }

    /// Jump-confirmed journal event.
    pub fn jump(&self, uploader: &str, system: &str, address: u64, at: DateTime<Utc>) -> FeedEnvelope {
        self.journal(uploader, "FSDJump", system, address, at)
    }

    /// Any journal event (only `FSDJump` is acted upon).
    pub fn journal(
        &self,
        uploader: &str,
        event: &str,
        system: &str,
        address: u64,
        at: DateTime<Utc>,
    ) -> FeedEnvelope {
        self.envelope(
            JOURNAL_SCHEMA,
            uploader,
            json!({
                "event": event,
                "StarSystem": system,
                "SystemAddress": address,
                "timestamp": feed_timestamp(at),
            }),
        )
    }

    /// Plotted route through `waypoints`, starting at the current system.
    pub fn route(&self, uploader: &str, waypoints: &[&str], at: DateTime<Utc>) -> FeedEnvelope {
        let route: Vec<Value> = waypoints
            .iter()
            .map(|system| json!({"StarSystem": system}))
            .collect();
        self.envelope(
            ROUTE_SCHEMA,
            uploader,
            json!({"Route": route, "timestamp": feed_timestamp(at)}),
        )
    }

    /// Compressed wire frame for an envelope.
    pub fn frame(&self, envelope: &FeedEnvelope) -> Result<Vec<u8>, FeedError> {
        encode_frame(envelope)
    }
}

/// A message together with the moment it reaches the tracker.
#[derive(Debug, Clone)]
pub struct TimedEnvelope {
    pub arrives_at: DateTime<Utc>,
    pub envelope: FeedEnvelope,
}

/// Ground truth of one simulated commander.
#[derive(Debug, Clone)]
struct Commander {
    uploader: String,
    system: String,
}

/// What actually happened on one journey, for invariant checks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JourneyStats {
    pub routes_planned: u64,
    pub jumps_completed: u64,
    pub duplicates_injected: u64,
    /// Real arrivals per destination
    pub arrivals: BTreeMap<String, u64>,
}

/// Ground-truth commander movement and the noisy reports it produces.
pub struct TrafficOracle {
    rng: ChaCha8Rng,
    commanders: Vec<Commander>,
    destinations: Vec<String>,

    /// Chance a commander actually jumps after plotting
    jump_probability: f64,
    /// Chance a second tool relays the same event
    relay_probability: f64,
    /// Chance the uploader's client retransmits a jump
    retransmit_probability: f64,

    stats: JourneyStats,
}

impl TrafficOracle {
    /// Spreads `commanders` over `destinations` (monitored or not).
    pub fn new(mut rng: ChaCha8Rng, destinations: Vec<String>, commanders: usize) -> Self {
        let commanders = (0..commanders)
            .map(|i| Commander {
                uploader: format!("cmdr{:03}", i),
                system: destinations
                    .choose(&mut rng)
                    .cloned()
                    .unwrap_or_default(),
            })
            .collect();

        Self {
            rng,
            commanders,
            destinations,
            jump_probability: 0.85,
            relay_probability: 0.2,
            retransmit_probability: 0.15,
            stats: JourneyStats::default(),
        }
    }

    pub fn stats(&self) -> &JourneyStats {
        &self.stats
    }

    /// One random journey starting at `now`: a route plan, usually a jump,
    /// plus whatever duplicates the relay network adds.
    pub fn journey(&mut self, generator: &FeedGenerator, now: DateTime<Utc>) -> Vec<TimedEnvelope> {
        let mut out = Vec::new();
        if self.commanders.is_empty() || self.destinations.len() < 2 {
            return out;
        }

        let idx = self.rng.gen_range(0..self.commanders.len());
        let origin = self.commanders[idx].system.clone();
        let uploader = self.commanders[idx].uploader.clone();

        let destination = loop {
            let candidate = self.destinations[self.rng.gen_range(0..self.destinations.len())].clone();
            if candidate != origin {
                break candidate;
            }
        };

        let route = generator.route(&uploader, &[&origin, &destination], now);
        out.push(self.delayed(route.clone(), now, 3));
        self.stats.routes_planned += 1;

        if self.rng.gen_bool(self.relay_probability) {
            let relay = self.other_uploader(idx);
            let duplicate = generator.route(&relay, &[&origin, &destination], now);
            out.push(self.delayed(duplicate, now, 3));
            self.stats.duplicates_injected += 1;
        }

        if !self.rng.gen_bool(self.jump_probability) {
            return out;
        }

        let jumped_at = now + Duration::seconds(self.rng.gen_range(20..60));
        let jump = generator.jump(&uploader, &destination, 0, jumped_at);
        out.push(self.delayed(jump, jumped_at, 5));
        self.stats.jumps_completed += 1;
        *self.stats.arrivals.entry(destination.clone()).or_default() += 1;
        self.commanders[idx].system = destination.clone();

        // A relayed copy that beats the original leaves the uploader's own
        // retransmit window unset, so one journey carries at most one kind
        if self.rng.gen_bool(self.retransmit_probability) {
            let resend_at = jumped_at + Duration::seconds(5);
            let resend = generator.jump(&uploader, &destination, 0, resend_at);
            out.push(self.delayed(resend, resend_at, 5));
            self.stats.duplicates_injected += 1;
        } else if self.rng.gen_bool(self.relay_probability) {
            let relay = self.other_uploader(idx);
            let duplicate = generator.jump(&relay, &destination, 0, jumped_at);
            out.push(self.delayed(duplicate, jumped_at, 5));
            self.stats.duplicates_injected += 1;
        }

        out
    }

    fn other_uploader(&mut self, idx: usize) -> String {
        format!("relay{:03}_{}", self.rng.gen_range(0..1000), idx)
    }

    fn delayed(&mut self, envelope: FeedEnvelope, at: DateTime<Utc>, max_delay_secs: i64) -> TimedEnvelope {
        TimedEnvelope {
            arrives_at: at + Duration::seconds(self.rng.gen_range(0..=max_delay_secs)),
            envelope,
        }
    }
}
