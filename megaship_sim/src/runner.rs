//! Scenario runner - drives the tracker through deterministic feeds.

use crate::context::SimContext;
use crate::feedgen::{FeedGenerator, TimedEnvelope, TrafficOracle};
use crate::recorder::RecordingSink;
use crate::scenarios::ScenarioId;
use crate::source::{envelope_timestamp, ReplaySource};

use chrono::{DateTime, Duration, Utc};
use megaship_core::events::{Notification, Outcome, TrackerEvent, TrafficAction, TrafficEvent};
use megaship_core::feed::FeedEnvelope;
use megaship_core::runtime::{feed_channel, run_receive_loop, IngestStats, TrackerRuntime};
use megaship_core::{Dispatcher, RuntimeConfig, ShipStatusLabel, SignalStatus, Snapshot, TrackerConfig, TrackerError};
use megaship_env::TrackerContext;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{debug, info};

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Virtual seconds elapsed at the end of the run
    pub final_time_secs: f64,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScenarioMetrics {
    /// Envelopes handed to the tracker
    pub messages_sent: u64,

    /// Envelopes the Dispatcher discarded
    pub messages_dropped: u64,

    /// Frames the receive loop could not decode
    pub frames_dropped: u64,

    pub events_emitted: u64,
    pub notifications: u64,

    /// Relayed or retransmitted copies injected by the feed model
    pub duplicates_injected: u64,
}

type Check = Result<(), String>;

fn ensure(condition: bool, reason: impl FnOnce() -> String) -> Check {
    if condition {
        Ok(())
    } else {
        Err(reason())
    }
}

/// A Dispatcher on a virtual clock, remembering everything it emitted.
struct Harness {
    ctx: SimContext,
    gen: FeedGenerator,
    dispatcher: Dispatcher,
    events: Vec<TrackerEvent>,
    notifications: Vec<Notification>,
}

impl Harness {
    fn new(seed: u64, config: &TrackerConfig) -> Result<Self, String> {
        Ok(Self {
            ctx: SimContext::new(seed),
            gen: FeedGenerator::default(),
            dispatcher: Dispatcher::new(config.clone()).map_err(|e| e.to_string())?,
            events: Vec::new(),
            notifications: Vec::new(),
        })
    }

    fn at(&self, secs: i64) -> DateTime<Utc> {
        self.ctx.epoch() + Duration::seconds(secs)
    }

    fn address(&self, system: &str) -> u64 {
        self.dispatcher
            .registry()
            .system(system)
            .map(|s| s.address)
            .unwrap_or(0)
    }

    /// Dispatches at the current virtual time.
    fn feed(&mut self, envelope: &FeedEnvelope) -> Outcome {
        let outcome = self.dispatcher.dispatch(envelope, self.ctx.utc_now());
        self.events.extend(outcome.events.iter().cloned());
        self.notifications.extend(outcome.notifications.iter().cloned());
        outcome
    }

    /// Moves the clock to `secs` after the epoch, then dispatches.
    fn feed_at(&mut self, secs: i64, envelope: &FeedEnvelope) -> Outcome {
        self.ctx.pin_to(self.at(secs));
        self.feed(envelope)
    }

    fn traffic(&self, action: TrafficAction) -> Vec<&TrafficEvent> {
        self.events
            .iter()
            .filter_map(TrackerEvent::as_traffic)
            .filter(|e| e.action == action)
            .collect()
    }

    fn metrics(&self) -> ScenarioMetrics {
        let counters = self.dispatcher.counters();
        ScenarioMetrics {
            messages_sent: counters.messages_seen,
            messages_dropped: counters.messages_dropped,
            events_emitted: self.events.len() as u64,
            notifications: self.notifications.len() as u64,
            ..Default::default()
        }
    }
}

/// Runs reconciliation scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Tracker configuration under test
    config: TrackerConfig,
}

impl ScenarioRunner {
    /// Creates a runner with the stock configuration.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            config: TrackerConfig::default(),
        }
    }

    /// Replaces the tracker configuration.
    ///
    /// Scenarios refer to the stock ships and systems ("Cygnus", "Nukamba",
    /// "Graffias", ...), so overrides should keep those.
    pub fn with_config(mut self, config: TrackerConfig) -> Self {
        self.config = config;
        self
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);
        debug!("  {}", scenario.description());

        let outcome = match scenario {
            ScenarioId::SignalDebounce => self.run_signal_debounce(),
            ScenarioId::PlannedJump => self.run_planned_jump(),
            ScenarioId::DuplicateUploads => self.run_duplicate_uploads(),
            ScenarioId::DepartureTimeout => self.run_departure_timeout(),
            ScenarioId::StaleFeed => self.run_stale_feed(),
            ScenarioId::CarrierDecoy => self.run_carrier_decoy(),
            ScenarioId::TrafficStorm => self.run_traffic_storm(),
        };

        match outcome {
            Ok((metrics, final_time_secs)) => ScenarioResult {
                scenario,
                seed: self.seed,
                passed: true,
                final_time_secs,
                failure_reason: None,
                metrics,
            },
            Err(reason) => ScenarioResult {
                scenario,
                seed: self.seed,
                passed: false,
                final_time_secs: 0.0,
                failure_reason: Some(reason),
                metrics: ScenarioMetrics::default(),
            },
        }
    }

    fn finish(harness: &Harness) -> Result<(ScenarioMetrics, f64), String> {
        Ok((harness.metrics(), harness.ctx.now().as_secs_f64()))
    }

    /// SIM-001: SignalDebounce - detection, five misses, jump trigger, return.
    fn run_signal_debounce(&self) -> Result<(ScenarioMetrics, f64), String> {
        info!("SIM-001: SignalDebounce");
        let mut h = Harness::new(self.seed, &self.config)?;
        let nukamba = h.address("Nukamba");
        let graffias = h.address("Graffias");

        let scan = h.gen.scan("scout", "Nukamba", nukamba, h.at(0), &[("Cygnus", "Combat")]);
        let out = h.feed_at(0, &scan);
        let detected: Vec<_> = out.megaships().collect();
        ensure(
            detected.len() == 1 && detected[0].status == ShipStatusLabel::Detected,
            || format!("expected one DETECTED event, got {:?}", detected),
        )?;

        for minute in 1..=6i64 {
            let scan = h.gen.scan("scout", "Nukamba", nukamba, h.at(minute * 60), &[("Beacon", "NavBeacon")]);
            let out = h.feed_at(minute * 60, &scan);
            let missing: Vec<_> = out.megaships().collect();

            match minute {
                1..=4 => ensure(missing.is_empty(), || format!("miss {} emitted {:?}", minute, missing))?,
                5 => ensure(
                    missing.len() == 1
                        && missing[0].status == ShipStatusLabel::SignalMissing
                        && missing[0].previous_detection == Some(h.at(0)),
                    || format!("fifth miss should emit SIGNAL MISSING, got {:?}", missing),
                )?,
                _ => {
                    ensure(missing.is_empty(), || "SIGNAL MISSING emitted twice".to_string())?;
                    let jumped = out.notifications.iter().any(|n| {
                        matches!(n, Notification::ShipJumped { origin_system, .. } if origin_system == "Nukamba")
                    });
                    ensure(jumped, || "sixth miss should fire the jump trigger".to_string())?;
                }
            }
        }

        let scan = h.gen.scan("scout", "Graffias", graffias, h.at(420), &[("Cygnus", "Combat")]);
        let out = h.feed_at(420, &scan);
        let appeared = out.notifications.iter().any(|n| {
            matches!(n, Notification::ShipAppeared { system, .. } if system == "Graffias")
        });
        ensure(appeared, || "re-detection elsewhere should fire the appeared trigger".to_string())?;
        ensure(
            h.dispatcher.signals().last_known_system("Cygnus") == Some("Graffias"),
            || "last known system not updated".to_string(),
        )?;

        Self::finish(&h)
    }

    /// SIM-002: PlannedJump - route A->B then the jump into B.
    fn run_planned_jump(&self) -> Result<(ScenarioMetrics, f64), String> {
        info!("SIM-002: PlannedJump");
        let mut h = Harness::new(self.seed, &self.config)?;

        let route = h.gen.route("pilot", &["Nukamba", "Graffias"], h.at(0));
        let out = h.feed_at(0, &route);
        let planned = out
            .traffic()
            .any(|e| e.action == TrafficAction::PlannedDeparture && e.destination.as_deref() == Some("Graffias"));
        ensure(planned, || "route plan should emit planned_departure".to_string())?;

        let jump = h.gen.jump("pilot", "Graffias", h.address("Graffias"), h.at(30));
        let out = h.feed_at(30, &jump);
        let seen: Vec<_> = out
            .traffic()
            .map(|e| (e.action, e.system.as_str(), e.commander_count))
            .collect();
        ensure(
            seen == vec![
                (TrafficAction::ArrivedPlanned, "Graffias", Some(1)),
                (TrafficAction::Departed, "Nukamba", Some(0)),
            ],
            || format!("unexpected traffic {:?}", seen),
        )?;

        Self::finish(&h)
    }

    /// SIM-003: DuplicateUploads - relays and retransmits through the full
    /// receive loop and processing loop.
    fn run_duplicate_uploads(&self) -> Result<(ScenarioMetrics, f64), String> {
        info!("SIM-003: DuplicateUploads");
        let ctx = SimContext::new(self.seed);
        let gen = FeedGenerator::default();
        let at = |secs: i64| ctx.epoch() + Duration::seconds(secs);

        let envelopes = vec![
            gen.jump("alice", "Nukamba", 1, at(0)),
            gen.jump("relay-b", "Nukamba", 1, at(0)),
            gen.jump("relay-c", "Nukamba", 1, at(0)),
            gen.jump("alice", "Nukamba", 1, at(10)),
            gen.route("dave", &["Nukamba", "Graffias"], at(20)),
            gen.route("relay-e", &["Nukamba", "Graffias"], at(20)),
            gen.jump("dave", "Graffias", 2, at(50)),
        ];

        let mut source = ReplaySource::from_envelopes(&envelopes).map_err(|e| e.to_string())?;
        source.push_raw(b"\x78\x9c garbage".to_vec());

        let runtime_config = RuntimeConfig {
            channel_capacity: envelopes.len() + 1,
            idle_poll: std::time::Duration::from_millis(1),
        };
        let (tx, rx) = feed_channel(&runtime_config);
        let stats = IngestStats::shared();

        // Channel holds the whole replay, so the loop never blocks here
        run_receive_loop(source, tx, Arc::new(AtomicBool::new(true)), stats.clone());

        ctx.pin_to(at(55));
        let sink = Arc::new(RecordingSink::new());
        let dispatcher = Dispatcher::new(self.config.clone()).map_err(|e| e.to_string())?;
        let runtime = TrackerRuntime::new(Arc::new(ctx.clone()), dispatcher, runtime_config)
            .with_event_sink(sink.clone())
            .with_notification_sink(sink.clone());

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| e.to_string())?;
        let recorder = sink.clone();
        let dispatcher = rt.block_on(async move {
            let dispatcher = runtime.run(rx).await;
            let expected = dispatcher.snapshot().recent_events.len();
            for _ in 0..100 {
                if recorder.len() >= expected {
                    break;
                }
                tokio::task::yield_now().await;
            }
            dispatcher
        });

        let snapshot = dispatcher.snapshot();
        ensure(stats.frames_dropped() == 1, || {
            format!("expected 1 corrupted frame, got {}", stats.frames_dropped())
        })?;
        ensure(snapshot.counters.messages_seen == envelopes.len() as u64, || {
            format!("expected {} messages, got {}", envelopes.len(), snapshot.counters.messages_seen)
        })?;
        ensure(snapshot.systems["Nukamba"].jumps_to == 1, || {
            format!("Nukamba arrivals counted {} times", snapshot.systems["Nukamba"].jumps_to)
        })?;
        ensure(
            snapshot.commander_count("Nukamba") == 0 && snapshot.commander_count("Graffias") == 1,
            || format!("unexpected counts {:?}", snapshot.systems),
        )?;

        let traffic = sink.traffic();
        let planned = traffic
            .iter()
            .filter(|e| e.action == TrafficAction::PlannedDeparture)
            .count();
        ensure(planned == 1, || format!("expected 1 planned_departure, got {}", planned))?;
        ensure(sink.len() == snapshot.recent_events.len(), || {
            format!("sink saw {} of {} events", sink.len(), snapshot.recent_events.len())
        })?;

        let metrics = ScenarioMetrics {
            messages_sent: snapshot.counters.messages_seen,
            messages_dropped: snapshot.counters.messages_dropped,
            frames_dropped: stats.frames_dropped(),
            events_emitted: sink.len() as u64,
            notifications: sink.notifications().len() as u64,
            duplicates_injected: 4,
        };
        Ok((metrics, ctx.now().as_secs_f64()))
    }

    /// SIM-004: DepartureTimeout - an unmatched departure resolves once.
    fn run_departure_timeout(&self) -> Result<(ScenarioMetrics, f64), String> {
        info!("SIM-004: DepartureTimeout");
        let mut h = Harness::new(self.seed, &self.config)?;

        let arrive = h.gen.jump("ulysses", "Nukamba", h.address("Nukamba"), h.at(0));
        h.feed_at(0, &arrive);
        let route = h.gen.route("ulysses", &["Nukamba", "Sol"], h.at(10));
        h.feed_at(10, &route);

        for (secs, uploader, system) in [(320, "victor", "Graffias"), (400, "wendy", "Marfic")] {
            let jump = h.gen.jump(uploader, system, h.address(system), h.at(secs));
            h.feed_at(secs, &jump);
        }

        // The lost commander finally reports in, long after the route expired
        let late = h.gen.jump("ulysses", "Sol", 0, h.at(420));
        h.feed_at(420, &late);

        let timeouts = h.traffic(TrafficAction::DepartedTimeout);
        ensure(timeouts.len() == 1, || format!("expected 1 departed_timeout, got {}", timeouts.len()))?;
        ensure(
            timeouts[0].system == "Nukamba"
                && timeouts[0].destination.as_deref() == Some("Sol")
                && timeouts[0].timestamp == h.at(10),
            || format!("unexpected timeout event {:?}", timeouts[0]),
        )?;
        ensure(h.traffic(TrafficAction::Departed).is_empty(), || {
            "late arrival resolved the departure a second time".to_string()
        })?;

        let nukamba = h
            .dispatcher
            .systems()
            .get("Nukamba")
            .ok_or_else(|| "Nukamba not monitored".to_string())?;
        ensure(nukamba.jumps_from == 1 && nukamba.commander_count == 0, || {
            format!("Nukamba jumps_from={} count={}", nukamba.jumps_from, nukamba.commander_count)
        })?;

        Self::finish(&h)
    }

    /// SIM-005: StaleFeed - old and future messages are inert.
    fn run_stale_feed(&self) -> Result<(ScenarioMetrics, f64), String> {
        info!("SIM-005: StaleFeed");
        let mut h = Harness::new(self.seed, &self.config)?;
        let now = 1_000;
        let nukamba = h.address("Nukamba");

        for offset in [-660i64, 660] {
            let t = h.at(now + offset);
            let batch = [
                h.gen.scan("old", "Nukamba", nukamba, t, &[("Cygnus", "Combat")]),
                h.gen.jump("old", "Nukamba", nukamba, t),
                h.gen.route("old", &["Nukamba", "Graffias"], t),
            ];
            for envelope in &batch {
                h.feed_at(now, envelope);
            }
        }

        ensure(h.events.is_empty(), || format!("stale messages emitted {:?}", h.events))?;
        let snapshot = h.dispatcher.snapshot();
        ensure(snapshot.total_commanders() == 0, || "stale jump counted".to_string())?;
        ensure(
            snapshot.ships.values().all(|s| s.status == SignalStatus::NotDetected),
            || "stale scan changed ship state".to_string(),
        )?;

        let fresh = h.gen.jump("new", "Nukamba", nukamba, h.at(now));
        h.feed_at(now, &fresh);
        ensure(h.dispatcher.systems().get("Nukamba").map(|s| s.commander_count) == Some(1), || {
            "fresh message after stale ones was not processed".to_string()
        })?;

        Self::finish(&h)
    }

    /// SIM-006: CarrierDecoy - carriers never count as ship detections.
    fn run_carrier_decoy(&self) -> Result<(ScenarioMetrics, f64), String> {
        info!("SIM-006: CarrierDecoy");
        let mut h = Harness::new(self.seed, &self.config)?;
        let nukamba = h.address("Nukamba");

        let scan = h.gen.scan(
            "scout",
            "Nukamba",
            nukamba,
            h.at(0),
            &[("Cygnus", "FleetCarrier"), ("X1Z-9QA", "FleetCarrier"), ("The Orion", "Megaship")],
        );
        let out = h.feed_at(0, &scan);
        let names: Vec<_> = out.megaships().map(|e| e.name.as_str()).collect();
        ensure(names == vec!["The Orion"], || format!("unexpected detections {:?}", names))?;

        let system = h
            .dispatcher
            .systems()
            .get("Nukamba")
            .ok_or_else(|| "Nukamba not monitored".to_string())?;
        ensure(system.fleet_carrier_count == 2, || {
            format!("expected 2 carriers, got {}", system.fleet_carrier_count)
        })?;
        ensure(system.status_of("Cygnus") == SignalStatus::NotDetected, || {
            "decoy carrier detected as Cygnus".to_string()
        })?;

        let scan = h.gen.scan("scout", "Nukamba", nukamba, h.at(60), &[("Q2K-7TT", "FleetCarrier")]);
        h.feed_at(60, &scan);
        let count = h.dispatcher.systems().get("Nukamba").map(|s| s.fleet_carrier_count);
        ensure(count == Some(1), || format!("carrier count not replaced: {:?}", count))?;

        let scan = h.gen.scan("tourist", "Sol", 10477373803, h.at(120), &[("Cygnus", "Megaship")]);
        let out = h.feed_at(120, &scan);
        ensure(out.megaships().all(|e| e.is_irregular), || "Sol sighting not irregular".to_string())?;
        ensure(
            matches!(
                h.dispatcher.signals().ship("Cygnus").map(|s| s.status),
                Some(SignalStatus::IrregularVisit(_))
            ),
            || "Cygnus should be on an irregular visit".to_string(),
        )?;

        Self::finish(&h)
    }

    /// SIM-007: TrafficStorm - random journeys with relays and retransmits.
    fn run_traffic_storm(&self) -> Result<(ScenarioMetrics, f64), String> {
        info!("SIM-007: TrafficStorm");

        let first = self.storm_pass()?;
        let second = self.storm_pass()?;
        ensure(first.0.events == second.0.events, || {
            "same seed produced different event streams".to_string()
        })?;

        let (h, duplicates) = first;
        let mut metrics = h.metrics();
        metrics.duplicates_injected = duplicates;
        Self::finish(&h).map(|(_, t)| (metrics, t))
    }

    fn storm_pass(&self) -> Result<(Harness, u64), String> {
        let mut h = Harness::new(self.seed, &self.config)?;

        let mut destinations: Vec<String> = h
            .dispatcher
            .registry()
            .systems()
            .iter()
            .map(|s| s.name.clone())
            .collect();
        destinations.extend(["Sol", "Achenar", "Shinrarta Dezhra"].map(String::from));

        let mut oracle = TrafficOracle::new(h.ctx.rng(1), destinations, 40);
        let mut feed: Vec<TimedEnvelope> = Vec::new();
        for step in 0..180i64 {
            feed.extend(oracle.journey(&h.gen, h.at(step * 20)));
        }
        feed.sort_by_key(|t| t.arrives_at);

        for timed in &feed {
            h.ctx.pin_to(timed.arrives_at);
            h.feed(&timed.envelope);
        }

        let snapshot = h.dispatcher.snapshot();
        let truth = &oracle.stats().arrivals;

        for (name, system) in &snapshot.systems {
            let real = truth.get(name).copied().unwrap_or(0);
            ensure(system.jumps_to <= real, || {
                format!("{} counted {} arrivals, only {} happened", name, system.jumps_to, real)
            })?;
            ensure(u64::from(system.commander_count) <= system.jumps_to, || {
                format!("{} holds {} commanders after {} arrivals", name, system.commander_count, system.jumps_to)
            })?;
        }
        ensure(snapshot.systems.values().any(|s| s.jumps_to > 0), || {
            "storm produced no monitored arrivals".to_string()
        })?;

        let mut timeout_keys = HashSet::new();
        for event in h.traffic(TrafficAction::DepartedTimeout) {
            let key = (event.system.clone(), event.destination.clone(), event.timestamp);
            ensure(timeout_keys.insert(key), || {
                format!("departure {} -> {:?} timed out twice", event.system, event.destination)
            })?;
        }

        debug!(
            "  storm: {} envelopes, {} events, {} open departures",
            feed.len(),
            h.events.len(),
            h.dispatcher.routes().open_departures()
        );

        let duplicates = oracle.stats().duplicates_injected;
        Ok((h, duplicates))
    }
}

// ============================================================================
// REPLAY
// ============================================================================

/// Everything a recorded feed produced.
#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    pub events: Vec<TrackerEvent>,
    pub notifications: Vec<Notification>,
    pub snapshot: Snapshot,
}

/// Replays recorded envelopes with the clock pinned to each message's own
/// timestamp, so staleness never depends on when the replay runs.
pub fn replay(envelopes: &[FeedEnvelope], config: TrackerConfig, seed: u64) -> Result<ReplayReport, TrackerError> {
    let epoch = envelopes
        .iter()
        .filter_map(envelope_timestamp)
        .min()
        .unwrap_or_else(|| SimContext::new(seed).epoch());
    let ctx = SimContext::with_epoch(seed, epoch);
    let mut dispatcher = Dispatcher::new(config)?;

    let mut events = Vec::new();
    let mut notifications = Vec::new();
    for envelope in envelopes {
        if let Some(at) = envelope_timestamp(envelope) {
            ctx.pin_to(at);
        }
        let outcome = dispatcher.dispatch(envelope, ctx.utc_now());
        events.extend(outcome.events);
        notifications.extend(outcome.notifications);
    }

    Ok(ReplayReport {
        events,
        notifications,
        snapshot: dispatcher.snapshot(),
    })
}
