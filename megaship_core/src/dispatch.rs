//! Message dispatch: routes decoded envelopes to the processors and keeps
//! the rolling window of recent events.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::config::{Registry, TrackerConfig};
use crate::error::TrackerError;
use crate::events::{Outcome, TrackerEvent};
use crate::feed::{FeedEnvelope, JumpReport, RoutePlan, SignalScan};
use crate::model::SystemTable;
use crate::routes::RouteTracker;
use crate::signals::SignalProcessor;
use crate::snapshot::{Counters, Snapshot};

/// Message families recognised by their schema reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    SignalScan,
    Jump,
    Route,
}

impl MessageKind {
    /// Case-insensitive substring match on `$schemaRef`.
    pub fn classify(schema_ref: &str) -> Option<Self> {
        let schema = schema_ref.to_lowercase();
        if schema.contains("fsssignaldiscovered") {
            Some(Self::SignalScan)
        } else if schema.contains("navroute") {
            Some(Self::Route)
        } else if schema.contains("journal") {
            Some(Self::Jump)
        } else {
            None
        }
    }
}

/// Single owner of all tracker state.
pub struct Dispatcher {
    registry: Arc<Registry>,
    systems: SystemTable,
    signals: SignalProcessor,
    routes: RouteTracker,

    recent_events: VecDeque<TrackerEvent>,
    recent_capacity: usize,

    messages_seen: u64,
    messages_dropped: u64,
}

impl Dispatcher {
    pub fn new(config: TrackerConfig) -> Result<Self, TrackerError> {
        config.validate()?;

        let registry = Arc::new(Registry::from_config(&config));
        let systems = SystemTable::new(&registry);

        Ok(Self {
            signals: SignalProcessor::new(registry.clone(), &config),
            routes: RouteTracker::new(registry.clone(), &config),
            registry,
            systems,
            recent_events: VecDeque::with_capacity(config.recent_events_capacity),
            recent_capacity: config.recent_events_capacity,
            messages_seen: 0,
            messages_dropped: 0,
        })
    }

    /// Handles one envelope. Never fails: bad messages are logged and dropped.
    pub fn dispatch(&mut self, envelope: &FeedEnvelope, now: DateTime<Utc>) -> Outcome {
        self.messages_seen += 1;

        if envelope.has_empty_body() {
            debug!("Dropping message with empty body ({})", envelope.schema_ref);
            self.messages_dropped += 1;
            return Outcome::default();
        }

        let Some(kind) = MessageKind::classify(&envelope.schema_ref) else {
            self.messages_dropped += 1;
            return Outcome::default();
        };

        let result = match kind {
            MessageKind::SignalScan => self.handle_scan(envelope, now),
            MessageKind::Jump => self.handle_jump(envelope, now),
            MessageKind::Route => self.handle_route(envelope, now),
        };

        match result {
            Ok(outcome) => {
                self.remember(&outcome);
                outcome
            }
            Err(TrackerError::InvalidTimestamp(raw)) => {
                warn!("Discarding {:?} message with bad timestamp: {}", kind, raw);
                self.messages_dropped += 1;
                Outcome::default()
            }
            Err(e) => {
                error!("Error processing {:?} message: {}", kind, e);
                self.messages_dropped += 1;
                Outcome::default()
            }
        }
    }

    fn handle_scan(&mut self, envelope: &FeedEnvelope, now: DateTime<Utc>) -> Result<Outcome, TrackerError> {
        let scan = SignalScan::from_body(&envelope.message)?;
        Ok(self.signals.process(&mut self.systems, &scan, now))
    }

    fn handle_jump(&mut self, envelope: &FeedEnvelope, now: DateTime<Utc>) -> Result<Outcome, TrackerError> {
        let Some(jump) = JumpReport::from_body(&envelope.message)? else {
            return Ok(Outcome::default());
        };
        let Some(uploader) = envelope.uploader_id() else {
            debug!("Ignoring jump into {} without uploader id", jump.system);
            return Ok(Outcome::default());
        };
        Ok(self.routes.process_jump(&mut self.systems, &uploader, &jump, now))
    }

    fn handle_route(&mut self, envelope: &FeedEnvelope, now: DateTime<Utc>) -> Result<Outcome, TrackerError> {
        let Some(plan) = RoutePlan::from_body(&envelope.message)? else {
            return Ok(Outcome::default());
        };
        let Some(uploader) = envelope.uploader_id() else {
            debug!("Ignoring route from {} without uploader id", plan.current_system);
            return Ok(Outcome::default());
        };
        Ok(self.routes.process_route(&uploader, &plan, now))
    }

    fn remember(&mut self, outcome: &Outcome) {
        if self.recent_capacity == 0 {
            return;
        }
        for event in &outcome.events {
            if self.recent_events.len() >= self.recent_capacity {
                self.recent_events.pop_front();
            }
            self.recent_events.push_back(event.clone());
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot::capture(
            self.signals.ships(),
            &self.systems,
            self.recent_events.iter(),
            self.counters(),
        )
    }

    pub fn counters(&self) -> Counters {
        Counters {
            messages_seen: self.messages_seen,
            messages_dropped: self.messages_dropped,
            signals_checked: self.signals.signals_checked(),
            fleet_carriers_seen: self.signals.fleet_carriers_seen(),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn systems(&self) -> &SystemTable {
        &self.systems
    }

    pub fn signals(&self) -> &SignalProcessor {
        &self.signals
    }

    pub fn routes(&self) -> &RouteTracker {
        &self.routes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SystemIdentity;
    use crate::events::TrafficAction;
    use crate::feed::FeedHeader;
    use crate::model::SignalStatus;
    use chrono::Duration;
    use serde_json::{json, Value};

    const SCAN_SCHEMA: &str = "https://eddn.edcd.io/schemas/fsssignaldiscovered/1";
    const JOURNAL_SCHEMA: &str = "https://eddn.edcd.io/schemas/journal/1";
    const ROUTE_SCHEMA: &str = "https://eddn.edcd.io/schemas/navroute/1";

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn secs(s: i64) -> DateTime<Utc> {
        t0() + Duration::seconds(s)
    }

    fn stamp(t: DateTime<Utc>) -> String {
        t.format("%Y-%m-%dT%H:%M:%SZ").to_string()
    }

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(TrackerConfig {
            ships: vec!["Cygnus".into()],
            systems: vec![SystemIdentity::new("Alpha", 1), SystemIdentity::new("Beta", 2)],
            recent_events_capacity: 3,
            ..Default::default()
        })
        .unwrap()
    }

    fn envelope(schema: &str, uploader: &str, message: Value) -> FeedEnvelope {
        FeedEnvelope {
            schema_ref: schema.into(),
            header: FeedHeader {
                uploader_id: Some(uploader.into()),
                software_name: Some("EDMC".into()),
                ..Default::default()
            },
            message,
        }
    }

    fn scan(system: &str, at: DateTime<Utc>, signals: Value) -> FeedEnvelope {
        envelope(
            SCAN_SCHEMA,
            "scanner",
            json!({"StarSystem": system, "SystemAddress": 1, "timestamp": stamp(at), "signals": signals}),
        )
    }

    fn jump(uploader: &str, system: &str, at: DateTime<Utc>) -> FeedEnvelope {
        envelope(
            JOURNAL_SCHEMA,
            uploader,
            json!({"event": "FSDJump", "StarSystem": system, "SystemAddress": 2, "timestamp": stamp(at)}),
        )
    }

    fn route(uploader: &str, from: &str, to: &str, at: DateTime<Utc>) -> FeedEnvelope {
        envelope(
            ROUTE_SCHEMA,
            uploader,
            json!({"Route": [{"StarSystem": from}, {"StarSystem": to}], "timestamp": stamp(at)}),
        )
    }

    #[test]
    fn test_classify_is_case_insensitive() {
        assert_eq!(MessageKind::classify(SCAN_SCHEMA), Some(MessageKind::SignalScan));
        assert_eq!(
            MessageKind::classify("HTTPS://EDDN.EDCD.IO/SCHEMAS/NAVROUTE/1"),
            Some(MessageKind::Route)
        );
        assert_eq!(MessageKind::classify(JOURNAL_SCHEMA), Some(MessageKind::Jump));
        assert_eq!(MessageKind::classify("https://eddn.edcd.io/schemas/commodity/3"), None);
    }

    #[test]
    fn test_scan_routed_to_signal_processor() {
        let mut d = dispatcher();
        let out = d.dispatch(
            &scan("Alpha", t0(), json!([{"SignalName": "Cygnus", "SignalType": "Megaship"}])),
            t0(),
        );

        assert_eq!(out.megaships().count(), 1);
        assert_eq!(
            d.systems().get("Alpha").unwrap().status_of("Cygnus"),
            SignalStatus::Detected(t0())
        );
        assert_eq!(d.counters().signals_checked, 1);
    }

    #[test]
    fn test_planned_jump_through_dispatch() {
        let mut d = dispatcher();
        d.dispatch(&route("U", "Alpha", "Beta", t0()), t0());
        let out = d.dispatch(&jump("U", "Beta", secs(30)), secs(30));

        let actions: Vec<_> = out.traffic().map(|e| (e.action, e.commander_count)).collect();
        assert_eq!(
            actions,
            vec![
                (TrafficAction::ArrivedPlanned, Some(1)),
                (TrafficAction::Departed, Some(0)),
            ]
        );

        let snapshot = d.snapshot();
        assert_eq!(snapshot.commander_count("Beta"), 1);
        assert_eq!(snapshot.systems["Alpha"].jumps_from, 1);
    }

    #[test]
    fn test_unknown_schema_and_empty_body_are_dropped() {
        let mut d = dispatcher();
        d.dispatch(&envelope("https://eddn.edcd.io/schemas/outfitting/2", "U", json!({"a": 1})), t0());
        d.dispatch(&envelope(JOURNAL_SCHEMA, "U", json!({})), t0());

        let counters = d.counters();
        assert_eq!(counters.messages_seen, 2);
        assert_eq!(counters.messages_dropped, 2);
    }

    #[test]
    fn test_bad_message_does_not_stop_stream() {
        let mut d = dispatcher();

        let bad = envelope(
            JOURNAL_SCHEMA,
            "U",
            json!({"event": "FSDJump", "StarSystem": "Alpha", "SystemAddress": 1, "timestamp": "yesterday"}),
        );
        assert!(d.dispatch(&bad, t0()).is_empty());

        let missing = envelope(SCAN_SCHEMA, "U", json!({"StarSystem": "Alpha", "timestamp": stamp(t0())}));
        assert!(d.dispatch(&missing, t0()).is_empty());

        let out = d.dispatch(&jump("U", "Alpha", t0()), t0());
        assert_eq!(out.traffic().count(), 1);
        assert_eq!(d.counters().messages_dropped, 2);
    }

    #[test]
    fn test_other_journal_events_are_ignored() {
        let mut d = dispatcher();
        let docked = envelope(
            JOURNAL_SCHEMA,
            "U",
            json!({"event": "Docked", "StarSystem": "Alpha", "timestamp": stamp(t0())}),
        );

        assert!(d.dispatch(&docked, t0()).is_empty());
        assert_eq!(d.counters().messages_dropped, 0);
        assert_eq!(d.systems().get("Alpha").unwrap().commander_count, 0);
    }

    #[test]
    fn test_jump_without_uploader_is_ignored() {
        let mut d = dispatcher();
        let mut anonymous = jump("U", "Alpha", t0());
        anonymous.header.software_name = None;

        assert!(d.dispatch(&anonymous, t0()).is_empty());
        assert_eq!(d.systems().get("Alpha").unwrap().commander_count, 0);
    }

    #[test]
    fn test_recent_events_window_is_bounded() {
        let mut d = dispatcher();
        for (i, uploader) in ["A", "B", "C", "D", "E"].iter().enumerate() {
            d.dispatch(&jump(uploader, "Alpha", secs(i as i64)), secs(i as i64));
        }

        let snapshot = d.snapshot();
        assert_eq!(snapshot.recent_events.len(), 3);
        let counts: Vec<_> = snapshot
            .recent_events
            .iter()
            .filter_map(TrackerEvent::as_traffic)
            .map(|e| e.commander_count)
            .collect();
        assert_eq!(counts, vec![Some(3), Some(4), Some(5)]);
    }
}
