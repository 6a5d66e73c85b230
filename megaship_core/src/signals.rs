//! The "SIGNALS" Engine - Megaship Presence Debouncing
//!
//! Turns independent, duplicate-prone signal scans into a stable presence
//! state per (ship, system):
//! 1. Staleness guard (scan time vs. local clock)
//! 2. Exact-name detection, excluding fleet-carrier contacts
//! 3. Missing-confirmation debounce before declaring a ship gone
//! 4. Fleet-carrier tally for the scanned system
//!
//! ```text
//! NotDetected ──match──► Detected ──miss×1..4──► Detected (unchanged)
//!                           ▲                        │
//!                           │                     miss×5
//!                         match                      ▼
//!                           └──────────────── SignalMissing
//! ```

use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{Registry, TrackerConfig};
use crate::events::{MegashipEvent, Notification, Outcome, TrackerEvent};
use crate::feed::{Signal, SignalScan};
use crate::model::{outside_window, ShipState, ShipStatusLabel, SignalStatus, SystemTable};

/// Key of the missing-confirmation counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MissingKey {
    ship: String,
    system: String,
}

impl MissingKey {
    fn new(ship: &str, system: &str) -> Self {
        Self {
            ship: ship.to_string(),
            system: system.to_string(),
        }
    }
}

/// Debounced megaship presence tracker.
pub struct SignalProcessor {
    registry: Arc<Registry>,

    staleness_window: Duration,

    /// Consecutive misses before SIGNAL MISSING is emitted
    emit_threshold: u32,

    /// Miss count at which the one-shot "jumped" trigger fires
    jump_threshold: u32,

    /// Global state per tracked ship
    ships: BTreeMap<String, ShipState>,

    /// Absent-scan counters; removed on any fresh detection
    missing_confirmations: HashMap<MissingKey, u32>,

    /// Monitored system each ship was last detected in
    last_known_system: HashMap<String, String>,

    signals_checked: u64,
    fleet_carriers_seen: u64,
}

impl SignalProcessor {
    pub fn new(registry: Arc<Registry>, config: &TrackerConfig) -> Self {
        let ships = registry
            .ships()
            .iter()
            .map(|name| (name.clone(), ShipState::default()))
            .collect();

        Self {
            registry,
            staleness_window: config.staleness_window(),
            emit_threshold: config.missing_emit_threshold,
            jump_threshold: config.missing_jump_threshold,
            ships,
            missing_confirmations: HashMap::new(),
            last_known_system: HashMap::new(),
            signals_checked: 0,
            fleet_carriers_seen: 0,
        }
    }

    /// Processes one signal scan against the local clock `now`.
    pub fn process(&mut self, systems: &mut SystemTable, scan: &SignalScan, now: DateTime<Utc>) -> Outcome {
        let mut outcome = Outcome::default();

        if outside_window(now, scan.timestamp, self.staleness_window) {
            debug!(
                "Ignoring old scan of {} from {} (diff: {}s)",
                scan.system,
                scan.timestamp,
                (now - scan.timestamp).num_seconds()
            );
            return outcome;
        }

        if scan.signals.is_empty() {
            return outcome;
        }

        self.signals_checked += scan.signals.len() as u64;

        let monitored = self.registry.is_monitored(&scan.system);
        let mut found: HashSet<&str> = HashSet::new();
        let mut fleet_carriers = 0u32;

        for signal in &scan.signals {
            let is_carrier = self.registry.is_fleet_carrier(&signal.signal_type);

            if monitored && is_carrier {
                fleet_carriers += 1;
                self.fleet_carriers_seen += 1;
            }

            // Exact name, and never a carrier that happens to share it
            if is_carrier || !self.registry.is_tracked_ship(&signal.name) {
                continue;
            }
            if !found.insert(signal.name.as_str()) {
                continue;
            }

            self.record_detection(systems, scan, signal, monitored, &mut outcome);
        }

        if monitored {
            self.check_missing(systems, scan, &found, &mut outcome);

            if let Some(system) = systems.get_mut(&scan.system) {
                system.fleet_carrier_count = fleet_carriers;
            }
            if fleet_carriers > 0 {
                debug!("Fleet Carriers in {}: {}", scan.system, fleet_carriers);
            }
        }

        outcome
    }

    fn record_detection(
        &mut self,
        systems: &mut SystemTable,
        scan: &SignalScan,
        signal: &Signal,
        monitored: bool,
        outcome: &mut Outcome,
    ) {
        let is_irregular = !monitored;
        let status = if is_irregular {
            SignalStatus::IrregularVisit(signal.timestamp)
        } else {
            SignalStatus::Detected(signal.timestamp)
        };

        info!(
            "MEGASHIP DETECTED: {} in {} (address {}, type {}) at {}",
            signal.name, scan.system, scan.system_address, signal.signal_type, signal.timestamp
        );
        if is_irregular {
            warn!("IRREGULAR VISIT: {} detected in non-tracked system {}", signal.name, scan.system);
        }

        self.ships.insert(
            signal.name.clone(),
            ShipState {
                status,
                system: Some(scan.system.clone()),
                system_address: Some(scan.system_address),
                signal_type: Some(signal.signal_type.clone()),
                last_seen: Some(signal.timestamp),
                last_checked: None,
                previous_detection: None,
            },
        );

        if monitored {
            if let Some(system) = systems.get_mut(&scan.system) {
                system.signal_status.insert(signal.name.clone(), status);
            }
            self.missing_confirmations
                .remove(&MissingKey::new(&signal.name, &scan.system));

            let previous = self
                .last_known_system
                .insert(signal.name.clone(), scan.system.clone());
            if let Some(previous) = previous {
                if previous != scan.system {
                    info!("{} moved from {} to {}", signal.name, previous, scan.system);
                    outcome.notify(Notification::ShipAppeared {
                        ship: signal.name.clone(),
                        system: scan.system.clone(),
                        timestamp: signal.timestamp,
                    });
                }
            }
        }

        outcome.push_event(TrackerEvent::Megaship(MegashipEvent {
            name: signal.name.clone(),
            system: scan.system.clone(),
            system_address: scan.system_address,
            signal_type: Some(signal.signal_type.clone()),
            status: status.label(),
            timestamp: signal.timestamp,
            is_irregular,
            previous_detection: None,
        }));
    }

    /// Counts a miss for every tracked ship previously detected here but absent now.
    fn check_missing(
        &mut self,
        systems: &mut SystemTable,
        scan: &SignalScan,
        found: &HashSet<&str>,
        outcome: &mut Outcome,
    ) {
        let Some(system) = systems.get_mut(&scan.system) else {
            return;
        };

        for ship in self.registry.ships() {
            if found.contains(ship.as_str()) {
                continue;
            }

            let status = system.status_of(ship);
            let Some(last_detection) = status.last_detection() else {
                continue;
            };

            let count = self
                .missing_confirmations
                .entry(MissingKey::new(ship, &scan.system))
                .or_insert(0);
            *count = count.saturating_add(1);
            let count = *count;

            if count < self.emit_threshold {
                debug!("Missing confirmation #{} for {} in {}", count, ship, scan.system);
                continue;
            }

            if !status.is_missing() {
                info!(
                    "MEGASHIP SIGNAL MISSING: {} confirmed missing in {} after {} scans (previous detection {})",
                    ship, scan.system, count, last_detection
                );

                let missing = SignalStatus::SignalMissing(last_detection);
                system.signal_status.insert(ship.clone(), missing);

                if let Some(state) = self.ships.get_mut(ship) {
                    // A sighting elsewhere since then outranks this system's silence
                    if state.system.as_deref() == Some(scan.system.as_str()) {
                        state.status = missing;
                        state.last_checked = Some(scan.timestamp);
                        state.previous_detection = Some(last_detection);
                    }
                }

                outcome.push_event(TrackerEvent::Megaship(MegashipEvent {
                    name: ship.clone(),
                    system: scan.system.clone(),
                    system_address: scan.system_address,
                    signal_type: None,
                    status: ShipStatusLabel::SignalMissing,
                    timestamp: scan.timestamp,
                    is_irregular: false,
                    previous_detection: Some(last_detection),
                }));
            }

            if count == self.jump_threshold {
                // The last-known pointer is left alone so a later sighting still
                // fires its appeared trigger
                info!("{} jumped out of {}", ship, scan.system);
                outcome.notify(Notification::ShipJumped {
                    ship: ship.clone(),
                    origin_system: scan.system.clone(),
                    timestamp: scan.timestamp,
                });
            }
        }
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    /// Global state of every tracked ship.
    pub fn ships(&self) -> &BTreeMap<String, ShipState> {
        &self.ships
    }

    pub fn ship(&self, name: &str) -> Option<&ShipState> {
        self.ships.get(name)
    }

    /// Current consecutive-miss count for a ship in a system (0 when absent).
    pub fn missing_count(&self, ship: &str, system: &str) -> u32 {
        self.missing_confirmations
            .get(&MissingKey::new(ship, system))
            .copied()
            .unwrap_or(0)
    }

    pub fn last_known_system(&self, ship: &str) -> Option<&str> {
        self.last_known_system.get(ship).map(String::as_str)
    }

    pub fn signals_checked(&self) -> u64 {
        self.signals_checked
    }

    pub fn fleet_carriers_seen(&self) -> u64 {
        self.fleet_carriers_seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SystemIdentity;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn at(minutes: i64) -> DateTime<Utc> {
        t0() + Duration::minutes(minutes)
    }

    fn setup() -> (SignalProcessor, SystemTable) {
        let config = TrackerConfig {
            ships: vec!["Cygnus".into(), "The Orion".into()],
            systems: vec![SystemIdentity::new("Alpha", 1), SystemIdentity::new("Beta", 2)],
            ..Default::default()
        };
        let registry = Arc::new(Registry::from_config(&config));
        let table = SystemTable::new(&registry);
        (SignalProcessor::new(registry, &config), table)
    }

    fn scan(system: &str, timestamp: DateTime<Utc>, signals: &[(&str, &str)]) -> SignalScan {
        SignalScan {
            system: system.to_string(),
            system_address: if system == "Alpha" { 1 } else { 2 },
            timestamp,
            signals: signals
                .iter()
                .map(|(name, kind)| Signal {
                    name: name.to_string(),
                    signal_type: kind.to_string(),
                    timestamp,
                })
                .collect(),
        }
    }

    fn filler() -> (&'static str, &'static str) {
        ("Some Station", "StationCoriolis")
    }

    #[test]
    fn test_detection_then_debounced_missing() {
        let (mut proc, mut table) = setup();

        let out = proc.process(&mut table, &scan("Alpha", t0(), &[("Cygnus", "Combat")]), t0());
        let detected: Vec<_> = out.megaships().collect();
        assert_eq!(detected.len(), 1);
        assert_eq!(detected[0].status, ShipStatusLabel::Detected);
        assert!(!detected[0].is_irregular);

        for minute in 1..=4 {
            let out = proc.process(&mut table, &scan("Alpha", at(minute), &[filler()]), at(minute));
            assert!(out.events.is_empty(), "miss #{} must not emit", minute);
            assert_eq!(table.get("Alpha").unwrap().status_of("Cygnus"), SignalStatus::Detected(t0()));
        }

        let out = proc.process(&mut table, &scan("Alpha", at(5), &[filler()]), at(5));
        let missing: Vec<_> = out.megaships().collect();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].status, ShipStatusLabel::SignalMissing);
        assert_eq!(missing[0].previous_detection, Some(t0()));
        assert_eq!(table.get("Alpha").unwrap().status_of("Cygnus"), SignalStatus::SignalMissing(t0()));
        assert_eq!(proc.ship("Cygnus").unwrap().status, SignalStatus::SignalMissing(t0()));
        assert!(out.notifications.is_empty());
    }

    #[test]
    fn test_missing_emits_once_then_jump_trigger_at_sixth() {
        let (mut proc, mut table) = setup();
        proc.process(&mut table, &scan("Alpha", t0(), &[("Cygnus", "Combat")]), t0());
        for minute in 1..=5 {
            proc.process(&mut table, &scan("Alpha", at(minute), &[filler()]), at(minute));
        }

        let out = proc.process(&mut table, &scan("Alpha", at(6), &[filler()]), at(6));
        assert!(out.events.is_empty());
        assert_eq!(
            out.notifications,
            vec![Notification::ShipJumped {
                ship: "Cygnus".into(),
                origin_system: "Alpha".into(),
                timestamp: at(6),
            }]
        );
        assert_eq!(proc.last_known_system("Cygnus"), Some("Alpha"));

        let out = proc.process(&mut table, &scan("Alpha", at(7), &[filler()]), at(7));
        assert!(out.is_empty());
    }

    #[test]
    fn test_detection_resets_counter() {
        let (mut proc, mut table) = setup();
        proc.process(&mut table, &scan("Alpha", t0(), &[("Cygnus", "Combat")]), t0());
        for minute in 1..=3 {
            proc.process(&mut table, &scan("Alpha", at(minute), &[filler()]), at(minute));
        }
        assert_eq!(proc.missing_count("Cygnus", "Alpha"), 3);

        proc.process(&mut table, &scan("Alpha", at(4), &[("Cygnus", "Combat")]), at(4));
        assert_eq!(proc.missing_count("Cygnus", "Alpha"), 0);

        // Four more misses still stay below the threshold
        for minute in 5..=8 {
            let out = proc.process(&mut table, &scan("Alpha", at(minute), &[filler()]), at(minute));
            assert!(out.events.is_empty());
        }
    }

    #[test]
    fn test_redetection_clears_signal_missing() {
        let (mut proc, mut table) = setup();
        proc.process(&mut table, &scan("Alpha", t0(), &[("Cygnus", "Combat")]), t0());
        for minute in 1..=5 {
            proc.process(&mut table, &scan("Alpha", at(minute), &[filler()]), at(minute));
        }

        let out = proc.process(&mut table, &scan("Alpha", at(10), &[("Cygnus", "Combat")]), at(10));
        assert_eq!(out.megaships().next().unwrap().status, ShipStatusLabel::Detected);
        assert_eq!(table.get("Alpha").unwrap().status_of("Cygnus"), SignalStatus::Detected(at(10)));
        assert_eq!(proc.missing_count("Cygnus", "Alpha"), 0);
    }

    #[test]
    fn test_fleet_carrier_named_like_ship_is_not_detection() {
        let (mut proc, mut table) = setup();
        let out = proc.process(&mut table, &scan("Alpha", t0(), &[("Cygnus", "FleetCarrier")]), t0());

        assert!(out.events.is_empty());
        assert_eq!(table.get("Alpha").unwrap().status_of("Cygnus"), SignalStatus::NotDetected);
        assert_eq!(table.get("Alpha").unwrap().fleet_carrier_count, 1);
        assert_eq!(proc.fleet_carriers_seen(), 1);
    }

    #[test]
    fn test_fleet_carrier_count_replaced_each_scan() {
        let (mut proc, mut table) = setup();
        let carriers = [("A1", "FleetCarrier"), ("B2", "FleetCarrier"), ("C3", "FleetCarrier")];
        proc.process(&mut table, &scan("Alpha", t0(), &carriers), t0());
        assert_eq!(table.get("Alpha").unwrap().fleet_carrier_count, 3);

        proc.process(&mut table, &scan("Alpha", at(1), &[carriers[0]]), at(1));
        assert_eq!(table.get("Alpha").unwrap().fleet_carrier_count, 1);
        assert_eq!(proc.fleet_carriers_seen(), 4);
        assert_eq!(proc.signals_checked(), 4);
    }

    #[test]
    fn test_irregular_visit_outside_monitored_set() {
        let (mut proc, mut table) = setup();
        let mut report = scan("Sol", t0(), &[("The Orion", "Megaship")]);
        report.system_address = 10477373803;
        let out = proc.process(&mut table, &report, t0());

        let event = out.megaships().next().unwrap();
        assert_eq!(event.status, ShipStatusLabel::IrregularVisit);
        assert!(event.is_irregular);
        assert_eq!(proc.ship("The Orion").unwrap().status, SignalStatus::IrregularVisit(t0()));
        assert!(out.notifications.is_empty());
        assert_eq!(proc.last_known_system("The Orion"), None);
    }

    #[test]
    fn test_appeared_notification_on_system_change() {
        let (mut proc, mut table) = setup();
        let out = proc.process(&mut table, &scan("Alpha", t0(), &[("Cygnus", "Combat")]), t0());
        assert!(out.notifications.is_empty());

        let out = proc.process(&mut table, &scan("Alpha", at(1), &[("Cygnus", "Combat")]), at(1));
        assert!(out.notifications.is_empty());

        let out = proc.process(&mut table, &scan("Beta", at(2), &[("Cygnus", "Combat")]), at(2));
        assert_eq!(
            out.notifications,
            vec![Notification::ShipAppeared {
                ship: "Cygnus".into(),
                system: "Beta".into(),
                timestamp: at(2),
            }]
        );
        assert_eq!(proc.last_known_system("Cygnus"), Some("Beta"));
    }

    #[test]
    fn test_missing_elsewhere_does_not_override_new_location() {
        let (mut proc, mut table) = setup();
        proc.process(&mut table, &scan("Alpha", t0(), &[("Cygnus", "Combat")]), t0());
        proc.process(&mut table, &scan("Beta", at(1), &[("Cygnus", "Combat")]), at(1));

        for minute in 2..=6 {
            proc.process(&mut table, &scan("Alpha", at(minute), &[filler()]), at(minute));
        }
        assert!(table.get("Alpha").unwrap().status_of("Cygnus").is_missing());
        assert_eq!(proc.ship("Cygnus").unwrap().status, SignalStatus::Detected(at(1)));
    }

    #[test]
    fn test_jump_trigger_after_move_names_the_silent_system() {
        let (mut proc, mut table) = setup();
        proc.process(&mut table, &scan("Alpha", t0(), &[("Cygnus", "Combat")]), t0());
        proc.process(&mut table, &scan("Beta", at(1), &[("Cygnus", "Combat")]), at(1));

        for minute in 2..=6 {
            proc.process(&mut table, &scan("Alpha", at(minute), &[filler()]), at(minute));
        }
        let out = proc.process(&mut table, &scan("Alpha", at(7), &[filler()]), at(7));

        assert_eq!(proc.missing_count("Cygnus", "Alpha"), 6);
        assert_eq!(
            out.notifications,
            vec![Notification::ShipJumped {
                ship: "Cygnus".into(),
                origin_system: "Alpha".into(),
                timestamp: at(7),
            }]
        );
        assert_eq!(proc.ship("Cygnus").unwrap().status, SignalStatus::Detected(at(1)));
        assert_eq!(proc.last_known_system("Cygnus"), Some("Beta"));
    }

    #[test]
    fn test_stale_scan_is_ignored() {
        let (mut proc, mut table) = setup();
        let now = at(11);
        let out = proc.process(&mut table, &scan("Alpha", t0(), &[("Cygnus", "Combat"), ("X", "FleetCarrier")]), now);

        assert!(out.is_empty());
        assert_eq!(proc.signals_checked(), 0);
        assert_eq!(table.get("Alpha").unwrap().fleet_carrier_count, 0);
        assert_eq!(proc.ship("Cygnus").unwrap(), &ShipState::default());
    }

    #[test]
    fn test_never_detected_ship_accumulates_no_misses() {
        let (mut proc, mut table) = setup();
        for minute in 0..10 {
            let out = proc.process(&mut table, &scan("Alpha", at(minute), &[filler()]), at(minute));
            assert!(out.is_empty());
        }
        assert_eq!(proc.missing_count("Cygnus", "Alpha"), 0);
    }
}
