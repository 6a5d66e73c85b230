//! Derived state: per-system counters, per-ship signal status and the
//! route bookkeeping used to pair departures with arrivals.

use chrono::{DateTime, Duration, Utc};
use megaship_env::UploaderId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::config::{Registry, SystemIdentity};

// ============================================================================
// SIGNAL STATUS
// ============================================================================

/// Presence state of one ship as seen from one system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "status", content = "timestamp")]
pub enum SignalStatus {
    #[default]
    #[serde(rename = "NOT DETECTED")]
    NotDetected,

    /// Seen in a monitored system at this time
    #[serde(rename = "DETECTED")]
    Detected(DateTime<Utc>),

    /// Seen outside the monitored set at this time
    #[serde(rename = "IRREGULAR VISIT")]
    IrregularVisit(DateTime<Utc>),

    /// Absent from enough consecutive scans; carries the last detection
    #[serde(rename = "SIGNAL MISSING")]
    SignalMissing(DateTime<Utc>),
}

impl SignalStatus {
    /// The timestamp of the last positive detection, if any.
    pub fn last_detection(&self) -> Option<DateTime<Utc>> {
        match *self {
            SignalStatus::NotDetected => None,
            SignalStatus::Detected(t)
            | SignalStatus::IrregularVisit(t)
            | SignalStatus::SignalMissing(t) => Some(t),
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, SignalStatus::SignalMissing(_))
    }

    pub fn label(&self) -> ShipStatusLabel {
        match self {
            SignalStatus::NotDetected => ShipStatusLabel::NotDetected,
            SignalStatus::Detected(_) => ShipStatusLabel::Detected,
            SignalStatus::IrregularVisit(_) => ShipStatusLabel::IrregularVisit,
            SignalStatus::SignalMissing(_) => ShipStatusLabel::SignalMissing,
        }
    }
}

/// Status string carried by outbound megaship events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShipStatusLabel {
    #[serde(rename = "NOT DETECTED")]
    NotDetected,
    #[serde(rename = "DETECTED")]
    Detected,
    #[serde(rename = "IRREGULAR VISIT")]
    IrregularVisit,
    #[serde(rename = "SIGNAL MISSING")]
    SignalMissing,
}

impl std::fmt::Display for ShipStatusLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ShipStatusLabel::NotDetected => "NOT DETECTED",
            ShipStatusLabel::Detected => "DETECTED",
            ShipStatusLabel::IrregularVisit => "IRREGULAR VISIT",
            ShipStatusLabel::SignalMissing => "SIGNAL MISSING",
        };
        f.write_str(s)
    }
}

// ============================================================================
// TRACKED SYSTEMS
// ============================================================================

/// Live counters for one monitored system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedSystem {
    pub identity: SystemIdentity,

    /// Commanders believed present; never negative
    pub commander_count: u32,

    /// Confirmed arrivals (monotonic)
    pub jumps_to: u64,

    /// Resolved departures (monotonic)
    pub jumps_from: u64,

    /// Fleet carriers in the latest scan; replaced each scan
    pub fleet_carrier_count: u32,

    /// Presence of each tracked ship in this system
    pub signal_status: BTreeMap<String, SignalStatus>,
}

impl TrackedSystem {
    pub fn new(identity: SystemIdentity, ships: &[String]) -> Self {
        Self {
            identity,
            commander_count: 0,
            jumps_to: 0,
            jumps_from: 0,
            fleet_carrier_count: 0,
            signal_status: ships
                .iter()
                .map(|s| (s.clone(), SignalStatus::NotDetected))
                .collect(),
        }
    }

    /// Records a confirmed arrival and returns the new commander count.
    pub fn record_arrival(&mut self) -> u32 {
        self.commander_count += 1;
        self.jumps_to += 1;
        self.commander_count
    }

    /// Records a resolved departure and returns the new commander count.
    pub fn record_departure(&mut self) -> u32 {
        self.commander_count = self.commander_count.saturating_sub(1);
        self.jumps_from += 1;
        self.commander_count
    }

    pub fn status_of(&self, ship: &str) -> SignalStatus {
        self.signal_status.get(ship).copied().unwrap_or_default()
    }
}

/// All monitored systems, keyed by name.
#[derive(Debug, Clone)]
pub struct SystemTable {
    systems: HashMap<String, TrackedSystem>,
}

impl SystemTable {
    pub fn new(registry: &Registry) -> Self {
        let systems = registry
            .systems()
            .iter()
            .map(|identity| {
                (
                    identity.name.clone(),
                    TrackedSystem::new(identity.clone(), registry.ships()),
                )
            })
            .collect();
        Self { systems }
    }

    pub fn get(&self, name: &str) -> Option<&TrackedSystem> {
        self.systems.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut TrackedSystem> {
        self.systems.get_mut(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackedSystem> {
        self.systems.values()
    }

    pub fn commander_count(&self, name: &str) -> u32 {
        self.systems.get(name).map(|s| s.commander_count).unwrap_or(0)
    }
}

// ============================================================================
// SHIPS
// ============================================================================

/// Global view of one tracked ship.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShipState {
    pub status: SignalStatus,
    pub system: Option<String>,
    pub system_address: Option<u64>,
    pub signal_type: Option<String>,
    pub last_seen: Option<DateTime<Utc>>,

    /// Scan time at which the ship was declared missing
    pub last_checked: Option<DateTime<Utc>>,
    pub previous_detection: Option<DateTime<Utc>>,
}

// ============================================================================
// ROUTES
// ============================================================================

/// Structured key for an origin → destination hop.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RouteKey {
    pub from: String,
    pub to: String,
}

impl RouteKey {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

impl std::fmt::Display for RouteKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}

/// Next hop announced by an uploader's route plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedRoute {
    pub from_system: String,
    pub to_system: String,
    pub timestamp: DateTime<Utc>,
}

/// A planned departure from a monitored system awaiting its matching arrival.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingDeparture {
    pub timestamp: DateTime<Utc>,
    pub uploader_id: UploaderId,
    pub processed: bool,
}

/// True when `timestamp` lies further than `window` from `now` in either direction.
pub fn outside_window(now: DateTime<Utc>, timestamp: DateTime<Utc>, window: Duration) -> bool {
    let diff = now.signed_duration_since(timestamp);
    diff > window || diff < -window
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackerConfig;

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_departure_floors_at_zero() {
        let mut system = TrackedSystem::new(SystemIdentity::new("Alpha", 1), &[]);
        assert_eq!(system.record_departure(), 0);
        assert_eq!(system.jumps_from, 1);

        assert_eq!(system.record_arrival(), 1);
        assert_eq!(system.record_departure(), 0);
        assert_eq!(system.jumps_to, 1);
        assert_eq!(system.jumps_from, 2);
    }

    #[test]
    fn test_status_last_detection() {
        assert_eq!(SignalStatus::NotDetected.last_detection(), None);
        assert_eq!(SignalStatus::Detected(ts(0)).last_detection(), Some(ts(0)));
        assert_eq!(SignalStatus::SignalMissing(ts(5)).last_detection(), Some(ts(5)));
        assert!(SignalStatus::SignalMissing(ts(5)).is_missing());
    }

    #[test]
    fn test_status_serializes_tagged() {
        let json = serde_json::to_value(SignalStatus::Detected(ts(0))).unwrap();
        assert_eq!(json["status"], "DETECTED");
        assert!(json["timestamp"].is_string());

        let json = serde_json::to_value(SignalStatus::NotDetected).unwrap();
        assert_eq!(json["status"], "NOT DETECTED");
    }

    #[test]
    fn test_outside_window_is_symmetric() {
        let window = Duration::seconds(600);
        assert!(!outside_window(ts(0), ts(600), window));
        assert!(!outside_window(ts(600), ts(0), window));
        assert!(outside_window(ts(0), ts(601), window));
        assert!(outside_window(ts(601), ts(0), window));
    }

    #[test]
    fn test_system_table_seeded_from_registry() {
        let registry = Registry::from_config(&TrackerConfig::default());
        let table = SystemTable::new(&registry);
        let nukamba = table.get("Nukamba").unwrap();
        assert_eq!(nukamba.status_of("Cygnus"), SignalStatus::NotDetected);
        assert_eq!(table.commander_count("Sol"), 0);
    }
}
