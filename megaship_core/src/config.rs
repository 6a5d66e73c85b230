//! Tracker configuration and the immutable tracked-identity registry.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::TrackerError;

/// A monitored star system as configured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemIdentity {
    /// Star system name, matched exactly against feed reports
    pub name: String,

    /// Numeric system address (0 when unknown)
    pub address: u64,
}

impl SystemIdentity {
    pub fn new(name: impl Into<String>, address: u64) -> Self {
        Self {
            name: name.into(),
            address,
        }
    }
}

/// Configuration for the reconciliation engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Megaship names, matched exactly against signal names
    pub ships: Vec<String>,

    /// Monitored systems (order is significant for departure search)
    pub systems: Vec<SystemIdentity>,

    /// Messages further than this from the local clock are ignored (default: 600s)
    pub staleness_window_secs: u64,

    /// Consecutive absent scans before SIGNAL MISSING is emitted (default: 5)
    pub missing_emit_threshold: u32,

    /// Absent-scan count at which the "jumped" notification fires (default: 6)
    pub missing_jump_threshold: u32,

    /// Lifetime of a cached planned route (default: 180s)
    pub route_ttl_secs: u64,

    /// Age at which an unmatched pending departure auto-resolves (default: 300s)
    pub departure_timeout_secs: u64,

    /// Retransmit window for per-uploader arrival dedup (default: 30s)
    pub dedup_window_secs: u64,

    /// Capacity of the recent-events ring buffer (default: 300)
    pub recent_events_capacity: usize,

    /// Signal type that is never counted as a megaship detection
    pub fleet_carrier_type: String,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            ships: vec!["Cygnus".to_string(), "The Orion".to_string()],
            systems: vec![
                SystemIdentity::new("Nukamba", 1183095788250),
                SystemIdentity::new("Graffias", 17880842853),
                SystemIdentity::new("Vodyakamana", 0),
                SystemIdentity::new("Marfic", 203174184124),
                SystemIdentity::new("Upaniklis", 13862946481609),
                SystemIdentity::new("HR 6524", 83584193298),
                SystemIdentity::new("Col 359 Sector AE-N b9-4", 9463826621993),
                SystemIdentity::new("HIP 87621", 147882789259),
            ],
            staleness_window_secs: 600,
            missing_emit_threshold: 5,
            missing_jump_threshold: 6,
            route_ttl_secs: 180,
            departure_timeout_secs: 300,
            dedup_window_secs: 30,
            recent_events_capacity: 300,
            fleet_carrier_type: "FleetCarrier".to_string(),
        }
    }
}

impl TrackerConfig {
    /// Loads a configuration override file. Missing fields keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, TrackerError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| TrackerError::Config(format!("{}: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| TrackerError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), TrackerError> {
        if self.ships.is_empty() {
            return Err(TrackerError::Config("no ships configured".into()));
        }
        if self.missing_emit_threshold == 0 {
            return Err(TrackerError::Config("missing_emit_threshold must be at least 1".into()));
        }
        if self.recent_events_capacity == 0 {
            return Err(TrackerError::Config("recent_events_capacity must be at least 1".into()));
        }
        Ok(())
    }

    pub fn staleness_window(&self) -> Duration {
        Duration::seconds(self.staleness_window_secs as i64)
    }

    pub fn route_ttl(&self) -> Duration {
        Duration::seconds(self.route_ttl_secs as i64)
    }

    pub fn departure_timeout(&self) -> Duration {
        Duration::seconds(self.departure_timeout_secs as i64)
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::seconds(self.dedup_window_secs as i64)
    }
}

/// Configuration for the async runtime wrapped around the engine.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Bounded capacity of the receive-loop → processing-loop channel (default: 4096)
    pub channel_capacity: usize,

    /// How often an idle processing loop re-checks the running flag (default: 1s)
    pub idle_poll: std::time::Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 4096,
            idle_poll: std::time::Duration::from_secs(1),
        }
    }
}

/// Immutable set of tracked ships and monitored systems.
///
/// Built once from [`TrackerConfig`] and shared by both processors; nothing
/// mutates it after construction.
#[derive(Debug, Clone)]
pub struct Registry {
    ships: Vec<String>,
    systems: Vec<SystemIdentity>,
    index: HashMap<String, usize>,
    fleet_carrier_type: String,
}

impl Registry {
    pub fn from_config(config: &TrackerConfig) -> Self {
        let mut systems: Vec<SystemIdentity> = Vec::with_capacity(config.systems.len());
        let mut index = HashMap::new();
        for system in &config.systems {
            // First definition wins on duplicate names
            if !index.contains_key(&system.name) {
                index.insert(system.name.clone(), systems.len());
                systems.push(system.clone());
            }
        }

        Self {
            ships: config.ships.clone(),
            systems,
            index,
            fleet_carrier_type: config.fleet_carrier_type.clone(),
        }
    }

    /// Tracked ship names in configured order.
    pub fn ships(&self) -> &[String] {
        &self.ships
    }

    /// Monitored systems in configured order.
    pub fn systems(&self) -> &[SystemIdentity] {
        &self.systems
    }

    pub fn is_tracked_ship(&self, name: &str) -> bool {
        self.ships.iter().any(|s| s == name)
    }

    pub fn is_monitored(&self, system: &str) -> bool {
        self.index.contains_key(system)
    }

    pub fn system(&self, name: &str) -> Option<&SystemIdentity> {
        self.index.get(name).map(|&i| &self.systems[i])
    }

    pub fn is_fleet_carrier(&self, signal_type: &str) -> bool {
        signal_type == self.fleet_carrier_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TrackerConfig::default();
        assert_eq!(config.ships, vec!["Cygnus", "The Orion"]);
        assert_eq!(config.systems.len(), 8);
        assert_eq!(config.staleness_window_secs, 600);
        assert_eq!(config.missing_emit_threshold, 5);
        assert_eq!(config.missing_jump_threshold, 6);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_override_keeps_defaults() {
        let config: TrackerConfig = serde_json::from_str(
            r#"{"ships": ["Cygnus"], "systems": [{"name": "Alpha", "address": 1}]}"#,
        )
        .unwrap();
        assert_eq!(config.ships, vec!["Cygnus"]);
        assert_eq!(config.systems, vec![SystemIdentity::new("Alpha", 1)]);
        assert_eq!(config.route_ttl_secs, 180);
        assert_eq!(config.dedup_window(), Duration::seconds(30));
    }

    #[test]
    fn test_validate_rejects_zero_threshold() {
        let config = TrackerConfig {
            missing_emit_threshold: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_registry_lookup() {
        let registry = Registry::from_config(&TrackerConfig::default());
        assert!(registry.is_tracked_ship("Cygnus"));
        assert!(!registry.is_tracked_ship("cygnus"));
        assert!(registry.is_monitored("HR 6524"));
        assert!(!registry.is_monitored("Sol"));
        assert_eq!(registry.system("Marfic").map(|s| s.address), Some(203174184124));
        assert!(registry.is_fleet_carrier("FleetCarrier"));
        assert!(!registry.is_fleet_carrier("Megaship"));
    }

    #[test]
    fn test_registry_ignores_duplicate_systems() {
        let config = TrackerConfig {
            systems: vec![SystemIdentity::new("Alpha", 1), SystemIdentity::new("Alpha", 2)],
            ..Default::default()
        };
        let registry = Registry::from_config(&config);
        assert_eq!(registry.systems().len(), 1);
        assert_eq!(registry.system("Alpha").map(|s| s.address), Some(1));
    }
}
