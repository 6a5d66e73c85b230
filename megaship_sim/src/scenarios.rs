//! Reconciliation scenarios for the simulation harness.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// SIM-001: Detection followed by consecutive missing scans
    SignalDebounce,

    /// SIM-002: Route plan paired with its jump confirmation
    PlannedJump,

    /// SIM-003: Same events relayed by several uploaders, through the full pipeline
    DuplicateUploads,

    /// SIM-004: Planned departure that never arrives anywhere
    DepartureTimeout,

    /// SIM-005: Messages far outside the staleness window
    StaleFeed,

    /// SIM-006: Fleet carriers named like tracked ships
    CarrierDecoy,

    /// SIM-007: Seeded random traffic with duplicates and retransmits
    TrafficStorm,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::SignalDebounce,
            ScenarioId::PlannedJump,
            ScenarioId::DuplicateUploads,
            ScenarioId::DepartureTimeout,
            ScenarioId::StaleFeed,
            ScenarioId::CarrierDecoy,
            ScenarioId::TrafficStorm,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::SignalDebounce => "signal_debounce",
            ScenarioId::PlannedJump => "planned_jump",
            ScenarioId::DuplicateUploads => "duplicate_uploads",
            ScenarioId::DepartureTimeout => "departure_timeout",
            ScenarioId::StaleFeed => "stale_feed",
            ScenarioId::CarrierDecoy => "carrier_decoy",
            ScenarioId::TrafficStorm => "traffic_storm",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::SignalDebounce => "Ship detected, then 6 scans without it: one SIGNAL MISSING, one jump trigger",
            ScenarioId::PlannedJump => "Route A->B then jump into B: arrived_planned in B, departed from A",
            ScenarioId::DuplicateUploads => "Relayed and retransmitted reports count once, corrupted frame dropped",
            ScenarioId::DepartureTimeout => "Unmatched departure auto-resolves exactly once after 300s",
            ScenarioId::StaleFeed => "Messages 11 minutes old or ahead change nothing",
            ScenarioId::CarrierDecoy => "Carrier named like a tracked ship is counted as a carrier only",
            ScenarioId::TrafficStorm => "40 commanders, 1 hour of noisy traffic, invariants hold and replay is deterministic",
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "signal_debounce" | "debounce" | "sim-001" => Ok(ScenarioId::SignalDebounce),
            "planned_jump" | "sim-002" => Ok(ScenarioId::PlannedJump),
            "duplicate_uploads" | "duplicates" | "sim-003" => Ok(ScenarioId::DuplicateUploads),
            "departure_timeout" | "timeout" | "sim-004" => Ok(ScenarioId::DepartureTimeout),
            "stale_feed" | "stale" | "sim-005" => Ok(ScenarioId::StaleFeed),
            "carrier_decoy" | "decoy" | "sim-006" => Ok(ScenarioId::CarrierDecoy),
            "traffic_storm" | "storm" | "sim-007" => Ok(ScenarioId::TrafficStorm),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for scenario in ScenarioId::all() {
            assert_eq!(scenario.name().parse::<ScenarioId>(), Ok(scenario));
        }
        assert!("split_brain".parse::<ScenarioId>().is_err());
    }
}
