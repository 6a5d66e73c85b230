//! Point-in-time view of the tracker state, serializable for dashboards and tools.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::events::TrackerEvent;
use crate::model::{ShipState, SignalStatus, SystemTable};

/// Per-system commander traffic and ship presence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemSnapshot {
    pub address: u64,
    pub commander_count: u32,
    pub jumps_to: u64,
    pub jumps_from: u64,
    pub fleet_carrier_count: u32,
    pub ships: BTreeMap<String, SignalStatus>,
}

/// Running totals since startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub messages_seen: u64,
    pub messages_dropped: u64,
    pub signals_checked: u64,
    pub fleet_carriers_seen: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub ships: BTreeMap<String, ShipState>,
    pub systems: BTreeMap<String, SystemSnapshot>,
    /// Oldest first
    pub recent_events: Vec<TrackerEvent>,
    pub counters: Counters,
}

impl Snapshot {
    pub(crate) fn capture<'a>(
        ships: &BTreeMap<String, ShipState>,
        systems: &SystemTable,
        recent_events: impl Iterator<Item = &'a TrackerEvent>,
        counters: Counters,
    ) -> Self {
        let systems = systems
            .iter()
            .map(|system| {
                (
                    system.identity.name.clone(),
                    SystemSnapshot {
                        address: system.identity.address,
                        commander_count: system.commander_count,
                        jumps_to: system.jumps_to,
                        jumps_from: system.jumps_from,
                        fleet_carrier_count: system.fleet_carrier_count,
                        ships: system.signal_status.clone(),
                    },
                )
            })
            .collect();

        Self {
            ships: ships.clone(),
            systems,
            recent_events: recent_events.cloned().collect(),
            counters,
        }
    }

    pub fn commander_count(&self, system: &str) -> u32 {
        self.systems.get(system).map(|s| s.commander_count).unwrap_or(0)
    }

    /// Sum of commanders over all monitored systems.
    pub fn total_commanders(&self) -> u32 {
        self.systems.values().map(|s| s.commander_count).sum()
    }
}
