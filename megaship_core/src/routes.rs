//! The "ROUTES" Engine - Commander Traffic Reconciliation
//!
//! Pairs announced route plans with confirmed jumps to keep a per-system
//! commander count, using only local timestamps:
//! - Planned departures wait for a matching arrival (or a timeout)
//! - Cross-uploader duplicates are recognised by identical timestamps
//! - Same-uploader retransmits are recognised by a short dedup window
//! - All caches are swept on every route or jump message

use chrono::{DateTime, Duration, Utc};
use megaship_env::UploaderId;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::{Registry, TrackerConfig};
use crate::events::{Outcome, TrafficAction, TrafficEvent};
use crate::feed::{JumpReport, RoutePlan};
use crate::model::{outside_window, PendingDeparture, PlannedRoute, RouteKey, SystemTable};

/// Identity of an auto-resolved departure: origin plus plan timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DepartureKey {
    origin: String,
    timestamp: DateTime<Utc>,
}

impl DepartureKey {
    fn new(origin: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            origin: origin.to_string(),
            timestamp,
        }
    }
}

/// An uploader's arrival (planned or confirmed) into a system.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ArrivalKey {
    uploader: UploaderId,
    system: String,
}

impl ArrivalKey {
    fn new(uploader: &UploaderId, system: &str) -> Self {
        Self {
            uploader: uploader.clone(),
            system: system.to_string(),
        }
    }
}

/// Commander traffic state machine.
pub struct RouteTracker {
    registry: Arc<Registry>,

    staleness_window: Duration,
    route_ttl: Duration,
    departure_timeout: Duration,
    dedup_window: Duration,

    /// Latest route plan per uploader (expires after `route_ttl`)
    planned_routes: HashMap<UploaderId, PlannedRoute>,

    /// Departures from monitored systems awaiting a matching arrival
    pending_departures: BTreeMap<RouteKey, Vec<PendingDeparture>>,

    /// Departures already resolved by timeout
    auto_resolved: HashSet<DepartureKey>,

    recent_arrivals: HashMap<ArrivalKey, DateTime<Utc>>,
    recent_planned_arrivals: HashMap<ArrivalKey, DateTime<Utc>>,
}

impl RouteTracker {
    pub fn new(registry: Arc<Registry>, config: &TrackerConfig) -> Self {
        Self {
            registry,
            staleness_window: config.staleness_window(),
            route_ttl: config.route_ttl(),
            departure_timeout: config.departure_timeout(),
            dedup_window: config.dedup_window(),
            planned_routes: HashMap::new(),
            pending_departures: BTreeMap::new(),
            auto_resolved: HashSet::new(),
            recent_arrivals: HashMap::new(),
            recent_planned_arrivals: HashMap::new(),
        }
    }

    // ========================================================================
    // ROUTE PLANS
    // ========================================================================

    /// Records an uploader's next hop and announces planned traffic.
    pub fn process_route(&mut self, uploader: &UploaderId, plan: &RoutePlan, now: DateTime<Utc>) -> Outcome {
        let mut outcome = Outcome::default();
        let current = plan.current_system.as_str();
        let next = plan.next_system.as_str();

        if outside_window(now, plan.timestamp, self.staleness_window) {
            debug!("Ignoring old route {} -> {} from {}", current, next, plan.timestamp);
            return outcome;
        }

        self.expire_routes(now);
        self.expire_markers(now);

        self.planned_routes.insert(
            uploader.clone(),
            PlannedRoute {
                from_system: current.to_string(),
                to_system: next.to_string(),
                timestamp: plan.timestamp,
            },
        );

        if self.registry.is_monitored(current) {
            self.plan_departure(uploader, current, next, plan.timestamp, &mut outcome);
        }

        if self.registry.is_monitored(next) && next != current {
            let key = ArrivalKey::new(uploader, next);
            if let Some(&last) = self.recent_planned_arrivals.get(&key) {
                if plan.timestamp - last < self.dedup_window {
                    debug!("DUPLICATE: route to {} from {} (uploader {})", next, current, uploader);
                    return outcome;
                }
            }
            self.recent_planned_arrivals.insert(key, plan.timestamp);

            info!("CMDR planned route to {} from {}", next, current);
            outcome.push_traffic(
                TrafficEvent::new(TrafficAction::PlannedArrival, next, plan.timestamp)
                    .origin(current)
                    .uploader(uploader),
            );
        }

        outcome
    }

    fn plan_departure(
        &mut self,
        uploader: &UploaderId,
        current: &str,
        next: &str,
        timestamp: DateTime<Utc>,
        outcome: &mut Outcome,
    ) {
        let key = RouteKey::new(current, next);

        if let Some(existing) = self.pending_departures.get(&key) {
            // Identical timestamp: the same plan relayed by another tool
            if existing.iter().any(|d| d.timestamp == timestamp) {
                debug!("DUPLICATE: route {} at {} (different uploader {})", key, timestamp, uploader);
                return;
            }
            if existing.iter().any(|d| &d.uploader_id == uploader && !d.processed) {
                debug!("DUPLICATE: route {} (same uploader {})", key, uploader);
                return;
            }
        }

        // A new plan from the same system supersedes this uploader's older one
        for (other, departures) in self.pending_departures.iter_mut() {
            if other.from == current {
                departures.retain(|d| {
                    let superseded = &d.uploader_id == uploader && !d.processed;
                    if superseded {
                        debug!("Removing superseded route {} for {}", other, uploader);
                    }
                    !superseded
                });
            }
        }
        self.pending_departures.retain(|_, departures| !departures.is_empty());

        let departures = self.pending_departures.entry(key.clone()).or_default();
        departures.push(PendingDeparture {
            timestamp,
            uploader_id: uploader.clone(),
            processed: false,
        });

        info!("CMDR planned route {}", key);
        debug!("Added pending departure {} (now {} pending)", key, departures.len());

        outcome.push_traffic(
            TrafficEvent::new(TrafficAction::PlannedDeparture, current, timestamp)
                .destination(next)
                .uploader(uploader),
        );
    }

    // ========================================================================
    // JUMP CONFIRMATIONS
    // ========================================================================

    /// Applies a confirmed jump: counts the arrival and resolves one departure.
    pub fn process_jump(
        &mut self,
        systems: &mut SystemTable,
        uploader: &UploaderId,
        jump: &JumpReport,
        now: DateTime<Utc>,
    ) -> Outcome {
        let mut outcome = Outcome::default();

        if outside_window(now, jump.timestamp, self.staleness_window) {
            debug!(
                "Ignoring old jump into {} from {} (diff: {}s)",
                jump.system,
                jump.timestamp,
                (now - jump.timestamp).num_seconds()
            );
            return outcome;
        }

        self.expire_routes(now);
        self.expire_markers(now);
        self.resolve_timeouts(systems, now, &mut outcome);

        let planned = self.planned_routes.get(uploader).cloned();

        if self.registry.is_monitored(&jump.system) {
            let duplicate = self
                .recent_arrivals
                .iter()
                .any(|(key, &t)| key.system == jump.system && t == jump.timestamp);
            if duplicate {
                debug!("DUPLICATE: jump into {} at {} (uploader {})", jump.system, jump.timestamp, uploader);
                return outcome;
            }

            let key = ArrivalKey::new(uploader, &jump.system);
            if let Some(&last) = self.recent_arrivals.get(&key) {
                if jump.timestamp - last < self.dedup_window {
                    debug!("DUPLICATE: jump into {} (same uploader {})", jump.system, uploader);
                    return outcome;
                }
            }
            self.recent_arrivals.insert(key, jump.timestamp);

            let count = systems
                .get_mut(&jump.system)
                .map(|s| s.record_arrival())
                .unwrap_or(0);

            let action = match &planned {
                Some(route) if route.to_system == jump.system => TrafficAction::ArrivedPlanned,
                _ => TrafficAction::Arrived,
            };
            info!("CMDR arrived in {} ({:?}, now {} CMDRs)", jump.system, action, count);

            outcome.push_traffic(
                TrafficEvent::new(action, &jump.system, jump.timestamp)
                    .count(count)
                    .uploader(uploader),
            );
        }

        let resolved = self.resolve_departure(systems, &jump.system, jump.timestamp, &mut outcome);

        if !resolved {
            if let Some(route) = planned {
                // Fallback for quick hops the pending list never saw
                if self.registry.is_monitored(&route.from_system) && route.from_system != jump.system {
                    if let Some(origin) = systems.get_mut(&route.from_system) {
                        let count = origin.record_departure();
                        info!("CMDR departed {} via uploader match (now {} CMDRs)", route.from_system, count);
                        outcome.push_traffic(
                            TrafficEvent::new(TrafficAction::Departed, &route.from_system, jump.timestamp)
                                .count(count)
                                .uploader(uploader),
                        );
                    }
                }
                self.planned_routes.remove(uploader);
            }
        }

        outcome
    }

    /// Resolves the oldest open departure towards `destination`, at most one.
    fn resolve_departure(
        &mut self,
        systems: &mut SystemTable,
        destination: &str,
        timestamp: DateTime<Utc>,
        outcome: &mut Outcome,
    ) -> bool {
        let mut resolved = false;

        for origin in self.registry.systems() {
            let key = RouteKey::new(origin.name.as_str(), destination);
            let Some(departures) = self.pending_departures.get_mut(&key) else {
                continue;
            };

            let auto_resolved = &self.auto_resolved;
            let candidate = departures.iter_mut().find(|d| {
                !d.processed && !auto_resolved.contains(&DepartureKey::new(&key.from, d.timestamp))
            });

            if let Some(departure) = candidate {
                departure.processed = true;
                let count = systems
                    .get_mut(&key.from)
                    .map(|s| s.record_departure())
                    .unwrap_or(0);
                info!("CMDR departed {} to {} (now {} CMDRs)", key.from, destination, count);

                outcome.push_traffic(
                    TrafficEvent::new(TrafficAction::Departed, &key.from, timestamp)
                        .count(count)
                        .uploader(&departure.uploader_id),
                );
                resolved = true;
            }

            if departures.iter().all(|d| d.processed) {
                self.pending_departures.remove(&key);
            }

            if resolved {
                break;
            }
        }

        resolved
    }

    // ========================================================================
    // SWEEPS
    // ========================================================================

    /// Drops cached route plans older than the route TTL.
    fn expire_routes(&mut self, now: DateTime<Utc>) {
        let ttl = self.route_ttl;
        self.planned_routes.retain(|_, route| now - route.timestamp <= ttl);
    }

    /// Drops dedup markers that can no longer match a fresh message.
    fn expire_markers(&mut self, now: DateTime<Utc>) {
        let horizon = self.staleness_window;
        self.recent_arrivals.retain(|_, &mut t| now - t <= horizon);
        self.recent_planned_arrivals.retain(|_, &mut t| now - t <= horizon);

        let resolved_horizon = self.staleness_window + self.departure_timeout;
        self.auto_resolved.retain(|k| now - k.timestamp <= resolved_horizon);
    }

    /// Auto-resolves departures that waited longer than the timeout, exactly once each.
    fn resolve_timeouts(&mut self, systems: &mut SystemTable, now: DateTime<Utc>, outcome: &mut Outcome) {
        for (key, departures) in self.pending_departures.iter_mut() {
            for departure in departures.iter_mut() {
                if departure.processed || now - departure.timestamp <= self.departure_timeout {
                    continue;
                }

                let auto_key = DepartureKey::new(&key.from, departure.timestamp);
                if self.auto_resolved.insert(auto_key) {
                    if let Some(origin) = systems.get_mut(&key.from) {
                        let count = origin.record_departure();
                        info!(
                            "AUTO: CMDR departed {} to {} (timeout, now {} CMDRs)",
                            key.from, key.to, count
                        );
                        outcome.push_traffic(
                            TrafficEvent::new(TrafficAction::DepartedTimeout, &key.from, departure.timestamp)
                                .destination(&key.to)
                                .count(count),
                        );
                    }
                }
                departure.processed = true;
            }
        }

        self.pending_departures
            .retain(|_, departures| !departures.iter().all(|d| d.processed));
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn planned_route(&self, uploader: &UploaderId) -> Option<&PlannedRoute> {
        self.planned_routes.get(uploader)
    }

    /// Entries still held for a route (processed ones linger until the list drains).
    pub fn pending_departures(&self, key: &RouteKey) -> &[PendingDeparture] {
        self.pending_departures
            .get(key)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Number of departures still awaiting resolution.
    pub fn open_departures(&self) -> usize {
        self.pending_departures
            .values()
            .flatten()
            .filter(|d| !d.processed)
            .count()
    }
}
