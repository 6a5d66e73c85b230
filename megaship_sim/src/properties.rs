//! Property tests for the tracker invariants, driven through generated feeds.

use crate::context::SimContext;
use crate::feedgen::FeedGenerator;
use chrono::{DateTime, Duration, Utc};
use megaship_core::{Dispatcher, SignalStatus, TrackerConfig, TrafficAction};
use megaship_env::TrackerContext;
use proptest::prelude::*;

const SYSTEMS: [&str; 3] = ["Nukamba", "Graffias", "Marfic"];

fn dispatcher() -> Dispatcher {
    Dispatcher::new(TrackerConfig::default()).unwrap()
}

fn at(ctx: &SimContext, secs: i64) -> DateTime<Utc> {
    ctx.epoch() + Duration::seconds(secs)
}

#[derive(Debug, Clone)]
enum Op {
    Jump { uploader: u8, system: usize },
    Route { uploader: u8, from: usize, to: usize },
    Wait { secs: u16 },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..6, 0usize..4).prop_map(|(uploader, system)| Op::Jump { uploader, system }),
        (0u8..6, 0usize..4, 0usize..4).prop_map(|(uploader, from, to)| Op::Route { uploader, from, to }),
        (1u16..400).prop_map(|secs| Op::Wait { secs }),
    ]
}

fn system_name(idx: usize) -> &'static str {
    SYSTEMS.get(idx).copied().unwrap_or("Sol")
}

proptest! {
    #[test]
    fn stale_messages_never_change_state(offset in 601i64..5000, future in any::<bool>(), uploader in 0u8..10) {
        let ctx = SimContext::new(1);
        let gen = FeedGenerator::default();
        let mut d = dispatcher();

        ctx.pin_to(at(&ctx, 10_000));
        let stamp = at(&ctx, if future { 10_000 + offset } else { 10_000 - offset });
        let name = format!("u{}", uploader);
        let batch = [
            gen.scan(&name, "Nukamba", 1, stamp, &[("Cygnus", "Combat")]),
            gen.jump(&name, "Nukamba", 1, stamp),
            gen.route(&name, &["Nukamba", "Graffias"], stamp),
        ];
        for envelope in &batch {
            prop_assert!(d.dispatch(envelope, ctx.utc_now()).is_empty());
        }

        let snapshot = d.snapshot();
        prop_assert_eq!(snapshot.total_commanders(), 0);
        prop_assert!(snapshot.ships.values().all(|s| s.status == SignalStatus::NotDetected));
        prop_assert_eq!(d.routes().open_departures(), 0);
    }

    #[test]
    fn traffic_counts_stay_consistent(ops in prop::collection::vec(op(), 1..60)) {
        let ctx = SimContext::new(2);
        let gen = FeedGenerator::default();
        let mut d = dispatcher();
        let mut clock = 0i64;

        for op in ops {
            match op {
                Op::Wait { secs } => clock += i64::from(secs),
                Op::Jump { uploader, system } => {
                    clock += 1;
                    ctx.pin_to(at(&ctx, clock));
                    let envelope = gen.jump(&format!("u{}", uploader), system_name(system), 0, at(&ctx, clock));
                    let out = d.dispatch(&envelope, ctx.utc_now());
                    // Arrival counts match the table unless the same jump also left that system
                    for event in out.traffic() {
                        let also_left = out
                            .traffic()
                            .any(|e| e.action == TrafficAction::Departed && e.system == event.system);
                        if matches!(event.action, TrafficAction::Arrived | TrafficAction::ArrivedPlanned) && !also_left {
                            prop_assert_eq!(event.commander_count, Some(d.systems().commander_count(&event.system)));
                        }
                    }
                }
                Op::Route { uploader, from, to } => {
                    clock += 1;
                    ctx.pin_to(at(&ctx, clock));
                    let envelope = gen.route(&format!("u{}", uploader), &[system_name(from), system_name(to)], at(&ctx, clock));
                    d.dispatch(&envelope, ctx.utc_now());
                }
            }

            for system in d.systems().iter() {
                prop_assert!(u64::from(system.commander_count) <= system.jumps_to);
            }
        }
    }

    #[test]
    fn debounce_needs_five_consecutive_misses(misses in 0u32..12) {
        let ctx = SimContext::new(3);
        let gen = FeedGenerator::default();
        let mut d = dispatcher();

        let first = gen.scan("s", "Nukamba", 1, at(&ctx, 0), &[("Cygnus", "Combat")]);
        d.dispatch(&first, ctx.utc_now());

        let mut missing_events = 0;
        for i in 1..=misses {
            let t = i64::from(i) * 30;
            ctx.pin_to(at(&ctx, t));
            let scan = gen.scan("s", "Nukamba", 1, at(&ctx, t), &[("Beacon", "NavBeacon")]);
            missing_events += d.dispatch(&scan, ctx.utc_now()).megaships().count();
        }

        prop_assert_eq!(missing_events, usize::from(misses >= 5));
        let status = d.systems().get("Nukamba").map(|s| s.status_of("Cygnus"));
        prop_assert_eq!(matches!(status, Some(SignalStatus::SignalMissing(_))), misses >= 5);
    }
}
