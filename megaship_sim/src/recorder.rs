//! Sinks that remember everything delivered to them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use megaship_core::events::{
    EventSink, MegashipEvent, Notification, NotificationSink, SinkError, TrackerEvent, TrafficEvent,
};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Records delivered events and notifications in arrival order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<TrackerEvent>>,
    notifications: Mutex<Vec<Notification>>,
}

fn relock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TrackerEvent> {
        relock(&self.events).clone()
    }

    pub fn traffic(&self) -> Vec<TrafficEvent> {
        relock(&self.events)
            .iter()
            .filter_map(TrackerEvent::as_traffic)
            .cloned()
            .collect()
    }

    pub fn megaships(&self) -> Vec<MegashipEvent> {
        relock(&self.events)
            .iter()
            .filter_map(TrackerEvent::as_megaship)
            .cloned()
            .collect()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        relock(&self.notifications).clone()
    }

    pub fn len(&self) -> usize {
        relock(&self.events).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn megaship(&self, event: MegashipEvent) -> Result<(), SinkError> {
        relock(&self.events).push(TrackerEvent::Megaship(event));
        Ok(())
    }

    async fn system_traffic(&self, event: TrafficEvent) -> Result<(), SinkError> {
        relock(&self.events).push(TrackerEvent::SystemTraffic(event));
        Ok(())
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn ship_jumped(
        &self,
        ship: String,
        origin_system: String,
        timestamp: DateTime<Utc>,
    ) -> Result<(), SinkError> {
        relock(&self.notifications).push(Notification::ShipJumped {
            ship,
            origin_system,
            timestamp,
        });
        Ok(())
    }

    async fn ship_appeared(
        &self,
        ship: String,
        system: String,
        timestamp: DateTime<Utc>,
    ) -> Result<(), SinkError> {
        relock(&self.notifications).push(Notification::ShipAppeared {
            ship,
            system,
            timestamp,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recording_sink_keeps_order() {
        let sink = RecordingSink::new();
        let at = DateTime::from_timestamp(1_704_067_200, 0).unwrap();

        sink.ship_appeared("Cygnus".into(), "Marfic".into(), at).await.unwrap();
        sink.ship_jumped("Cygnus".into(), "Marfic".into(), at).await.unwrap();

        let kinds: Vec<_> = sink
            .notifications()
            .iter()
            .map(|n| matches!(n, Notification::ShipJumped { .. }))
            .collect();
        assert_eq!(kinds, vec![false, true]);
        assert!(sink.is_empty());
    }
}
