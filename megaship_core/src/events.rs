//! Outbound events, notification triggers and the sink interfaces that
//! receive them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use megaship_env::UploaderId;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::model::ShipStatusLabel;

// ============================================================================
// EVENTS
// ============================================================================

/// A change in a tracked ship's presence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MegashipEvent {
    pub name: String,
    pub system: String,
    pub system_address: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal_type: Option<String>,
    pub status: ShipStatusLabel,
    pub timestamp: DateTime<Utc>,
    pub is_irregular: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_detection: Option<DateTime<Utc>>,
}

/// What happened to commander traffic in a monitored system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrafficAction {
    PlannedDeparture,
    PlannedArrival,
    Departed,
    DepartedTimeout,
    Arrived,
    ArrivedPlanned,
}

/// A commander movement involving a monitored system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficEvent {
    pub action: TrafficAction,
    pub system: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commander_count: Option<u32>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploader_id: Option<UploaderId>,
}

impl TrafficEvent {
    pub(crate) fn new(action: TrafficAction, system: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            action,
            system: system.to_string(),
            destination: None,
            origin: None,
            commander_count: None,
            timestamp,
            uploader_id: None,
        }
    }

    pub(crate) fn destination(mut self, destination: &str) -> Self {
        self.destination = Some(destination.to_string());
        self
    }

    pub(crate) fn origin(mut self, origin: &str) -> Self {
        self.origin = Some(origin.to_string());
        self
    }

    pub(crate) fn count(mut self, commander_count: u32) -> Self {
        self.commander_count = Some(commander_count);
        self
    }

    pub(crate) fn uploader(mut self, uploader_id: &UploaderId) -> Self {
        self.uploader_id = Some(uploader_id.clone());
        self
    }
}

/// Derived event delivered to event sinks and kept in the recent-events buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrackerEvent {
    Megaship(MegashipEvent),
    SystemTraffic(TrafficEvent),
}

impl TrackerEvent {
    pub fn as_megaship(&self) -> Option<&MegashipEvent> {
        match self {
            TrackerEvent::Megaship(e) => Some(e),
            TrackerEvent::SystemTraffic(_) => None,
        }
    }

    pub fn as_traffic(&self) -> Option<&TrafficEvent> {
        match self {
            TrackerEvent::SystemTraffic(e) => Some(e),
            TrackerEvent::Megaship(_) => None,
        }
    }
}

/// Fire-and-forget trigger for the push-notification collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    ShipJumped {
        ship: String,
        origin_system: String,
        timestamp: DateTime<Utc>,
    },
    ShipAppeared {
        ship: String,
        system: String,
        timestamp: DateTime<Utc>,
    },
}

/// Everything one handled message produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outcome {
    pub events: Vec<TrackerEvent>,
    pub notifications: Vec<Notification>,
}

impl Outcome {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.notifications.is_empty()
    }

    pub(crate) fn push_event(&mut self, event: TrackerEvent) {
        self.events.push(event);
    }

    pub(crate) fn push_traffic(&mut self, event: TrafficEvent) {
        self.events.push(TrackerEvent::SystemTraffic(event));
    }

    pub(crate) fn notify(&mut self, notification: Notification) {
        self.notifications.push(notification);
    }

    /// Traffic events in emission order.
    pub fn traffic(&self) -> impl Iterator<Item = &TrafficEvent> {
        self.events.iter().filter_map(TrackerEvent::as_traffic)
    }

    /// Megaship events in emission order.
    pub fn megaships(&self) -> impl Iterator<Item = &MegashipEvent> {
        self.events.iter().filter_map(TrackerEvent::as_megaship)
    }
}

// ============================================================================
// SINKS
// ============================================================================

/// Errors reported by a sink. The runtime logs them and carries on.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Recipient of derived events, one method per event category.
#[async_trait]
pub trait EventSink: Send + Sync + 'static {
    async fn megaship(&self, event: MegashipEvent) -> Result<(), SinkError>;

    async fn system_traffic(&self, event: TrafficEvent) -> Result<(), SinkError>;
}

/// Recipient of ship movement notification triggers.
#[async_trait]
pub trait NotificationSink: Send + Sync + 'static {
    async fn ship_jumped(
        &self,
        ship: String,
        origin_system: String,
        timestamp: DateTime<Utc>,
    ) -> Result<(), SinkError>;

    async fn ship_appeared(
        &self,
        ship: String,
        system: String,
        timestamp: DateTime<Utc>,
    ) -> Result<(), SinkError>;
}

/// Sink that writes every event and notification to the log as JSON.
#[derive(Debug, Clone, Default)]
pub struct LoggingSink;

#[async_trait]
impl EventSink for LoggingSink {
    async fn megaship(&self, event: MegashipEvent) -> Result<(), SinkError> {
        let payload = serde_json::to_string(&TrackerEvent::Megaship(event))?;
        info!(target: "megaship::events", "{}", payload);
        Ok(())
    }

    async fn system_traffic(&self, event: TrafficEvent) -> Result<(), SinkError> {
        let payload = serde_json::to_string(&TrackerEvent::SystemTraffic(event))?;
        info!(target: "megaship::events", "{}", payload);
        Ok(())
    }
}

#[async_trait]
impl NotificationSink for LoggingSink {
    async fn ship_jumped(
        &self,
        ship: String,
        origin_system: String,
        timestamp: DateTime<Utc>,
    ) -> Result<(), SinkError> {
        info!(target: "megaship::notify", "{} - In Witchspace: left {} at {}", ship, origin_system, timestamp);
        Ok(())
    }

    async fn ship_appeared(
        &self,
        ship: String,
        system: String,
        timestamp: DateTime<Utc>,
    ) -> Result<(), SinkError> {
        info!(target: "megaship::notify", "{} - Detected: appeared in {} at {}", ship, system, timestamp);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_traffic_event_wire_shape() {
        let uploader = UploaderId::new("u1_EDMC");
        let event = TrackerEvent::SystemTraffic(
            TrafficEvent::new(TrafficAction::PlannedDeparture, "Alpha", ts())
                .destination("Beta")
                .uploader(&uploader),
        );
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "system_traffic");
        assert_eq!(json["action"], "planned_departure");
        assert_eq!(json["destination"], "Beta");
        assert_eq!(json["uploader_id"], "u1_EDMC");
        assert!(json.get("origin").is_none());
        assert!(json.get("commander_count").is_none());
    }

    #[test]
    fn test_megaship_event_wire_shape() {
        let event = TrackerEvent::Megaship(MegashipEvent {
            name: "Cygnus".into(),
            system: "Alpha".into(),
            system_address: 7,
            signal_type: None,
            status: ShipStatusLabel::SignalMissing,
            timestamp: ts(),
            is_irregular: false,
            previous_detection: Some(ts()),
        });
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "megaship");
        assert_eq!(json["status"], "SIGNAL MISSING");
        assert!(json.get("signal_type").is_none());
        assert!(json["previous_detection"].is_string());
    }

    #[tokio::test]
    async fn test_logging_sink_accepts_everything() {
        let sink = LoggingSink;
        let event = TrafficEvent::new(TrafficAction::Arrived, "Alpha", ts()).count(1);
        assert!(sink.system_traffic(event).await.is_ok());
        assert!(sink
            .ship_appeared("Cygnus".into(), "Alpha".into(), ts())
            .await
            .is_ok());
    }
}
