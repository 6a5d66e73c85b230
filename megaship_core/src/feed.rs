//! Relay Feed Ingestion - Frame Decoding and Typed Message Bodies
//!
//! The public relay publishes zlib-compressed JSON envelopes of the form
//! `{"$schemaRef": ..., "header": {...}, "message": {...}}` over a ZeroMQ
//! PUB socket. This module:
//! - Inflates and parses raw frames into [`FeedEnvelope`]s
//! - Lifts the three message bodies the tracker cares about into typed form
//! - Provides the ZeroMQ subscriber (`eddn` feature) implementing
//!   [`FeedSource`] for the receive loop

use chrono::{DateTime, Utc};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use megaship_env::{EnvError, FeedSource, UploaderId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{Read, Write};
use thiserror::Error;
use tracing::warn;

use crate::error::TrackerError;

// ============================================================================
// ENVELOPE
// ============================================================================

/// Relay header attached to every envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedHeader {
    #[serde(rename = "uploaderID", default, skip_serializing_if = "Option::is_none")]
    pub uploader_id: Option<String>,

    #[serde(rename = "softwareName", default, skip_serializing_if = "Option::is_none")]
    pub software_name: Option<String>,

    #[serde(rename = "softwareVersion", default, skip_serializing_if = "Option::is_none")]
    pub software_version: Option<String>,

    #[serde(rename = "gatewayTimestamp", default, skip_serializing_if = "Option::is_none")]
    pub gateway_timestamp: Option<String>,
}

/// A decoded relay message: schema reference, header and untyped body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedEnvelope {
    #[serde(rename = "$schemaRef", default)]
    pub schema_ref: String,

    #[serde(default)]
    pub header: FeedHeader,

    #[serde(default)]
    pub message: Value,
}

impl FeedEnvelope {
    /// Composite uploader id (`uploaderID` + `softwareName`), if both are present.
    pub fn uploader_id(&self) -> Option<UploaderId> {
        let uploader = self.header.uploader_id.as_deref()?;
        let software = self.header.software_name.as_deref()?;
        UploaderId::from_parts(uploader, software)
    }

    /// True when the body is absent or an empty object.
    pub fn has_empty_body(&self) -> bool {
        match &self.message {
            Value::Null => true,
            Value::Object(map) => map.is_empty(),
            _ => false,
        }
    }
}

/// Errors for frame decoding and the relay subscriber.
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Inflate error: {0}")]
    Inflate(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl From<FeedError> for EnvError {
    fn from(e: FeedError) -> Self {
        EnvError::transport(e.to_string())
    }
}

/// Inflates and parses one raw relay frame.
pub fn decode_frame(frame: &[u8]) -> Result<FeedEnvelope, FeedError> {
    let mut decoder = ZlibDecoder::new(frame);
    let mut json = Vec::with_capacity(frame.len() * 4);
    decoder.read_to_end(&mut json)?;
    Ok(serde_json::from_slice(&json)?)
}

/// Serializes and compresses an envelope the way the relay does.
pub fn encode_frame(envelope: &FeedEnvelope) -> Result<Vec<u8>, FeedError> {
    let json = serde_json::to_vec(envelope)?;
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    Ok(encoder.finish()?)
}

/// Parses a feed timestamp (RFC 3339, usually with a `Z` suffix).
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, TrackerError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| TrackerError::InvalidTimestamp(format!("{}: {}", raw, e)))
}

// ============================================================================
// TYPED BODIES
// ============================================================================

#[derive(Deserialize)]
struct RawSignal {
    #[serde(rename = "SignalName", default)]
    name: String,
    #[serde(rename = "SignalType", default)]
    signal_type: String,
    #[serde(default)]
    timestamp: Option<String>,
}

#[derive(Deserialize)]
struct RawSignalScan {
    #[serde(rename = "StarSystem")]
    system: Option<String>,
    #[serde(rename = "SystemAddress")]
    system_address: Option<u64>,
    timestamp: Option<String>,
    #[serde(default)]
    signals: Vec<RawSignal>,
}

#[derive(Deserialize)]
struct RawJump {
    event: Option<String>,
    #[serde(rename = "StarSystem")]
    system: Option<String>,
    #[serde(rename = "SystemAddress")]
    system_address: Option<u64>,
    timestamp: Option<String>,
}

#[derive(Deserialize)]
struct RawWaypoint {
    #[serde(rename = "StarSystem")]
    system: Option<String>,
}

#[derive(Deserialize)]
struct RawRoute {
    #[serde(rename = "Route", default)]
    route: Vec<RawWaypoint>,
    timestamp: Option<String>,
}

fn required_timestamp(raw: Option<String>) -> Result<DateTime<Utc>, TrackerError> {
    let raw = raw.ok_or(TrackerError::MissingField("timestamp"))?;
    parse_timestamp(&raw)
}

/// One contact from a system-wide signal scan.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub name: String,
    pub signal_type: String,
    pub timestamp: DateTime<Utc>,
}

/// A signal-discovery report: every contact one uploader saw in one system.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalScan {
    pub system: String,
    pub system_address: u64,
    pub timestamp: DateTime<Utc>,
    pub signals: Vec<Signal>,
}

impl SignalScan {
    pub fn from_body(body: &Value) -> Result<Self, TrackerError> {
        let raw: RawSignalScan = serde_json::from_value(body.clone())?;
        let system = raw
            .system
            .filter(|s| !s.is_empty())
            .ok_or(TrackerError::MissingField("StarSystem"))?;
        let system_address = raw
            .system_address
            .ok_or(TrackerError::MissingField("SystemAddress"))?;
        let timestamp = required_timestamp(raw.timestamp)?;

        let signals = raw
            .signals
            .into_iter()
            .map(|s| {
                // Contacts without a usable time of their own inherit the scan's
                let signal_timestamp = match s.timestamp.as_deref().map(parse_timestamp) {
                    Some(Ok(t)) => t,
                    Some(Err(e)) => {
                        warn!("Signal {} in {}: {}; using scan time", s.name, system, e);
                        timestamp
                    }
                    None => timestamp,
                };
                Signal {
                    name: s.name,
                    signal_type: s.signal_type,
                    timestamp: signal_timestamp,
                }
            })
            .collect();

        Ok(Self {
            system,
            system_address,
            timestamp,
            signals,
        })
    }
}

/// A journal event; only jump confirmations are acted upon.
#[derive(Debug, Clone, PartialEq)]
pub struct JumpReport {
    pub system: String,
    pub system_address: u64,
    pub timestamp: DateTime<Utc>,
}

impl JumpReport {
    /// Journal event name that confirms a completed hyperspace jump.
    pub const JUMP_EVENT: &'static str = "FSDJump";

    /// Returns `Ok(None)` for journal events other than a jump confirmation.
    pub fn from_body(body: &Value) -> Result<Option<Self>, TrackerError> {
        let raw: RawJump = serde_json::from_value(body.clone())?;
        if raw.event.as_deref() != Some(Self::JUMP_EVENT) {
            return Ok(None);
        }

        let system = raw
            .system
            .filter(|s| !s.is_empty())
            .ok_or(TrackerError::MissingField("StarSystem"))?;
        let system_address = raw
            .system_address
            .ok_or(TrackerError::MissingField("SystemAddress"))?;
        let timestamp = required_timestamp(raw.timestamp)?;

        Ok(Some(Self {
            system,
            system_address,
            timestamp,
        }))
    }
}

/// A plotted route; only the first hop matters to the tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutePlan {
    pub current_system: String,
    pub next_system: String,
    pub timestamp: DateTime<Utc>,
}

impl RoutePlan {
    /// Returns `Ok(None)` when the route has fewer than two named waypoints.
    pub fn from_body(body: &Value) -> Result<Option<Self>, TrackerError> {
        let raw: RawRoute = serde_json::from_value(body.clone())?;
        let timestamp = required_timestamp(raw.timestamp)?;

        let mut waypoints = raw.route.into_iter().map(|w| w.system.filter(|s| !s.is_empty()));
        let (current_system, next_system) = match (waypoints.next(), waypoints.next()) {
            (Some(Some(current)), Some(Some(next))) => (current, next),
            _ => return Ok(None),
        };

        Ok(Some(Self {
            current_system,
            next_system,
            timestamp,
        }))
    }
}

// ============================================================================
// RELAY SUBSCRIBER
// ============================================================================

/// ZeroMQ subscriber connected to the public relay.
///
/// Subscribes to every topic and polls with a receive timeout so the
/// receive loop can notice shutdown while the relay is quiet.
#[cfg(feature = "eddn")]
pub struct ZmqFeedSource {
    socket: zmq::Socket,
    _context: zmq::Context,
    endpoint: String,
}

#[cfg(feature = "eddn")]
impl ZmqFeedSource {
    /// Connects to the relay at `endpoint` (e.g. `tcp://eddn.edcd.io:9500`).
    pub fn connect(endpoint: &str, recv_timeout_ms: i32) -> Result<Self, FeedError> {
        let context = zmq::Context::new();

        let socket = context
            .socket(zmq::SUB)
            .map_err(|e| FeedError::Transport(e.to_string()))?;
        socket
            .set_rcvtimeo(recv_timeout_ms)
            .map_err(|e| FeedError::Transport(e.to_string()))?;
        socket
            .connect(endpoint)
            .map_err(|e| FeedError::Transport(e.to_string()))?;
        socket
            .set_subscribe(b"") // Subscribe to all
            .map_err(|e| FeedError::Transport(e.to_string()))?;

        Ok(Self {
            socket,
            _context: context,
            endpoint: endpoint.to_string(),
        })
    }
}

#[cfg(feature = "eddn")]
impl FeedSource for ZmqFeedSource {
    fn recv_frame(&mut self) -> Result<Option<Vec<u8>>, EnvError> {
        match self.socket.recv_bytes(0) {
            Ok(frame) => Ok(Some(frame)),
            Err(zmq::Error::EAGAIN) => Ok(None), // Receive timeout
            Err(e) => Err(EnvError::transport(e.to_string())),
        }
    }

    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }
}

// ============================================================================
// NON-ZMQ FALLBACK (when eddn feature is disabled)
// ============================================================================

/// Placeholder subscriber for builds without libzmq.
#[cfg(not(feature = "eddn"))]
pub struct ZmqFeedSource {
    endpoint: String,
}

#[cfg(not(feature = "eddn"))]
impl ZmqFeedSource {
    pub fn connect(endpoint: &str, _recv_timeout_ms: i32) -> Result<Self, FeedError> {
        Err(FeedError::Transport(format!(
            "cannot connect to {}: built without the 'eddn' feature",
            endpoint
        )))
    }
}

#[cfg(not(feature = "eddn"))]
impl FeedSource for ZmqFeedSource {
    fn recv_frame(&mut self) -> Result<Option<Vec<u8>>, EnvError> {
        Ok(None)
    }

    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(message: Value) -> FeedEnvelope {
        FeedEnvelope {
            schema_ref: "https://eddn.edcd.io/schemas/fsssignaldiscovered/1".into(),
            header: FeedHeader {
                uploader_id: Some("abc".into()),
                software_name: Some("EDMC".into()),
                ..Default::default()
            },
            message,
        }
    }

    #[test]
    fn test_frame_roundtrip() {
        let env = envelope(json!({"StarSystem": "Alpha"}));
        let frame = encode_frame(&env).unwrap();
        let decoded = decode_frame(&frame).unwrap();
        assert_eq!(decoded, env);
        assert_eq!(decoded.uploader_id().unwrap().as_str(), "abc_EDMC");
    }

    #[test]
    fn test_garbage_frame_is_rejected() {
        assert!(matches!(decode_frame(b"not zlib"), Err(FeedError::Inflate(_))));

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"{not json").unwrap();
        let frame = encoder.finish().unwrap();
        assert!(matches!(decode_frame(&frame), Err(FeedError::Json(_))));
    }

    #[test]
    fn test_empty_body_detection() {
        assert!(envelope(Value::Null).has_empty_body());
        assert!(envelope(json!({})).has_empty_body());
        assert!(!envelope(json!({"a": 1})).has_empty_body());
    }

    #[test]
    fn test_signal_scan_inherits_timestamp() {
        let scan = SignalScan::from_body(&json!({
            "StarSystem": "Alpha",
            "SystemAddress": 42,
            "timestamp": "2024-01-01T00:00:00Z",
            "signals": [
                {"SignalName": "Cygnus", "SignalType": "Megaship"},
                {"SignalName": "X1X-11X", "SignalType": "FleetCarrier", "timestamp": "2024-01-01T00:00:05Z"}
            ]
        }))
        .unwrap();

        assert_eq!(scan.signals.len(), 2);
        assert_eq!(scan.signals[0].timestamp, scan.timestamp);
        assert_eq!(scan.signals[1].timestamp, parse_timestamp("2024-01-01T00:00:05Z").unwrap());
    }

    #[test]
    fn test_bad_signal_timestamp_falls_back_to_scan_time() {
        let scan = SignalScan::from_body(&json!({
            "StarSystem": "Alpha",
            "SystemAddress": 42,
            "timestamp": "2024-01-01T00:00:00Z",
            "signals": [
                {"SignalName": "Cygnus", "SignalType": "Megaship", "timestamp": "not a time"},
                {"SignalName": "X1X-11X", "SignalType": "FleetCarrier"}
            ]
        }))
        .unwrap();

        assert_eq!(scan.signals.len(), 2);
        assert_eq!(scan.signals[0].name, "Cygnus");
        assert_eq!(scan.signals[0].timestamp, scan.timestamp);
    }

    #[test]
    fn test_signal_scan_requires_fields() {
        let missing_system = SignalScan::from_body(&json!({
            "SystemAddress": 42, "timestamp": "2024-01-01T00:00:00Z"
        }));
        assert!(matches!(missing_system, Err(TrackerError::MissingField("StarSystem"))));

        let bad_time = SignalScan::from_body(&json!({
            "StarSystem": "Alpha", "SystemAddress": 42, "timestamp": "yesterday"
        }));
        assert!(matches!(bad_time, Err(TrackerError::InvalidTimestamp(_))));
    }

    #[test]
    fn test_jump_report_ignores_other_events() {
        let docked = JumpReport::from_body(&json!({
            "event": "Docked", "StarSystem": "Alpha", "SystemAddress": 1,
            "timestamp": "2024-01-01T00:00:00Z"
        }))
        .unwrap();
        assert!(docked.is_none());

        let jump = JumpReport::from_body(&json!({
            "event": "FSDJump", "StarSystem": "Alpha", "SystemAddress": 1,
            "timestamp": "2024-01-01T00:00:00Z"
        }))
        .unwrap()
        .unwrap();
        assert_eq!(jump.system, "Alpha");
    }

    #[test]
    fn test_route_plan_needs_two_waypoints() {
        let single = RoutePlan::from_body(&json!({
            "Route": [{"StarSystem": "Alpha"}], "timestamp": "2024-01-01T00:00:00Z"
        }))
        .unwrap();
        assert!(single.is_none());

        let plan = RoutePlan::from_body(&json!({
            "Route": [{"StarSystem": "Alpha"}, {"StarSystem": "Beta"}, {"StarSystem": "Gamma"}],
            "timestamp": "2024-01-01T00:00:00Z"
        }))
        .unwrap()
        .unwrap();
        assert_eq!(plan.current_system, "Alpha");
        assert_eq!(plan.next_system, "Beta");
    }

    #[cfg(not(feature = "eddn"))]
    #[test]
    fn test_fallback_subscriber_refuses_to_connect() {
        assert!(ZmqFeedSource::connect("tcp://127.0.0.1:9500", 100).is_err());
    }
}
