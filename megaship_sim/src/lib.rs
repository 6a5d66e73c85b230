//! Megaship Tracker Deterministic Simulation Harness
//!
//! Runs the reconciliation engine against synthetic or recorded feeds with
//! every source of non-determinism under control:
//! - **Time**: a virtual clock the tracker reads through `TrackerContext`
//! - **Traffic**: commander journeys drawn from a seeded ChaCha8 stream
//! - **Transport**: an in-memory feed source in place of the relay socket
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────┐  envelopes  ┌──────────────┐  frames  ┌──────────────┐
//! │ TrafficOracle │ ──────────► │ FeedGenerator│ ───────► │ ReplaySource │
//! │ (ground truth)│             └──────────────┘          └──────┬───────┘
//! └───────────────┘                                              │
//!                                        receive loop + runtime  ▼
//!                          ┌──────────────────────────────────────────┐
//!                          │ Dispatcher on SimContext ──► RecordingSink│
//!                          └──────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use megaship_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42).run(ScenarioId::TrafficStorm);
//! assert!(result.passed);
//! ```

mod context;
mod feedgen;
mod recorder;
mod runner;
mod source;
pub mod scenarios;

#[cfg(test)]
mod properties;

pub use context::SimContext;
pub use feedgen::{feed_timestamp, FeedGenerator, JourneyStats, TimedEnvelope, TrafficOracle};
pub use recorder::RecordingSink;
pub use runner::{replay, ReplayReport, ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use source::{envelope_timestamp, load_jsonl, ReplayError, ReplaySource};
