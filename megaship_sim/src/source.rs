//! In-memory feed transport and recorded-feed loading.

use chrono::{DateTime, Utc};
use megaship_core::feed::{encode_frame, parse_timestamp, FeedEnvelope, FeedError};
use megaship_env::{EnvError, FeedSource};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use thiserror::Error;

/// Feed source that yields queued frames, then a few timeouts, then closes.
pub struct ReplaySource {
    frames: VecDeque<Vec<u8>>,
    idle_polls: usize,
    endpoint: String,
}

impl ReplaySource {
    pub fn new(frames: Vec<Vec<u8>>) -> Self {
        Self {
            frames: frames.into(),
            idle_polls: 0,
            endpoint: "replay://memory".to_string(),
        }
    }

    /// Compresses each envelope into a wire frame.
    pub fn from_envelopes<'a>(envelopes: impl IntoIterator<Item = &'a FeedEnvelope>) -> Result<Self, FeedError> {
        let frames = envelopes
            .into_iter()
            .map(encode_frame)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(frames))
    }

    /// Number of empty polls (receive timeouts) to report before closing.
    pub fn with_idle_polls(mut self, polls: usize) -> Self {
        self.idle_polls = polls;
        self
    }

    /// Appends a raw frame, e.g. a deliberately corrupted one.
    pub fn push_raw(&mut self, frame: Vec<u8>) {
        self.frames.push_back(frame);
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl FeedSource for ReplaySource {
    fn recv_frame(&mut self) -> Result<Option<Vec<u8>>, EnvError> {
        if let Some(frame) = self.frames.pop_front() {
            return Ok(Some(frame));
        }
        if self.idle_polls > 0 {
            self.idle_polls -= 1;
            return Ok(None);
        }
        Err(EnvError::closed("replay exhausted"))
    }

    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }
}

/// Errors while loading a recorded feed.
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Line {line}: {source}")]
    Json {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Reads one JSON envelope per line; blank lines are skipped.
pub fn load_jsonl(path: impl AsRef<Path>) -> Result<Vec<FeedEnvelope>, ReplayError> {
    let reader = BufReader::new(File::open(path)?);
    let mut envelopes = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let envelope = serde_json::from_str(&line).map_err(|source| ReplayError::Json {
            line: idx + 1,
            source,
        })?;
        envelopes.push(envelope);
    }

    Ok(envelopes)
}

/// The body timestamp of an envelope, if present and valid.
pub fn envelope_timestamp(envelope: &FeedEnvelope) -> Option<DateTime<Utc>> {
    let raw = envelope.message.get("timestamp")?.as_str()?;
    parse_timestamp(raw).ok()
}
