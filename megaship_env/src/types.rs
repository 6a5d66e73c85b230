//! Common types for the tracker environment abstraction.

use serde::{Deserialize, Serialize};

/// Pseudonymous identifier of the client that uploaded an observation.
///
/// Built from the relay header's uploader hash and the uploading software
/// name, so one player running two tools counts as two uploaders. It is not
/// a player identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UploaderId(String);

impl UploaderId {
    /// Creates an id from its raw string form.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Composes the id from header parts; both must be non-empty.
    pub fn from_parts(uploader: &str, software: &str) -> Option<Self> {
        if uploader.is_empty() || software.is_empty() {
            return None;
        }
        Some(Self(format!("{}_{}", uploader, software)))
    }

    /// Returns the raw string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UploaderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Uploader hashes are long; the first 8 chars are enough for logs
        let short: String = self.0.chars().take(8).collect();
        write!(f, "{}", short)
    }
}
