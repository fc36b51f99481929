//! Records produced by the file storage and consumed by the engine and admin views.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::Timestamp;

/// The submission that produced a state: which endpoint and when it was stored.
///
/// Persisted as a two element array `[endpoint, timestamp]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(String, Timestamp)", into = "(String, Timestamp)")]
pub struct StateOrigin {
    pub endpoint: String,
    pub timestamp: Timestamp,
}

impl StateOrigin {
    pub fn new(endpoint: impl Into<String>, timestamp: Timestamp) -> Self {
        Self {
            endpoint: endpoint.into(),
            timestamp,
        }
    }

    /// True when the given dated entry is the one that produced the state.
    pub fn matches(&self, endpoint: &str, timestamp: Timestamp) -> bool {
        self.endpoint == endpoint && self.timestamp == timestamp
    }
}

impl From<(String, Timestamp)> for StateOrigin {
    fn from((endpoint, timestamp): (String, Timestamp)) -> Self {
        Self { endpoint, timestamp }
    }
}

impl From<StateOrigin> for (String, Timestamp) {
    fn from(origin: StateOrigin) -> Self {
        (origin.endpoint, origin.timestamp)
    }
}

/// Current workflow state of a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateRecord {
    pub state: String,
    pub timestamp: Timestamp,
    pub origin: Option<StateOrigin>,
}

/// Content of one dated file.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntry {
    pub endpoint: String,
    pub timestamp: Timestamp,
    pub content: Map<String, Value>,
}

/// One line of a user's history: a dated, non-system entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct IndexEntry {
    pub timestamp: Timestamp,
    pub endpoint: String,
}

/// Row of the admin user list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserSummary {
    pub uid: String,
    /// Rendered friendly id, or the e-mail when none is configured or it fails to render.
    pub friendly_id: String,
    pub email: String,
    pub state: String,
    pub timestamp: Timestamp,
}
