use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use waypoint_types::{ChannelState, DecodeError};

/// Checkpoint metadata persisted alongside the state blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMeta {
    /// Position of this checkpoint in its chain, starting at 0.
    pub step: u64,
    /// Name of the producer that generated the turn.
    pub producer: String,
    pub created_at: DateTime<Utc>,
    /// True when the turn was cancelled or timed out before completing.
    #[serde(default)]
    pub truncated: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, serde_json::Value>,
}

impl CheckpointMeta {
    pub fn new(step: u64, producer: impl Into<String>) -> Self {
        Self {
            step,
            producer: producer.into(),
            created_at: Utc::now(),
            truncated: false,
            tags: BTreeMap::new(),
        }
    }

    pub fn truncated(mut self, truncated: bool) -> Self {
        self.truncated = truncated;
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.tags.insert(key.into(), value);
        self
    }
}

/// An immutable snapshot of conversational state, linked to its predecessor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub thread_id: String,
    pub namespace: String,
    /// Time-sortable unique id (UUIDv7), so lexicographic order follows
    /// creation order.
    pub checkpoint_id: String,
    /// `None` only for the root checkpoint of a namespace.
    pub parent_checkpoint_id: Option<String>,
    /// Versioned channel-state encoding; decode with [`Checkpoint::channel_state`].
    pub state: Vec<u8>,
    pub meta: CheckpointMeta,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn channel_state(&self) -> Result<ChannelState, DecodeError> {
        ChannelState::from_bytes(&self.state)
    }
}

/// Input to [`crate::CheckpointStore::append`].
#[derive(Debug, Clone)]
pub struct AppendRequest {
    pub thread_id: String,
    pub namespace: String,
    pub parent_checkpoint_id: Option<String>,
    pub state: ChannelState,
    pub meta: CheckpointMeta,
}

pub(crate) fn new_checkpoint_id() -> String {
    uuid::Uuid::now_v7().to_string()
}
