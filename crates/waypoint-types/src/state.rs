use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::ChatMessage;

/// Current channel-state encoding version.
pub const STATE_VERSION: u16 = 1;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("state encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported state version: {0}")]
    UnsupportedVersion(u16),
}

/// The conversational state a checkpoint snapshots: the full message list
/// plus free-form auxiliary channel values.
///
/// Encoded as versioned JSON. Decoding rejects versions this build does not
/// understand instead of guessing at field layouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelState {
    pub version: u16,
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub values: BTreeMap<String, serde_json::Value>,
}

impl ChannelState {
    pub fn new() -> Self {
        Self {
            version: STATE_VERSION,
            messages: Vec::new(),
            values: BTreeMap::new(),
        }
    }

    pub fn with_messages(messages: Vec<ChatMessage>) -> Self {
        Self {
            version: STATE_VERSION,
            messages,
            values: BTreeMap::new(),
        }
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let state: Self = serde_json::from_slice(bytes)?;
        if state.version != STATE_VERSION {
            return Err(DecodeError::UnsupportedVersion(state.version));
        }
        Ok(state)
    }
}

impl Default for ChannelState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bytes() {
        let mut state = ChannelState::new();
        state.push(ChatMessage::user("hi"));
        state.push(ChatMessage::assistant("hello"));
        state
            .values
            .insert("step".to_string(), serde_json::json!(2));

        let bytes = state.to_bytes().unwrap();
        let back = ChannelState::from_bytes(&bytes).unwrap();
        assert_eq!(back.messages.len(), 2);
        assert_eq!(back.messages[0].content, "hi");
        assert_eq!(back.values["step"], serde_json::json!(2));
    }

    #[test]
    fn rejects_unknown_version() {
        let bytes = br#"{"version": 99, "messages": []}"#;
        match ChannelState::from_bytes(bytes) {
            Err(DecodeError::UnsupportedVersion(99)) => {}
            other => panic!("expected version error, got {other:?}"),
        }
    }
}
