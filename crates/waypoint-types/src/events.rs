use serde::{Deserialize, Serialize};

/// Events emitted by the opaque generation producer for one turn.
///
/// This is a closed set: the session loop matches on it exhaustively, so a
/// producer cannot smuggle in event kinds the orchestrator does not know
/// how to checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProducerEvent {
    /// Incremental response text.
    Content { text: String },

    /// The producer started a tool invocation.
    ToolStart {
        name: String,
        input: serde_json::Value,
    },

    /// A tool invocation finished.
    ToolEnd {
        name: String,
        output: serde_json::Value,
    },

    /// The producer finished the turn normally.
    Done,
}

/// Outbound frames relayed to the client, in producer order.
///
/// Every stream ends with exactly one terminal frame: `done`, `stopped`,
/// or `error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamFrame {
    Content { text: String },

    ToolStart {
        name: String,
        input: serde_json::Value,
    },

    ToolEnd {
        name: String,
        output: serde_json::Value,
    },

    /// Turn completed normally.
    Done,

    /// Turn was cancelled or timed out; partial output was committed.
    Stopped,

    /// Turn aborted without a commit.
    Error { reason: String },
}

impl StreamFrame {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Stopped | Self::Error { .. })
    }

    /// Encode the frame as one newline-delimited JSON line.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut bytes = serde_json::to_vec(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}
