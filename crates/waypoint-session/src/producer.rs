use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use waypoint_types::{ChatMessage, ProducerEvent};

/// The event stream a producer yields for one turn.
pub type EventStream = Pin<Box<dyn Stream<Item = anyhow::Result<ProducerEvent>> + Send>>;

/// Conversation context handed to the producer when a turn starts.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub thread_id: String,
    pub namespace: String,
    /// Full message history including the new user message.
    pub messages: Vec<ChatMessage>,
}

/// The opaque component that generates a turn's event sequence.
///
/// The orchestrator makes no assumptions about what produces the events; a
/// stream error aborts the turn without a commit.
#[async_trait]
pub trait EventProducer: Send + Sync {
    /// Producer name recorded in checkpoint metadata.
    fn name(&self) -> &str {
        "producer"
    }

    /// Open the event stream for one turn.
    async fn open(&self, request: TurnRequest) -> anyhow::Result<EventStream>;
}
