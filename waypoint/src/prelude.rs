//! Prelude module for convenient imports
//!
//! Import everything you need with:
//! ```rust
//! use waypoint::prelude::*;
//! ```

pub use waypoint_types::{ChannelState, ChatMessage, ProducerEvent, Role, StreamFrame, ToolRecord};

pub use waypoint_store::{
    CheckpointStore, ConversationStore, FileStore, MemoryStore, StoreError, ThreadIndex,
    DEFAULT_NAMESPACE,
};

pub use waypoint_session::{
    ConversationService, EventProducer, EventStream, SessionConfig, SessionError, SessionRegistry,
    StreamBroker, Turn, TurnRequest,
};
