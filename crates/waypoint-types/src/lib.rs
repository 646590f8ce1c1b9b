//! Core data model for the Waypoint conversation store.
//!
//! This crate defines the types shared by the checkpoint store and the
//! session orchestrator: chat messages, the producer-side event enum, the
//! outbound stream frames, and the versioned channel-state encoding that
//! checkpoints persist.

pub mod events;
pub mod message;
pub mod state;

pub use events::{ProducerEvent, StreamFrame};
pub use message::{ChatMessage, Role, ToolRecord};
pub use state::{ChannelState, DecodeError, STATE_VERSION};
