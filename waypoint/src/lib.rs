//! # Waypoint
//!
//! Conversation checkpoint store and streaming session orchestrator.
//!
//! ## Overview
//!
//! Waypoint persists conversational state as an append-only chain of
//! checkpoints per thread and drives streaming generation turns over it:
//!
//! - **Checkpoint chains**: every turn commits exactly one immutable
//!   checkpoint linked to its parent; rewind, reset, export and import
//!   operate on the chain.
//! - **Streaming sessions**: producer events are relayed to the client in
//!   order while the turn's output accumulates, with cooperative
//!   cancellation at every event boundary.
//! - **Single writer per thread**: a registry rejects concurrent turns on
//!   one thread instead of interleaving them.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use waypoint::prelude::*;
//!
//! # struct MyProducer;
//! # #[async_trait::async_trait]
//! # impl EventProducer for MyProducer {
//! #     async fn open(&self, _request: TurnRequest) -> anyhow::Result<EventStream> {
//! #         unimplemented!()
//! #     }
//! # }
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(FileStore::open("./threads").await?);
//!     let service = ConversationService::builder()
//!         .store(store)
//!         .producer(Arc::new(MyProducer))
//!         .build()?;
//!
//!     let mut turn = service.start_turn("user-1", None, "hello!").await?;
//!     while let Some(frame) = turn.frames.recv().await {
//!         match frame {
//!             StreamFrame::Content { text } => print!("{text}"),
//!             StreamFrame::Done | StreamFrame::Stopped => break,
//!             StreamFrame::Error { reason } => anyhow::bail!(reason),
//!             _ => {}
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **`waypoint-types`**: messages, producer events, stream frames, and
//!   the versioned channel-state encoding
//! - **`waypoint-store`**: checkpoint store and thread index traits with
//!   in-memory and durable file-backed engines, plus export/import
//! - **`waypoint-session`**: the generation session state machine, session
//!   registry, stream broker, and the conversation control surface

pub mod prelude;

pub use waypoint_types::{
    ChannelState, ChatMessage, DecodeError, ProducerEvent, Role, StreamFrame, ToolRecord,
    STATE_VERSION,
};

pub use waypoint_store::{
    export_thread, import_thread, AppendRequest, Checkpoint, CheckpointMeta, CheckpointStore,
    ConversationStore, FileStore, MemoryStore, SearchHit, StoreError, ThreadBundle, ThreadIndex,
    ThreadRecord, BUNDLE_VERSION, DEFAULT_NAMESPACE,
};

pub use waypoint_session::{
    byte_stream, ActiveSession, ConversationService, ConversationServiceBuilder, EventProducer,
    EventStream, GenerationSession, SessionConfig, SessionError, SessionPhase, SessionRegistry,
    StopReason, StreamBroker, Turn, TurnOutcome, TurnRequest,
};
