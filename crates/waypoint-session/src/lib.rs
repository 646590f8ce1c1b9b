//! Streaming generation sessions over the checkpoint store.
//!
//! One [`GenerationSession`] drives a single request/response turn: it loads
//! the thread's latest checkpoint, streams the producer's events to the
//! client through a [`StreamBroker`], and commits exactly one new checkpoint
//! when the turn completes or is stopped. The [`SessionRegistry`] enforces
//! at most one active session per thread, and [`ConversationService`] is the
//! control surface that ties the pieces together.

pub mod broker;
pub mod config;
pub mod error;
pub mod producer;
pub mod registry;
pub mod service;
pub mod session;

pub use broker::{byte_stream, StreamBroker};
pub use config::SessionConfig;
pub use error::SessionError;
pub use producer::{EventProducer, EventStream, TurnRequest};
pub use registry::{ActiveSession, SessionRegistry};
pub use service::{ConversationService, ConversationServiceBuilder, Turn};
pub use session::{GenerationSession, SessionPhase, StopReason, TurnOutcome};
