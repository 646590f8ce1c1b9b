use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use waypoint_store::{AppendRequest, Checkpoint, CheckpointMeta, CheckpointStore, ConversationStore};
use waypoint_types::{ChannelState, ChatMessage, ProducerEvent, StreamFrame, ToolRecord};

use crate::broker::StreamBroker;
use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::producer::{EventProducer, TurnRequest};

/// Lifecycle of one generation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Loading,
    Generating,
    Committing,
    Completed,
    Cancelled,
    Failed,
}

/// Why a turn was stopped short of completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopReason {
    /// Explicit stop via the registry.
    Stop,
    /// The idle-producer watchdog fired.
    Timeout,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::Timeout => "timeout",
        }
    }
}

/// Result of a committed turn. Both completion and cancellation commit;
/// they differ only in the terminal frame and the truncated flag.
#[derive(Debug)]
pub struct TurnOutcome {
    pub thread_id: String,
    pub checkpoint: Checkpoint,
    pub stopped: Option<StopReason>,
}

enum TurnEnd {
    Completed,
    Stopped(StopReason),
}

/// Drives one request/response turn against a thread.
///
/// Loads the latest checkpoint, appends the user message in memory, relays
/// producer events through the broker while accumulating the assistant
/// output, and commits exactly one new checkpoint. Cancellation is checked
/// at every event boundary, so stop latency is bounded by one producer
/// event.
pub struct GenerationSession {
    store: Arc<dyn ConversationStore>,
    producer: Arc<dyn EventProducer>,
    config: SessionConfig,
    thread_id: String,
    namespace: String,
    cancel: CancellationToken,
    started_at: DateTime<Utc>,
    phase: SessionPhase,
}

impl GenerationSession {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        producer: Arc<dyn EventProducer>,
        config: SessionConfig,
        thread_id: impl Into<String>,
        namespace: impl Into<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            producer,
            config,
            thread_id: thread_id.into(),
            namespace: namespace.into(),
            cancel,
            started_at: Utc::now(),
            phase: SessionPhase::Idle,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    fn transition(&mut self, phase: SessionPhase) {
        tracing::debug!(thread_id = %self.thread_id, from = ?self.phase, to = ?phase, "session transition");
        self.phase = phase;
    }

    /// Run the turn to a terminal state, consuming the session.
    ///
    /// The broker receives every producer event as a frame plus exactly one
    /// terminal frame. On `Err` nothing was committed and the thread's
    /// prior latest checkpoint is untouched.
    pub async fn run(mut self, user_text: String, mut broker: StreamBroker) -> Result<TurnOutcome> {
        self.transition(SessionPhase::Loading);

        let parent = match self.store.latest(&self.thread_id, &self.namespace).await {
            Ok(parent) => parent,
            Err(e) => {
                broker
                    .send(StreamFrame::Error {
                        reason: e.to_string(),
                    })
                    .await;
                return Err(self.fail(e.into()));
            }
        };
        let mut state = match &parent {
            Some(checkpoint) => match checkpoint.channel_state() {
                Ok(state) => state,
                Err(e) => {
                    broker
                        .send(StreamFrame::Error {
                            reason: e.to_string(),
                        })
                        .await;
                    return Err(self.fail(SessionError::Store(e.into())));
                }
            },
            None => ChannelState::new(),
        };
        state.push(ChatMessage::user(user_text));

        self.transition(SessionPhase::Generating);
        let request = TurnRequest {
            thread_id: self.thread_id.clone(),
            namespace: self.namespace.clone(),
            messages: state.messages.clone(),
        };
        let mut stream = match self.producer.open(request).await {
            Ok(stream) => stream,
            Err(e) => {
                broker
                    .send(StreamFrame::Error {
                        reason: e.to_string(),
                    })
                    .await;
                return Err(self.fail(SessionError::Generation(e)));
            }
        };

        let mut text = String::new();
        let mut tools: Vec<ToolRecord> = Vec::new();

        let end = loop {
            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break TurnEnd::Stopped(StopReason::Stop),
                event = stream.next() => event,
                _ = tokio::time::sleep(self.config.idle_timeout) => {
                    tracing::warn!(thread_id = %self.thread_id, "producer idle past watchdog window");
                    break TurnEnd::Stopped(StopReason::Timeout);
                }
            };

            match event {
                // An exhausted stream ends the turn like an explicit done.
                None | Some(Ok(ProducerEvent::Done)) => break TurnEnd::Completed,
                Some(Ok(ProducerEvent::Content { text: chunk })) => {
                    text.push_str(&chunk);
                    broker.send(StreamFrame::Content { text: chunk }).await;
                }
                Some(Ok(ProducerEvent::ToolStart { name, input })) => {
                    tools.push(ToolRecord {
                        name: name.clone(),
                        input: input.clone(),
                        output: None,
                    });
                    broker.send(StreamFrame::ToolStart { name, input }).await;
                }
                Some(Ok(ProducerEvent::ToolEnd { name, output })) => {
                    match tools
                        .iter_mut()
                        .rev()
                        .find(|t| t.name == name && t.output.is_none())
                    {
                        Some(record) => record.output = Some(output.clone()),
                        None => {
                            tracing::warn!(thread_id = %self.thread_id, tool = %name, "tool_end without matching tool_start");
                            tools.push(ToolRecord {
                                name: name.clone(),
                                input: serde_json::Value::Null,
                                output: Some(output.clone()),
                            });
                        }
                    }
                    broker.send(StreamFrame::ToolEnd { name, output }).await;
                }
                Some(Err(e)) => {
                    broker
                        .send(StreamFrame::Error {
                            reason: e.to_string(),
                        })
                        .await;
                    return Err(self.fail(SessionError::Generation(e)));
                }
            }
        };

        self.transition(SessionPhase::Committing);
        let stopped = match &end {
            TurnEnd::Completed => None,
            TurnEnd::Stopped(reason) => Some(*reason),
        };

        if !text.is_empty() || !tools.is_empty() {
            state.push(ChatMessage::assistant(text).with_tool_calls(tools));
        }

        let step = parent.as_ref().map(|c| c.meta.step + 1).unwrap_or(0);
        let mut meta =
            CheckpointMeta::new(step, self.producer.name()).truncated(stopped.is_some());
        if let Some(reason) = stopped {
            meta = meta.with_tag("stop_reason", serde_json::json!(reason.as_str()));
        }

        let request = AppendRequest {
            thread_id: self.thread_id.clone(),
            namespace: self.namespace.clone(),
            parent_checkpoint_id: parent.map(|c| c.checkpoint_id),
            state,
            meta,
        };
        let checkpoint = self.commit(request, &mut broker).await?;

        broker
            .send(match stopped {
                None => StreamFrame::Done,
                Some(_) => StreamFrame::Stopped,
            })
            .await;

        self.transition(match stopped {
            None => SessionPhase::Completed,
            Some(_) => SessionPhase::Cancelled,
        });
        tracing::info!(
            thread_id = %self.thread_id,
            checkpoint_id = %checkpoint.checkpoint_id,
            truncated = checkpoint.meta.truncated,
            elapsed_ms = (Utc::now() - self.started_at).num_milliseconds(),
            "turn committed"
        );

        Ok(TurnOutcome {
            thread_id: self.thread_id,
            checkpoint,
            stopped,
        })
    }

    /// Append with one local retry for transient persistence failures.
    async fn commit(
        &mut self,
        request: AppendRequest,
        broker: &mut StreamBroker,
    ) -> Result<Checkpoint> {
        let first = match self.store.append(request.clone()).await {
            Ok(checkpoint) => return Ok(checkpoint),
            Err(e) => e,
        };

        if first.is_retryable() {
            tracing::warn!(thread_id = %self.thread_id, error = %first, "checkpoint append failed, retrying once");
            match self.store.append(request).await {
                Ok(checkpoint) => return Ok(checkpoint),
                Err(retry) => {
                    broker
                        .send(StreamFrame::Error {
                            reason: retry.to_string(),
                        })
                        .await;
                    return Err(self.fail(retry.into()));
                }
            }
        }

        broker
            .send(StreamFrame::Error {
                reason: first.to_string(),
            })
            .await;
        Err(self.fail(first.into()))
    }

    fn fail(&mut self, error: SessionError) -> SessionError {
        self.transition(SessionPhase::Failed);
        tracing::error!(thread_id = %self.thread_id, error = %error, "turn aborted without commit");
        error
    }
}
