#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use waypoint_session::{EventProducer, EventStream, TurnRequest};
use waypoint_types::ProducerEvent;

#[derive(Clone)]
pub enum Step {
    Event(ProducerEvent),
    Sleep(Duration),
    /// Never yield again; only cancellation or the watchdog ends the turn.
    Hang,
    Fail(String),
}

pub fn content(text: &str) -> Step {
    Step::Event(ProducerEvent::Content {
        text: text.to_string(),
    })
}

pub fn tool_start(name: &str, input: serde_json::Value) -> Step {
    Step::Event(ProducerEvent::ToolStart {
        name: name.to_string(),
        input,
    })
}

pub fn tool_end(name: &str, output: serde_json::Value) -> Step {
    Step::Event(ProducerEvent::ToolEnd {
        name: name.to_string(),
        output,
    })
}

pub fn done() -> Step {
    Step::Event(ProducerEvent::Done)
}

/// Producer that replays one scripted event sequence per opened turn.
pub struct ScriptedProducer {
    scripts: Mutex<VecDeque<Vec<Step>>>,
}

impl ScriptedProducer {
    pub fn new(scripts: Vec<Vec<Step>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
        }
    }

    pub fn single(script: Vec<Step>) -> Self {
        Self::new(vec![script])
    }
}

#[async_trait]
impl EventProducer for ScriptedProducer {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn open(&self, _request: TurnRequest) -> anyhow::Result<EventStream> {
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default();

        Ok(Box::pin(async_stream::stream! {
            for step in script {
                match step {
                    Step::Event(event) => yield Ok(event),
                    Step::Sleep(duration) => tokio::time::sleep(duration).await,
                    Step::Hang => futures::future::pending::<()>().await,
                    Step::Fail(message) => {
                        yield Err(anyhow::anyhow!(message));
                        return;
                    }
                }
            }
        }))
    }
}
