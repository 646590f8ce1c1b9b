//! Minimal end-to-end demo: a scripted producer, a file-backed store, and
//! two turns on the same thread (the second one stopped mid-generation).
//!
//! Run with: cargo run --example turn_loop

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing_subscriber::EnvFilter;
use waypoint_session::{
    ConversationService, EventProducer, EventStream, SessionConfig, TurnRequest,
};
use waypoint_store::FileStore;
use waypoint_types::{ProducerEvent, StreamFrame};

/// Stands in for the model backend: echoes the last user message word by
/// word with a small delay per token.
struct EchoProducer;

#[async_trait]
impl EventProducer for EchoProducer {
    fn name(&self) -> &str {
        "echo"
    }

    async fn open(&self, request: TurnRequest) -> Result<EventStream> {
        let prompt = request
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();

        Ok(Box::pin(async_stream::stream! {
            yield Ok(ProducerEvent::Content { text: "you said:".to_string() });
            for word in prompt.split_whitespace() {
                tokio::time::sleep(Duration::from_millis(100)).await;
                yield Ok(ProducerEvent::Content { text: format!(" {word}") });
            }
            yield Ok(ProducerEvent::Done);
        }))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let dir = tempfile::tempdir()?;
    let store = Arc::new(FileStore::open(dir.path()).await?);
    let service = ConversationService::builder()
        .store(store)
        .producer(Arc::new(EchoProducer))
        .config(SessionConfig::default().with_idle_timeout(Duration::from_secs(5)))
        .build()?;

    // First turn runs to completion.
    let mut turn = service
        .start_turn("demo-user", None, "hello waypoint")
        .await?;
    print_frames(&mut turn.frames).await;

    // Second turn gets stopped after the first few frames.
    let mut turn = service
        .start_turn(
            "demo-user",
            Some(&turn.thread_id),
            "one two three four five six seven eight nine ten",
        )
        .await?;
    tokio::time::sleep(Duration::from_millis(250)).await;
    println!("\n-- issuing stop --");
    service.stop(&turn.thread_id);
    print_frames(&mut turn.frames).await;

    // What actually got committed:
    let transcript = service.transcript("demo-user", &turn.thread_id).await?;
    println!("\ncommitted transcript ({} messages):", transcript.len());
    for message in &transcript {
        println!("  [{}] {}", message.role.as_str(), message.content);
    }

    Ok(())
}

async fn print_frames(frames: &mut tokio::sync::mpsc::Receiver<StreamFrame>) {
    while let Some(frame) = frames.recv().await {
        match frame {
            StreamFrame::Content { text } => print!("{text}"),
            StreamFrame::ToolStart { name, .. } => print!("\n[tool {name} started]"),
            StreamFrame::ToolEnd { name, .. } => print!("\n[tool {name} finished]"),
            StreamFrame::Done => println!("\n-- done --"),
            StreamFrame::Stopped => println!("\n-- stopped --"),
            StreamFrame::Error { reason } => println!("\n-- error: {reason} --"),
        }
    }
}
